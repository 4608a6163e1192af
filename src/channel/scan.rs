//! Baud-rate scan: find the rate the actuators on a bus answer at.
//!
//! For each candidate the channel is fully torn down and brought up again (never an in-place
//! rate change) and the caller's probe runs against the fresh transport. The probe is protocol
//! code: it sends whatever ping the bus speaks and reports whether anyone replied.

use log::{debug, info, warn};

use crate::hw::HardwareLine;

use super::{ChannelId, ChannelRegistry, LineConfig, Transport, TransportError};

/// Try each rate in `rates` until `probe` returns true.
///
/// Returns the matching rate and leaves the channel up at it. If nothing answers, the channel
/// is brought back up with the settings it had before the scan and `Ok(None)` is returned.
/// Rates the hardware refuses are skipped.
pub fn scan_baud_rates<H, F>(
    registry: &ChannelRegistry<H>,
    id: ChannelId,
    rates: &[u32],
    mut probe: F,
) -> Result<Option<u32>, TransportError>
where
    H: HardwareLine,
    F: FnMut(&Transport<H>) -> bool,
{
    let original = registry.config(id)?;
    let mut hw = registry.tear_down(id)?;

    for &baud in rates {
        let config = original.clone().with_line(LineConfig {
            baud_rate: baud,
            ..original.line
        });
        match registry.bring_up(id, config, hw.clone()) {
            Ok(transport) => {
                if probe(&transport) {
                    info!("[{}] actuators answer at {} baud", id, baud);
                    return Ok(Some(baud));
                }
                debug!("[{}] no answer at {} baud", id, baud);
                hw = registry.tear_down(id)?;
            }
            Err(TransportError::Configuration(e)) => {
                debug!("[{}] skipping {} baud: {}", id, baud, e);
            }
            Err(e) => {
                if let Err(restore) = registry.bring_up(id, original, hw) {
                    warn!("[{}] scan aborted and the channel stays down: {}", id, restore);
                }
                return Err(e);
            }
        }
    }

    info!(
        "[{}] scan found nothing, back to {} baud",
        id, original.line.baud_rate
    );
    registry.bring_up(id, original, hw)?;
    Ok(None)
}
