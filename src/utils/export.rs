//! Stats export: one CSV row per live channel, plus a log summary.
//!
//! Output: `<dir>/channel_stats.csv` with the channel id, its health and every counter of
//! `StatsSnapshot`. Rows are overwritten on each export; the bus trace CSV is the place for
//! per-event history.

use csv::Writer;
use log::{error, info, warn};
use serde::Serialize;
use std::{
    fs::create_dir_all,
    path::{Path, PathBuf},
};

use crate::{
    channel::ChannelId,
    utils::stats::{ChannelHealth, StatsSnapshot},
};

pub const STATS_FILE: &str = "channel_stats.csv";

#[derive(Serialize)]
struct StatsRow {
    channel: String,
    health: ChannelHealth,
    tx_immediate: u64,
    tx_queued: u64,
    tx_bytes: u64,
    tx_queue_full: u64,
    consecutive_queue_full: u64,
    turnarounds: u64,
    rx_bytes: u64,
    rx_overflow: u64,
    rx_echo_discarded: u64,
    rx_timeouts: u64,
    rx_flushed: u64,
    spurious_completions: u64,
}

impl StatsRow {
    fn new(id: ChannelId, s: &StatsSnapshot, health: ChannelHealth) -> Self {
        Self {
            channel: id.to_string(),
            health,
            tx_immediate: s.tx_immediate,
            tx_queued: s.tx_queued,
            tx_bytes: s.tx_bytes,
            tx_queue_full: s.tx_queue_full,
            consecutive_queue_full: s.consecutive_queue_full,
            turnarounds: s.turnarounds,
            rx_bytes: s.rx_bytes,
            rx_overflow: s.rx_overflow,
            rx_echo_discarded: s.rx_echo_discarded,
            rx_timeouts: s.rx_timeouts,
            rx_flushed: s.rx_flushed,
            spurious_completions: s.spurious_completions,
        }
    }
}

/// Write `rows` to `<dir>/channel_stats.csv`. Returns the file path on success.
pub fn export_stats_csv(
    dir: &Path,
    rows: &[(ChannelId, StatsSnapshot, ChannelHealth)],
) -> Result<PathBuf, csv::Error> {
    create_dir_all(dir)?;
    let path = dir.join(STATS_FILE);
    let mut wtr = Writer::from_path(&path)?;
    for (id, stats, health) in rows {
        wtr.serialize(StatsRow::new(*id, stats, *health))?;
    }
    wtr.flush()?;
    info!("Channel stats exported to: {:?}", path);
    Ok(path)
}

/// Log one line per channel; anything not healthy is a warning.
pub fn log_summary(rows: &[(ChannelId, StatsSnapshot, ChannelHealth)]) {
    for (id, s, health) in rows {
        let line = format!(
            "[{}] {:?}: tx {} ({} immediate, {} queued, {} rejected), {} turnarounds, rx {} ({} overflow, {} echo, {} timeouts)",
            id,
            health,
            s.tx_bytes,
            s.tx_immediate,
            s.tx_queued,
            s.tx_queue_full,
            s.turnarounds,
            s.rx_bytes,
            s.rx_overflow,
            s.rx_echo_discarded,
            s.rx_timeouts
        );
        match health {
            ChannelHealth::Healthy => info!("{}", line),
            ChannelHealth::Degraded => warn!("{}", line),
            ChannelHealth::Stuck => error!("{}", line),
        }
    }
}
