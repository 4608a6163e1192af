//! isr.rs
//! Interrupt completion handler, one per channel.
//!
//! Runs in interrupt context: never blocks, never allocates, bounded work per event.
//! - Byte-received: dropped as echo while the line transmits; otherwise enqueued per the
//!   channel's overflow policy (a drop is counted, not reported).
//! - Transmit-complete: load the next queued byte, or turn the bus around to receive when the
//!   queue is empty. This is the only place a draining line goes back to receive.

use std::sync::Arc;

use crate::{
    hw::{HardwareLine, IrqEvent},
    utils::trace::BusEvent,
};

use super::{arbiter::LineState, core::ChannelCore, ChannelId, Direction, OverflowPolicy};

/// Interrupt-side handle handed to the hardware at bring-up.
pub struct IsrHandle<H: HardwareLine> {
    core: Arc<ChannelCore<H>>,
}

impl<H: HardwareLine> Clone for IsrHandle<H> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

impl<H: HardwareLine> IsrHandle<H> {
    pub(crate) fn new(core: Arc<ChannelCore<H>>) -> Self {
        Self { core }
    }

    pub fn channel(&self) -> ChannelId {
        self.core.id
    }

    /// Interrupt entry point.
    pub fn on_interrupt(&self, event: IrqEvent) {
        if self.core.is_closed() {
            return;
        }
        match event {
            IrqEvent::ByteReceived(byte) => self.on_byte_received(byte),
            IrqEvent::TransmitComplete => self.on_transmit_complete(),
        }
    }

    fn on_byte_received(&self, byte: u8) {
        let core = &*self.core;

        // Half-duplex: whatever arrives while we drive the line is our own echo.
        if core.arbiter.direction() == Direction::Transmit {
            core.stats.record_echo_discarded();
            core.trace(BusEvent::EchoDiscarded {
                channel: core.id,
                byte,
            });
            return;
        }

        let dropped = match core.config.rx_overflow {
            OverflowPolicy::DropNewest => core.rx_isr.try_push(byte).err(),
            OverflowPolicy::DropOldest => core.rx_isr.force_push(byte),
        };
        match dropped {
            Some(lost) => {
                core.stats.record_rx_overflow();
                core.trace(BusEvent::RxOverflow {
                    channel: core.id,
                    byte: lost,
                });
                if core.config.rx_overflow == OverflowPolicy::DropOldest {
                    // the incoming byte made it in
                    core.stats.record_rx_byte();
                }
            }
            None => {
                core.stats.record_rx_byte();
                core.trace(BusEvent::RxByte {
                    channel: core.id,
                    byte,
                });
            }
        }
    }

    fn on_transmit_complete(&self) {
        let core = &*self.core;
        let hw = &*core.hw;

        if core.arbiter.state() != LineState::Busy {
            core.stats.record_spurious_completion();
            return;
        }

        // The completion interrupt fires again after this byte, so the drain reloads itself.
        if let Some(byte) = core.tx_isr.try_pop() {
            hw.transmit(byte);
            core.stats.record_tx_byte();
            core.trace(BusEvent::TxByte {
                channel: core.id,
                byte,
            });
            return;
        }

        core.arbiter.turnaround(hw);
        core.stats.record_turnaround();
        core.trace(BusEvent::Turnaround { channel: core.id });
        core.idle.ring();

        // A producer may have enqueued between the empty pop and the turnaround.
        if let Some(byte) = core.arbiter.restart(
            hw,
            || !core.tx_isr.is_empty(),
            || core.tx_isr.try_pop(),
        ) {
            core.started(byte, false);
        }
    }
}
