//! transport.rs
//! Worker-side transmit and receive paths for one channel.
//!
//! Transmit: idle-line fast path, queued slow path.
//! - FIFO empty and line idle → take the line, start the transmitter directly (no enqueue).
//! - Otherwise → enqueue with a bounded wait; the completion interrupt drains in order.
//!
//! Receive: bounded wait on the receive FIFO filled by the interrupt handler. A timeout is a
//! normal outcome (absent device) and leaves the FIFO untouched.

use log::{debug, trace};
use std::{sync::Arc, time::Duration};

use crate::{
    hw::HardwareLine,
    utils::{
        stats::{ChannelHealth, StatsSnapshot},
        trace::BusEvent,
    },
};

use super::{
    core::ChannelCore,
    fifo::{deadline_after, FlushMode, WaitError},
    ChannelConfig, ChannelId, Direction, LineConfig, ProtocolTag, SendAllError, TransportError,
};

/// How `send_byte` got the byte onto the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accepted {
    /// The line was idle; the byte went straight to the transmitter.
    Immediate,
    /// The byte waits in the transmit FIFO behind an ongoing transmission.
    Queued,
}

/// Byte-level contract the actuator protocol layer is written against.
pub trait BusLink {
    fn protocol(&self) -> ProtocolTag;
    fn send_byte(&self, byte: u8) -> Result<Accepted, TransportError>;
    fn receive_byte(&self, timeout: Duration) -> Result<u8, TransportError>;
    fn flush(&self, mode: FlushMode) -> Result<usize, TransportError>;
    fn switch_direction(&self, direction: Direction) -> Result<(), TransportError>;
}

/// Worker-thread handle to a channel.
///
/// Handles are cheap to clone. After the channel is torn down every call returns
/// `ChannelDown`.
pub struct Transport<H: HardwareLine> {
    core: Arc<ChannelCore<H>>,
}

impl<H: HardwareLine> Clone for Transport<H> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

impl<H: HardwareLine> std::fmt::Debug for Transport<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("channel", &self.core.id)
            .finish_non_exhaustive()
    }
}

impl<H: HardwareLine> Transport<H> {
    pub(crate) fn new(core: Arc<ChannelCore<H>>) -> Self {
        Self { core }
    }

    pub(crate) fn core(&self) -> &Arc<ChannelCore<H>> {
        &self.core
    }

    #[inline]
    fn open(&self) -> Result<&ChannelCore<H>, TransportError> {
        if self.core.is_closed() {
            Err(TransportError::ChannelDown(self.core.id))
        } else {
            Ok(&self.core)
        }
    }

    pub fn id(&self) -> ChannelId {
        self.core.id
    }

    pub fn protocol(&self) -> ProtocolTag {
        self.core.config.protocol
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.core.config
    }

    pub fn line_config(&self) -> LineConfig {
        self.core.config.line
    }

    pub fn direction(&self) -> Direction {
        self.core.arbiter.direction()
    }

    pub fn hardware(&self) -> &Arc<H> {
        &self.core.hw
    }

    /// Bytes waiting in the transmit FIFO (excluding the one shifting out).
    pub fn tx_pending(&self) -> usize {
        self.core.tx_task.len()
    }

    /// Received bytes not yet consumed.
    pub fn rx_available(&self) -> usize {
        self.core.rx_task.len()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.core.stats.snapshot()
    }

    pub fn health(&self) -> ChannelHealth {
        self.stats().health(self.core.config.stuck_threshold)
    }

    /// Send one byte with the channel's configured wait budget.
    pub fn send_byte(&self, byte: u8) -> Result<Accepted, TransportError> {
        self.send_byte_timeout(byte, self.core.config.tx_timeout)
    }

    /// Send one byte, waiting at most `wait` for transmit FIFO space.
    pub fn send_byte_timeout(&self, byte: u8, wait: Duration) -> Result<Accepted, TransportError> {
        let core = self.open()?;
        let hw = &*core.hw;

        // ====================================================================
        // Fast path: idle line, nothing queued → straight to the transmitter
        // ====================================================================
        if core.tx_task.is_empty() {
            if let Some(prev) = core.arbiter.try_acquire() {
                core.arbiter.begin(hw, prev, byte);
                core.stats.record_immediate();
                core.started(byte, true);
                return Ok(Accepted::Immediate);
            }
        }

        // ====================================================================
        // Slow path: queue behind the current transmission
        // ====================================================================
        if core.tx_task.push_timeout(byte, wait).is_err() {
            core.stats.record_queue_full();
            core.trace(BusEvent::QueueFull {
                channel: core.id,
                byte,
            });
            debug!("[{}] tx queue full, dropped {:#04x}", core.id, byte);
            return Err(TransportError::QueueFull);
        }
        core.stats.record_queued();

        // The line may have turned around between the check above and the push.
        if let Some(started) = core.arbiter.restart(
            hw,
            || !core.tx_task.is_empty(),
            || core.tx_task.try_pop(),
        ) {
            core.started(started, false);
        }
        Ok(Accepted::Queued)
    }

    /// Send a run of bytes in order, stopping at the first rejection.
    pub fn send_all(&self, bytes: &[u8]) -> Result<(), SendAllError> {
        for (accepted, &byte) in bytes.iter().enumerate() {
            if let Err(source) = self.send_byte(byte) {
                return Err(SendAllError { accepted, source });
            }
        }
        Ok(())
    }

    /// Block until the current burst has fully left the line, or `timeout` passes.
    pub fn wait_idle(&self, timeout: Duration) -> Result<(), TransportError> {
        let core = self.open()?;
        let deadline = deadline_after(timeout);
        loop {
            if !core.arbiter.is_busy() && core.tx_task.is_empty() {
                return Ok(());
            }
            if !core.idle.wait_until(deadline) {
                return if core.arbiter.is_busy() {
                    Err(TransportError::Timeout)
                } else {
                    Ok(())
                };
            }
        }
    }

    /// Wait up to `timeout` for the next received byte.
    pub fn receive_byte(&self, timeout: Duration) -> Result<u8, TransportError> {
        let core = self.open()?;
        match core.rx_task.pop_timeout(timeout) {
            Ok(byte) => Ok(byte),
            Err(WaitError::Timeout) => {
                core.stats.record_rx_timeout();
                core.trace(BusEvent::Timeout { channel: core.id });
                trace!("[{}] no byte within {:?}", core.id, timeout);
                Err(TransportError::Timeout)
            }
            Err(WaitError::Released) => Err(TransportError::Released),
        }
    }

    /// Fill `buf` from the receive FIFO, giving each byte up to `timeout`.
    pub fn receive_exact(&self, buf: &mut [u8], timeout: Duration) -> Result<(), TransportError> {
        for slot in buf.iter_mut() {
            *slot = self.receive_byte(timeout)?;
        }
        Ok(())
    }

    /// Discard unread received bytes. Returns how many were dropped.
    pub fn flush(&self, mode: FlushMode) -> Result<usize, TransportError> {
        let core = self.open()?;
        let discarded = core.rx_task.reset(mode);
        core.stats.record_flushed(discarded);
        core.trace(BusEvent::Flush {
            channel: core.id,
            discarded: discarded as u32,
            released: mode == FlushMode::Release,
        });
        Ok(discarded)
    }

    /// Force a bus turnaround outside the drain-triggered one, e.g. to hold the line in
    /// transmit across an inter-frame gap. Switching to receive mid-byte is `BusBusy`.
    pub fn switch_direction(&self, direction: Direction) -> Result<(), TransportError> {
        let core = self.open()?;
        let hw = &*core.hw;
        if core.arbiter.switch(hw, direction)? {
            debug!("[{}] direction forced to {:?}", core.id, direction);
        }
        // Bytes queued while the pin was being switched still need a driver.
        if let Some(started) = core.arbiter.restart(
            hw,
            || !core.tx_task.is_empty(),
            || core.tx_task.try_pop(),
        ) {
            core.started(started, false);
        }
        Ok(())
    }
}

impl<H: HardwareLine> BusLink for Transport<H> {
    fn protocol(&self) -> ProtocolTag {
        Transport::protocol(self)
    }

    fn send_byte(&self, byte: u8) -> Result<Accepted, TransportError> {
        Transport::send_byte(self, byte)
    }

    fn receive_byte(&self, timeout: Duration) -> Result<u8, TransportError> {
        Transport::receive_byte(self, timeout)
    }

    fn flush(&self, mode: FlushMode) -> Result<usize, TransportError> {
        Transport::flush(self, mode)
    }

    fn switch_direction(&self, direction: Direction) -> Result<(), TransportError> {
        Transport::switch_direction(self, direction)
    }
}
