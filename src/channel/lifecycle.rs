//! lifecycle.rs
//! Channel registry: bring-up, tear-down and reconfiguration of servo buses.
//!
//! The registry owns every live channel, keyed by `ChannelId`. Worker threads look up a
//! `Transport` handle and drop the registry entry guard immediately, so a blocking receive on
//! one channel never holds up lifecycle work on another.
//!
//! Precondition for `tear_down` / `reconfigure`: no transport call is in flight on that channel.
//! This is the caller's responsibility and is not checked at runtime; handles that survive a
//! tear-down only ever see `ChannelDown`.

use dashmap::{mapref::entry::Entry, DashMap};
use log::{info, warn};
use std::{sync::Arc, time::Duration};

use crate::{
    hw::HardwareLine,
    utils::{
        stats::{ChannelHealth, StatsSnapshot},
        trace::{BusEvent, BusTrace},
    },
};

use super::{
    core::ChannelCore, fifo::FlushMode, isr::IsrHandle, transport::Transport, Accepted,
    ChannelConfig, ChannelId, Direction, TransportError,
};

pub struct ChannelRegistry<H: HardwareLine> {
    channels: DashMap<ChannelId, Transport<H>>,
    trace: Option<Arc<BusTrace>>,
}

impl<H: HardwareLine> Default for ChannelRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: HardwareLine> ChannelRegistry<H> {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            trace: None,
        }
    }

    /// Registry whose channels record every transport event into `trace`.
    pub fn with_trace(trace: Arc<BusTrace>) -> Self {
        Self {
            channels: DashMap::new(),
            trace: Some(trace),
        }
    }

    pub fn trace(&self) -> Option<&Arc<BusTrace>> {
        self.trace.as_ref()
    }

    /// Program the line, allocate FIFOs, park the line in receive and arm interrupts.
    pub fn bring_up(
        &self,
        id: ChannelId,
        config: ChannelConfig,
        hw: Arc<H>,
    ) -> Result<Transport<H>, TransportError> {
        config.validate()?;
        if self.channels.contains_key(&id) {
            return Err(TransportError::AlreadyUp(id));
        }

        hw.configure(&config.line).inspect_err(|e| {
            warn!("[{}] bring-up failed: {}", id, e);
        })?;

        let baud = config.line.baud_rate;
        let core = Arc::new(ChannelCore::new(id, config, hw.clone(), self.trace.clone()));

        hw.set_completion_interrupt(false);
        hw.set_direction(Direction::Receive);
        if let Err(e) = hw.arm(IsrHandle::new(core.clone())) {
            warn!("[{}] could not arm interrupts: {}", id, e);
            core.mark_closed();
            return Err(e.into());
        }

        // No map lock is held while the line is programmed; another bring-up may have won.
        let slot = match self.channels.entry(id) {
            Entry::Occupied(_) => {
                warn!("[{}] brought up concurrently, backing out", id);
                core.mark_closed();
                hw.disarm();
                return Err(TransportError::AlreadyUp(id));
            }
            Entry::Vacant(slot) => slot,
        };

        core.trace(BusEvent::BringUp { channel: id, baud });
        info!(
            "[{}] up: {} baud, {:?}, tx fifo {}, rx fifo {}",
            id,
            baud,
            core.config.protocol,
            core.config.tx_capacity,
            core.config.rx_capacity
        );

        let transport = Transport::new(core);
        slot.insert(transport.clone());
        Ok(transport)
    }

    /// Disable interrupts, park the line in receive and release the FIFOs.
    /// Returns the hardware so it can be brought up again.
    pub fn tear_down(&self, id: ChannelId) -> Result<Arc<H>, TransportError> {
        let (_, transport) = self
            .channels
            .remove(&id)
            .ok_or(TransportError::ChannelDown(id))?;
        let core = transport.core();

        core.mark_closed();
        core.hw.set_completion_interrupt(false);
        core.hw.disarm();
        core.hw.set_direction(Direction::Receive);
        // Anyone still parked on the receive FIFO breaks the precondition; do not leave them hanging.
        core.rx_task.reset(FlushMode::Release);
        core.trace(BusEvent::TearDown { channel: id });

        let stats = core.stats.snapshot();
        info!(
            "[{}] down: tx_bytes={} rx_bytes={} rx_overflow={} queue_full={}",
            id, stats.tx_bytes, stats.rx_bytes, stats.rx_overflow, stats.tx_queue_full
        );
        Ok(core.hw.clone())
    }

    /// Full tear-down followed by bring-up with `config` on the same hardware.
    /// On failure the channel stays down.
    pub fn reconfigure(
        &self,
        id: ChannelId,
        config: ChannelConfig,
    ) -> Result<Transport<H>, TransportError> {
        let hw = self.tear_down(id)?;
        info!("[{}] reconfiguring to {} baud", id, config.line.baud_rate);
        self.bring_up(id, config, hw)
    }

    /// Bring both servo buses up with their boot configuration.
    pub fn bring_up_defaults(&self, ch1: Arc<H>, ch2: Arc<H>) -> Result<(), TransportError> {
        self.bring_up(ChannelId::Ch1, ChannelConfig::default_for(ChannelId::Ch1), ch1)?;
        self.bring_up(ChannelId::Ch2, ChannelConfig::default_for(ChannelId::Ch2), ch2)?;
        Ok(())
    }

    /// Tear down every live channel.
    pub fn shutdown(&self) {
        for id in ChannelId::ALL {
            if self.is_up(id) {
                if let Err(e) = self.tear_down(id) {
                    warn!("[{}] shutdown: {}", id, e);
                }
            }
        }
    }

    pub fn is_up(&self, id: ChannelId) -> bool {
        self.channels.contains_key(&id)
    }

    pub fn transport(&self, id: ChannelId) -> Result<Transport<H>, TransportError> {
        self.channels
            .get(&id)
            .map(|t| t.value().clone())
            .ok_or(TransportError::ChannelDown(id))
    }

    pub fn config(&self, id: ChannelId) -> Result<ChannelConfig, TransportError> {
        Ok(self.transport(id)?.config().clone())
    }

    /// Stats and health of every live channel, in id order.
    pub fn snapshot(&self) -> Vec<(ChannelId, StatsSnapshot, ChannelHealth)> {
        ChannelId::ALL
            .iter()
            .filter_map(|&id| self.transport(id).ok())
            .map(|t| (t.id(), t.stats(), t.health()))
            .collect()
    }

    // ========================================================================
    // Boundary calls by channel id
    // ========================================================================

    pub fn send_byte(&self, id: ChannelId, byte: u8) -> Result<Accepted, TransportError> {
        self.transport(id)?.send_byte(byte)
    }

    pub fn receive_byte(&self, id: ChannelId, timeout: Duration) -> Result<u8, TransportError> {
        self.transport(id)?.receive_byte(timeout)
    }

    pub fn flush(&self, id: ChannelId, mode: FlushMode) -> Result<usize, TransportError> {
        self.transport(id)?.flush(mode)
    }

    pub fn switch_direction(
        &self,
        id: ChannelId,
        direction: Direction,
    ) -> Result<(), TransportError> {
        self.transport(id)?.switch_direction(direction)
    }
}

impl<H: HardwareLine> Drop for ChannelRegistry<H> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
