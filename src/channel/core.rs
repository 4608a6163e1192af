//! Channel state shared by the worker-side `Transport` and the interrupt-side `IsrHandle`.
//!
//! Each FIFO is stored as its two ends. The transport only ever touches the `TaskEnd`s and the
//! interrupt handler only the `IsrEnd`s; the fields stay private to the `channel` module.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::{
    hw::HardwareLine,
    utils::{
        stats::ChannelStats,
        trace::{BusEvent, BusTrace},
    },
};

use super::{
    arbiter::Arbiter,
    fifo::{self, Doorbell, IsrEnd, TaskEnd},
    ChannelConfig, ChannelId,
};

pub(crate) struct ChannelCore<H: HardwareLine> {
    pub(crate) id: ChannelId,
    pub(crate) config: ChannelConfig,
    pub(crate) hw: Arc<H>,
    pub(crate) arbiter: Arbiter,
    pub(crate) tx_isr: IsrEnd,
    pub(crate) tx_task: TaskEnd,
    pub(crate) rx_isr: IsrEnd,
    pub(crate) rx_task: TaskEnd,
    /// Rung by the interrupt handler each time the line turns back to receive.
    pub(crate) idle: Doorbell,
    pub(crate) stats: ChannelStats,
    trace: Option<Arc<BusTrace>>,
    closed: AtomicBool,
}

impl<H: HardwareLine> ChannelCore<H> {
    /// `config` must already be validated (non-zero capacities).
    pub(crate) fn new(
        id: ChannelId,
        config: ChannelConfig,
        hw: Arc<H>,
        trace: Option<Arc<BusTrace>>,
    ) -> Self {
        let (tx_isr, tx_task) = fifo::bounded(config.tx_capacity);
        let (rx_isr, rx_task) = fifo::bounded(config.rx_capacity);
        Self {
            id,
            config,
            hw,
            arbiter: Arbiter::new(),
            tx_isr,
            tx_task,
            rx_isr,
            rx_task,
            idle: Doorbell::new(),
            stats: ChannelStats::new(),
            trace,
            closed: AtomicBool::new(false),
        }
    }

    #[inline]
    pub(crate) fn trace(&self, event: BusEvent) {
        if let Some(t) = &self.trace {
            t.record(event);
        }
    }

    #[inline]
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Bookkeeping for the first byte of a burst.
    #[inline]
    pub(crate) fn started(&self, byte: u8, immediate: bool) {
        self.stats.record_tx_byte();
        self.trace(BusEvent::TxStart {
            channel: self.id,
            byte,
            immediate,
        });
    }
}
