//! stats.rs
//! Per-channel transport counters.
//!
//! Updated from both interrupt context and worker threads, so every counter is a relaxed
//! `AtomicU64`: contention-free, no ordering between counters. `snapshot()` gives a
//! serializable copy for logging and CSV export.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Channel health as surfaced to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChannelHealth {
    Healthy,
    /// Bytes were lost (receive overflow) or the transmit queue saturated at least once.
    Degraded,
    /// The transmit queue kept rejecting bytes; the bus is likely stuck.
    Stuck,
}

#[derive(Debug, Default)]
pub struct ChannelStats {
    tx_immediate: AtomicU64,
    tx_queued: AtomicU64,
    tx_bytes: AtomicU64,
    tx_queue_full: AtomicU64,
    consecutive_queue_full: AtomicU64,
    turnarounds: AtomicU64,
    rx_bytes: AtomicU64,
    rx_overflow: AtomicU64,
    rx_echo_discarded: AtomicU64,
    rx_timeouts: AtomicU64,
    rx_flushed: AtomicU64,
    spurious_completions: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub tx_immediate: u64,
    pub tx_queued: u64,
    pub tx_bytes: u64,
    pub tx_queue_full: u64,
    pub consecutive_queue_full: u64,
    pub turnarounds: u64,
    pub rx_bytes: u64,
    pub rx_overflow: u64,
    pub rx_echo_discarded: u64,
    pub rx_timeouts: u64,
    pub rx_flushed: u64,
    pub spurious_completions: u64,
}

impl ChannelStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_immediate(&self) {
        self.tx_immediate.fetch_add(1, Ordering::Relaxed);
        self.consecutive_queue_full.store(0, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_queued(&self) {
        self.tx_queued.fetch_add(1, Ordering::Relaxed);
        self.consecutive_queue_full.store(0, Ordering::Relaxed);
    }

    /// One byte handed to the transmitter.
    #[inline]
    pub fn record_tx_byte(&self) {
        self.tx_bytes.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_queue_full(&self) {
        self.tx_queue_full.fetch_add(1, Ordering::Relaxed);
        self.consecutive_queue_full.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_turnaround(&self) {
        self.turnarounds.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_rx_byte(&self) {
        self.rx_bytes.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_rx_overflow(&self) {
        self.rx_overflow.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_echo_discarded(&self) {
        self.rx_echo_discarded.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_rx_timeout(&self) {
        self.rx_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_flushed(&self, discarded: usize) {
        self.rx_flushed.fetch_add(discarded as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_spurious_completion(&self) {
        self.spurious_completions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            tx_immediate: self.tx_immediate.load(Ordering::Relaxed),
            tx_queued: self.tx_queued.load(Ordering::Relaxed),
            tx_bytes: self.tx_bytes.load(Ordering::Relaxed),
            tx_queue_full: self.tx_queue_full.load(Ordering::Relaxed),
            consecutive_queue_full: self.consecutive_queue_full.load(Ordering::Relaxed),
            turnarounds: self.turnarounds.load(Ordering::Relaxed),
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
            rx_overflow: self.rx_overflow.load(Ordering::Relaxed),
            rx_echo_discarded: self.rx_echo_discarded.load(Ordering::Relaxed),
            rx_timeouts: self.rx_timeouts.load(Ordering::Relaxed),
            rx_flushed: self.rx_flushed.load(Ordering::Relaxed),
            spurious_completions: self.spurious_completions.load(Ordering::Relaxed),
        }
    }
}

impl StatsSnapshot {
    pub fn health(&self, stuck_threshold: u64) -> ChannelHealth {
        if stuck_threshold > 0 && self.consecutive_queue_full >= stuck_threshold {
            ChannelHealth::Stuck
        } else if self.rx_overflow > 0 || self.tx_queue_full > 0 {
            ChannelHealth::Degraded
        } else {
            ChannelHealth::Healthy
        }
    }
}
