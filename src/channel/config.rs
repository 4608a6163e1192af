//! config.rs
//! Per-channel line parameters and buffering configuration.
//!
//! - `LineConfig` is what the UART gets programmed with at bring-up.
//! - `ChannelConfig` adds FIFO sizing, wait budgets and the protocol tag riding the bus.
//! - Defaults match the robot's two servo buses: 57600 baud, 8N1, protocol V2 on channel 1 and
//!   protocol V1 on channel 2.

use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};

use super::TransportError;

pub const DEFAULT_BAUD_RATE: u32 = 57_600;
pub const DEFAULT_TX_CAPACITY: usize = 64;
pub const DEFAULT_RX_CAPACITY: usize = 64;
pub const DEFAULT_TX_TIMEOUT: Duration = Duration::from_millis(5);
pub const DEFAULT_STUCK_THRESHOLD: u64 = 8;

/// Added on top of an actuator's configured return delay when waiting for its reply.
pub const RX_SAFETY_MARGIN: Duration = Duration::from_millis(1);

/// Rates tried by the baud scan, slowest first.
pub const STANDARD_BAUD_RATES: &[u32] = &[
    9_600, 19_200, 57_600, 115_200, 200_000, 250_000, 400_000, 500_000, 1_000_000, 2_000_000,
    3_000_000,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChannelId {
    Ch1,
    Ch2,
}

impl ChannelId {
    pub const ALL: [ChannelId; 2] = [ChannelId::Ch1, ChannelId::Ch2];

    pub fn index(self) -> usize {
        match self {
            ChannelId::Ch1 => 0,
            ChannelId::Ch2 => 1,
        }
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelId::Ch1 => f.write_str("ch1"),
            ChannelId::Ch2 => f.write_str("ch2"),
        }
    }
}

/// Bus direction as seen by the outside world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Transmit,
    Receive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WordLength {
    Eight,
    Nine,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Parity {
    None,
    Even,
    Odd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopBits {
    One,
    Two,
}

/// Actuator protocol variant carried by a channel. The transport only passes it through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolTag {
    V1,
    V2,
}

/// What the interrupt handler does with a received byte when the receive FIFO is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverflowPolicy {
    /// Keep what is queued, lose the incoming byte.
    DropNewest,
    /// Evict the oldest queued byte to make room.
    DropOldest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineConfig {
    pub baud_rate: u32,
    pub word_length: WordLength,
    pub parity: Parity,
    pub stop_bits: StopBits,
}

impl Default for LineConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            word_length: WordLength::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
        }
    }
}

impl LineConfig {
    pub fn with_baud(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            ..Self::default()
        }
    }

    /// Bits on the wire per character: start + data + parity + stop.
    pub fn frame_bits(&self) -> u32 {
        let data = match self.word_length {
            WordLength::Eight => 8,
            WordLength::Nine => 9,
        };
        let parity = match self.parity {
            Parity::None => 0,
            Parity::Even | Parity::Odd => 1,
        };
        let stop = match self.stop_bits {
            StopBits::One => 1,
            StopBits::Two => 2,
        };
        1 + data + parity + stop
    }

    /// Time one character occupies the line.
    pub fn frame_time(&self) -> Duration {
        if self.baud_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(u64::from(self.frame_bits()) * 1_000_000_000 / u64::from(self.baud_rate))
    }

    /// Receive timeout for an actuator with the given return delay.
    pub fn reply_timeout(&self, return_delay: Duration) -> Duration {
        return_delay + self.frame_time() + RX_SAFETY_MARGIN
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub line: LineConfig,
    pub protocol: ProtocolTag,
    pub tx_capacity: usize,
    pub rx_capacity: usize,
    /// How long `send_byte` may wait for transmit FIFO space.
    pub tx_timeout: Duration,
    pub rx_overflow: OverflowPolicy,
    /// Consecutive `QueueFull` rejections before the channel reports itself stuck.
    pub stuck_threshold: u64,
}

impl ChannelConfig {
    pub fn new(line: LineConfig, protocol: ProtocolTag) -> Self {
        Self {
            line,
            protocol,
            tx_capacity: DEFAULT_TX_CAPACITY,
            rx_capacity: DEFAULT_RX_CAPACITY,
            tx_timeout: DEFAULT_TX_TIMEOUT,
            rx_overflow: OverflowPolicy::DropNewest,
            stuck_threshold: DEFAULT_STUCK_THRESHOLD,
        }
    }

    /// Boot configuration of each servo bus.
    pub fn default_for(id: ChannelId) -> Self {
        match id {
            ChannelId::Ch1 => Self::new(LineConfig::default(), ProtocolTag::V2),
            ChannelId::Ch2 => Self::new(LineConfig::default(), ProtocolTag::V1),
        }
    }

    pub fn with_capacities(mut self, tx_capacity: usize, rx_capacity: usize) -> Self {
        self.tx_capacity = tx_capacity;
        self.rx_capacity = rx_capacity;
        self
    }

    pub fn with_tx_timeout(mut self, tx_timeout: Duration) -> Self {
        self.tx_timeout = tx_timeout;
        self
    }

    pub fn with_overflow(mut self, policy: OverflowPolicy) -> Self {
        self.rx_overflow = policy;
        self
    }

    pub fn with_line(mut self, line: LineConfig) -> Self {
        self.line = line;
        self
    }

    pub fn with_stuck_threshold(mut self, threshold: u64) -> Self {
        self.stuck_threshold = threshold;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), TransportError> {
        if self.tx_capacity == 0 || self.rx_capacity == 0 {
            return Err(TransportError::InvalidConfig("fifo capacity must be non-zero"));
        }
        if self.line.baud_rate == 0 {
            return Err(TransportError::InvalidConfig("baud rate must be non-zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_time_8n1_at_57600() {
        let line = LineConfig::default();
        assert_eq!(line.frame_bits(), 10);
        // 10 bits at 57600 baud ~ 173.6 us
        let us = line.frame_time().as_micros();
        assert!((173..=174).contains(&us), "got {us}us");
    }

    #[test]
    fn parity_and_two_stop_bits_lengthen_frame() {
        let line = LineConfig {
            baud_rate: 1_000_000,
            word_length: WordLength::Nine,
            parity: Parity::Even,
            stop_bits: StopBits::Two,
        };
        assert_eq!(line.frame_bits(), 13);
        assert_eq!(line.frame_time(), Duration::from_nanos(13_000));
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let cfg = ChannelConfig::default_for(ChannelId::Ch1).with_capacities(0, 8);
        assert!(matches!(cfg.validate(), Err(TransportError::InvalidConfig(_))));
    }

    #[test]
    fn defaults_follow_the_board() {
        assert_eq!(ChannelConfig::default_for(ChannelId::Ch1).protocol, ProtocolTag::V2);
        assert_eq!(ChannelConfig::default_for(ChannelId::Ch2).protocol, ProtocolTag::V1);
        assert_eq!(ChannelConfig::default_for(ChannelId::Ch2).line.baud_rate, 57_600);
    }
}
