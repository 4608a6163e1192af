use thiserror::Error;

use crate::hw::HardwareError;

use super::ChannelId;

/// Failures returned to worker threads. Nothing here ever crosses into interrupt context.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Transmit FIFO still full after the caller's wait budget.
    #[error("transmit queue full")]
    QueueFull,
    /// The line is shifting a byte out and cannot change direction.
    #[error("bus busy")]
    BusBusy,
    /// Nothing arrived within the wait budget. Normal when a device is absent.
    #[error("receive timed out")]
    Timeout,
    /// A releasing flush woke this receiver before a byte arrived.
    #[error("receive released by flush")]
    Released,
    #[error("channel {0} is not up")]
    ChannelDown(ChannelId),
    #[error("channel {0} is already up")]
    AlreadyUp(ChannelId),
    #[error("invalid channel configuration: {0}")]
    InvalidConfig(&'static str),
    #[error("hardware configuration failed: {0}")]
    Configuration(#[from] HardwareError),
}

/// `send_all` stopped early. The first `accepted` bytes are already on their way.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{source} after {accepted} accepted bytes")]
pub struct SendAllError {
    pub accepted: usize,
    #[source]
    pub source: TransportError,
}
