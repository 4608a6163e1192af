//! Hardware capability consumed by the transport core.
//!
//! The core never touches registers. Everything it needs from the platform goes through
//! [`HardwareLine`]: program line parameters, register the interrupt handler, shift one byte
//! out, flip the direction-control line, and gate the transmit-complete interrupt.
//!
//! Two implementations ship with the crate:
//! - [`mock::MockLine`] records every call and lets tests fire interrupts by hand.
//! - [`sim::SimulatedLine`] runs a priority dispatch thread that times bytes at the configured
//!   baud rate and can host a simulated actuator on the far end.

pub mod mock;
pub mod sim;

use thiserror::Error;

use crate::channel::{Direction, IsrHandle, LineConfig};

pub use mock::{HwCall, MockLine};
pub use sim::{Responder, SimulatedLine};

/// Interrupt sources raised per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqEvent {
    /// A byte was shifted in; the data register holds it.
    ByteReceived(u8),
    /// The last byte handed to the transmitter finished shifting out.
    TransmitComplete,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HardwareError {
    #[error("baud rate {0} not supported by the line")]
    UnsupportedBaud(u32),
    #[error("hardware resource unavailable: {0}")]
    Unavailable(&'static str),
}

/// Platform primitives for one physical half-duplex line.
///
/// `transmit`, `set_direction` and `set_completion_interrupt` are called from interrupt context
/// and must not block.
pub trait HardwareLine: Send + Sync + Sized + 'static {
    /// Program baud rate, word length, parity and stop bits.
    fn configure(&self, line: &LineConfig) -> Result<(), HardwareError>;

    /// Register `isr` as this line's interrupt handler and enable the receive interrupt.
    fn arm(&self, isr: IsrHandle<Self>) -> Result<(), HardwareError>;

    /// Disable all interrupts of the line and drop the registered handler.
    fn disarm(&self);

    /// Load one byte into the transmit data register.
    fn transmit(&self, byte: u8);

    /// Drive the direction-control line.
    fn set_direction(&self, direction: Direction);

    /// Gate the transmit-complete interrupt.
    fn set_completion_interrupt(&self, enabled: bool);
}
