//! # Servo bus transport
//!
//! Half-duplex, interrupt-driven serial transport for daisy-chained smart actuators.
//!
//! A worker thread pushes protocol bytes out through a [`channel::Transport`]; the bus
//! arbitrator either starts the transmitter right away (idle line) or queues the byte for the
//! interrupt handler, which drains the queue byte by byte and turns the line back around to
//! receive once it is empty. Received bytes flow the other way, from interrupt context into a
//! bounded FIFO that the worker reads with a protocol-driven timeout.
//!
//! ## Layout
//! - [`channel`]: channel state, FIFOs, arbitrator, transmit/receive paths, interrupt handler,
//!   lifecycle registry and baud scan.
//! - [`hw`]: the `HardwareLine` capability plus a recording mock and a timed simulation.
//! - [`utils`]: per-channel statistics, bus trace recorder, CSV export.

pub mod channel;
pub mod hw;
pub mod utils;

pub use channel::{
    Accepted, BusLink, ChannelConfig, ChannelId, ChannelRegistry, Direction, FlushMode,
    IsrHandle, LineConfig, OverflowPolicy, Parity, ProtocolTag, SendAllError, StopBits,
    Transport, TransportError, WordLength,
};
pub use hw::{HardwareError, HardwareLine, HwCall, IrqEvent, MockLine, Responder, SimulatedLine};
