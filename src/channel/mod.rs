//! Servo bus channel: state, arbitration, transmit/receive paths, interrupt handler, lifecycle.
//!
//! Worker threads talk to a channel through [`Transport`]; the hardware calls into it through
//! [`IsrHandle`]. The two handles share one channel core but reach disjoint FIFO ends, so the
//! interrupt side can only use non-blocking operations.

mod arbiter;
pub mod config;
mod core;
mod error;
pub mod fifo;
pub mod isr;
pub mod lifecycle;
pub mod scan;
pub mod transport;

pub use config::{
    ChannelConfig, ChannelId, Direction, LineConfig, OverflowPolicy, Parity, ProtocolTag,
    StopBits, WordLength, STANDARD_BAUD_RATES,
};
pub use error::{SendAllError, TransportError};
pub use fifo::FlushMode;
pub use isr::IsrHandle;
pub use lifecycle::ChannelRegistry;
pub use scan::scan_baud_rates;
pub use transport::{Accepted, BusLink, Transport};
