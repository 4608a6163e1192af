//! arbiter.rs
//! Bus arbitration for one half-duplex line.
//!
//! The line is owned by exactly one party at a time. Ownership is a single atomic state word
//! moved with compare-and-swap; whoever wins `Busy` is the only party allowed to pop the
//! transmit FIFO and drive the transmitter until it hands the line back.
//!
//! States:
//! - `Receive`: idle, listening.
//! - `Held`: direction forced to transmit by the protocol, nothing shifting.
//! - `Busy`: a byte is shifting out; the interrupt handler drains the queue.
//! - `Switching`: short exclusive window while the direction pin is being flipped on the
//!   protocol's request.

use std::sync::atomic::{AtomicU8, Ordering};

use crate::hw::HardwareLine;

use super::{Direction, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum LineState {
    Receive = 0,
    Held = 1,
    Busy = 2,
    Switching = 3,
}

impl LineState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => LineState::Receive,
            1 => LineState::Held,
            2 => LineState::Busy,
            _ => LineState::Switching,
        }
    }
}

pub(crate) struct Arbiter {
    state: AtomicU8,
}

impl Arbiter {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(LineState::Receive as u8),
        }
    }

    #[inline]
    pub(crate) fn state(&self) -> LineState {
        LineState::from_raw(self.state.load(Ordering::SeqCst))
    }

    #[inline]
    pub(crate) fn direction(&self) -> Direction {
        match self.state() {
            LineState::Receive => Direction::Receive,
            LineState::Held | LineState::Busy | LineState::Switching => Direction::Transmit,
        }
    }

    #[inline]
    pub(crate) fn is_busy(&self) -> bool {
        matches!(self.state(), LineState::Busy | LineState::Switching)
    }

    #[inline]
    fn transition(&self, from: LineState, to: LineState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Take the line if it is idle. Returns the state it was taken from.
    pub(crate) fn try_acquire(&self) -> Option<LineState> {
        if self.transition(LineState::Receive, LineState::Busy) {
            return Some(LineState::Receive);
        }
        if self.transition(LineState::Held, LineState::Busy) {
            return Some(LineState::Held);
        }
        None
    }

    /// Give an acquired line back untouched.
    pub(crate) fn restore(&self, prev: LineState) {
        self.state.store(prev as u8, Ordering::SeqCst);
    }

    /// Start shifting `byte` out on a line acquired from `prev`.
    pub(crate) fn begin<H: HardwareLine>(&self, hw: &H, prev: LineState, byte: u8) {
        debug_assert_eq!(self.state(), LineState::Busy);
        if prev == LineState::Receive {
            hw.set_direction(Direction::Transmit);
        }
        hw.set_completion_interrupt(true);
        hw.transmit(byte);
    }

    /// Relinquish the bus after the last queued byte. Interrupt context only.
    pub(crate) fn turnaround<H: HardwareLine>(&self, hw: &H) {
        hw.set_completion_interrupt(false);
        hw.set_direction(Direction::Receive);
        self.state.store(LineState::Receive as u8, Ordering::SeqCst);
    }

    /// Restart the drain if bytes are pending and nobody owns the line.
    ///
    /// Covers the window where a producer enqueues just after the owner found the FIFO empty.
    /// Returns the byte that was started, if any.
    pub(crate) fn restart<H: HardwareLine>(
        &self,
        hw: &H,
        mut pending: impl FnMut() -> bool,
        mut pop: impl FnMut() -> Option<u8>,
    ) -> Option<u8> {
        while pending() {
            // Someone else owns the line and will drain it.
            let prev = self.try_acquire()?;
            match pop() {
                Some(byte) => {
                    self.begin(hw, prev, byte);
                    return Some(byte);
                }
                None => self.restore(prev),
            }
        }
        None
    }

    /// Protocol-requested turnaround. Returns whether the line actually changed direction.
    pub(crate) fn switch<H: HardwareLine>(
        &self,
        hw: &H,
        direction: Direction,
    ) -> Result<bool, TransportError> {
        loop {
            match (direction, self.state()) {
                (Direction::Transmit, LineState::Receive) => {
                    if self.transition(LineState::Receive, LineState::Switching) {
                        hw.set_direction(Direction::Transmit);
                        self.state.store(LineState::Held as u8, Ordering::SeqCst);
                        return Ok(true);
                    }
                }
                (Direction::Transmit, LineState::Held | LineState::Busy) => return Ok(false),
                (Direction::Receive, LineState::Receive) => return Ok(false),
                (Direction::Receive, LineState::Held) => {
                    if self.transition(LineState::Held, LineState::Switching) {
                        hw.set_direction(Direction::Receive);
                        self.state.store(LineState::Receive as u8, Ordering::SeqCst);
                        return Ok(true);
                    }
                }
                (Direction::Receive, LineState::Busy) => return Err(TransportError::BusBusy),
                (_, LineState::Switching) => std::hint::spin_loop(),
            }
        }
    }
}
