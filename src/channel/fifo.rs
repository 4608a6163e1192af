//! fifo.rs
//! Bounded byte FIFO shared between interrupt context and worker threads.
//!
//! - Storage is a fixed-capacity lock-free `ArrayQueue<u8>`; capacity never changes.
//! - `bounded()` splits the FIFO into two ends with disjoint disciplines:
//!   - `IsrEnd`: non-blocking, allocation-free operations only (interrupt context).
//!   - `TaskEnd`: blocking operations bounded by a caller deadline (worker threads).
//! - Wake-ups go through single-slot doorbells rung with `try_send`, so a producer in interrupt
//!   context never waits on a consumer.

use crossbeam::channel::{bounded as channel_bounded, select, Receiver, Sender};
use crossbeam_queue::ArrayQueue;
use parking_lot::Mutex;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

/// Receive-side flush discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum FlushMode {
    /// Discard queued bytes; threads blocked on the FIFO keep waiting.
    Retain,
    /// Discard queued bytes and release every thread currently blocked on the FIFO.
    Release,
}

/// Deadline `timeout` from now. `None` when it lies past what `Instant` can represent, which
/// callers treat as no deadline at all.
#[inline]
pub(crate) fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitError {
    Timeout,
    Released,
}

/// Single-slot wake-up signal. Ringing never blocks; a pending ring is never lost.
pub(crate) struct Doorbell {
    tx: Sender<()>,
    rx: Receiver<()>,
}

impl Doorbell {
    pub(crate) fn new() -> Self {
        let (tx, rx) = channel_bounded(1);
        Self { tx, rx }
    }

    #[inline]
    pub(crate) fn ring(&self) {
        // Full means a ring is already pending.
        let _ = self.tx.try_send(());
    }

    /// Wait for a ring until `deadline`, or indefinitely when there is none. Returns false on
    /// timeout.
    #[inline]
    pub(crate) fn wait_until(&self, deadline: Option<Instant>) -> bool {
        match deadline {
            Some(deadline) => self.rx.recv_deadline(deadline).is_ok(),
            None => self.rx.recv().is_ok(),
        }
    }

    fn receiver(&self) -> &Receiver<()> {
        &self.rx
    }
}

/// Dropping the sender disconnects every cloned receiver at once; that is the broadcast
/// used to release blocked readers.
struct ReleaseLatch {
    _tx: Sender<()>,
    rx: Receiver<()>,
}

impl ReleaseLatch {
    fn new() -> Self {
        let (tx, rx) = channel_bounded(1);
        Self { _tx: tx, rx }
    }
}

struct Shared {
    queue: ArrayQueue<u8>,
    data: Doorbell,
    space: Doorbell,
    release: Mutex<ReleaseLatch>,
}

impl Shared {
    #[inline]
    fn pop_and_signal(&self) -> Option<u8> {
        let byte = self.queue.pop()?;
        self.space.ring();
        Some(byte)
    }
}

/// Interrupt-context end of a FIFO.
pub struct IsrEnd {
    shared: Arc<Shared>,
}

/// Worker-thread end of a FIFO.
pub struct TaskEnd {
    shared: Arc<Shared>,
}

/// Create a FIFO of `capacity` bytes. Panics if `capacity` is zero.
pub fn bounded(capacity: usize) -> (IsrEnd, TaskEnd) {
    let shared = Arc::new(Shared {
        queue: ArrayQueue::new(capacity),
        data: Doorbell::new(),
        space: Doorbell::new(),
        release: Mutex::new(ReleaseLatch::new()),
    });
    (
        IsrEnd {
            shared: shared.clone(),
        },
        TaskEnd { shared },
    )
}

impl IsrEnd {
    /// Enqueue without waiting. Gives the byte back if the FIFO is full.
    #[inline]
    pub fn try_push(&self, byte: u8) -> Result<(), u8> {
        self.shared.queue.push(byte)?;
        self.shared.data.ring();
        Ok(())
    }

    /// Enqueue, evicting the oldest byte when full. Returns the evicted byte.
    #[inline]
    pub fn force_push(&self, byte: u8) -> Option<u8> {
        let evicted = self.shared.queue.force_push(byte);
        self.shared.data.ring();
        evicted
    }

    #[inline]
    pub fn try_pop(&self) -> Option<u8> {
        self.shared.pop_and_signal()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.shared.queue.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.shared.queue.len()
    }
}

impl TaskEnd {
    pub fn capacity(&self) -> usize {
        self.shared.queue.capacity()
    }

    pub fn len(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.queue.is_empty()
    }

    pub fn try_pop(&self) -> Option<u8> {
        self.shared.pop_and_signal()
    }

    /// Enqueue, waiting up to `timeout` for space. A zero timeout never blocks.
    /// Gives the byte back if the FIFO stayed full.
    pub fn push_timeout(&self, byte: u8, timeout: Duration) -> Result<(), u8> {
        let mut deadline = None;
        let mut byte = byte;
        loop {
            match self.shared.queue.push(byte) {
                Ok(()) => {
                    self.shared.data.ring();
                    // pass the baton to any other blocked producer
                    if !self.shared.queue.is_full() {
                        self.shared.space.ring();
                    }
                    return Ok(());
                }
                Err(b) => byte = b,
            }
            if timeout.is_zero() {
                return Err(byte);
            }
            let until = *deadline.get_or_insert_with(|| deadline_after(timeout));
            if !self.shared.space.wait_until(until) {
                return Err(byte);
            }
        }
    }

    /// Dequeue, waiting up to `timeout` for a byte. Timing out consumes nothing.
    pub(crate) fn pop_timeout(&self, timeout: Duration) -> Result<u8, WaitError> {
        if let Some(byte) = self.pop_ready() {
            return Ok(byte);
        }
        let deadline = deadline_after(timeout);
        let released = self.shared.release.lock().rx.clone();
        loop {
            if let Some(byte) = self.pop_ready() {
                return Ok(byte);
            }
            match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(WaitError::Timeout);
                    }
                    select! {
                        recv(self.shared.data.receiver()) -> _ => {}
                        recv(released) -> _ => return Err(WaitError::Released),
                        default(remaining) => return Err(WaitError::Timeout),
                    }
                }
                None => {
                    select! {
                        recv(self.shared.data.receiver()) -> _ => {}
                        recv(released) -> _ => return Err(WaitError::Released),
                    }
                }
            }
        }
    }

    #[inline]
    fn pop_ready(&self) -> Option<u8> {
        let byte = self.shared.pop_and_signal()?;
        if !self.shared.queue.is_empty() {
            self.shared.data.ring();
        }
        Some(byte)
    }

    /// Discard the bytes queued at the moment of the call. Bytes pushed concurrently by the
    /// interrupt handler after that point survive. Returns how many bytes were discarded.
    pub fn reset(&self, mode: FlushMode) -> usize {
        let pending = self.shared.queue.len();
        let mut discarded = 0;
        for _ in 0..pending {
            if self.shared.queue.pop().is_none() {
                break;
            }
            discarded += 1;
        }
        if discarded > 0 {
            self.shared.space.ring();
        }
        if mode == FlushMode::Release {
            *self.shared.release.lock() = ReleaseLatch::new();
        }
        discarded
    }
}
