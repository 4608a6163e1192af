//! Bus trace: non-blocking event recording with background CSV export.
//!
//! - `BusTrace::record()` pushes into a lock-free bounded queue and returns immediately, so the
//!   interrupt handler can trace without blocking or allocating. A full queue drops the event
//!   and bumps `dropped()`.
//! - `BusTrace::start_exporter()` spawns a thread draining the queue into a CSV file
//!   (one event per row, nanosecond timestamps relative to trace creation).
//!
//! Event tracing captures: bring-up → tx start → tx bytes → turnaround → rx bytes → tear-down.

use crossbeam_queue::ArrayQueue;
use csv::Writer;
use log::{debug, error};
use serde::Serialize;
use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crate::channel::ChannelId;

const TRACE_CAPACITY: usize = 16_384;
const EXPORT_POLL_MS: u64 = 10;
const FLUSH_BATCHES: usize = 8;

/// Transport events. All variants are `Copy` so recording never allocates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusEvent {
    BringUp { channel: ChannelId, baud: u32 },
    TearDown { channel: ChannelId },
    /// First byte of a burst handed to the transmitter.
    TxStart { channel: ChannelId, byte: u8, immediate: bool },
    /// Follow-up byte loaded by the completion interrupt.
    TxByte { channel: ChannelId, byte: u8 },
    Turnaround { channel: ChannelId },
    RxByte { channel: ChannelId, byte: u8 },
    RxOverflow { channel: ChannelId, byte: u8 },
    EchoDiscarded { channel: ChannelId, byte: u8 },
    QueueFull { channel: ChannelId, byte: u8 },
    Timeout { channel: ChannelId },
    Flush { channel: ChannelId, discarded: u32, released: bool },
}

impl BusEvent {
    pub fn channel(&self) -> ChannelId {
        match *self {
            BusEvent::BringUp { channel, .. }
            | BusEvent::TearDown { channel }
            | BusEvent::TxStart { channel, .. }
            | BusEvent::TxByte { channel, .. }
            | BusEvent::Turnaround { channel }
            | BusEvent::RxByte { channel, .. }
            | BusEvent::RxOverflow { channel, .. }
            | BusEvent::EchoDiscarded { channel, .. }
            | BusEvent::QueueFull { channel, .. }
            | BusEvent::Timeout { channel }
            | BusEvent::Flush { channel, .. } => channel,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            BusEvent::BringUp { .. } => "bring_up",
            BusEvent::TearDown { .. } => "tear_down",
            BusEvent::TxStart { .. } => "tx_start",
            BusEvent::TxByte { .. } => "tx_byte",
            BusEvent::Turnaround { .. } => "turnaround",
            BusEvent::RxByte { .. } => "rx_byte",
            BusEvent::RxOverflow { .. } => "rx_overflow",
            BusEvent::EchoDiscarded { .. } => "echo_discarded",
            BusEvent::QueueFull { .. } => "queue_full",
            BusEvent::Timeout { .. } => "timeout",
            BusEvent::Flush { .. } => "flush",
        }
    }

    fn byte(&self) -> Option<u8> {
        match *self {
            BusEvent::TxStart { byte, .. }
            | BusEvent::TxByte { byte, .. }
            | BusEvent::RxByte { byte, .. }
            | BusEvent::RxOverflow { byte, .. }
            | BusEvent::EchoDiscarded { byte, .. }
            | BusEvent::QueueFull { byte, .. } => Some(byte),
            _ => None,
        }
    }

    fn detail(&self) -> String {
        match *self {
            BusEvent::BringUp { baud, .. } => format!("baud={}", baud),
            BusEvent::TxStart { immediate, .. } => {
                if immediate { "immediate".into() } else { "restart".into() }
            }
            BusEvent::Flush {
                discarded,
                released,
                ..
            } => format!("discarded={} released={}", discarded, released),
            _ => String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TraceRecord {
    pub seq: u64,
    pub ts_ns: u64,
    pub event: BusEvent,
}

#[derive(Debug, Serialize)]
struct CsvRow {
    seq: u64,
    ts_ns: u64,
    channel: String,
    event: &'static str,
    byte: Option<String>,
    detail: String,
}

impl From<&TraceRecord> for CsvRow {
    fn from(rec: &TraceRecord) -> Self {
        CsvRow {
            seq: rec.seq,
            ts_ns: rec.ts_ns,
            channel: rec.event.channel().to_string(),
            event: rec.event.name(),
            byte: rec.event.byte().map(|b| format!("{:#04x}", b)),
            detail: rec.event.detail(),
        }
    }
}

pub struct BusTrace {
    queue: Arc<ArrayQueue<TraceRecord>>,
    run_start: Instant,
    seq: AtomicU64,
    dropped: AtomicU64,
}

impl Default for BusTrace {
    fn default() -> Self {
        Self::new()
    }
}

impl BusTrace {
    pub fn new() -> Self {
        Self::with_capacity(TRACE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            queue: Arc::new(ArrayQueue::new(capacity.max(1))),
            run_start: Instant::now(),
            seq: AtomicU64::new(1),
            dropped: AtomicU64::new(0),
        }
    }

    /// Nanoseconds since the trace was created.
    #[inline]
    pub fn now_ns(&self) -> u64 {
        self.run_start.elapsed().as_nanos() as u64
    }

    /// Append an event. Never blocks; drops the event when the queue is full.
    #[inline]
    pub fn record(&self, event: BusEvent) {
        let rec = TraceRecord {
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            ts_ns: self.now_ns(),
            event,
        };
        if self.queue.push(rec).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Take everything recorded so far, oldest first.
    pub fn drain(&self) -> Vec<TraceRecord> {
        let mut out = Vec::with_capacity(self.queue.len());
        while let Some(rec) = self.queue.pop() {
            out.push(rec);
        }
        out
    }

    /// Spawn a background thread writing events to `output_csv` until stopped.
    pub fn start_exporter(&self, output_csv: PathBuf) -> TraceExporter {
        let queue = self.queue.clone();
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();

        let handle = thread::spawn(move || {
            let mut wtr = match Writer::from_path(&output_csv) {
                Ok(w) => w,
                Err(e) => {
                    error!("failed to create trace csv {:?}: {}", output_csv, e);
                    return;
                }
            };
            let mut flush_counter = 0usize;
            let mut written = 0u64;

            loop {
                let mut any = false;
                while let Some(rec) = queue.pop() {
                    any = true;
                    written += 1;
                    wtr.serialize(CsvRow::from(&rec)).ok();
                }
                if any {
                    flush_counter += 1;
                    if flush_counter >= FLUSH_BATCHES {
                        wtr.flush().ok();
                        flush_counter = 0;
                    }
                } else if !flag.load(Ordering::Acquire) {
                    break;
                } else {
                    thread::sleep(Duration::from_millis(EXPORT_POLL_MS));
                }
            }

            wtr.flush().ok();
            debug!("[BusTrace::exporter] exiting, {} events written", written);
        });

        TraceExporter {
            running,
            handle: Some(handle),
        }
    }
}

/// Handle to a running exporter thread. Stopping drains what is left, then joins.
pub struct TraceExporter {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TraceExporter {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(h) = self.handle.take() {
            if h.join().is_err() {
                error!("trace exporter thread panicked");
            }
        }
    }
}

impl Drop for TraceExporter {
    fn drop(&mut self) {
        self.shutdown();
    }
}
