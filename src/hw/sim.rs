//! sim.rs
//! Simulated half-duplex line with an actuator on the far end.
//!
//! - `arm()` spawns a dispatch thread at `ThreadPriority::Max` playing the role of the UART's
//!   interrupt controller. It owns the registered `IsrHandle` and is the only caller of it.
//! - Each byte handed to `transmit()` occupies the line for one frame time (SpinSleeper), is
//!   echoed back the way a shared data line does, then raises transmit-complete if enabled.
//! - When the line turns back to receive, the bytes sent since the previous turnaround are
//!   offered to the `Responder`. Its reply is shifted in after the reply latency plus random
//!   jitter, one frame per byte.
//!
//! The `HardwareLine` methods only post commands to the dispatch thread, so they never block.

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, warn};
use parking_lot::Mutex;
use rand::random_range;
use spin_sleep::{SpinSleeper, SpinStrategy};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};
use thread_priority::{ThreadBuilderExt, ThreadPriority};

use crate::channel::{Direction, IsrHandle, LineConfig};

use super::{HardwareError, HardwareLine, IrqEvent};

pub const MIN_BAUD: u32 = 1_200;
pub const MAX_BAUD: u32 = 4_500_000;
pub const DEFAULT_REPLY_LATENCY: Duration = Duration::from_micros(500);
pub const DEFAULT_REPLY_JITTER: Duration = Duration::from_micros(50);

/// The device at the far end of a simulated bus.
///
/// `request` is everything transmitted since the last turnaround. Returning `None` models an
/// absent or silent device.
pub trait Responder: Send + 'static {
    fn respond(&mut self, request: &[u8], line: &LineConfig) -> Option<Vec<u8>>;
}

impl<F> Responder for F
where
    F: FnMut(&[u8], &LineConfig) -> Option<Vec<u8>> + Send + 'static,
{
    fn respond(&mut self, request: &[u8], line: &LineConfig) -> Option<Vec<u8>> {
        self(request, line)
    }
}

fn silent(_: &[u8], _: &LineConfig) -> Option<Vec<u8>> {
    None
}

enum Command {
    Transmit(u8),
    Direction(Direction),
    Inject(u8),
    Shutdown,
}

pub struct SimulatedLine {
    line: Mutex<LineConfig>,
    tx: Sender<Command>,
    rx: Receiver<Command>,
    completion: Arc<AtomicBool>,
    wire: Arc<Mutex<Vec<u8>>>,
    responder: Mutex<Option<Box<dyn Responder>>>,
    worker: Mutex<Option<JoinHandle<Box<dyn Responder>>>>,
    reply_latency: Duration,
    reply_jitter: Duration,
}

impl Default for SimulatedLine {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedLine {
    /// A line with nobody listening.
    pub fn new() -> Self {
        Self::with_responder(silent)
    }

    pub fn with_responder(responder: impl Responder) -> Self {
        let (tx, rx) = unbounded();
        let responder: Box<dyn Responder> = Box::new(responder);
        Self {
            line: Mutex::new(LineConfig::default()),
            tx,
            rx,
            completion: Arc::new(AtomicBool::new(false)),
            wire: Arc::new(Mutex::new(Vec::new())),
            responder: Mutex::new(Some(responder)),
            worker: Mutex::new(None),
            reply_latency: DEFAULT_REPLY_LATENCY,
            reply_jitter: DEFAULT_REPLY_JITTER,
        }
    }

    pub fn with_reply_latency(mut self, latency: Duration, jitter: Duration) -> Self {
        self.reply_latency = latency;
        self.reply_jitter = jitter;
        self
    }

    /// Every byte that went out on the line, in order.
    pub fn wire(&self) -> Vec<u8> {
        self.wire.lock().clone()
    }

    /// Put a byte on the line from the far end, outside any request/reply exchange.
    pub fn inject(&self, byte: u8) {
        let _ = self.tx.send(Command::Inject(byte));
    }

    fn post(&self, cmd: Command) {
        // `self.rx` keeps the channel connected, so this cannot fail
        let _ = self.tx.send(cmd);
    }
}

impl HardwareLine for SimulatedLine {
    fn configure(&self, line: &LineConfig) -> Result<(), HardwareError> {
        if !(MIN_BAUD..=MAX_BAUD).contains(&line.baud_rate) {
            return Err(HardwareError::UnsupportedBaud(line.baud_rate));
        }
        *self.line.lock() = *line;
        Ok(())
    }

    fn arm(&self, isr: IsrHandle<Self>) -> Result<(), HardwareError> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Err(HardwareError::Unavailable("line already armed"));
        }
        let responder = self
            .responder
            .lock()
            .take()
            .ok_or(HardwareError::Unavailable("responder"))?;

        // leftovers from a previous session
        while self.rx.try_recv().is_ok() {}

        let dispatch = Dispatch {
            isr,
            line: *self.line.lock(),
            rx: self.rx.clone(),
            completion: self.completion.clone(),
            wire: self.wire.clone(),
            reply_latency: self.reply_latency,
            reply_jitter: self.reply_jitter,
        };
        let name = format!("sim_{}", dispatch.isr.channel());

        // The responder moves into the thread; keep a way back if spawning fails.
        let slot = Arc::new(Mutex::new(Some(responder)));
        let thread_slot = slot.clone();
        let spawned = thread::Builder::new()
            .name(name)
            .spawn_with_priority(ThreadPriority::Max, move |_| {
                let responder = thread_slot.lock().take();
                match responder {
                    Some(r) => dispatch.run(r),
                    None => Box::new(silent) as Box<dyn Responder>,
                }
            });

        match spawned {
            Ok(handle) => {
                *worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                warn!("simulated line dispatch thread failed to start: {}", e);
                *self.responder.lock() = slot.lock().take();
                Err(HardwareError::Unavailable("dispatch thread"))
            }
        }
    }

    fn disarm(&self) {
        self.completion.store(false, Ordering::SeqCst);
        let Some(handle) = self.worker.lock().take() else {
            return;
        };
        self.post(Command::Shutdown);
        match handle.join() {
            Ok(responder) => *self.responder.lock() = Some(responder),
            Err(_) => warn!("simulated line dispatch thread panicked"),
        }
    }

    fn transmit(&self, byte: u8) {
        self.post(Command::Transmit(byte));
    }

    fn set_direction(&self, direction: Direction) {
        self.post(Command::Direction(direction));
    }

    fn set_completion_interrupt(&self, enabled: bool) {
        self.completion.store(enabled, Ordering::SeqCst);
    }
}

// ============================================================================
// Dispatch thread
// ============================================================================

struct Dispatch {
    isr: IsrHandle<SimulatedLine>,
    line: LineConfig,
    rx: Receiver<Command>,
    completion: Arc<AtomicBool>,
    wire: Arc<Mutex<Vec<u8>>>,
    reply_latency: Duration,
    reply_jitter: Duration,
}

impl Dispatch {
    fn run(self, mut responder: Box<dyn Responder>) -> Box<dyn Responder> {
        let sleeper = SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread);
        let frame = self.line.frame_time();
        let mut direction = Direction::Receive;
        let mut request: Vec<u8> = Vec::new();
        let mut reply: Option<(Instant, Vec<u8>)> = None;

        loop {
            let cmd = match &reply {
                Some((due, _)) => match self.rx.recv_deadline(*due) {
                    Ok(cmd) => Some(cmd),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => break,
                },
                None => match self.rx.recv() {
                    Ok(cmd) => Some(cmd),
                    Err(_) => break,
                },
            };

            match cmd {
                None => {
                    if let Some((_, bytes)) = reply.take() {
                        for byte in bytes {
                            sleeper.sleep(frame);
                            self.isr.on_interrupt(IrqEvent::ByteReceived(byte));
                        }
                    }
                }
                Some(Command::Transmit(byte)) => {
                    sleeper.sleep(frame);
                    self.wire.lock().push(byte);
                    request.push(byte);
                    // shared data line: the transmitter hears itself
                    self.isr.on_interrupt(IrqEvent::ByteReceived(byte));
                    if self.completion.load(Ordering::SeqCst) {
                        self.isr.on_interrupt(IrqEvent::TransmitComplete);
                    }
                }
                Some(Command::Direction(next)) => {
                    let prev = direction;
                    direction = next;
                    match (prev, next) {
                        (Direction::Receive, Direction::Transmit) => {
                            if reply.take().is_some() {
                                debug!("[sim {}] reply collided with new request", self.isr.channel());
                            }
                        }
                        (Direction::Transmit, Direction::Receive) if !request.is_empty() => {
                            if let Some(bytes) = responder.respond(&request, &self.line) {
                                // a reply due past the representable future never arrives
                                reply = Instant::now()
                                    .checked_add(self.reply_delay())
                                    .map(|due| (due, bytes));
                            }
                            request.clear();
                        }
                        _ => {}
                    }
                }
                Some(Command::Inject(byte)) => {
                    sleeper.sleep(frame);
                    self.isr.on_interrupt(IrqEvent::ByteReceived(byte));
                }
                Some(Command::Shutdown) => break,
            }
        }
        responder
    }

    fn reply_delay(&self) -> Duration {
        let jitter_ns = self.reply_jitter.as_nanos() as u64;
        if jitter_ns == 0 {
            self.reply_latency
        } else {
            self.reply_latency
                .saturating_add(Duration::from_nanos(random_range(0..=jitter_ns)))
        }
    }
}
