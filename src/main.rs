//! # Servo bus demo
//!
//! Brings up both servo buses on simulated lines with actuators daisy-chained on the far end
//! and runs the bus service routines against them.
//!
//! ## Modes
//! - **Round trips:** ping every actuator id on both buses (plus one absent id) and measure
//!   the request → first reply byte latency. Ch1 flushes with `Retain`, ch2 with `Release`.
//! - **Baud scan:** ch2's actuators sit at an unknown rate; scan the standard rates until one
//!   answers.
//!
//! ## Outputs
//! - `data/logs/bus_trace.csv`: every transport event (nanosecond timestamps).
//! - `data/logs/channel_stats.csv`: per-channel counters and health.
//!
//! The ping frame used here is a minimal stand-in: `FF FF id len instr checksum`. Real packet
//! handling belongs to the actuator protocol layer, not to the transport.

use servo_link::{
    channel::{config::DEFAULT_BAUD_RATE, scan_baud_rates, STANDARD_BAUD_RATES},
    hw::sim::{DEFAULT_REPLY_JITTER, DEFAULT_REPLY_LATENCY},
    utils::{
        export::{export_stats_csv, log_summary},
        trace::{BusTrace, TraceExporter},
    },
    ChannelConfig, ChannelId, ChannelRegistry, FlushMode, LineConfig, SimulatedLine, Transport,
    TransportError,
};

use log::{debug, error, info, warn};
use std::{
    fs::create_dir_all,
    io::{stdin, stdout, Write},
    path::Path,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

const LOG_DIR: &str = "data/logs";
const ROUNDS: usize = 20;
const CH1_ACTUATORS: &[u8] = &[1, 2, 3, 4];
const CH2_ACTUATORS: &[u8] = &[1, 2];
const ABSENT_ID: u8 = 0x2A;
const CH2_HIDDEN_BAUD: u32 = 1_000_000;

const IDLE_MARGIN: Duration = Duration::from_millis(5);

const PING: u8 = 0x01;
const STATUS_LEN: usize = 6;

fn main() {
    env_logger::init();
    info!("=== SERVO LINK DEMO START ===");

    loop {
        let choice = prompt_menu();
        match choice.as_str() {
            "1" | "" => {
                run_round_trips();
                println!("\n Round trips completed. Returning to menu...\n");
            }
            "2" => {
                run_scan();
                println!("\n Scan completed. Returning to menu...\n");
            }
            "3" => {
                println!("Exiting. Goodbye!");
                info!("=== SERVO LINK DEMO FINISHED ===");
                return;
            }
            other => {
                println!("Unrecognized option '{}', please try again.", other);
            }
        }
    }
}

fn prompt_menu() -> String {
    println!("\n┌─────────────────────────────────────────────┐");
    println!("│     SELECT BUS ROUTINE                      │");
    println!("├─────────────────────────────────────────────┤");
    println!("│  1) Ping round trips on ch1 + ch2           │");
    println!("│  2) Baud scan on ch2                        │");
    println!("│  3) Exit                                    │");
    println!("└─────────────────────────────────────────────┘");
    print!("Select [1/2/3] (default: 1): ");
    let _ = stdout().flush();

    let mut input = String::new();
    let _ = stdin().read_line(&mut input);
    input.trim().to_string()
}

// ============================================================================
// Simulated actuators
// ============================================================================

fn checksum(body: &[u8]) -> u8 {
    !body.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

fn ping_frame(id: u8) -> [u8; 6] {
    let body = [id, 2, PING];
    [0xFF, 0xFF, id, 2, PING, checksum(&body)]
}

/// A chain of actuators listening at `baud`. Each answers a well-formed ping to its own id.
fn actuator_chain(ids: &'static [u8], baud: u32) -> impl FnMut(&[u8], &LineConfig) -> Option<Vec<u8>> {
    move |request: &[u8], line: &LineConfig| {
        if line.baud_rate != baud || request.len() != 6 || request[..2] != [0xFF, 0xFF] {
            return None;
        }
        let id = request[2];
        if !ids.contains(&id) || request[5] != checksum(&request[2..5]) {
            return None;
        }
        let body = [id, 2, 0x00];
        Some(vec![0xFF, 0xFF, id, 2, 0x00, checksum(&body)])
    }
}

fn reply_timeout(transport: &Transport<SimulatedLine>) -> Duration {
    transport
        .line_config()
        .reply_timeout(DEFAULT_REPLY_LATENCY + DEFAULT_REPLY_JITTER)
}

/// One request/reply exchange. Returns the time to the first reply byte.
fn ping(
    transport: &Transport<SimulatedLine>,
    id: u8,
    mode: FlushMode,
) -> Result<Duration, TransportError> {
    transport.flush(mode)?;
    let frame = ping_frame(id);
    transport.send_all(&frame).map_err(|e| e.source)?;

    let burst = transport.line_config().frame_time() * frame.len() as u32;
    transport.wait_idle(burst * 2 + IDLE_MARGIN)?;

    let timeout = reply_timeout(transport);
    let sent = Instant::now();
    let mut reply = [0u8; STATUS_LEN];
    reply[0] = transport.receive_byte(timeout)?;
    let latency = sent.elapsed();
    transport.receive_exact(&mut reply[1..], timeout)?;

    if reply[2] != id || reply[5] != checksum(&reply[2..5]) {
        warn!("[{}] malformed status from id {}: {:02x?}", transport.id(), id, reply);
    }
    Ok(latency)
}

// ============================================================================
// Routines
// ============================================================================

fn start_trace() -> Option<(Arc<BusTrace>, TraceExporter)> {
    if let Err(e) = create_dir_all(LOG_DIR) {
        error!("Failed to create log directory: {}", e);
        return None;
    }
    let trace = Arc::new(BusTrace::new());
    let exporter = trace.start_exporter(Path::new(LOG_DIR).join("bus_trace.csv"));
    Some((trace, exporter))
}

fn finish(registry: &ChannelRegistry<SimulatedLine>) {
    let rows = registry.snapshot();
    log_summary(&rows);
    if let Err(e) = export_stats_csv(Path::new(LOG_DIR), &rows) {
        error!("Failed to export channel stats: {}", e);
    }
    if let Some(trace) = registry.trace() {
        if trace.dropped() > 0 {
            warn!("bus trace dropped {} events", trace.dropped());
        }
    }
}

fn run_round_trips() {
    let Some((trace, exporter)) = start_trace() else {
        return;
    };
    let registry = ChannelRegistry::with_trace(trace);

    let ch1 = Arc::new(SimulatedLine::with_responder(actuator_chain(
        CH1_ACTUATORS,
        DEFAULT_BAUD_RATE,
    )));
    let ch2 = Arc::new(SimulatedLine::with_responder(actuator_chain(
        CH2_ACTUATORS,
        DEFAULT_BAUD_RATE,
    )));
    if let Err(e) = registry.bring_up_defaults(ch1, ch2) {
        error!("bring-up failed: {}", e);
        return;
    }

    let workers: Vec<_> = [
        (ChannelId::Ch1, CH1_ACTUATORS, FlushMode::Retain),
        (ChannelId::Ch2, CH2_ACTUATORS, FlushMode::Release),
    ]
    .into_iter()
    .filter_map(|(id, ids, mode)| {
        let transport = registry.transport(id).ok()?;
        thread::Builder::new()
            .name(format!("bus_{}", id))
            .spawn(move || exchange_loop(transport, ids, mode))
            .inspect_err(|e| error!("[{}] worker failed to start: {}", id, e))
            .ok()
    })
    .collect();

    for w in workers {
        if w.join().is_err() {
            error!("bus worker panicked");
        }
    }

    finish(&registry);
    registry.shutdown();
    exporter.stop();
}

fn exchange_loop(transport: Transport<SimulatedLine>, ids: &'static [u8], mode: FlushMode) {
    let id = transport.id();
    let mut answered = 0usize;
    let mut silent = 0usize;
    let mut worst = Duration::ZERO;
    let mut total = Duration::ZERO;

    for round in 0..ROUNDS {
        for &actuator in ids.iter().chain(std::iter::once(&ABSENT_ID)) {
            match ping(&transport, actuator, mode) {
                Ok(latency) => {
                    answered += 1;
                    total += latency;
                    worst = worst.max(latency);
                }
                Err(TransportError::Timeout) => {
                    silent += 1;
                    debug!("[{}] round {}: id {} silent", id, round, actuator);
                }
                Err(e) => {
                    error!("[{}] round {}: id {} failed: {}", id, round, actuator, e);
                    return;
                }
            }
        }
    }

    let avg = if answered > 0 {
        total / answered as u32
    } else {
        Duration::ZERO
    };
    info!(
        "[{}] {} replies, {} silent, reply latency avg {:?} worst {:?}",
        id, answered, silent, avg, worst
    );
    println!(
        "[{}] {:?}: {} replies / {} silent, avg {:?}, worst {:?}",
        id,
        transport.protocol(),
        answered,
        silent,
        avg,
        worst
    );
}

fn run_scan() {
    let Some((trace, exporter)) = start_trace() else {
        return;
    };
    let registry = ChannelRegistry::with_trace(trace);

    let hw = Arc::new(SimulatedLine::with_responder(actuator_chain(
        CH2_ACTUATORS,
        CH2_HIDDEN_BAUD,
    )));
    if let Err(e) = registry.bring_up(ChannelId::Ch2, ChannelConfig::default_for(ChannelId::Ch2), hw) {
        error!("bring-up failed: {}", e);
        return;
    }

    let started = Instant::now();
    let found = scan_baud_rates(&registry, ChannelId::Ch2, STANDARD_BAUD_RATES, |t| {
        ping(t, CH2_ACTUATORS[0], FlushMode::Release).is_ok()
    });
    match found {
        Ok(Some(baud)) => println!("ch2 actuators found at {} baud ({:?})", baud, started.elapsed()),
        Ok(None) => println!("no actuators answered on ch2"),
        Err(e) => error!("scan failed: {}", e),
    }

    finish(&registry);
    registry.shutdown();
    exporter.stop();
}
