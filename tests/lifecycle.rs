use crossbeam::channel::{bounded, Receiver, Sender};
use servo_link::{
    channel::scan_baud_rates, ChannelConfig, ChannelId, ChannelRegistry, Direction, FlushMode,
    HardwareError, HardwareLine, HwCall, IsrHandle, LineConfig, MockLine, ProtocolTag,
    TransportError,
};

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn ch1() -> ChannelConfig {
    ChannelConfig::default_for(ChannelId::Ch1)
}

/// Line whose `arm` parks until the test opens the gate.
struct GatedLine {
    entered: Sender<()>,
    gate: Receiver<()>,
    armed: AtomicBool,
}

impl GatedLine {
    fn new() -> (Self, Receiver<()>, Sender<()>) {
        let (entered_tx, entered_rx) = bounded(1);
        let (gate_tx, gate_rx) = bounded(1);
        let line = Self {
            entered: entered_tx,
            gate: gate_rx,
            armed: AtomicBool::new(false),
        };
        (line, entered_rx, gate_tx)
    }
}

impl HardwareLine for GatedLine {
    fn configure(&self, _line: &LineConfig) -> Result<(), HardwareError> {
        Ok(())
    }

    fn arm(&self, _isr: IsrHandle<Self>) -> Result<(), HardwareError> {
        let _ = self.entered.send(());
        let _ = self.gate.recv();
        self.armed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn disarm(&self) {
        self.armed.store(false, Ordering::SeqCst);
    }

    fn transmit(&self, _byte: u8) {}

    fn set_direction(&self, _direction: Direction) {}

    fn set_completion_interrupt(&self, _enabled: bool) {}
}

#[test]
fn bring_up_programs_line_then_arms_in_receive() {
    init();
    let registry = ChannelRegistry::new();
    let hw = Arc::new(MockLine::new());

    let t = registry.bring_up(ChannelId::Ch1, ch1(), hw.clone()).unwrap();
    assert!(registry.is_up(ChannelId::Ch1));
    assert!(!registry.is_up(ChannelId::Ch2));
    assert!(hw.is_armed());
    assert_eq!(t.direction(), Direction::Receive);
    assert_eq!(
        hw.calls(),
        vec![
            HwCall::Configure(57_600),
            HwCall::CompletionInterrupt(false),
            HwCall::Direction(Direction::Receive),
            HwCall::Arm,
        ]
    );
}

#[test]
fn refused_line_settings_leave_channel_down() {
    init();
    let registry = ChannelRegistry::new();

    let err = registry
        .bring_up(ChannelId::Ch1, ch1(), Arc::new(MockLine::refusing()))
        .unwrap_err();
    assert_eq!(
        err,
        TransportError::Configuration(HardwareError::UnsupportedBaud(57_600))
    );
    assert!(!registry.is_up(ChannelId::Ch1));
    assert_eq!(
        registry.send_byte(ChannelId::Ch1, 0x01),
        Err(TransportError::ChannelDown(ChannelId::Ch1))
    );
}

#[test]
fn unclaimable_interrupt_leaves_channel_down() {
    init();
    let registry = ChannelRegistry::new();
    let hw = Arc::new(MockLine::refusing_arm());

    let err = registry.bring_up(ChannelId::Ch2, ch1(), hw.clone()).unwrap_err();
    assert!(matches!(
        err,
        TransportError::Configuration(HardwareError::Unavailable(_))
    ));
    assert!(!registry.is_up(ChannelId::Ch2));
    assert!(!hw.is_armed());
}

#[test]
fn zero_capacity_is_rejected_before_touching_hardware() {
    init();
    let registry = ChannelRegistry::new();
    let hw = Arc::new(MockLine::new());

    let err = registry
        .bring_up(ChannelId::Ch1, ch1().with_capacities(0, 8), hw.clone())
        .unwrap_err();
    assert!(matches!(err, TransportError::InvalidConfig(_)));
    assert!(hw.calls().is_empty());
}

#[test]
fn second_bring_up_is_already_up() {
    init();
    let registry = ChannelRegistry::new();
    registry
        .bring_up(ChannelId::Ch1, ch1(), Arc::new(MockLine::new()))
        .unwrap();

    let other = Arc::new(MockLine::new());
    assert_eq!(
        registry.bring_up(ChannelId::Ch1, ch1(), other.clone()).err(),
        Some(TransportError::AlreadyUp(ChannelId::Ch1))
    );
    assert!(other.calls().is_empty());
}

#[test]
fn lookups_proceed_while_line_is_being_armed() {
    init();
    let registry = Arc::new(ChannelRegistry::new());
    let (line, entered, gate) = GatedLine::new();

    let bringing_up = {
        let registry = registry.clone();
        thread::spawn(move || registry.bring_up(ChannelId::Ch1, ch1(), Arc::new(line)).is_ok())
    };
    entered.recv_timeout(Duration::from_secs(2)).unwrap();

    let (done_tx, done_rx) = bounded(1);
    let lookup = {
        let registry = registry.clone();
        thread::spawn(move || {
            let up = registry.is_up(ChannelId::Ch1);
            let found = registry.transport(ChannelId::Ch1).is_ok();
            let _ = done_tx.send((up, found));
        })
    };
    assert_eq!(done_rx.recv_timeout(Duration::from_secs(1)), Ok((false, false)));
    lookup.join().unwrap();

    gate.send(()).unwrap();
    assert!(bringing_up.join().unwrap());
    assert!(registry.is_up(ChannelId::Ch1));
}

#[test]
fn concurrent_bring_up_loser_backs_out() {
    init();
    let registry = Arc::new(ChannelRegistry::new());
    let (slow, entered, gate) = GatedLine::new();
    let slow = Arc::new(slow);

    let bringing_up = {
        let (registry, slow) = (registry.clone(), slow.clone());
        thread::spawn(move || registry.bring_up(ChannelId::Ch1, ch1(), slow).err())
    };
    entered.recv_timeout(Duration::from_secs(2)).unwrap();

    let (fast, fast_entered, fast_gate) = GatedLine::new();
    fast_gate.send(()).unwrap();
    let fast = Arc::new(fast);
    registry.bring_up(ChannelId::Ch1, ch1(), fast.clone()).unwrap();
    fast_entered.recv().unwrap();

    gate.send(()).unwrap();
    assert_eq!(
        bringing_up.join().unwrap(),
        Some(TransportError::AlreadyUp(ChannelId::Ch1))
    );
    assert!(!slow.armed.load(Ordering::SeqCst));
    assert!(fast.armed.load(Ordering::SeqCst));
    assert!(Arc::ptr_eq(
        registry.transport(ChannelId::Ch1).unwrap().hardware(),
        &fast
    ));
}

#[test]
fn tear_down_returns_hardware_and_stales_handles() {
    init();
    let registry = ChannelRegistry::new();
    let hw = Arc::new(MockLine::new());
    let t = registry.bring_up(ChannelId::Ch1, ch1(), hw.clone()).unwrap();
    t.send_byte(0x01).unwrap();

    let back = registry.tear_down(ChannelId::Ch1).unwrap();
    assert!(Arc::ptr_eq(&back, &hw));
    assert!(!hw.is_armed());
    assert!(!hw.completion_enabled());
    assert_eq!(hw.line_direction(), Direction::Receive);

    assert_eq!(t.send_byte(0x02), Err(TransportError::ChannelDown(ChannelId::Ch1)));
    assert_eq!(
        t.receive_byte(Duration::ZERO),
        Err(TransportError::ChannelDown(ChannelId::Ch1))
    );
    assert_eq!(
        t.flush(FlushMode::Retain),
        Err(TransportError::ChannelDown(ChannelId::Ch1))
    );
    assert_eq!(
        registry.tear_down(ChannelId::Ch1).err(),
        Some(TransportError::ChannelDown(ChannelId::Ch1))
    );
}

#[test]
fn tear_down_releases_blocked_receiver() {
    init();
    let registry = ChannelRegistry::new();
    let t = registry
        .bring_up(ChannelId::Ch2, ch1(), Arc::new(MockLine::new()))
        .unwrap();

    let waiter = t.clone();
    let rx = thread::spawn(move || {
        let start = Instant::now();
        (waiter.receive_byte(Duration::from_secs(2)), start.elapsed())
    });
    thread::sleep(Duration::from_millis(50));
    registry.tear_down(ChannelId::Ch2).unwrap();

    let (result, elapsed) = rx.join().unwrap();
    assert_eq!(result, Err(TransportError::Released));
    assert!(elapsed < Duration::from_secs(1));
}

#[test]
fn reconfigure_keeps_hardware_and_resets_fifos() {
    init();
    let registry = ChannelRegistry::new();
    let hw = Arc::new(MockLine::new());
    let t = registry.bring_up(ChannelId::Ch1, ch1(), hw.clone()).unwrap();
    hw.receive(0x01);
    hw.receive(0x02);
    assert_eq!(t.rx_available(), 2);

    let fast = ch1().with_line(LineConfig::with_baud(1_000_000));
    let t2 = registry.reconfigure(ChannelId::Ch1, fast).unwrap();

    assert!(Arc::ptr_eq(t2.hardware(), &hw));
    assert_eq!(t2.line_config().baud_rate, 1_000_000);
    assert_eq!(t2.rx_available(), 0);
    assert_eq!(t2.direction(), Direction::Receive);
    assert!(hw.calls().contains(&HwCall::Configure(1_000_000)));
    assert_eq!(t.send_byte(0x03), Err(TransportError::ChannelDown(ChannelId::Ch1)));

    hw.receive(0x55);
    assert_eq!(t2.receive_byte(Duration::from_millis(5)), Ok(0x55));
}

#[test]
fn failed_reconfigure_leaves_channel_down() {
    init();
    let registry = ChannelRegistry::new();
    let hw = Arc::new(MockLine::with_max_baud(115_200));
    registry.bring_up(ChannelId::Ch1, ch1(), hw.clone()).unwrap();

    let err = registry
        .reconfigure(ChannelId::Ch1, ch1().with_line(LineConfig::with_baud(1_000_000)))
        .unwrap_err();
    assert_eq!(
        err,
        TransportError::Configuration(HardwareError::UnsupportedBaud(1_000_000))
    );
    assert!(!registry.is_up(ChannelId::Ch1));

    // the same hardware can still be brought up at a supported rate
    registry.bring_up(ChannelId::Ch1, ch1(), hw).unwrap();
}

#[test]
fn defaults_bring_up_both_buses() {
    init();
    let registry = ChannelRegistry::new();
    let (a, b) = (Arc::new(MockLine::new()), Arc::new(MockLine::new()));
    registry.bring_up_defaults(a.clone(), b.clone()).unwrap();

    let c1 = registry.config(ChannelId::Ch1).unwrap();
    let c2 = registry.config(ChannelId::Ch2).unwrap();
    assert_eq!(c1.protocol, ProtocolTag::V2);
    assert_eq!(c2.protocol, ProtocolTag::V1);
    assert_eq!(c1.line, LineConfig::default());
    assert_eq!(c2.line.baud_rate, 57_600);

    let ids: Vec<_> = registry.snapshot().into_iter().map(|(id, _, _)| id).collect();
    assert_eq!(ids, vec![ChannelId::Ch1, ChannelId::Ch2]);

    registry.shutdown();
    assert!(!a.is_armed() && !b.is_armed());
    assert!(registry.snapshot().is_empty());
}

#[test]
fn shutdown_skips_channels_already_down() {
    init();
    let registry = ChannelRegistry::new();
    let (a, b) = (Arc::new(MockLine::new()), Arc::new(MockLine::new()));
    registry.bring_up_defaults(a.clone(), b.clone()).unwrap();
    registry.tear_down(ChannelId::Ch1).unwrap();

    registry.shutdown();
    registry.shutdown();
    assert!(!a.is_armed() && !b.is_armed());
    assert!(registry.snapshot().is_empty());
}

#[test]
fn dropping_registry_disarms_lines() {
    init();
    let hw = Arc::new(MockLine::new());
    {
        let registry = ChannelRegistry::new();
        registry.bring_up(ChannelId::Ch1, ch1(), hw.clone()).unwrap();
        assert!(hw.is_armed());
    }
    assert!(!hw.is_armed());
    assert_eq!(Arc::strong_count(&hw), 1);
}

#[test]
fn registry_calls_route_by_id() {
    init();
    let registry = ChannelRegistry::new();
    let (a, b) = (Arc::new(MockLine::new()), Arc::new(MockLine::new()));
    registry.bring_up_defaults(a.clone(), b.clone()).unwrap();

    registry.send_byte(ChannelId::Ch2, 0x42).unwrap();
    assert_eq!(b.transmitted(), vec![0x42]);
    assert!(a.transmitted().is_empty());

    assert_eq!(
        registry.switch_direction(ChannelId::Ch2, Direction::Receive),
        Err(TransportError::BusBusy)
    );
    b.complete();

    a.receive(0x11);
    assert_eq!(registry.flush(ChannelId::Ch1, FlushMode::Retain), Ok(1));
    a.receive(0x12);
    assert_eq!(
        registry.receive_byte(ChannelId::Ch1, Duration::from_millis(5)),
        Ok(0x12)
    );
}

// ============================================================================
// Baud scan
// ============================================================================

#[test]
fn scan_finds_answering_rate_and_skips_unsupported() {
    init();
    let registry = ChannelRegistry::new();
    let hw = Arc::new(MockLine::with_max_baud(1_000_000));
    registry.bring_up(ChannelId::Ch1, ch1(), hw.clone()).unwrap();

    let mut probed = Vec::new();
    let found = scan_baud_rates(
        &registry,
        ChannelId::Ch1,
        &[2_000_000, 115_200, 500_000, 9_600],
        |t| {
            let baud = t.line_config().baud_rate;
            probed.push(baud);
            baud == 500_000
        },
    )
    .unwrap();

    assert_eq!(found, Some(500_000));
    assert_eq!(probed, vec![115_200, 500_000]);
    assert_eq!(registry.config(ChannelId::Ch1).unwrap().line.baud_rate, 500_000);
    assert!(hw.is_armed());
}

#[test]
fn scan_without_answer_restores_original_rate() {
    init();
    let registry = ChannelRegistry::new();
    let hw = Arc::new(MockLine::new());
    let config = ch1().with_capacities(16, 32);
    registry.bring_up(ChannelId::Ch1, config.clone(), hw).unwrap();

    let found =
        scan_baud_rates(&registry, ChannelId::Ch1, &[9_600, 115_200, 1_000_000], |_| false)
            .unwrap();

    assert_eq!(found, None);
    assert_eq!(registry.config(ChannelId::Ch1).unwrap(), config);
}

#[test]
fn scan_on_down_channel_is_channel_down() {
    init();
    let registry: ChannelRegistry<MockLine> = ChannelRegistry::new();
    assert_eq!(
        scan_baud_rates(&registry, ChannelId::Ch2, &[57_600], |_| true),
        Err(TransportError::ChannelDown(ChannelId::Ch2))
    );
}

#[test]
fn scan_error_restores_original_settings() {
    init();
    let registry = ChannelRegistry::new();
    let hw = Arc::new(MockLine::new());
    registry.bring_up(ChannelId::Ch1, ch1(), hw.clone()).unwrap();

    let mut probed = 0;
    let err = scan_baud_rates(&registry, ChannelId::Ch1, &[0, 115_200], |_| {
        probed += 1;
        true
    })
    .unwrap_err();

    assert!(matches!(err, TransportError::InvalidConfig(_)));
    assert_eq!(probed, 0);
    assert!(registry.is_up(ChannelId::Ch1));
    assert_eq!(registry.config(ChannelId::Ch1).unwrap(), ch1());
    assert!(hw.is_armed());
}
