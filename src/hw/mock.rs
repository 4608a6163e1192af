//! mock.rs
//! Call-recording line for tests and benches.
//!
//! Nothing happens on its own: `complete()` plays the transmit-complete interrupt for the byte
//! in flight and `receive()` plays a byte-received interrupt. Alongside the raw call log the
//! mock keeps a small model of the wire so tests can check the half-duplex rules:
//! - a byte handed to the transmitter while the pin selects receive is a violation;
//! - flipping the pin to receive while a byte is still shifting is a violation;
//! - `max_in_flight()` must never exceed one.

use parking_lot::Mutex;

use crate::channel::{Direction, IsrHandle, LineConfig};

use super::{HardwareError, HardwareLine, IrqEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwCall {
    Configure(u32),
    Arm,
    Disarm,
    Transmit(u8),
    Direction(Direction),
    CompletionInterrupt(bool),
}

#[derive(Debug)]
struct Wire {
    direction: Direction,
    completion_irq: bool,
    in_flight: usize,
    max_in_flight: usize,
    violations: usize,
    switches: usize,
    transmitted: Vec<u8>,
}

impl Wire {
    fn new() -> Self {
        Self {
            direction: Direction::Receive,
            completion_irq: false,
            in_flight: 0,
            max_in_flight: 0,
            violations: 0,
            switches: 0,
            transmitted: Vec::new(),
        }
    }
}

pub struct MockLine {
    calls: Mutex<Vec<HwCall>>,
    wire: Mutex<Wire>,
    isr: Mutex<Option<IsrHandle<MockLine>>>,
    max_baud: Option<u32>,
    refuse_arm: bool,
}

impl Default for MockLine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLine {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            wire: Mutex::new(Wire::new()),
            isr: Mutex::new(None),
            max_baud: None,
            refuse_arm: false,
        }
    }

    /// A line whose `configure` rejects every setting.
    pub fn refusing() -> Self {
        Self {
            max_baud: Some(0),
            ..Self::new()
        }
    }

    /// A line that only supports rates up to `max_baud`.
    pub fn with_max_baud(max_baud: u32) -> Self {
        Self {
            max_baud: Some(max_baud),
            ..Self::new()
        }
    }

    /// A line whose interrupt vector cannot be claimed.
    pub fn refusing_arm() -> Self {
        Self {
            refuse_arm: true,
            ..Self::new()
        }
    }

    fn log(&self, call: HwCall) {
        self.calls.lock().push(call);
    }

    pub fn calls(&self) -> Vec<HwCall> {
        self.calls.lock().clone()
    }

    /// Forget the call log and the transmitted bytes. The wire model is kept.
    pub fn clear_calls(&self) {
        self.calls.lock().clear();
        self.wire.lock().transmitted.clear();
    }

    /// Every byte handed to the transmitter, in order.
    pub fn transmitted(&self) -> Vec<u8> {
        self.wire.lock().transmitted.clone()
    }

    /// Number of actual pin changes.
    pub fn direction_switches(&self) -> usize {
        self.wire.lock().switches
    }

    pub fn line_direction(&self) -> Direction {
        self.wire.lock().direction
    }

    pub fn completion_enabled(&self) -> bool {
        self.wire.lock().completion_irq
    }

    pub fn in_flight(&self) -> usize {
        self.wire.lock().in_flight
    }

    pub fn max_in_flight(&self) -> usize {
        self.wire.lock().max_in_flight
    }

    pub fn violations(&self) -> usize {
        self.wire.lock().violations
    }

    pub fn is_armed(&self) -> bool {
        self.isr.lock().is_some()
    }

    pub fn isr(&self) -> Option<IsrHandle<MockLine>> {
        self.isr.lock().clone()
    }

    /// Finish the byte in flight and raise transmit-complete if it is enabled.
    /// Returns false when nothing was shifting.
    pub fn complete(&self) -> bool {
        let raise = {
            let mut wire = self.wire.lock();
            if wire.in_flight == 0 {
                return false;
            }
            wire.in_flight -= 1;
            wire.completion_irq
        };
        // the handler calls back into the line; no lock may be held here
        if raise {
            if let Some(isr) = self.isr() {
                isr.on_interrupt(IrqEvent::TransmitComplete);
            }
        }
        true
    }

    /// Complete bytes until the line goes quiet. Returns how many finished.
    pub fn complete_all(&self) -> usize {
        let mut finished = 0;
        while self.complete() {
            finished += 1;
        }
        finished
    }

    /// Raise transmit-complete with nothing in flight.
    pub fn spurious_completion(&self) {
        if let Some(isr) = self.isr() {
            isr.on_interrupt(IrqEvent::TransmitComplete);
        }
    }

    /// A byte shifted in from the bus.
    pub fn receive(&self, byte: u8) {
        if let Some(isr) = self.isr() {
            isr.on_interrupt(IrqEvent::ByteReceived(byte));
        }
    }
}

impl HardwareLine for MockLine {
    fn configure(&self, line: &LineConfig) -> Result<(), HardwareError> {
        self.log(HwCall::Configure(line.baud_rate));
        match self.max_baud {
            Some(max) if line.baud_rate > max => Err(HardwareError::UnsupportedBaud(line.baud_rate)),
            _ => Ok(()),
        }
    }

    fn arm(&self, isr: IsrHandle<Self>) -> Result<(), HardwareError> {
        if self.refuse_arm {
            return Err(HardwareError::Unavailable("interrupt vector"));
        }
        self.log(HwCall::Arm);
        *self.isr.lock() = Some(isr);
        Ok(())
    }

    fn disarm(&self) {
        self.log(HwCall::Disarm);
        self.isr.lock().take();
    }

    fn transmit(&self, byte: u8) {
        self.log(HwCall::Transmit(byte));
        let mut wire = self.wire.lock();
        if wire.direction == Direction::Receive {
            wire.violations += 1;
        }
        wire.in_flight += 1;
        wire.max_in_flight = wire.max_in_flight.max(wire.in_flight);
        wire.transmitted.push(byte);
    }

    fn set_direction(&self, direction: Direction) {
        self.log(HwCall::Direction(direction));
        let mut wire = self.wire.lock();
        if direction == Direction::Receive && wire.in_flight > 0 {
            wire.violations += 1;
        }
        if wire.direction != direction {
            wire.switches += 1;
            wire.direction = direction;
        }
    }

    fn set_completion_interrupt(&self, enabled: bool) {
        self.log(HwCall::CompletionInterrupt(enabled));
        self.wire.lock().completion_irq = enabled;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transmit_in_receive_is_a_violation() {
        let hw = MockLine::new();
        hw.transmit(0x55);
        assert_eq!(hw.violations(), 1);
        hw.set_direction(Direction::Transmit);
        hw.transmit(0x56);
        assert_eq!(hw.violations(), 1);
        assert_eq!(hw.max_in_flight(), 2);
        assert_eq!(hw.transmitted(), vec![0x55, 0x56]);
    }

    #[test]
    fn complete_without_byte_is_noop() {
        let hw = MockLine::new();
        assert!(!hw.complete());
        assert_eq!(hw.complete_all(), 0);
    }

    #[test]
    fn refusing_line_rejects_configure() {
        let hw = MockLine::refusing();
        assert_eq!(
            hw.configure(&LineConfig::default()),
            Err(HardwareError::UnsupportedBaud(57_600))
        );
        let capped = MockLine::with_max_baud(115_200);
        assert!(capped.configure(&LineConfig::with_baud(57_600)).is_ok());
        assert!(capped.configure(&LineConfig::with_baud(1_000_000)).is_err());
    }
}
