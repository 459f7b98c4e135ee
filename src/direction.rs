//! Half-duplex transceiver direction control.
//!
//! An RS485 transceiver has a driver-enable (DE) and a receiver-disable (RE)
//! input. Transmitting requires both asserted, receiving requires both
//! released. Every switch is followed by a fixed settle delay.
use crate::timing::{BusTiming, Clock};
use log::*;

/// The two direction control lines of the transceiver.
///
/// Setting a line is fire-and-forget; whether the level physically changed
/// cannot be observed from here.
pub trait DirectionLines {
    fn set_driver_enable(&mut self, asserted: bool);
    fn set_receiver_disable(&mut self, asserted: bool);
}

impl<L: DirectionLines + ?Sized> DirectionLines for Box<L> {
    fn set_driver_enable(&mut self, asserted: bool) {
        (**self).set_driver_enable(asserted)
    }

    fn set_receiver_disable(&mut self, asserted: bool) {
        (**self).set_receiver_disable(asserted)
    }
}

/// Lines for adapters that switch direction on their own.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoDirection;

impl DirectionLines for AutoDirection {
    fn set_driver_enable(&mut self, _asserted: bool) {}
    fn set_receiver_disable(&mut self, _asserted: bool) {}
}

/// Toggles the bus direction and enforces the settle timing around it.
#[derive(Debug)]
pub struct DirectionController<L, C> {
    lines: L,
    clock: C,
    timing: BusTiming,
}

impl<L: DirectionLines, C: Clock> DirectionController<L, C> {
    pub fn new(lines: L, clock: C, timing: BusTiming) -> Self {
        Self {
            lines,
            clock,
            timing,
        }
    }

    /// Asserts DE and RE, then blocks for the settle time.
    pub fn enter_transmit_mode(&mut self) {
        self.lines.set_driver_enable(true);
        self.lines.set_receiver_disable(true);
        debug!("Bus in transmit mode, settling for {:?}", self.timing.settle);
        self.clock.sleep(self.timing.settle);
    }

    /// Releases DE and RE, then blocks for the turnaround time.
    pub fn enter_receive_mode(&mut self) {
        self.lines.set_driver_enable(false);
        self.lines.set_receiver_disable(false);
        debug!(
            "Bus in receive mode, turnaround for {:?}",
            self.timing.turnaround
        );
        self.clock.sleep(self.timing.turnaround);
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn timing(&self) -> &BusTiming {
        &self.timing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::ManualClock;
    use std::time::Duration;

    #[derive(Debug, Default)]
    struct RecordingLines {
        changes: Vec<(&'static str, bool)>,
    }

    impl DirectionLines for RecordingLines {
        fn set_driver_enable(&mut self, asserted: bool) {
            self.changes.push(("DE", asserted));
        }

        fn set_receiver_disable(&mut self, asserted: bool) {
            self.changes.push(("RE", asserted));
        }
    }

    #[test]
    fn transmit_then_receive() {
        let clock = ManualClock::new();
        let mut controller = DirectionController::new(
            RecordingLines::default(),
            clock.clone(),
            BusTiming::default(),
        );

        controller.enter_transmit_mode();
        assert_eq!(controller.lines.changes, vec![("DE", true), ("RE", true)]);
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(10)]);

        controller.enter_receive_mode();
        assert_eq!(controller.lines.changes[2..], [("DE", false), ("RE", false)]);
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_millis(10), Duration::from_millis(100)]
        );
    }

    #[test]
    fn auto_direction_still_waits() {
        let clock = ManualClock::new();
        let timing = BusTiming::new(
            Duration::from_millis(20),
            Duration::from_millis(120),
            Duration::from_millis(200),
        );
        let mut controller = DirectionController::new(AutoDirection, clock.clone(), timing);
        controller.enter_transmit_mode();
        controller.enter_receive_mode();
        assert_eq!(clock.slept(), Duration::from_millis(140));
    }
}
