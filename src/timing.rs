//! Bus timing constants and the time source used by the bus components.
//!
//! All blocking waits of the acquisition core go through a [`Clock`], so a
//! [`ManualClock`] can stand in for real time in tests.
use log::*;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Minimum delay after asserting driver-enable before the first byte is sent.
pub const PRE_TRANSMIT_SETTLE_MIN: Duration = Duration::from_millis(10);
/// Minimum delay after releasing the bus before any read is attempted.
pub const POST_TRANSMIT_TURNAROUND_MIN: Duration = Duration::from_millis(100);
/// Default time a complete response may take after the turnaround.
pub const RESPONSE_WINDOW_DEFAULT: Duration = Duration::from_millis(200);
/// How often the inbound buffer is polled while awaiting a response.
pub const RESPONSE_POLL_STEP: Duration = Duration::from_millis(5);

/// Source of time and blocking sleeps.
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration)
    }
}

/// Wall clock backed by [`std::thread::sleep`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// A simulated clock. Sleeping advances the clock instantly.
///
/// Clones share the same time line and sleep history.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Rc<Cell<Instant>>,
    sleeps: Rc<RefCell<Vec<Duration>>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Rc::new(Cell::new(Instant::now())),
            sleeps: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Moves the clock forward without recording a sleep.
    pub fn advance(&self, duration: Duration) {
        self.now.set(self.now.get() + duration);
    }

    /// All durations passed to [`Clock::sleep`] so far.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.borrow().clone()
    }

    /// Sum of all sleeps.
    pub fn slept(&self) -> Duration {
        self.sleeps.borrow().iter().sum()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.now.get()
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps.borrow_mut().push(duration);
        self.advance(duration);
    }
}

/// Fixed durations around one bus transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusTiming {
    pub settle: Duration,
    pub turnaround: Duration,
    pub response_window: Duration,
}

impl Default for BusTiming {
    fn default() -> Self {
        Self {
            settle: PRE_TRANSMIT_SETTLE_MIN,
            turnaround: POST_TRANSMIT_TURNAROUND_MIN,
            response_window: RESPONSE_WINDOW_DEFAULT,
        }
    }
}

/// Returns `user` unless it is below `minimum`, in which case the minimum is used.
fn at_least(name: &str, user: Duration, minimum: Duration) -> Duration {
    if user < minimum {
        warn!(
            "User-defined {name} of {user:?} is below the required minimum of {minimum:?}. Using minimum."
        );
        minimum
    } else {
        user
    }
}

impl BusTiming {
    /// Creates the timing set, raising settle and turnaround to their minimums.
    pub fn new(settle: Duration, turnaround: Duration, response_window: Duration) -> Self {
        Self {
            settle: at_least("settle time", settle, PRE_TRANSMIT_SETTLE_MIN),
            turnaround: at_least("turnaround time", turnaround, POST_TRANSMIT_TURNAROUND_MIN),
            response_window,
        }
    }
}
