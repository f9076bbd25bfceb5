use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::time::{Duration, Instant};

pub const DEFAULT_WATCHDOG: Duration = Duration::from_secs(5);

/// Monotonic time source for deadlines.
pub trait Clock {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Cell<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        ManualClock {
            origin: Instant::now(),
            offset: Cell::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.offset.set(self.offset.get() + by);
    }

    pub fn elapsed(&self) -> Duration {
        self.offset.get()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.offset.get()
    }
}

/// Hands out a deadline per resume.
#[derive(Clone)]
pub struct Watchdog {
    budget: Duration,
    clock: Rc<dyn Clock>,
}

impl Watchdog {
    pub fn new(budget: Duration, clock: Rc<dyn Clock>) -> Self {
        Watchdog { budget, clock }
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn arm(&self) -> Deadline {
        Deadline {
            at: self.clock.now() + self.budget,
            clock: self.clock.clone(),
        }
    }
}

impl Default for Watchdog {
    fn default() -> Self {
        Watchdog::new(DEFAULT_WATCHDOG, Rc::new(SystemClock))
    }
}

impl fmt::Debug for Watchdog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watchdog")
            .field("budget", &self.budget)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct Deadline {
    at: Instant,
    clock: Rc<dyn Clock>,
}

impl Deadline {
    pub fn is_expired(&self) -> bool {
        self.clock.now() >= self.at
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(self.clock.now())
    }
}

impl fmt::Debug for Deadline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deadline")
            .field("remaining", &self.remaining())
            .finish()
    }
}
