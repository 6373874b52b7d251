use std::cell::Cell;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeDelta, Utc};

/// Milliseconds on a session's monotonic clock.
pub type Millis = f64;

/// Time source for a session.
///
/// `now` is monotonic and drives every latency; `wall` is only read when a
/// session starts or is saved.
pub trait Clock {
    fn now(&self) -> Millis;
    fn wall(&self) -> DateTime<Utc>;
}

/// Production clock backed by [`Instant`].
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Millis {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }

    fn wall(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to. Used to drive sessions in tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Cell<Duration>,
    wall_origin: DateTime<Utc>,
}

impl ManualClock {
    pub fn new(wall_origin: DateTime<Utc>) -> Self {
        Self {
            now: Cell::new(Duration::ZERO),
            wall_origin,
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }

    pub fn advance_ms(&self, ms: u64) {
        self.advance(Duration::from_millis(ms));
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(DateTime::UNIX_EPOCH)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Millis {
        self.now.get().as_secs_f64() * 1000.0
    }

    fn wall(&self) -> DateTime<Utc> {
        self.wall_origin + TimeDelta::from_std(self.now.get()).unwrap_or_default()
    }
}

impl<C: Clock + ?Sized> Clock for std::rc::Rc<C> {
    fn now(&self) -> Millis {
        (**self).now()
    }

    fn wall(&self) -> DateTime<Utc> {
        (**self).wall()
    }
}

/// Whole milliseconds between two readings, clamped at zero.
pub fn elapsed_ms(start: Millis, end: Millis) -> u64 {
    (end - start).max(0.0).round() as u64
}
