//! Monotonic time abstraction, grounded in the same `Clock` shape the rest of the
//! ecosystem uses for retry/timeout/cancellation accounting: a single trait exposing
//! `now`, so tests can inject a controllable clock instead of depending on wall time.

use std::fmt;
use std::time::{Duration, Instant};

/// A monotonic instant. Thin newtype over [`Instant`] so server code never imports
/// `std::time::Instant` directly and call sites read as domain vocabulary
/// (`MonotonicTime::now()`, `deadline.has_passed(now)`) rather than raw stdlib calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MonotonicTime(Instant);

impl MonotonicTime {
    pub fn now() -> Self {
        Self(Instant::now())
    }

    pub fn checked_add(self, duration: Duration) -> Option<Self> {
        self.0.checked_add(duration).map(Self)
    }

    pub fn saturating_duration_since(self, earlier: Self) -> Duration {
        self.0.saturating_duration_since(earlier.0)
    }

    pub fn has_passed(self, now: Self) -> bool {
        now.0 >= self.0
    }

    pub(crate) fn into_instant(self) -> Instant {
        self.0
    }
}

impl fmt::Display for MonotonicTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

/// Injectable clock. Production code uses [`SystemClock`]; tests inject
/// [`ManualClock`] to drive housekeeping and reverse-connect retry ticks
/// deterministically without sleeping real time.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> MonotonicTime;
}

/// Default clock backed by the OS monotonic timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> MonotonicTime {
        MonotonicTime::now()
    }
}

/// A clock that only advances when told to. Used by the reverse-connect and
/// housekeeping unit tests to assert exact tick boundaries.
#[derive(Debug)]
pub struct ManualClock {
    epoch: Instant,
    offset: std::sync::atomic::AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self { epoch: Instant::now(), offset: std::sync::atomic::AtomicU64::new(0) }
    }

    pub fn advance(&self, duration: Duration) {
        self.offset.fetch_add(duration.as_millis() as u64, std::sync::atomic::Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> MonotonicTime {
        let offset_ms = self.offset.load(std::sync::atomic::Ordering::SeqCst);
        MonotonicTime(self.epoch + Duration::from_millis(offset_ms))
    }
}
