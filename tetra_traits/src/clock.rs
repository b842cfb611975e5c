//! Time seams for the device loop and the bridge.
//!
//! Both loops read time only through [`Clock`], so tests and the accelerated
//! simulation can drive them with a manually advanced clock.

use std::thread;
use std::time::{Duration, Instant};

pub trait Clock {
    fn now(&self) -> Instant;
    /// Block for `d`, or advance simulated time by `d`.
    fn sleep(&self, d: Duration);

    /// Time since `earlier`, zero if `earlier` is in the future.
    fn elapsed_since(&self, earlier: Instant) -> Duration {
        self.now().saturating_duration_since(earlier)
    }
}

/// Wall-clock time from `std::time::Instant`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl MonotonicClock {
    #[inline]
    pub fn new() -> Self {
        Self
    }
}

impl Clock for MonotonicClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }

    #[inline]
    fn sleep(&self, d: Duration) {
        if !d.is_zero() {
            thread::sleep(d);
        }
    }
}

/// Fixed-period trigger for periodic work (status lines, bridge passes).
///
/// The first check is always due. Checking and marking are separate so a
/// caller can skip a due slot without consuming it.
#[derive(Debug, Clone)]
pub struct Cadence {
    period: Duration,
    last: Option<Instant>,
}

impl Cadence {
    pub fn new(period: Duration) -> Self {
        Self { period, last: None }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn last(&self) -> Option<Instant> {
        self.last
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.last
            .is_none_or(|t| now.saturating_duration_since(t) >= self.period)
    }

    pub fn mark(&mut self, now: Instant) {
        self.last = Some(now);
    }

    /// `is_due` followed by `mark` when it was.
    pub fn fire(&mut self, now: Instant) -> bool {
        let due = self.is_due(now);
        if due {
            self.mark(now);
        }
        due
    }
}

#[cfg(any(test, feature = "test-clock"))]
pub mod test_clock {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Manually advanced clock. `sleep` advances time instead of blocking,
    /// and clones share one timeline.
    #[derive(Debug, Clone)]
    pub struct TestClock {
        origin: Instant,
        elapsed_ns: Arc<AtomicU64>,
    }

    impl Default for TestClock {
        fn default() -> Self {
            Self::new()
        }
    }

    impl TestClock {
        pub fn new() -> Self {
            Self {
                origin: Instant::now(),
                elapsed_ns: Arc::new(AtomicU64::new(0)),
            }
        }

        pub fn advance(&self, d: Duration) {
            let ns = u64::try_from(d.as_nanos()).unwrap_or(u64::MAX);
            let _ = self
                .elapsed_ns
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |cur| {
                    Some(cur.saturating_add(ns))
                });
        }

        /// Simulated time since the clock was created.
        pub fn elapsed(&self) -> Duration {
            Duration::from_nanos(self.elapsed_ns.load(Ordering::SeqCst))
        }
    }

    impl Clock for TestClock {
        fn now(&self) -> Instant {
            self.origin + self.elapsed()
        }

        fn sleep(&self, d: Duration) {
            self.advance(d);
        }
    }
}
