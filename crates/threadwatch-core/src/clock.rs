//! `Clock`: the sole source of "now" (spec section 6).
//!
//! Every component that computes ages, deadlines, or cache expiry goes
//! through a `Clock` instead of calling `Utc::now()`/`Instant::now()`
//! directly, so tests can inject a fixed or steppable clock.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

/// Supplies wall-clock and monotonic time.
pub trait Clock: Send + Sync {
    /// Current wall-clock time, used for notification ages and action
    /// timestamps.
    fn now_utc(&self) -> DateTime<Utc>;

    /// Current monotonic instant, used for interval/backoff arithmetic
    /// that must never go backwards.
    fn now_monotonic(&self) -> Instant;
}

/// The real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn now_monotonic(&self) -> Instant {
        Instant::now()
    }
}

/// A clock tests can set to an arbitrary wall-clock time.
///
/// Monotonic time still advances with the real clock (`Instant` cannot be
/// forged), so this is meant for assertions about `updated_at`/age
/// comparisons, not for controlling `tokio::time` sleeps — use
/// `tokio::time::pause`/`advance` for that.
pub struct FixedClock {
    millis_since_epoch: AtomicI64,
}

impl FixedClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self {
            millis_since_epoch: AtomicI64::new(at.timestamp_millis()),
        }
    }

    /// Moves the clock's wall-clock reading forward by `delta`.
    pub fn advance(&self, delta: chrono::Duration) {
        self.millis_since_epoch
            .fetch_add(delta.num_milliseconds(), Ordering::SeqCst);
    }

    pub fn set(&self, at: DateTime<Utc>) {
        self.millis_since_epoch.store(at.timestamp_millis(), Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_utc(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.millis_since_epoch.load(Ordering::SeqCst))
            .unwrap_or_else(Utc::now)
    }

    fn now_monotonic(&self) -> Instant {
        Instant::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_advances_by_delta() {
        let start = Utc::now();
        let clock = FixedClock::new(start);
        clock.advance(chrono::Duration::seconds(30));
        assert_eq!((clock.now_utc() - start).num_seconds(), 30);
    }
}
