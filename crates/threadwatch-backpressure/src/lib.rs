//! Adaptive [`BackpressureController`] with dynamic concurrency limits
//! (spec section 4.8).

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use threadwatch_core::cancel::CancellationToken;
use threadwatch_core::error::ThreadwatchError;

#[cfg(feature = "metrics")]
use metrics::gauge;

/// How often [`BackpressureController::acquire`] polls for a free slot
/// while queued. Spec section 9 notes this is a deliberate simplification
/// of a semaphore-with-queue; a condition variable or capacity channel
/// would also satisfy the queue-full rejection semantic.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Configuration for a [`BackpressureController`].
#[derive(Debug, Clone, Copy)]
pub struct BackpressureConfig {
    pub(crate) initial_max_concurrent: usize,
    pub(crate) min_concurrent: usize,
    pub(crate) max_concurrent_hard_limit: usize,
    pub(crate) max_queue_size: usize,
    pub(crate) adjustment_interval: Duration,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        BackpressureConfigBuilder::new().build()
    }
}

/// Builder for [`BackpressureConfig`].
pub struct BackpressureConfigBuilder {
    initial_max_concurrent: usize,
    min_concurrent: usize,
    max_concurrent_hard_limit: usize,
    max_queue_size: usize,
    adjustment_interval: Duration,
}

impl Default for BackpressureConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BackpressureConfigBuilder {
    /// Defaults: start at 5 concurrent, floor 1, hard ceiling 50, queue of
    /// 100, adjust at most once every 5 seconds.
    pub fn new() -> Self {
        Self {
            initial_max_concurrent: 5,
            min_concurrent: 1,
            max_concurrent_hard_limit: 50,
            max_queue_size: 100,
            adjustment_interval: Duration::from_secs(5),
        }
    }

    pub fn initial_max_concurrent(mut self, n: usize) -> Self {
        self.initial_max_concurrent = n;
        self
    }

    pub fn min_concurrent(mut self, n: usize) -> Self {
        self.min_concurrent = n;
        self
    }

    pub fn max_concurrent_hard_limit(mut self, n: usize) -> Self {
        self.max_concurrent_hard_limit = n;
        self
    }

    pub fn max_queue_size(mut self, n: usize) -> Self {
        self.max_queue_size = n;
        self
    }

    pub fn adjustment_interval(mut self, d: Duration) -> Self {
        self.adjustment_interval = d;
        self
    }

    pub fn build(self) -> BackpressureConfig {
        let min = self.min_concurrent.max(1);
        let hard_limit = self.max_concurrent_hard_limit.max(min);
        BackpressureConfig {
            initial_max_concurrent: self.initial_max_concurrent.clamp(min, hard_limit),
            min_concurrent: min,
            max_concurrent_hard_limit: hard_limit,
            max_queue_size: self.max_queue_size,
            adjustment_interval: self.adjustment_interval,
        }
    }
}

#[derive(Default)]
struct RollingCounters {
    success: AtomicUsize,
    failure: AtomicUsize,
    rejection: AtomicUsize,
}

/// Adaptive admission-control gate: bounds concurrent in-flight work and
/// rejects excess queued work (spec section 4.8).
///
/// Invariant maintained at every observation: `current_concurrent <=
/// max_concurrent <= max_concurrent_hard_limit` and `min_concurrent <=
/// max_concurrent` (spec section 3).
pub struct BackpressureController {
    config: BackpressureConfig,
    current_concurrent: AtomicUsize,
    max_concurrent: AtomicUsize,
    current_queue_size: AtomicUsize,
    counters: RollingCounters,
    last_adjustment: Mutex<Instant>,
}

/// Held while a unit of work runs; releases its slot on [`Self::release`]
/// or, if dropped without one, releases as a failure so a forgotten
/// permit never leaks a slot.
pub struct BackpressurePermit<'a> {
    controller: &'a BackpressureController,
    released: bool,
}

impl Drop for BackpressurePermit<'_> {
    fn drop(&mut self) {
        if !self.released {
            self.controller.release(false);
        }
    }
}

impl BackpressurePermit<'_> {
    /// Releases the slot, reporting whether the unit of work succeeded.
    pub fn release(mut self, success: bool) {
        self.released = true;
        self.controller.release(success);
    }
}

impl BackpressureController {
    pub fn new(config: BackpressureConfig) -> Self {
        let now = Instant::now();
        Self {
            current_concurrent: AtomicUsize::new(0),
            max_concurrent: AtomicUsize::new(config.initial_max_concurrent),
            current_queue_size: AtomicUsize::new(0),
            counters: RollingCounters::default(),
            last_adjustment: Mutex::new(now),
            config,
        }
    }

    pub fn builder() -> BackpressureConfigBuilder {
        BackpressureConfigBuilder::new()
    }

    pub fn current_concurrent(&self) -> usize {
        self.current_concurrent.load(Ordering::SeqCst)
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent.load(Ordering::SeqCst)
    }

    pub fn current_queue_size(&self) -> usize {
        self.current_queue_size.load(Ordering::SeqCst)
    }

    /// Attempts to admit one unit of work.
    ///
    /// If a concurrency slot is free, admits immediately. Otherwise,
    /// if the queue has room, increments the queue size and polls for a
    /// free slot; if the queue is full, increments the rejection counter
    /// and returns `None` immediately (spec section 4.8).
    pub async fn acquire<E>(&self, cancel: &CancellationToken) -> Result<Option<BackpressurePermit<'_>>, ThreadwatchError<E>> {
        if self.try_take_slot() {
            return Ok(Some(BackpressurePermit {
                controller: self,
                released: false,
            }));
        }

        if self.current_queue_size.load(Ordering::SeqCst) >= self.config.max_queue_size {
            self.counters.rejection.fetch_add(1, Ordering::SeqCst);
            return Ok(None);
        }

        self.current_queue_size.fetch_add(1, Ordering::SeqCst);
        let result = loop {
            if cancel.is_cancelled() {
                break Err(ThreadwatchError::Cancelled);
            }
            if self.try_take_slot() {
                break Ok(Some(BackpressurePermit {
                    controller: self,
                    released: false,
                }));
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break Err(ThreadwatchError::Cancelled),
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
            }
        };
        self.current_queue_size.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn try_take_slot(&self) -> bool {
        let max = self.max_concurrent.load(Ordering::SeqCst);
        self.current_concurrent
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                if current < max {
                    Some(current + 1)
                } else {
                    None
                }
            })
            .is_ok()
    }

    /// Releases a slot taken by [`Self::acquire`] and records the
    /// outcome, then runs the adaptive adjustment if due.
    fn release(&self, success: bool) {
        self.current_concurrent.fetch_sub(1, Ordering::SeqCst);
        if success {
            self.counters.success.fetch_add(1, Ordering::SeqCst);
        } else {
            self.counters.failure.fetch_add(1, Ordering::SeqCst);
        }
        self.maybe_adjust();
    }

    fn maybe_adjust(&self) {
        let mut last = self.last_adjustment.lock().unwrap();
        if last.elapsed() < self.config.adjustment_interval {
            return;
        }
        *last = Instant::now();
        drop(last);

        let success = self.counters.success.swap(0, Ordering::SeqCst) as f64;
        let failure = self.counters.failure.swap(0, Ordering::SeqCst) as f64;
        let rejection = self.counters.rejection.swap(0, Ordering::SeqCst) as f64;

        let total = success + failure;
        if total == 0.0 && rejection == 0.0 {
            return;
        }
        let rate = if total > 0.0 { success / total } else { 0.0 };
        let rejection_rate = if total + rejection > 0.0 {
            rejection / (total + rejection)
        } else {
            0.0
        };

        let current_max = self.max_concurrent.load(Ordering::SeqCst);
        let next_max = if rate > 0.95 && rejection_rate > 0.10 && current_max < self.config.max_concurrent_hard_limit {
            current_max + 1
        } else if rate < 0.80 && current_max > self.config.min_concurrent {
            current_max - 1
        } else {
            current_max
        };

        if next_max != current_max {
            self.max_concurrent.store(next_max, Ordering::SeqCst);
            #[cfg(feature = "tracing")]
            tracing::debug!(previous = current_max, next = next_max, rate, rejection_rate, "backpressure concurrency adjusted");
        }

        #[cfg(feature = "metrics")]
        {
            gauge!("threadwatch_backpressure_max_concurrent").set(self.max_concurrent() as f64);
            gauge!("threadwatch_backpressure_current_concurrent").set(self.current_concurrent() as f64);
        }
    }

    /// Standard wrapper: acquire a slot, run `fut`, release reporting
    /// whether it returned `Ok`. Returns [`ThreadwatchError::Cancelled`]
    /// if rejected or cancelled while queued (spec section 4.8).
    pub async fn with_backpressure<F, Fut, T, E>(&self, cancel: &CancellationToken, fut: F) -> Result<T, ThreadwatchError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = self.acquire(cancel).await?;
        let Some(permit) = permit else {
            return Err(ThreadwatchError::Cancelled);
        };
        let result = fut().await;
        permit.release(result.is_ok());
        result.map_err(ThreadwatchError::Fatal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_admits_up_to_max_concurrent() {
        let controller = BackpressureController::new(
            BackpressureController::builder().initial_max_concurrent(2).build(),
        );
        let cancel = CancellationToken::new();
        let p1 = controller.acquire::<()>(&cancel).await.unwrap();
        let p2 = controller.acquire::<()>(&cancel).await.unwrap();
        assert!(p1.is_some());
        assert!(p2.is_some());
        assert_eq!(controller.current_concurrent(), 2);
    }

    #[tokio::test]
    async fn full_queue_rejects_immediately() {
        let controller = BackpressureController::new(
            BackpressureController::builder()
                .initial_max_concurrent(1)
                .max_queue_size(0)
                .build(),
        );
        let cancel = CancellationToken::new();
        let _permit = controller.acquire::<()>(&cancel).await.unwrap().unwrap();
        let rejected = controller.acquire::<()>(&cancel).await.unwrap();
        assert!(rejected.is_none());
    }

    #[tokio::test]
    async fn dropping_a_permit_without_release_counts_as_failure_and_frees_the_slot() {
        let controller = BackpressureController::new(
            BackpressureController::builder().initial_max_concurrent(1).build(),
        );
        let cancel = CancellationToken::new();
        {
            let _permit = controller.acquire::<()>(&cancel).await.unwrap().unwrap();
        }
        assert_eq!(controller.current_concurrent(), 0);
    }

    #[tokio::test]
    async fn invariants_hold_after_construction() {
        let controller = BackpressureController::new(
            BackpressureController::builder()
                .min_concurrent(2)
                .initial_max_concurrent(1)
                .max_concurrent_hard_limit(10)
                .build(),
        );
        assert!(controller.current_concurrent() <= controller.max_concurrent());
        assert!(controller.max_concurrent() <= 10);
        assert!(controller.max_concurrent() >= 2);
    }
}
