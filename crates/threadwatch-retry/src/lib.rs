//! Error classification and the exponential-backoff retry loop (spec
//! section 4.2).

use std::fmt;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use threadwatch_core::cancel::CancellationToken;
use threadwatch_core::error::{ErrorClass, ThreadwatchError};
use threadwatch_core::ratelimit::RateLimitSnapshot;
use threadwatch_ratelimiter::RateLimiter;

#[cfg(feature = "metrics")]
use metrics::counter;

/// Classifies a raw Provider/transport error into a [`ErrorClass`].
///
/// Implemented per-Provider since what counts as transient (a 5xx, a
/// connection reset) is transport-specific; the retry loop itself is not.
pub trait ErrorClassifier<E>: Send + Sync {
    fn classify(&self, error: &E) -> ErrorClass;

    /// If `error` is an [`ErrorClass::RateLimited`] failure that embedded
    /// the Provider's rate-limit headers (e.g. a 403 response body), this
    /// extracts them so the retry loop can fold them into the
    /// [`RateLimiter`] before the next attempt. Defaults to `None`, in
    /// which case a rate-limited error falls back to the same exponential
    /// schedule as a transient one rather than busy-looping.
    fn rate_limit_snapshot(&self, _error: &E) -> Option<RateLimitSnapshot> {
        None
    }
}

/// A classifier built from a plain function, for callers who don't need a
/// stateful classifier type or per-error rate-limit snapshots.
impl<E, F> ErrorClassifier<E> for F
where
    F: Fn(&E) -> ErrorClass + Send + Sync,
{
    fn classify(&self, error: &E) -> ErrorClass {
        self(error)
    }
}

/// Configuration for [`retry`].
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub(crate) max_attempts: u32,
    pub(crate) base_delay: Duration,
    /// Decorrelated jitter on the exponential schedule (see SPEC_FULL.md
    /// §9 "Jitter"); off by default to keep the `base * 2^attempt`
    /// schedule exactly as spec.md 4.2 describes it.
    pub(crate) jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfigBuilder::new().build()
    }
}

/// Builder for [`RetryConfig`].
pub struct RetryConfigBuilder {
    max_attempts: u32,
    base_delay: Duration,
    jitter: bool,
}

impl Default for RetryConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryConfigBuilder {
    /// Defaults: 3 attempts, 200ms base delay, jitter off.
    pub fn new() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            jitter: false,
        }
    }

    /// Clamped to at least 1.
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn build(self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts.max(1),
            base_delay: self.base_delay,
            jitter: self.jitter,
        }
    }
}

fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exp = config.base_delay.as_secs_f64() * 2f64.powi(attempt as i32);
    if !config.jitter {
        return Duration::from_secs_f64(exp);
    }
    // Decorrelated jitter: uniform between base_delay and 3x the previous
    // exponential value, capped so it never shrinks below base_delay.
    let lo = config.base_delay.as_secs_f64();
    let hi = (exp * 3.0).max(lo);
    let jittered = rand::thread_rng().gen_range(lo..=hi);
    Duration::from_secs_f64(jittered)
}

/// Runs `operation` up to `config.max_attempts` times, classifying each
/// failure with `classifier`.
///
/// - [`ErrorClass::Fatal`] fails immediately, no retry.
/// - [`ErrorClass::RateLimited`] defers to `rate_limiter` (if given)
///   instead of the exponential schedule, per spec 4.2.
/// - [`ErrorClass::Transient`] sleeps `base * 2^attempt` (optionally
///   jittered) before the next attempt.
/// - Cancellation is honored at every sleep and short-circuits retries
///   immediately (spec 4.2, 5).
pub async fn retry<F, Fut, T, E>(
    cancel: &CancellationToken,
    config: &RetryConfig,
    classifier: &dyn ErrorClassifier<E>,
    rate_limiter: Option<&RateLimiter>,
    mut operation: F,
) -> Result<T, ThreadwatchError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let mut attempt = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err(ThreadwatchError::Cancelled);
        }

        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let class = classifier.classify(&err);
                #[cfg(feature = "metrics")]
                counter!("threadwatch_retry_attempts_total", "class" => class.to_string()).increment(1);

                let is_last_attempt = attempt + 1 >= config.max_attempts;

                match class {
                    ErrorClass::Fatal => return Err(ThreadwatchError::Fatal(err)),
                    ErrorClass::RateLimited => {
                        if is_last_attempt {
                            return Err(ThreadwatchError::RateLimited { retry_after: None });
                        }
                        match (rate_limiter, classifier.rate_limit_snapshot(&err)) {
                            (Some(limiter), Some(snapshot)) => {
                                // Fold the disclosed reset time into the limiter,
                                // then let its own acquire() do the waiting —
                                // this bypasses the exponential schedule
                                // entirely, per spec 4.2.
                                limiter.observe(snapshot);
                                limiter.acquire::<E>(cancel).await?;
                            }
                            _ => {
                                // No disclosed reset time: fall back to the
                                // exponential schedule rather than busy-loop.
                                let delay = backoff_delay(config, attempt);
                                tokio::select! {
                                    biased;
                                    _ = cancel.cancelled() => return Err(ThreadwatchError::Cancelled),
                                    _ = tokio::time::sleep(delay) => {}
                                }
                            }
                        }
                    }
                    ErrorClass::Transient => {
                        if is_last_attempt {
                            return Err(ThreadwatchError::Transient(err.to_string()));
                        }
                        let delay = backoff_delay(config, attempt);
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => return Err(ThreadwatchError::Cancelled),
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }

                attempt += 1;
            }
        }
    }
}
