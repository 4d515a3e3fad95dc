//! Token-bucket [`RateLimiter`] gating every outbound Provider request
//! (spec section 4.1).

use std::sync::Mutex;
use std::time::{Duration, Instant};

use threadwatch_core::cancel::CancellationToken;
use threadwatch_core::error::ThreadwatchError;
use threadwatch_core::ratelimit::RateLimitSnapshot;

#[cfg(feature = "metrics")]
use metrics::counter;

/// Configuration for a [`RateLimiter`].
#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    pub(crate) requests_per_second: f64,
    pub(crate) burst: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        RateLimiterConfigBuilder::new().build()
    }
}

/// Builder for [`RateLimiterConfig`].
pub struct RateLimiterConfigBuilder {
    requests_per_second: f64,
    burst: u32,
}

impl Default for RateLimiterConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiterConfigBuilder {
    /// Defaults: 5 requests/second, burst of 5.
    pub fn new() -> Self {
        Self {
            requests_per_second: 5.0,
            burst: 5,
        }
    }

    pub fn requests_per_second(mut self, rate: f64) -> Self {
        self.requests_per_second = rate;
        self
    }

    pub fn burst(mut self, burst: u32) -> Self {
        self.burst = burst;
        self
    }

    pub fn build(self) -> RateLimiterConfig {
        RateLimiterConfig {
            requests_per_second: self.requests_per_second,
            burst: self.burst.max(1),
        }
    }
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
    /// Set by [`RateLimiter::observe`] when the Provider discloses
    /// `remaining == 0`; pending and future acquirers wait until this
    /// instant regardless of locally tracked tokens.
    forced_wait_until: Option<Instant>,
}

/// Token-bucket rate limiter.
///
/// `acquire` blocks the caller until a token is available or the given
/// [`CancellationToken`] fires. `observe` folds Provider rate-limit
/// headers back into the bucket so a disclosed `remaining == 0` delays
/// every pending acquirer until `reset`, even if the local bucket still
/// thinks it has tokens (spec section 4.1).
pub struct RateLimiter {
    config: RateLimiterConfig,
    state: Mutex<BucketState>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            state: Mutex::new(BucketState {
                tokens: config.burst as f64,
                last_refill: Instant::now(),
                forced_wait_until: None,
            }),
        }
    }

    pub fn builder() -> RateLimiterConfigBuilder {
        RateLimiterConfigBuilder::new()
    }

    /// Blocks until a token is available, honoring cancellation.
    ///
    /// Returns [`ThreadwatchError::Cancelled`] if `cancel` fires before a
    /// token becomes available.
    pub async fn acquire<E>(&self, cancel: &CancellationToken) -> Result<(), ThreadwatchError<E>> {
        loop {
            if cancel.is_cancelled() {
                return Err(ThreadwatchError::Cancelled);
            }

            let wait = {
                let mut state = self.state.lock().unwrap();
                self.refill(&mut state);

                if let Some(until) = state.forced_wait_until {
                    let now = Instant::now();
                    if now < until {
                        Some(until - now)
                    } else {
                        state.forced_wait_until = None;
                        None
                    }
                } else if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    #[cfg(feature = "metrics")]
                    counter!("threadwatch_ratelimiter_permits_total").increment(1);
                    return Ok(());
                } else {
                    let deficit = 1.0 - state.tokens;
                    let seconds = deficit / self.config.requests_per_second.max(f64::MIN_POSITIVE);
                    Some(Duration::from_secs_f64(seconds.max(0.0)))
                }
            };

            let Some(wait) = wait else {
                continue;
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ThreadwatchError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Folds a Provider rate-limit snapshot into the bucket. When
    /// `snapshot.remaining == 0`, every acquirer is delayed until
    /// `snapshot.reset_epoch_secs`.
    pub fn observe(&self, snapshot: RateLimitSnapshot) {
        if snapshot.is_exhausted() {
            let wait = snapshot.wait_until_reset(std::time::SystemTime::now());
            let mut state = self.state.lock().unwrap();
            state.forced_wait_until = Some(Instant::now() + wait);
            #[cfg(feature = "tracing")]
            tracing::warn!(wait_secs = wait.as_secs(), "rate limit exhausted, deferring acquirers");
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.config.requests_per_second)
            .min(self.config.burst as f64);
        state.last_refill = now;
    }
}
