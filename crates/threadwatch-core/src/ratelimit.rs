//! Rate-limit state as disclosed by the Provider on every response
//! (spec section 3, "RateLimit state").

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A point-in-time snapshot of the Provider's rate-limit headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitSnapshot {
    pub remaining: i64,
    pub limit: i64,
    /// Seconds since the Unix epoch at which `remaining` resets.
    pub reset_epoch_secs: i64,
}

impl RateLimitSnapshot {
    /// How long to wait until `reset_epoch_secs`, relative to `now`.
    ///
    /// Returns `Duration::ZERO` if `reset_epoch_secs` is already in the
    /// past relative to `now`.
    pub fn wait_until_reset(&self, now: SystemTime) -> Duration {
        let reset = UNIX_EPOCH + Duration::from_secs(self.reset_epoch_secs.max(0) as u64);
        reset.duration_since(now).unwrap_or(Duration::ZERO)
    }

    /// True once `remaining` has hit zero; callers must wait for reset.
    pub fn is_exhausted(&self) -> bool {
        self.remaining <= 0
    }

    /// Parses a snapshot out of case-insensitive header names
    /// `x-ratelimit-remaining`, `x-ratelimit-limit`, `x-ratelimit-reset`.
    /// Returns `None` if any of the three is missing or unparseable,
    /// rather than guessing at a partial snapshot.
    pub fn from_headers(headers: &HashMap<String, String>) -> Option<Self> {
        let lookup = |name: &str| -> Option<i64> {
            headers.iter().find_map(|(k, v)| {
                if k.eq_ignore_ascii_case(name) {
                    v.trim().parse::<i64>().ok()
                } else {
                    None
                }
            })
        };

        Some(Self {
            remaining: lookup("x-ratelimit-remaining")?,
            limit: lookup("x-ratelimit-limit")?,
            reset_epoch_secs: lookup("x-ratelimit-reset")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn parses_canonical_headers() {
        let h = headers(&[
            ("X-RateLimit-Remaining", "10"),
            ("X-RateLimit-Limit", "100"),
            ("X-RateLimit-Reset", "1700000000"),
        ]);
        let snap = RateLimitSnapshot::from_headers(&h).unwrap();
        assert_eq!(snap.remaining, 10);
        assert_eq!(snap.limit, 100);
        assert_eq!(snap.reset_epoch_secs, 1700000000);
    }

    #[test]
    fn missing_header_yields_none() {
        let h = headers(&[("X-RateLimit-Remaining", "10")]);
        assert!(RateLimitSnapshot::from_headers(&h).is_none());
    }

    #[test]
    fn is_exhausted_at_zero_remaining() {
        let snap = RateLimitSnapshot {
            remaining: 0,
            limit: 100,
            reset_epoch_secs: 0,
        };
        assert!(snap.is_exhausted());
    }

    #[test]
    fn wait_until_reset_is_zero_once_past() {
        let snap = RateLimitSnapshot {
            remaining: 0,
            limit: 100,
            reset_epoch_secs: 0,
        };
        assert_eq!(snap.wait_until_reset(SystemTime::now()), Duration::ZERO);
    }
}
