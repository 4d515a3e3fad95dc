//! Unified error type for threadwatch components.
//!
//! Mirrors the shape of a resilience-pattern aggregate error: rather than
//! every crate hand-writing `From` impls to compose a fetcher, a retry
//! policy, and a rate limiter into one error type, each kind of failure
//! named in spec section 7 gets one variant here and the helper predicates
//! below let callers branch on category without matching the whole enum.

use std::fmt;
use std::time::Duration;

/// Error categories shared by every threadwatch component.
///
/// `E` is the application/transport error type a [`Provider`](crate::Provider)
/// implementation raises; it is preserved verbatim in the [`Fatal`](ThreadwatchError::Fatal)
/// variant instead of being stringified, so callers can still downcast or
/// inspect it.
#[derive(Debug, thiserror::Error)]
pub enum ThreadwatchError<E> {
    /// The requested entity does not exist.
    #[error("not found")]
    NotFound,

    /// The operation was cancelled via its cancellation token.
    #[error("cancelled")]
    Cancelled,

    /// A batch or multi-page fetch completed with some, but not all, units
    /// failing. Carries the count of failed units for observability.
    #[error("partial failure ({failed_count} unit(s) failed)")]
    PartialFailure {
        /// Number of failed units in the batch/fetch.
        failed_count: usize,
    },

    /// The provider signalled throttling; retry after the given duration
    /// once known.
    #[error("rate limited{}", retry_after.map(|d| format!(", retry after {d:?}")).unwrap_or_default())]
    RateLimited {
        /// How long to wait before retrying, if the provider disclosed it.
        retry_after: Option<Duration>,
    },

    /// No credentials, or credentials the provider rejected.
    #[error("not authenticated")]
    NotAuthenticated,

    /// A transient (network/5xx) failure eligible for retry, surfaced only
    /// after retries are exhausted.
    #[error("transient error: {0}")]
    Transient(String),

    /// Every other failure, including the wrapped application error.
    #[error("fatal error: {0}")]
    Fatal(E),
}

impl<E> ThreadwatchError<E> {
    /// True for [`Self::RateLimited`].
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// True for [`Self::Cancelled`].
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// True for [`Self::Transient`].
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// True for [`Self::PartialFailure`].
    pub fn is_partial_failure(&self) -> bool {
        matches!(self, Self::PartialFailure { .. })
    }

    /// True for [`Self::Fatal`].
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }

    /// Extracts the wrapped application error, if this is [`Self::Fatal`].
    pub fn into_fatal(self) -> Option<E> {
        match self {
            Self::Fatal(e) => Some(e),
            _ => None,
        }
    }

    /// Maps the wrapped application error, leaving every other variant
    /// untouched.
    pub fn map_fatal<F, T>(self, f: F) -> ThreadwatchError<T>
    where
        F: FnOnce(E) -> T,
    {
        match self {
            Self::NotFound => ThreadwatchError::NotFound,
            Self::Cancelled => ThreadwatchError::Cancelled,
            Self::PartialFailure { failed_count } => ThreadwatchError::PartialFailure { failed_count },
            Self::RateLimited { retry_after } => ThreadwatchError::RateLimited { retry_after },
            Self::NotAuthenticated => ThreadwatchError::NotAuthenticated,
            Self::Transient(msg) => ThreadwatchError::Transient(msg),
            Self::Fatal(e) => ThreadwatchError::Fatal(f(e)),
        }
    }
}

/// How [`crate::error::classify`] callers should retry, if at all.
///
/// Produced by a `RetryPolicy` classifier (see `threadwatch-retry`) from
/// a raw provider error; kept here so `ThreadwatchError` and the
/// classifier can agree on vocabulary without a dependency cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Eligible for retry with exponential backoff.
    Transient,
    /// Eligible for retry, but governed by the rate limiter's reset time
    /// rather than the exponential schedule.
    RateLimited,
    /// Not eligible for retry.
    Fatal,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::RateLimited => write!(f, "rate_limited"),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}
