//! Cooperative cancellation token shared by every long-running component
//! (spec section 5: "parallel preemptive with explicit cooperative
//! cancellation tokens").

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// A cheaply cloneable cancellation signal.
///
/// Every blocking/suspension point named in spec section 5 (rate limiter
/// acquire, retry sleeps, semaphore acquires, channel send/receive) takes
/// a `&CancellationToken` and races it against its own wait.
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signals cancellation to every clone and every pending `cancelled()`
    /// waiter.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once [`Self::cancel`] has been called. Resolves
    /// immediately if it already was.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        // Re-check after registering the waiter to close the race between
        // the initial check above and `cancel()` firing before we start
        // waiting.
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }

    /// Runs `fut` to completion, or returns `None` if cancelled first.
    pub async fn run_until_cancelled<F: std::future::Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.cancelled() => None,
            out = fut => Some(out),
        }
    }
}
