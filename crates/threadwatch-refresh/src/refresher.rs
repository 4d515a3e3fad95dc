//! Background polling loop (spec section 4.6).

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;

use threadwatch_core::cache::ResponseCache;
use threadwatch_core::cancel::CancellationToken;
use threadwatch_core::events::{Event, Listener, ListenerSet};
use threadwatch_core::model::SharedNotification;
use threadwatch_core::provider::{NotificationOptions, Provider};
use threadwatch_ratelimiter::RateLimiter;
use threadwatch_retry::{ErrorClassifier, RetryConfig};

#[cfg(feature = "tracing")]
use tracing::warn;

/// Dispatched after every refresh that successfully swapped the snapshot.
#[derive(Debug, Clone)]
pub struct RefreshUpdate {
    pub notifications: Vec<SharedNotification>,
    timestamp: Instant,
}

impl Event for RefreshUpdate {
    fn kind(&self) -> &'static str {
        "refresh_update"
    }

    fn timestamp(&self) -> Instant {
        self.timestamp
    }
}

/// Configuration for a [`BackgroundRefresher`].
#[derive(Debug, Clone)]
pub struct RefresherConfig {
    pub(crate) interval: std::time::Duration,
    pub(crate) initial_delay: std::time::Duration,
}

impl Default for RefresherConfig {
    fn default() -> Self {
        RefresherConfigBuilder::new().build()
    }
}

/// Builder for [`RefresherConfig`].
pub struct RefresherConfigBuilder {
    interval: std::time::Duration,
    initial_delay: std::time::Duration,
}

impl Default for RefresherConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RefresherConfigBuilder {
    /// Defaults: refresh every 60 seconds, no delay before the first one.
    pub fn new() -> Self {
        Self {
            interval: std::time::Duration::from_secs(60),
            initial_delay: std::time::Duration::ZERO,
        }
    }

    pub fn interval(mut self, interval: std::time::Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn initial_delay(mut self, delay: std::time::Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn build(self) -> RefresherConfig {
        RefresherConfig {
            interval: self.interval,
            initial_delay: self.initial_delay,
        }
    }
}

/// Background polling loop over [`threadwatch_fetch::fetch_all`] plus
/// best-effort detail enrichment (spec 4.6).
///
/// State machine with two states, Stopped and Running, modeled after the
/// start/stop/background-task-handle shape of a health check wrapper:
/// `start()` spawns a ticking task holding the only handle to it, `stop()`
/// cancels and joins that task, and dropping the refresher still running
/// aborts it outright.
pub struct BackgroundRefresher<P, C>
where
    P: Provider + Send + Sync + 'static,
    P::Error: std::fmt::Display + Send + Sync + 'static,
    C: ResponseCache + Send + Sync + 'static,
{
    provider: Arc<P>,
    cache: Option<Arc<C>>,
    rate_limiter: Arc<RateLimiter>,
    retry_config: RetryConfig,
    classifier: Arc<dyn ErrorClassifier<P::Error> + Send + Sync>,
    opts: Arc<RwLock<NotificationOptions>>,
    config: RefresherConfig,
    listeners: Arc<RwLock<ListenerSet<RefreshUpdate>>>,

    snapshot: Arc<RwLock<Vec<SharedNotification>>>,
    last_error: Arc<RwLock<Option<String>>>,
    force_refresh: Arc<Notify>,
    loop_cancel: Arc<RwLock<Option<CancellationToken>>>,
    task: Arc<RwLock<Option<JoinHandle<()>>>>,
}

impl<P, C> BackgroundRefresher<P, C>
where
    P: Provider + Send + Sync + 'static,
    P::Error: std::fmt::Display + Send + Sync + 'static,
    C: ResponseCache + Send + Sync + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        provider: Arc<P>,
        cache: Option<Arc<C>>,
        rate_limiter: Arc<RateLimiter>,
        retry_config: RetryConfig,
        classifier: Arc<dyn ErrorClassifier<P::Error> + Send + Sync>,
        opts: NotificationOptions,
        config: RefresherConfig,
    ) -> Self {
        Self {
            provider,
            cache,
            rate_limiter,
            retry_config,
            classifier,
            opts: Arc::new(RwLock::new(opts)),
            config,
            listeners: Arc::new(RwLock::new(ListenerSet::new())),
            snapshot: Arc::new(RwLock::new(Vec::new())),
            last_error: Arc::new(RwLock::new(None)),
            force_refresh: Arc::new(Notify::new()),
            loop_cancel: Arc::new(RwLock::new(None)),
            task: Arc::new(RwLock::new(None)),
        }
    }

    /// Registers a listener invoked after every refresh that swapped the
    /// snapshot.
    pub async fn on_update<L>(&self, listener: L)
    where
        L: Listener<RefreshUpdate> + 'static,
    {
        self.listeners.write().await.add(listener);
    }

    /// Stopped → Running: spawns the polling loop. An initial refresh runs
    /// (after `initial_delay`), then one every `interval` thereafter. A
    /// no-op if already running.
    pub async fn start(&self) {
        let mut task_lock = self.task.write().await;
        if task_lock.is_some() {
            return;
        }

        let provider = Arc::clone(&self.provider);
        let cache = self.cache.clone();
        let rate_limiter = Arc::clone(&self.rate_limiter);
        let retry_config = self.retry_config.clone();
        let classifier = Arc::clone(&self.classifier);
        let opts = Arc::clone(&self.opts);
        let snapshot = Arc::clone(&self.snapshot);
        let last_error = Arc::clone(&self.last_error);
        let listeners = Arc::clone(&self.listeners);
        let force_refresh = Arc::clone(&self.force_refresh);
        let initial_delay = self.config.initial_delay;
        let interval_duration = self.config.interval;
        let cancel = CancellationToken::new();
        *self.loop_cancel.write().await = Some(cancel.clone());

        let handle = tokio::spawn(async move {
            tokio::time::sleep(initial_delay).await;

            let mut interval = tokio::time::interval(interval_duration);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {}
                    _ = force_refresh.notified() => {}
                }

                let current_opts = opts.read().await.clone();
                match crate::common::fetch_snapshot(
                    provider.as_ref(),
                    cache.as_deref(),
                    &rate_limiter,
                    &retry_config,
                    classifier.as_ref(),
                    &cancel,
                    &current_opts,
                )
                .await
                {
                    Ok(fresh) => {
                        {
                            let mut guard = snapshot.write().await;
                            *guard = fresh.clone();
                        }
                        *last_error.write().await = None;
                        listeners.read().await.emit(&RefreshUpdate { notifications: fresh, timestamp: Instant::now() });
                    }
                    Err(message) => {
                        #[cfg(feature = "tracing")]
                        warn!(error = %message, "background refresh failed");
                        *last_error.write().await = Some(message);
                    }
                }
            }
        });

        *task_lock = Some(handle);
    }

    /// Running → Stopped: signals the loop's cancellation token and awaits
    /// the current refresh (if any) before returning. A no-op if already
    /// stopped.
    pub async fn stop(&self) {
        if let Some(cancel) = self.loop_cancel.write().await.take() {
            cancel.cancel();
        }
        self.join().await;
    }

    /// Awaits the polling loop's task handle without signaling
    /// cancellation first. Returns immediately if not running.
    pub async fn join(&self) {
        let handle = self.task.write().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// True while the polling loop is running.
    pub async fn is_running(&self) -> bool {
        self.task.read().await.is_some()
    }

    /// Triggers one refresh immediately without affecting the ticking
    /// cadence. A no-op if the refresher isn't running.
    pub fn force_refresh(&self) {
        self.force_refresh.notify_one();
    }

    /// Replaces the [`NotificationOptions`] used by subsequent refreshes.
    pub async fn set_options(&self, opts: NotificationOptions) {
        *self.opts.write().await = opts;
    }

    /// The most recently published snapshot.
    pub async fn snapshot(&self) -> Vec<SharedNotification> {
        self.snapshot.read().await.clone()
    }

    /// The error from the most recent failed refresh, if any. Cleared by
    /// the next successful refresh.
    pub async fn last_error(&self) -> Option<String> {
        self.last_error.read().await.clone()
    }
}

impl<P, C> Drop for BackgroundRefresher<P, C>
where
    P: Provider + Send + Sync + 'static,
    P::Error: std::fmt::Display + Send + Sync + 'static,
    C: ResponseCache + Send + Sync + 'static,
{
    fn drop(&mut self) {
        if let Some(handle) = self.task.try_write().ok().and_then(|mut guard| guard.take()) {
            handle.abort();
        }
    }
}
