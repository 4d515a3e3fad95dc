//! Adaptive-interval diffing watcher (spec section 4.7).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::RwLock;
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

/// How a notification's id compared against the previous snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffKind {
    /// Not present in the previous snapshot.
    New,
    /// Present in the previous snapshot with an earlier `updated_at`.
    Updated,
    /// Present in the previous snapshot, absent from the current one.
    Read,
}

/// One diffed change, dispatched through a [`Watcher`]'s listeners.
#[derive(Debug, Clone)]
pub struct DiffEvent {
    pub kind: DiffKind,
    /// The fresh notification. `None` for a [`DiffKind::Read`] event, since
    /// the notification is by definition no longer present.
    pub notification: Option<SharedNotification>,
    /// The id affected, present even for `Read` events where `notification`
    /// is `None`.
    pub id: String,
    timestamp: Instant,
}

impl Event for DiffEvent {
    fn kind(&self) -> &'static str {
        match self.kind {
            DiffKind::New => "notification_new",
            DiffKind::Updated => "notification_updated",
            DiffKind::Read => "notification_read",
        }
    }

    fn timestamp(&self) -> Instant {
        self.timestamp
    }
}

/// Classifies `current` against `previous`, returning one [`DiffEvent`] per
/// affected id (spec 4.7: "classify each id as New... Updated... Read").
fn diff(previous: &HashMap<String, SharedNotification>, current: &[SharedNotification]) -> Vec<DiffEvent> {
    let now = Instant::now();
    let mut events = Vec::new();
    let mut seen = std::collections::HashSet::with_capacity(current.len());

    for notification in current {
        seen.insert(notification.id.clone());
        match previous.get(&notification.id) {
            None => events.push(DiffEvent {
                kind: DiffKind::New,
                notification: Some(Arc::clone(notification)),
                id: notification.id.clone(),
                timestamp: now,
            }),
            Some(prior) if notification.updated_at > prior.updated_at => events.push(DiffEvent {
                kind: DiffKind::Updated,
                notification: Some(Arc::clone(notification)),
                id: notification.id.clone(),
                timestamp: now,
            }),
            Some(_) => {}
        }
    }

    for (id, _) in previous.iter() {
        if !seen.contains(id) {
            events.push(DiffEvent { kind: DiffKind::Read, notification: None, id: id.clone(), timestamp: now });
        }
    }

    events
}

/// Snapshot of counters exposed after every refresh (spec 4.7: "Stats
/// exposed after every refresh").
#[derive(Debug, Clone, Copy, Default)]
pub struct WatcherStats {
    pub total_refreshes: u64,
    pub new_count: u64,
    pub updated_count: u64,
    pub read_count: u64,
    pub idle_count: u32,
    pub current_interval: std::time::Duration,
}

/// Configuration for a [`Watcher`].
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub(crate) refresh_interval: std::time::Duration,
    pub(crate) backoff_threshold: u32,
    pub(crate) backoff_factor: f64,
    pub(crate) max_interval: std::time::Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        WatcherConfigBuilder::new().build()
    }
}

/// Builder for [`WatcherConfig`].
pub struct WatcherConfigBuilder {
    refresh_interval: std::time::Duration,
    backoff_threshold: u32,
    backoff_factor: f64,
    max_interval: std::time::Duration,
}

impl Default for WatcherConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl WatcherConfigBuilder {
    /// Defaults: a 30 second base interval, backing off after 3
    /// consecutive idle refreshes by doubling, capped at 10 minutes.
    pub fn new() -> Self {
        Self {
            refresh_interval: std::time::Duration::from_secs(30),
            backoff_threshold: 3,
            backoff_factor: 2.0,
            max_interval: std::time::Duration::from_secs(600),
        }
    }

    pub fn refresh_interval(mut self, interval: std::time::Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    pub fn backoff_threshold(mut self, threshold: u32) -> Self {
        self.backoff_threshold = threshold;
        self
    }

    pub fn backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn max_interval(mut self, max_interval: std::time::Duration) -> Self {
        self.max_interval = max_interval;
        self
    }

    /// Clamps `backoff_threshold` to the default (3) when zero and
    /// `backoff_factor` to the default (2.0) when `<= 1.0`, matching the
    /// "default when ≤ 0" clamp convention used by every other builder in
    /// this engine.
    pub fn build(self) -> WatcherConfig {
        WatcherConfig {
            refresh_interval: self.refresh_interval,
            backoff_threshold: if self.backoff_threshold == 0 { 3 } else { self.backoff_threshold },
            backoff_factor: if self.backoff_factor <= 1.0 { 2.0 } else { self.backoff_factor },
            max_interval: self.max_interval,
        }
    }
}

/// Optional pre-filter applied to a fetched list before diffing (spec 4.7).
pub type PreFilter = Arc<dyn Fn(&SharedNotification) -> bool + Send + Sync>;

/// Adaptive-interval diffing watcher (spec 4.7): similar to
/// [`crate::BackgroundRefresher`], but classifies every refresh's changes
/// against the previous snapshot and backs its polling cadence off when
/// nothing changes.
pub struct Watcher<P, C>
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
    config: WatcherConfig,
    pre_filter: Option<PreFilter>,
    listeners: Arc<RwLock<ListenerSet<DiffEvent>>>,

    previous: Arc<RwLock<HashMap<String, SharedNotification>>>,
    stats: Arc<RwLock<WatcherStats>>,
    loop_cancel: Arc<RwLock<Option<CancellationToken>>>,
    task: Arc<RwLock<Option<JoinHandle<()>>>>,
}

impl<P, C> Watcher<P, C>
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
        config: WatcherConfig,
    ) -> Self {
        Self {
            provider,
            cache,
            rate_limiter,
            retry_config,
            classifier,
            opts: Arc::new(RwLock::new(opts)),
            config: config.clone(),
            pre_filter: None,
            listeners: Arc::new(RwLock::new(ListenerSet::new())),
            previous: Arc::new(RwLock::new(HashMap::new())),
            stats: Arc::new(RwLock::new(WatcherStats { current_interval: config.refresh_interval, ..Default::default() })),
            loop_cancel: Arc::new(RwLock::new(None)),
            task: Arc::new(RwLock::new(None)),
        }
    }

    /// Installs a pre-filter applied to every fetched list before diffing.
    pub fn with_pre_filter(mut self, filter: impl Fn(&SharedNotification) -> bool + Send + Sync + 'static) -> Self {
        self.pre_filter = Some(Arc::new(filter));
        self
    }

    /// Registers a listener invoked once per diffed change.
    pub async fn on_diff<L>(&self, listener: L)
    where
        L: Listener<DiffEvent> + 'static,
    {
        self.listeners.write().await.add(listener);
    }

    /// Stopped → Running: spawns the polling loop at the configured base
    /// interval, adapting the cadence after every refresh.
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
        let pre_filter = self.pre_filter.clone();
        let listeners = Arc::clone(&self.listeners);
        let previous = Arc::clone(&self.previous);
        let stats = Arc::clone(&self.stats);
        let config = self.config.clone();
        let cancel = CancellationToken::new();
        *self.loop_cancel.write().await = Some(cancel.clone());

        let handle = tokio::spawn(async move {
            let mut current_interval = config.refresh_interval;
            let mut interval = tokio::time::interval(current_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }

                let current_opts = opts.read().await.clone();
                let fresh = match crate::common::fetch_snapshot(
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
                    Ok(fresh) => fresh,
                    Err(message) => {
                        #[cfg(feature = "tracing")]
                        warn!(error = %message, "watcher refresh failed");
                        continue;
                    }
                };

                let filtered: Vec<SharedNotification> = match &pre_filter {
                    Some(filter) => fresh.into_iter().filter(|n| filter(n)).collect(),
                    None => fresh,
                };

                let mut previous_guard = previous.write().await;
                let events = diff(&previous_guard, &filtered);
                *previous_guard = crate::common::shared_id_map(&filtered);
                drop(previous_guard);

                let listeners_guard = listeners.read().await;
                for event in &events {
                    listeners_guard.emit(event);
                }
                drop(listeners_guard);

                let mut stats_guard = stats.write().await;
                stats_guard.total_refreshes += 1;
                for event in &events {
                    match event.kind {
                        DiffKind::New => stats_guard.new_count += 1,
                        DiffKind::Updated => stats_guard.updated_count += 1,
                        DiffKind::Read => stats_guard.read_count += 1,
                    }
                }

                if events.is_empty() {
                    stats_guard.idle_count += 1;
                } else {
                    stats_guard.idle_count = 0;
                }

                let next_interval = if stats_guard.idle_count >= config.backoff_threshold {
                    let backed_off = current_interval.mul_f64(config.backoff_factor);
                    backed_off.min(config.max_interval)
                } else {
                    config.refresh_interval
                };

                stats_guard.current_interval = next_interval;
                drop(stats_guard);

                if next_interval != current_interval {
                    current_interval = next_interval;
                    interval = tokio::time::interval(current_interval);
                    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                }
            }
        });

        *task_lock = Some(handle);
    }

    /// Running → Stopped: signals cancellation and awaits the loop.
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

    /// The counters from the most recent refresh.
    pub async fn stats(&self) -> WatcherStats {
        *self.stats.read().await
    }
}

impl<P, C> Drop for Watcher<P, C>
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

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use chrono::{DateTime, Utc};
    use threadwatch_core::error::ErrorClass;
    use threadwatch_core::model::{Notification, Repository, Subject, SubjectType};
    use threadwatch_core::provider::{PageInfo, ProviderResponse, SubscriptionUpdate};
    use threadwatch_retry::RetryConfigBuilder;

    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("stub provider error")]
    struct ProviderError;

    struct StubProvider {
        pages: Mutex<Vec<ProviderResponse<Notification>>>,
    }

    #[async_trait::async_trait]
    impl Provider for StubProvider {
        type Error = ProviderError;

        async fn list_notifications(&self, _opts: &NotificationOptions) -> Result<ProviderResponse<Notification>, Self::Error> {
            let mut pages = self.pages.lock().unwrap();
            if pages.is_empty() {
                return Ok(ProviderResponse { items: vec![], page_info: PageInfo::default(), rate_limit: None });
            }
            Ok(pages.remove(0))
        }

        async fn list_repository_notifications(
            &self,
            _owner: &str,
            _repo: &str,
            _opts: &NotificationOptions,
        ) -> Result<ProviderResponse<Notification>, Self::Error> {
            unimplemented!()
        }

        async fn mark_thread_read(&self, _notification_id: &str) -> Result<(), Self::Error> {
            unimplemented!()
        }

        async fn mark_notifications_read(&self, _before: Option<DateTime<Utc>>) -> Result<(), Self::Error> {
            unimplemented!()
        }

        async fn mark_repository_notifications_read(
            &self,
            _owner: &str,
            _repo: &str,
            _before: Option<DateTime<Utc>>,
        ) -> Result<(), Self::Error> {
            unimplemented!()
        }

        async fn set_thread_subscription(&self, _notification_id: &str, _update: SubscriptionUpdate) -> Result<(), Self::Error> {
            unimplemented!()
        }

        async fn set_repository_subscription(
            &self,
            _owner: &str,
            _repo: &str,
            _update: SubscriptionUpdate,
        ) -> Result<(), Self::Error> {
            unimplemented!()
        }

        async fn issue_detail(&self, _owner: &str, _repo: &str, _number: &str) -> Result<String, Self::Error> {
            Ok("https://example.invalid/detail".to_string())
        }

        async fn pull_request_detail(&self, _owner: &str, _repo: &str, _number: &str) -> Result<String, Self::Error> {
            unimplemented!()
        }

        async fn commit_detail(&self, _owner: &str, _repo: &str, _sha: &str) -> Result<String, Self::Error> {
            unimplemented!()
        }

        async fn release_detail(&self, _owner: &str, _repo: &str, _id: &str) -> Result<String, Self::Error> {
            unimplemented!()
        }

        async fn discussion_detail(&self, _owner: &str, _repo: &str, _number: &str) -> Result<String, Self::Error> {
            unimplemented!()
        }
    }

    fn sample(id: &str, updated_at: DateTime<Utc>) -> Notification {
        Notification {
            id: id.to_string(),
            unread: true,
            reason: "subscribed".to_string(),
            updated_at,
            subject: Subject { subject_type: SubjectType::Issue, title: "title".to_string(), url: format!("https://example.invalid/issues/{id}") },
            repository: Repository { full_name: "acme/widgets".to_string(), owner_login: "acme".to_string(), private: false, url: "https://example.invalid".to_string() },
            detail_url: None,
        }
    }

    struct NoCache;
    #[async_trait::async_trait]
    impl ResponseCache for NoCache {
        type Error = std::convert::Infallible;
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, Self::Error> { Ok(None) }
        async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> Result<(), Self::Error> { Ok(()) }
        async fn delete(&self, _key: &str) -> Result<(), Self::Error> { Ok(()) }
        async fn close(&self) -> Result<(), Self::Error> { Ok(()) }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfigBuilder::new().max_attempts(1).base_delay(Duration::from_millis(1)).build()
    }

    #[derive(Clone, Copy)]
    struct AlwaysTransient;
    impl ErrorClassifier<ProviderError> for AlwaysTransient {
        fn classify(&self, _error: &ProviderError) -> ErrorClass {
            ErrorClass::Fatal
        }
    }

    #[test]
    fn diff_classifies_new_updated_and_read() {
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::seconds(1);

        let mut previous = HashMap::new();
        previous.insert("1".to_string(), Arc::new(sample("1", t0)));
        previous.insert("2".to_string(), Arc::new(sample("2", t0)));

        let current = vec![
            Arc::new(sample("1", t1)), // updated
            Arc::new(sample("3", t0)), // new
            // "2" is absent -> read
        ];

        let mut events = diff(&previous, &current);
        events.sort_by_key(|e| e.id.clone());

        assert_eq!(events.len(), 3);
        assert_eq!(events[0].id, "1");
        assert_eq!(events[0].kind, DiffKind::Updated);
        assert_eq!(events[1].id, "2");
        assert_eq!(events[1].kind, DiffKind::Read);
        assert!(events[1].notification.is_none());
        assert_eq!(events[2].id, "3");
        assert_eq!(events[2].kind, DiffKind::New);
    }

    #[test]
    fn diff_is_empty_for_an_unchanged_snapshot() {
        let t0 = Utc::now();
        let mut previous = HashMap::new();
        previous.insert("1".to_string(), Arc::new(sample("1", t0)));

        let current = vec![Arc::new(sample("1", t0))];
        assert!(diff(&previous, &current).is_empty());
    }

    #[tokio::test]
    async fn start_then_stop_dispatches_new_events_and_then_backs_off() {
        let provider = Arc::new(StubProvider {
            pages: Mutex::new(vec![
                ProviderResponse { items: vec![sample("1", Utc::now())], page_info: PageInfo { next_page: None, last_page: Some(1) }, rate_limit: None },
                ProviderResponse { items: vec![sample("1", Utc::now())], page_info: PageInfo { next_page: None, last_page: Some(1) }, rate_limit: None },
            ]),
        });
        let rate_limiter = Arc::new(RateLimiter::new(RateLimiter::builder().requests_per_second(1000.0).burst(10).build()));
        let classifier: Arc<dyn ErrorClassifier<ProviderError> + Send + Sync> = Arc::new(AlwaysTransient);
        let new_events = Arc::new(AtomicU32::new(0));
        let new_events_clone = Arc::clone(&new_events);

        let watcher: Watcher<StubProvider, NoCache> = Watcher::new(
            provider,
            None,
            rate_limiter,
            fast_retry(),
            classifier,
            NotificationOptions::default(),
            WatcherConfigBuilder::new().refresh_interval(Duration::from_millis(15)).backoff_threshold(1).build(),
        );
        watcher
            .on_diff(threadwatch_core::events::FnListener::new(move |event: &DiffEvent| {
                if event.kind == DiffKind::New {
                    new_events_clone.fetch_add(1, Ordering::SeqCst);
                }
            }))
            .await;

        watcher.start().await;
        tokio::time::sleep(Duration::from_millis(80)).await;
        watcher.stop().await;

        assert_eq!(new_events.load(Ordering::SeqCst), 1);
        let stats = watcher.stats().await;
        assert!(stats.total_refreshes >= 1);
        assert!(!watcher.is_running().await);
    }

    proptest::proptest! {
        /// Spec section 8: "For all Notifications snapshots S1=S2:
        /// Watcher.diff(S1,S2) emits no events." Diffing any snapshot
        /// against an identical copy of itself never produces a change.
        #[test]
        fn diff_of_identical_snapshots_is_always_empty(ids in proptest::collection::vec(1u32..200, 0..20)) {
            let t0 = Utc::now();
            let current: Vec<SharedNotification> = ids
                .iter()
                .map(|id| Arc::new(sample(&id.to_string(), t0)))
                .collect();
            let previous = crate::common::shared_id_map(&current);
            let events = diff(&previous, &current);
            prop_assert!(events.is_empty());
        }
    }
}
