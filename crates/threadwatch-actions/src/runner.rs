//! Provider mutations, recorded into an [`ActionHistory`] (spec 4.10).

use std::future::Future;
use std::sync::Arc;

use threadwatch_core::cancel::CancellationToken;
use threadwatch_core::clock::Clock;
use threadwatch_core::error::ThreadwatchError;
use threadwatch_core::model::{Action, ActionResult, ActionType};
use threadwatch_core::provider::{Provider, SubscriptionUpdate};
use chrono::{DateTime, Utc};
use threadwatch_backpressure::BackpressureController;

use crate::history::SharedActionHistory;

#[cfg(feature = "tracing")]
use tracing::warn;

/// Runs Provider-mutating actions and records the successful ones.
///
/// Each method follows the same shape spec 4.10 describes: build an
/// `Action` record, call the Provider endpoint(s), and on success record
/// into [`ActionHistory`] before returning. A failed step is never
/// recorded and leaves whatever earlier steps already did in place — no
/// rollback (spec 4.10: "Archive... either step's failure aborts and
/// leaves prior effects as-is"). When a [`BackpressureController`] is
/// configured, every Provider call is gated through it (spec 4.8); with
/// none configured, calls run unthrottled.
pub struct ActionRunner<P: Provider> {
    provider: Arc<P>,
    history: SharedActionHistory,
    clock: Arc<dyn Clock>,
    backpressure: Option<Arc<BackpressureController>>,
}

impl<P: Provider> ActionRunner<P> {
    pub fn new(provider: Arc<P>, history: SharedActionHistory, clock: Arc<dyn Clock>) -> Self {
        Self { provider, history, clock, backpressure: None }
    }

    /// Gates every subsequent Provider call in this runner through
    /// `backpressure`.
    pub fn with_backpressure(mut self, backpressure: Arc<BackpressureController>) -> Self {
        self.backpressure = Some(backpressure);
        self
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now_utc()
    }

    async fn record_success(&self, action: Action) -> ActionResult {
        self.history.add(action.clone()).await;
        ActionResult::from_action(action)
    }

    fn record_failure(&self, action_type: ActionType, notification_id: Option<&str>, error: impl std::fmt::Display) -> ActionResult {
        #[cfg(feature = "tracing")]
        warn!(error = %error, "action failed");
        let mut action = Action::failure(action_type, self.now(), error.to_string());
        if let Some(id) = notification_id {
            action = action.with_notification_id(id);
        }
        ActionResult::from_action(action)
    }

    /// Runs `fut` through the configured [`BackpressureController`], if
    /// any, else runs it directly.
    async fn gated<F, Fut, T>(&self, cancel: &CancellationToken, fut: F) -> Result<T, ThreadwatchError<P::Error>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, P::Error>>,
    {
        match &self.backpressure {
            Some(bp) => bp.with_backpressure(cancel, fut).await,
            None => fut().await.map_err(ThreadwatchError::Fatal),
        }
    }

    /// `MarkThreadRead` then `SetThreadSubscription(ignored=true)`.
    pub async fn archive(&self, notification_id: &str, cancel: &CancellationToken) -> ActionResult {
        if let Err(e) = self.gated(cancel, || self.provider.mark_thread_read(notification_id)).await {
            return self.record_failure(ActionType::Archive, Some(notification_id), e);
        }
        let update = SubscriptionUpdate { subscribed: false, ignored: true };
        if let Err(e) = self.gated(cancel, || self.provider.set_thread_subscription(notification_id, update)).await {
            return self.record_failure(ActionType::Archive, Some(notification_id), e);
        }
        let action = Action::success(ActionType::Archive, self.now()).with_notification_id(notification_id);
        self.record_success(action).await
    }

    /// `SetThreadSubscription(ignored=false)`.
    pub async fn unarchive(&self, notification_id: &str, cancel: &CancellationToken) -> ActionResult {
        let update = SubscriptionUpdate { subscribed: false, ignored: false };
        if let Err(e) = self.gated(cancel, || self.provider.set_thread_subscription(notification_id, update)).await {
            return self.record_failure(ActionType::Unarchive, Some(notification_id), e);
        }
        let action = Action::success(ActionType::Unarchive, self.now()).with_notification_id(notification_id);
        self.record_success(action).await
    }

    /// `SetThreadSubscription(subscribed=true, ignored=false)`.
    pub async fn subscribe(&self, notification_id: &str, cancel: &CancellationToken) -> ActionResult {
        let update = SubscriptionUpdate { subscribed: true, ignored: false };
        if let Err(e) = self.gated(cancel, || self.provider.set_thread_subscription(notification_id, update)).await {
            return self.record_failure(ActionType::Subscribe, Some(notification_id), e);
        }
        let action = Action::success(ActionType::Subscribe, self.now()).with_notification_id(notification_id);
        self.record_success(action).await
    }

    /// `SetThreadSubscription(subscribed=false)`.
    pub async fn unsubscribe(&self, notification_id: &str, cancel: &CancellationToken) -> ActionResult {
        let update = SubscriptionUpdate { subscribed: false, ignored: false };
        if let Err(e) = self.gated(cancel, || self.provider.set_thread_subscription(notification_id, update)).await {
            return self.record_failure(ActionType::Unsubscribe, Some(notification_id), e);
        }
        let action = Action::success(ActionType::Unsubscribe, self.now()).with_notification_id(notification_id);
        self.record_success(action).await
    }

    /// `MarkRepositoryNotificationsRead` then
    /// `SetRepositorySubscription(subscribed=false, ignored=true)`.
    pub async fn mute(&self, owner: &str, repo: &str, cancel: &CancellationToken) -> ActionResult {
        let full_name = format!("{owner}/{repo}");
        if let Err(e) = self.gated(cancel, || self.provider.mark_repository_notifications_read(owner, repo, None)).await {
            return self.record_failure(ActionType::Mute, None, e).with_repository(&full_name);
        }
        let update = SubscriptionUpdate { subscribed: false, ignored: true };
        if let Err(e) = self.gated(cancel, || self.provider.set_repository_subscription(owner, repo, update)).await {
            return self.record_failure(ActionType::Mute, None, e).with_repository(&full_name);
        }
        let action = Action::success(ActionType::Mute, self.now()).with_repository_name(full_name);
        self.record_success(action).await
    }

    /// Encoded as an `Action` of type `Mute` with `metadata["unmute"] ==
    /// "true"` (spec 4.10 / section 9); calls
    /// `SetRepositorySubscription(subscribed=true, ignored=false)`.
    pub async fn unmute(&self, owner: &str, repo: &str, cancel: &CancellationToken) -> ActionResult {
        let full_name = format!("{owner}/{repo}");
        let update = SubscriptionUpdate { subscribed: true, ignored: false };
        if let Err(e) = self.gated(cancel, || self.provider.set_repository_subscription(owner, repo, update)).await {
            return self.record_failure(ActionType::Mute, None, e).with_repository(&full_name);
        }
        let action = Action::success(ActionType::Mute, self.now())
            .with_repository_name(full_name)
            .with_metadata("unmute", "true");
        self.record_success(action).await
    }

    /// `MarkNotificationsRead(before)`.
    pub async fn mark_all_as_read(&self, before: Option<DateTime<Utc>>, cancel: &CancellationToken) -> ActionResult {
        if let Err(e) = self.gated(cancel, || self.provider.mark_notifications_read(before)).await {
            return self.record_failure(ActionType::MarkAllAsRead, None, e);
        }
        let action = Action::success(ActionType::MarkAllAsRead, self.now());
        self.record_success(action).await
    }

    /// `MarkThreadRead`.
    pub async fn mark_as_read(&self, notification_id: &str, cancel: &CancellationToken) -> ActionResult {
        if let Err(e) = self.gated(cancel, || self.provider.mark_thread_read(notification_id)).await {
            return self.record_failure(ActionType::MarkAsRead, Some(notification_id), e);
        }
        let action = Action::success(ActionType::MarkAsRead, self.now()).with_notification_id(notification_id);
        self.record_success(action).await
    }
}

/// Small extension so failure branches above can attach a repository name
/// without repeating the builder call at every call site.
trait WithRepository {
    fn with_repository(self, name: &str) -> Self;
}

impl WithRepository for ActionResult {
    fn with_repository(mut self, name: &str) -> Self {
        self.action.repository_name = Some(name.to_string());
        self
    }
}
