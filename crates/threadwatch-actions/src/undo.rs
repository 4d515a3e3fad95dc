//! Maps recorded actions to their inverse operations (spec 4.12).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use threadwatch_core::cancel::CancellationToken;
use threadwatch_core::model::{Action, ActionResult, ActionType};
use threadwatch_core::provider::Provider;

use crate::batch::{BatchOptions, BatchProcessor, BatchResult, BatchTask};
use crate::history::SharedActionHistory;
use crate::runner::ActionRunner;

/// Outcome of [`UndoEngine::undo`].
pub struct UndoResult {
    pub success: bool,
    pub error: Option<String>,
    /// The action that was undone, retained for display even when the
    /// undo itself failed.
    pub original_action: Action,
}

impl UndoResult {
    fn ok(original_action: Action) -> Self {
        Self { success: true, error: None, original_action }
    }

    fn rejected(original_action: Action, error: impl Into<String>) -> Self {
        Self { success: false, error: Some(error.into()), original_action }
    }

    fn from_action_result(original_action: Action, result: ActionResult) -> Self {
        Self {
            success: result.success,
            error: result.error,
            original_action,
        }
    }
}

/// Computes and runs the inverse of a recorded [`Action`] (spec 4.12).
pub struct UndoEngine<P: Provider> {
    runner: Arc<ActionRunner<P>>,
    history: SharedActionHistory,
}

impl<P: Provider> UndoEngine<P> {
    pub fn new(runner: Arc<ActionRunner<P>>, history: SharedActionHistory) -> Self {
        Self { runner, history }
    }

    /// Reverses `action`. Rejects failed actions and `MarkAllAsRead`
    /// outright; every other recorded type maps to its inverse per spec
    /// 4.12's table.
    pub async fn undo(&self, action: Action, cancel: &CancellationToken) -> UndoResult {
        if !action.success {
            return UndoResult::rejected(action, "cannot undo failed action");
        }
        if action.action_type == ActionType::MarkAllAsRead {
            return UndoResult::rejected(action, "unrecoverable");
        }

        match action.action_type {
            ActionType::MarkAsRead => {
                // Best-effort: the Provider has no "mark as unread"
                // endpoint, so resubscribing is the closest available
                // inverse (spec section 9 open question).
                let Some(id) = action.notification_id.clone() else {
                    return UndoResult::rejected(action, "missing notification id");
                };
                let result = self.runner.subscribe(&id, cancel).await;
                UndoResult::from_action_result(action, result)
            }
            ActionType::Archive => {
                let Some(id) = action.notification_id.clone() else {
                    return UndoResult::rejected(action, "missing notification id");
                };
                let result = self.runner.unarchive(&id, cancel).await;
                UndoResult::from_action_result(action, result)
            }
            ActionType::Unarchive => {
                let Some(id) = action.notification_id.clone() else {
                    return UndoResult::rejected(action, "missing notification id");
                };
                let result = self.runner.archive(&id, cancel).await;
                UndoResult::from_action_result(action, result)
            }
            ActionType::Subscribe => {
                let Some(id) = action.notification_id.clone() else {
                    return UndoResult::rejected(action, "missing notification id");
                };
                let result = self.runner.unsubscribe(&id, cancel).await;
                UndoResult::from_action_result(action, result)
            }
            ActionType::Unsubscribe => {
                let Some(id) = action.notification_id.clone() else {
                    return UndoResult::rejected(action, "missing notification id");
                };
                let result = self.runner.subscribe(&id, cancel).await;
                UndoResult::from_action_result(action, result)
            }
            ActionType::Mute => {
                let Some((owner, repo)) = action
                    .repository_name
                    .as_deref()
                    .and_then(|name| name.split_once('/'))
                else {
                    return UndoResult::rejected(action, "missing repository name");
                };
                let result = if action.is_unmute() {
                    self.runner.mute(owner, repo, cancel).await
                } else {
                    self.runner.unmute(owner, repo, cancel).await
                };
                UndoResult::from_action_result(action, result)
            }
            ActionType::MarkAllAsRead | ActionType::Unmute => unreachable!("handled above or never constructed"),
        }
    }

    /// Reads the last `n` history entries and undoes each in parallel via
    /// [`BatchProcessor`] (spec 4.12).
    pub async fn undo_last_n(&self, n: i64, opts: &BatchOptions, cancel: &CancellationToken) -> BatchResult
    where
        P: 'static,
    {
        let actions = self.history.get_last(n).await;
        let tasks: Vec<BatchTask> = actions
            .into_iter()
            .map(|action| {
                let runner = Arc::clone(&self.runner);
                let history = Arc::clone(&self.history);
                let task_cancel = cancel.clone();
                Box::pin(async move {
                    let engine = UndoEngine { runner, history };
                    let result = engine.undo(action.clone(), &task_cancel).await;
                    ActionResult {
                        success: result.success,
                        error: result.error,
                        action,
                    }
                }) as BatchTask
            })
            .collect();
        BatchProcessor::run(tasks, opts, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Arc;
    use threadwatch_core::model::Notification;
    use threadwatch_core::provider::{NotificationOptions, ProviderResponse, SubscriptionUpdate};
    use thiserror::Error;

    #[derive(Debug, Error)]
    #[error("stub provider error")]
    struct ProviderError;

    #[derive(Default)]
    struct StubProvider;

    #[async_trait]
    impl Provider for StubProvider {
        type Error = ProviderError;

        async fn list_notifications(&self, _opts: &NotificationOptions) -> Result<ProviderResponse<Notification>, Self::Error> {
            unimplemented!()
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
            Ok(())
        }

        async fn mark_notifications_read(&self, _before: Option<DateTime<Utc>>) -> Result<(), Self::Error> {
            Ok(())
        }

        async fn mark_repository_notifications_read(
            &self,
            _owner: &str,
            _repo: &str,
            _before: Option<DateTime<Utc>>,
        ) -> Result<(), Self::Error> {
            Ok(())
        }

        async fn set_thread_subscription(&self, _notification_id: &str, _update: SubscriptionUpdate) -> Result<(), Self::Error> {
            Ok(())
        }

        async fn set_repository_subscription(&self, _owner: &str, _repo: &str, _update: SubscriptionUpdate) -> Result<(), Self::Error> {
            Ok(())
        }

        async fn issue_detail(&self, _owner: &str, _repo: &str, _number: &str) -> Result<String, Self::Error> {
            unimplemented!()
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

    fn engine() -> UndoEngine<StubProvider> {
        let history = Arc::new(crate::history::ActionHistory::new());
        let runner = Arc::new(ActionRunner::new(
            Arc::new(StubProvider),
            Arc::clone(&history),
            Arc::new(threadwatch_core::clock::SystemClock),
        ));
        UndoEngine::new(runner, history)
    }

    #[tokio::test]
    async fn rejects_undoing_a_failed_action() {
        let action = Action::failure(ActionType::Archive, Utc::now(), "boom").with_notification_id("1");
        let result = engine().undo(action, &CancellationToken::new()).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("cannot undo failed action"));
    }

    #[tokio::test]
    async fn rejects_undoing_mark_all_as_read() {
        let action = Action::success(ActionType::MarkAllAsRead, Utc::now());
        let result = engine().undo(action, &CancellationToken::new()).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("unrecoverable"));
    }

    #[tokio::test]
    async fn undoes_archive_with_unarchive() {
        let action = Action::success(ActionType::Archive, Utc::now()).with_notification_id("1");
        let result = engine().undo(action, &CancellationToken::new()).await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn undo_mute_with_unmute_flag_re_mutes() {
        let action = Action::success(ActionType::Mute, Utc::now())
            .with_repository_name("acme/widgets")
            .with_metadata("unmute", "true");
        let result = engine().undo(action, &CancellationToken::new()).await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn undo_plain_mute_unmutes() {
        let action = Action::success(ActionType::Mute, Utc::now()).with_repository_name("acme/widgets");
        let result = engine().undo(action, &CancellationToken::new()).await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn undo_last_n_delegates_to_the_batch_processor() {
        let eng = engine();
        eng.history.add(Action::success(ActionType::Archive, Utc::now()).with_notification_id("1")).await;
        eng.history.add(Action::success(ActionType::Subscribe, Utc::now()).with_notification_id("2")).await;
        let result = eng.undo_last_n(2, &BatchOptions::new(), &CancellationToken::new()).await;
        assert_eq!(result.results.len(), 2);
    }
}
