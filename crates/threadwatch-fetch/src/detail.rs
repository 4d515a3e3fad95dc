//! Per-notification detail enrichment (spec section 4.5).

use std::fmt;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use threadwatch_core::cancel::CancellationToken;
use threadwatch_core::model::{Notification, SharedNotification};
use threadwatch_core::provider::{fetch_detail_url, Provider};

/// Aggregate failure from [`fetch_details`]: one entry per notification
/// whose detail endpoint could not be reached or whose subject URL could
/// not be parsed (spec 4.5: "Returns a single aggregate error listing
/// per-notification failures").
#[derive(Debug)]
pub struct DetailError<E> {
    pub failures: Vec<(String, DetailFailure<E>)>,
}

#[derive(Debug)]
pub enum DetailFailure<E> {
    UnparseableUrl,
    Cancelled,
    Provider(E),
}

impl<E: fmt::Display> fmt::Display for DetailError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} notification(s) failed detail enrichment: ", self.failures.len())?;
        for (i, (id, failure)) in self.failures.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            match failure {
                DetailFailure::UnparseableUrl => write!(f, "{id}: unparseable subject url")?,
                DetailFailure::Cancelled => write!(f, "{id}: cancelled")?,
                DetailFailure::Provider(e) => write!(f, "{id}: {e}")?,
            }
        }
        Ok(())
    }
}

impl<E: fmt::Display + fmt::Debug> std::error::Error for DetailError<E> {}

/// Attaches a derived detail URL to every notification by branching on
/// `subject.subject_type` (spec 4.5). Concurrency is bounded by
/// `max_concurrent`; a failure on one notification does not cancel the
/// others unless `cancel` fires. Never mutates a notification other than
/// setting [`Notification::detail_url`].
pub async fn fetch_details<P: Provider>(
    provider: &P,
    cancel: &CancellationToken,
    max_concurrent: usize,
    notifications: Vec<SharedNotification>,
) -> (Vec<SharedNotification>, Option<DetailError<P::Error>>) {
    let max_concurrent = max_concurrent.max(1);

    let results: Vec<(SharedNotification, Result<Option<String>, DetailFailure<P::Error>>)> = stream::iter(notifications)
        .map(|notification| async move {
            if cancel.is_cancelled() {
                return (notification, Err(DetailFailure::Cancelled));
            }
            let Some(identifier) = parse_identifier(&notification.subject.url) else {
                return (notification, Err(DetailFailure::UnparseableUrl));
            };
            let Some(owner) = notification.repository.owner() else {
                return (notification, Err(DetailFailure::UnparseableUrl));
            };
            let repo = notification.repository.full_name.split('/').nth(1).unwrap_or_default();

            match fetch_detail_url(provider, owner, repo, notification.subject.subject_type, &identifier).await {
                Ok(url) => (notification, Ok(Some(url))),
                Err(err) => (notification, Err(DetailFailure::Provider(err))),
            }
        })
        .buffer_unordered(max_concurrent)
        .collect()
        .await;

    let mut enriched = Vec::with_capacity(results.len());
    let mut failures = Vec::new();

    for (notification, result) in results {
        match result {
            Ok(Some(detail_url)) => enriched.push(Arc::new(notification.with_detail_url(detail_url))),
            Ok(None) => enriched.push(notification),
            Err(failure) => {
                failures.push((notification.id.clone(), failure));
                enriched.push(notification);
            }
        }
    }

    if failures.is_empty() {
        (enriched, None)
    } else {
        (enriched, Some(DetailError { failures }))
    }
}

/// Extracts the trailing identifier (issue/PR number, commit sha, etc.)
/// from a subject URL, its final path segment. Unparseable URLs (no path
/// segment, or an empty trailing segment) are skipped rather than
/// panicking (spec 4.5 parses "owner/repo/number from the subject URL";
/// owner/repo is already known from [`threadwatch_core::model::Repository`],
/// so only the trailing identifier needs extracting here).
fn parse_identifier(url: &str) -> Option<String> {
    let trimmed = url.trim_end_matches('/');
    let segment = trimmed.rsplit('/').next()?;
    if segment.is_empty() {
        None
    } else {
        Some(segment.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicU32, Ordering};
    use threadwatch_core::model::{Repository, Subject, SubjectType};
    use threadwatch_core::provider::{NotificationOptions, ProviderResponse, SubscriptionUpdate};

    #[derive(Debug, thiserror::Error)]
    #[error("provider error: {0}")]
    struct ProviderError(String);

    fn sample(id: &str, url: &str, subject_type: SubjectType) -> SharedNotification {
        Arc::new(Notification {
            id: id.to_string(),
            unread: true,
            reason: "subscribed".to_string(),
            updated_at: Utc::now(),
            subject: Subject { subject_type, title: "Example".to_string(), url: url.to_string() },
            repository: Repository {
                full_name: "acme/widgets".to_string(),
                owner_login: "acme".to_string(),
                private: false,
                url: String::new(),
            },
            detail_url: None,
        })
    }

    struct StubProvider {
        calls: AtomicU32,
        fail_numbers: Vec<String>,
    }

    #[async_trait]
    impl Provider for StubProvider {
        type Error = ProviderError;
        async fn list_notifications(&self, _opts: &NotificationOptions) -> Result<ProviderResponse<Notification>, Self::Error> {
            unimplemented!()
        }
        async fn list_repository_notifications(&self, _o: &str, _r: &str, _opts: &NotificationOptions) -> Result<ProviderResponse<Notification>, Self::Error> {
            unimplemented!()
        }
        async fn mark_thread_read(&self, _id: &str) -> Result<(), Self::Error> {
            unimplemented!()
        }
        async fn mark_notifications_read(&self, _before: Option<DateTime<Utc>>) -> Result<(), Self::Error> {
            unimplemented!()
        }
        async fn mark_repository_notifications_read(&self, _o: &str, _r: &str, _before: Option<DateTime<Utc>>) -> Result<(), Self::Error> {
            unimplemented!()
        }
        async fn set_thread_subscription(&self, _id: &str, _update: SubscriptionUpdate) -> Result<(), Self::Error> {
            unimplemented!()
        }
        async fn set_repository_subscription(&self, _o: &str, _r: &str, _update: SubscriptionUpdate) -> Result<(), Self::Error> {
            unimplemented!()
        }
        async fn issue_detail(&self, owner: &str, repo: &str, number: &str) -> Result<String, Self::Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_numbers.iter().any(|n| n == number) {
                return Err(ProviderError("boom".to_string()));
            }
            Ok(format!("https://example.invalid/{owner}/{repo}/issues/{number}/detail"))
        }
        async fn pull_request_detail(&self, _o: &str, _r: &str, _n: &str) -> Result<String, Self::Error> {
            unimplemented!()
        }
        async fn commit_detail(&self, _o: &str, _r: &str, _n: &str) -> Result<String, Self::Error> {
            unimplemented!()
        }
        async fn release_detail(&self, _o: &str, _r: &str, _n: &str) -> Result<String, Self::Error> {
            unimplemented!()
        }
        async fn discussion_detail(&self, _o: &str, _r: &str, _n: &str) -> Result<String, Self::Error> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn attaches_detail_url_for_every_notification() {
        let provider = StubProvider { calls: AtomicU32::new(0), fail_numbers: vec![] };
        let cancel = CancellationToken::new();
        let notifications = vec![
            sample("1", "https://example.invalid/issues/42", SubjectType::Issue),
            sample("2", "https://example.invalid/issues/7", SubjectType::Issue),
        ];

        let (enriched, error) = fetch_details(&provider, &cancel, 5, notifications).await;

        assert!(error.is_none());
        assert_eq!(enriched.len(), 2);
        assert!(enriched.iter().all(|n| n.detail_url.is_some()));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn one_failure_does_not_cancel_siblings() {
        let provider = StubProvider { calls: AtomicU32::new(0), fail_numbers: vec!["42".to_string()] };
        let cancel = CancellationToken::new();
        let notifications = vec![
            sample("1", "https://example.invalid/issues/42", SubjectType::Issue),
            sample("2", "https://example.invalid/issues/7", SubjectType::Issue),
        ];

        let (enriched, error) = fetch_details(&provider, &cancel, 5, notifications).await;

        let error = error.expect("expected aggregate error");
        assert_eq!(error.failures.len(), 1);
        assert_eq!(enriched.len(), 2);
        let ok_one = enriched.iter().find(|n| n.id == "2").unwrap();
        assert!(ok_one.detail_url.is_some());
    }

    #[tokio::test]
    async fn unparseable_url_is_skipped_not_panicking() {
        let provider = StubProvider { calls: AtomicU32::new(0), fail_numbers: vec![] };
        let cancel = CancellationToken::new();
        let notifications = vec![sample("1", "", SubjectType::Issue)];

        let (enriched, error) = fetch_details(&provider, &cancel, 5, notifications).await;

        let error = error.expect("expected aggregate error");
        assert_eq!(error.failures.len(), 1);
        assert!(matches!(error.failures[0].1, DetailFailure::UnparseableUrl));
        assert_eq!(enriched.len(), 1);
        assert!(enriched[0].detail_url.is_none());
    }
}
