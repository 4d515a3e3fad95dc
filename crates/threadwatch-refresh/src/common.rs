//! Shared fetch-then-enrich step used by both [`crate::BackgroundRefresher`]
//! and [`crate::Watcher`].

use std::sync::Arc;

use threadwatch_core::cache::ResponseCache;
use threadwatch_core::cancel::CancellationToken;
use threadwatch_core::model::SharedNotification;
use threadwatch_core::provider::{NotificationOptions, Provider};
use threadwatch_fetch::{fetch_all, fetch_details, FetchError};
use threadwatch_ratelimiter::RateLimiter;
use threadwatch_retry::{ErrorClassifier, RetryConfig};

#[cfg(feature = "tracing")]
use tracing::warn;

/// Runs one fetch-all-then-enrich cycle.
///
/// A partial fetch failure still returns whatever notifications were
/// collected (spec 4.3's partial-result policy); a total failure is
/// reported as `Err` so the caller can record `lastError` without
/// swapping its snapshot (spec 4.6).
pub(crate) async fn fetch_snapshot<P, C>(
    provider: &P,
    cache: Option<&C>,
    rate_limiter: &RateLimiter,
    retry_config: &RetryConfig,
    classifier: &dyn ErrorClassifier<P::Error>,
    cancel: &CancellationToken,
    opts: &NotificationOptions,
) -> Result<Vec<SharedNotification>, String>
where
    P: Provider,
    C: ResponseCache,
{
    let notifications = match fetch_all(provider, cache, rate_limiter, retry_config, classifier, cancel, opts).await {
        Ok(notifications) => notifications,
        Err(FetchError::Partial { partial, error }) => {
            #[cfg(feature = "tracing")]
            warn!(error = %error, "refresh fetch partially failed, enriching what was collected");
            partial
        }
        Err(FetchError::Total(error)) => return Err(error.to_string()),
    };

    // DetailFetcher runs best-effort: a per-notification detail failure
    // does not fail the refresh (spec 4.6: "runs DetailFetcher best-effort
    // on success").
    let (enriched, detail_error) = fetch_details(provider, cancel, opts.max_concurrent, notifications).await;
    if let Some(_detail_error) = detail_error {
        #[cfg(feature = "tracing")]
        warn!(error = %_detail_error, "detail enrichment partially failed during refresh");
    }
    Ok(enriched)
}

pub(crate) fn shared_id_map(notifications: &[SharedNotification]) -> std::collections::HashMap<String, SharedNotification> {
    notifications.iter().map(|n| (n.id.clone(), Arc::clone(n))).collect()
}
