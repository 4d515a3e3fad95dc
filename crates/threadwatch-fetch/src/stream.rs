//! Streaming variant of the paginated fetcher (spec section 4.4).
//!
//! Same pagination algorithm as [`crate::paginated::fetch_all`], but pages
//! are fanned out as spawned tasks publishing onto two bounded channels
//! instead of being buffered into one returned `Vec`.

use std::sync::Arc;

use threadwatch_core::cache::ResponseCache;
use threadwatch_core::cancel::CancellationToken;
use threadwatch_core::error::ThreadwatchError;
use threadwatch_core::model::{Notification, SharedNotification};
use threadwatch_core::provider::{NotificationOptions, Provider};
use threadwatch_ratelimiter::RateLimiter;
use threadwatch_retry::{retry, ErrorClassifier, RetryConfig};
use tokio::sync::{mpsc, Semaphore};

const VALUE_CHANNEL_CAPACITY: usize = 100;
const ERROR_CHANNEL_CAPACITY: usize = 10;

/// One item produced by [`NotificationStream::next`].
#[derive(Debug)]
pub enum StreamItem<E> {
    Value(SharedNotification),
    Error(ThreadwatchError<E>),
}

/// A running paginated fetch publishing onto bounded value/error channels.
///
/// Dropping this without draining it stops delivery once the channel
/// buffers fill, since the spawned workers' sends simply block (and are
/// themselves cancellable); it does not abort in-flight requests.
pub struct NotificationStream<E> {
    values: mpsc::Receiver<SharedNotification>,
    errors: mpsc::Receiver<ThreadwatchError<E>>,
}

impl<E: Send + 'static> NotificationStream<E> {
    /// Spawns the fetch. Each worker selects on `cancel` between every
    /// emission (spec 4.4); both channels close once every worker exits.
    pub fn spawn<P, C>(
        provider: Arc<P>,
        rate_limiter: Arc<RateLimiter>,
        retry_config: RetryConfig,
        classifier: Arc<dyn ErrorClassifier<P::Error> + Send + Sync>,
        cancel: CancellationToken,
        opts: NotificationOptions,
    ) -> NotificationStream<P::Error>
    where
        P: Provider + Send + Sync + 'static,
        C: ResponseCache + Send + Sync + 'static,
        P::Error: Send + Sync + 'static,
    {
        let (value_tx, value_rx) = mpsc::channel(VALUE_CHANNEL_CAPACITY);
        let (error_tx, error_rx) = mpsc::channel(ERROR_CHANNEL_CAPACITY);

        tokio::spawn(run(provider, rate_limiter, retry_config, classifier, cancel, opts, value_tx, error_tx));

        NotificationStream { values: value_rx, errors: error_rx }
    }

    /// Receives the next value or error, or `None` once both channels are
    /// closed and drained, or once `cancel` fires.
    pub async fn next(&mut self, cancel: &CancellationToken) -> Option<StreamItem<E>> {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                maybe_value = self.values.recv() => {
                    if let Some(value) = maybe_value {
                        return Some(StreamItem::Value(value));
                    }
                }
                maybe_error = self.errors.recv() => {
                    if let Some(error) = maybe_error {
                        return Some(StreamItem::Error(error));
                    }
                }
                else => return None,
            }
        }
    }
}

async fn run<P>(
    provider: Arc<P>,
    rate_limiter: Arc<RateLimiter>,
    retry_config: RetryConfig,
    classifier: Arc<dyn ErrorClassifier<P::Error> + Send + Sync>,
    cancel: CancellationToken,
    opts: NotificationOptions,
    value_tx: mpsc::Sender<SharedNotification>,
    error_tx: mpsc::Sender<ThreadwatchError<P::Error>>,
) where
    P: Provider + Send + Sync + 'static,
{
    let first_page = opts.with_page(1);
    let response = match retry(&cancel, &retry_config, classifier.as_ref(), Some(rate_limiter.as_ref()), |_attempt| {
        crate::paginated::call_page(provider.as_ref(), &first_page)
    })
    .await
    {
        Ok(response) => response,
        Err(err) => {
            let _ = error_tx.send(err).await;
            return;
        }
    };

    if let Some(rl) = response.rate_limit {
        rate_limiter.observe(rl);
    }

    if !emit_page(&value_tx, &cancel, response.items, &opts).await {
        return;
    }

    let Some(next) = response.page_info.next_page else {
        return;
    };
    // Never loop indefinitely: fall back to the disclosed next page as a
    // hard ceiling when the Provider doesn't report a last page (spec 4.3
    // "Edge policy", reused here per 4.4's "same algorithm as 4.3").
    let last_page = response.page_info.last_page.unwrap_or(next);

    let semaphore = Arc::new(Semaphore::new(opts.max_concurrent));
    let mut join_set = tokio::task::JoinSet::new();

    for page in next..=last_page {
        let provider = Arc::clone(&provider);
        let rate_limiter = Arc::clone(&rate_limiter);
        let classifier = Arc::clone(&classifier);
        let cancel = cancel.clone();
        let semaphore = Arc::clone(&semaphore);
        let opts_page = opts.with_page(page);
        let opts_for_filter = opts.clone();
        let value_tx = value_tx.clone();
        let error_tx = error_tx.clone();
        let retry_config = retry_config;

        join_set.spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return;
            };
            if cancel.is_cancelled() {
                return;
            }
            let result = retry(&cancel, &retry_config, classifier.as_ref(), Some(rate_limiter.as_ref()), |_attempt| {
                crate::paginated::call_page(provider.as_ref(), &opts_page)
            })
            .await;
            match result {
                Ok(response) => {
                    if let Some(rl) = response.rate_limit {
                        rate_limiter.observe(rl);
                    }
                    emit_page(&value_tx, &cancel, response.items, &opts_for_filter).await;
                }
                Err(err) => {
                    let _ = error_tx.send(err).await;
                }
            }
        });
    }

    while join_set.join_next().await.is_some() {}
}

/// Applies the repo/org post-filter then emits each item, selecting on
/// cancellation before every send (spec 4.4: "Workers select on context
/// cancellation between every emission"). Returns `false` if cancelled or
/// the receiver was dropped.
async fn emit_page(
    value_tx: &mpsc::Sender<SharedNotification>,
    cancel: &CancellationToken,
    items: Vec<Notification>,
    opts: &NotificationOptions,
) -> bool {
    for item in crate::paginated::apply_post_filter(items, opts) {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return false,
            send_result = value_tx.send(Arc::new(item)) => {
                if send_result.is_err() {
                    return false;
                }
            }
        }
    }
    true
}

/// Drains `stream` into a values/errors pair. Cancelling `cancel`
/// interrupts collection with [`ThreadwatchError::Cancelled`] (spec 4.4:
/// "`collectAll()`... cancelling the context interrupts collection with a
/// cancellation error").
pub async fn collect_stream<E: Send + 'static>(
    stream: &mut NotificationStream<E>,
    cancel: &CancellationToken,
) -> Result<(Vec<SharedNotification>, Vec<ThreadwatchError<E>>), ThreadwatchError<E>> {
    let mut values = Vec::new();
    let mut errors = Vec::new();
    loop {
        if cancel.is_cancelled() {
            return Err(ThreadwatchError::Cancelled);
        }
        match stream.next(cancel).await {
            Some(StreamItem::Value(v)) => values.push(v),
            Some(StreamItem::Error(e)) => errors.push(e),
            None => break,
        }
    }
    if cancel.is_cancelled() {
        return Err(ThreadwatchError::Cancelled);
    }
    Ok((values, errors))
}
