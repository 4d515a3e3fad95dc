//! Bounded-concurrency batch task runner (spec 4.9).

use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use std::future::Future;
use threadwatch_core::cancel::CancellationToken;
use threadwatch_core::model::ActionResult;
use tokio::sync::{mpsc, Mutex};

#[cfg(feature = "metrics")]
use metrics::counter;

const DEFAULT_CONCURRENCY: usize = 5;

/// One unit of work handed to [`BatchProcessor::run`].
///
/// The future must resolve to an [`ActionResult`] with `success`/`error`
/// already populated; `BatchProcessor` never inspects `Ok`/`Err`, only the
/// result it's given.
pub type BatchTask = Pin<Box<dyn Future<Output = ActionResult> + Send>>;

/// Progress/error callbacks and the worker-pool width (spec 4.9).
#[derive(Clone, Default)]
pub struct BatchOptions {
    /// Clamped to [`DEFAULT_CONCURRENCY`] when `0`.
    pub concurrency: usize,
    pub on_progress: Option<Arc<dyn Fn(usize, usize) + Send + Sync>>,
    pub on_error: Option<Arc<dyn Fn(Option<&str>, &str) + Send + Sync>>,
}

impl BatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_progress(mut self, on_progress: impl Fn(usize, usize) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(on_progress));
        self
    }

    pub fn with_error(mut self, on_error: impl Fn(Option<&str>, &str) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(on_error));
        self
    }

    fn resolved_concurrency(&self) -> usize {
        if self.concurrency == 0 {
            DEFAULT_CONCURRENCY
        } else {
            self.concurrency
        }
    }
}

/// Outcome of one [`BatchProcessor::run`] call.
pub struct BatchResult {
    pub duration: Duration,
    /// Per-task results, in arrival (completion) order — not input order
    /// (spec section 5: "BatchProcessor results are in arrival order").
    pub results: Vec<ActionResult>,
    pub errors: Vec<(Option<String>, String)>,
}

/// Runs a list of [`BatchTask`]s over a fixed-width worker pool.
pub struct BatchProcessor;

impl BatchProcessor {
    /// Fans `tasks` out to `opts.concurrency` workers pulling from a shared
    /// queue. Each worker checks `cancel` before taking its next task; once
    /// cancelled, workers stop pulling and any tasks still queued are left
    /// unrun (spec 4.9 step 2).
    pub async fn run(tasks: Vec<BatchTask>, opts: &BatchOptions, cancel: &CancellationToken) -> BatchResult {
        let total = tasks.len();
        if total == 0 {
            return BatchResult {
                duration: Duration::ZERO,
                results: Vec::new(),
                errors: Vec::new(),
            };
        }

        let start = Instant::now();
        let concurrency = opts.resolved_concurrency().min(total);

        let (task_tx, task_rx) = mpsc::channel::<BatchTask>(total);
        for task in tasks {
            let _ = task_tx.send(task).await;
        }
        drop(task_tx);
        let task_rx = Arc::new(Mutex::new(task_rx));

        let (result_tx, mut result_rx) = mpsc::channel::<ActionResult>(total);

        let mut workers = tokio::task::JoinSet::new();
        for _ in 0..concurrency {
            let task_rx = Arc::clone(&task_rx);
            let result_tx = result_tx.clone();
            let cancel = cancel.clone();
            workers.spawn(async move {
                loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let next = task_rx.lock().await.recv().await;
                    let Some(task) = next else { break };
                    let result = task.await;
                    if result_tx.send(result).await.is_err() {
                        break;
                    }
                }
            });
        }
        drop(result_tx);

        let mut results = Vec::with_capacity(total);
        let mut errors = Vec::new();
        let mut completed = 0usize;
        while let Some(result) = result_rx.recv().await {
            completed += 1;
            if !result.success {
                let id = result.action.notification_id.clone();
                let message = result.error.clone().unwrap_or_default();
                if let Some(on_error) = &opts.on_error {
                    on_error(id.as_deref(), &message);
                }
                #[cfg(feature = "metrics")]
                counter!("threadwatch_batch_task_errors_total").increment(1);
                errors.push((id, message));
            }
            results.push(result);
            if let Some(on_progress) = &opts.on_progress {
                on_progress(completed, total);
            }
        }

        while workers.join_next().await.is_some() {}

        BatchResult {
            duration: start.elapsed(),
            results,
            errors,
        }
    }
}
