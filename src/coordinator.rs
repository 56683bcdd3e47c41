//! Runs a whole batch: validation, queued transfers, reconciliation.

use crate::board::TaskBoard;
use crate::destination::{DirHandle, TEMP_SUFFIX};
use crate::error::{BatchError, PickError};
use crate::models::{
    BatchOptions, BatchReport, BatchStats, CompletedTask, FailedTask, Layout, SharedLink, Task,
    TaskEvent, TaskStatus,
};
use crate::queue::BoundedQueue;
use crate::retry::{Backoff, ExponentialBackoff, RetryPolicy, retry_with_backoff};
use crate::source::{ResolveRequest, Transport, UrlResolver};
use crate::transfer::{TransferContext, transfer_with_retry};
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

pub struct BatchCoordinator {
    resolver: Arc<dyn UrlResolver>,
    transport: Arc<dyn Transport>,
    board: Arc<TaskBoard>,
    backoff: Arc<dyn Backoff>,
    options: BatchOptions,
}

impl BatchCoordinator {
    pub fn new(
        resolver: Arc<dyn UrlResolver>,
        transport: Arc<dyn Transport>,
        options: BatchOptions,
    ) -> Self {
        let backoff: Arc<dyn Backoff> = Arc::new(ExponentialBackoff::new(options.backoff_base));
        Self {
            resolver,
            transport,
            board: Arc::new(TaskBoard::new()),
            backoff,
            options,
        }
    }

    /// Replaces the exponential default.
    pub fn with_backoff(mut self, backoff: Arc<dyn Backoff>) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn board(&self) -> Arc<TaskBoard> {
        Arc::clone(&self.board)
    }

    pub fn options(&self) -> &BatchOptions {
        &self.options
    }

    pub fn stats(&self) -> BatchStats {
        self.board.stats()
    }

    /// Checks everything that must hold before a single byte moves.
    pub fn validate(&self, tasks: &[Task]) -> Result<(), BatchError> {
        if tasks.is_empty() {
            return Err(BatchError::Empty);
        }

        let mut seen = HashSet::new();
        for task in tasks {
            if !is_safe_path(&task.path) {
                return Err(BatchError::UnsafePath(task.path.clone()));
            }
            if !seen.insert(task.path.as_str()) {
                return Err(BatchError::DuplicatePath(task.path.clone()));
            }
        }

        if self.options.layout == Layout::Flatten {
            let conflicts = flatten_conflicts(tasks);
            if !conflicts.is_empty() {
                return Err(BatchError::NameConflict(conflicts));
            }
        }

        Ok(())
    }

    /// Validates, then asks `pick` for the destination. A cancelled pick
    /// ends the batch quietly with `Ok(None)`.
    pub async fn run_with_picker<P, Fut>(
        &self,
        tasks: Vec<Task>,
        pick: P,
    ) -> Result<Option<BatchReport>, BatchError>
    where
        P: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<dyn DirHandle>, PickError>>,
    {
        self.validate(&tasks)?;

        let root = match pick().await {
            Ok(root) => root,
            Err(PickError::Cancelled) => {
                info!("destination selection cancelled, nothing to do");
                return Ok(None);
            }
            Err(PickError::Io(e)) => return Err(BatchError::Destination(e)),
        };

        self.run(tasks, root).await.map(Some)
    }

    /// Drives every task to `Completed` or `Failed`.
    pub async fn run(
        &self,
        tasks: Vec<Task>,
        root: Arc<dyn DirHandle>,
    ) -> Result<BatchReport, BatchError> {
        self.validate(&tasks)?;

        let started = Instant::now();
        info!(
            tasks = tasks.len(),
            concurrency = self.options.concurrency,
            layout = ?self.options.layout,
            "starting batch"
        );

        self.board.apply(TaskEvent::Reset {
            paths: tasks.iter().map(|t| t.path.clone()).collect(),
        });

        let ctx = Arc::new(TransferContext {
            resolver: Arc::clone(&self.resolver),
            transport: Arc::clone(&self.transport),
            root,
            board: Arc::clone(&self.board),
            policy: RetryPolicy::new(self.options.max_retries, Arc::clone(&self.backoff)),
            attempt_timeout: self.options.attempt_timeout,
            layout: self.options.layout,
        });

        let queue = BoundedQueue::new(self.options.concurrency);
        let tickets: Vec<_> = tasks
            .iter()
            .cloned()
            .map(|task| {
                let ctx = Arc::clone(&ctx);
                queue.add(move || transfer_with_retry(task, ctx))
            })
            .collect();

        let outcomes = join_all(tickets).await;

        for (task, outcome) in tasks.iter().zip(outcomes) {
            self.reconcile(task, outcome.unwrap_or(false));
        }

        let stats = self.board.stats();
        let mut completed = Vec::new();
        let mut failed = Vec::new();
        for task in &tasks {
            let Some(state) = self.board.get(&task.path) else {
                continue;
            };
            match state.status {
                TaskStatus::Completed => completed.push(CompletedTask {
                    path: state.path,
                    bytes: state.loaded,
                }),
                TaskStatus::Failed => failed.push(FailedTask {
                    error: state.error.unwrap_or_else(|| "unknown error".to_string()),
                    path: state.path,
                }),
                TaskStatus::Queued | TaskStatus::InProgress => {}
            }
        }

        let report = BatchReport {
            stats,
            completed,
            failed,
            peak_active: queue.peak_active(),
            elapsed: started.elapsed(),
        };
        info!(
            completed = report.stats.completed,
            failed = report.stats.failed,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "batch finished"
        );

        Ok(report)
    }

    /// Resolves every task to its download URL without fetching anything.
    /// Tasks that still fail after retries are listed in the second vector.
    pub async fn resolve_links(
        &self,
        tasks: Vec<Task>,
    ) -> Result<(Vec<SharedLink>, Vec<FailedTask>), BatchError> {
        if tasks.is_empty() {
            return Err(BatchError::Empty);
        }

        let queue = BoundedQueue::new(self.options.concurrency);
        let tickets: Vec<_> = tasks
            .iter()
            .map(|task| {
                let resolver = Arc::clone(&self.resolver);
                let policy = RetryPolicy::new(self.options.max_retries, Arc::clone(&self.backoff));
                let request = ResolveRequest::from(task);
                queue.add(move || async move {
                    let resolver = resolver.as_ref();
                    let request = &request;
                    retry_with_backoff(
                        &policy,
                        move |_| resolver.resolve(request),
                        |retry, error, _| {
                            warn!(key = %request.key, retry, %error, "resolve failed, retrying");
                        },
                    )
                    .await
                    .map_err(|exhausted| exhausted.last_error.to_string())
                })
            })
            .collect();

        let mut links = Vec::new();
        let mut failed = Vec::new();
        for (task, outcome) in tasks.into_iter().zip(join_all(tickets).await) {
            match outcome {
                Ok(Ok(url)) => links.push(SharedLink { path: task.path, url }),
                Ok(Err(error)) => failed.push(FailedTask { path: task.path, error }),
                Err(lost) => failed.push(FailedTask {
                    path: task.path,
                    error: lost.to_string(),
                }),
            }
        }
        info!(resolved = links.len(), failed = failed.len(), "links resolved");

        Ok((links, failed))
    }

    /// Status updates and return values travel separately; make them agree.
    fn reconcile(&self, task: &Task, succeeded: bool) {
        let status = self.board.status(&task.path);

        if succeeded {
            if status != Some(TaskStatus::Completed) {
                warn!(path = %task.path, ?status, "transfer succeeded without a completion update");
                self.board.apply(TaskEvent::ForceComplete {
                    path: task.path.clone(),
                });
            }
        } else if !status.is_some_and(TaskStatus::is_terminal) {
            warn!(path = %task.path, ?status, "transfer ended without a terminal status");
            self.board.apply(TaskEvent::Status {
                path: task.path.clone(),
                status: TaskStatus::Failed,
                attempt: 0,
                error: Some("transfer did not report a result".to_string()),
            });
        }
    }
}

/// One canonical spelling per destination file: relative, no empty or dot
/// segments, nothing that could alias a temporary file.
fn is_safe_path(path: &str) -> bool {
    if path.is_empty() || path.contains('\\') || path.contains('\0') {
        return false;
    }
    path.split('/').all(|s| {
        !s.is_empty() && s != "." && s != ".." && !s.ends_with(TEMP_SUFFIX)
    })
}

/// File names that occur more than once once directories are dropped, each
/// listed once in order of first appearance.
pub fn flatten_conflicts(tasks: &[Task]) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for task in tasks {
        *counts.entry(task.file_name()).or_default() += 1;
    }

    let mut reported = HashSet::new();
    tasks
        .iter()
        .map(Task::file_name)
        .filter(|name| counts[name] > 1 && reported.insert(*name))
        .map(str::to_string)
        .collect()
}
