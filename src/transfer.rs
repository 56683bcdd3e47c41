//! Moves one task from source to destination, retrying on failure.

use crate::board::TaskBoard;
use crate::destination::DirHandle;
use crate::error::TransferError;
use crate::models::{Layout, Task, TaskEvent, TaskStatus};
use crate::retry::{Backoff, RetryPolicy, retry_with_backoff};
use crate::source::{ResolveRequest, Transport, UrlResolver};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Everything a task needs besides its own descriptor.
pub struct TransferContext {
    pub resolver: Arc<dyn UrlResolver>,
    pub transport: Arc<dyn Transport>,
    pub root: Arc<dyn DirHandle>,
    pub board: Arc<TaskBoard>,
    pub policy: RetryPolicy<Arc<dyn Backoff>>,
    pub attempt_timeout: Option<Duration>,
    pub layout: Layout,
}

/// Runs `task` to a terminal status. Returns whether it completed.
pub async fn transfer_with_retry(task: Task, ctx: Arc<TransferContext>) -> bool {
    let completed = Arc::new(AtomicBool::new(false));
    let task_ref = &task;
    let ctx_ref = ctx.as_ref();

    let result = retry_with_backoff(
        &ctx.policy,
        {
            let completed = Arc::clone(&completed);
            move |n| {
                let attempt = n + 1;
                debug!(path = %task_ref.path, attempt, "starting transfer");
                ctx_ref.board.apply(TaskEvent::status(
                    &task_ref.path,
                    TaskStatus::InProgress,
                    attempt,
                ));
                run_attempt(task_ref, ctx_ref, Arc::clone(&completed))
            }
        },
        |retry, error, delay| {
            warn!(
                path = %task_ref.path,
                retry,
                delay_ms = delay.as_millis() as u64,
                %error,
                "transfer failed, retrying"
            );
        },
    )
    .await;

    match result {
        Ok(bytes) => {
            completed.store(true, Ordering::Release);
            ctx.board.apply(TaskEvent::Completed {
                path: task.path.clone(),
                bytes,
            });
            debug!(path = %task.path, bytes, "transfer complete");
            true
        }
        Err(exhausted) => {
            warn!(
                path = %task.path,
                attempts = exhausted.attempts,
                error = %exhausted.last_error,
                "giving up on task"
            );
            ctx.board.apply(TaskEvent::Status {
                path: task.path.clone(),
                status: TaskStatus::Failed,
                attempt: exhausted.attempts,
                error: Some(exhausted.last_error.to_string()),
            });
            false
        }
    }
}

async fn run_attempt(
    task: &Task,
    ctx: &TransferContext,
    completed: Arc<AtomicBool>,
) -> Result<u64, TransferError> {
    let work = transfer_once(task, ctx, completed);
    match ctx.attempt_timeout {
        Some(limit) => tokio::time::timeout(limit, work)
            .await
            .map_err(|_| TransferError::Timeout(limit))?,
        None => work.await,
    }
}

async fn transfer_once(
    task: &Task,
    ctx: &TransferContext,
    completed: Arc<AtomicBool>,
) -> Result<u64, TransferError> {
    let url = ctx.resolver.resolve(&ResolveRequest::from(task)).await?;

    let (parent, name) = open_parent(ctx.root.as_ref(), task, ctx.layout).await?;
    let mut sink = match &parent {
        Some(dir) => dir.file(name).await?,
        None => ctx.root.file(name).await?,
    };

    let board = Arc::clone(&ctx.board);
    let path = task.path.clone();
    let size_hint = task.size_hint;
    let progress = move |loaded: u64, total: Option<u64>| {
        if completed.load(Ordering::Acquire) {
            return;
        }
        board.apply(TaskEvent::Progress {
            path: path.clone(),
            loaded,
            total: total.or(size_hint),
        });
    };

    ctx.transport.fetch(&url, &mut *sink, &progress).await?;
    let bytes = sink.close().await?;
    Ok(bytes)
}

/// Walks to the directory that holds `task`'s file, creating segments as
/// needed. `None` means the root itself.
async fn open_parent<'t>(
    root: &dyn DirHandle,
    task: &'t Task,
    layout: Layout,
) -> io::Result<(Option<Box<dyn DirHandle>>, &'t str)> {
    let segments: Vec<&str> = task.segments().collect();
    let Some((name, parents)) = segments.split_last() else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("empty task path '{}'", task.path),
        ));
    };

    if layout == Layout::Flatten {
        return Ok((None, *name));
    }

    let mut current: Option<Box<dyn DirHandle>> = None;
    for segment in parents {
        let next = match &current {
            Some(dir) => dir.directory(segment, true).await?,
            None => root.directory(segment, true).await?,
        };
        current = Some(next);
    }
    Ok((current, *name))
}
