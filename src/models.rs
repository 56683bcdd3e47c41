use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_CONCURRENCY: usize = 5;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(1000);
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(300);

/// Database/asset pair a file belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRef {
    pub database_id: String,
    pub asset_id: String,
}

/// One file to transfer within a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Relative `/`-separated path, unique within the batch.
    pub path: String,
    /// Locator handed to the URL resolver.
    pub source_key: String,
    pub size_hint: Option<u64>,
    pub version_id: Option<String>,
    pub asset: Option<AssetRef>,
}

impl Task {
    pub fn new(path: impl Into<String>, source_key: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            source_key: source_key.into(),
            size_hint: None,
            version_id: None,
            asset: None,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size_hint = Some(size);
        self
    }

    pub fn with_asset(mut self, asset: AssetRef) -> Self {
        self.asset = Some(asset);
        self
    }

    /// Last path segment, the name the file is written under.
    pub fn file_name(&self) -> &str {
        self.segments().last().unwrap_or("")
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.path.split('/').filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    Queued,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskState {
    pub path: String,
    pub status: TaskStatus,
    pub loaded: u64,
    pub total: Option<u64>,
    pub attempts: u32,
    pub error: Option<String>,
}

impl TaskState {
    pub fn new(path: String) -> Self {
        Self {
            path,
            status: TaskStatus::Queued,
            loaded: 0,
            total: None,
            attempts: 0,
            error: None,
        }
    }
}

/// Updates sent from the transfer side to the state owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    Progress {
        path: String,
        loaded: u64,
        total: Option<u64>,
    },
    Status {
        path: String,
        status: TaskStatus,
        attempt: u32,
        error: Option<String>,
    },
    Completed {
        path: String,
        bytes: u64,
    },
    ForceComplete {
        path: String,
    },
    /// Re-initializes the listed tasks as `Queued`, adding unknown ones.
    Reset {
        paths: Vec<String>,
    },
}

impl TaskEvent {
    pub fn status(path: &str, status: TaskStatus, attempt: u32) -> Self {
        TaskEvent::Status {
            path: path.to_string(),
            status,
            attempt,
            error: None,
        }
    }
}

/// Destination naming policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Layout {
    /// Recreate the relative directory structure under the root.
    #[default]
    Preserve,
    /// Write every file directly into the root by its file name.
    Flatten,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct BatchStats {
    pub total: usize,
    pub queued: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    pub bytes_loaded: u64,
    pub bytes_total: u64,
}

impl BatchStats {
    pub fn is_settled(&self) -> bool {
        self.queued == 0 && self.in_progress == 0
    }
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub concurrency: usize,
    pub max_retries: u32,
    pub backoff_base: Duration,
    /// Upper bound for a single attempt; `None` lets attempts hang forever.
    pub attempt_timeout: Option<Duration>,
    pub layout: Layout,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base: DEFAULT_BACKOFF_BASE,
            attempt_timeout: Some(DEFAULT_ATTEMPT_TIMEOUT),
            layout: Layout::Preserve,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedTask {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletedTask {
    pub path: String,
    pub bytes: u64,
}

/// A presigned URL handed out instead of downloading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SharedLink {
    pub path: String,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct BatchReport {
    pub stats: BatchStats,
    pub completed: Vec<CompletedTask>,
    pub failed: Vec<FailedTask>,
    pub peak_active: usize,
    pub elapsed: Duration,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.stats.failed == 0
    }

    /// Bytes written by the tasks that completed.
    pub fn bytes_transferred(&self) -> u64 {
        self.completed.iter().map(|c| c.bytes).sum()
    }

    /// Bytes per second over the whole batch.
    pub fn average_speed(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.bytes_transferred() as f64 / secs
        } else {
            0.0
        }
    }

    /// Paths a caller would resubmit to retry the batch.
    pub fn unfinished(&self) -> Vec<String> {
        self.failed.iter().map(|f| f.path.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_is_the_last_written_segment() {
        assert_eq!(Task::new("models/chair.glb", "k").file_name(), "chair.glb");
        assert_eq!(Task::new("x/a/", "k").file_name(), "a");
        let task = Task::new("a//b", "k");
        assert_eq!(task.file_name(), task.segments().last().unwrap());
    }

    #[test]
    fn average_speed_counts_completed_bytes_only() {
        let report = BatchReport {
            stats: BatchStats::default(),
            completed: vec![
                CompletedTask { path: "a".into(), bytes: 3000 },
                CompletedTask { path: "b".into(), bytes: 1000 },
            ],
            failed: vec![FailedTask { path: "c".into(), error: "boom".into() }],
            peak_active: 1,
            elapsed: Duration::from_secs(2),
        };
        assert_eq!(report.bytes_transferred(), 4000);
        assert_eq!(report.average_speed(), 2000.0);

        let instant = BatchReport { elapsed: Duration::ZERO, ..report };
        assert_eq!(instant.average_speed(), 0.0);
    }
}
