//! Per-task state owned by the status callback.
//!
//! `TaskBoard` applies [`TaskEvent`]s to a list of [`TaskState`]s, looking
//! tasks up by path. A task that reached `Completed` ignores every later
//! event except `Reset`, so a progress callback racing the completion can
//! never pull it back. A `Failed` task only leaves that state through
//! `ForceComplete` or `Reset`.

use crate::models::{BatchStats, TaskEvent, TaskState, TaskStatus};
use parking_lot::Mutex;
use std::sync::Arc;

/// Something that wants to hear about accepted task changes.
pub trait TaskObserver: Send + Sync {
    fn on_change(&self, event: &TaskEvent, state: &TaskState);
}

#[derive(Default)]
pub struct TaskBoard {
    states: Mutex<Vec<TaskState>>,
    observers: Mutex<Vec<Arc<dyn TaskObserver>>>,
}

impl TaskBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, observer: Arc<dyn TaskObserver>) {
        self.observers.lock().push(observer);
    }

    pub fn apply(&self, event: TaskEvent) {
        let changed = {
            let mut states = self.states.lock();
            reduce(&mut states, &event)
        };

        if changed.is_empty() {
            return;
        }
        let observers = self.observers.lock().clone();
        for state in &changed {
            for observer in &observers {
                observer.on_change(&event, state);
            }
        }
    }

    pub fn get(&self, path: &str) -> Option<TaskState> {
        self.states.lock().iter().find(|s| s.path == path).cloned()
    }

    pub fn status(&self, path: &str) -> Option<TaskStatus> {
        self.states
            .lock()
            .iter()
            .find(|s| s.path == path)
            .map(|s| s.status)
    }

    pub fn snapshot(&self) -> Vec<TaskState> {
        self.states.lock().clone()
    }

    /// Counts are recomputed from the task list on every call.
    pub fn stats(&self) -> BatchStats {
        let states = self.states.lock();
        let mut stats = BatchStats {
            total: states.len(),
            ..BatchStats::default()
        };
        for state in states.iter() {
            match state.status {
                TaskStatus::Queued => stats.queued += 1,
                TaskStatus::InProgress => stats.in_progress += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
            }
            stats.bytes_loaded += state.loaded;
            stats.bytes_total += state.total.unwrap_or(0);
        }
        stats
    }
}

/// Returns the states that actually changed.
fn reduce(states: &mut Vec<TaskState>, event: &TaskEvent) -> Vec<TaskState> {
    if let TaskEvent::Reset { paths } = event {
        let mut changed = Vec::with_capacity(paths.len());
        for path in paths {
            let fresh = TaskState::new(path.clone());
            match states.iter_mut().find(|s| &s.path == path) {
                Some(existing) => *existing = fresh.clone(),
                None => states.push(fresh.clone()),
            }
            changed.push(fresh);
        }
        return changed;
    }

    let Some(path) = target(event) else {
        return Vec::new();
    };
    let Some(state) = states.iter_mut().find(|s| s.path == path) else {
        return Vec::new();
    };
    if state.status == TaskStatus::Completed {
        return Vec::new();
    }

    match event {
        TaskEvent::Progress { loaded, total, .. } => {
            if state.status.is_terminal() {
                return Vec::new();
            }
            state.loaded = *loaded;
            if total.is_some() {
                state.total = *total;
            }
        }
        TaskEvent::Status {
            status,
            attempt,
            error,
            ..
        } => {
            if state.status == TaskStatus::Failed {
                return Vec::new();
            }
            if *status == TaskStatus::InProgress {
                state.loaded = 0;
            }
            state.status = *status;
            state.attempts = state.attempts.max(*attempt);
            state.error = error.clone();
        }
        TaskEvent::Completed { bytes, .. } => {
            if state.status == TaskStatus::Failed {
                return Vec::new();
            }
            state.status = TaskStatus::Completed;
            state.loaded = *bytes;
            state.total = Some(*bytes);
            state.error = None;
        }
        TaskEvent::ForceComplete { .. } => {
            state.status = TaskStatus::Completed;
            let total = state.total.unwrap_or(state.loaded).max(state.loaded);
            state.loaded = total;
            state.total = Some(total);
            state.error = None;
        }
        TaskEvent::Reset { .. } => return Vec::new(),
    }

    vec![state.clone()]
}

fn target(event: &TaskEvent) -> Option<&str> {
    match event {
        TaskEvent::Progress { path, .. }
        | TaskEvent::Status { path, .. }
        | TaskEvent::Completed { path, .. }
        | TaskEvent::ForceComplete { path } => Some(path),
        TaskEvent::Reset { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn board_with(paths: &[&str]) -> TaskBoard {
        let board = TaskBoard::new();
        board.apply(TaskEvent::Reset {
            paths: paths.iter().map(|p| p.to_string()).collect(),
        });
        board
    }

    #[test]
    fn reset_queues_every_path() {
        let board = board_with(&["a", "b/c"]);
        let stats = board.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.queued, 2);
    }

    #[test]
    fn late_progress_after_completion_is_ignored() {
        let board = board_with(&["a.bin"]);
        board.apply(TaskEvent::status("a.bin", TaskStatus::InProgress, 1));
        board.apply(TaskEvent::Completed {
            path: "a.bin".into(),
            bytes: 100,
        });
        board.apply(TaskEvent::Progress {
            path: "a.bin".into(),
            loaded: 40,
            total: Some(100),
        });
        board.apply(TaskEvent::status("a.bin", TaskStatus::Failed, 2));

        let state = board.get("a.bin").unwrap();
        assert_eq!(state.status, TaskStatus::Completed);
        assert_eq!(state.loaded, 100);
        assert_eq!(state.total, Some(100));
    }

    #[test]
    fn failed_is_terminal_but_force_complete_overrides() {
        let board = board_with(&["x"]);
        board.apply(TaskEvent::status("x", TaskStatus::Failed, 4));
        board.apply(TaskEvent::status("x", TaskStatus::InProgress, 5));
        assert_eq!(board.status("x"), Some(TaskStatus::Failed));

        board.apply(TaskEvent::Completed {
            path: "x".into(),
            bytes: 9,
        });
        let state = board.get("x").unwrap();
        assert_eq!(state.status, TaskStatus::Failed);
        assert_eq!(state.loaded, 0);

        board.apply(TaskEvent::ForceComplete { path: "x".into() });
        assert_eq!(board.status("x"), Some(TaskStatus::Completed));
    }

    #[test]
    fn reset_reopens_a_completed_task() {
        let board = board_with(&["x"]);
        board.apply(TaskEvent::Completed {
            path: "x".into(),
            bytes: 3,
        });
        board.apply(TaskEvent::Reset {
            paths: vec!["x".into()],
        });
        assert_eq!(board.get("x").unwrap(), TaskState::new("x".into()));
    }

    #[test]
    fn unknown_path_is_ignored() {
        let board = board_with(&["x"]);
        board.apply(TaskEvent::status("nope", TaskStatus::InProgress, 1));
        assert_eq!(board.stats().in_progress, 0);
        assert!(board.get("nope").is_none());
    }

    #[test]
    fn observers_only_see_accepted_changes() {
        struct Count(Mutex<usize>);
        impl TaskObserver for Count {
            fn on_change(&self, _event: &TaskEvent, _state: &TaskState) {
                *self.0.lock() += 1;
            }
        }

        let board = board_with(&["x"]);
        let count = Arc::new(Count(Mutex::new(0)));
        board.subscribe(count.clone());

        board.apply(TaskEvent::Completed {
            path: "x".into(),
            bytes: 1,
        });
        board.apply(TaskEvent::Progress {
            path: "x".into(),
            loaded: 0,
            total: None,
        });
        assert_eq!(*count.0.lock(), 1);
    }
}
