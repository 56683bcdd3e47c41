//! Terminal rendering of a running batch.

use crate::board::TaskObserver;
use crate::models::{BatchStats, TaskEvent, TaskState, TaskStatus};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

const FILE_TEMPLATE: &str = "{msg:30} {bar:40} {bytes}/{total_bytes} ({bytes_per_sec})";
const SPINNER_TEMPLATE: &str = "{msg:30} {spinner} {bytes}";
const OVERALL_TEMPLATE: &str = "{msg} {bar:40} {pos}/{len} [{elapsed_precise}, ETA {eta}]";

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-")
}

/// One bar per active file plus an overall files-done bar.
pub struct ConsoleProgress {
    multi: MultiProgress,
    overall: ProgressBar,
    bars: Mutex<HashMap<String, ProgressBar>>,
    finished: Mutex<HashSet<String>>,
}

impl ConsoleProgress {
    pub fn new(total_files: usize) -> Self {
        let multi = MultiProgress::new();
        let overall = multi.add(ProgressBar::new(total_files as u64));
        overall.set_style(style(OVERALL_TEMPLATE));
        overall.set_message("Overall");

        Self {
            multi,
            overall,
            bars: Mutex::new(HashMap::new()),
            finished: Mutex::new(HashSet::new()),
        }
    }

    pub fn hidden() -> Self {
        let progress = Self::new(0);
        progress
            .multi
            .set_draw_target(indicatif::ProgressDrawTarget::hidden());
        progress
    }

    pub fn finish(&self, stats: &BatchStats) {
        for (_, bar) in self.bars.lock().drain() {
            bar.finish_and_clear();
        }
        self.overall.finish_with_message(format!(
            "Complete ({} ok, {} failed)",
            stats.completed, stats.failed
        ));
        self.multi.clear().ok();
    }

    fn bar_for(&self, state: &TaskState) -> ProgressBar {
        let mut bars = self.bars.lock();
        bars.entry(state.path.clone())
            .or_insert_with(|| {
                let bar = self.multi.add(ProgressBar::new(0));
                bar.set_style(style(SPINNER_TEMPLATE));
                bar.set_message(state.path.clone());
                bar
            })
            .clone()
    }

    fn settle(&self, path: &str) {
        if let Some(bar) = self.bars.lock().remove(path) {
            bar.finish_and_clear();
        }
        if self.finished.lock().insert(path.to_string()) {
            self.overall.inc(1);
        }
    }
}

impl TaskObserver for ConsoleProgress {
    fn on_change(&self, event: &TaskEvent, state: &TaskState) {
        match state.status {
            TaskStatus::Queued => {
                if let TaskEvent::Reset { .. } = event {
                    self.finished.lock().remove(&state.path);
                }
            }
            TaskStatus::InProgress => {
                let bar = self.bar_for(state);
                if let Some(total) = state.total {
                    if bar.length() != Some(total) {
                        bar.set_length(total);
                        bar.set_style(style(FILE_TEMPLATE));
                    }
                }
                bar.set_position(state.loaded);
                if state.attempts > 1 {
                    bar.set_message(format!("{} [attempt {}]", state.path, state.attempts));
                }
            }
            TaskStatus::Completed => self.settle(&state.path),
            TaskStatus::Failed => {
                self.settle(&state.path);
                let reason = state.error.as_deref().unwrap_or("unknown error");
                self.multi
                    .println(format!("Failed: {} ({})", state.path, reason))
                    .ok();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_task_counts_once_toward_overall() {
        let progress = ConsoleProgress::hidden();
        progress.overall.set_length(1);
        let mut state = TaskState::new("a.glb".into());

        state.status = TaskStatus::Failed;
        progress.on_change(&TaskEvent::status("a.glb", TaskStatus::Failed, 4), &state);
        state.status = TaskStatus::Completed;
        progress.on_change(&TaskEvent::ForceComplete { path: "a.glb".into() }, &state);

        assert_eq!(progress.overall.position(), 1);
        assert!(progress.bars.lock().is_empty());
    }
}
