use crate::models::{Task, TaskState, TaskStatus};
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

const STATE_FILE: &str = ".asset-dl-state.json";

/// Remembers how the last batch into a destination ended.
pub struct StateManager {
    state_file: PathBuf,
}

impl StateManager {
    pub fn new(output_dir: &Path) -> Self {
        let state_file = output_dir.join(STATE_FILE);
        Self { state_file }
    }

    pub fn path(&self) -> &Path {
        &self.state_file
    }

    pub fn load_state(&self) -> Result<Vec<TaskState>> {
        if !self.state_file.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.state_file).context("Failed to read state file")?;

        serde_json::from_str(&content).context("Failed to parse state file")
    }

    /// Merges `states` over what is already stored, keyed by path.
    pub fn save_state(&self, states: &[TaskState]) -> Result<()> {
        let mut merged = self.load_state().unwrap_or_default();
        for state in states {
            match merged.iter_mut().find(|s| s.path == state.path) {
                Some(existing) => *existing = state.clone(),
                None => merged.push(state.clone()),
            }
        }

        let content = serde_json::to_string_pretty(&merged).context("Failed to serialize state")?;

        fs::write(&self.state_file, content).context("Failed to write state file")?;

        Ok(())
    }

    /// Drops tasks a previous run already completed.
    pub fn pending(&self, tasks: Vec<Task>) -> Result<Vec<Task>> {
        let done: HashSet<String> = self
            .load_state()?
            .into_iter()
            .filter(|s| s.status == TaskStatus::Completed)
            .map(|s| s.path)
            .collect();

        Ok(tasks.into_iter().filter(|t| !done.contains(&t.path)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(path: &str, status: TaskStatus) -> TaskState {
        TaskState {
            status,
            ..TaskState::new(path.to_string())
        }
    }

    #[test]
    fn missing_file_means_no_state() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(StateManager::new(tmp.path()).load_state().unwrap().is_empty());
    }

    #[test]
    fn resume_skips_completed_tasks_only() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = StateManager::new(tmp.path());
        manager
            .save_state(&[
                state("a.glb", TaskStatus::Completed),
                state("b.glb", TaskStatus::Failed),
            ])
            .unwrap();

        let tasks = vec![
            Task::new("a.glb", "a"),
            Task::new("b.glb", "b"),
            Task::new("c.glb", "c"),
        ];
        let pending: Vec<String> = manager
            .pending(tasks)
            .unwrap()
            .into_iter()
            .map(|t| t.path)
            .collect();
        assert_eq!(pending, vec!["b.glb", "c.glb"]);
    }

    #[test]
    fn later_runs_overwrite_earlier_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = StateManager::new(tmp.path());
        manager.save_state(&[state("b.glb", TaskStatus::Failed)]).unwrap();
        manager.save_state(&[state("b.glb", TaskStatus::Completed)]).unwrap();

        let stored = manager.load_state().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].status, TaskStatus::Completed);
    }
}
