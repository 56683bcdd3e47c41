//! Turning file listings into flat task lists.

use crate::models::{AssetRef, Task};
use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::Path;

/// One entry of an asset's file tree.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileNode {
    pub name: String,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub version_id: Option<String>,
    #[serde(default)]
    pub is_folder: bool,
    #[serde(default)]
    pub children: Vec<FileNode>,
}

impl FileNode {
    fn is_folder(&self) -> bool {
        self.is_folder || !self.children.is_empty()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetManifest {
    pub database_id: String,
    pub asset_id: String,
    #[serde(default)]
    pub files: Vec<FileNode>,
}

impl AssetManifest {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest {}", path.display()))?;
        serde_json::from_str(&content).context("Failed to parse manifest")
    }

    /// Depth-first, document order, folders skipped.
    pub fn flatten(&self) -> Vec<Task> {
        let asset = AssetRef {
            database_id: self.database_id.clone(),
            asset_id: self.asset_id.clone(),
        };
        let mut tasks = Vec::new();
        for node in &self.files {
            collect(node, "", &asset, &mut tasks);
        }
        tasks
    }
}

fn collect(node: &FileNode, prefix: &str, asset: &AssetRef, out: &mut Vec<Task>) {
    let name = node.name.trim_matches('/');
    let path = if prefix.is_empty() {
        name.to_string()
    } else if name.is_empty() {
        prefix.to_string()
    } else {
        format!("{prefix}/{name}")
    };

    if node.is_folder() {
        for child in &node.children {
            collect(child, &path, asset, out);
        }
        return;
    }

    out.push(Task {
        source_key: node.key.clone().unwrap_or_else(|| path.clone()),
        path,
        size_hint: node.size,
        version_id: node.version_id.clone(),
        asset: Some(asset.clone()),
    });
}

/// Reads a tab separated `path<TAB>url` list; a leading `file_name` header
/// line is skipped.
pub fn parse_link_file(path: &Path) -> Result<Vec<Task>> {
    let file = File::open(path).context("Failed to open link file")?;
    let reader = BufReader::new(file);

    let mut tasks = Vec::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line.context("Failed to read line")?;

        if idx == 0 && line.starts_with("file_name") {
            continue;
        }
        if line.trim().is_empty() {
            continue;
        }

        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() < 2 {
            return Err(anyhow!("Malformed link file line {}: {}", idx + 1, line));
        }
        tasks.push(Task::new(parts[0].trim(), parts[1].trim()));
    }

    Ok(tasks)
}

/// Tasks below `prefix`. Without `recursive` only direct children are kept.
pub fn select_prefix(tasks: Vec<Task>, prefix: &str, recursive: bool) -> Vec<Task> {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        return if recursive {
            tasks
        } else {
            tasks.into_iter().filter(|t| !t.path.contains('/')).collect()
        };
    }

    let prefix = format!("{prefix}/");
    tasks
        .into_iter()
        .filter(|t| match t.path.strip_prefix(&prefix) {
            Some(rest) => recursive || !rest.contains('/'),
            None => false,
        })
        .collect()
}
