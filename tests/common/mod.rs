#![allow(dead_code)]

use asset_dl::board::TaskObserver;
use asset_dl::destination::{DirHandle, FileSink};
use asset_dl::error::TransferError;
use asset_dl::models::{TaskEvent, TaskState, TaskStatus};
use asset_dl::source::{ProgressFn, ResolveRequest, Transport, UrlResolver};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct MemFs {
    dirs: HashSet<String>,
    files: HashMap<String, Vec<u8>>,
}

/// In-memory directory tree.
#[derive(Clone, Default)]
pub struct MemoryDir {
    fs: Arc<Mutex<MemFs>>,
    prefix: String,
}

impl MemoryDir {
    pub fn new() -> Self {
        Self::default()
    }

    fn join(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", self.prefix, name)
        }
    }

    pub fn files(&self) -> HashMap<String, Vec<u8>> {
        self.fs.lock().files.clone()
    }

    pub fn dirs(&self) -> HashSet<String> {
        self.fs.lock().dirs.clone()
    }
}

#[async_trait]
impl DirHandle for MemoryDir {
    async fn directory(&self, name: &str, create: bool) -> io::Result<Box<dyn DirHandle>> {
        let path = self.join(name);
        let mut fs = self.fs.lock();
        if !fs.dirs.contains(&path) {
            if !create {
                return Err(io::Error::new(io::ErrorKind::NotFound, path));
            }
            fs.dirs.insert(path.clone());
        }
        Ok(Box::new(MemoryDir {
            fs: Arc::clone(&self.fs),
            prefix: path,
        }))
    }

    async fn file(&self, name: &str) -> io::Result<Box<dyn FileSink>> {
        Ok(Box::new(MemoryFile {
            fs: Arc::clone(&self.fs),
            path: self.join(name),
            buf: Vec::new(),
        }))
    }
}

struct MemoryFile {
    fs: Arc<Mutex<MemFs>>,
    path: String,
    buf: Vec<u8>,
}

#[async_trait]
impl FileSink for MemoryFile {
    async fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.buf.extend_from_slice(chunk);
        Ok(())
    }

    async fn close(self: Box<Self>) -> io::Result<u64> {
        let MemoryFile { fs, path, buf } = *self;
        let len = buf.len() as u64;
        fs.lock().files.insert(path, buf);
        Ok(len)
    }
}

/// Resolves `key` to `mem://key`, failing for the listed keys.
#[derive(Default)]
pub struct KeyResolver {
    failing: HashSet<String>,
    calls: Mutex<HashMap<String, u32>>,
}

impl KeyResolver {
    pub fn failing(keys: &[&str]) -> Self {
        Self {
            failing: keys.iter().map(|k| k.to_string()).collect(),
            calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn calls(&self, key: &str) -> u32 {
        self.calls.lock().get(key).copied().unwrap_or(0)
    }
}

#[async_trait]
impl UrlResolver for KeyResolver {
    async fn resolve(&self, request: &ResolveRequest) -> Result<String, TransferError> {
        *self.calls.lock().entry(request.key.clone()).or_default() += 1;
        if self.failing.contains(&request.key) {
            return Err(TransferError::Resolve(format!("{} is not distributable", request.key)));
        }
        Ok(format!("mem://{}", request.key))
    }
}

/// Serves `url` bytes as the body after `latency`, failing scripted URLs a
/// number of times first.
#[derive(Default)]
pub struct ScriptedTransport {
    latency: Duration,
    failures: Mutex<HashMap<String, u32>>,
    attempts: Mutex<HashMap<String, u32>>,
    panics: HashSet<String>,
}

impl ScriptedTransport {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    /// `u32::MAX` fails forever.
    pub fn fail(self, url: &str, times: u32) -> Self {
        self.failures.lock().insert(url.to_string(), times);
        self
    }

    pub fn panic_on(mut self, url: &str) -> Self {
        self.panics.insert(url.to_string());
        self
    }

    pub fn attempts(&self, url: &str) -> u32 {
        self.attempts.lock().get(url).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn fetch(
        &self,
        url: &str,
        sink: &mut dyn FileSink,
        progress: &ProgressFn,
    ) -> Result<u64, TransferError> {
        *self.attempts.lock().entry(url.to_string()).or_default() += 1;

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.panics.contains(url) {
            panic!("transport blew up on {url}");
        }

        let should_fail = {
            let mut failures = self.failures.lock();
            match failures.get_mut(url) {
                Some(remaining) if *remaining > 0 => {
                    if *remaining != u32::MAX {
                        *remaining -= 1;
                    }
                    true
                }
                _ => false,
            }
        };
        if should_fail {
            return Err(TransferError::Status {
                status: 503,
                url: url.to_string(),
            });
        }

        let body = url.as_bytes();
        let total = Some(body.len() as u64);
        let (head, tail) = body.split_at(body.len() / 2);
        sink.write(head).await?;
        progress(head.len() as u64, total);
        sink.write(tail).await?;
        progress(body.len() as u64, total);

        Ok(body.len() as u64)
    }
}

/// Tracks how many tasks are `InProgress` at once.
#[derive(Default)]
pub struct InFlightProbe {
    inner: Mutex<(HashSet<String>, usize)>,
    accepted_after_complete: Mutex<usize>,
    completed: Mutex<HashSet<String>>,
}

impl InFlightProbe {
    pub fn max_in_flight(&self) -> usize {
        self.inner.lock().1
    }

    pub fn changes_after_completion(&self) -> usize {
        *self.accepted_after_complete.lock()
    }
}

impl TaskObserver for InFlightProbe {
    fn on_change(&self, event: &TaskEvent, state: &TaskState) {
        if self.completed.lock().contains(&state.path) && !matches!(event, TaskEvent::Reset { .. }) {
            *self.accepted_after_complete.lock() += 1;
        }

        let mut inner = self.inner.lock();
        match state.status {
            TaskStatus::InProgress => {
                inner.0.insert(state.path.clone());
            }
            TaskStatus::Queued | TaskStatus::Completed | TaskStatus::Failed => {
                inner.0.remove(&state.path);
            }
        }
        inner.1 = inner.1.max(inner.0.len());

        if state.status == TaskStatus::Completed {
            self.completed.lock().insert(state.path.clone());
        }
    }
}
