//! Destination handles: a directory you can descend into and create files in.

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Suffix of in-flight files. Task paths may not use it.
pub const TEMP_SUFFIX: &str = ".asset-dl-tmp";

#[async_trait]
pub trait DirHandle: Send + Sync {
    /// Opens the child directory `name`. With `create`, a missing directory
    /// is created and an existing one is reused.
    async fn directory(&self, name: &str, create: bool) -> io::Result<Box<dyn DirHandle>>;

    /// Opens `name` for writing, replacing any previous content on close.
    async fn file(&self, name: &str) -> io::Result<Box<dyn FileSink>>;
}

#[async_trait]
pub trait FileSink: Send {
    async fn write(&mut self, chunk: &[u8]) -> io::Result<()>;

    /// Finishes the file and returns the number of bytes written.
    async fn close(self: Box<Self>) -> io::Result<u64>;
}

/// A directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalDir {
    path: PathBuf,
}

impl LocalDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Creates the directory (and parents) if needed.
    pub async fn open_or_create(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        fs::create_dir_all(&path).await?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn check_name(name: &str) -> io::Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid path segment '{name}'"),
        ));
    }
    Ok(())
}

#[async_trait]
impl DirHandle for LocalDir {
    async fn directory(&self, name: &str, create: bool) -> io::Result<Box<dyn DirHandle>> {
        check_name(name)?;
        let path = self.path.join(name);

        if create {
            match fs::create_dir(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    if !fs::metadata(&path).await?.is_dir() {
                        return Err(e);
                    }
                }
                Err(e) => return Err(e),
            }
        } else if !fs::metadata(&path).await?.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} is not a directory", path.display()),
            ));
        }

        Ok(Box::new(LocalDir { path }))
    }

    async fn file(&self, name: &str) -> io::Result<Box<dyn FileSink>> {
        check_name(name)?;
        let final_path = self.path.join(name);
        let partial_path = self
            .path
            .join(format!(".{name}.{}{TEMP_SUFFIX}", uuid::Uuid::new_v4()));
        let file = File::create(&partial_path).await?;

        Ok(Box::new(LocalFile {
            file: Some(file),
            partial_path,
            final_path,
            written: 0,
            committed: false,
        }))
    }
}

/// Writes to a hidden temporary file and renames it into place on close.
/// Dropped without a successful close, it removes the temporary file.
struct LocalFile {
    file: Option<File>,
    partial_path: PathBuf,
    final_path: PathBuf,
    written: u64,
    committed: bool,
}

#[async_trait]
impl FileSink for LocalFile {
    async fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::other("write after close"))?;
        file.write_all(chunk).await?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    async fn close(self: Box<Self>) -> io::Result<u64> {
        let mut this = self;
        if let Some(mut file) = this.file.take() {
            file.flush().await?;
            file.sync_all().await?;
        }
        fs::rename(&this.partial_path, &this.final_path).await?;
        this.committed = true;

        Ok(this.written)
    }
}

impl Drop for LocalFile {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        drop(self.file.take());
        match std::fs::remove_file(&self.partial_path) {
            Ok(()) => debug!(path = %self.partial_path.display(), "removed unfinished file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => debug!(path = %self.partial_path.display(), error = %e, "could not remove unfinished file"),
        }
    }
}
