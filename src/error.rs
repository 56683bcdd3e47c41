use std::io;
use std::time::Duration;

/// Failure of a single transfer attempt. Every variant is retried.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("url resolution failed: {0}")]
    Resolve(String),

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status} for {url}")]
    Status { status: u16, url: String },

    #[error("destination write failed: {0}")]
    Io(#[from] io::Error),

    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),
}

/// Setup errors that keep a batch from starting.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("no files to download")]
    Empty,

    #[error("unsafe task path: '{0}'")]
    UnsafePath(String),

    #[error("duplicate task path: '{0}'")]
    DuplicatePath(String),

    #[error("filename conflicts detected in flattened download: {}", .0.join(", "))]
    NameConflict(Vec<String>),

    #[error("destination unavailable: {0}")]
    Destination(#[source] io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum PickError {
    #[error("destination selection cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] io::Error),
}
