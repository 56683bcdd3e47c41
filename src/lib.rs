//! Bounded-concurrency batch downloads for asset files.
//!
//! - [`queue`]: FIFO queue running at most N async work items at once
//! - [`retry`]: retry-with-backoff combinator and backoff policies
//! - [`transfer`]: one task, resolved, fetched and written, with retries
//! - [`coordinator`]: a whole batch, validated, queued and reconciled
//! - [`board`]: task states and the events that update them

pub mod board;
pub mod cli;
pub mod coordinator;
pub mod destination;
pub mod error;
pub mod logging;
pub mod manifest;
pub mod models;
pub mod progress;
pub mod queue;
pub mod retry;
pub mod source;
pub mod state;
pub mod transfer;

pub use board::{TaskBoard, TaskObserver};
pub use coordinator::BatchCoordinator;
pub use destination::{DirHandle, FileSink, LocalDir};
pub use error::{BatchError, PickError, TransferError};
pub use models::{
    BatchOptions, BatchReport, BatchStats, CompletedTask, FailedTask, Layout, SharedLink, Task,
    TaskEvent, TaskState, TaskStatus,
};
pub use queue::BoundedQueue;
pub use source::{ApiResolver, DirectResolver, HttpTransport, Transport, UrlResolver};
