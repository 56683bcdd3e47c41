//! FIFO work queue that runs at most `limit` items at once.
//!
//! Items are zero-argument async closures. They are started in submission
//! order as slots free up; completion order is whatever the items make it.
//! A slot is released by a drop guard, so an item that errors or panics
//! still admits the next one.

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};
use tokio::sync::oneshot;

type Job = Box<dyn FnOnce(Slot) -> BoxFuture<'static, ()> + Send>;

#[derive(Clone)]
pub struct BoundedQueue {
    inner: Arc<Inner>,
}

struct Inner {
    limit: usize,
    state: Mutex<QueueState>,
    peak: AtomicUsize,
}

struct QueueState {
    active: usize,
    backlog: VecDeque<Job>,
}

/// Holds one unit of capacity for as long as an admitted item runs.
struct Slot {
    inner: Arc<Inner>,
}

impl Drop for Slot {
    fn drop(&mut self) {
        {
            let mut state = self.inner.state.lock();
            debug_assert!(state.active > 0, "slot released twice");
            state.active -= 1;
        }
        Inner::admit(&self.inner);
    }
}

impl Inner {
    fn admit(inner: &Arc<Inner>) {
        let ready: Vec<Job> = {
            let mut state = inner.state.lock();
            let mut ready = Vec::new();
            while state.active < inner.limit {
                let Some(job) = state.backlog.pop_front() else {
                    break;
                };
                state.active += 1;
                ready.push(job);
            }
            debug_assert!(state.active <= inner.limit);
            inner.peak.fetch_max(state.active, Ordering::Relaxed);
            ready
        };

        for job in ready {
            let slot = Slot {
                inner: Arc::clone(inner),
            };
            tokio::spawn(job(slot));
        }
    }
}

impl BoundedQueue {
    /// A limit of zero is treated as one.
    pub fn new(limit: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                limit: limit.max(1),
                state: Mutex::new(QueueState {
                    active: 0,
                    backlog: VecDeque::new(),
                }),
                peak: AtomicUsize::new(0),
            }),
        }
    }

    /// Enqueues `work`; it is invoked once a slot is free.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn add<F, Fut, T>(&self, work: F) -> Ticket<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move |slot: Slot| {
            Box::pin(async move {
                let output = work().await;
                drop(slot);
                let _ = tx.send(output);
            })
        });

        self.inner.state.lock().backlog.push_back(job);
        Inner::admit(&self.inner);

        Ticket { rx }
    }

    pub fn limit(&self) -> usize {
        self.inner.limit
    }

    pub fn active(&self) -> usize {
        self.inner.state.lock().active
    }

    pub fn backlog_len(&self) -> usize {
        self.inner.state.lock().backlog.len()
    }

    /// Highest number of simultaneously running items seen so far.
    pub fn peak_active(&self) -> usize {
        self.inner.peak.load(Ordering::Relaxed)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("work item was dropped before it produced a result")]
pub struct Lost;

/// Resolves to the output of one queued work item.
pub struct Ticket<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> Future for Ticket<T> {
    type Output = Result<T, Lost>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|r| r.map_err(|_| Lost))
    }
}
