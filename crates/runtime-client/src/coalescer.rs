//! Per-file debounced write queue.
//!
//! Rapid edits to one file collapse into a single platform write: only the
//! newest generation is committed, older generations resolve as canceled.
//! Commits for the same file are serialized on a per-file chain; different
//! files commit concurrently.

use crate::error::Result;
use crate::types::Encoding;
use async_trait::async_trait;
use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(200);

/// How a generation settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    /// This generation reached the platform.
    Written,
    /// A newer generation superseded this one before dispatch.
    Canceled,
}

/// Settlement of one enqueued write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteResolution {
    pub generation: u64,
    pub status: WriteStatus,
}

/// A canceled write still resolves; only a failed platform commit errors.
pub type WriteOutcome = Result<WriteResolution>;

/// One queued write.
#[derive(Debug, Clone)]
pub struct WriteRequest {
    pub path: String,
    pub content: String,
    pub encoding: Encoding,
}

/// The underlying platform write.
#[async_trait]
pub trait WriteSink: Send + Sync + 'static {
    async fn commit(&self, request: &WriteRequest) -> Result<()>;
}

struct PendingJob {
    generation: u64,
    request: WriteRequest,
}

struct FileQueue {
    latest_generation: u64,
    latest_job: Option<PendingJob>,
    pending: HashMap<u64, oneshot::Sender<WriteOutcome>>,
    timer: Option<JoinHandle<()>>,
    chain: Shared<BoxFuture<'static, ()>>,
}

impl FileQueue {
    fn new() -> Self {
        Self {
            latest_generation: 0,
            latest_job: None,
            pending: HashMap::new(),
            timer: None,
            chain: futures_util::future::ready(()).boxed().shared(),
        }
    }
}

struct CoalescerInner {
    sink: Arc<dyn WriteSink>,
    debounce: Duration,
    queues: Mutex<HashMap<String, FileQueue>>,
}

/// The coalescer. Cheap to clone; clones share the queues.
#[derive(Clone)]
pub struct WriteCoalescer {
    inner: Arc<CoalescerInner>,
}

impl WriteCoalescer {
    pub fn new(sink: Arc<dyn WriteSink>) -> Self {
        Self::with_debounce(sink, DEFAULT_DEBOUNCE)
    }

    pub fn with_debounce(sink: Arc<dyn WriteSink>, debounce: Duration) -> Self {
        Self {
            inner: Arc::new(CoalescerInner {
                sink,
                debounce,
                queues: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Queue a write. The returned receiver settles exactly once: `Written`
    /// when this generation reaches the platform, `Canceled` when a newer
    /// write superseded it, or the platform error for a failed commit.
    pub fn enqueue(&self, request: WriteRequest) -> oneshot::Receiver<WriteOutcome> {
        let (tx, rx) = oneshot::channel();
        let path = request.path.clone();
        let mut queues = self.inner.queues.lock().expect("coalescer lock");
        let queue = queues.entry(path.clone()).or_insert_with(FileQueue::new);

        queue.latest_generation += 1;
        let generation = queue.latest_generation;
        queue.pending.insert(generation, tx);
        queue.latest_job = Some(PendingJob {
            generation,
            request,
        });

        if let Some(timer) = queue.timer.take() {
            timer.abort();
        }
        let inner = Arc::clone(&self.inner);
        queue.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(inner.debounce).await;
            dispatch(&inner, &path);
        }));
        rx
    }

    /// Dispatch any pending write for `path` now and wait for its commit.
    /// Loops while re-entrant enqueues keep adding newer jobs.
    pub async fn flush_path(&self, path: &str) {
        loop {
            let chain = {
                let mut queues = self.inner.queues.lock().expect("coalescer lock");
                let Some(queue) = queues.get_mut(path) else {
                    return;
                };
                dispatch_locked(&self.inner, queue);
                queue.chain.clone()
            };
            chain.await;

            let has_more = {
                let queues = self.inner.queues.lock().expect("coalescer lock");
                queues.get(path).is_some_and(|q| q.latest_job.is_some())
            };
            if !has_more {
                return;
            }
        }
    }

    /// Flush every file.
    pub async fn flush(&self) {
        for path in self.known_paths(|_| true) {
            self.flush_path(&path).await;
        }
    }

    /// Flush every file whose path satisfies the predicate.
    pub async fn flush_matching(&self, predicate: impl Fn(&str) -> bool) {
        for path in self.known_paths(predicate) {
            self.flush_path(&path).await;
        }
    }

    /// Drop the pending write for `path`; its generations resolve canceled.
    /// An already-dispatched commit is not interrupted.
    pub fn cancel_path(&self, path: &str) {
        let mut queues = self.inner.queues.lock().expect("coalescer lock");
        if let Some(queue) = queues.get_mut(path) {
            cancel_locked(queue);
        }
    }

    pub fn cancel_all(&self) {
        let mut queues = self.inner.queues.lock().expect("coalescer lock");
        for queue in queues.values_mut() {
            cancel_locked(queue);
        }
    }

    pub fn cancel_matching(&self, predicate: impl Fn(&str) -> bool) {
        let mut queues = self.inner.queues.lock().expect("coalescer lock");
        for (path, queue) in queues.iter_mut() {
            if predicate(path) {
                cancel_locked(queue);
            }
        }
    }

    fn known_paths(&self, predicate: impl Fn(&str) -> bool) -> Vec<String> {
        self.inner
            .queues
            .lock()
            .expect("coalescer lock")
            .keys()
            .filter(|path| predicate(path))
            .cloned()
            .collect()
    }
}

fn dispatch(inner: &Arc<CoalescerInner>, path: &str) {
    let mut queues = inner.queues.lock().expect("coalescer lock");
    if let Some(queue) = queues.get_mut(path) {
        dispatch_locked(inner, queue);
    }
}

/// Snapshot the newest job, cancel everything older, and append the commit
/// to the per-file chain.
fn dispatch_locked(inner: &Arc<CoalescerInner>, queue: &mut FileQueue) {
    if let Some(timer) = queue.timer.take() {
        timer.abort();
    }
    let Some(job) = queue.latest_job.take() else {
        return;
    };

    let obsolete: Vec<u64> = queue
        .pending
        .keys()
        .copied()
        .filter(|generation| *generation < job.generation)
        .collect();
    for generation in obsolete {
        if let Some(tx) = queue.pending.remove(&generation) {
            let _ = tx.send(Ok(WriteResolution {
                generation,
                status: WriteStatus::Canceled,
            }));
        }
    }

    let resolver = queue.pending.remove(&job.generation);
    let sink = Arc::clone(&inner.sink);
    let prior = queue.chain.clone();
    queue.chain = async move {
        prior.await;
        let result = sink.commit(&job.request).await;
        if let Some(tx) = resolver {
            let _ = tx.send(result.map(|()| WriteResolution {
                generation: job.generation,
                status: WriteStatus::Written,
            }));
        }
    }
    .boxed()
    .shared();
    // Commits make progress even when nobody flushes.
    tokio::spawn(queue.chain.clone());
}

fn cancel_locked(queue: &mut FileQueue) {
    if let Some(timer) = queue.timer.take() {
        timer.abort();
    }
    queue.latest_job = None;
    for (generation, tx) in queue.pending.drain() {
        let _ = tx.send(Ok(WriteResolution {
            generation,
            status: WriteStatus::Canceled,
        }));
    }
}
