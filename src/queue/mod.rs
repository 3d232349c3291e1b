//! Strictly sequential job dispatcher
//!
//! One wallet signer cannot safely send overlapping transactions, so every
//! chain-mutating job in the process funnels through this queue's single
//! worker task. Priority decides order; jobs of equal priority run FIFO.

use crate::config::QueueConfig;
use crate::error::{AgentError, Result};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

struct QueuedJob<T> {
    job: T,
    priority: i32,
    seq: u64,
}

impl<T> PartialEq for QueuedJob<T> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl<T> Eq for QueuedJob<T> {}

impl<T> PartialOrd for QueuedJob<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for QueuedJob<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority first, then lower sequence (FIFO)
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct QueueShared<T> {
    heap: Mutex<BinaryHeap<QueuedJob<T>>>,
    notify: Notify,
    accepting: AtomicBool,
    seq: AtomicU64,
    config: QueueConfig,
}

/// Priority job queue with a single worker
pub struct JobQueue<T> {
    shared: Arc<QueueShared<T>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Clone + Send + 'static> JobQueue<T> {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            shared: Arc::new(QueueShared {
                heap: Mutex::new(BinaryHeap::new()),
                notify: Notify::new(),
                accepting: AtomicBool::new(true),
                seq: AtomicU64::new(0),
                config,
            }),
            worker: Mutex::new(None),
        }
    }

    /// Spawn the single worker task.
    ///
    /// `handler` processes one job at a time; a failing job is re-run up to
    /// `max_job_retries` times before being dropped with an error log.
    pub async fn start<F, Fut>(&self, handler: F)
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send,
    {
        let shared = self.shared.clone();
        let handle = tokio::spawn(async move {
            info!("job queue worker started");
            loop {
                let next = shared.heap.lock().await.pop();

                let Some(queued) = next else {
                    if !shared.accepting.load(AtomicOrdering::SeqCst) {
                        break;
                    }
                    shared.notify.notified().await;
                    continue;
                };

                let mut attempt = 0;
                loop {
                    attempt += 1;
                    match handler(queued.job.clone()).await {
                        Ok(()) => break,
                        Err(e) if attempt <= shared.config.max_job_retries => {
                            warn!(
                                "job (priority {}) attempt {} failed: {e}; retrying",
                                queued.priority, attempt
                            );
                        }
                        Err(e) => {
                            error!("job dropped after {attempt} attempts: {e}");
                            break;
                        }
                    }
                }

                tokio::time::sleep(Duration::from_millis(shared.config.job_delay_ms)).await;
            }
            info!("job queue worker stopped");
        });
        *self.worker.lock().await = Some(handle);
    }

    /// Queue a job. Fails once shutdown has begun.
    pub async fn enqueue(&self, job: T, priority: i32) -> Result<()> {
        if !self.shared.accepting.load(AtomicOrdering::SeqCst) {
            return Err(AgentError::Processing(
                "queue is shutting down, job rejected".to_string(),
            ));
        }
        let seq = self.shared.seq.fetch_add(1, AtomicOrdering::SeqCst);
        self.shared.heap.lock().await.push(QueuedJob {
            job,
            priority,
            seq,
        });
        self.shared.notify.notify_one();
        debug!("job enqueued (priority {priority}, seq {seq})");
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.shared.heap.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Stop accepting new jobs, let the in-flight job finish, then stop the
    /// worker.
    pub async fn shutdown(&self) {
        self.shared.accepting.store(false, AtomicOrdering::SeqCst);
        self.shared.notify.notify_one();
        if let Some(handle) = self.worker.lock().await.take() {
            if let Err(e) = handle.await {
                warn!("queue worker join failed: {e}");
            }
        }
    }
}
