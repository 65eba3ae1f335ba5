//! hangar-queue: durable single-node background job system.
//!
//! Jobs live in the `jobs` table of the shared store; this crate adds the
//! in-process scheduling around them: handler registration, an atomic claim
//! loop with a concurrency cap, exponential-backoff retries driven by
//! per-job timers, and crash recovery at start. Handlers receive no
//! cancellation — delivery is at-least-once and handlers must be idempotent.

pub mod backoff;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, RwLock};

use hangar_core::types::job::{JobRecord, JobStatus};
use hangar_store::jobs::{JobFilter, JobStats};
use hangar_store::{Store, StoreError};
use tokio::sync::{Notify, Semaphore, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub use backoff::backoff_ms;

pub const DEFAULT_CONCURRENCY: usize = 4;
pub const DEFAULT_MAX_ATTEMPTS: i64 = 5;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("no handler registered for job type '{0}'")]
    UnknownJobType(String),
}

impl QueueError {
    pub fn kind(&self) -> hangar_core::ErrorKind {
        match self {
            QueueError::Store(e) => e.kind(),
            QueueError::UnknownJobType(_) => hangar_core::ErrorKind::Validation,
        }
    }
}

type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), String>> + Send>>;
type Handler = Arc<dyn Fn(serde_json::Value) -> HandlerFuture + Send + Sync>;

/// Options for `enqueue`.
#[derive(Debug, Default, Clone)]
pub struct EnqueueOptions {
    pub priority: i64,
    pub max_attempts: Option<i64>,
    /// Caller-supplied id, e.g. for webhook idempotency. Defaults to a
    /// fresh UUID.
    pub job_id: Option<String>,
}

struct QueueInner {
    store: Store,
    handlers: RwLock<HashMap<String, Handler>>,
    concurrency: Arc<Semaphore>,
    /// `job:added` signal — wakes the claim loop.
    added: Notify,
    shutdown: CancellationToken,
    /// Per-job retry timers. The mutex is what serializes timer arming
    /// against `cancel_job`.
    timers: Mutex<HashMap<String, tokio::task::JoinHandle<()>>>,
    /// Fan-out of job row changes (the daemon forwards these as
    /// `job-updated` events).
    updates_tx: broadcast::Sender<JobRecord>,
}

/// Handle to the job queue. Cheap to clone.
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<QueueInner>,
}

impl JobQueue {
    pub fn new(store: Store, concurrency: usize) -> Self {
        let (updates_tx, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(QueueInner {
                store,
                handlers: RwLock::new(HashMap::new()),
                concurrency: Arc::new(Semaphore::new(concurrency.max(1))),
                added: Notify::new(),
                shutdown: CancellationToken::new(),
                timers: Mutex::new(HashMap::new()),
                updates_tx,
            }),
        }
    }

    /// Register the async handler for a job type. Replaces any previous
    /// registration.
    pub fn register_handler<F, Fut>(&self, job_type: &str, handler: F)
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |payload| Box::pin(handler(payload)));
        if let Ok(mut handlers) = self.inner.handlers.write() {
            handlers.insert(job_type.to_string(), handler);
        }
    }

    /// Subscribe to job row changes.
    pub fn subscribe_updates(&self) -> broadcast::Receiver<JobRecord> {
        self.inner.updates_tx.subscribe()
    }

    /// Insert a pending job and wake the claim loop.
    pub fn enqueue(
        &self,
        job_type: &str,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> Result<String, QueueError> {
        let id = options.job_id.unwrap_or_else(hangar_core::new_id);
        let job = self.inner.store.insert_job(
            &id,
            job_type,
            &payload.to_string(),
            options.priority,
            options.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
            hangar_core::now_epoch_ms(),
        )?;
        debug!(event = "queue.job_enqueued", job_id = %id, job_type = job_type);
        self.publish(job);
        self.inner.added.notify_one();
        Ok(id)
    }

    /// Recover crashed jobs, re-arm timers for future retries, and start
    /// the claim loop.
    pub fn start(&self) -> Result<(), QueueError> {
        let now = hangar_core::now_epoch_ms();
        let recovered = self.inner.store.reset_processing_jobs(now)?;
        if recovered > 0 {
            info!(event = "queue.recovery_completed", jobs = recovered);
        }

        for job in self.inner.store.jobs_awaiting_retry(now)? {
            self.schedule_retry(&job.id, job.next_retry_at);
        }

        let queue = self.clone();
        tokio::spawn(async move {
            queue.run_loop().await;
        });
        // Claim anything already due.
        self.inner.added.notify_one();

        info!(event = "queue.start_completed");
        Ok(())
    }

    /// Stop claiming and cancel retry timers. In-flight handlers are not
    /// cancelled.
    pub fn stop(&self) {
        self.inner.shutdown.cancel();
        if let Ok(mut timers) = self.inner.timers.lock() {
            for (_, timer) in timers.drain() {
                timer.abort();
            }
        }
        info!(event = "queue.stop_completed");
    }

    // --- Management API ---

    pub fn get_jobs(&self, filter: &JobFilter) -> Result<Vec<JobRecord>, QueueError> {
        Ok(self.inner.store.list_jobs(filter)?)
    }

    pub fn get_job(&self, id: &str) -> Result<JobRecord, QueueError> {
        Ok(self.inner.store.get_job(id)?)
    }

    pub fn count_jobs(&self, filter: &JobFilter) -> Result<i64, QueueError> {
        Ok(self.inner.store.count_jobs(filter)?)
    }

    pub fn get_stats(&self) -> Result<JobStats, QueueError> {
        Ok(self.inner.store.job_stats()?)
    }

    /// Reset a stalled job (attempts back to zero) and wake the loop.
    pub fn retry_job(&self, id: &str) -> Result<JobRecord, QueueError> {
        let job = self
            .inner
            .store
            .retry_stalled_job(id, hangar_core::now_epoch_ms())?;
        self.publish(job.clone());
        self.inner.added.notify_one();
        Ok(job)
    }

    /// Cancel a pending or stalled job, including any armed retry timer.
    pub fn cancel_job(&self, id: &str) -> Result<(), QueueError> {
        if let Ok(mut timers) = self.inner.timers.lock() {
            if let Some(timer) = timers.remove(id) {
                timer.abort();
            }
        }
        let job = self.inner.store.get_job(id)?;
        self.inner.store.cancel_job(id)?;
        self.publish(job);
        Ok(())
    }

    // --- Internals ---

    fn publish(&self, job: JobRecord) {
        // No receivers is fine.
        let _ = self.inner.updates_tx.send(job);
    }

    fn publish_by_id(&self, id: &str) {
        if let Ok(job) = self.inner.store.get_job(id) {
            self.publish(job);
        }
    }

    async fn run_loop(&self) {
        loop {
            tokio::select! {
                _ = self.inner.shutdown.cancelled() => break,
                _ = self.inner.added.notified() => {}
            }
            self.drain_due_jobs().await;
        }
        debug!(event = "queue.run_loop_exited");
    }

    /// Claim and dispatch due jobs until the table is drained or all
    /// concurrency permits are taken.
    async fn drain_due_jobs(&self) {
        loop {
            let Ok(permit) = self.inner.concurrency.clone().try_acquire_owned() else {
                // A finishing handler re-notifies; resume then.
                return;
            };
            let claimed = match self.inner.store.claim_job(hangar_core::now_epoch_ms()) {
                Ok(claimed) => claimed,
                Err(e) => {
                    error!(event = "queue.claim_failed", error = %e);
                    return;
                }
            };
            let Some(job) = claimed else {
                return;
            };
            self.publish(job.clone());

            let queue = self.clone();
            tokio::spawn(async move {
                queue.run_job(job).await;
                drop(permit);
                queue.inner.added.notify_one();
            });
        }
    }

    async fn run_job(&self, job: JobRecord) {
        let handler = self
            .inner
            .handlers
            .read()
            .ok()
            .and_then(|handlers| handlers.get(&job.job_type).cloned());

        let result = match handler {
            Some(handler) => {
                let payload: serde_json::Value =
                    serde_json::from_str(&job.payload).unwrap_or(serde_json::Value::Null);
                handler(payload).await
            }
            None => Err(format!("no handler registered for '{}'", job.job_type)),
        };

        match result {
            Ok(()) => {
                if let Err(e) = self.inner.store.complete_job(&job.id) {
                    error!(event = "queue.complete_failed", job_id = %job.id, error = %e);
                }
                debug!(event = "queue.job_completed", job_id = %job.id);
            }
            Err(message) => {
                let attempts_after = job.attempts + 1;
                if attempts_after >= job.max_attempts {
                    warn!(
                        event = "queue.job_stalled",
                        job_id = %job.id,
                        attempts = attempts_after,
                        error = %message,
                    );
                    if let Err(e) = self.inner.store.fail_job_attempt(&job.id, &message, None) {
                        error!(event = "queue.stall_failed", job_id = %job.id, error = %e);
                    }
                } else {
                    let next_retry_at =
                        hangar_core::now_epoch_ms() + backoff_ms(attempts_after);
                    debug!(
                        event = "queue.job_retry_scheduled",
                        job_id = %job.id,
                        attempts = attempts_after,
                        next_retry_at = next_retry_at,
                    );
                    if let Err(e) =
                        self.inner
                            .store
                            .fail_job_attempt(&job.id, &message, Some(next_retry_at))
                    {
                        error!(event = "queue.retry_failed", job_id = %job.id, error = %e);
                    }
                    self.schedule_retry(&job.id, next_retry_at);
                }
            }
        }
        self.publish_by_id(&job.id);
    }

    /// Arm a timer that wakes the claim loop at `at_ms`.
    fn schedule_retry(&self, job_id: &str, at_ms: i64) {
        let delay_ms = (at_ms - hangar_core::now_epoch_ms()).max(0) as u64;
        let queue = self.clone();
        let id = job_id.to_string();
        let timer_id = id.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
            if let Ok(mut timers) = queue.inner.timers.lock() {
                timers.remove(&id);
            }
            queue.inner.added.notify_one();
        });
        if let Ok(mut timers) = self.inner.timers.lock() {
            if let Some(previous) = timers.insert(timer_id, timer) {
                previous.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_job_type_kind_is_validation() {
        let err = QueueError::UnknownJobType("x".to_string());
        assert_eq!(err.kind(), hangar_core::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_enqueue_inserts_pending_row() {
        let store = Store::open_in_memory().unwrap();
        let queue = JobQueue::new(store.clone(), 4);
        let id = queue
            .enqueue("cleanup", serde_json::json!({"session_id": "s1"}), EnqueueOptions::default())
            .unwrap();
        let job = store.get_job(&id).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.max_attempts, DEFAULT_MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_enqueue_respects_caller_job_id() {
        let store = Store::open_in_memory().unwrap();
        let queue = JobQueue::new(store, 4);
        let id = queue
            .enqueue(
                "cleanup",
                serde_json::json!({}),
                EnqueueOptions {
                    job_id: Some("delivery-123".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(id, "delivery-123");
        // Re-enqueueing the same delivery id conflicts.
        let err = queue
            .enqueue(
                "cleanup",
                serde_json::json!({}),
                EnqueueOptions {
                    job_id: Some("delivery-123".to_string()),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert_eq!(err.kind(), hangar_core::ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_cancel_aborts_timer_and_deletes() {
        let store = Store::open_in_memory().unwrap();
        let queue = JobQueue::new(store.clone(), 4);
        let id = queue
            .enqueue("cleanup", serde_json::json!({}), EnqueueOptions::default())
            .unwrap();
        queue.schedule_retry(&id, hangar_core::now_epoch_ms() + 60_000);
        queue.cancel_job(&id).unwrap();
        assert!(store.get_job(&id).is_err());
        assert!(queue.inner.timers.lock().unwrap().is_empty());
    }
}
