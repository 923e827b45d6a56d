//! N concurrent consumers plus a promotion ticker and a reconciler sweep.
//! Workers never block each other beyond the store's `mark_processing` CAS;
//! shutdown is cooperative via a shared `CancellationToken`.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::PipelineError;
use crate::model::JobStatus;
use crate::queue::{DequeueResult, Queue, QueueEntry};
use crate::store::JobStore;
use crate::worker::pipeline_stages::{self, Capabilities};
use crate::worker::retry_policy::backoff_delay;

pub struct WorkerPool<S: JobStore, Q: Queue> {
    store: Arc<S>,
    queue: Arc<Q>,
    caps: Arc<Capabilities>,
    worker_count: usize,
    dequeue_timeout: Duration,
    promotion_interval: Duration,
    backoff_base_minutes: u32,
}

impl<S: JobStore + 'static, Q: Queue + 'static> WorkerPool<S, Q> {
    pub fn new(store: Arc<S>, queue: Arc<Q>, caps: Arc<Capabilities>, config: &Config) -> Self {
        Self {
            store,
            queue,
            caps,
            worker_count: config.worker_count,
            dequeue_timeout: config.dequeue_timeout,
            promotion_interval: config.promotion_interval,
            backoff_base_minutes: config.backoff_base_minutes,
        }
    }

    /// Spawns the worker tasks, the promotion ticker, and the reconciler
    /// sweep; returns once `shutdown` is cancelled and every task has wound
    /// down.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(worker_count = self.worker_count, "worker pool starting");

        let mut handles = Vec::with_capacity(self.worker_count + 2);

        for worker_id in 0..self.worker_count {
            let pool = Arc::clone(&self);
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                pool.worker_loop(worker_id, shutdown).await;
            }));
        }

        {
            let pool = Arc::clone(&self);
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                pool.promotion_loop(shutdown).await;
            }));
        }

        {
            let pool = Arc::clone(&self);
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                pool.reconciler_loop(shutdown).await;
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }

        info!("worker pool stopped");
    }

    /// One worker's loop: block on dequeue with a cooperative timeout so
    /// shutdown is observed promptly, claim, run the stage pipeline, apply
    /// the retry/failure policy.
    async fn worker_loop(&self, worker_id: usize, shutdown: CancellationToken) {
        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let dequeued = tokio::select! {
                _ = shutdown.cancelled() => break,
                result = self.queue.dequeue(self.dequeue_timeout) => result,
            };

            let entry = match dequeued {
                Ok(DequeueResult::Entry(entry)) => entry,
                Ok(DequeueResult::Timeout) => continue,
                Err(e) => {
                    error!(worker_id, error = %e, "dequeue failed");
                    continue;
                }
            };

            self.process_entry(worker_id, entry, &shutdown).await;
        }

        debug!(worker_id, "worker stopped");
    }

    async fn process_entry(&self, worker_id: usize, entry: QueueEntry, shutdown: &CancellationToken) {
        let job = match self.store.mark_processing(entry.job_id).await {
            Ok(job) => job,
            Err(PipelineError::InvalidJobStatus { .. }) => {
                // Another worker already claimed it, or it was cancelled
                // before this delivery was processed. At-least-once
                // delivery means duplicates are expected; the store, not
                // the queue, is what prevents double execution.
                debug!(worker_id, job_id = %entry.job_id, "duplicate claim dropped");
                return;
            }
            Err(e) => {
                error!(worker_id, job_id = %entry.job_id, error = %e, "mark_processing failed");
                return;
            }
        };

        match pipeline_stages::run(self.store.as_ref(), &job, &self.caps, shutdown).await {
            Ok(resume_id) => {
                if let Err(e) = self.store.mark_completed(job.id, resume_id).await {
                    // The résumé exists but is not linked to the job — a
                    // known tension with the cancel-during-processing race.
                    error!(
                        job_id = %job.id,
                        resume_id = %resume_id,
                        error = %e,
                        "mark_completed failed after successful pipeline run; resume is orphaned"
                    );
                }
            }
            Err(e) => {
                self.apply_retry_policy(&job.id, job.attempt_count, job.max_attempts, e)
                    .await;
            }
        }
    }

    /// Increments the attempt count and either schedules an automatic retry
    /// with exponential backoff or marks the job terminally FAILED once the
    /// budget is exhausted.
    async fn apply_retry_policy(
        &self,
        job_id: &Uuid,
        attempt_count: u32,
        max_attempts: u32,
        err: PipelineError,
    ) {
        let tag = pipeline_stages::stage_tag(&err);
        let details = pipeline_stages::error_details(tag, &err);
        let next_attempt_count = attempt_count + 1;

        // PROCESSING -> FAILED is the only legal exit from a failed attempt;
        // an automatic retry then applies FAILED -> PENDING on top of this,
        // so the persisted history actually traverses both transitions
        // rather than jumping PROCESSING -> PENDING directly.
        if let Err(e) = self
            .store
            .mark_failed(*job_id, tag, details.clone())
            .await
        {
            error!(job_id = %job_id, error = %e, "failed to mark job failed");
            return;
        }

        if next_attempt_count < max_attempts {
            let delay = backoff_delay(self.backoff_base_minutes, next_attempt_count);
            let next_retry_at = chrono::Utc::now()
                + chrono::Duration::from_std(delay).unwrap_or_default();

            let mut job = match self.store.get(*job_id).await {
                Ok(job) => job,
                Err(e) => {
                    error!(job_id = %job_id, error = %e, "failed to reload job for retry scheduling");
                    return;
                }
            };
            job.attempt_count = next_attempt_count;
            job.status = JobStatus::Pending;
            job.next_retry_at = Some(next_retry_at);
            job.error_message = Some(tag.to_string());
            job.error_details = details;
            job.progress_percentage = 0;
            job.current_step = None;

            if let Err(e) = self.store.update(&job).await {
                error!(job_id = %job_id, error = %e, "failed to persist retry schedule");
                return;
            }

            let entry = QueueEntry {
                job_id: *job_id,
                payload: serde_json::to_value(&job.request_payload).unwrap_or_default(),
            };
            if let Err(e) = self.queue.enqueue_delayed(entry, delay).await {
                warn!(job_id = %job_id, error = %e, "failed to schedule delayed retry; reverting to terminal failed");
                let mut compound = job.error_details.clone();
                compound.insert(
                    "enqueue_error".into(),
                    crate::model::ErrorValue::Str(e.to_string()),
                );
                let _ = self
                    .store
                    .mark_failed(*job_id, "failed to schedule retry", compound)
                    .await;
            }
        } else {
            // Already FAILED with the original attempt count above; bump it
            // to record the exhausted attempt and leave it terminal.
            let mut job = match self.store.get(*job_id).await {
                Ok(job) => job,
                Err(_) => return,
            };
            job.attempt_count = next_attempt_count;
            let _ = self.store.update(&job).await;
        }
    }

    async fn promotion_loop(&self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.promotion_interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    match self.queue.move_delayed_to_ready().await {
                        Ok(moved) if moved > 0 => info!(moved, "promoted delayed jobs to ready"),
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "promotion sweep failed"),
                    }
                }
            }
        }
        debug!("promotion ticker stopped");
    }

    /// Safety net against lost delayed-queue entries (e.g. a broker flush):
    /// periodically finds FAILED rows that are due for retry but not
    /// present in the queue's delayed set, and re-enqueues them directly.
    async fn reconciler_loop(&self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.promotion_interval * 4);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.reconcile_once().await {
                        error!(error = %e, "reconciler sweep failed");
                    }
                }
            }
        }
        debug!("reconciler stopped");
    }

    async fn reconcile_once(&self) -> crate::error::Result<()> {
        let due = self.store.get_failed_for_retry(100, chrono::Utc::now()).await?;
        if due.is_empty() {
            return Ok(());
        }
        info!(count = due.len(), "reconciler re-enqueuing stranded retries");
        for job in due {
            let entry = QueueEntry {
                job_id: job.id,
                payload: serde_json::to_value(&job.request_payload).unwrap_or_default(),
            };
            if let Err(e) = self.queue.enqueue(entry).await {
                warn!(job_id = %job.id, error = %e, "reconciler re-enqueue failed");
            }
        }
        Ok(())
    }
}
