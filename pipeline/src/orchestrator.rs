//! Admission and control plane: intake validation, job creation, initial
//! enqueue, and the status/list/cancel/retry operations.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::dto::{IntakeRequest, JobStats, Page, Pagination, StatusResponse};
use crate::error::{PipelineError, Result};
use crate::model::{ErrorValue, Job, JobStatus};
use crate::queue::{Queue, QueueEntry};
use crate::store::JobStore;
use crate::worker::retry_policy::backoff_delay;

pub struct Orchestrator<S: JobStore, Q: Queue> {
    store: Arc<S>,
    queue: Arc<Q>,
    max_resumes_per_tenant: u32,
    max_attempts_default: u32,
    backoff_base_minutes: u32,
}

impl<S: JobStore, Q: Queue> Orchestrator<S, Q> {
    pub fn new(store: Arc<S>, queue: Arc<Q>, config: &Config) -> Self {
        Self {
            store,
            queue,
            max_resumes_per_tenant: config.max_resumes_per_tenant,
            max_attempts_default: config.max_attempts_default,
            backoff_base_minutes: config.backoff_base_minutes,
        }
    }

    /// Quota check, job creation, and initial enqueue. On enqueue failure the
    /// newly-created row is best-effort marked FAILED rather than rolled
    /// back — the user can retry it.
    pub async fn submit(
        &self,
        request: IntakeRequest,
        tenant_resume_count: u32,
    ) -> Result<StatusResponse> {
        if tenant_resume_count >= self.max_resumes_per_tenant {
            return Err(PipelineError::MaxResumesExceeded {
                max: self.max_resumes_per_tenant,
            });
        }

        let job = Job::new_pending(request, self.max_attempts_default);
        self.store.create(&job).await?;

        let entry = QueueEntry {
            job_id: job.id,
            payload: serde_json::to_value(&job.request_payload)
                .map_err(|e| PipelineError::QueueEnqueueFailed(e.to_string()))?,
        };

        if let Err(e) = self.queue.enqueue(entry).await {
            warn!(job_id = %job.id, error = %e, "failed to enqueue newly created job");
            let mut details = crate::model::ErrorDetails::new();
            details.insert("cause".into(), ErrorValue::Str(e.to_string()));
            self.store
                .mark_failed(job.id, "failed to enqueue", details)
                .await?;
            return Ok(StatusResponse::from_job(&self.store.get(job.id).await?));
        }

        Ok(StatusResponse::from_job(&job))
    }

    pub async fn status(&self, id: Uuid, tenant_id: Uuid) -> Result<StatusResponse> {
        let job = self.store.get(id).await?;
        self.authorize(&job, tenant_id)?;
        Ok(StatusResponse::from_job(&job))
    }

    pub async fn list(
        &self,
        tenant_id: Uuid,
        pagination: Pagination,
    ) -> Result<Page<StatusResponse>> {
        let (jobs, total) = self.store.list_by_tenant(tenant_id, pagination).await?;
        Ok(Page {
            items: jobs.iter().map(StatusResponse::from_job).collect(),
            total,
        })
    }

    /// Allowed from PENDING or PROCESSING. A PROCESSING job is marked FAILED
    /// best-effort; the running worker is not preempted (cancellation is
    /// cooperative, not live — see the concurrency model).
    pub async fn cancel(&self, id: Uuid, tenant_id: Uuid) -> Result<StatusResponse> {
        let job = self.store.get(id).await?;
        self.authorize(&job, tenant_id)?;

        match job.status {
            JobStatus::Completed => return Err(PipelineError::JobAlreadyCompleted(id)),
            JobStatus::Failed => {
                return Err(PipelineError::InvalidJobStatus {
                    expected: "pending or processing".into(),
                    found: "failed".into(),
                })
            }
            JobStatus::Pending | JobStatus::Processing => {}
        }

        self.store
            .mark_failed(id, "cancelled by user", Default::default())
            .await?;
        Ok(StatusResponse::from_job(&self.store.get(id).await?))
    }

    /// Only from FAILED. Resets the attempt budget to fresh (manual retry,
    /// unlike automatic backoff retries, does not preserve attempt history)
    /// and re-enqueues immediately.
    pub async fn retry(&self, id: Uuid, tenant_id: Uuid) -> Result<StatusResponse> {
        let mut job = self.store.get(id).await?;
        self.authorize(&job, tenant_id)?;

        if job.status != JobStatus::Failed {
            return Err(PipelineError::InvalidJobStatus {
                expected: "failed".into(),
                found: format!("{:?}", job.status),
            });
        }

        job.reset_for_manual_retry();
        self.store.update(&job).await?;

        let entry = QueueEntry {
            job_id: job.id,
            payload: serde_json::to_value(&job.request_payload)
                .map_err(|e| PipelineError::QueueEnqueueFailed(e.to_string()))?,
        };

        if let Err(e) = self.queue.enqueue(entry).await {
            error!(job_id = %job.id, error = %e, "failed to re-enqueue retried job");
            let mut details = crate::model::ErrorDetails::new();
            details.insert("cause".into(), ErrorValue::Str(e.to_string()));
            details.insert(
                "during".into(),
                ErrorValue::Str("manual_retry_enqueue".into()),
            );
            self.store
                .mark_failed(id, "failed to enqueue retry", details)
                .await?;
        }

        Ok(StatusResponse::from_job(&self.store.get(id).await?))
    }

    pub async fn stats(&self, tenant_id: Uuid) -> Result<JobStats> {
        self.store.stats(tenant_id).await
    }

    fn authorize(&self, job: &Job, tenant_id: Uuid) -> Result<()> {
        if job.tenant_id != tenant_id {
            return Err(PipelineError::TenantMismatch);
        }
        Ok(())
    }
}

/// Exponential backoff used by both the worker pool's automatic retry path
/// and documented here since the Orchestrator's `submit`/`retry` callers
/// often want to preview the schedule. `2^attempt_count` minutes, base
/// configurable.
pub fn preview_backoff(base_minutes: u32, attempt_count: u32) -> Duration {
    backoff_delay(base_minutes, attempt_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FileType;
    use crate::queue::memory::InMemoryQueue;
    use crate::store::memory::InMemoryJobStore;

    fn config() -> Config {
        Config {
            database_url: String::new(),
            redis_url: String::new(),
            openai_api_key: String::new(),
            worker_count: 1,
            dequeue_timeout: Duration::from_secs(5),
            promotion_interval: Duration::from_secs(30),
            max_attempts_default: 3,
            backoff_base_minutes: 2,
            max_resumes_per_tenant: 2,
            embedding_dim: 1536,
        }
    }

    fn request(tenant_id: Uuid) -> IntakeRequest {
        IntakeRequest {
            tenant_id,
            file_path: "f".into(),
            file_name: "f.pdf".into(),
            file_type: FileType::Pdf,
            title: "CV".into(),
            is_active: true,
            is_default: false,
        }
    }

    fn orchestrator() -> Orchestrator<InMemoryJobStore, InMemoryQueue> {
        Orchestrator::new(
            Arc::new(InMemoryJobStore::new()),
            Arc::new(InMemoryQueue::new()),
            &config(),
        )
    }

    #[tokio::test]
    async fn submit_over_quota_is_rejected() {
        let orch = orchestrator();
        let tenant = Uuid::now_v7();
        let err = orch
            .submit(request(tenant), 2)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "max-resumes-exceeded");
    }

    #[tokio::test]
    async fn submit_under_quota_enqueues_and_returns_pending() {
        let orch = orchestrator();
        let tenant = Uuid::now_v7();
        let resp = orch.submit(request(tenant), 0).await.unwrap();
        assert_eq!(resp.status, JobStatus::Pending);
        assert_eq!(orch.queue.size_ready().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn status_rejects_mismatched_tenant() {
        let orch = orchestrator();
        let tenant = Uuid::now_v7();
        let other_tenant = Uuid::now_v7();
        let resp = orch.submit(request(tenant), 0).await.unwrap();

        let err = orch.status(resp.id, other_tenant).await.unwrap_err();
        assert_eq!(err.code(), "tenant-mismatch");
    }

    #[tokio::test]
    async fn cancel_from_completed_is_rejected() {
        let orch = orchestrator();
        let tenant = Uuid::now_v7();
        let resp = orch.submit(request(tenant), 0).await.unwrap();
        orch.store.mark_processing(resp.id).await.unwrap();
        orch.store
            .mark_completed(resp.id, Uuid::now_v7())
            .await
            .unwrap();

        let err = orch.cancel(resp.id, tenant).await.unwrap_err();
        assert_eq!(err.code(), "job-already-completed");
    }

    #[tokio::test]
    async fn retry_resets_attempt_count_and_reenqueues() {
        let orch = orchestrator();
        let tenant = Uuid::now_v7();
        let resp = orch.submit(request(tenant), 0).await.unwrap();
        orch.queue.clear().await.unwrap();

        orch.store.mark_processing(resp.id).await.unwrap();
        let mut failed = orch.store.get(resp.id).await.unwrap();
        failed.attempt_count = 3;
        orch.store.update(&failed).await.unwrap();
        orch.store
            .mark_failed(resp.id, "parsing_failed", Default::default())
            .await
            .unwrap();

        let retried = orch.retry(resp.id, tenant).await.unwrap();
        assert_eq!(retried.status, JobStatus::Pending);
        assert_eq!(retried.attempt_count, 0);
        assert_eq!(orch.queue.size_ready().await.unwrap(), 1);
    }
}
