//! In-memory `JobStore`, used by tests and by the concrete scenarios in the
//! pipeline's own test suite. Not durable; mirrors the Postgres
//! implementation's transition rules exactly so both back ends satisfy the
//! same testable properties.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::JobStore;
use crate::dto::{JobStats, Pagination};
use crate::error::{PipelineError, Result};
use crate::model::{ErrorDetails, Job, JobStatus, Step};

#[derive(Default)]
pub struct InMemoryJobStore {
    rows: Mutex<HashMap<Uuid, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, job: &Job) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        if rows.contains_key(&job.id) {
            return Err(PipelineError::JobAlreadyExists(job.id));
        }
        rows.insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Job> {
        self.rows
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(PipelineError::JobNotFound(id))
    }

    async fn list_by_tenant(
        &self,
        tenant_id: Uuid,
        pagination: Pagination,
    ) -> Result<(Vec<Job>, i64)> {
        pagination.validate()?;
        let rows = self.rows.lock().unwrap();
        let mut matching: Vec<Job> = rows
            .values()
            .filter(|j| j.tenant_id == tenant_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = matching.len() as i64;
        let page = matching
            .into_iter()
            .skip(pagination.offset() as usize)
            .take(pagination.limit() as usize)
            .collect();
        Ok((page, total))
    }

    async fn mark_processing(&self, id: Uuid) -> Result<Job> {
        let mut rows = self.rows.lock().unwrap();
        let job = rows.get_mut(&id).ok_or(PipelineError::JobNotFound(id))?;
        if job.status != JobStatus::Pending {
            return Err(PipelineError::InvalidJobStatus {
                expected: "pending".into(),
                found: format!("{:?}", job.status),
            });
        }
        job.status = JobStatus::Processing;
        job.started_at = Some(Utc::now());
        Ok(job.clone())
    }

    async fn mark_completed(&self, id: Uuid, resume_id: Uuid) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        let job = rows.get_mut(&id).ok_or(PipelineError::JobNotFound(id))?;
        if job.status != JobStatus::Processing {
            return Err(PipelineError::InvalidJobStatus {
                expected: "processing".into(),
                found: format!("{:?}", job.status),
            });
        }
        job.status = JobStatus::Completed;
        job.completed_at = Some(Utc::now());
        job.progress_percentage = 100;
        job.resume_id = Some(resume_id);
        job.error_message = None;
        job.error_details.clear();
        job.next_retry_at = None;
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        error_message: &str,
        error_details: ErrorDetails,
    ) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        let job = rows.get_mut(&id).ok_or(PipelineError::JobNotFound(id))?;
        job.status = JobStatus::Failed;
        job.failed_at = Some(Utc::now());
        job.error_message = Some(error_message.to_string());
        job.error_details = error_details;
        Ok(())
    }

    async fn update_progress(&self, id: Uuid, step: Step, percentage: u8) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        let job = rows.get_mut(&id).ok_or(PipelineError::JobNotFound(id))?;
        job.current_step = Some(step);
        job.progress_percentage = percentage;
        Ok(())
    }

    async fn update(&self, job: &Job) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        if !rows.contains_key(&job.id) {
            return Err(PipelineError::JobNotFound(job.id));
        }
        rows.insert(job.id, job.clone());
        Ok(())
    }

    async fn get_failed_for_retry(&self, limit: i64, now: DateTime<Utc>) -> Result<Vec<Job>> {
        let rows = self.rows.lock().unwrap();
        let mut due: Vec<Job> = rows
            .values()
            .filter(|j| {
                j.status == JobStatus::Failed
                    && j.attempt_count < j.max_attempts
                    && j.next_retry_at.is_some_and(|t| t <= now)
            })
            .cloned()
            .collect();
        due.sort_by_key(|j| j.next_retry_at);
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn stats(&self, tenant_id: Uuid) -> Result<JobStats> {
        let rows = self.rows.lock().unwrap();
        let tenant_rows: Vec<&Job> = rows.values().filter(|j| j.tenant_id == tenant_id).collect();

        let count = |status: JobStatus| tenant_rows.iter().filter(|j| j.status == status).count();

        let oldest_pending = tenant_rows
            .iter()
            .filter(|j| j.status == JobStatus::Pending)
            .map(|j| j.created_at)
            .min();
        let last_completed = tenant_rows
            .iter()
            .filter_map(|j| (j.status == JobStatus::Completed).then_some(j.completed_at).flatten())
            .max();

        Ok(JobStats {
            pending: count(JobStatus::Pending) as i64,
            processing: count(JobStatus::Processing) as i64,
            completed: count(JobStatus::Completed) as i64,
            failed: count(JobStatus::Failed) as i64,
            oldest_pending,
            last_completed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dto::IntakeRequest;
    use crate::model::FileType;

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

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = InMemoryJobStore::new();
        let job = Job::new_pending(request(Uuid::now_v7()), 3);
        store.create(&job).await.unwrap();
        let fetched = store.get(job.id).await.unwrap();
        assert_eq!(fetched.id, job.id);
    }

    #[tokio::test]
    async fn duplicate_create_is_rejected() {
        let store = InMemoryJobStore::new();
        let job = Job::new_pending(request(Uuid::now_v7()), 3);
        store.create(&job).await.unwrap();
        let err = store.create(&job).await.unwrap_err();
        assert_eq!(err.code(), "job-already-exists");
    }

    #[tokio::test]
    async fn mark_processing_is_a_one_shot_cas() {
        let store = InMemoryJobStore::new();
        let job = Job::new_pending(request(Uuid::now_v7()), 3);
        store.create(&job).await.unwrap();

        store.mark_processing(job.id).await.unwrap();
        let err = store.mark_processing(job.id).await.unwrap_err();
        assert_eq!(err.code(), "invalid-job-status");
    }

    #[tokio::test]
    async fn mark_completed_sets_full_progress_and_resume_id() {
        let store = InMemoryJobStore::new();
        let job = Job::new_pending(request(Uuid::now_v7()), 3);
        store.create(&job).await.unwrap();
        store.mark_processing(job.id).await.unwrap();

        let resume_id = Uuid::now_v7();
        store.mark_completed(job.id, resume_id).await.unwrap();

        let fetched = store.get(job.id).await.unwrap();
        assert_eq!(fetched.status, JobStatus::Completed);
        assert_eq!(fetched.progress_percentage, 100);
        assert_eq!(fetched.resume_id, Some(resume_id));
    }

    #[tokio::test]
    async fn mark_completed_rejects_a_job_that_is_not_processing() {
        let store = InMemoryJobStore::new();
        let job = Job::new_pending(request(Uuid::now_v7()), 3);
        store.create(&job).await.unwrap();

        // Cancelled (or never claimed) — still PENDING, not PROCESSING.
        let err = store
            .mark_completed(job.id, Uuid::now_v7())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid-job-status");

        let fetched = store.get(job.id).await.unwrap();
        assert_eq!(fetched.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn get_failed_for_retry_only_returns_due_rows_under_budget() {
        let store = InMemoryJobStore::new();
        let tenant = Uuid::now_v7();

        let mut due = Job::new_pending(request(tenant), 3);
        due.status = JobStatus::Failed;
        due.attempt_count = 1;
        due.next_retry_at = Some(Utc::now() - chrono::Duration::minutes(1));
        store.create(&due).await.unwrap();

        let mut not_due = Job::new_pending(request(tenant), 3);
        not_due.status = JobStatus::Failed;
        not_due.attempt_count = 1;
        not_due.next_retry_at = Some(Utc::now() + chrono::Duration::minutes(5));
        store.create(&not_due).await.unwrap();

        let mut exhausted = Job::new_pending(request(tenant), 3);
        exhausted.status = JobStatus::Failed;
        exhausted.attempt_count = 3;
        exhausted.next_retry_at = Some(Utc::now() - chrono::Duration::minutes(1));
        store.create(&exhausted).await.unwrap();

        let result = store.get_failed_for_retry(10, Utc::now()).await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].id, due.id);
    }
}
