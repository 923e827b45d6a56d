//! PostgreSQL-backed `JobStore`. The `mark_processing` claim primitive is an
//! atomic `UPDATE ... WHERE status = 'pending'`: exactly one concurrent
//! caller observes `rows_affected() == 1`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use super::JobStore;
use crate::dto::{IntakeRequest, JobStats, Pagination};
use crate::error::{PipelineError, Result};
use crate::model::{ErrorDetails, FileType, Job, JobStatus, Step};

pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Row shape mirroring the `jobs` table; JSON columns are boxed so sqlx can
/// derive `FromRow` without a manual row-by-row mapping.
#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    tenant_id: Uuid,
    status: JobStatus,
    file_path: String,
    file_name: String,
    file_type: FileType,
    title: String,
    attempt_count: i32,
    max_attempts: i32,
    current_step: Option<Step>,
    progress_percentage: i16,
    error_message: Option<String>,
    error_details: Json<ErrorDetails>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    failed_at: Option<DateTime<Utc>>,
    next_retry_at: Option<DateTime<Utc>>,
    resume_id: Option<Uuid>,
    request_payload: Json<IntakeRequest>,
}

impl From<JobRow> for Job {
    fn from(row: JobRow) -> Self {
        Job {
            id: row.id,
            tenant_id: row.tenant_id,
            status: row.status,
            file_path: row.file_path,
            file_name: row.file_name,
            file_type: row.file_type,
            title: row.title,
            attempt_count: row.attempt_count as u32,
            max_attempts: row.max_attempts as u32,
            current_step: row.current_step,
            progress_percentage: row.progress_percentage as u8,
            error_message: row.error_message,
            error_details: row.error_details.0,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            failed_at: row.failed_at,
            next_retry_at: row.next_retry_at,
            resume_id: row.resume_id,
            request_payload: row.request_payload.0,
        }
    }
}

const SELECT_COLUMNS: &str = r#"
    id, tenant_id, status, file_path, file_name, file_type, title,
    attempt_count, max_attempts, current_step, progress_percentage,
    error_message, error_details, created_at, started_at, completed_at,
    failed_at, next_retry_at, resume_id, request_payload
"#;

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn create(&self, job: &Job) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO jobs (
                id, tenant_id, status, file_path, file_name, file_type, title,
                attempt_count, max_attempts, progress_percentage,
                error_details, created_at, request_payload
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(job.id)
        .bind(job.tenant_id)
        .bind(job.status)
        .bind(&job.file_path)
        .bind(&job.file_name)
        .bind(job.file_type)
        .bind(&job.title)
        .bind(job.attempt_count as i32)
        .bind(job.max_attempts as i32)
        .bind(job.progress_percentage as i16)
        .bind(Json(&job.error_details))
        .bind(job.created_at)
        .bind(Json(&job.request_payload))
        .execute(&self.pool)
        .await
        .map_err(|e| PipelineError::JobUpdateFailed(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(PipelineError::JobAlreadyExists(job.id));
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Job> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {SELECT_COLUMNS} FROM jobs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| PipelineError::JobUpdateFailed(e.to_string()))?
        .ok_or(PipelineError::JobNotFound(id))?;

        Ok(row.into())
    }

    async fn list_by_tenant(
        &self,
        tenant_id: Uuid,
        pagination: Pagination,
    ) -> Result<(Vec<Job>, i64)> {
        pagination.validate()?;

        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {SELECT_COLUMNS} FROM jobs WHERE tenant_id = $1 \
             ORDER BY created_at DESC LIMIT $2 OFFSET $3"
        ))
        .bind(tenant_id)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PipelineError::JobUpdateFailed(e.to_string()))?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE tenant_id = $1")
            .bind(tenant_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| PipelineError::JobUpdateFailed(e.to_string()))?;

        Ok((rows.into_iter().map(Job::from).collect(), total))
    }

    async fn mark_processing(&self, id: Uuid) -> Result<Job> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            UPDATE jobs
            SET status = 'processing', started_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING {SELECT_COLUMNS}
            "#
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| PipelineError::JobUpdateFailed(e.to_string()))?;

        match row {
            Some(row) => Ok(row.into()),
            None => match self.get(id).await {
                Ok(job) => Err(PipelineError::InvalidJobStatus {
                    expected: "pending".into(),
                    found: format!("{:?}", job.status),
                }),
                Err(e) => Err(e),
            },
        }
    }

    async fn mark_completed(&self, id: Uuid, resume_id: Uuid) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'completed',
                completed_at = NOW(),
                progress_percentage = 100,
                resume_id = $1,
                error_message = NULL,
                error_details = '{}'::jsonb,
                next_retry_at = NULL
            WHERE id = $2 AND status = 'processing'
            "#,
        )
        .bind(resume_id)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| PipelineError::JobUpdateFailed(e.to_string()))?;

        if result.rows_affected() == 0 {
            let job = self.get(id).await?;
            return Err(PipelineError::InvalidJobStatus {
                expected: "processing".into(),
                found: format!("{:?}", job.status),
            });
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        error_message: &str,
        error_details: ErrorDetails,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'failed',
                failed_at = NOW(),
                error_message = $1,
                error_details = $2
            WHERE id = $3
            "#,
        )
        .bind(error_message)
        .bind(Json(error_details))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| PipelineError::JobUpdateFailed(e.to_string()))?;
        Ok(())
    }

    async fn update_progress(&self, id: Uuid, step: Step, percentage: u8) -> Result<()> {
        sqlx::query(
            "UPDATE jobs SET current_step = $1, progress_percentage = $2 WHERE id = $3",
        )
        .bind(step)
        .bind(percentage as i16)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| PipelineError::JobUpdateFailed(e.to_string()))?;
        Ok(())
    }

    async fn update(&self, job: &Job) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = $1,
                attempt_count = $2,
                current_step = $3,
                progress_percentage = $4,
                error_message = $5,
                error_details = $6,
                started_at = $7,
                completed_at = $8,
                failed_at = $9,
                next_retry_at = $10,
                resume_id = $11
            WHERE id = $12
            "#,
        )
        .bind(job.status)
        .bind(job.attempt_count as i32)
        .bind(job.current_step)
        .bind(job.progress_percentage as i16)
        .bind(&job.error_message)
        .bind(Json(&job.error_details))
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.failed_at)
        .bind(job.next_retry_at)
        .bind(job.resume_id)
        .bind(job.id)
        .execute(&self.pool)
        .await
        .map_err(|e| PipelineError::JobUpdateFailed(e.to_string()))?;
        Ok(())
    }

    async fn get_failed_for_retry(&self, limit: i64, now: DateTime<Utc>) -> Result<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            SELECT {SELECT_COLUMNS} FROM jobs
            WHERE status = 'failed'
              AND next_retry_at <= $1
              AND attempt_count < max_attempts
            ORDER BY next_retry_at ASC
            LIMIT $2
            "#
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PipelineError::JobUpdateFailed(e.to_string()))?;

        Ok(rows.into_iter().map(Job::from).collect())
    }

    async fn stats(&self, tenant_id: Uuid) -> Result<JobStats> {
        let row: (i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'pending'),
                COUNT(*) FILTER (WHERE status = 'processing'),
                COUNT(*) FILTER (WHERE status = 'completed'),
                COUNT(*) FILTER (WHERE status = 'failed')
            FROM jobs WHERE tenant_id = $1
            "#,
        )
        .bind(tenant_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| PipelineError::JobUpdateFailed(e.to_string()))?;

        let oldest_pending: Option<DateTime<Utc>> = sqlx::query_scalar(
            "SELECT MIN(created_at) FROM jobs WHERE tenant_id = $1 AND status = 'pending'",
        )
        .bind(tenant_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| PipelineError::JobUpdateFailed(e.to_string()))?;

        let last_completed: Option<DateTime<Utc>> = sqlx::query_scalar(
            "SELECT MAX(completed_at) FROM jobs WHERE tenant_id = $1 AND status = 'completed'",
        )
        .bind(tenant_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| PipelineError::JobUpdateFailed(e.to_string()))?;

        Ok(JobStats {
            pending: row.0,
            processing: row.1,
            completed: row.2,
            failed: row.3,
            oldest_pending,
            last_completed,
        })
    }
}
