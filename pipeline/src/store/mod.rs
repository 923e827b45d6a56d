//! Durable state-of-record for jobs: narrow, transition-aware mutators over
//! the Job row, plus the conditional claim primitive that serializes
//! concurrent worker claims.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::dto::Pagination;
use crate::error::Result;
use crate::model::{ErrorDetails, Job};

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new PENDING row. Fails `JobAlreadyExists` on id collision.
    async fn create(&self, job: &Job) -> Result<()>;

    /// Returns the row or `JobNotFound`.
    async fn get(&self, id: Uuid) -> Result<Job>;

    /// A page of a tenant's jobs plus the total count, ordered by
    /// `created_at` DESC.
    async fn list_by_tenant(
        &self,
        tenant_id: Uuid,
        pagination: Pagination,
    ) -> Result<(Vec<Job>, i64)>;

    /// The claim primitive: an atomic compare-and-set on status. Only
    /// succeeds if the row is currently PENDING; sets `started_at = now`.
    /// Two concurrent callers for the same id see exactly one success and
    /// one `InvalidJobStatus`.
    async fn mark_processing(&self, id: Uuid) -> Result<Job>;

    /// status=COMPLETED, `completed_at=now`, `progress_percentage=100`,
    /// clears error fields and `next_retry_at`.
    async fn mark_completed(&self, id: Uuid, resume_id: Uuid) -> Result<()>;

    /// status=FAILED, `failed_at=now`. Does not touch `attempt_count` — the
    /// caller chooses that semantics.
    async fn mark_failed(
        &self,
        id: Uuid,
        error_message: &str,
        error_details: ErrorDetails,
    ) -> Result<()>;

    /// Updates `current_step` and `progress_percentage` only; no status
    /// change.
    async fn update_progress(
        &self,
        id: Uuid,
        step: crate::model::Step,
        percentage: u8,
    ) -> Result<()>;

    /// Full row replace, used for the retry-scheduling case: atomically
    /// bumps `attempt_count`, sets `next_retry_at`, and reverts status to
    /// PENDING (or for a manual retry's full reset).
    async fn update(&self, job: &Job) -> Result<()>;

    /// Rows with status=FAILED, `next_retry_at <= now`,
    /// `attempt_count < max_attempts`, ordered by `next_retry_at` ASC. Used
    /// by the reconciler to compensate for lost delayed-queue entries.
    async fn get_failed_for_retry(&self, limit: i64, now: DateTime<Utc>) -> Result<Vec<Job>>;

    /// Aggregate counts per status plus oldest-pending/last-completed
    /// timestamps, for the Orchestrator's `stats` operation.
    async fn stats(&self, tenant_id: Uuid) -> Result<crate::dto::JobStats>;
}
