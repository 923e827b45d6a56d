//! The broker: a ready list (FIFO, blocking pop) and a delayed set (ordered
//! by ready-at epoch) used for retries, plus atomic promotion between them.
//! Queue entries are derived, not authoritative — the Job Store is the
//! source of truth; the queue is advisory.

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

use crate::error::Result;

/// A queue entry: the job id plus a snapshot of its payload for worker-side
/// decoding without a store round-trip.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct QueueEntry {
    pub job_id: Uuid,
    pub payload: serde_json::Value,
}

/// What `dequeue` returns: either an entry was available within the
/// timeout, or the timeout elapsed with nothing to deliver. A timeout is not
/// an error.
pub enum DequeueResult {
    Entry(QueueEntry),
    Timeout,
}

#[async_trait]
pub trait Queue: Send + Sync {
    /// Appends to the ready list. No dedup: at-least-once delivery;
    /// idempotency lives in the worker's claim, not here.
    async fn enqueue(&self, entry: QueueEntry) -> Result<()>;

    /// Blocks up to `timeout` for an item from the ready list. Must not
    /// return the same payload to two callers concurrently.
    async fn dequeue(&self, timeout: Duration) -> Result<DequeueResult>;

    /// Inserts into the delayed set with score `now + delay`.
    async fn enqueue_delayed(&self, entry: QueueEntry, delay: Duration) -> Result<()>;

    /// Atomically selects all delayed entries with score <= now, appends
    /// each to the ready list, and removes each from the delayed set.
    /// Returns the count moved. A crash mid-batch may leave a partial move
    /// but must never duplicate an entry in both structures.
    async fn move_delayed_to_ready(&self) -> Result<u64>;

    async fn size_ready(&self) -> Result<u64>;
    async fn size_delayed(&self) -> Result<u64>;
    async fn clear(&self) -> Result<()>;
}
