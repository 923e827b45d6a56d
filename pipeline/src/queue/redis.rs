//! Redis-backed `Queue`: the ready list is a Redis LIST (`LPUSH` / `BRPOP`),
//! the delayed set is a Redis ZSET scored by ready-at epoch seconds.
//! Promotion runs as a single Lua script so the move is atomic per the
//! broker's own guarantees — no entry is ever visible in both structures at
//! once.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::{DequeueResult, Queue, QueueEntry};
use crate::error::{PipelineError, Result};

/// Moves every member of the delayed zset with score <= now to the head of
/// the ready list, removing it from the zset in the same atomic script
/// execution. Returns the number of entries moved.
const PROMOTE_SCRIPT: &str = r#"
local delayed_key = KEYS[1]
local ready_key = KEYS[2]
local now = ARGV[1]
local due = redis.call('ZRANGEBYSCORE', delayed_key, '-inf', now)
for i, member in ipairs(due) do
    redis.call('LPUSH', ready_key, member)
    redis.call('ZREM', delayed_key, member)
end
return #due
"#;

pub struct RedisQueue {
    conn: ConnectionManager,
    ready_key: String,
    delayed_key: String,
}

impl RedisQueue {
    pub async fn connect(redis_url: &str, queue_name: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| PipelineError::QueueConnectionError(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| PipelineError::QueueConnectionError(e.to_string()))?;

        Ok(Self {
            conn,
            ready_key: format!("{queue_name}:ready"),
            delayed_key: format!("{queue_name}:delayed"),
        })
    }
}

#[async_trait]
impl Queue for RedisQueue {
    async fn enqueue(&self, entry: QueueEntry) -> Result<()> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(&entry)
            .map_err(|e| PipelineError::QueueEnqueueFailed(e.to_string()))?;
        conn.lpush::<_, _, ()>(&self.ready_key, payload)
            .await
            .map_err(|e| PipelineError::QueueEnqueueFailed(e.to_string()))?;
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> Result<DequeueResult> {
        let mut conn = self.conn.clone();
        let response: Option<(String, String)> = conn
            .brpop(&self.ready_key, timeout.as_secs_f64())
            .await
            .map_err(|e| PipelineError::QueueDequeueFailed(e.to_string()))?;

        match response {
            None => Ok(DequeueResult::Timeout),
            Some((_key, payload)) => {
                let entry: QueueEntry = serde_json::from_str(&payload)
                    .map_err(|e| PipelineError::QueueDequeueFailed(e.to_string()))?;
                Ok(DequeueResult::Entry(entry))
            }
        }
    }

    async fn enqueue_delayed(&self, entry: QueueEntry, delay: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(&entry)
            .map_err(|e| PipelineError::QueueEnqueueFailed(e.to_string()))?;
        let score = (chrono::Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default())
            .timestamp();
        conn.zadd::<_, _, _, ()>(&self.delayed_key, payload, score)
            .await
            .map_err(|e| PipelineError::QueueEnqueueFailed(e.to_string()))?;
        Ok(())
    }

    async fn move_delayed_to_ready(&self) -> Result<u64> {
        let mut conn = self.conn.clone();
        let now = chrono::Utc::now().timestamp();
        let moved: u64 = redis::Script::new(PROMOTE_SCRIPT)
            .key(&self.delayed_key)
            .key(&self.ready_key)
            .arg(now)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| PipelineError::QueueConnectionError(e.to_string()))?;
        Ok(moved)
    }

    async fn size_ready(&self) -> Result<u64> {
        let mut conn = self.conn.clone();
        conn.llen(&self.ready_key)
            .await
            .map_err(|e| PipelineError::QueueConnectionError(e.to_string()))
    }

    async fn size_delayed(&self) -> Result<u64> {
        let mut conn = self.conn.clone();
        conn.zcard(&self.delayed_key)
            .await
            .map_err(|e| PipelineError::QueueConnectionError(e.to_string()))
    }

    async fn clear(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(&self.ready_key)
            .await
            .map_err(|e| PipelineError::QueueConnectionError(e.to_string()))?;
        conn.del::<_, ()>(&self.delayed_key)
            .await
            .map_err(|e| PipelineError::QueueConnectionError(e.to_string()))?;
        Ok(())
    }
}
