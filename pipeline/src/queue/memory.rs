//! In-memory `Queue`, used by tests. A `Mutex<VecDeque>` ready list and a
//! score-ordered delayed list, woken via `tokio::sync::Notify` so `dequeue`
//! can block without busy-polling.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use super::{DequeueResult, Queue, QueueEntry};
use crate::error::Result;

struct DelayedEntry {
    score: i64,
    entry: QueueEntry,
}

#[derive(Default)]
pub struct InMemoryQueue {
    ready: Mutex<VecDeque<QueueEntry>>,
    delayed: Mutex<Vec<DelayedEntry>>,
    notify: Notify,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self {
            ready: Mutex::new(VecDeque::new()),
            delayed: Mutex::new(Vec::new()),
            notify: Notify::new(),
        }
    }

    fn push_ready(&self, entry: QueueEntry) {
        self.ready.lock().unwrap().push_back(entry);
        self.notify.notify_one();
    }
}

#[async_trait]
impl Queue for InMemoryQueue {
    async fn enqueue(&self, entry: QueueEntry) -> Result<()> {
        self.push_ready(entry);
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> Result<DequeueResult> {
        if let Some(entry) = self.ready.lock().unwrap().pop_front() {
            return Ok(DequeueResult::Entry(entry));
        }

        let notified = self.notify.notified();
        if tokio::time::timeout(timeout, notified).await.is_err() {
            return Ok(DequeueResult::Timeout);
        }

        match self.ready.lock().unwrap().pop_front() {
            Some(entry) => Ok(DequeueResult::Entry(entry)),
            None => Ok(DequeueResult::Timeout),
        }
    }

    async fn enqueue_delayed(&self, entry: QueueEntry, delay: Duration) -> Result<()> {
        let score = (chrono::Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default())
            .timestamp();
        self.delayed.lock().unwrap().push(DelayedEntry { score, entry });
        Ok(())
    }

    async fn move_delayed_to_ready(&self) -> Result<u64> {
        let now = chrono::Utc::now().timestamp();
        let due: Vec<QueueEntry> = {
            let mut delayed = self.delayed.lock().unwrap();
            let (due, remaining): (Vec<_>, Vec<_>) =
                delayed.drain(..).partition(|d| d.score <= now);
            *delayed = remaining;
            due.into_iter().map(|d| d.entry).collect()
        };

        let moved = due.len() as u64;
        for entry in due {
            self.push_ready(entry);
        }
        Ok(moved)
    }

    async fn size_ready(&self) -> Result<u64> {
        Ok(self.ready.lock().unwrap().len() as u64)
    }

    async fn size_delayed(&self) -> Result<u64> {
        Ok(self.delayed.lock().unwrap().len() as u64)
    }

    async fn clear(&self) -> Result<()> {
        self.ready.lock().unwrap().clear();
        self.delayed.lock().unwrap().clear();
        Ok(())
    }
}
