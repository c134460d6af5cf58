//! Poller dedup-seen set (spec §4.3): a set-add returning true iff new.
//!
//! Distinct from a queue's own dedupe (cleared on `ack`): an entry here is
//! never cleared, so a feed that keeps listing a filing across polls after
//! its download task has already been acked does not re-enqueue it.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;

use redis::aio::ConnectionManager;

use crate::error::PipelineError;

#[async_trait]
pub trait SeenSet: Send + Sync {
    /// Atomically add `key`; returns `true` if it was newly added.
    async fn mark_seen(&self, key: &str) -> Result<bool, PipelineError>;
}

#[derive(Default)]
pub struct InMemorySeenSet {
    seen: Mutex<HashSet<String>>,
}

impl InMemorySeenSet {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SeenSet for InMemorySeenSet {
    async fn mark_seen(&self, key: &str) -> Result<bool, PipelineError> {
        let mut seen = self.seen.lock().unwrap();
        Ok(seen.insert(key.to_string()))
    }
}

pub struct RedisSeenSet {
    conn: ConnectionManager,
    set_key: String,
}

impl RedisSeenSet {
    pub async fn new(redis_url: &str, set_key: impl Into<String>) -> Result<Self, PipelineError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| PipelineError::TransientIo(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| PipelineError::TransientIo(e.to_string()))?;
        Ok(Self {
            conn,
            set_key: set_key.into(),
        })
    }
}

#[async_trait]
impl SeenSet for RedisSeenSet {
    async fn mark_seen(&self, key: &str) -> Result<bool, PipelineError> {
        let mut conn = self.conn.clone();
        let added: i32 = redis::cmd("SADD")
            .arg(&self.set_key)
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| PipelineError::TransientIo(e.to_string()))?;
        Ok(added == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_seen_set_suppresses_duplicates() {
        let set = InMemorySeenSet::new();
        assert!(set.mark_seen("0001234567-25-000001").await.unwrap());
        assert!(!set.mark_seen("0001234567-25-000001").await.unwrap());
    }
}
