//! Reliable at-least-once queue abstraction (spec component 4.1).
//!
//! A queue is a named channel supporting `push`/`pop`/`ack`/`length`/`close`.
//! Dedupe is keyed on the caller-supplied job id; visibility timeout (VT)
//! moves popped payloads into a processing index and reclaims anything past
//! its expiry on the next `pop`. [`RedisQueue`] is the production backend;
//! [`InMemoryQueue`] is a same-semantics test double.

pub mod memory;
pub mod redis;

pub use memory::InMemoryQueue;
pub use redis::RedisQueue;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
    #[error("queue closed")]
    Closed,
}

/// A message handed back by `pop`: the decoded payload plus the token needed
/// to `ack` it. The token changes every time the same job is reclaimed past
/// its VT, which is how a stale ack from a dead worker is rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub job_id: String,
    pub token: String,
    pub payload: Vec<u8>,
}

#[async_trait]
pub trait ReliableQueue: Send + Sync {
    /// Atomically test-and-add `job_id` to the dedupe set; if new, append
    /// `payload` to the queue tail and return `true`. If `job_id` is already
    /// present, the push is a no-op and returns `false`.
    async fn push(&self, job_id: &str, payload: &[u8]) -> Result<bool, QueueError>;

    /// Reclaim anything past its visibility timeout, then wait up to
    /// `timeout` for a payload. Returns `None` on timeout.
    async fn pop(&self, timeout: Duration) -> Result<Option<Message>, QueueError>;

    /// Acknowledge a message: guarded by a token+payload match against the
    /// processing index so a stale ack (from a worker reclaimed out from
    /// under it) is a safe no-op rather than releasing someone else's lease.
    async fn ack(&self, message: &Message) -> Result<(), QueueError>;

    /// Number of payloads currently waiting (not counting in-flight/processing).
    async fn length(&self) -> Result<u64, QueueError>;

    async fn close(&self) -> Result<(), QueueError>;
}

/// Lets an `Arc<dyn ReliableQueue>` (or `Arc<RedisQueue>`, etc.) stand in
/// directly for `Q: ReliableQueue` wherever a gate or worker loop is generic
/// over the queue type, so [`crate::context::AppContext`] can hold named
/// queues as trait objects without the backend leaking into call sites.
#[async_trait]
impl<T: ReliableQueue + ?Sized> ReliableQueue for Arc<T> {
    async fn push(&self, job_id: &str, payload: &[u8]) -> Result<bool, QueueError> {
        (**self).push(job_id, payload).await
    }

    async fn pop(&self, timeout: Duration) -> Result<Option<Message>, QueueError> {
        (**self).pop(timeout).await
    }

    async fn ack(&self, message: &Message) -> Result<(), QueueError> {
        (**self).ack(message).await
    }

    async fn length(&self) -> Result<u64, QueueError> {
        (**self).length().await
    }

    async fn close(&self) -> Result<(), QueueError> {
        (**self).close().await
    }
}

pub type BoxedQueue = Arc<dyn ReliableQueue>;
