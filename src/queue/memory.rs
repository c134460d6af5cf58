//! In-process test double for [`ReliableQueue`] with identical dedupe/VT/ack
//! semantics, used by integration tests that exercise scenarios without a
//! Redis instance.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{Message, QueueError, ReliableQueue};

struct Inflight {
    job_id: String,
    payload: Vec<u8>,
    expires_at: Instant,
}

struct State {
    dedupe: HashSet<String>,
    waiting: VecDeque<(String, Vec<u8>)>,
    processing: HashMap<String, Inflight>,
    job_token: HashMap<String, String>,
}

#[derive(Clone)]
pub struct InMemoryQueue {
    state: Arc<Mutex<State>>,
    visibility_timeout: Duration,
}

impl InMemoryQueue {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                dedupe: HashSet::new(),
                waiting: VecDeque::new(),
                processing: HashMap::new(),
                job_token: HashMap::new(),
            })),
            visibility_timeout,
        }
    }

    /// Move any processing entry past its expiry back onto the waiting
    /// queue head, same as the Redis script's reclaim step.
    fn reclaim_expired(state: &mut State) {
        let now = Instant::now();
        let expired: Vec<String> = state
            .processing
            .iter()
            .filter(|(_, inflight)| inflight.expires_at <= now)
            .map(|(token, _)| token.clone())
            .collect();
        for token in expired {
            if let Some(inflight) = state.processing.remove(&token) {
                state.waiting.push_front((inflight.job_id, inflight.payload));
            }
        }
    }
}

#[async_trait]
impl ReliableQueue for InMemoryQueue {
    async fn push(&self, job_id: &str, payload: &[u8]) -> Result<bool, QueueError> {
        let mut state = self.state.lock().await;
        if !state.dedupe.insert(job_id.to_string()) {
            return Ok(false);
        }
        state.waiting.push_back((job_id.to_string(), payload.to_vec()));
        Ok(true)
    }

    async fn pop(&self, timeout: Duration) -> Result<Option<Message>, QueueError> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut state = self.state.lock().await;
                Self::reclaim_expired(&mut state);
                if let Some((job_id, payload)) = state.waiting.pop_front() {
                    let token = Uuid::new_v4().to_string();
                    state.processing.insert(
                        token.clone(),
                        Inflight {
                            job_id: job_id.clone(),
                            payload: payload.clone(),
                            expires_at: Instant::now() + self.visibility_timeout,
                        },
                    );
                    state.job_token.insert(job_id.clone(), token.clone());
                    return Ok(Some(Message {
                        job_id,
                        token,
                        payload,
                    }));
                }
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(Duration::from_millis(20).min(deadline - Instant::now())).await;
        }
    }

    async fn ack(&self, message: &Message) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        let Some(current_token) = state.job_token.get(&message.job_id) else {
            return Ok(());
        };
        if current_token != &message.token {
            return Ok(());
        }
        let matches_payload = state
            .processing
            .get(&message.token)
            .map(|inflight| inflight.payload == message.payload)
            .unwrap_or(false);
        if !matches_payload {
            return Ok(());
        }
        state.processing.remove(&message.token);
        state.job_token.remove(&message.job_id);
        state.dedupe.remove(&message.job_id);
        Ok(())
    }

    async fn length(&self) -> Result<u64, QueueError> {
        let state = self.state.lock().await;
        Ok(state.waiting.len() as u64)
    }

    async fn close(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dedupe_suppresses_duplicate_push() {
        let q = InMemoryQueue::new(Duration::from_secs(30));
        assert!(q.push("job-1", b"a").await.unwrap());
        assert!(!q.push("job-1", b"a").await.unwrap());
        assert_eq!(q.length().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_pop_then_ack_clears_dedupe() {
        let q = InMemoryQueue::new(Duration::from_secs(30));
        q.push("job-1", b"a").await.unwrap();
        let msg = q.pop(Duration::from_millis(50)).await.unwrap().unwrap();
        assert_eq!(msg.job_id, "job-1");
        q.ack(&msg).await.unwrap();
        assert!(q.push("job-1", b"a").await.unwrap());
    }

    #[tokio::test]
    async fn test_vt_reclaim_issues_new_token_and_stale_ack_is_noop() {
        let q = InMemoryQueue::new(Duration::from_millis(10));
        q.push("job-1", b"a").await.unwrap();
        let first = q.pop(Duration::from_millis(50)).await.unwrap().unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;

        let second = q.pop(Duration::from_millis(50)).await.unwrap().unwrap();
        assert_eq!(second.job_id, "job-1");
        assert_ne!(second.token, first.token);

        q.ack(&first).await.unwrap();
        // stale ack must not release the dedupe entry the live lease still holds
        assert!(!q.push("job-1", b"a").await.unwrap());

        q.ack(&second).await.unwrap();
        assert!(q.push("job-1", b"a").await.unwrap());
    }

    #[tokio::test]
    async fn test_pop_times_out_on_empty_queue() {
        let q = InMemoryQueue::new(Duration::from_secs(30));
        let result = q.pop(Duration::from_millis(30)).await.unwrap();
        assert!(result.is_none());
    }
}
