//! Redis-backed [`ReliableQueue`] for distributed multi-process coordination.
//!
//! Dedupe, visibility-timeout handoff, and acknowledgement are each a single
//! atomic Lua script so that concurrent producers/consumers across processes
//! never observe a half-applied state.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use uuid::Uuid;

use super::{Message, QueueError, ReliableQueue};

/// Poll interval between non-blocking pop attempts while waiting out a `pop`
/// timeout. Redis Lua scripts cannot block, so waiting is emulated here.
const POP_POLL_INTERVAL: Duration = Duration::from_millis(200);
/// Maximum processing-index entries reclaimed in a single `pop` call.
const RECLAIM_BATCH: usize = 100;

/// Atomically test-and-add `job_id` to the dedupe set; on success, append
/// the entry to the queue tail.
static PUSH_SCRIPT: &str = r#"
local added = redis.call('SADD', KEYS[1], ARGV[1])
if added == 1 then
    redis.call('RPUSH', KEYS[2], ARGV[2])
    return 1
end
return 0
"#;

/// Reclaim processing-index entries past their expiry (re-pushed to the
/// queue head, dedupe left intact), then attempt a single non-blocking pop
/// and, if one is available, move it into the processing index under a
/// fresh token.
static POP_SCRIPT: &str = r#"
local expired = redis.call('ZRANGEBYSCORE', KEYS[3], '-inf', ARGV[1], 'LIMIT', 0, ARGV[4])
for _, token in ipairs(expired) do
    local entry = redis.call('HGET', KEYS[4], token)
    if entry then
        redis.call('LPUSH', KEYS[1], entry)
        redis.call('HDEL', KEYS[4], token)
    end
    redis.call('LREM', KEYS[2], 0, token)
    redis.call('ZREM', KEYS[3], token)
end

local entry = redis.call('LPOP', KEYS[1])
if not entry then
    return false
end

local nul = string.find(entry, '\0', 1, true)
local job_id = string.sub(entry, 1, nul - 1)
local expiry = tonumber(ARGV[1]) + tonumber(ARGV[2])

redis.call('RPUSH', KEYS[2], ARGV[3])
redis.call('HSET', KEYS[4], ARGV[3], entry)
redis.call('ZADD', KEYS[3], expiry, ARGV[3])
redis.call('HSET', KEYS[5], job_id, ARGV[3])

return entry
"#;

/// Guarded ack: only releases the lease if the job's current token and the
/// processing entry's stored payload both match what the caller holds. A
/// stale ack (token reassigned by a reclaim) is a safe no-op.
static ACK_SCRIPT: &str = r#"
local current_token = redis.call('HGET', KEYS[4], ARGV[2])
if current_token ~= ARGV[1] then
    return 0
end
local stored_entry = redis.call('HGET', KEYS[3], ARGV[1])
if stored_entry ~= ARGV[3] then
    return 0
end

redis.call('LREM', KEYS[1], 0, ARGV[1])
redis.call('HDEL', KEYS[3], ARGV[1])
redis.call('ZREM', KEYS[2], ARGV[1])
redis.call('HDEL', KEYS[4], ARGV[2])
redis.call('SREM', KEYS[5], ARGV[2])

return 1
"#;

pub struct RedisQueue {
    conn: ConnectionManager,
    name: String,
    visibility_timeout: Duration,
}

impl RedisQueue {
    pub async fn new(
        redis_url: &str,
        name: impl Into<String>,
        visibility_timeout: Duration,
    ) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            name: name.into(),
            visibility_timeout,
        })
    }

    fn dedupe_key(&self) -> String {
        format!("{}:dedupe", self.name)
    }

    fn processing_key(&self) -> String {
        format!("{}:processing", self.name)
    }

    fn zset_key(&self) -> String {
        format!("{}:processing:zset", self.name)
    }

    fn payload_key(&self) -> String {
        format!("{}:processing:payload", self.name)
    }

    fn token_key(&self) -> String {
        format!("{}:processing:token", self.name)
    }

    fn encode(job_id: &str, payload: &[u8]) -> Vec<u8> {
        let mut entry = Vec::with_capacity(job_id.len() + 1 + payload.len());
        entry.extend_from_slice(job_id.as_bytes());
        entry.push(0);
        entry.extend_from_slice(payload);
        entry
    }

    fn decode(entry: Vec<u8>) -> (String, Vec<u8>) {
        let nul = entry.iter().position(|&b| b == 0).unwrap_or(entry.len());
        let job_id = String::from_utf8_lossy(&entry[..nul]).into_owned();
        let payload = entry.get(nul + 1..).unwrap_or(&[]).to_vec();
        (job_id, payload)
    }
}

#[async_trait]
impl ReliableQueue for RedisQueue {
    async fn push(&self, job_id: &str, payload: &[u8]) -> Result<bool, QueueError> {
        let mut conn = self.conn.clone();
        let entry = Self::encode(job_id, payload);
        let added: i32 = Script::new(PUSH_SCRIPT)
            .key(self.dedupe_key())
            .key(&self.name)
            .arg(job_id)
            .arg(entry)
            .invoke_async(&mut conn)
            .await?;
        Ok(added == 1)
    }

    async fn pop(&self, timeout: Duration) -> Result<Option<Message>, QueueError> {
        let mut conn = self.conn.clone();
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let token = Uuid::new_v4().to_string();
            let now_ms = chrono::Utc::now().timestamp_millis();

            let result: Option<Vec<u8>> = Script::new(POP_SCRIPT)
                .key(&self.name)
                .key(self.processing_key())
                .key(self.zset_key())
                .key(self.payload_key())
                .key(self.token_key())
                .arg(now_ms)
                .arg(self.visibility_timeout.as_millis() as i64)
                .arg(&token)
                .arg(RECLAIM_BATCH)
                .invoke_async(&mut conn)
                .await?;

            if let Some(entry) = result {
                let (job_id, payload) = Self::decode(entry);
                return Ok(Some(Message {
                    job_id,
                    token,
                    payload,
                }));
            }

            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POP_POLL_INTERVAL.min(deadline - tokio::time::Instant::now())).await;
        }
    }

    async fn ack(&self, message: &Message) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let expected = Self::encode(&message.job_id, &message.payload);
        let _: i32 = Script::new(ACK_SCRIPT)
            .key(self.processing_key())
            .key(self.zset_key())
            .key(self.payload_key())
            .key(self.token_key())
            .key(self.dedupe_key())
            .arg(&message.token)
            .arg(&message.job_id)
            .arg(expected)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn length(&self) -> Result<u64, QueueError> {
        let mut conn = self.conn.clone();
        let n: u64 = redis::cmd("LLEN")
            .arg(&self.name)
            .query_async(&mut conn)
            .await?;
        Ok(n)
    }

    async fn close(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

impl Clone for RedisQueue {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
            name: self.name.clone(),
            visibility_timeout: self.visibility_timeout,
        }
    }
}
