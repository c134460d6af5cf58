//! Redis-backed [`KvStore`] for the budget manager.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;

use super::{BudgetError, KvStore};

/// Increment by `amount` and, only if the key has no TTL yet, pin its
/// expiry to an absolute epoch-millis timestamp. Keeping this as one script
/// avoids a race between two workers both seeing "no TTL" and re-arming it.
static INCR_WITH_EXPIRY_SCRIPT: &str = r#"
local total = redis.call('INCRBY', KEYS[1], ARGV[1])
local ttl = redis.call('PTTL', KEYS[1])
if ttl == -1 then
    redis.call('PEXPIREAT', KEYS[1], ARGV[2])
end
return total
"#;

pub struct RedisKvStore {
    conn: ConnectionManager,
}

impl RedisKvStore {
    pub async fn new(redis_url: &str) -> Result<Self, BudgetError> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn incr_with_expiry(
        &self,
        key: &str,
        amount: i64,
        expire_at_ms: i64,
    ) -> Result<i64, BudgetError> {
        let mut conn = self.conn.clone();
        let total: i64 = Script::new(INCR_WITH_EXPIRY_SCRIPT)
            .key(key)
            .arg(amount)
            .arg(expire_at_ms)
            .invoke_async(&mut conn)
            .await?;
        Ok(total)
    }

    async fn incr(&self, key: &str, delta: i64) -> Result<i64, BudgetError> {
        let mut conn = self.conn.clone();
        let total: i64 = redis::cmd("INCRBY")
            .arg(key)
            .arg(delta)
            .query_async(&mut conn)
            .await?;
        Ok(total)
    }
}

impl Clone for RedisKvStore {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
        }
    }
}
