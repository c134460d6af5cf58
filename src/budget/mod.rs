//! Daily token budget shared across worker processes (spec component 4.9).
//!
//! One [`BudgetManager`] per process wraps a pluggable [`KvStore`] backend
//! and exposes `reserve`, returning a [`Reservation`] the caller later
//! settles with `commit(used)` or `release()`.

pub mod memory;
pub mod redis;

pub use memory::InMemoryKvStore;
pub use redis::RedisKvStore;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use metrics::{counter, gauge};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BudgetError {
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
    #[error("daily budget exceeded for {service}/{model}: {total} over {limit}")]
    Exceeded {
        service: String,
        model: String,
        total: i64,
        limit: i64,
    },
}

/// Pluggable atomic counter backend for [`BudgetManager`].
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Atomically add `amount` to `key`, setting its expiry to `expire_at_ms`
    /// (epoch millis) only if the key previously had no expiry, then return
    /// the resulting total.
    async fn incr_with_expiry(
        &self,
        key: &str,
        amount: i64,
        expire_at_ms: i64,
    ) -> Result<i64, BudgetError>;

    /// Add `delta` (may be negative) to `key` without touching its expiry.
    async fn incr(&self, key: &str, delta: i64) -> Result<i64, BudgetError>;
}

pub type BoxedKvStore = Arc<dyn KvStore>;

/// An in-flight reservation against a `(service, model)` scope. Must be
/// settled with [`Reservation::commit`] or [`Reservation::release`]; an
/// un-settled reservation keeps its full `reserved` amount charged against
/// the day's counter.
pub struct Reservation {
    kv: BoxedKvStore,
    key: String,
    service: String,
    model: String,
    reserved: i64,
}

impl Reservation {
    /// Adjust the charge from `reserved` down (or up) to `used`, updating
    /// the used/remaining gauges afterward.
    pub async fn commit(self, used: i64, daily_limit: i64) -> Result<(), BudgetError> {
        let delta = used - self.reserved;
        let total = if delta != 0 {
            self.kv.incr(&self.key, delta).await?
        } else {
            self.reserved
        };
        self.publish_gauges(total, daily_limit);
        Ok(())
    }

    /// Equivalent to `commit(0, ...)`: gives back the full reservation.
    pub async fn release(self, daily_limit: i64) -> Result<(), BudgetError> {
        let total = self.kv.incr(&self.key, -self.reserved).await?;
        self.publish_gauges(total, daily_limit);
        Ok(())
    }

    fn publish_gauges(&self, total: i64, daily_limit: i64) {
        gauge!("budget_tokens_used", "service" => self.service.clone(), "model" => self.model.clone())
            .set(total.max(0) as f64);
        gauge!("budget_tokens_remaining", "service" => self.service.clone(), "model" => self.model.clone())
            .set((daily_limit - total).max(0) as f64);
    }
}

#[derive(Clone)]
pub struct BudgetManager {
    kv: BoxedKvStore,
}

impl BudgetManager {
    pub fn new(kv: BoxedKvStore) -> Self {
        Self { kv }
    }

    fn key(service: &str, model: &str) -> String {
        let yyyymmdd = Utc::now().format("%Y%m%d");
        format!("sec:groq:budget:{service}:{model}:{yyyymmdd}")
    }

    fn next_utc_midnight_ms() -> i64 {
        let now = Utc::now();
        let tomorrow = (now + ChronoDuration::days(1)).date_naive();
        Utc.from_utc_datetime(&tomorrow.and_hms_opt(0, 0, 0).unwrap())
            .timestamp_millis()
    }

    /// Reserve `amount` tokens against `(service, model)`'s daily limit.
    /// Fails with [`BudgetError::Exceeded`] (and decrements the counter back
    /// out, plus increments an exhaustion counter) if the reservation would
    /// push the day's total past `daily_limit`.
    pub async fn reserve(
        &self,
        service: &str,
        model: &str,
        amount: i64,
        daily_limit: i64,
    ) -> Result<Reservation, BudgetError> {
        let key = Self::key(service, model);
        let total = self
            .kv
            .incr_with_expiry(&key, amount, Self::next_utc_midnight_ms())
            .await?;

        if total > daily_limit {
            self.kv.incr(&key, -amount).await?;
            counter!("budget_exhausted_total", "service" => service.to_string(), "model" => model.to_string())
                .increment(1);
            return Err(BudgetError::Exceeded {
                service: service.to_string(),
                model: model.to_string(),
                total: total - amount,
                limit: daily_limit,
            });
        }

        gauge!("budget_tokens_used", "service" => service.to_string(), "model" => model.to_string())
            .set(total.max(0) as f64);
        gauge!("budget_tokens_remaining", "service" => service.to_string(), "model" => model.to_string())
            .set((daily_limit - total).max(0) as f64);

        Ok(Reservation {
            kv: self.kv.clone(),
            key,
            service: service.to_string(),
            model: model.to_string(),
            reserved: amount,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reserve_within_limit_succeeds() {
        let manager = BudgetManager::new(Arc::new(InMemoryKvStore::new()));
        let reservation = manager.reserve("summary", "gpt-4o-mini", 1000, 5000).await.unwrap();
        reservation.commit(1000, 5000).await.unwrap();
    }

    #[tokio::test]
    async fn test_reserve_over_limit_fails_and_decrements_back() {
        let manager = BudgetManager::new(Arc::new(InMemoryKvStore::new()));
        manager.reserve("summary", "gpt-4o-mini", 4000, 5000).await.unwrap();
        let err = manager.reserve("summary", "gpt-4o-mini", 2000, 5000).await;
        assert!(matches!(err, Err(BudgetError::Exceeded { .. })));

        // the failed reservation's amount must not remain charged
        let reservation = manager.reserve("summary", "gpt-4o-mini", 1000, 5000).await.unwrap();
        reservation.release(5000).await.unwrap();
    }

    #[tokio::test]
    async fn test_commit_applies_delta_not_full_reserved() {
        let manager = BudgetManager::new(Arc::new(InMemoryKvStore::new()));
        let reservation = manager.reserve("entity", "gpt-4o-mini", 1000, 5000).await.unwrap();
        reservation.commit(400, 5000).await.unwrap();

        // 600 tokens of headroom were given back; a 4700 reserve should now fit
        let reservation = manager.reserve("entity", "gpt-4o-mini", 4600, 5000).await.unwrap();
        reservation.release(5000).await.unwrap();
    }
}
