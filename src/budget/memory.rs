//! In-process [`KvStore`] test double, same increment/expiry-once semantics.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{BudgetError, KvStore};

#[derive(Default)]
pub struct InMemoryKvStore {
    counters: Mutex<HashMap<String, (i64, Option<i64>)>>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn incr_with_expiry(
        &self,
        key: &str,
        amount: i64,
        expire_at_ms: i64,
    ) -> Result<i64, BudgetError> {
        let mut counters = self.counters.lock().unwrap();
        let entry = counters.entry(key.to_string()).or_insert((0, None));
        entry.0 += amount;
        if entry.1.is_none() {
            entry.1 = Some(expire_at_ms);
        }
        Ok(entry.0)
    }

    async fn incr(&self, key: &str, delta: i64) -> Result<i64, BudgetError> {
        let mut counters = self.counters.lock().unwrap();
        let entry = counters.entry(key.to_string()).or_insert((0, None));
        entry.0 += delta;
        Ok(entry.0)
    }
}
