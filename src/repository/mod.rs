//! Repository layer for database persistence.
//!
//! Dual-backend (SQLite for dev/tests, PostgreSQL for production) support is
//! carried by [`pool::DbPool`] and the `with_conn!`/`with_conn_split!` macros
//! it exports; individual entity repositories dispatch through those macros
//! rather than matching on the backend themselves.

#![allow(dead_code)]

pub mod analysis;
pub mod blob;
pub mod diesel_models;
pub mod diff;
pub mod entity;
pub mod filing;
pub mod issuer;
pub mod migrations;
pub mod pool;
pub mod section;
pub mod transactions;
pub mod util;

pub use analysis::AnalysisRepository;
pub use blob::BlobRepository;
pub use diff::DiffRepository;
pub use entity::EntityRepository;
pub use filing::FilingRepository;
pub use issuer::IssuerRepository;
pub use section::SectionRepository;

use chrono::{DateTime, Utc};

/// Parse an RFC3339 timestamp column, defaulting to Unix epoch on error.
///
/// Every `*_at` column in this schema is written by
/// [`diesel_models::now_str`], so a parse failure only happens against a
/// corrupted row; falling back to the epoch keeps read paths infallible.
pub fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Parse an optional RFC3339 timestamp column.
pub fn parse_datetime_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}

/// One pool instance, shared by every entity repository via cheap `Clone`.
///
/// `pool` is kept alongside the per-entity repositories so [`transactions`]
/// can open connections spanning more than one table's repository, for the
/// writes the spec requires to land in a single transaction.
#[derive(Clone)]
pub struct Repositories {
    pool: pool::DbPool,
    pub issuers: IssuerRepository,
    pub filings: FilingRepository,
    pub blobs: BlobRepository,
    pub sections: SectionRepository,
    pub analyses: AnalysisRepository,
    pub entities: EntityRepository,
    pub diffs: DiffRepository,
}

impl Repositories {
    pub fn new(pool: pool::DbPool) -> Self {
        Self {
            issuers: IssuerRepository::new(pool.clone()),
            filings: FilingRepository::new(pool.clone()),
            blobs: BlobRepository::new(pool.clone()),
            sections: SectionRepository::new(pool.clone()),
            analyses: AnalysisRepository::new(pool.clone()),
            entities: EntityRepository::new(pool.clone()),
            diffs: DiffRepository::new(pool.clone()),
            pool,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_datetime_falls_back_to_epoch() {
        assert_eq!(parse_datetime("not-a-date"), DateTime::UNIX_EPOCH);
    }

    #[test]
    fn test_parse_datetime_roundtrip() {
        let now = Utc::now();
        let s = now.to_rfc3339();
        let parsed = parse_datetime(&s);
        assert_eq!(parsed.timestamp(), now.timestamp());
    }
}
