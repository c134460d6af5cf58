//! Issuer persistence: lazily created by the downloader, keyed by CIK.

use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use crate::models::Issuer;
use crate::repository::diesel_models::IssuerRecord;
use crate::repository::pool::{DbError, DbPool};
use crate::schema::issuers;
use crate::with_conn;

#[derive(Clone)]
pub struct IssuerRepository {
    pool: DbPool,
}

impl IssuerRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, cik: &str) -> Result<Option<Issuer>, DbError> {
        with_conn!(self.pool, conn => {
            issuers::table
                .find(cik)
                .first::<IssuerRecord>(&mut conn)
                .await
                .optional()
                .map(|r| r.map(Issuer::from))
        })
    }
}
