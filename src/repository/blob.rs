//! Blob persistence: one row per (filing, kind); upserts overwrite location+checksum.

use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use crate::models::{Blob, BlobKind};
use crate::repository::diesel_models::{now_str, BlobRecord, NewBlob};
use crate::repository::pool::{DbError, DbPool};
use crate::schema::blobs;
use crate::with_conn;

#[derive(Clone)]
pub struct BlobRepository {
    pool: DbPool,
}

impl BlobRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn upsert(
        &self,
        filing_id: &str,
        kind: BlobKind,
        location: &str,
        content_type: &str,
        checksum: &str,
    ) -> Result<Blob, DbError> {
        let now = now_str();
        with_conn!(self.pool, conn => {
            let existing: Option<BlobRecord> = blobs::table
                .filter(blobs::filing_id.eq(filing_id))
                .filter(blobs::kind.eq(kind.as_str()))
                .first(&mut conn)
                .await
                .optional()?;

            if let Some(existing) = existing {
                diesel::update(blobs::table.find(existing.id))
                    .set((
                        blobs::location.eq(location),
                        blobs::content_type.eq(content_type),
                        blobs::checksum.eq(checksum),
                        blobs::updated_at.eq(&now),
                    ))
                    .execute(&mut conn)
                    .await?;
                let record: BlobRecord = blobs::table.find(existing.id).first(&mut conn).await?;
                Ok(record.into())
            } else {
                let new_blob = NewBlob {
                    filing_id,
                    kind: kind.as_str(),
                    location,
                    content_type,
                    checksum,
                    created_at: &now,
                    updated_at: &now,
                };
                diesel::insert_into(blobs::table)
                    .values(&new_blob)
                    .execute(&mut conn)
                    .await?;
                let record: BlobRecord = blobs::table
                    .filter(blobs::filing_id.eq(filing_id))
                    .filter(blobs::kind.eq(kind.as_str()))
                    .first(&mut conn)
                    .await?;
                Ok(record.into())
            }
        })
    }

    pub async fn list_for_filing(&self, filing_id: &str) -> Result<Vec<Blob>, DbError> {
        with_conn!(self.pool, conn => {
            blobs::table
                .filter(blobs::filing_id.eq(filing_id))
                .load::<BlobRecord>(&mut conn)
                .await
                .map(|rs| rs.into_iter().map(Blob::from).collect())
        })
    }

    pub async fn find(&self, filing_id: &str, kind: BlobKind) -> Result<Option<Blob>, DbError> {
        with_conn!(self.pool, conn => {
            blobs::table
                .filter(blobs::filing_id.eq(filing_id))
                .filter(blobs::kind.eq(kind.as_str()))
                .first::<BlobRecord>(&mut conn)
                .await
                .optional()
                .map(|r| r.map(Blob::from))
        })
    }
}
