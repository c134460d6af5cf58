//! Filing persistence: status is mutated only by the component owning the
//! current stage (downloader -> DOWNLOADED; parser -> PARSED or FAILED).

use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use crate::models::{Filing, FilingStatus};
use crate::repository::diesel_models::{now_str, FilingRecord, NewFiling};
use crate::repository::pool::{DbError, DbPool};
use crate::schema::filings;
use crate::with_conn;

#[derive(Clone)]
pub struct FilingRepository {
    pool: DbPool,
}

impl FilingRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Upsert by accession number. Source URLs are merged (appended, deduped)
    /// rather than overwritten, since a filing may be rediscovered via a
    /// different feed entry.
    pub async fn upsert(
        &self,
        accession: &str,
        issuer_cik: &str,
        form_type: &str,
        filed_at: chrono::DateTime<chrono::Utc>,
        source_url: &str,
    ) -> Result<Filing, DbError> {
        let now = now_str();
        let filed_at = filed_at.to_rfc3339();

        with_conn!(self.pool, conn => {
            let existing: Option<FilingRecord> = filings::table
                .find(accession)
                .first(&mut conn)
                .await
                .optional()?;

            if let Some(existing) = existing {
                let mut urls: Vec<String> = serde_json::from_str(&existing.source_urls)
                    .unwrap_or_default();
                if !urls.iter().any(|u| u == source_url) {
                    urls.push(source_url.to_string());
                }
                let urls_json = serde_json::to_string(&urls).unwrap_or_default();

                diesel::update(filings::table.find(accession))
                    .set((filings::source_urls.eq(&urls_json), filings::updated_at.eq(&now)))
                    .execute(&mut conn)
                    .await?;

                let record: FilingRecord = filings::table.find(accession).first(&mut conn).await?;
                record.into_domain().map_err(super::util::to_diesel_error)
            } else {
                let urls_json = serde_json::to_string(&vec![source_url.to_string()])
                    .unwrap_or_default();
                let new_filing = NewFiling {
                    accession,
                    issuer_cik,
                    form_type,
                    filed_at: &filed_at,
                    source_urls: &urls_json,
                    status: FilingStatus::Pending.as_str(),
                    downloaded_at: None,
                    created_at: &now,
                    updated_at: &now,
                };
                diesel::insert_into(filings::table)
                    .values(&new_filing)
                    .execute(&mut conn)
                    .await?;

                let record: FilingRecord = filings::table.find(accession).first(&mut conn).await?;
                record.into_domain().map_err(super::util::to_diesel_error)
            }
        })
    }

    pub async fn get(&self, accession: &str) -> Result<Option<Filing>, DbError> {
        with_conn!(self.pool, conn => {
            let record: Option<FilingRecord> = filings::table
                .find(accession)
                .first(&mut conn)
                .await
                .optional()?;
            record
                .map(FilingRecord::into_domain)
                .transpose()
                .map_err(super::util::to_diesel_error)
        })
    }

    pub async fn set_status_downloaded(&self, accession: &str) -> Result<(), DbError> {
        let now = now_str();
        with_conn!(self.pool, conn => {
            diesel::update(filings::table.find(accession))
                .set((
                    filings::status.eq(FilingStatus::Downloaded.as_str()),
                    filings::downloaded_at.eq(&now),
                    filings::updated_at.eq(&now),
                ))
                .execute(&mut conn)
                .await
                .map(|_| ())
        })
    }

    pub async fn set_status_parsed(&self, accession: &str) -> Result<(), DbError> {
        self.set_status(accession, FilingStatus::Parsed).await
    }

    pub async fn set_status_failed(&self, accession: &str) -> Result<(), DbError> {
        self.set_status(accession, FilingStatus::Failed).await
    }

    async fn set_status(&self, accession: &str, status: FilingStatus) -> Result<(), DbError> {
        let now = now_str();
        with_conn!(self.pool, conn => {
            diesel::update(filings::table.find(accession))
                .set((filings::status.eq(status.as_str()), filings::updated_at.eq(&now)))
                .execute(&mut conn)
                .await
                .map(|_| ())
        })
    }

    /// Most recent prior filing with the same issuer and form type whose
    /// `filed_at` precedes the current filing's.
    pub async fn find_prior(
        &self,
        issuer_cik: &str,
        form_type: &str,
        before: chrono::DateTime<chrono::Utc>,
    ) -> Result<Option<Filing>, DbError> {
        let before = before.to_rfc3339();
        with_conn!(self.pool, conn => {
            let record: Option<FilingRecord> = filings::table
                .filter(filings::issuer_cik.eq(issuer_cik))
                .filter(filings::form_type.eq(form_type))
                .filter(filings::filed_at.lt(&before))
                .order(filings::filed_at.desc())
                .first(&mut conn)
                .await
                .optional()?;
            record
                .map(FilingRecord::into_domain)
                .transpose()
                .map_err(super::util::to_diesel_error)
        })
    }
}
