//! Analysis persistence: every job_id is globally unique (invariant c);
//! re-runs either reuse the record in place or produce a new one.

use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use crate::models::{Analysis, AnalysisType};
use crate::repository::diesel_models::{now_str, AnalysisRecord, NewAnalysis};
use crate::repository::pool::{DbError, DbPool};
use crate::schema::analyses;
use crate::with_conn;

pub struct UpsertAnalysis<'a> {
    pub job_id: &'a str,
    pub filing_id: &'a str,
    pub section_id: Option<i32>,
    pub analysis_type: AnalysisType,
    pub model: &'a str,
    pub content: &'a str,
    pub prompt_tokens: i32,
    pub completion_tokens: i32,
    pub total_tokens: i32,
    pub extra: Option<&'a str>,
}

#[derive(Clone)]
pub struct AnalysisRepository {
    pool: DbPool,
}

impl AnalysisRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn upsert_by_job_id(&self, input: UpsertAnalysis<'_>) -> Result<Analysis, DbError> {
        let now = now_str();
        with_conn!(self.pool, conn => {
            let existing: Option<AnalysisRecord> = analyses::table
                .filter(analyses::job_id.eq(input.job_id))
                .first(&mut conn)
                .await
                .optional()?;

            if let Some(existing) = existing {
                diesel::update(analyses::table.find(existing.id))
                    .set((
                        analyses::content.eq(input.content),
                        analyses::model.eq(input.model),
                        analyses::prompt_tokens.eq(input.prompt_tokens),
                        analyses::completion_tokens.eq(input.completion_tokens),
                        analyses::total_tokens.eq(input.total_tokens),
                        analyses::extra.eq(input.extra),
                        analyses::updated_at.eq(&now),
                    ))
                    .execute(&mut conn)
                    .await?;
                let record: AnalysisRecord = analyses::table.find(existing.id).first(&mut conn).await?;
                Ok(record.into())
            } else {
                let new_analysis = NewAnalysis {
                    job_id: input.job_id,
                    filing_id: input.filing_id,
                    section_id: input.section_id,
                    analysis_type: input.analysis_type.as_str(),
                    model: input.model,
                    content: input.content,
                    prompt_tokens: input.prompt_tokens,
                    completion_tokens: input.completion_tokens,
                    total_tokens: input.total_tokens,
                    extra: input.extra,
                    created_at: &now,
                    updated_at: &now,
                };
                diesel::insert_into(analyses::table)
                    .values(&new_analysis)
                    .execute(&mut conn)
                    .await?;
                let record: AnalysisRecord = analyses::table
                    .filter(analyses::job_id.eq(input.job_id))
                    .first(&mut conn)
                    .await?;
                Ok(record.into())
            }
        })
    }

    pub async fn get_by_job_id(&self, job_id: &str) -> Result<Option<Analysis>, DbError> {
        with_conn!(self.pool, conn => {
            analyses::table
                .filter(analyses::job_id.eq(job_id))
                .first::<AnalysisRecord>(&mut conn)
                .await
                .optional()
                .map(|r| r.map(Analysis::from))
        })
    }

    pub async fn delete_by_job_id(&self, job_id: &str) -> Result<(), DbError> {
        with_conn!(self.pool, conn => {
            diesel::delete(analyses::table.filter(analyses::job_id.eq(job_id)))
                .execute(&mut conn)
                .await
                .map(|_| ())
        })
    }
}
