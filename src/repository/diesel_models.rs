//! Diesel ORM row structs for the filing pipeline tables.
//!
//! These models provide compile-time type checking for database operations.
//! For SQLite, operations are wrapped via `SyncConnectionWrapper` since
//! diesel-async only natively supports Postgres/MySQL.

use chrono::{DateTime, Utc};
use diesel::prelude::*;

use crate::schema;

fn to_rfc3339(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

/// Issuer record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::issuers)]
#[diesel(primary_key(cik))]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct IssuerRecord {
    pub cik: String,
    pub name: String,
    pub ticker: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = schema::issuers)]
pub struct NewIssuer<'a> {
    pub cik: &'a str,
    pub name: &'a str,
    pub ticker: Option<&'a str>,
    pub created_at: &'a str,
    pub updated_at: &'a str,
}

impl From<IssuerRecord> for crate::models::Issuer {
    fn from(r: IssuerRecord) -> Self {
        Self {
            cik: r.cik,
            name: r.name,
            ticker: r.ticker,
            created_at: crate::repository::parse_datetime(&r.created_at),
            updated_at: crate::repository::parse_datetime(&r.updated_at),
        }
    }
}

/// Filing record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::filings)]
#[diesel(primary_key(accession))]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct FilingRecord {
    pub accession: String,
    pub issuer_cik: String,
    pub form_type: String,
    pub filed_at: String,
    pub source_urls: String,
    pub status: String,
    pub downloaded_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Insertable, AsChangeset, Debug)]
#[diesel(table_name = schema::filings)]
pub struct NewFiling<'a> {
    pub accession: &'a str,
    pub issuer_cik: &'a str,
    pub form_type: &'a str,
    pub filed_at: &'a str,
    pub source_urls: &'a str,
    pub status: &'a str,
    pub downloaded_at: Option<&'a str>,
    pub created_at: &'a str,
    pub updated_at: &'a str,
}

impl FilingRecord {
    pub fn into_domain(self) -> Result<crate::models::Filing, serde_json::Error> {
        let source_urls: Vec<String> = serde_json::from_str(&self.source_urls)?;
        Ok(crate::models::Filing {
            accession: self.accession,
            issuer_cik: self.issuer_cik,
            form_type: self.form_type,
            filed_at: crate::repository::parse_datetime(&self.filed_at),
            source_urls,
            status: crate::models::FilingStatus::from_str(&self.status)
                .unwrap_or(crate::models::FilingStatus::Pending),
            downloaded_at: crate::repository::parse_datetime_opt(self.downloaded_at),
            created_at: crate::repository::parse_datetime(&self.created_at),
            updated_at: crate::repository::parse_datetime(&self.updated_at),
        })
    }
}

/// Blob record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::blobs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct BlobRecord {
    pub id: i32,
    pub filing_id: String,
    pub kind: String,
    pub location: String,
    pub content_type: String,
    pub checksum: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Insertable, AsChangeset, Debug)]
#[diesel(table_name = schema::blobs)]
pub struct NewBlob<'a> {
    pub filing_id: &'a str,
    pub kind: &'a str,
    pub location: &'a str,
    pub content_type: &'a str,
    pub checksum: &'a str,
    pub created_at: &'a str,
    pub updated_at: &'a str,
}

impl From<BlobRecord> for crate::models::Blob {
    fn from(r: BlobRecord) -> Self {
        Self {
            id: r.id,
            filing_id: r.filing_id,
            kind: crate::models::BlobKind::from_str(&r.kind)
                .unwrap_or(crate::models::BlobKind::Raw),
            location: r.location,
            content_type: r.content_type,
            checksum: r.checksum,
            created_at: crate::repository::parse_datetime(&r.created_at),
            updated_at: crate::repository::parse_datetime(&r.updated_at),
        }
    }
}

/// Section record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::sections)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SectionRecord {
    pub id: i32,
    pub filing_id: String,
    pub ordinal: i32,
    pub title: String,
    pub content: String,
    pub content_hash: Option<String>,
    pub created_at: String,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = schema::sections)]
pub struct NewSection<'a> {
    pub filing_id: &'a str,
    pub ordinal: i32,
    pub title: &'a str,
    pub content: &'a str,
    pub content_hash: Option<&'a str>,
    pub created_at: &'a str,
}

impl From<SectionRecord> for crate::models::Section {
    fn from(r: SectionRecord) -> Self {
        Self {
            id: r.id,
            filing_id: r.filing_id,
            ordinal: r.ordinal,
            title: r.title,
            content: r.content,
            content_hash: r.content_hash,
            created_at: crate::repository::parse_datetime(&r.created_at),
        }
    }
}

/// Analysis record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::analyses)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct AnalysisRecord {
    pub id: i32,
    pub job_id: String,
    pub filing_id: String,
    pub section_id: Option<i32>,
    pub analysis_type: String,
    pub model: String,
    pub content: String,
    pub prompt_tokens: i32,
    pub completion_tokens: i32,
    pub total_tokens: i32,
    pub extra: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Insertable, AsChangeset, Debug)]
#[diesel(table_name = schema::analyses)]
pub struct NewAnalysis<'a> {
    pub job_id: &'a str,
    pub filing_id: &'a str,
    pub section_id: Option<i32>,
    pub analysis_type: &'a str,
    pub model: &'a str,
    pub content: &'a str,
    pub prompt_tokens: i32,
    pub completion_tokens: i32,
    pub total_tokens: i32,
    pub extra: Option<&'a str>,
    pub created_at: &'a str,
    pub updated_at: &'a str,
}

impl From<AnalysisRecord> for crate::models::Analysis {
    fn from(r: AnalysisRecord) -> Self {
        Self {
            id: r.id,
            job_id: r.job_id,
            filing_id: r.filing_id,
            section_id: r.section_id,
            analysis_type: crate::models::AnalysisType::from_str(&r.analysis_type)
                .unwrap_or(crate::models::AnalysisType::SectionChunkSummary),
            model: r.model,
            content: r.content,
            prompt_tokens: r.prompt_tokens,
            completion_tokens: r.completion_tokens,
            total_tokens: r.total_tokens,
            extra: r.extra,
            created_at: crate::repository::parse_datetime(&r.created_at),
            updated_at: crate::repository::parse_datetime(&r.updated_at),
        }
    }
}

/// Entity record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::entities)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct EntityRecord {
    pub id: i32,
    pub filing_id: String,
    pub section_id: Option<i32>,
    pub analysis_id: Option<i32>,
    pub entity_type: String,
    pub label: String,
    pub confidence: Option<f32>,
    pub evidence: Option<String>,
    pub attributes: Option<String>,
    pub created_at: String,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = schema::entities)]
pub struct NewEntity<'a> {
    pub filing_id: &'a str,
    pub section_id: Option<i32>,
    pub analysis_id: Option<i32>,
    pub entity_type: &'a str,
    pub label: &'a str,
    pub confidence: Option<f32>,
    pub evidence: Option<&'a str>,
    pub attributes: Option<&'a str>,
    pub created_at: &'a str,
}

impl From<EntityRecord> for crate::models::Entity {
    fn from(r: EntityRecord) -> Self {
        Self {
            id: r.id,
            filing_id: r.filing_id,
            section_id: r.section_id,
            analysis_id: r.analysis_id,
            entity_type: r.entity_type,
            label: r.label,
            confidence: r.confidence,
            evidence: r.evidence,
            attributes: r.attributes,
            created_at: crate::repository::parse_datetime(&r.created_at),
        }
    }
}

/// Diff record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::diffs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct DiffRecord {
    pub id: i32,
    pub current_filing_id: String,
    pub previous_filing_id: String,
    pub status: String,
    pub expected_sections: i32,
    pub processed_sections: i32,
    pub summary: Option<String>,
    pub last_error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Insertable, AsChangeset, Debug)]
#[diesel(table_name = schema::diffs)]
pub struct NewDiff<'a> {
    pub current_filing_id: &'a str,
    pub previous_filing_id: &'a str,
    pub status: &'a str,
    pub expected_sections: i32,
    pub processed_sections: i32,
    pub summary: Option<&'a str>,
    pub last_error: Option<&'a str>,
    pub created_at: &'a str,
    pub updated_at: &'a str,
}

impl From<DiffRecord> for crate::models::Diff {
    fn from(r: DiffRecord) -> Self {
        Self {
            id: r.id,
            current_filing_id: r.current_filing_id,
            previous_filing_id: r.previous_filing_id,
            status: crate::models::DiffStatus::from_str(&r.status)
                .unwrap_or(crate::models::DiffStatus::Pending),
            expected_sections: r.expected_sections,
            processed_sections: r.processed_sections,
            summary: r.summary,
            last_error: r.last_error,
            created_at: crate::repository::parse_datetime(&r.created_at),
            updated_at: crate::repository::parse_datetime(&r.updated_at),
        }
    }
}

/// SectionDiff record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::section_diffs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SectionDiffRecord {
    pub id: i32,
    pub diff_id: i32,
    pub current_section_id: Option<i32>,
    pub previous_section_id: Option<i32>,
    pub analysis_id: Option<i32>,
    pub ordinal: i32,
    pub title: String,
    pub change_type: String,
    pub summary: String,
    pub impact: String,
    pub confidence: Option<f32>,
    pub evidence: String,
    pub created_at: String,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = schema::section_diffs)]
pub struct NewSectionDiff<'a> {
    pub diff_id: i32,
    pub current_section_id: Option<i32>,
    pub previous_section_id: Option<i32>,
    pub analysis_id: Option<i32>,
    pub ordinal: i32,
    pub title: &'a str,
    pub change_type: &'a str,
    pub summary: &'a str,
    pub impact: &'a str,
    pub confidence: Option<f32>,
    pub evidence: &'a str,
    pub created_at: &'a str,
}

impl From<SectionDiffRecord> for crate::models::SectionDiff {
    fn from(r: SectionDiffRecord) -> Self {
        Self {
            id: r.id,
            diff_id: r.diff_id,
            current_section_id: r.current_section_id,
            previous_section_id: r.previous_section_id,
            analysis_id: r.analysis_id,
            ordinal: r.ordinal,
            title: r.title,
            change_type: crate::models::ChangeKind::from_str(&r.change_type)
                .unwrap_or(crate::models::ChangeKind::Update),
            summary: r.summary,
            impact: crate::models::Impact::from_str(&r.impact)
                .unwrap_or(crate::models::Impact::Medium),
            confidence: r.confidence,
            evidence: r.evidence,
            created_at: crate::repository::parse_datetime(&r.created_at),
        }
    }
}

/// Completion marker row: one per `(diff_id, ordinal)`, inserted exactly
/// once regardless of how many times that ordinal's job is redelivered.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::diff_processed_ordinals)]
pub struct NewDiffProcessedOrdinal {
    pub diff_id: i32,
    pub ordinal: i32,
}

/// Format a timestamp the way every `*_at` column in this schema expects it.
pub fn now_str() -> String {
    to_rfc3339(Utc::now())
}
