//! Queue payload shapes passed between pipeline stages (spec §4.4-§4.8).
//! Serialized with `serde_json` — field order doesn't matter for the
//! dedupe/VT protocol, only that encoding is deterministic per payload.

use serde::{Deserialize, Serialize};

use crate::models::ChangeKind;

/// Download queue payload. The richest of the source's conflicting shapes
/// (spec §9 open question (a)): carries everything the downloader needs
/// without a second feed lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadTask {
    pub accession: String,
    pub issuer_cik: String,
    pub form_type: String,
    pub filing_href: String,
    pub filed_at: chrono::DateTime<chrono::Utc>,
    pub ticker: Option<String>,
    pub summary: Option<String>,
}

/// Parse queue payload: just the accession, everything else is re-loaded
/// from the database by the parser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseTask {
    pub accession: String,
}

/// Summary/entity queue payload (spec §4.5 chunk planning).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkTask {
    pub accession: String,
    pub section_ordinal: i32,
    pub title: String,
    pub chunk_index: i32,
    pub start_paragraph: usize,
    pub end_paragraph: usize,
    pub content: String,
    pub estimated_tokens: u32,
}

impl ChunkTask {
    pub fn summary_job_id(&self) -> String {
        format!("{}:{}:{}", self.accession, self.section_ordinal, self.chunk_index)
    }

    pub fn entity_job_id(&self) -> String {
        format!("{}:entity", self.summary_job_id())
    }
}

/// Diff queue payload (spec §4.5 diff scheduling / §4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffTask {
    pub diff_id: i32,
    pub current_filing_id: String,
    pub previous_filing_id: String,
    pub current_section_id: Option<i32>,
    pub previous_section_id: Option<i32>,
    pub ordinal: i32,
    pub title: String,
    pub change_kind: ChangeKind,
}

impl DiffTask {
    pub fn job_id(&self) -> String {
        format!(
            "{}:diff:{}:{}",
            self.current_filing_id,
            self.ordinal,
            self.change_kind.as_str()
        )
    }
}
