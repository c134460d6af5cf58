//! Analysis model: the result of one LLM job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What kind of job produced an Analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisType {
    SectionChunkSummary,
    EntityExtraction,
    SectionDiff,
}

impl AnalysisType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SectionChunkSummary => "section_chunk_summary",
            Self::EntityExtraction => "entity_extraction",
            Self::SectionDiff => "section_diff",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "section_chunk_summary" => Some(Self::SectionChunkSummary),
            "entity_extraction" => Some(Self::EntityExtraction),
            "section_diff" => Some(Self::SectionDiff),
            _ => None,
        }
    }
}

/// Result of one LLM job, identified by an externally assigned job id that
/// is globally unique and doubles as the queue-level dedupe key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    pub id: i32,
    pub job_id: String,
    pub filing_id: String,
    pub section_id: Option<i32>,
    pub analysis_type: AnalysisType,
    pub model: String,
    /// Opaque textual payload, typically JSON or markdown bullets.
    pub content: String,
    pub prompt_tokens: i32,
    pub completion_tokens: i32,
    pub total_tokens: i32,
    /// Free-form extra field, preserved but not interpreted.
    pub extra: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
