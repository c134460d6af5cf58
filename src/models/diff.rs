//! Diff and SectionDiff models: the comparison lifecycle between two filings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a Diff. Mutated only by the parser (initialisation)
/// and the diff worker (progression), always under row-level lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Skipped,
}

impl DiffStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Skipped => "SKIPPED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "PROCESSING" => Some(Self::Processing),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            "SKIPPED" => Some(Self::Skipped),
            _ => None,
        }
    }
}

/// Comparison artifact uniquely keyed by the current filing id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diff {
    pub id: i32,
    pub current_filing_id: String,
    pub previous_filing_id: String,
    pub status: DiffStatus,
    pub expected_sections: i32,
    pub processed_sections: i32,
    pub summary: Option<String>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Diff {
    /// Invariant (b) of the data model: COMPLETED iff counts are equal and no failure occurred.
    pub fn is_complete(&self) -> bool {
        self.status != DiffStatus::Failed && self.processed_sections >= self.expected_sections
    }
}

/// Kind of change detected for one section ordinal between two filings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Addition,
    Removal,
    Update,
    Rewording,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Addition => "addition",
            Self::Removal => "removal",
            Self::Update => "update",
            Self::Rewording => "rewording",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "addition" => Some(Self::Addition),
            "removal" => Some(Self::Removal),
            "update" => Some(Self::Update),
            "rewording" => Some(Self::Rewording),
            _ => None,
        }
    }
}

/// Materiality of a detected change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Impact {
    High,
    Medium,
    Low,
}

impl Impact {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "high" => Some(Self::High),
            "medium" => Some(Self::Medium),
            "low" => Some(Self::Low),
            _ => None,
        }
    }
}

/// One detected change within a Diff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionDiff {
    pub id: i32,
    pub diff_id: i32,
    pub current_section_id: Option<i32>,
    pub previous_section_id: Option<i32>,
    pub analysis_id: Option<i32>,
    pub ordinal: i32,
    pub title: String,
    pub change_type: ChangeKind,
    /// Human summary, trimmed to at most 160 characters.
    pub summary: String,
    pub impact: Impact,
    pub confidence: Option<f32>,
    pub evidence: String,
    pub created_at: DateTime<Utc>,
}
