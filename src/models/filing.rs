//! Filing model: one versioned submission of a form by an issuer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Monotone lifecycle status of a filing. `Failed` is a terminal sink that
/// may only be cleared by explicit operator retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilingStatus {
    Pending,
    Downloaded,
    Parsed,
    Analyzed,
    Failed,
}

impl FilingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Downloaded => "DOWNLOADED",
            Self::Parsed => "PARSED",
            Self::Analyzed => "ANALYZED",
            Self::Failed => "FAILED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "DOWNLOADED" => Some(Self::Downloaded),
            "PARSED" => Some(Self::Parsed),
            "ANALYZED" => Some(Self::Analyzed),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// One submission of a form by an issuer, unique by accession number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Filing {
    pub accession: String,
    pub issuer_cik: String,
    pub form_type: String,
    pub filed_at: DateTime<Utc>,
    /// Ordered sequence of source URLs the filing was discovered from.
    pub source_urls: Vec<String>,
    pub status: FilingStatus,
    pub downloaded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
