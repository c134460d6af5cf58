//! Blob and Section models: raw/derived artifacts and sectionised text.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Content artifact kind. At most one blob exists per (filing, kind).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlobKind {
    Raw,
    Index,
    Text,
    Sections,
}

impl BlobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Raw => "RAW",
            Self::Index => "INDEX",
            Self::Text => "TEXT",
            Self::Sections => "SECTIONS",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "RAW" => Some(Self::Raw),
            "INDEX" => Some(Self::Index),
            "TEXT" => Some(Self::Text),
            "SECTIONS" => Some(Self::Sections),
            _ => None,
        }
    }
}

/// A stored content artifact for a filing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Blob {
    pub id: i32,
    pub filing_id: String,
    pub kind: BlobKind,
    /// Opaque storage location URI (`s3://...` or `file://...`).
    pub location: String,
    pub content_type: String,
    pub checksum: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An ordered, titled text slice of a filing. Ordinals are a dense 1-based
/// sequence per filing and are replaced wholesale on re-parse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    pub id: i32,
    pub filing_id: String,
    pub ordinal: i32,
    pub title: String,
    pub content: String,
    pub content_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}
