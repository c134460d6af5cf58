//! Entity model: a structured attribute extracted from a section.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A structured attribute extracted from a section by the entity worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: i32,
    pub filing_id: String,
    pub section_id: Option<i32>,
    /// Must reference an Analysis whose type is `entity_extraction`, if set.
    pub analysis_id: Option<i32>,
    pub entity_type: String,
    pub label: String,
    /// Clamped to `[0, 1]` on ingestion, or absent.
    pub confidence: Option<f32>,
    pub evidence: Option<String>,
    /// Opaque structured blob (serialized JSON object).
    pub attributes: Option<String>,
    pub created_at: DateTime<Utc>,
}
