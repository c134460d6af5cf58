//! Issuer model: the entity that files submissions with the archive.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A regulated entity, unique by its archive-assigned identifier (CIK).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issuer {
    pub cik: String,
    pub name: String,
    pub ticker: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
