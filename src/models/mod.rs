//! Domain models for the filing ingestion pipeline.

mod analysis;
mod diff;
mod entity;
mod filing;
mod issuer;
mod section;

pub use analysis::{Analysis, AnalysisType};
pub use diff::{ChangeKind, Diff, DiffStatus, Impact, SectionDiff};
pub use entity::Entity;
pub use filing::{Filing, FilingStatus};
pub use issuer::Issuer;
pub use section::{Blob, BlobKind, Section};
