//! Pipeline-wide error kinds (spec §7).
//!
//! Every worker loop classifies its failures into one of these variants and
//! consults [`PipelineError::is_retryable`] to decide whether to ack the
//! message (drop) or return without acking (let the visibility timeout
//! re-offer it later).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// HTTP 408/429/5xx or a network-level failure. Retry with backoff.
    #[error("transient I/O error: {0}")]
    TransientIo(String),

    /// Any other HTTP 4xx. Not worth retrying.
    #[error("fatal I/O error: {0}")]
    FatalIo(String),

    /// Malformed LLM response (non-JSON, wrong shape).
    #[error("parse error: {0}")]
    Parse(String),

    /// Daily token budget exhausted for a (service, model) scope.
    #[error("budget exceeded for {service}/{model}")]
    Budget { service: String, model: String },

    /// Filing or section referenced by a job no longer exists.
    #[error("missing entity: {0}")]
    MissingEntity(String),

    /// Constraint violation, lock timeout, or any other database failure.
    #[error("database error: {0}")]
    Db(#[from] diesel::result::Error),
}

impl From<crate::queue::QueueError> for PipelineError {
    fn from(e: crate::queue::QueueError) -> Self {
        PipelineError::TransientIo(e.to_string())
    }
}

impl PipelineError {
    /// True if the condition may clear on its own and the job should be
    /// retried (returned to the queue by letting the VT expire) rather than
    /// acked and dropped.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::TransientIo(_) | PipelineError::Budget { .. })
    }

    pub fn category(&self) -> &'static str {
        match self {
            PipelineError::TransientIo(_) => "transient_io",
            PipelineError::FatalIo(_) => "fatal_io",
            PipelineError::Parse(_) => "parse",
            PipelineError::Budget { .. } => "budget",
            PipelineError::MissingEntity(_) => "missing_entity",
            PipelineError::Db(_) => "db",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(PipelineError::TransientIo("timeout".into()).is_retryable());
        assert!(PipelineError::Budget {
            service: "summary".into(),
            model: "gpt".into(),
        }
        .is_retryable());
        assert!(!PipelineError::FatalIo("404".into()).is_retryable());
        assert!(!PipelineError::Parse("bad json".into()).is_retryable());
        assert!(!PipelineError::MissingEntity("filing".into()).is_retryable());
    }

    #[test]
    fn test_category_names() {
        assert_eq!(PipelineError::FatalIo("x".into()).category(), "fatal_io");
        assert_eq!(
            PipelineError::Budget {
                service: "s".into(),
                model: "m".into()
            }
            .category(),
            "budget"
        );
    }
}
