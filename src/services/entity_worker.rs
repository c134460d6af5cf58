//! Entity worker (spec §4.7): same intake/budget/retry discipline as the
//! summary worker, but expects a JSON array of structured entities back.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use metrics::{counter, histogram};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::context::AppContext;
use crate::error::PipelineError;
use crate::llm::ChatMessage;
use crate::models::AnalysisType;
use crate::queue::Message;
use crate::repository::analysis::UpsertAnalysis;
use crate::repository::entity::NormalizedEntity;
use crate::services::tasks::ChunkTask;

const SERVICE: &str = "entity";
const ALLOWED_TYPES: &[&str] = &[
    "person",
    "organization",
    "security",
    "monetary_amount",
    "date",
    "location",
    "other",
];

#[derive(Default)]
pub struct EntityWorkerStats {
    pub completed: AtomicU64,
    pub dropped: AtomicU64,
    pub retried: AtomicU64,
}

pub fn spawn(ctx: AppContext, concurrency: usize) -> Vec<tokio::task::JoinHandle<()>> {
    let stats = std::sync::Arc::new(EntityWorkerStats::default());
    (0..concurrency)
        .map(|worker_id| {
            let ctx = ctx.clone();
            let stats = stats.clone();
            tokio::spawn(async move { worker_loop(ctx, worker_id, stats).await })
        })
        .collect()
}

async fn worker_loop(ctx: AppContext, worker_id: usize, stats: std::sync::Arc<EntityWorkerStats>) {
    info!(worker_id, "entity worker starting");
    while !ctx.is_stopping() {
        let message = match ctx.queues.entity.pop(Duration::from_secs(5)).await {
            Ok(Some(m)) => m,
            Ok(None) => continue,
            Err(e) => {
                error!(worker_id, error = %e, "entity queue pop failed");
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        let started = std::time::Instant::now();
        let outcome = process(&ctx, &message).await;
        histogram!("entity_worker_duration_seconds").record(started.elapsed().as_secs_f64());

        match outcome {
            Ok(()) => {
                stats.completed.fetch_add(1, Ordering::Relaxed);
                counter!("entity_worker_completed_total").increment(1);
                if let Err(e) = ctx.queues.entity.ack(&message).await {
                    error!(worker_id, error = %e, "failed to ack entity job");
                }
            }
            Err(e) if e.is_retryable() => {
                stats.retried.fetch_add(1, Ordering::Relaxed);
                counter!("entity_worker_errors_total", "category" => e.category().to_string()).increment(1);
                warn!(worker_id, job_id = %message.job_id, error = %e, "entity job retryable, leaving for redelivery");
            }
            Err(e) => {
                stats.dropped.fetch_add(1, Ordering::Relaxed);
                counter!("entity_worker_errors_total", "category" => e.category().to_string()).increment(1);
                error!(worker_id, job_id = %message.job_id, error = %e, "entity job failed, dropping");
                if let Err(e) = ctx.queues.entity.ack(&message).await {
                    error!(worker_id, error = %e, "failed to ack dropped entity job");
                }
            }
        }
    }
    info!(worker_id, "entity worker stopped");
}

#[derive(Debug, Deserialize)]
struct RawEntity {
    #[serde(rename = "type")]
    entity_type: Option<String>,
    #[serde(alias = "entity")]
    label: Option<String>,
    confidence: Option<f32>,
    evidence: Option<String>,
    metadata: Option<Value>,
}

pub(crate) async fn process(ctx: &AppContext, message: &Message) -> Result<(), PipelineError> {
    let chunk: ChunkTask =
        serde_json::from_slice(&message.payload).map_err(|e| PipelineError::Parse(e.to_string()))?;

    let filing = ctx.repos.filings.get(&chunk.accession).await?;
    let section = ctx
        .repos
        .sections
        .find(&chunk.accession, chunk.section_ordinal)
        .await?;

    let (Some(_filing), Some(section)) = (filing, section) else {
        return Err(PipelineError::MissingEntity(format!(
            "filing/section for {}:{}",
            chunk.accession, chunk.section_ordinal
        )));
    };

    let model = ctx.llm.config().model.clone();
    let daily_limit = ctx.config.budget.daily_limit;
    let max_output = ctx.llm.config().max_output_tokens as i64;
    let job_id = chunk.entity_job_id();
    let estimate = (chunk.estimated_tokens as i64).max(chunk.content.len() as i64 / 4) + max_output;

    let reservation = match ctx.budget.reserve(SERVICE, &model, estimate, daily_limit).await {
        Ok(r) => r,
        Err(_) => {
            tokio::time::sleep(Duration::from_millis(ctx.config.workers.budget_cooldown_ms)).await;
            return Err(PipelineError::Budget {
                service: SERVICE.to_string(),
                model,
            });
        }
    };

    let messages = [
        ChatMessage::system(format!(
            "Extract structured entities from the filing excerpt below. Respond with a JSON \
             array only (no prose), each element an object with keys: type (one of {}), \
             label, confidence (0..1 or null), evidence (verbatim excerpt or null), metadata \
             (object or null).",
            ALLOWED_TYPES.join(", ")
        )),
        ChatMessage::user(format!(
            "Filing: {}\nSection: {} (ordinal {})\n\n{}",
            chunk.accession, chunk.title, chunk.section_ordinal, chunk.content
        )),
    ];

    let completion = match call_with_retry(ctx, &messages).await {
        Ok(c) => c,
        Err(e) => {
            reservation.release(daily_limit).await.ok();
            return Err(e);
        }
    };

    let normalized = match parse_entities(&completion.content) {
        Ok(n) => n,
        Err(e) => {
            reservation.release(daily_limit).await.ok();
            return Err(e);
        }
    };

    reservation
        .commit(completion.total_tokens as i64, daily_limit)
        .await
        .map_err(|e| PipelineError::TransientIo(e.to_string()))?;

    let analysis = ctx
        .repos
        .analyses
        .upsert_by_job_id(UpsertAnalysis {
            job_id: &job_id,
            filing_id: &chunk.accession,
            section_id: Some(section.id),
            analysis_type: AnalysisType::EntityExtraction,
            model: &model,
            content: &completion.content,
            prompt_tokens: completion.prompt_tokens,
            completion_tokens: completion.completion_tokens,
            total_tokens: completion.total_tokens,
            extra: None,
        })
        .await?;

    ctx.repos
        .entities
        .replace_for_analysis(&chunk.accession, Some(section.id), analysis.id, normalized)
        .await?;

    debug!(job_id = %job_id, "entity analysis stored");
    Ok(())
}

/// Tolerates a bare array or `{ "entities": [...] }` wrapping; rejects
/// anything else as a parse error. Drops elements with no label.
fn parse_entities(content: &str) -> Result<Vec<NormalizedEntity>, PipelineError> {
    let value: Value =
        serde_json::from_str(content).map_err(|e| PipelineError::Parse(e.to_string()))?;

    let array = match value {
        Value::Array(a) => a,
        Value::Object(mut obj) => match obj.remove("entities") {
            Some(Value::Array(a)) => a,
            _ => return Err(PipelineError::Parse("expected a JSON array of entities".to_string())),
        },
        _ => return Err(PipelineError::Parse("expected a JSON array of entities".to_string())),
    };

    let mut normalized = Vec::new();
    for element in array {
        let raw: RawEntity = match serde_json::from_value(element) {
            Ok(r) => r,
            Err(_) => continue,
        };

        let label = raw.label.map(|s| s.trim().to_string());
        let Some(label) = label.filter(|s| !s.is_empty()) else {
            continue;
        };

        let entity_type = raw
            .entity_type
            .map(|t| t.trim().to_lowercase().replace(' ', "_"))
            .filter(|t| ALLOWED_TYPES.contains(&t.as_str()))
            .unwrap_or_else(|| "other".to_string());

        let confidence = raw.confidence.map(|c| c.clamp(0.0, 1.0));
        let attributes = raw.metadata.map(|m| m.to_string());

        normalized.push(NormalizedEntity {
            entity_type,
            label,
            confidence,
            evidence: raw.evidence,
            attributes,
        });
    }

    Ok(normalized)
}

async fn call_with_retry(
    ctx: &AppContext,
    messages: &[ChatMessage],
) -> Result<crate::llm::LlmCompletion, PipelineError> {
    let max_retries = ctx.config.workers.max_retries;
    let backoff = Duration::from_millis(ctx.config.workers.backoff_ms);
    let mut attempt = 0u32;

    loop {
        match ctx.llm.complete(messages).await {
            Ok(completion) => return Ok(completion),
            Err(e) => {
                if !e.is_retryable() {
                    return Err(PipelineError::Parse(e.to_string()));
                }
                if attempt >= max_retries {
                    return Err(PipelineError::TransientIo(e.to_string()));
                }
                tokio::time::sleep(backoff * (attempt + 1)).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_entities_bare_array() {
        let content = r#"[{"type":"organization","label":"Acme Corp","confidence":0.9}]"#;
        let entities = parse_entities(content).unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].entity_type, "organization");
        assert_eq!(entities[0].label, "Acme Corp");
    }

    #[test]
    fn test_parse_entities_wrapped_object() {
        let content = r#"{"entities":[{"type":"person","label":"Jane Doe"}]}"#;
        let entities = parse_entities(content).unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].label, "Jane Doe");
    }

    #[test]
    fn test_parse_entities_rejects_non_array() {
        let content = r#"{"foo":"bar"}"#;
        assert!(parse_entities(content).is_err());
    }

    #[test]
    fn test_parse_entities_drops_missing_label() {
        let content = r#"[{"type":"other"},{"type":"other","label":"Kept"}]"#;
        let entities = parse_entities(content).unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].label, "Kept");
    }

    #[test]
    fn test_parse_entities_unknown_type_falls_back_to_other() {
        let content = r#"[{"type":"spaceship","label":"Enterprise"}]"#;
        let entities = parse_entities(content).unwrap();
        assert_eq!(entities[0].entity_type, "other");
    }

    #[test]
    fn test_parse_entities_clamps_confidence() {
        let content = r#"[{"type":"other","label":"X","confidence":1.5}]"#;
        let entities = parse_entities(content).unwrap();
        assert_eq!(entities[0].confidence, Some(1.0));
    }
}
