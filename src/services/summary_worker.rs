//! Summary worker (spec §4.6): turns one chunk into a bullet-point summary
//! Analysis row, gated by the shared daily token budget.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use metrics::{counter, histogram};
use tracing::{debug, error, info, warn};

use crate::context::AppContext;
use crate::error::PipelineError;
use crate::llm::ChatMessage;
use crate::models::AnalysisType;
use crate::queue::Message;
use crate::repository::analysis::UpsertAnalysis;
use crate::services::tasks::ChunkTask;

const SERVICE: &str = "summary";
const PLACEHOLDER: &str = "No material updates detected.";

#[derive(Default)]
pub struct SummaryWorkerStats {
    pub completed: AtomicU64,
    pub dropped: AtomicU64,
    pub retried: AtomicU64,
}

pub fn spawn(ctx: AppContext, concurrency: usize) -> Vec<tokio::task::JoinHandle<()>> {
    let stats = std::sync::Arc::new(SummaryWorkerStats::default());
    (0..concurrency)
        .map(|worker_id| {
            let ctx = ctx.clone();
            let stats = stats.clone();
            tokio::spawn(async move { worker_loop(ctx, worker_id, stats).await })
        })
        .collect()
}

async fn worker_loop(ctx: AppContext, worker_id: usize, stats: std::sync::Arc<SummaryWorkerStats>) {
    info!(worker_id, "summary worker starting");
    while !ctx.is_stopping() {
        let message = match ctx.queues.chunk.pop(Duration::from_secs(5)).await {
            Ok(Some(m)) => m,
            Ok(None) => continue,
            Err(e) => {
                error!(worker_id, error = %e, "summary queue pop failed");
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        let started = std::time::Instant::now();
        let outcome = process(&ctx, &message).await;
        histogram!("summary_worker_duration_seconds").record(started.elapsed().as_secs_f64());

        match outcome {
            Ok(()) => {
                stats.completed.fetch_add(1, Ordering::Relaxed);
                counter!("summary_worker_completed_total").increment(1);
                if let Err(e) = ctx.queues.chunk.ack(&message).await {
                    error!(worker_id, error = %e, "failed to ack summary job");
                }
            }
            Err(e) if e.is_retryable() => {
                stats.retried.fetch_add(1, Ordering::Relaxed);
                counter!("summary_worker_errors_total", "category" => e.category().to_string()).increment(1);
                warn!(worker_id, job_id = %message.job_id, error = %e, "summary job retryable, leaving for redelivery");
            }
            Err(e) => {
                stats.dropped.fetch_add(1, Ordering::Relaxed);
                counter!("summary_worker_errors_total", "category" => e.category().to_string()).increment(1);
                error!(worker_id, job_id = %message.job_id, error = %e, "summary job failed, dropping");
                if let Err(e) = ctx.queues.chunk.ack(&message).await {
                    error!(worker_id, error = %e, "failed to ack dropped summary job");
                }
            }
        }
    }
    info!(worker_id, "summary worker stopped");
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
        ChatMessage::system(
            "Summarise the following regulatory filing excerpt as concise bullet points, \
             focusing on concrete facts and changes. Respond with plain bullet text only.",
        ),
        ChatMessage::user(format!(
            "Filing: {}\nSection: {} (ordinal {})\nChunk: {}\n\n{}",
            chunk.accession, chunk.title, chunk.section_ordinal, chunk.chunk_index, chunk.content
        )),
    ];

    let completion = match call_with_retry(ctx, &messages).await {
        Ok(c) => c,
        Err(e) => {
            reservation.release(daily_limit).await.ok();
            return Err(e);
        }
    };

    reservation
        .commit(completion.total_tokens as i64, daily_limit)
        .await
        .map_err(|e| PipelineError::TransientIo(e.to_string()))?;

    let content = if completion.content.trim().is_empty() {
        PLACEHOLDER.to_string()
    } else {
        completion.content
    };

    ctx.repos
        .analyses
        .upsert_by_job_id(UpsertAnalysis {
            job_id: &chunk.summary_job_id(),
            filing_id: &chunk.accession,
            section_id: Some(section.id),
            analysis_type: AnalysisType::SectionChunkSummary,
            model: &model,
            content: &content,
            prompt_tokens: completion.prompt_tokens,
            completion_tokens: completion.completion_tokens,
            total_tokens: completion.total_tokens,
            extra: None,
        })
        .await?;

    debug!(job_id = %chunk.summary_job_id(), "summary analysis stored");
    Ok(())
}

/// Bounded retry on transient LLM failures (spec §4.6); the final
/// exhaustion is classified retryable/fatal by [`crate::llm::LlmError::is_retryable`].
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
                if attempt >= max_retries {
                    return if e.is_retryable() {
                        Err(PipelineError::TransientIo(e.to_string()))
                    } else {
                        Err(PipelineError::Parse(e.to_string()))
                    };
                }
                if !e.is_retryable() {
                    return Err(PipelineError::Parse(e.to_string()));
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
    fn test_placeholder_used_for_empty_content() {
        let content = "";
        let resolved = if content.trim().is_empty() {
            PLACEHOLDER
        } else {
            content
        };
        assert_eq!(resolved, PLACEHOLDER);
    }

    #[test]
    fn test_estimate_uses_max_of_token_hints() {
        let estimated_tokens: i64 = 50;
        let content_len: i64 = 8000;
        let max_output: i64 = 512;
        let estimate = estimated_tokens.max(content_len / 4) + max_output;
        assert_eq!(estimate, 2512);
    }
}
