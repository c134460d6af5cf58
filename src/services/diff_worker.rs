//! Diff worker (spec §4.8): per-section comparison against the prior filing,
//! persisted transactionally under the Diff row's lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use metrics::{counter, histogram};
use serde::Deserialize;
use similar::TextDiff;
use tracing::{debug, error, info, warn};

use crate::context::AppContext;
use crate::error::PipelineError;
use crate::llm::ChatMessage;
use crate::models::{AnalysisType, ChangeKind, Impact};
use crate::queue::Message;
use crate::repository::analysis::UpsertAnalysis;
use crate::repository::diff::NormalizedChange;
use crate::services::tasks::DiffTask;

const SERVICE: &str = "diff";

#[derive(Default)]
pub struct DiffWorkerStats {
    pub completed: AtomicU64,
    pub dropped: AtomicU64,
    pub retried: AtomicU64,
}

pub fn spawn(ctx: AppContext, concurrency: usize) -> Vec<tokio::task::JoinHandle<()>> {
    let stats = std::sync::Arc::new(DiffWorkerStats::default());
    (0..concurrency)
        .map(|worker_id| {
            let ctx = ctx.clone();
            let stats = stats.clone();
            tokio::spawn(async move { worker_loop(ctx, worker_id, stats).await })
        })
        .collect()
}

async fn worker_loop(ctx: AppContext, worker_id: usize, stats: std::sync::Arc<DiffWorkerStats>) {
    info!(worker_id, "diff worker starting");
    while !ctx.is_stopping() {
        let message = match ctx.queues.diff.pop(Duration::from_secs(5)).await {
            Ok(Some(m)) => m,
            Ok(None) => continue,
            Err(e) => {
                error!(worker_id, error = %e, "diff queue pop failed");
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        let started = std::time::Instant::now();
        let outcome = process(&ctx, &message).await;
        histogram!("diff_worker_duration_seconds").record(started.elapsed().as_secs_f64());

        match outcome {
            Ok(()) => {
                stats.completed.fetch_add(1, Ordering::Relaxed);
                counter!("diff_worker_completed_total").increment(1);
                if let Err(e) = ctx.queues.diff.ack(&message).await {
                    error!(worker_id, error = %e, "failed to ack diff job");
                }
            }
            Err(e) if e.is_retryable() => {
                stats.retried.fetch_add(1, Ordering::Relaxed);
                counter!("diff_worker_errors_total", "category" => e.category().to_string()).increment(1);
                warn!(worker_id, job_id = %message.job_id, error = %e, "diff job retryable, leaving for redelivery");
            }
            Err(e) => {
                stats.dropped.fetch_add(1, Ordering::Relaxed);
                counter!("diff_worker_errors_total", "category" => e.category().to_string()).increment(1);
                error!(worker_id, job_id = %message.job_id, error = %e, "diff job fatal, diff marked FAILED");
                if let Err(e) = ctx.queues.diff.ack(&message).await {
                    error!(worker_id, error = %e, "failed to ack dropped diff job");
                }
            }
        }
    }
    info!(worker_id, "diff worker stopped");
}

pub(crate) async fn process(ctx: &AppContext, message: &Message) -> Result<(), PipelineError> {
    let task: DiffTask =
        serde_json::from_slice(&message.payload).map_err(|e| PipelineError::Parse(e.to_string()))?;

    let diff = ctx
        .repos
        .diffs
        .get(task.diff_id)
        .await?
        .ok_or_else(|| PipelineError::MissingEntity(format!("diff {}", task.diff_id)))?;

    let current_section = match task.current_section_id {
        Some(id) => ctx.repos.sections.find_by_id(id).await?,
        None => None,
    };
    let previous_section = match task.previous_section_id {
        Some(id) => ctx.repos.sections.find_by_id(id).await?,
        None => None,
    };

    if let (Some(current), Some(previous)) = (&current_section, &previous_section) {
        if current.content.trim() == previous.content.trim() {
            ctx.repos.analyses.delete_by_job_id(&task.job_id()).await?;
            ctx.repos
                .diffs
                .persist_section_changes(diff.id, Some(current.id), Some(previous.id), task.ordinal, &task.title, None, Vec::new())
                .await?;
            debug!(diff_id = diff.id, ordinal = task.ordinal, "section unchanged, no-op");
            return Ok(());
        }
    }

    let result = run_comparison(ctx, &task, current_section.as_ref(), previous_section.as_ref()).await;

    match result {
        Ok((changes, analysis_id)) => {
            if analysis_id.is_none() {
                ctx.repos.analyses.delete_by_job_id(&task.job_id()).await?;
            }
            ctx.repos
                .diffs
                .persist_section_changes(
                    diff.id,
                    task.current_section_id,
                    task.previous_section_id,
                    task.ordinal,
                    &task.title,
                    analysis_id,
                    changes,
                )
                .await?;
            Ok(())
        }
        Err(e) if e.is_retryable() => Err(e),
        Err(e) => {
            ctx.repos
                .diffs
                .mark_failed(diff.id, &e.to_string())
                .await
                .ok();
            Err(e)
        }
    }
}

/// Returns the normalised changes plus the Analysis id to attach, if an LLM
/// call was made (spec §4.8: no Analysis row when the change was
/// synthesised without one).
async fn run_comparison(
    ctx: &AppContext,
    task: &DiffTask,
    current: Option<&crate::models::Section>,
    previous: Option<&crate::models::Section>,
) -> Result<(Vec<NormalizedChange>, Option<i32>), PipelineError> {
    match (current, previous) {
        (Some(current), None) => Ok((
            vec![synthesize(ChangeKind::Addition, &current.content)],
            None,
        )),
        (None, Some(previous)) => Ok((
            vec![synthesize(ChangeKind::Removal, &previous.content)],
            None,
        )),
        (Some(current), Some(previous)) => {
            let unified = unified_diff(&previous.content, &current.content, ctx.config.diff.max_diff_chars);
            llm_compare(ctx, task, &unified).await
        }
        (None, None) => Ok((Vec::new(), None)),
    }
}

fn synthesize(kind: ChangeKind, content: &str) -> NormalizedChange {
    let evidence: String = content.chars().take(280).collect();
    let summary = match kind {
        ChangeKind::Addition => "New section added in the current filing.",
        ChangeKind::Removal => "Section removed from the current filing.",
        _ => "Section changed.",
    };
    NormalizedChange {
        change_type: kind,
        summary: summary.to_string(),
        impact: Impact::Medium,
        confidence: Some(1.0),
        evidence,
    }
}

fn unified_diff(previous: &str, current: &str, max_chars: usize) -> String {
    let diff = TextDiff::from_lines(previous, current)
        .unified_diff()
        .context_radius(3)
        .header("previous", "current")
        .to_string();
    if diff.chars().count() > max_chars {
        let truncated: String = diff.chars().take(max_chars).collect();
        format!("{truncated}\n... [truncated]")
    } else {
        diff
    }
}

async fn llm_compare(
    ctx: &AppContext,
    task: &DiffTask,
    unified: &str,
) -> Result<(Vec<NormalizedChange>, Option<i32>), PipelineError> {
    let model = ctx.llm.config().model.clone();
    let daily_limit = ctx.config.budget.daily_limit;
    let max_output = ctx.llm.config().max_output_tokens as i64;
    let estimate = (unified.len() as i64 / 4) + max_output;

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
            "You compare two versions of a regulatory filing section. Respond with a JSON \
             array only, each element: {change_type: addition|removal|update|rewording, \
             summary (<=160 chars), impact: high|medium|low, confidence (0..1), evidence}. \
             An empty array means no material change.",
        ),
        ChatMessage::user(format!("Section: {}\n\n{}", task.title, unified)),
    ];

    let completion = match call_with_retry(ctx, &messages).await {
        Ok(c) => c,
        Err(e) => {
            reservation.release(daily_limit).await.ok();
            return Err(e);
        }
    };

    let changes = match parse_changes(&completion.content) {
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

    let job_id = task.job_id();
    let analysis = ctx
        .repos
        .analyses
        .upsert_by_job_id(UpsertAnalysis {
            job_id: &job_id,
            filing_id: &task.current_filing_id,
            section_id: task.current_section_id,
            analysis_type: AnalysisType::SectionDiff,
            model: &model,
            content: &completion.content,
            prompt_tokens: completion.prompt_tokens,
            completion_tokens: completion.completion_tokens,
            total_tokens: completion.total_tokens,
            extra: None,
        })
        .await?;

    Ok((changes, Some(analysis.id)))
}

#[derive(Debug, Deserialize)]
struct RawChange {
    change_type: Option<String>,
    summary: Option<String>,
    impact: Option<String>,
    confidence: Option<f32>,
    evidence: Option<String>,
}

fn parse_changes(content: &str) -> Result<Vec<NormalizedChange>, PipelineError> {
    let raw: Vec<RawChange> =
        serde_json::from_str(content).map_err(|e| PipelineError::Parse(e.to_string()))?;

    Ok(raw
        .into_iter()
        .map(|r| {
            let change_type = r
                .change_type
                .as_deref()
                .and_then(ChangeKind::from_str)
                .unwrap_or(ChangeKind::Update);
            let impact = r
                .impact
                .as_deref()
                .and_then(Impact::from_str)
                .unwrap_or(Impact::Medium);
            let summary: String = r
                .summary
                .unwrap_or_default()
                .chars()
                .take(160)
                .collect();
            let confidence = r.confidence.map(|c| c.clamp(0.0, 1.0));

            NormalizedChange {
                change_type,
                summary,
                impact,
                confidence,
                evidence: r.evidence.unwrap_or_default(),
            }
        })
        .collect())
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
    fn test_synthesize_addition() {
        let change = synthesize(ChangeKind::Addition, "New content here.");
        assert_eq!(change.change_type, ChangeKind::Addition);
        assert_eq!(change.confidence, Some(1.0));
    }

    #[test]
    fn test_unified_diff_detects_change() {
        let diff = unified_diff("line one\nline two\n", "line one\nline three\n", 10_000);
        assert!(diff.contains("line two") || diff.contains("line three"));
    }

    #[test]
    fn test_unified_diff_truncates() {
        let previous = "a\n".repeat(10_000);
        let current = "b\n".repeat(10_000);
        let diff = unified_diff(&previous, &current, 100);
        assert!(diff.ends_with("[truncated]"));
    }

    #[test]
    fn test_parse_changes_clamps_and_defaults() {
        let content = r#"[{"change_type":"bogus","summary":"short","impact":"extreme","confidence":5.0,"evidence":"x"}]"#;
        let changes = parse_changes(content).unwrap();
        assert_eq!(changes[0].change_type, ChangeKind::Update);
        assert_eq!(changes[0].impact, Impact::Medium);
        assert_eq!(changes[0].confidence, Some(1.0));
    }

    #[test]
    fn test_parse_changes_truncates_summary() {
        let long_summary = "x".repeat(200);
        let content = format!(
            r#"[{{"change_type":"update","summary":"{long_summary}","impact":"high","confidence":0.5,"evidence":"y"}}]"#
        );
        let changes = parse_changes(&content).unwrap();
        assert_eq!(changes[0].summary.chars().count(), 160);
    }
}
