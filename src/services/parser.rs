//! Parser worker (spec §4.5): loads a filing's raw artifact, sectionises it,
//! persists the section set, and fans out chunk/entity/diff jobs. Spawns a
//! worker pool the same way [`crate::services::downloader`] does.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use metrics::{counter, histogram};
use regex::Regex;
use tracing::{debug, error, info, warn};

use crate::context::AppContext;
use crate::error::PipelineError;
use crate::models::{BlobKind, ChangeKind};
use crate::queue::Message;
use crate::services::tasks::{ChunkTask, DiffTask, ParseTask};
use crate::utils::{guess_content_type, html_to_text};

#[derive(Default)]
pub struct ParserStats {
    pub parsed: AtomicU64,
    pub failed: AtomicU64,
}

pub fn spawn(ctx: AppContext, concurrency: usize) -> Vec<tokio::task::JoinHandle<()>> {
    let stats = std::sync::Arc::new(ParserStats::default());
    (0..concurrency)
        .map(|worker_id| {
            let ctx = ctx.clone();
            let stats = stats.clone();
            tokio::spawn(async move { worker_loop(ctx, worker_id, stats).await })
        })
        .collect()
}

async fn worker_loop(ctx: AppContext, worker_id: usize, stats: std::sync::Arc<ParserStats>) {
    info!(worker_id, "parser worker starting");
    while !ctx.is_stopping() {
        let message = match ctx.queues.parse.pop(Duration::from_secs(5)).await {
            Ok(Some(m)) => m,
            Ok(None) => continue,
            Err(e) => {
                error!(worker_id, error = %e, "parse queue pop failed");
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        let started = std::time::Instant::now();
        let outcome = process(&ctx, &message).await;
        histogram!("parser_duration_seconds").record(started.elapsed().as_secs_f64());

        match outcome {
            Ok(()) => {
                stats.parsed.fetch_add(1, Ordering::Relaxed);
                counter!("parser_filings_total").increment(1);
                if let Err(e) = ctx.queues.parse.ack(&message).await {
                    error!(worker_id, error = %e, "failed to ack parse task");
                }
            }
            Err(e) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                counter!("parser_errors_total", "category" => e.category().to_string()).increment(1);
                error!(worker_id, job_id = %message.job_id, error = %e, "parse task failed");
                if let Err(mark_err) = ctx.repos.filings.set_status_failed(&message.job_id).await {
                    error!(worker_id, error = %mark_err, "failed to mark filing FAILED");
                }
                if let Err(e) = ctx.queues.parse.ack(&message).await {
                    error!(worker_id, error = %e, "failed to ack failed parse task");
                }
            }
        }
    }
    info!(worker_id, "parser worker stopped");
}

pub(crate) async fn process(ctx: &AppContext, message: &Message) -> Result<(), PipelineError> {
    let task: ParseTask =
        serde_json::from_slice(&message.payload).map_err(|e| PipelineError::Parse(e.to_string()))?;

    let filing = ctx
        .repos
        .filings
        .get(&task.accession)
        .await?
        .ok_or_else(|| PipelineError::MissingEntity(format!("filing {}", task.accession)))?;

    let blob = match ctx.repos.blobs.find(&task.accession, BlobKind::Raw).await? {
        Some(b) => b,
        None => ctx
            .repos
            .blobs
            .find(&task.accession, BlobKind::Index)
            .await?
            .ok_or_else(|| PipelineError::MissingEntity(format!("blob for {}", task.accession)))?,
    };

    let bytes = ctx
        .object_store
        .fetch(&blob.location)
        .await
        .map_err(|e| PipelineError::TransientIo(e.to_string()))?;

    let text = to_plain_text(&bytes, &blob.content_type);
    let sections = sectionise(&text);

    let section_rows: Vec<(String, String, Option<String>)> = sections
        .iter()
        .map(|s| {
            let hash = crate::storage::content_hash(s.content.as_bytes());
            (s.title.clone(), s.content.clone(), Some(hash))
        })
        .collect();

    // Section replacement and the PARSED status write land in one
    // transaction rather than one per statement.
    let persisted = ctx.repos.commit_parse(&task.accession, section_rows).await?;

    debug!(accession = %task.accession, sections = persisted.len(), "filing parsed");

    for section in &persisted {
        for chunk in plan_chunks(&ctx.config.chunking, section.ordinal, &section.title, &section.content) {
            if let Err(e) = enqueue_chunk(ctx, &task.accession, &chunk).await {
                warn!(accession = %task.accession, ordinal = section.ordinal, error = %e, "failed to enqueue chunk job");
            }
        }
    }

    if let Err(e) = schedule_diff(ctx, &filing, &persisted).await {
        counter!("parser_diff_schedule_errors_total", "category" => e.category().to_string()).increment(1);
        warn!(accession = %task.accession, error = %e, "diff scheduling failed, sectioning stands");
    }

    Ok(())
}

fn to_plain_text(bytes: &[u8], content_type: &str) -> String {
    let lossy = String::from_utf8_lossy(bytes);
    if content_type.contains("html") {
        html_to_text(&lossy)
    } else if content_type.contains("pdf") {
        pdf_extract::extract_text_from_mem(bytes).unwrap_or_else(|_| lossy.into_owned())
    } else {
        lossy.into_owned()
    }
}

struct RawSection {
    title: String,
    content: String,
}

/// `^Item \d+…` or an uppercase heading of 6+ characters, scanned line by
/// line. Falls back to one "Full Filing" section when no heading matches.
fn sectionise(text: &str) -> Vec<RawSection> {
    let item_heading = Regex::new(r"^Item\s+\d+[A-Za-z]?\.?\s").unwrap();
    let lines: Vec<&str> = text.lines().collect();

    let mut headings: Vec<(String, usize)> = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if item_heading.is_match(trimmed) || is_uppercase_heading(trimmed) {
            headings.push((trimmed.to_string(), i));
        }
    }

    if headings.is_empty() {
        return vec![RawSection {
            title: "Full Filing".to_string(),
            content: text.trim().to_string(),
        }];
    }

    headings.push(("__sentinel__".to_string(), lines.len()));

    let mut sections = Vec::new();
    for pair in headings.windows(2) {
        let (title, start) = &pair[0];
        let (_, end) = &pair[1];
        let body = lines[(start + 1).min(*end)..*end].join("\n");
        let body = body.trim();
        if body.is_empty() {
            continue;
        }
        sections.push(RawSection {
            title: title.clone(),
            content: body.to_string(),
        });
    }

    if sections.is_empty() {
        return vec![RawSection {
            title: "Full Filing".to_string(),
            content: text.trim().to_string(),
        }];
    }

    sections
}

fn is_uppercase_heading(line: &str) -> bool {
    let letters: Vec<char> = line.chars().filter(|c| c.is_alphabetic()).collect();
    letters.len() >= 6 && letters.iter().all(|c| c.is_uppercase())
}

fn estimate_tokens(text: &str) -> u32 {
    let words = text.split_whitespace().count() as f32;
    (words * 1.3).ceil() as u32
}

/// Paragraph-delimited, token-bounded chunk planning (spec §4.5).
fn plan_chunks(
    cfg: &crate::config::ChunkingConfig,
    ordinal: i32,
    title: &str,
    content: &str,
) -> Vec<ChunkTaskPlan> {
    let paragraphs: Vec<&str> = content
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();

    if paragraphs.is_empty() {
        return Vec::new();
    }

    let mut plans = Vec::new();
    let mut start = 0usize;
    let mut chunk_index = 0i32;

    while start < paragraphs.len() {
        let mut end = start;
        let mut tokens = 0u32;

        while end < paragraphs.len() {
            let next_tokens = tokens + estimate_tokens(paragraphs[end]);
            if end > start && next_tokens > cfg.max_tokens_per_chunk {
                break;
            }
            tokens = next_tokens;
            end += 1;
        }

        // under-min chunk with more paragraphs available: extend forward
        while tokens < cfg.min_tokens_per_chunk && end < paragraphs.len() {
            tokens += estimate_tokens(paragraphs[end]);
            end += 1;
        }

        let body = paragraphs[start..end].join("\n\n");
        plans.push(ChunkTaskPlan {
            section_ordinal: ordinal,
            title: title.to_string(),
            chunk_index,
            start_paragraph: start,
            end_paragraph: end,
            content: body,
            estimated_tokens: tokens,
        });

        chunk_index += 1;
        if end >= paragraphs.len() {
            break;
        }
        start = end.saturating_sub(cfg.paragraph_overlap).max(start + 1);
    }

    plans
}

struct ChunkTaskPlan {
    section_ordinal: i32,
    title: String,
    chunk_index: i32,
    start_paragraph: usize,
    end_paragraph: usize,
    content: String,
    estimated_tokens: u32,
}

async fn enqueue_chunk(
    ctx: &AppContext,
    accession: &str,
    plan: &ChunkTaskPlan,
) -> Result<(), PipelineError> {
    let task = ChunkTask {
        accession: accession.to_string(),
        section_ordinal: plan.section_ordinal,
        title: plan.title.clone(),
        chunk_index: plan.chunk_index,
        start_paragraph: plan.start_paragraph,
        end_paragraph: plan.end_paragraph,
        content: plan.content.clone(),
        estimated_tokens: plan.estimated_tokens,
    };
    push_chunk(ctx, task).await
}

async fn push_chunk(ctx: &AppContext, task: ChunkTask) -> Result<(), PipelineError> {
    let summary_job_id = task.summary_job_id();
    let entity_job_id = task.entity_job_id();
    let payload = serde_json::to_vec(&task).map_err(|e| PipelineError::Parse(e.to_string()))?;

    ctx.gates.chunk.wait_if_needed().await?;
    ctx.queues.chunk.push(&summary_job_id, &payload).await?;

    ctx.gates.entity.wait_if_needed().await?;
    ctx.queues.entity.push(&entity_job_id, &payload).await?;

    Ok(())
}

async fn schedule_diff(
    ctx: &AppContext,
    filing: &crate::models::Filing,
    current_sections: &[crate::models::Section],
) -> Result<(), PipelineError> {
    let prior = ctx
        .repos
        .filings
        .find_prior(&filing.issuer_cik, &filing.form_type, filing.filed_at)
        .await?;

    let Some(previous_filing) = prior else {
        return Ok(());
    };

    let previous_sections = ctx.repos.sections.list_for_filing(&previous_filing.accession).await?;

    let current_by_ordinal: std::collections::HashMap<i32, &crate::models::Section> =
        current_sections.iter().map(|s| (s.ordinal, s)).collect();
    let previous_by_ordinal: std::collections::HashMap<i32, &crate::models::Section> =
        previous_sections.iter().map(|s| (s.ordinal, s)).collect();

    let ordinals: BTreeSet<i32> = current_by_ordinal
        .keys()
        .chain(previous_by_ordinal.keys())
        .copied()
        .collect();

    let diff = ctx
        .repos
        .diffs
        .schedule(&filing.accession, &previous_filing.accession, ordinals.len() as i32)
        .await?;

    if ordinals.is_empty() {
        return Ok(());
    }

    for ordinal in ordinals {
        let current = current_by_ordinal.get(&ordinal).copied();
        let previous = previous_by_ordinal.get(&ordinal).copied();

        let change_kind = match (current.is_some(), previous.is_some()) {
            (true, false) => ChangeKind::Addition,
            (false, true) => ChangeKind::Removal,
            (true, true) => ChangeKind::Update,
            (false, false) => continue,
        };

        let title = current
            .or(previous)
            .map(|s| s.title.clone())
            .unwrap_or_default();

        let task = DiffTask {
            diff_id: diff.id,
            current_filing_id: filing.accession.clone(),
            previous_filing_id: previous_filing.accession.clone(),
            current_section_id: current.map(|s| s.id),
            previous_section_id: previous.map(|s| s.id),
            ordinal,
            title,
            change_kind,
        };

        ctx.gates.diff.wait_if_needed().await?;
        let job_id = task.job_id();
        let payload = serde_json::to_vec(&task).map_err(|e| PipelineError::Parse(e.to_string()))?;
        let pushed = ctx.queues.diff.push(&job_id, &payload).await?;
        if !pushed {
            warn!(job_id, "diff task already queued");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sectionise_item_headings() {
        let text = "Item 1. Business\nSome business text.\n\nItem 1A. Risk Factors\nSome risk text.\n\nItem 2. Properties\nSome properties text.\n";
        let sections = sectionise(text);
        assert_eq!(sections.len(), 3);
        assert_eq!(sections[0].title, "Item 1. Business");
        assert!(sections[0].content.contains("business text"));
        assert_eq!(sections[2].title, "Item 2. Properties");
    }

    #[test]
    fn test_sectionise_falls_back_to_full_filing() {
        let text = "just some plain text\nwith no headings at all\n";
        let sections = sectionise(text);
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].title, "Full Filing");
    }

    #[test]
    fn test_sectionise_uppercase_heading() {
        let text = "RISK FACTORS\nContent about risk.\n\nOTHER MATTERS\nMore content.\n";
        let sections = sectionise(text);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].title, "RISK FACTORS");
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens("one two three four"), 6);
    }

    #[test]
    fn test_plan_chunks_respects_max_tokens() {
        let cfg = crate::config::ChunkingConfig {
            max_tokens_per_chunk: 10,
            min_tokens_per_chunk: 1,
            paragraph_overlap: 0,
        };
        let content = "one two three four five\n\nsix seven eight nine ten\n\neleven twelve";
        let plans = plan_chunks(&cfg, 1, "Item 1", content);
        assert!(plans.len() >= 2);
        for plan in &plans {
            assert!(plan.estimated_tokens <= 20);
        }
    }

    #[test]
    fn test_plan_chunks_overlap() {
        let cfg = crate::config::ChunkingConfig {
            max_tokens_per_chunk: 5,
            min_tokens_per_chunk: 1,
            paragraph_overlap: 1,
        };
        let content = "aaa\n\nbbb\n\nccc\n\nddd";
        let plans = plan_chunks(&cfg, 1, "Item 1", content);
        assert!(plans.len() >= 2);
        assert!(plans[1].start_paragraph < plans[0].end_paragraph);
    }

    #[test]
    fn test_is_uppercase_heading() {
        assert!(is_uppercase_heading("RISK FACTORS"));
        assert!(!is_uppercase_heading("Risk Factors"));
        assert!(!is_uppercase_heading("ABC"));
    }
}
