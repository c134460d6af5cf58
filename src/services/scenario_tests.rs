//! Integration-style scenario tests (spec §8, S1-S7) against the real
//! SQLite backend, a tempdir-backed [`crate::storage::FileObjectStore`],
//! [`crate::queue::InMemoryQueue`]/[`crate::budget::InMemoryKvStore`], and a
//! [`crate::llm::StubLlmClient`] swapped in wherever a scenario needs to
//! script an LLM response. No HTTP: the downloader's fetch step is bypassed
//! by seeding storage and the filing row directly, since none of these
//! scenarios is about retry/backoff behaviour against a live endpoint.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use crate::config::{AppConfig, ObjectStoreConfig};
use crate::context::AppContext;
use crate::error::PipelineError;
use crate::llm::stub::StubResponse;
use crate::llm::StubLlmClient;
use crate::models::{BlobKind, ChangeKind, DiffStatus, FilingStatus};
use crate::queue::Message;
use crate::repository::migrations::run_migrations;
use crate::repository::transactions::FetchedArtifact;
use crate::services::tasks::{ChunkTask, DiffTask, ParseTask};
use crate::services::{diff_worker, entity_worker, parser, poller, summary_worker};
use crate::storage::{artifact_key, content_hash};
use crate::utils::guess_content_type;

async fn build_ctx_with(tmp: &TempDir, mutate: impl FnOnce(&mut AppConfig)) -> AppContext {
    let db_path = tmp.path().join("test.db");
    let database_url = format!("sqlite:{}", db_path.display());
    run_migrations(&database_url).await.unwrap();

    let mut config = AppConfig::default();
    config.database_url = database_url;
    config.object_store = ObjectStoreConfig::File {
        base_dir: tmp.path().join("artifacts").display().to_string(),
    };
    mutate(&mut config);

    AppContext::build(config).await.unwrap()
}

async fn build_ctx(tmp: &TempDir) -> AppContext {
    build_ctx_with(tmp, |_| {}).await
}

fn message(job_id: impl Into<String>, payload: &impl serde::Serialize) -> Message {
    Message {
        job_id: job_id.into(),
        token: "test-token".to_string(),
        payload: serde_json::to_vec(payload).unwrap(),
    }
}

/// Stores a filing's raw artifact directly and commits the download record,
/// skipping the downloader's HTTP fetch (spec §4.4 atomicity is exercised
/// separately by reading `transactions.rs`; these scenarios are about the
/// stages downstream of it).
async fn seed_downloaded_filing(
    ctx: &AppContext,
    accession: &str,
    issuer_cik: &str,
    form_type: &str,
    filed_at: chrono::DateTime<chrono::Utc>,
    text: &str,
) {
    let key = artifact_key(issuer_cik, accession, "submission.txt");
    let location = ctx.object_store.store(&key, text.as_bytes()).await.unwrap();
    let checksum = content_hash(text.as_bytes());
    let content_type = guess_content_type("submission.txt");

    let artifacts = vec![FetchedArtifact {
        kind: BlobKind::Raw,
        location,
        content_type,
        checksum,
    }];

    ctx.repos
        .commit_download(accession, issuer_cik, form_type, filed_at, "https://archive.example/index.htm", None, &artifacts)
        .await
        .unwrap();
}

const FILING_TEXT: &str = "Item 1. Business\nWe make widgets.\n\nItem 1A. Risk Factors\nWidgets may break.\n\nItem 2. Properties\nOne factory in Ohio.\n";

/// S1: one feed entry's worth of download + parse produces three sections
/// and enqueues at least one chunk job; the filing ends PARSED.
#[tokio::test]
async fn scenario_s1_happy_path() {
    let tmp = TempDir::new().unwrap();
    let ctx = build_ctx(&tmp).await;

    let filed_at = chrono::Utc::now();
    seed_downloaded_filing(&ctx, "0001234567-25-000001", "1234567", "10-K", filed_at, FILING_TEXT).await;

    let parse_task = ParseTask {
        accession: "0001234567-25-000001".to_string(),
    };
    let msg = message("0001234567-25-000001", &parse_task);
    parser::process(&ctx, &msg).await.unwrap();

    let filing = ctx.repos.filings.get("0001234567-25-000001").await.unwrap().unwrap();
    assert_eq!(filing.status, FilingStatus::Parsed);

    let sections = ctx.repos.sections.list_for_filing("0001234567-25-000001").await.unwrap();
    assert_eq!(sections.len(), 3);
    assert_eq!(sections[0].title, "Item 1. Business");
    assert_eq!(sections[1].title, "Item 1A. Risk Factors");
    assert_eq!(sections[2].title, "Item 2. Properties");

    assert!(ctx.queues.chunk.length().await.unwrap() >= 1);
}

/// S2: the same accession polled twice only ever produces one download task.
#[tokio::test]
async fn scenario_s2_poller_dedupes_same_accession() {
    let tmp = TempDir::new().unwrap();
    let ctx = build_ctx(&tmp).await;

    let entry = crate::feed::FeedEntry {
        accession: "0001234567-25-000002".to_string(),
        cik: "1234567".to_string(),
        form_type: "10-K".to_string(),
        href: "https://archive.example/1234567/0001234567-25-000002-index.htm".to_string(),
        filed_at: chrono::Utc::now(),
    };

    assert!(poller::enqueue_entry(&ctx, entry.clone()).await.unwrap());
    assert!(!poller::enqueue_entry(&ctx, entry).await.unwrap());

    assert_eq!(ctx.queues.download.length().await.unwrap(), 1);
}

/// S3: a popped-but-unacked message is reclaimed once its visibility
/// timeout elapses; the redelivery carries a fresh token, and the stale
/// token's ack is a no-op that must not release the dedupe entry.
#[tokio::test]
async fn scenario_s3_visibility_timeout_reclaim() {
    let tmp = TempDir::new().unwrap();
    let ctx = build_ctx_with(&tmp, |c| c.visibility_timeout_secs = 0).await;

    ctx.queues.download.push("job-vt", b"payload").await.unwrap();

    let first = ctx.queues.download.pop(Duration::from_millis(50)).await.unwrap().unwrap();
    assert_eq!(first.job_id, "job-vt");

    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = ctx.queues.download.pop(Duration::from_millis(50)).await.unwrap().unwrap();
    assert_eq!(second.job_id, "job-vt");
    assert_ne!(second.token, first.token);

    ctx.queues.download.ack(&first).await.unwrap();
    assert!(!ctx.queues.download.push("job-vt", b"payload").await.unwrap());

    ctx.queues.download.ack(&second).await.unwrap();
    assert!(ctx.queues.download.push("job-vt", b"payload").await.unwrap());
}

/// Seeds two filings of the same issuer/form, with per-ordinal content for
/// the current one, and schedules their diff exactly as the parser would.
async fn seed_diff(
    ctx: &AppContext,
    previous_sections: &[(&str, &str)],
    current_sections: &[(&str, &str)],
) -> crate::models::Diff {
    let previous_accession = "0001234567-25-000010";
    let current_accession = "0001234567-25-000011";

    ctx.repos
        .filings
        .upsert(previous_accession, "1234567", "10-K", chrono::Utc::now() - chrono::Duration::days(365), "https://archive.example/previous")
        .await
        .unwrap();
    ctx.repos
        .filings
        .upsert(current_accession, "1234567", "10-K", chrono::Utc::now(), "https://archive.example/current")
        .await
        .unwrap();

    let previous_rows: Vec<(String, String, Option<String>)> = previous_sections
        .iter()
        .map(|(title, content)| (title.to_string(), content.to_string(), None))
        .collect();
    let current_rows: Vec<(String, String, Option<String>)> = current_sections
        .iter()
        .map(|(title, content)| (title.to_string(), content.to_string(), None))
        .collect();

    ctx.repos.commit_parse(previous_accession, previous_rows).await.unwrap();
    let current = ctx.repos.commit_parse(current_accession, current_rows).await.unwrap();

    let previous = ctx.repos.sections.list_for_filing(previous_accession).await.unwrap();

    let expected = current.len().max(previous.len()) as i32;
    ctx.repos.diffs.schedule(current_accession, previous_accession, expected).await.unwrap()
}

/// S4: two 10-K filings share ordinals 1-3; only ordinal 2's content
/// changed. The diff worker should call the LLM once (ordinal 2), persist
/// exactly one SectionDiff with change_type update, and advance the Diff to
/// COMPLETED with processed == expected == 3.
#[tokio::test]
async fn scenario_s4_diff_update() {
    let tmp = TempDir::new().unwrap();
    let ctx = build_ctx(&tmp).await;

    let diff = seed_diff(
        &ctx,
        &[("Item 1", "content A"), ("Item 1A", "content B"), ("Item 2", "content C")],
        &[("Item 1", "content A"), ("Item 1A", "content B-revised"), ("Item 2", "content C")],
    )
    .await;

    let previous = ctx.repos.sections.list_for_filing("0001234567-25-000010").await.unwrap();
    let current = ctx.repos.sections.list_for_filing("0001234567-25-000011").await.unwrap();

    let llm_response = r#"[{"change_type":"update","summary":"Risk language revised.","impact":"medium","confidence":0.8,"evidence":"content B-revised"}]"#;
    let ctx = ctx.with_llm(Arc::new(StubLlmClient::always(llm_response)));

    for ordinal in 1..=3i32 {
        let current_section = current.iter().find(|s| s.ordinal == ordinal).unwrap();
        let previous_section = previous.iter().find(|s| s.ordinal == ordinal).unwrap();
        let task = DiffTask {
            diff_id: diff.id,
            current_filing_id: "0001234567-25-000011".to_string(),
            previous_filing_id: "0001234567-25-000010".to_string(),
            current_section_id: Some(current_section.id),
            previous_section_id: Some(previous_section.id),
            ordinal,
            title: current_section.title.clone(),
            change_kind: ChangeKind::Update,
        };
        let msg = message(task.job_id(), &task);
        diff_worker::process(&ctx, &msg).await.unwrap();
    }

    let updated = ctx.repos.diffs.get(diff.id).await.unwrap().unwrap();
    assert_eq!(updated.status, DiffStatus::Completed);
    assert_eq!(updated.processed_sections, 3);
    assert_eq!(updated.expected_sections, 3);

    let section_diffs = ctx.repos.diffs.list_for_diff(diff.id).await.unwrap();
    assert_eq!(section_diffs.len(), 1);
    assert_eq!(section_diffs[0].ordinal, 2);
    assert_eq!(section_diffs[0].change_type, ChangeKind::Update);
}

/// S5: the current filing has an extra ordinal the previous one lacks; the
/// diff worker must synthesize an Addition without ever calling the LLM.
#[tokio::test]
async fn scenario_s5_diff_addition_without_llm() {
    let tmp = TempDir::new().unwrap();
    let ctx = build_ctx(&tmp).await;

    let diff = seed_diff(
        &ctx,
        &[("Item 1", "content A"), ("Item 1A", "content B")],
        &[("Item 1", "content A"), ("Item 1A", "content B"), ("Item 2", "content C")],
    )
    .await;

    let previous = ctx.repos.sections.list_for_filing("0001234567-25-000010").await.unwrap();
    let current = ctx.repos.sections.list_for_filing("0001234567-25-000011").await.unwrap();

    let stub = Arc::new(StubLlmClient::new(Vec::new()));
    let ctx = ctx.with_llm(stub.clone());

    for ordinal in 1..=3i32 {
        let current_section = current.iter().find(|s| s.ordinal == ordinal);
        let previous_section = previous.iter().find(|s| s.ordinal == ordinal);
        let task = DiffTask {
            diff_id: diff.id,
            current_filing_id: "0001234567-25-000011".to_string(),
            previous_filing_id: "0001234567-25-000010".to_string(),
            current_section_id: current_section.map(|s| s.id),
            previous_section_id: previous_section.map(|s| s.id),
            ordinal,
            title: current_section.or(previous_section).unwrap().title.clone(),
            change_kind: ChangeKind::Addition,
        };
        let msg = message(task.job_id(), &task);
        diff_worker::process(&ctx, &msg).await.unwrap();
    }

    assert_eq!(stub.call_count(), 0);

    let section_diffs = ctx.repos.diffs.list_for_diff(diff.id).await.unwrap();
    assert_eq!(section_diffs.len(), 1);
    assert_eq!(section_diffs[0].ordinal, 3);
    assert_eq!(section_diffs[0].change_type, ChangeKind::Addition);

    let updated = ctx.repos.diffs.get(diff.id).await.unwrap().unwrap();
    assert_eq!(updated.status, DiffStatus::Completed);
}

/// S6: budget exhaustion. Part one mirrors the spec's literal numbers
/// directly against the budget manager; part two drives the full summary
/// worker pipeline with a daily limit forced below any real estimate, and
/// checks the worker surfaces a retryable Budget error with no Analysis
/// persisted.
#[tokio::test]
async fn scenario_s6_budget_exceeded() {
    let tmp = TempDir::new().unwrap();
    let ctx = build_ctx(&tmp).await;

    let reservation = ctx.budget.reserve("s6-direct", "test-model", 40, 50).await.unwrap();
    reservation.commit(40, 50).await.unwrap();
    let second = ctx.budget.reserve("s6-direct", "test-model", 20, 50).await;
    assert!(second.is_err());

    let ctx = build_ctx_with(&tmp, |c| {
        c.budget.daily_limit = 1;
        c.workers.budget_cooldown_ms = 10;
    })
    .await;
    let filed_at = chrono::Utc::now();
    seed_downloaded_filing(&ctx, "0001234567-25-000006", "1234567", "10-K", filed_at, FILING_TEXT).await;
    parser::process(
        &ctx,
        &message(
            "0001234567-25-000006",
            &ParseTask {
                accession: "0001234567-25-000006".to_string(),
            },
        ),
    )
    .await
    .unwrap();

    let chunk_msg = ctx.queues.chunk.pop(Duration::from_millis(200)).await.unwrap().unwrap();
    let chunk: ChunkTask = serde_json::from_slice(&chunk_msg.payload).unwrap();

    let outcome = summary_worker::process(&ctx, &chunk_msg).await;
    let err = outcome.unwrap_err();
    assert!(matches!(err, PipelineError::Budget { .. }));
    assert!(err.is_retryable());

    let analysis = ctx.repos.analyses.get_by_job_id(&chunk.summary_job_id()).await.unwrap();
    assert!(analysis.is_none());
}

/// S7: the LLM returns a non-JSON body for an entity extraction job. No
/// Entity rows should be persisted, and the job should be dropped (acked
/// by the caller, not redelivered) since the error is not retryable.
#[tokio::test]
async fn scenario_s7_entity_parse_failure() {
    let tmp = TempDir::new().unwrap();
    let ctx = build_ctx(&tmp).await;

    let filed_at = chrono::Utc::now();
    seed_downloaded_filing(&ctx, "0001234567-25-000007", "1234567", "10-K", filed_at, FILING_TEXT).await;
    parser::process(
        &ctx,
        &message(
            "0001234567-25-000007",
            &ParseTask {
                accession: "0001234567-25-000007".to_string(),
            },
        ),
    )
    .await
    .unwrap();

    let entity_msg = ctx.queues.entity.pop(Duration::from_millis(200)).await.unwrap().unwrap();

    let ctx = ctx.with_llm(Arc::new(StubLlmClient::new(vec![StubResponse::content("not-json")])));

    let outcome = entity_worker::process(&ctx, &entity_msg).await;
    let err = outcome.unwrap_err();
    assert!(matches!(err, PipelineError::Parse(_)));
    assert_eq!(err.category(), "parse");
    assert!(!err.is_retryable());

    let entities = ctx.repos.entities.list_for_filing("0001234567-25-000007").await.unwrap();
    assert!(entities.is_empty());
}
