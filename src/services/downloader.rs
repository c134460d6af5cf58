//! Downloader worker pool (spec §4.4): fetch artifacts, persist blobs, write
//! filing metadata, enqueue a parse task. Spawns `N` long-lived tasks per
//! the teacher's `DownloadService::download` shape, each looping
//! pop/process/ack against the download queue instead of claiming DB rows.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use metrics::{counter, histogram};
use tracing::{debug, error, info, warn};

use crate::context::AppContext;
use crate::error::PipelineError;
use crate::feed::derive_raw_url;
use crate::models::BlobKind;
use crate::queue::Message;
use crate::repository::transactions::FetchedArtifact;
use crate::services::tasks::{DownloadTask, ParseTask};
use crate::storage::{artifact_key, content_hash};
use crate::utils::guess_content_type;

#[derive(Default)]
pub struct DownloaderStats {
    pub downloaded: AtomicU64,
    pub failed: AtomicU64,
}

/// Spawn `concurrency` worker tasks, each looping until `ctx.is_stopping()`.
pub fn spawn(ctx: AppContext, concurrency: usize) -> Vec<tokio::task::JoinHandle<()>> {
    let stats = std::sync::Arc::new(DownloaderStats::default());
    (0..concurrency)
        .map(|worker_id| {
            let ctx = ctx.clone();
            let stats = stats.clone();
            tokio::spawn(async move { worker_loop(ctx, worker_id, stats).await })
        })
        .collect()
}

async fn worker_loop(ctx: AppContext, worker_id: usize, stats: std::sync::Arc<DownloaderStats>) {
    info!(worker_id, "downloader worker starting");
    while !ctx.is_stopping() {
        let message = match ctx.queues.download.pop(Duration::from_secs(5)).await {
            Ok(Some(m)) => m,
            Ok(None) => continue,
            Err(e) => {
                error!(worker_id, error = %e, "download queue pop failed");
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        let started = std::time::Instant::now();
        let outcome = process(&ctx, &message).await;
        histogram!("downloader_duration_seconds").record(started.elapsed().as_secs_f64());

        match outcome {
            Ok(()) => {
                stats.downloaded.fetch_add(1, Ordering::Relaxed);
                counter!("downloader_filings_total").increment(1);
                if let Err(e) = ctx.queues.download.ack(&message).await {
                    error!(worker_id, error = %e, "failed to ack download task");
                }
            }
            Err(e) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                counter!("downloader_errors_total", "category" => e.category().to_string()).increment(1);
                error!(worker_id, job_id = %message.job_id, error = %e, "download task failed");
                if let Err(mark_err) = ctx.repos.filings.set_status_failed(&message.job_id).await {
                    error!(worker_id, error = %mark_err, "failed to mark filing FAILED");
                }
                if let Err(e) = ctx.queues.download.ack(&message).await {
                    error!(worker_id, error = %e, "failed to ack failed download task");
                }
            }
        }
    }
    info!(worker_id, "downloader worker stopped");
}

pub(crate) async fn process(ctx: &AppContext, message: &Message) -> Result<(), PipelineError> {
    let task: DownloadTask =
        serde_json::from_slice(&message.payload).map_err(|e| PipelineError::Parse(e.to_string()))?;

    let mut artifacts = vec![("index.html", task.filing_href.clone())];
    if let Some(raw_url) = derive_raw_url(&task.filing_href) {
        artifacts.insert(0, ("submission.txt", raw_url));
    }

    let mut fetched = Vec::new();
    for (filename, url) in artifacts {
        let response = ctx
            .http
            .fetch_with_retry(
                &url,
                ctx.config.workers.max_retries,
                Duration::from_millis(ctx.config.workers.backoff_ms),
            )
            .await?;

        let checksum = content_hash(&response.bytes);
        let content_type = response
            .content_type
            .unwrap_or_else(|| guess_content_type(filename));
        let key = artifact_key(&task.issuer_cik, &task.accession, filename);
        let location = ctx
            .object_store
            .store(&key, &response.bytes)
            .await
            .map_err(|e| PipelineError::TransientIo(e.to_string()))?;

        let kind = if filename == "submission.txt" {
            BlobKind::Raw
        } else {
            BlobKind::Index
        };
        fetched.push((kind, location, content_type, checksum));
    }

    // Issuer upsert, filing upsert, every blob upsert, and the DOWNLOADED
    // status write land in one transaction rather than one per statement.
    let artifacts: Vec<FetchedArtifact> = fetched
        .iter()
        .map(|(kind, location, content_type, checksum)| FetchedArtifact {
            kind: *kind,
            location: location.clone(),
            content_type: content_type.clone(),
            checksum: checksum.clone(),
        })
        .collect();

    ctx.repos
        .commit_download(
            &task.accession,
            &task.issuer_cik,
            &task.form_type,
            task.filed_at,
            &task.filing_href,
            task.ticker.as_deref(),
            &artifacts,
        )
        .await?;

    debug!(accession = %task.accession, artifacts = fetched.len(), "filing downloaded");

    ctx.gates.parse.wait_if_needed().await?;
    let parse_task = ParseTask {
        accession: task.accession.clone(),
    };
    let payload =
        serde_json::to_vec(&parse_task).map_err(|e| PipelineError::Parse(e.to_string()))?;
    let pushed = ctx.queues.parse.push(&task.accession, &payload).await?;
    if !pushed {
        warn!(accession = %task.accession, "parse task already queued");
    }

    Ok(())
}
