//! filingwatch — asynchronous ingestion pipeline for regulatory filing
//! archives: poller -> downloader -> parser -> summary/entity/diff workers.

use clap::{Parser, Subcommand};
use console::style;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use filingwatch::config::AppConfig;
use filingwatch::context::AppContext;
use filingwatch::repository::migrations::{rollback_last, run_migrations};
use filingwatch::services::{diff_worker, downloader, entity_worker, parser, poller, summary_worker};

#[derive(Parser)]
#[command(name = "filingwatch")]
#[command(about = "Asynchronous ingestion pipeline for regulatory filing archives")]
#[command(version)]
struct Cli {
    /// Path to a config file (TOML/YAML/JSON); falls back to `prefer`'s
    /// standard discovery locations if omitted.
    #[arg(long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,

    /// Roll back the most recently applied migration
    Rollback,

    /// Start the full pipeline: poller, downloader, parser, and all three
    /// LLM worker pools, plus the metrics HTTP server.
    Serve {
        /// Host/port for the Prometheus `/metrics` endpoint
        #[arg(long, default_value = "0.0.0.0")]
        metrics_host: String,
        #[arg(long, default_value = "9090")]
        metrics_port: u16,
    },

    /// Re-enqueue a FAILED filing's download task after operator intervention
    Retry {
        /// Accession number of the filing to retry
        accession: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "filingwatch=debug"
    } else {
        "filingwatch=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Migrate => cmd_migrate(cli.config).await,
        Commands::Rollback => cmd_rollback(cli.config).await,
        Commands::Serve {
            metrics_host,
            metrics_port,
        } => cmd_serve(cli.config, metrics_host, metrics_port).await,
        Commands::Retry { accession } => cmd_retry(cli.config, accession).await,
    }
}

async fn load_config(path: Option<std::path::PathBuf>) -> anyhow::Result<AppConfig> {
    match path {
        Some(path) => AppConfig::load_from_path(&path)
            .await
            .map_err(|e| anyhow::anyhow!(e)),
        None => Ok(AppConfig::load().await),
    }
}

async fn cmd_migrate(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let config = load_config(config_path).await?;
    println!("{} Running migrations against {}", style("→").cyan(), config.database_url);
    run_migrations(&config.database_url).await?;
    println!("{} Migrations applied", style("✓").green());
    Ok(())
}

async fn cmd_rollback(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let config = load_config(config_path).await?;
    println!("{} Rolling back last migration on {}", style("→").cyan(), config.database_url);
    rollback_last(&config.database_url).await?;
    println!("{} Rollback complete", style("✓").green());
    Ok(())
}

async fn cmd_serve(
    config_path: Option<std::path::PathBuf>,
    metrics_host: String,
    metrics_port: u16,
) -> anyhow::Result<()> {
    let config = load_config(config_path).await?;
    let feed_urls = config.feed_urls.clone();
    let workers = config.workers.clone();

    let recorder_handle = filingwatch::metrics_server::install_recorder();
    let ctx = AppContext::build(config).await?;

    println!(
        "{} filingwatch starting: {} feed(s), downloader x{}, parser x{}, summary x{}, entity x{}, diff x{}",
        style("→").cyan(),
        feed_urls.len(),
        workers.downloader_concurrency,
        workers.parser_concurrency,
        workers.summary_concurrency,
        workers.entity_concurrency,
        workers.diff_concurrency,
    );

    let mut handles = Vec::new();
    for feed_url in feed_urls {
        let ctx = ctx.clone();
        handles.push(tokio::spawn(async move {
            poller::run(ctx, feed_url).await;
        }));
    }
    handles.extend(downloader::spawn(ctx.clone(), workers.downloader_concurrency));
    handles.extend(parser::spawn(ctx.clone(), workers.parser_concurrency));
    handles.extend(summary_worker::spawn(ctx.clone(), workers.summary_concurrency));
    handles.extend(entity_worker::spawn(ctx.clone(), workers.entity_concurrency));
    handles.extend(diff_worker::spawn(ctx.clone(), workers.diff_concurrency));

    let metrics_task = tokio::spawn(filingwatch::metrics_server::serve(
        recorder_handle,
        metrics_host,
        metrics_port,
    ));

    tokio::signal::ctrl_c().await?;
    println!("{} shutdown signal received, stopping workers", style("→").cyan());
    ctx.request_stop();
    metrics_task.abort();

    for handle in handles {
        let _ = handle.await;
    }

    Ok(())
}

async fn cmd_retry(config_path: Option<std::path::PathBuf>, accession: String) -> anyhow::Result<()> {
    let config = load_config(config_path).await?;
    let ctx = AppContext::build(config).await?;

    let filing = ctx
        .repos
        .filings
        .get(&accession)
        .await?
        .ok_or_else(|| anyhow::anyhow!("no filing found for accession {accession}"))?;

    let task = filingwatch::services::tasks::DownloadTask {
        accession: filing.accession.clone(),
        issuer_cik: filing.issuer_cik.clone(),
        form_type: filing.form_type.clone(),
        filing_href: filing.source_urls.first().cloned().unwrap_or_default(),
        filed_at: filing.filed_at,
        ticker: None,
        summary: None,
    };

    let payload = serde_json::to_vec(&task)?;
    ctx.queues
        .download
        .push(&format!("{}:retry:{}", task.accession, uuid::Uuid::new_v4()), &payload)
        .await?;
    println!("{} re-enqueued download task for {}", style("✓").green(), accession);
    Ok(())
}
