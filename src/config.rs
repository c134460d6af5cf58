//! Configuration for the filing ingestion pipeline, layered via the `prefer`
//! crate: defaults, an optional TOML/YAML/JSON config file (auto-discovered
//! or explicit), then environment variable overrides — the same precedence
//! the teacher's `Config`/`Settings` split applies, collapsed here into one
//! struct since the pipeline has no per-device vs. synced-to-DB split.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::llm::LlmConfig;

/// Backpressure thresholds for one downstream queue (spec §4.2).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BackpressureConfig {
    pub pause_hi: u64,
    pub resume_lo: u64,
    pub check_interval_ms: u64,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            pause_hi: 500,
            resume_lo: 100,
            check_interval_ms: 1000,
        }
    }
}

/// Named queues and their auxiliary key prefixes (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueNames {
    #[serde(default = "default_download_queue")]
    pub download: String,
    #[serde(default = "default_parse_queue")]
    pub parse: String,
    #[serde(default = "default_chunk_queue")]
    pub chunk: String,
    #[serde(default = "default_entity_queue")]
    pub entity: String,
    #[serde(default = "default_diff_queue")]
    pub diff: String,
}

fn default_download_queue() -> String {
    "sec:ingestion:download".to_string()
}
fn default_parse_queue() -> String {
    "sec:ingestion:parse".to_string()
}
fn default_chunk_queue() -> String {
    "sec:groq:chunk".to_string()
}
fn default_entity_queue() -> String {
    "sec:groq:entity".to_string()
}
fn default_diff_queue() -> String {
    "sec:groq:diff".to_string()
}

impl Default for QueueNames {
    fn default() -> Self {
        Self {
            download: default_download_queue(),
            parse: default_parse_queue(),
            chunk: default_chunk_queue(),
            entity: default_entity_queue(),
            diff: default_diff_queue(),
        }
    }
}

/// Per-worker-type concurrency and retry knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_concurrency")]
    pub downloader_concurrency: usize,
    #[serde(default = "default_concurrency")]
    pub parser_concurrency: usize,
    #[serde(default = "default_concurrency")]
    pub summary_concurrency: usize,
    #[serde(default = "default_concurrency")]
    pub entity_concurrency: usize,
    #[serde(default = "default_concurrency")]
    pub diff_concurrency: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "default_cooldown_ms")]
    pub budget_cooldown_ms: u64,
}

fn default_concurrency() -> usize {
    2
}
fn default_max_retries() -> u32 {
    3
}
fn default_backoff_ms() -> u64 {
    500
}
fn default_cooldown_ms() -> u64 {
    5000
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            downloader_concurrency: default_concurrency(),
            parser_concurrency: default_concurrency(),
            summary_concurrency: default_concurrency(),
            entity_concurrency: default_concurrency(),
            diff_concurrency: default_concurrency(),
            max_retries: default_max_retries(),
            backoff_ms: default_backoff_ms(),
            budget_cooldown_ms: default_cooldown_ms(),
        }
    }
}

/// Chunk planning parameters (spec §4.5).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens_per_chunk")]
    pub max_tokens_per_chunk: u32,
    #[serde(default = "default_min_tokens_per_chunk")]
    pub min_tokens_per_chunk: u32,
    #[serde(default = "default_paragraph_overlap")]
    pub paragraph_overlap: usize,
}

fn default_max_tokens_per_chunk() -> u32 {
    1500
}
fn default_min_tokens_per_chunk() -> u32 {
    200
}
fn default_paragraph_overlap() -> usize {
    1
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens_per_chunk: default_max_tokens_per_chunk(),
            min_tokens_per_chunk: default_min_tokens_per_chunk(),
            paragraph_overlap: default_paragraph_overlap(),
        }
    }
}

/// Daily token budget limits, scoped per `(service, model)` at reserve time
/// but configured here as one ceiling applied uniformly (spec §4.9).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BudgetConfig {
    #[serde(default = "default_daily_limit")]
    pub daily_limit: i64,
}

fn default_daily_limit() -> i64 {
    2_000_000
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            daily_limit: default_daily_limit(),
        }
    }
}

/// Diff worker tunables (spec §4.8).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DiffConfig {
    #[serde(default = "default_max_diff_chars")]
    pub max_diff_chars: usize,
}

fn default_max_diff_chars() -> usize {
    12_000
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            max_diff_chars: default_max_diff_chars(),
        }
    }
}

/// Object storage backend selection (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum ObjectStoreConfig {
    File { base_dir: String },
    S3 { bucket: String },
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        ObjectStoreConfig::File {
            base_dir: "./data/artifacts".to_string(),
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// `sqlite:...` or `postgres://...`; defaults to a local SQLite file.
    #[serde(default = "default_database_url")]
    pub database_url: String,
    /// Redis connection URL. `None` selects the in-memory queue/budget
    /// backends (single-process dev/test mode).
    #[serde(default)]
    pub redis_url: Option<String>,
    #[serde(default)]
    pub object_store: ObjectStoreConfig,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Feed URLs polled by the poller: the first is the global feed, the
    /// rest are per-issuer feeds.
    #[serde(default)]
    pub feed_urls: Vec<String>,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,
    #[serde(default)]
    pub queues: QueueNames,
    #[serde(default)]
    pub workers: WorkerConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub diff: DiffConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub backpressure: BackpressureConfig,
    /// Path this config was loaded from, if any (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

fn default_database_url() -> String {
    "sqlite:filingwatch.db".to_string()
}

fn default_user_agent() -> String {
    "filingwatch/0.1 (ingestion pipeline)".to_string()
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_visibility_timeout_secs() -> u64 {
    120
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            redis_url: None,
            object_store: ObjectStoreConfig::default(),
            user_agent: default_user_agent(),
            feed_urls: Vec::new(),
            poll_interval_secs: default_poll_interval_secs(),
            visibility_timeout_secs: default_visibility_timeout_secs(),
            queues: QueueNames::default(),
            workers: WorkerConfig::default(),
            chunking: ChunkingConfig::default(),
            budget: BudgetConfig::default(),
            diff: DiffConfig::default(),
            llm: LlmConfig::default(),
            backpressure: BackpressureConfig::default(),
            source_path: None,
        }
        .with_env_overrides()
    }
}

impl AppConfig {
    /// Discover a config file via `prefer`'s standard search path
    /// (`./filingwatch.toml`, `~/.config/filingwatch/config.toml`, ...),
    /// parse it if found, then layer environment variable overrides on top.
    /// Falls back to defaults when no file is found or it fails to parse.
    pub async fn load() -> Self {
        match prefer::load("filingwatch").await {
            Ok(pref_config) => match pref_config.source_path() {
                Some(path) => Self::load_from_path(path)
                    .await
                    .unwrap_or_else(|_| Self::default()),
                None => Self::default(),
            },
            Err(_) => Self::default(),
        }
    }

    /// Load and parse a config file at an explicit path (TOML/YAML/JSON
    /// dispatched by extension), then apply env var overrides.
    pub async fn load_from_path(path: &Path) -> Result<Self, String> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("failed to read config file: {e}"))?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");
        let mut config: AppConfig = match ext {
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .map_err(|e| format!("failed to parse YAML config: {e}"))?,
            "json" => serde_json::from_str(&contents)
                .map_err(|e| format!("failed to parse JSON config: {e}"))?,
            _ => toml::from_str(&contents)
                .map_err(|e| format!("failed to parse TOML config: {e}"))?,
        };

        config.source_path = Some(path.to_path_buf());
        Ok(config.with_env_overrides())
    }

    /// Layer environment variable overrides on top of whatever was loaded
    /// from defaults/file. Mirrors [`LlmConfig::with_env_overrides`].
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("DATABASE_URL") {
            self.database_url = val;
        }
        if let Ok(val) = std::env::var("REDIS_URL") {
            self.redis_url = Some(val);
        }
        if let Ok(val) = std::env::var("USER_AGENT") {
            self.user_agent = val;
        }
        if let Ok(val) = std::env::var("POLL_INTERVAL_SECS") {
            if let Ok(n) = val.parse() {
                self.poll_interval_secs = n;
            }
        }
        if let Ok(val) = std::env::var("FEED_URLS") {
            self.feed_urls = val.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Ok(val) = std::env::var("S3_BUCKET") {
            self.object_store = ObjectStoreConfig::S3 { bucket: val };
        }
        self.llm = self.llm.with_env_overrides();
        self
    }

    pub fn is_postgres(&self) -> bool {
        crate::repository::util::is_postgres_url(&self.database_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_has_sane_queue_names() {
        let config = AppConfig::default();
        assert_eq!(config.queues.download, "sec:ingestion:download");
        assert_eq!(config.queues.diff, "sec:groq:diff");
    }

    #[test]
    fn test_env_override_database_url() {
        std::env::set_var("DATABASE_URL", "sqlite:/tmp/override.db");
        let config = AppConfig::default();
        assert_eq!(config.database_url, "sqlite:/tmp/override.db");
        std::env::remove_var("DATABASE_URL");
    }

    #[tokio::test]
    async fn test_load_from_toml_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("filingwatch.toml");
        tokio::fs::write(&path, "database_url = \"sqlite:/tmp/custom.db\"\npoll_interval_secs = 45\n")
            .await
            .unwrap();
        let config = AppConfig::load_from_path(&path).await.unwrap();
        assert_eq!(config.database_url, "sqlite:/tmp/custom.db");
        assert_eq!(config.poll_interval_secs, 45);
    }
}
