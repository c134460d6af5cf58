//! Single application context constructed once at startup and cloned into
//! every worker task (spec §5/§9). Bundles the pieces the teacher's
//! `services::download::DownloadService` took as constructor arguments
//! (an HTTP client, a repo handle, an event channel) generalized to this
//! pipeline's five queues, KV-backed budget, and object store.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use crate::backpressure::BackpressureGate;
use crate::budget::{BoxedKvStore, BudgetManager, InMemoryKvStore, RedisKvStore};
use crate::config::AppConfig;
use crate::http_client::HttpClient;
use crate::llm::{LlmClient, LlmProvider};
use crate::queue::{BoxedQueue, InMemoryQueue, QueueError, RedisQueue};
use crate::repository::pool::DbPool;
use crate::repository::Repositories;
use crate::services::seen::{InMemorySeenSet, RedisSeenSet, SeenSet};
use crate::storage::{FileObjectStore, ObjectStore, S3ObjectStore};

/// The five named queues the pipeline stages communicate through (spec §6).
pub struct Queues {
    pub download: BoxedQueue,
    pub parse: BoxedQueue,
    pub chunk: BoxedQueue,
    pub entity: BoxedQueue,
    pub diff: BoxedQueue,
}

/// One backpressure gate per downstream queue, built once so hysteresis
/// state (the paused flag) is shared across every call site that produces
/// into that queue.
pub struct Gates {
    pub download: BackpressureGate<BoxedQueue>,
    pub parse: BackpressureGate<BoxedQueue>,
    pub chunk: BackpressureGate<BoxedQueue>,
    pub entity: BackpressureGate<BoxedQueue>,
    pub diff: BackpressureGate<BoxedQueue>,
}

/// Everything a worker loop needs, built once in [`AppContext::build`] and
/// cheaply cloned (every field is an `Arc` or already `Clone`) into each
/// spawned task.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub repos: Repositories,
    pub queues: Arc<Queues>,
    pub gates: Arc<Gates>,
    pub budget: BudgetManager,
    pub object_store: Arc<dyn ObjectStore>,
    pub seen: Arc<dyn SeenSet>,
    pub http: HttpClient,
    pub llm: Arc<dyn LlmProvider>,
    /// Cooperative stop signal: `notify_waiters` wakes every worker loop so
    /// it can check a shared `AtomicBool` (see [`AppContext::stop`]) between
    /// I/O boundaries rather than mid-request.
    pub stop_signal: Arc<Notify>,
    pub stopped: Arc<std::sync::atomic::AtomicBool>,
}

impl AppContext {
    pub async fn build(config: AppConfig) -> Result<Self, BuildError> {
        let pool = DbPool::from_url(&config.database_url)?;
        let repos = Repositories::new(pool);

        let vt = Duration::from_secs(config.visibility_timeout_secs);
        let queues = match &config.redis_url {
            Some(redis_url) => Arc::new(Queues {
                download: Arc::new(RedisQueue::new(redis_url, &config.queues.download, vt).await?),
                parse: Arc::new(RedisQueue::new(redis_url, &config.queues.parse, vt).await?),
                chunk: Arc::new(RedisQueue::new(redis_url, &config.queues.chunk, vt).await?),
                entity: Arc::new(RedisQueue::new(redis_url, &config.queues.entity, vt).await?),
                diff: Arc::new(RedisQueue::new(redis_url, &config.queues.diff, vt).await?),
            }),
            None => Arc::new(Queues {
                download: Arc::new(InMemoryQueue::new(vt)),
                parse: Arc::new(InMemoryQueue::new(vt)),
                chunk: Arc::new(InMemoryQueue::new(vt)),
                entity: Arc::new(InMemoryQueue::new(vt)),
                diff: Arc::new(InMemoryQueue::new(vt)),
            }),
        };

        let bp = &config.backpressure;
        let check_interval = Duration::from_millis(bp.check_interval_ms);
        let gates = Arc::new(Gates {
            download: BackpressureGate::new(queues.download.clone(), "download", bp.pause_hi, bp.resume_lo, check_interval),
            parse: BackpressureGate::new(queues.parse.clone(), "parse", bp.pause_hi, bp.resume_lo, check_interval),
            chunk: BackpressureGate::new(queues.chunk.clone(), "chunk", bp.pause_hi, bp.resume_lo, check_interval),
            entity: BackpressureGate::new(queues.entity.clone(), "entity", bp.pause_hi, bp.resume_lo, check_interval),
            diff: BackpressureGate::new(queues.diff.clone(), "diff", bp.pause_hi, bp.resume_lo, check_interval),
        });

        let kv: BoxedKvStore = match &config.redis_url {
            Some(redis_url) => Arc::new(RedisKvStore::new(redis_url).await?),
            None => Arc::new(InMemoryKvStore::new()),
        };
        let budget = BudgetManager::new(kv);

        let object_store: Arc<dyn ObjectStore> = match &config.object_store {
            crate::config::ObjectStoreConfig::File { base_dir } => {
                Arc::new(FileObjectStore::new(base_dir.clone()))
            }
            crate::config::ObjectStoreConfig::S3 { bucket } => {
                Arc::new(S3ObjectStore::new(bucket.clone()).await)
            }
        };

        let seen: Arc<dyn SeenSet> = match &config.redis_url {
            Some(redis_url) => Arc::new(RedisSeenSet::new(redis_url, "sec:ingestion:seen").await?),
            None => Arc::new(InMemorySeenSet::new()),
        };

        let http = HttpClient::new(&config.user_agent)?;
        let llm: Arc<dyn LlmProvider> = Arc::new(LlmClient::new(config.llm.clone()));

        Ok(Self {
            config: Arc::new(config),
            repos,
            queues,
            gates,
            budget,
            object_store,
            seen,
            http,
            llm,
            stop_signal: Arc::new(Notify::new()),
            stopped: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        })
    }

    /// Swap in an [`LlmProvider`] after `build` — `build` always wires the
    /// real HTTP-backed client, which scenario tests can't exercise without
    /// a network, so integration tests call this with a [`crate::llm::StubLlmClient`].
    pub fn with_llm(mut self, llm: Arc<dyn LlmProvider>) -> Self {
        self.llm = llm;
        self
    }

    /// Request every worker loop sharing this context to stop at its next
    /// I/O boundary.
    pub fn request_stop(&self) {
        self.stopped.store(true, std::sync::atomic::Ordering::SeqCst);
        self.stop_signal.notify_waiters();
    }

    pub fn is_stopping(&self) -> bool {
        self.stopped.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("database error: {0}")]
    Db(#[from] diesel::result::Error),
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
    #[error("budget error: {0}")]
    Budget(#[from] crate::budget::BudgetError),
    #[error("pipeline error: {0}")]
    Pipeline(#[from] crate::error::PipelineError),
}
