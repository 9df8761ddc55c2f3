//! Engine assembly: one place that wires config into the running parts.
//!
//! The CLI, the HTTP server, and the integration tests all build the same
//! [`Engine`]; tests swap in their own gateways through
//! [`Engine::build_with`].

use std::sync::Arc;

use crate::answer::AnswerPipeline;
use crate::cache::ResponseCache;
use crate::config::Config;
use crate::crawler::Crawler;
use crate::embedding::{self, EmbeddingGateway};
use crate::errors::EngineError;
use crate::generation::{self, GenerationGateway};
use crate::ingest::{IngestCoordinator, SyncReport};
use crate::meetings::MeetingIntake;
use crate::retriever::Retriever;
use crate::store::ContentStore;
use crate::topics::TopicRouter;
use crate::{db, documents, migrate};

pub struct Engine {
    pub config: Config,
    pub store: Arc<ContentStore>,
    pub coordinator: Arc<IngestCoordinator>,
    pub pipeline: AnswerPipeline,
    pub meetings: MeetingIntake,
}

/// Snapshot of engine health for the status endpoint and `stats` command.
#[derive(Debug, serde::Serialize)]
pub struct EngineStatus {
    pub active_pages: i64,
    pub removed_pages: i64,
    pub chunk_count: i64,
    pub last_sync: Option<i64>,
    pub cache_entries: usize,
    pub generation: u64,
    pub crawl_active: bool,
}

impl Engine {
    /// Build from config with the configured external gateways.
    pub async fn build(config: Config) -> Result<Arc<Self>, EngineError> {
        let embedder: Arc<dyn EmbeddingGateway> =
            embedding::create_gateway(&config.embedding)?.into();
        let generator = generation::create_gateway(&config.generation)?;
        Self::build_with(config, embedder, generator).await
    }

    /// Build with caller-supplied gateways.
    pub async fn build_with(
        config: Config,
        embedder: Arc<dyn EmbeddingGateway>,
        generator: Option<Box<dyn GenerationGateway>>,
    ) -> Result<Arc<Self>, EngineError> {
        let pool = db::connect(&config.db.path).await?;
        migrate::run_migrations(&pool).await?;
        let store = Arc::new(ContentStore::new(pool));

        let coordinator = Arc::new(IngestCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&embedder),
            config.chunking.clone(),
            config.embedding.batch_size,
            &config.crawl,
        ));

        let retriever = Retriever::new(
            Arc::clone(&store),
            embedder,
            config.retrieval.clone(),
        );
        let pipeline = AnswerPipeline::new(
            Arc::clone(&store),
            retriever,
            generator,
            TopicRouter::new(&config.topics)?,
            Arc::new(ResponseCache::new(&config.cache)),
            config.answer.clone(),
            config.retrieval.clone(),
            config.generation.default_confidence,
        );

        Ok(Arc::new(Self {
            config,
            store,
            coordinator,
            pipeline,
            meetings: MeetingIntake::new(),
        }))
    }

    /// One crawl-and-sync cycle over the configured site. Sweeps defeated
    /// cache entries afterwards.
    pub async fn run_crawl(&self, full: bool) -> Result<SyncReport, EngineError> {
        let crawler = Arc::new(Crawler::new(&self.config.crawl)?);
        let report = self.coordinator.run_crawl_cycle(&crawler, full).await?;
        self.pipeline.cache().sweep(self.store.generation());
        Ok(report)
    }

    pub async fn sync_documents(&self) -> Result<SyncReport, EngineError> {
        let config = self
            .config
            .documents
            .as_ref()
            .ok_or_else(|| EngineError::Config("[documents] section is not set".to_string()))?;
        let report = documents::sync_documents(&self.coordinator, config).await?;
        self.pipeline.cache().sweep(self.store.generation());
        Ok(report)
    }

    pub async fn sync_meetings(&self) -> Result<SyncReport, EngineError> {
        let config = self
            .config
            .meetings
            .as_ref()
            .ok_or_else(|| EngineError::Config("[meetings] section is not set".to_string()))?;
        let report = self.meetings.sync(&self.coordinator, config).await?;
        self.pipeline.cache().sweep(self.store.generation());
        Ok(report)
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        let stats = self.store.stats().await?;
        Ok(EngineStatus {
            active_pages: stats.active_pages,
            removed_pages: stats.removed_pages,
            chunk_count: stats.chunk_count,
            last_sync: stats.last_sync,
            cache_entries: self.pipeline.cache().len(),
            generation: self.store.generation(),
            crawl_active: self.coordinator.is_crawl_active(),
        })
    }
}
