//! Application context.
//!
//! Everything a request needs (configuration, project store, embedding
//! cache, vector index, generator) is built once at startup and shared by
//! reference. Tests assemble one with [`AppContext::new`] and fakes.

use anyhow::{Context as _, Result};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::chunk::Chunker;
use crate::config::Config;
use crate::db;
use crate::embedding::cache::EmbeddingCache;
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::generation::{create_generator, Generator};
use crate::index::SharedIndex;
use crate::ingest::{build_index, IndexStats};
use crate::migrate;
use crate::projects::ProjectStore;

pub struct AppContext {
    pub config: Config,
    pub projects: ProjectStore,
    pub cache: Arc<EmbeddingCache>,
    pub index: SharedIndex,
    pub generator: Arc<dyn Generator>,
    pub chunker: Chunker,
    rebuild_lock: Mutex<()>,
}

impl AppContext {
    /// Assemble a context from already-built parts. The index starts empty.
    pub fn new(
        config: Config,
        pool: SqlitePool,
        provider: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn Generator>,
    ) -> Result<Self> {
        let chunker = Chunker::from_config(&config.chunking)?;
        let cache = EmbeddingCache::new(
            provider,
            &config.embedding.cache_dir,
            &config.embedding.cache_namespace(),
            config.embedding.batch_size,
        );

        Ok(Self {
            projects: ProjectStore::new(pool),
            cache: Arc::new(cache),
            index: SharedIndex::default(),
            generator,
            chunker,
            rebuild_lock: Mutex::new(()),
            config,
        })
    }

    /// Connect to the database, run migrations and build the configured
    /// embedding and generation backends.
    pub async fn from_config(config: Config) -> Result<Self> {
        let pool = db::connect(&config.db).await?;
        migrate::migrate_pool(&pool)
            .await
            .context("running database migrations")?;
        let provider = create_provider(&config.embedding)?;
        let generator = create_generator(&config.generation)?;

        tracing::info!(
            embedding = provider.model_name(),
            generation = generator.model_name(),
            "backends configured"
        );
        Self::new(config, pool, provider, generator)
    }

    /// Rebuild the vector index from the document directory and publish it.
    /// Concurrent rebuilds run one at a time; searches keep using the
    /// previous index until the swap.
    pub async fn rebuild_index(&self) -> Result<IndexStats> {
        let _guard = self.rebuild_lock.lock().await;
        let (index, stats) = build_index(&self.config.documents, self.chunker, &self.cache).await?;
        self.index.replace(index);
        Ok(stats)
    }
}
