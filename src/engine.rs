//! The engine root: a connection pool plus pluggable capabilities.
//!
//! [`KnowledgeEngine`] is the handle the CLI and tests operate through.
//! Ingestion methods live in [`crate::ingest`], retrieval methods in
//! [`crate::assemble`].

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::config::Config;
use crate::db::connect;
use crate::embedding::{create_embedder, Embedder};
use crate::error::MeshError;
use crate::extract::{create_extractor, Extractor};
use crate::migrate::run_migrations;

pub struct KnowledgeEngine {
    pool: SqlitePool,
    pub(crate) embedder: Arc<dyn Embedder>,
    pub(crate) extractor: Arc<dyn Extractor>,
    pub(crate) config: Config,
}

impl KnowledgeEngine {
    /// Open the database (running migrations) and build the configured
    /// embedding and extraction providers.
    pub async fn open(config: Config) -> Result<Self, MeshError> {
        let pool = connect(&config.db.path).await?;
        run_migrations(&pool).await?;
        let embedder: Arc<dyn Embedder> = Arc::from(create_embedder(&config.embedding)?);
        let extractor: Arc<dyn Extractor> = Arc::from(create_extractor(&config.extraction)?);
        Ok(Self {
            pool,
            embedder,
            extractor,
            config,
        })
    }

    /// Assemble an engine from pre-built parts. Tests use this to swap
    /// in scripted capabilities against a migrated pool.
    pub fn with_capabilities(
        pool: SqlitePool,
        config: Config,
        embedder: Arc<dyn Embedder>,
        extractor: Arc<dyn Extractor>,
    ) -> Self {
        Self {
            pool,
            embedder,
            extractor,
            config,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
