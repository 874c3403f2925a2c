//! Entry points for the HTTP layer.
//!
//! `CatastoService` owns the process-wide state: the loaded index, the shard
//! cache and the executor with its fetch pool and footer cache. Every method
//! is safe to call concurrently.

use std::sync::Arc;

use catasto_shard_io::{HttpStorage, HttpStorageConfig, ShardStorage};
use serde::Serialize;

use crate::catalog::{ComuneMatch, IndexCatalog};
use crate::config::LookupConfig;
use crate::duplicates::{DuplicateGroup, DuplicateScanner};
use crate::error::{LookupError, Result};
use crate::parcel::{Parcel, QueryEngine};
use crate::query::{ColumnDescription, ParquetQueryExecutor, QueryExecutor};
use crate::resolver::{normalize_code, ShardResolver};

/// Readiness report, in the shape of the `/healthz` body plus counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceStatus {
    pub ok: bool,
    pub catalog_entries: usize,
    pub cached_shards: usize,
}

/// Cadastral lookup service.
#[derive(Debug)]
pub struct CatastoService {
    config: LookupConfig,
    catalog: Arc<IndexCatalog>,
    resolver: ShardResolver<Arc<IndexCatalog>>,
    engine: QueryEngine,
    duplicates: DuplicateScanner,
}

impl CatastoService {
    /// Build the HTTP storage from `config` and load the index.
    pub async fn connect(config: &LookupConfig) -> Result<Self> {
        config.validate()?;
        let storage = HttpStorage::new(HttpStorageConfig {
            base_url: config.base_url.clone(),
            max_concurrent_fetches: config.max_concurrent_fetches,
            connect_timeout_secs: config.connect_timeout_secs,
            request_timeout_secs: config.request_timeout_secs,
        })
        .map_err(|e| LookupError::config(e.to_string()))?;

        Self::from_storage(config, Arc::new(storage)).await
    }

    /// Load the index through any storage. `config.index_url` is read as a
    /// path of that storage (absolute URLs pass through `HttpStorage`).
    pub async fn from_storage(
        config: &LookupConfig,
        storage: Arc<dyn ShardStorage>,
    ) -> Result<Self> {
        let executor = ParquetQueryExecutor::new(
            storage,
            config.footer_cache_capacity,
            config.base_url.clone(),
        )
        .with_query_text_logging(config.telemetry.log_query_text);

        let catalog = Arc::new(IndexCatalog::load(&executor.reader(), &config.index_url).await?);
        let executor: Arc<dyn QueryExecutor> = Arc::new(executor);

        Ok(Self {
            config: config.clone(),
            resolver: ShardResolver::new(Arc::clone(&catalog)),
            catalog,
            engine: QueryEngine::new(Arc::clone(&executor)),
            duplicates: DuplicateScanner::new(executor),
        })
    }

    /// Look up one parcel.
    pub async fn lookup(&self, comune: &str, foglio: &str, particella: &str) -> Result<Parcel> {
        let comune = normalize_code(comune);
        let shard = self.resolver.resolve(&comune).await?;
        self.engine
            .lookup_parcel(&shard, &comune, foglio, particella)
            .await
    }

    /// Municipalities whose name contains `query`, case-insensitively.
    pub fn search_comuni(&self, query: &str, limit: Option<usize>) -> Vec<ComuneMatch> {
        let limit = self
            .config
            .effective_limit(limit, self.config.default_search_limit);
        self.catalog.search_by_name(query, limit)
    }

    /// Columns of the shard holding `codice_comune`.
    pub async fn schema_regione(&self, codice_comune: &str) -> Result<Vec<ColumnDescription>> {
        let shard = self.resolver.resolve(codice_comune).await?;
        self.engine.describe_shard_schema(&shard).await
    }

    pub async fn check_duplicati(
        &self,
        codice_comune: &str,
        limit: Option<usize>,
    ) -> Result<Vec<DuplicateGroup>> {
        let limit = self
            .config
            .effective_limit(limit, self.config.default_duplicate_limit);
        let shard = self.resolver.resolve(codice_comune).await?;
        self.duplicates
            .find_duplicates(&shard, codice_comune, limit)
            .await
    }

    pub async fn check_duplicati_numeric(
        &self,
        codice_comune: &str,
        limit: Option<usize>,
    ) -> Result<Vec<DuplicateGroup>> {
        let limit = self
            .config
            .effective_limit(limit, self.config.default_numeric_duplicate_limit);
        let shard = self.resolver.resolve(codice_comune).await?;
        self.duplicates
            .find_numeric_duplicates(&shard, codice_comune, limit)
            .await
    }

    pub fn status(&self) -> ServiceStatus {
        ServiceStatus {
            ok: true,
            catalog_entries: self.catalog.len(),
            cached_shards: self.resolver.cached_len(),
        }
    }

    pub fn catalog(&self) -> &IndexCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &LookupConfig {
        &self.config
    }
}
