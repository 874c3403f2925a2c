//! Global index of municipalities and their regional shards.
//!
//! The index file is read once at startup into memory. Each row maps a
//! cadastral municipality code (`comune`) to its Italian display name
//! (`DENOMINAZIONE_IT`) and the shard file holding its parcels (`file`).

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use catasto_shard_io::{ScanRequest, ShardReader, ShardStorage};
use serde::Serialize;

use crate::error::{LookupError, Result};
use crate::shard::ShardFile;

const CODE_COLUMN: &str = "comune";
const NAME_COLUMN: &str = "DENOMINAZIONE_IT";
const FILE_COLUMN: &str = "file";

/// One row of the global index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub code: String,
    pub name: Option<String>,
    pub shard: ShardFile,
}

/// Search hit, serialized with the public wire names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComuneMatch {
    pub nome: String,
    pub codice: String,
}

/// Source of code-to-shard resolutions.
///
/// Implemented by [`IndexCatalog`]; the resolver only depends on this trait.
#[async_trait]
pub trait ShardDirectory: Send + Sync {
    /// Look up the shard for an already normalized code.
    async fn lookup_shard(&self, code: &str) -> Result<Option<ShardFile>>;
}

#[async_trait]
impl<T: ShardDirectory + ?Sized> ShardDirectory for Arc<T> {
    async fn lookup_shard(&self, code: &str) -> Result<Option<ShardFile>> {
        (**self).lookup_shard(code).await
    }
}

/// In-memory copy of the global index.
#[derive(Debug, Clone, Default)]
pub struct IndexCatalog {
    entries: Vec<IndexEntry>,
}

impl IndexCatalog {
    /// Read the index file through `reader`.
    ///
    /// Any failure here is fatal for the service. Rows with a NULL code or
    /// an unusable shard file are skipped.
    pub async fn load<S>(reader: &ShardReader<'_, S>, index_path: &str) -> Result<Self>
    where
        S: ShardStorage + ?Sized,
    {
        let started = Instant::now();
        let request = ScanRequest::new([CODE_COLUMN, NAME_COLUMN, FILE_COLUMN]);
        let batches = reader.scan(index_path, &request).await.map_err(|e| {
            LookupError::catalog_load(format!("failed to read index {}: {}", index_path, e))
        })?;

        let mut entries = Vec::new();
        let mut skipped = 0usize;
        for batch in &batches {
            for row in batch.row_indices() {
                let value = |column: &str| {
                    batch
                        .value(column, row)
                        .map(|v| v.to_text())
                        .map_err(|e| LookupError::catalog_load(e.to_string()))
                };

                let Some(code) = value(CODE_COLUMN)? else {
                    skipped += 1;
                    continue;
                };
                let name = value(NAME_COLUMN)?;
                let file = value(FILE_COLUMN)?.unwrap_or_default();

                match ShardFile::from_catalog(&file) {
                    Ok(shard) => entries.push(IndexEntry { code, name, shard }),
                    Err(reason) => {
                        tracing::warn!(comune = %code, reason = %reason, "skipping index row");
                        skipped += 1;
                    }
                }
            }
        }

        tracing::info!(
            index = %index_path,
            entries = entries.len(),
            skipped,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "loaded comune index"
        );
        Ok(Self { entries })
    }

    /// Build a catalog from rows already in memory.
    pub fn from_entries(entries: Vec<IndexEntry>) -> Self {
        Self { entries }
    }

    /// Shard for an exact code. The first row wins when the index repeats a code.
    pub fn resolve_shard(&self, code: &str) -> Option<&ShardFile> {
        self.entries
            .iter()
            .find(|entry| entry.code == code)
            .map(|entry| &entry.shard)
    }

    /// Case-insensitive substring search on display names.
    ///
    /// Hits are deduplicated on (name, code) and sorted by name, then code.
    /// An empty pattern matches every named entry.
    pub fn search_by_name(&self, pattern: &str, limit: usize) -> Vec<ComuneMatch> {
        let needle = pattern.to_lowercase();
        let mut seen = HashSet::new();
        let mut hits: Vec<ComuneMatch> = self
            .entries
            .iter()
            .filter_map(|entry| {
                let name = entry.name.as_deref()?;
                name.to_lowercase().contains(&needle).then(|| ComuneMatch {
                    nome: name.to_string(),
                    codice: entry.code.clone(),
                })
            })
            .filter(|hit| seen.insert((hit.nome.clone(), hit.codice.clone())))
            .collect();

        hits.sort_by(|a, b| a.nome.cmp(&b.nome).then_with(|| a.codice.cmp(&b.codice)));
        hits.truncate(limit);
        hits
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl ShardDirectory for IndexCatalog {
    async fn lookup_shard(&self, code: &str) -> Result<Option<ShardFile>> {
        Ok(self.resolve_shard(code).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catasto_shard_io::fixture::ParquetFixture;
    use catasto_shard_io::MemoryStorage;

    fn entry(code: &str, name: &str, file: &str) -> IndexEntry {
        IndexEntry {
            code: code.to_string(),
            name: Some(name.to_string()),
            shard: ShardFile::from_catalog(file).unwrap(),
        }
    }

    fn sample_catalog() -> IndexCatalog {
        IndexCatalog::from_entries(vec![
            entry("H501", "ROMA", "lazio.parquet"),
            entry("H536", "ROMENTINO", "piemonte.parquet"),
            entry("F205", "MILANO", "lombardia.parquet"),
            entry("H501", "ROMA", "lazio_bis.parquet"),
            entry("A001", "ABANO TERME", "veneto.parquet"),
        ])
    }

    #[test]
    fn test_resolve_first_match() {
        let catalog = sample_catalog();
        assert_eq!(catalog.resolve_shard("H501").unwrap().as_str(), "lazio.parquet");
        assert!(catalog.resolve_shard("h501").is_none());
        assert!(catalog.resolve_shard("Z999").is_none());
    }

    #[test]
    fn test_search_by_name() {
        let catalog = sample_catalog();
        let hits = catalog.search_by_name("rom", 5);
        assert_eq!(
            hits,
            vec![
                ComuneMatch {
                    nome: "ROMA".to_string(),
                    codice: "H501".to_string()
                },
                ComuneMatch {
                    nome: "ROMENTINO".to_string(),
                    codice: "H536".to_string()
                },
            ]
        );

        assert_eq!(catalog.search_by_name("ROM", 1).len(), 1);
        assert_eq!(catalog.search_by_name("", 100).len(), 4);
        assert!(catalog.search_by_name("xyz", 10).is_empty());
        assert!(catalog.search_by_name("rom", 0).is_empty());
    }

    #[tokio::test]
    async fn test_load_skips_bad_rows() {
        let bytes = ParquetFixture::new()
            .utf8_nullable("comune", &[Some("H501"), None, Some("X001"), Some("F205")])
            .utf8("DENOMINAZIONE_IT", &["ROMA", "NESSUNO", "MALE", "MILANO"])
            .utf8_nullable(
                "file",
                &[
                    Some("lazio.parquet"),
                    Some("x.parquet"),
                    Some("../evil.parquet"),
                    Some("lombardia.parquet"),
                ],
            )
            .build()
            .unwrap();
        let mut storage = MemoryStorage::new();
        storage.add_file("index.parquet", bytes);

        let catalog = IndexCatalog::load(&ShardReader::new(&storage), "index.parquet")
            .await
            .unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(
            catalog.resolve_shard("F205").unwrap().as_str(),
            "lombardia.parquet"
        );
        assert!(catalog.resolve_shard("X001").is_none());
    }

    #[tokio::test]
    async fn test_load_failures_are_catalog_errors() {
        let storage = MemoryStorage::new();
        let err = IndexCatalog::load(&ShardReader::new(&storage), "index.parquet")
            .await
            .unwrap_err();
        assert!(matches!(err, LookupError::CatalogLoad(_)));

        let bytes = ParquetFixture::new()
            .utf8("comune", &["H501"])
            .build()
            .unwrap();
        let mut storage = MemoryStorage::new();
        storage.add_file("index.parquet", bytes);
        let err = IndexCatalog::load(&ShardReader::new(&storage), "index.parquet")
            .await
            .unwrap_err();
        assert!(matches!(err, LookupError::CatalogLoad(_)));
    }
}
