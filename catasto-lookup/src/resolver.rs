//! Memoized code-to-shard resolution.
//!
//! The cache starts empty, fills lazily and is never evicted. Municipality
//! codes are a small fixed set (a few thousand), so its size stays bounded
//! for the life of the process. Entries are not refreshed if the index
//! changes upstream.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::catalog::ShardDirectory;
use crate::error::{LookupError, Result};
use crate::shard::ShardFile;

/// Normalize a caller-supplied municipality code: trimmed and uppercased.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Caching resolver over a [`ShardDirectory`].
#[derive(Debug)]
pub struct ShardResolver<D> {
    directory: D,
    cache: RwLock<HashMap<String, ShardFile>>,
}

impl<D: ShardDirectory> ShardResolver<D> {
    pub fn new(directory: D) -> Self {
        Self {
            directory,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve a municipality code to its shard.
    ///
    /// Concurrent misses on the same code may each consult the directory;
    /// they all insert the same value.
    pub async fn resolve(&self, code: &str) -> Result<ShardFile> {
        let code = normalize_code(code);
        if code.is_empty() {
            return Err(LookupError::NotFoundComune);
        }

        let cached = self.cache.read().get(&code).cloned();
        if let Some(shard) = cached {
            tracing::debug!(comune = %code, shard = %shard, "shard cache hit");
            return Ok(shard);
        }

        // Lock released across the directory call.
        let shard = self
            .directory
            .lookup_shard(&code)
            .await?
            .ok_or(LookupError::NotFoundComune)?;

        tracing::debug!(comune = %code, shard = %shard, "shard cache miss, resolved");
        self.cache.write().insert(code, shard.clone());
        Ok(shard)
    }

    /// Number of cached codes.
    pub fn cached_len(&self) -> usize {
        self.cache.read().len()
    }

    pub fn directory(&self) -> &D {
        &self.directory
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{IndexCatalog, IndexEntry};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Directory double that counts lookups.
    struct CountingDirectory {
        catalog: IndexCatalog,
        lookups: AtomicUsize,
    }

    impl CountingDirectory {
        fn new() -> Self {
            let entry = |code: &str, file: &str| IndexEntry {
                code: code.to_string(),
                name: None,
                shard: ShardFile::from_catalog(file).unwrap(),
            };
            Self {
                catalog: IndexCatalog::from_entries(vec![
                    entry("H501", "lazio.parquet"),
                    entry("F205", "lombardia.parquet"),
                ]),
                lookups: AtomicUsize::new(0),
            }
        }

        fn lookups(&self) -> usize {
            self.lookups.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ShardDirectory for CountingDirectory {
        async fn lookup_shard(&self, code: &str) -> Result<Option<ShardFile>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.catalog.lookup_shard(code).await
        }
    }

    #[tokio::test]
    async fn test_second_resolve_is_cache_hit() {
        let resolver = ShardResolver::new(CountingDirectory::new());

        let first = resolver.resolve("H501").await.unwrap();
        let second = resolver.resolve("H501").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.as_str(), "lazio.parquet");
        assert_eq!(resolver.directory().lookups(), 1);
        assert_eq!(resolver.cached_len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_normalizes_code() {
        let resolver = ShardResolver::new(CountingDirectory::new());

        let padded = resolver.resolve(" h501 ").await.unwrap();
        let exact = resolver.resolve("H501").await.unwrap();

        assert_eq!(padded, exact);
        assert_eq!(resolver.directory().lookups(), 1);
    }

    #[tokio::test]
    async fn test_unknown_codes_are_not_cached() {
        let resolver = ShardResolver::new(CountingDirectory::new());

        for code in ["Z999", "Z999", "", "   ", "H501' OR '1'='1"] {
            let err = resolver.resolve(code).await.unwrap_err();
            assert!(matches!(err, LookupError::NotFoundComune));
        }
        assert_eq!(resolver.cached_len(), 0);
        // Empty codes never reach the directory.
        assert_eq!(resolver.directory().lookups(), 3);
    }

    #[tokio::test]
    async fn test_concurrent_resolves_agree() {
        let resolver = Arc::new(ShardResolver::new(CountingDirectory::new()));

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let resolver = Arc::clone(&resolver);
                let code = if i % 2 == 0 { "H501" } else { "f205" };
                tokio::spawn(async move { resolver.resolve(code).await })
            })
            .collect();

        for (i, handle) in handles.into_iter().enumerate() {
            let shard = handle.await.unwrap().unwrap();
            let expected = if i % 2 == 0 {
                "lazio.parquet"
            } else {
                "lombardia.parquet"
            };
            assert_eq!(shard.as_str(), expected);
        }
        assert_eq!(resolver.cached_len(), 2);
        assert!(resolver.directory().lookups() <= 16);
    }
}
