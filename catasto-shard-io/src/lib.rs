//! Remote shard access for catasto lookups.
//!
//! This crate reads plain Parquet files from an HTTP host using range
//! requests only:
//!
//! - [`io::storage`] - `ShardStorage` trait, HTTP and in-memory storages
//! - [`io::parquet`] - footer reading, footer cache and projected scans
//! - [`io::chunk_reader`] - parquet `ChunkReader` over prefetched ranges
//! - [`scan`] - scan requests, filter expressions and row-group pruning
//!
//! # Example
//!
//! ```ignore
//! let storage = HttpStorage::new(HttpStorageConfig {
//!     base_url: "https://example.org/anagrafica/".to_string(),
//!     ..Default::default()
//! })?;
//! let cache = ParquetFooterCache::default();
//! let reader = ShardReader::with_cache(&storage, &cache);
//!
//! let request = ScanRequest::new(["foglio", "particella"])
//!     .with_filter(Expression::eq("comune", ScalarValue::text("H501")));
//! let batches = reader.scan("lazio.parquet", &request).await?;
//! ```

pub mod error;
#[cfg(any(test, feature = "test-support"))]
pub mod fixture;
pub mod io;
pub mod scan;

pub use error::{Result, ShardIoError};
pub use io::{
    CountingStorage, HttpStorage, HttpStorageConfig, MemoryStorage, ParquetFooterCache,
    ShardReader, ShardStorage,
};
pub use scan::{ComparisonOp, Expression, ScanRequest};
