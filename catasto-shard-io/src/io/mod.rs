//! IO module for shard file reading.
//!
//! This module provides:
//! - [`storage`] - Storage abstraction over HTTP range requests
//! - [`parquet`] - Range-read Parquet file reader
//! - [`chunk_reader`] - ChunkReader over prefetched byte ranges

pub mod chunk_reader;
pub mod parquet;
pub mod storage;

pub use chunk_reader::PrefetchedChunkReader;
pub use parquet::{ParquetFooterCache, ShardReader};
pub use storage::{CountingStorage, HttpStorage, HttpStorageConfig, MemoryStorage, ShardStorage};
