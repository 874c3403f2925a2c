//! Italian cadastral parcel lookup over remote Parquet shards.
//!
//! A global index maps each municipality code (`comune`) to the regional
//! shard holding its parcels. Lookups resolve the shard once, cache the
//! resolution, then range-read only what a query needs from the shard.
//!
//! - [`catalog`] - the in-memory global index and name search
//! - [`resolver`] - memoized code-to-shard resolution
//! - [`query`] - parameterized shard queries and their executor
//! - [`parcel`] - parcel lookup and schema description
//! - [`duplicates`] - duplicate (foglio, particella) scans
//! - [`service`] - the facade the HTTP layer calls
//!
//! # Example
//!
//! ```ignore
//! let config = LookupConfig::default();
//! init_logging(&TelemetryConfig::with_settings(&config.telemetry));
//!
//! let service = CatastoService::connect(&config).await?;
//! let parcel = service.lookup("H501", "12", "45").await?;
//! println!("{:?} {:?}", parcel.lon, parcel.lat);
//! ```

pub mod catalog;
pub mod config;
pub mod duplicates;
pub mod error;
pub mod parcel;
pub mod query;
pub mod resolver;
pub mod service;
pub mod shard;
pub mod telemetry;

pub use catalog::{ComuneMatch, IndexCatalog, IndexEntry, ShardDirectory};
pub use config::LookupConfig;
pub use duplicates::{DuplicateGroup, DuplicateScanner};
pub use error::{ErrorKind, ErrorResponse, LookupError, Result};
pub use parcel::{Parcel, QueryEngine};
pub use query::{ColumnDescription, ParquetQueryExecutor, QueryExecutor, ResultSet, ShardQuery};
pub use resolver::{normalize_code, ShardResolver};
pub use service::{CatastoService, ServiceStatus};
pub use shard::ShardFile;
pub use telemetry::{init_logging, TelemetryConfig, TelemetrySettings};
