//! Parameterized queries over regional shards.
//!
//! - [`builder`] - `ShardQuery` construction, SQL rendering and binding
//! - [`exec`] - `QueryExecutor` trait and the Parquet-backed executor

pub mod builder;
pub mod exec;

pub use builder::{
    BoundQuery, GroupBy, Limit, OrderBy, Param, QueryFilter, SelectItem, ShardQuery,
    ShardQueryBuilder,
};
pub use exec::{ColumnDescription, ParquetQueryExecutor, QueryExecutor, ResultSet};
