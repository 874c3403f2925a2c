//! Scan requests against a single shard file.
//!
//! This module provides:
//! - [`predicate`] - Filter expression types for pushdown and row filtering
//! - [`pruning`] - Row-group pruning using column statistics

pub mod predicate;
pub mod pruning;

pub use predicate::{ComparisonOp, Expression};

/// What to read from a shard: which columns, which rows, and how many.
#[derive(Debug, Clone)]
pub struct ScanRequest {
    /// Output columns in order. Empty means every top-level column.
    pub columns: Vec<String>,
    /// Row filter. Columns it references are decoded even if not output.
    pub filter: Expression,
    /// Stop after this many matching rows.
    pub limit: Option<usize>,
}

impl ScanRequest {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            filter: Expression::AlwaysTrue,
            limit: None,
        }
    }

    /// Scan every column with no filter.
    pub fn all_columns() -> Self {
        Self::new(Vec::<String>::new())
    }

    pub fn with_filter(mut self, filter: Expression) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

impl Default for ScanRequest {
    fn default() -> Self {
        Self::all_columns()
    }
}
