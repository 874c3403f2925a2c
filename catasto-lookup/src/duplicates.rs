//! Duplicate (foglio, particella) detection within one municipality.
//!
//! The plain scan orders groups by count, largest first. The numeric scan
//! only considers all-digit parcel numbers and orders by sheet and parcel
//! alone. Both orderings are part of the public behaviour.

use std::sync::Arc;

use catasto_tabular::ScalarValue;
use serde::Serialize;

use crate::error::{LookupError, Result};
use crate::query::{Param, QueryExecutor, QueryFilter, ResultSet, SelectItem, ShardQuery};
use crate::resolver::normalize_code;
use crate::shard::ShardFile;

/// Parcel numbers made only of ASCII digits.
pub const NUMERIC_PARTICELLA: &str = "^[0-9]+$";

/// A (foglio, particella) pair that occurs more than once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateGroup {
    pub foglio: Option<String>,
    pub particella: Option<String>,
    pub count: u64,
}

/// Read-only grouping scans over a shard.
#[derive(Clone)]
pub struct DuplicateScanner {
    executor: Arc<dyn QueryExecutor>,
}

impl DuplicateScanner {
    pub fn new(executor: Arc<dyn QueryExecutor>) -> Self {
        Self { executor }
    }

    /// Groups with more than one row, by count descending, then foglio and
    /// particella ascending.
    pub async fn find_duplicates(
        &self,
        shard: &ShardFile,
        comune: &str,
        limit: usize,
    ) -> Result<Vec<DuplicateGroup>> {
        let query = duplicates_query(shard, false)?;
        self.run(&query, comune, limit).await
    }

    /// Like [`find_duplicates`](Self::find_duplicates), restricted to numeric
    /// parcel numbers and ordered by foglio, particella only.
    pub async fn find_numeric_duplicates(
        &self,
        shard: &ShardFile,
        comune: &str,
        limit: usize,
    ) -> Result<Vec<DuplicateGroup>> {
        let query = duplicates_query(shard, true)?;
        self.run(&query, comune, limit).await
    }

    async fn run(
        &self,
        query: &ShardQuery,
        comune: &str,
        limit: usize,
    ) -> Result<Vec<DuplicateGroup>> {
        let limit = i64::try_from(limit)
            .map_err(|_| LookupError::query(format!("limit {} out of range", limit)))?;
        let bound = query.bind(vec![
            ScalarValue::text(normalize_code(comune)),
            ScalarValue::Int(limit),
        ])?;
        let rows = self.executor.execute(&bound).await?;
        to_groups(&rows)
    }
}

impl std::fmt::Debug for DuplicateScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuplicateScanner").finish_non_exhaustive()
    }
}

fn duplicates_query(shard: &ShardFile, numeric_only: bool) -> Result<ShardQuery> {
    let mut builder = ShardQuery::builder(shard.clone())
        .select_column("foglio")
        .select_column("particella")
        .select(SelectItem::count_star("n"))
        .filter(QueryFilter::eq("comune", Param::new(1)));

    if numeric_only {
        builder = builder.filter(QueryFilter::matches("particella", NUMERIC_PARTICELLA));
    }

    builder = builder
        .group_by(["foglio", "particella"])
        .having_count_gt(1);

    if !numeric_only {
        builder = builder.order_by_desc("n");
    }

    builder
        .order_by("foglio")
        .order_by("particella")
        .limit_param(Param::new(2))
        .build()
}

fn to_groups(rows: &ResultSet) -> Result<Vec<DuplicateGroup>> {
    (0..rows.len())
        .map(|row| {
            let count = rows
                .get(row, "n")
                .and_then(ScalarValue::as_i64)
                .and_then(|n| u64::try_from(n).ok())
                .ok_or_else(|| LookupError::query("duplicate count missing from result"))?;
            Ok(DuplicateGroup {
                foglio: rows.text(row, "foglio"),
                particella: rows.text(row, "particella"),
                count,
            })
        })
        .collect()
}
