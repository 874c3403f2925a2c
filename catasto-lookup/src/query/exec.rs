//! Query execution against Parquet shards.
//!
//! [`ParquetQueryExecutor`] runs a bound query as one projected scan followed
//! by in-process operators:
//!
//! ```text
//! scan (filter, pruning) -> project | group + COUNT(*) -> HAVING -> ORDER BY -> LIMIT
//! ```
//!
//! ORDER BY is a stable sort; without it rows keep file order, and groups
//! keep the order in which their first row was seen.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use catasto_shard_io::{ParquetFooterCache, ShardReader, ShardStorage};
use catasto_tabular::{ColumnBatch, ScalarValue};
use serde::Serialize;

use crate::error::{LookupError, Result};
use crate::query::builder::{BoundQuery, GroupBy, OrderBy, SelectItem, ShardQuery};
use crate::shard::ShardFile;

/// Column name and SQL type of one shard column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnDescription {
    pub column: String,
    #[serde(rename = "type")]
    pub data_type: String,
}

/// Rows produced by a query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<ScalarValue>>,
}

impl ResultSet {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Value at `row` of column `name`.
    pub fn get(&self, row: usize, name: &str) -> Option<&ScalarValue> {
        let index = self.column_index(name)?;
        self.rows.get(row)?.get(index)
    }

    /// Text form of a value; NULL and missing values are `None`.
    pub fn text(&self, row: usize, name: &str) -> Option<String> {
        self.get(row, name).and_then(ScalarValue::to_text)
    }
}

/// Runs bound shard queries.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, query: &BoundQuery<'_>) -> Result<ResultSet>;

    /// Column names and types of a shard, read from its footer.
    async fn describe(&self, shard: &ShardFile) -> Result<Vec<ColumnDescription>>;
}

/// Executes queries by range-reading Parquet shards.
#[derive(Debug)]
pub struct ParquetQueryExecutor {
    storage: Arc<dyn ShardStorage>,
    footer_cache: ParquetFooterCache,
    base_url: String,
    log_query_text: bool,
}

impl ParquetQueryExecutor {
    pub fn new(
        storage: Arc<dyn ShardStorage>,
        footer_cache_capacity: usize,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            footer_cache: ParquetFooterCache::new(footer_cache_capacity),
            base_url: base_url.into(),
            log_query_text: false,
        }
    }

    /// Log rendered SQL at debug level.
    pub fn with_query_text_logging(mut self, enabled: bool) -> Self {
        self.log_query_text = enabled;
        self
    }

    /// Reader sharing this executor's storage and footer cache.
    pub fn reader(&self) -> ShardReader<'_, dyn ShardStorage> {
        ShardReader::with_cache(&*self.storage, &self.footer_cache)
    }

    fn log_query(&self, query: &ShardQuery) {
        if self.log_query_text {
            tracing::debug!(sql = %query.to_sql(&self.base_url), "executing shard query");
        } else {
            tracing::debug!(
                shard = %query.source(),
                params = query.param_count(),
                "executing shard query"
            );
        }
    }
}

#[async_trait]
impl QueryExecutor for ParquetQueryExecutor {
    async fn execute(&self, bound: &BoundQuery<'_>) -> Result<ResultSet> {
        let query = bound.query;
        self.log_query(query);

        let batches = self
            .reader()
            .scan(query.source().as_str(), &bound.scan)
            .await?;

        let mut rows = match query.group_by() {
            Some(group) => group_rows(query.select(), group, &batches)?,
            None if query.order_by().is_empty() => {
                project_rows(query.select(), &batches, bound.limit)?
            }
            None => project_rows(query.select(), &batches, None)?,
        };

        if !query.order_by().is_empty() {
            let columns = query.output_columns();
            let keys = query
                .order_by()
                .iter()
                .map(|key| {
                    columns
                        .iter()
                        .position(|c| *c == key.column)
                        .map(|index| (index, key))
                        .ok_or_else(|| {
                            LookupError::query(format!("unknown ORDER BY column '{}'", key.column))
                        })
                })
                .collect::<Result<Vec<_>>>()?;
            rows.sort_by(|a, b| compare_rows(a, b, &keys));
        }

        if let Some(limit) = bound.limit {
            rows.truncate(limit);
        }

        Ok(ResultSet {
            columns: query.output_columns(),
            rows,
        })
    }

    async fn describe(&self, shard: &ShardFile) -> Result<Vec<ColumnDescription>> {
        let schema = self.reader().schema(shard.as_str()).await?;
        Ok(schema
            .fields
            .iter()
            .map(|field| ColumnDescription {
                column: field.name.clone(),
                data_type: field.field_type.sql_name(),
            })
            .collect())
    }
}

/// Evaluate the SELECT list row by row, stopping at `limit` rows.
fn project_rows(
    select: &[SelectItem],
    batches: &[ColumnBatch],
    limit: Option<usize>,
) -> Result<Vec<Vec<ScalarValue>>> {
    let mut rows = Vec::new();
    for batch in batches {
        for row in batch.row_indices() {
            if limit.is_some_and(|n| rows.len() >= n) {
                return Ok(rows);
            }
            let values = select
                .iter()
                .map(|item| select_value(item, batch, row))
                .collect::<Result<Vec<_>>>()?;
            rows.push(values);
        }
    }
    Ok(rows)
}

fn select_value(item: &SelectItem, batch: &ColumnBatch, row: usize) -> Result<ScalarValue> {
    match item {
        SelectItem::Column(name) => batch
            .value(name, row)
            .map_err(|e| LookupError::query(e.to_string())),
        SelectItem::Scaled {
            column, divisor, ..
        } => {
            let value = batch
                .value(column, row)
                .map_err(|e| LookupError::query(e.to_string()))?;
            if value.is_null() {
                return Ok(ScalarValue::Null);
            }
            value
                .as_f64()
                .map(|v| ScalarValue::Float(v / divisor))
                .ok_or_else(|| {
                    LookupError::query(format!(
                        "cannot divide non-numeric value {} of column '{}'",
                        value, column
                    ))
                })
        }
        SelectItem::CountStar { .. } => Err(LookupError::query("COUNT(*) outside GROUP BY")),
    }
}

/// Group rows by key and count them, applying HAVING.
fn group_rows(
    select: &[SelectItem],
    group: &GroupBy,
    batches: &[ColumnBatch],
) -> Result<Vec<Vec<ScalarValue>>> {
    // Key columns hold one type each, so text forms identify values.
    let mut index: HashMap<Vec<Option<String>>, usize> = HashMap::new();
    let mut groups: Vec<(Vec<ScalarValue>, u64)> = Vec::new();

    for batch in batches {
        for row in batch.row_indices() {
            let key = group
                .keys
                .iter()
                .map(|k| batch.value(k, row).map_err(|e| LookupError::query(e.to_string())))
                .collect::<Result<Vec<_>>>()?;
            let hash_key: Vec<Option<String>> = key.iter().map(ScalarValue::to_text).collect();

            match index.get(&hash_key) {
                Some(&i) => groups[i].1 += 1,
                None => {
                    index.insert(hash_key, groups.len());
                    groups.push((key, 1));
                }
            }
        }
    }

    let min_count = group.having_count_gt;
    groups
        .into_iter()
        .filter(|(_, count)| min_count.map_or(true, |n| *count > n))
        .map(|(key, count)| {
            select
                .iter()
                .map(|item| match item {
                    SelectItem::Column(name) => group
                        .keys
                        .iter()
                        .position(|k| k == name)
                        .map(|i| key[i].clone())
                        .ok_or_else(|| {
                            LookupError::query(format!("'{}' is not a group key", name))
                        }),
                    SelectItem::CountStar { .. } => Ok(ScalarValue::Int(count as i64)),
                    other => Err(LookupError::query(format!(
                        "'{}' is not allowed in a grouped query",
                        other
                    ))),
                })
                .collect::<Result<Vec<_>>>()
        })
        .collect()
}

/// ORDER BY comparison. NULLs sort last in both directions.
fn compare_rows(a: &[ScalarValue], b: &[ScalarValue], keys: &[(usize, &OrderBy)]) -> Ordering {
    for (index, key) in keys {
        let (x, y) = (&a[*index], &b[*index]);
        let ordering = match (x.is_null(), y.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) if key.descending => y.sort_cmp(x),
            (false, false) => x.sort_cmp(y),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}
