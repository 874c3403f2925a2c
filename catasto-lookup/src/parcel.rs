//! Parcel lookup and shard schema description.

use std::sync::Arc;

use catasto_tabular::ScalarValue;
use serde::Serialize;

use crate::error::{LookupError, Result};
use crate::query::{ColumnDescription, Param, QueryExecutor, QueryFilter, SelectItem, ShardQuery};
use crate::resolver::normalize_code;
use crate::shard::ShardFile;

/// Stored coordinates are integer micro-degrees.
pub const COORDINATE_SCALE: f64 = 1_000_000.0;

/// A single cadastral parcel with WGS84 coordinates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Parcel {
    pub localid: Option<String>,
    pub comune: Option<String>,
    pub foglio: Option<String>,
    pub particella: Option<String>,
    pub lon: Option<f64>,
    pub lat: Option<f64>,
}

/// Runs parcel lookups and schema probes.
#[derive(Clone)]
pub struct QueryEngine {
    executor: Arc<dyn QueryExecutor>,
}

impl QueryEngine {
    pub fn new(executor: Arc<dyn QueryExecutor>) -> Self {
        Self { executor }
    }

    /// Find the first parcel matching comune, foglio and particella.
    ///
    /// The code is normalized like the resolver does; sheet and parcel are
    /// trimmed. All three reach the scan as bound values only.
    pub async fn lookup_parcel(
        &self,
        shard: &ShardFile,
        comune: &str,
        foglio: &str,
        particella: &str,
    ) -> Result<Parcel> {
        let query = parcel_query(shard)?;
        let bound = query.bind(vec![
            ScalarValue::text(normalize_code(comune)),
            ScalarValue::text(foglio.trim()),
            ScalarValue::text(particella.trim()),
        ])?;

        let rows = self.executor.execute(&bound).await?;
        if rows.is_empty() {
            return Err(LookupError::NotFoundParticella);
        }

        let float = |name: &str| rows.get(0, name).and_then(ScalarValue::as_f64);
        Ok(Parcel {
            localid: rows.text(0, "INSPIREID_LOCALID"),
            comune: rows.text(0, "comune"),
            foglio: rows.text(0, "foglio"),
            particella: rows.text(0, "particella"),
            lon: float("lon"),
            lat: float("lat"),
        })
    }

    /// Column names and types of a shard, without reading any rows.
    pub async fn describe_shard_schema(&self, shard: &ShardFile) -> Result<Vec<ColumnDescription>> {
        self.executor.describe(shard).await
    }
}

impl std::fmt::Debug for QueryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryEngine").finish_non_exhaustive()
    }
}

fn parcel_query(shard: &ShardFile) -> Result<ShardQuery> {
    ShardQuery::builder(shard.clone())
        .select_column("INSPIREID_LOCALID")
        .select_column("comune")
        .select_column("foglio")
        .select_column("particella")
        .select(SelectItem::scaled("x", COORDINATE_SCALE, "lon"))
        .select(SelectItem::scaled("y", COORDINATE_SCALE, "lat"))
        .filter(QueryFilter::eq("comune", Param::new(1)))
        .filter(QueryFilter::eq("foglio", Param::new(2)))
        .filter(QueryFilter::eq("particella", Param::new(3)))
        .limit(1)
        .build()
}
