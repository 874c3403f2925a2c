//! Columnar batch format for shard data.
//!
//! A `ColumnBatch` holds one decoded row group (or a slice of one) with a
//! shared `BatchSchema`. Columns are addressed by name; shard files are plain
//! Parquet without embedded field IDs.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{Result, TabularError};
use crate::value::ScalarValue;

/// Tabular field types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Boolean,
    Int32,
    Int64,
    Float32,
    Float64,
    String,
    Bytes,
    Date,
    Timestamp,
    TimestampTz,
    Decimal { precision: u8, scale: i8 },
}

impl FieldType {
    /// SQL type name as reported by `DESCRIBE` in DuckDB.
    pub fn sql_name(&self) -> String {
        match self {
            Self::Boolean => "BOOLEAN".to_string(),
            Self::Int32 => "INTEGER".to_string(),
            Self::Int64 => "BIGINT".to_string(),
            Self::Float32 => "FLOAT".to_string(),
            Self::Float64 => "DOUBLE".to_string(),
            Self::String => "VARCHAR".to_string(),
            Self::Bytes => "BLOB".to_string(),
            Self::Date => "DATE".to_string(),
            Self::Timestamp => "TIMESTAMP".to_string(),
            Self::TimestampTz => "TIMESTAMP WITH TIME ZONE".to_string(),
            Self::Decimal { precision, scale } => format!("DECIMAL({},{})", precision, scale),
        }
    }

    /// Whether values of this type can take part in arithmetic projections.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Self::Int32 | Self::Int64 | Self::Float32 | Self::Float64 | Self::Decimal { .. }
        )
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql_name())
    }
}

/// Field information for a column in a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldInfo {
    /// Column name as stored in the file.
    pub name: String,
    /// Field type.
    pub field_type: FieldType,
    /// Whether the field allows nulls.
    pub nullable: bool,
}

impl FieldInfo {
    pub fn new(name: impl Into<String>, field_type: FieldType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            field_type,
            nullable,
        }
    }
}

/// Schema for a column batch.
#[derive(Debug, Clone)]
pub struct BatchSchema {
    /// Field definitions in column order.
    pub fields: Vec<FieldInfo>,
    name_to_index: HashMap<String, usize>,
}

impl BatchSchema {
    /// Create a new batch schema from field definitions.
    ///
    /// If two fields share a name, lookups resolve to the first one.
    pub fn new(fields: Vec<FieldInfo>) -> Self {
        let mut name_to_index = HashMap::with_capacity(fields.len());
        for (i, f) in fields.iter().enumerate() {
            name_to_index.entry(f.name.clone()).or_insert(i);
        }
        Self {
            fields,
            name_to_index,
        }
    }

    #[inline]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    pub fn field(&self, name: &str) -> Option<&FieldInfo> {
        self.index_of(name).map(|i| &self.fields[i])
    }

    #[inline]
    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.fields.iter().map(|f| f.name.as_str())
    }
}

/// Column storage - typed arrays with optional values (nullable).
#[derive(Debug, Clone)]
pub enum Column {
    Boolean(Vec<Option<bool>>),
    Int32(Vec<Option<i32>>),
    Int64(Vec<Option<i64>>),
    Float32(Vec<Option<f32>>),
    Float64(Vec<Option<f64>>),
    String(Vec<Option<String>>),
    Bytes(Vec<Option<Vec<u8>>>),
    /// Date: days since 1970-01-01
    Date(Vec<Option<i32>>),
    /// Timestamp: microseconds since epoch
    Timestamp(Vec<Option<i64>>),
    /// TimestampTz: microseconds since epoch (UTC)
    TimestampTz(Vec<Option<i64>>),
    /// Decimal: unscaled values with the schema's precision/scale
    Decimal {
        values: Vec<Option<i128>>,
        precision: u8,
        scale: i8,
    },
}

impl Column {
    /// Create an empty column with pre-allocated capacity.
    pub fn with_capacity(field_type: FieldType, capacity: usize) -> Self {
        match field_type {
            FieldType::Boolean => Self::Boolean(Vec::with_capacity(capacity)),
            FieldType::Int32 => Self::Int32(Vec::with_capacity(capacity)),
            FieldType::Int64 => Self::Int64(Vec::with_capacity(capacity)),
            FieldType::Float32 => Self::Float32(Vec::with_capacity(capacity)),
            FieldType::Float64 => Self::Float64(Vec::with_capacity(capacity)),
            FieldType::String => Self::String(Vec::with_capacity(capacity)),
            FieldType::Bytes => Self::Bytes(Vec::with_capacity(capacity)),
            FieldType::Date => Self::Date(Vec::with_capacity(capacity)),
            FieldType::Timestamp => Self::Timestamp(Vec::with_capacity(capacity)),
            FieldType::TimestampTz => Self::TimestampTz(Vec::with_capacity(capacity)),
            FieldType::Decimal { precision, scale } => Self::Decimal {
                values: Vec::with_capacity(capacity),
                precision,
                scale,
            },
        }
    }

    /// Get the number of rows in this column.
    #[inline]
    pub fn len(&self) -> usize {
        match self {
            Self::Boolean(v) => v.len(),
            Self::Int32(v) | Self::Date(v) => v.len(),
            Self::Int64(v) | Self::Timestamp(v) | Self::TimestampTz(v) => v.len(),
            Self::Float32(v) => v.len(),
            Self::Float64(v) => v.len(),
            Self::String(v) => v.len(),
            Self::Bytes(v) => v.len(),
            Self::Decimal { values, .. } => values.len(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the field type of this column.
    pub fn field_type(&self) -> FieldType {
        match self {
            Self::Boolean(_) => FieldType::Boolean,
            Self::Int32(_) => FieldType::Int32,
            Self::Int64(_) => FieldType::Int64,
            Self::Float32(_) => FieldType::Float32,
            Self::Float64(_) => FieldType::Float64,
            Self::String(_) => FieldType::String,
            Self::Bytes(_) => FieldType::Bytes,
            Self::Date(_) => FieldType::Date,
            Self::Timestamp(_) => FieldType::Timestamp,
            Self::TimestampTz(_) => FieldType::TimestampTz,
            Self::Decimal {
                precision, scale, ..
            } => FieldType::Decimal {
                precision: *precision,
                scale: *scale,
            },
        }
    }

    /// Read the value at `idx` as an owned scalar.
    ///
    /// Out-of-range indices read as NULL. Decimals are scaled to floats;
    /// dates and timestamps surface as their integer encodings.
    pub fn value(&self, idx: usize) -> ScalarValue {
        let value = match self {
            Self::Boolean(v) => v.get(idx).copied().flatten().map(ScalarValue::Boolean),
            Self::Int32(v) | Self::Date(v) => v
                .get(idx)
                .copied()
                .flatten()
                .map(|i| ScalarValue::Int(i as i64)),
            Self::Int64(v) | Self::Timestamp(v) | Self::TimestampTz(v) => {
                v.get(idx).copied().flatten().map(ScalarValue::Int)
            }
            Self::Float32(v) => v
                .get(idx)
                .copied()
                .flatten()
                .map(|f| ScalarValue::Float(f as f64)),
            Self::Float64(v) => v.get(idx).copied().flatten().map(ScalarValue::Float),
            Self::String(v) => v
                .get(idx)
                .and_then(|s| s.as_ref())
                .map(|s| ScalarValue::Text(s.clone())),
            Self::Bytes(v) => v
                .get(idx)
                .and_then(|b| b.as_ref())
                .map(|b| ScalarValue::Bytes(b.clone())),
            Self::Decimal { values, scale, .. } => values
                .get(idx)
                .copied()
                .flatten()
                .map(|unscaled| ScalarValue::Float(unscaled as f64 / 10f64.powi(*scale as i32))),
        };
        value.unwrap_or(ScalarValue::Null)
    }

    /// Check if value at index is null.
    #[inline]
    pub fn is_null(&self, idx: usize) -> bool {
        self.value(idx).is_null()
    }

    /// Get string value at index (returns None if wrong type or null).
    #[inline]
    pub fn get_string(&self, idx: usize) -> Option<&str> {
        match self {
            Self::String(v) => v.get(idx).and_then(|v| v.as_deref()),
            _ => None,
        }
    }

    /// Filter column by row indices, returning a new column with only those rows.
    pub fn filter_by_indices(&self, indices: &[usize]) -> Self {
        match self {
            Self::Boolean(v) => Self::Boolean(indices.iter().map(|&i| v[i]).collect()),
            Self::Int32(v) => Self::Int32(indices.iter().map(|&i| v[i]).collect()),
            Self::Int64(v) => Self::Int64(indices.iter().map(|&i| v[i]).collect()),
            Self::Float32(v) => Self::Float32(indices.iter().map(|&i| v[i]).collect()),
            Self::Float64(v) => Self::Float64(indices.iter().map(|&i| v[i]).collect()),
            Self::String(v) => Self::String(indices.iter().map(|&i| v[i].clone()).collect()),
            Self::Bytes(v) => Self::Bytes(indices.iter().map(|&i| v[i].clone()).collect()),
            Self::Date(v) => Self::Date(indices.iter().map(|&i| v[i]).collect()),
            Self::Timestamp(v) => Self::Timestamp(indices.iter().map(|&i| v[i]).collect()),
            Self::TimestampTz(v) => Self::TimestampTz(indices.iter().map(|&i| v[i]).collect()),
            Self::Decimal {
                values,
                precision,
                scale,
            } => Self::Decimal {
                values: indices.iter().map(|&i| values[i]).collect(),
                precision: *precision,
                scale: *scale,
            },
        }
    }
}

/// Columnar batch.
#[derive(Debug, Clone)]
pub struct ColumnBatch {
    /// Schema for this batch.
    pub schema: Arc<BatchSchema>,
    /// Column data in schema order.
    pub columns: Vec<Column>,
    /// Number of rows in the batch.
    pub num_rows: usize,
}

impl ColumnBatch {
    /// Create a new column batch.
    pub fn new(schema: Arc<BatchSchema>, columns: Vec<Column>) -> Result<Self> {
        if columns.len() != schema.num_fields() {
            return Err(TabularError::Schema(format!(
                "Column count mismatch: schema has {} fields, got {} columns",
                schema.num_fields(),
                columns.len()
            )));
        }

        let num_rows = columns.first().map_or(0, |c| c.len());

        for (i, col) in columns.iter().enumerate() {
            if col.len() != num_rows {
                return Err(TabularError::Schema(format!(
                    "Row count mismatch: column {} has {} rows, expected {}",
                    i,
                    col.len(),
                    num_rows
                )));
            }
        }

        Ok(Self {
            schema,
            columns,
            num_rows,
        })
    }

    /// Create an empty batch with the given schema.
    pub fn empty(schema: Arc<BatchSchema>) -> Self {
        let columns = schema
            .fields
            .iter()
            .map(|f| Column::with_capacity(f.field_type, 0))
            .collect();
        Self {
            schema,
            columns,
            num_rows: 0,
        }
    }

    #[inline]
    pub fn column_by_name(&self, name: &str) -> Option<&Column> {
        self.schema.index_of(name).map(|i| &self.columns[i])
    }

    #[inline]
    pub fn column(&self, index: usize) -> Option<&Column> {
        self.columns.get(index)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.num_rows == 0
    }

    /// Value of column `name` at `row`. Unknown columns are an error, not NULL.
    pub fn value(&self, name: &str, row: usize) -> Result<ScalarValue> {
        self.column_by_name(name)
            .map(|c| c.value(row))
            .ok_or_else(|| TabularError::ColumnNotFound(name.to_string()))
    }

    /// Filter batch by row indices, returning a new batch with only those rows.
    pub fn filter_by_indices(&self, indices: &[usize]) -> Self {
        let columns = self
            .columns
            .iter()
            .map(|c| c.filter_by_indices(indices))
            .collect();
        Self {
            schema: Arc::clone(&self.schema),
            columns,
            num_rows: indices.len(),
        }
    }

    /// Project to a subset of columns by name, in the given order.
    pub fn project(&self, names: &[&str]) -> Result<Self> {
        let mut new_fields = Vec::with_capacity(names.len());
        let mut new_columns = Vec::with_capacity(names.len());

        for name in names {
            let idx = self
                .schema
                .index_of(name)
                .ok_or_else(|| TabularError::ColumnNotFound(name.to_string()))?;
            new_fields.push(self.schema.fields[idx].clone());
            new_columns.push(self.columns[idx].clone());
        }

        Ok(Self {
            schema: Arc::new(BatchSchema::new(new_fields)),
            columns: new_columns,
            num_rows: self.num_rows,
        })
    }

    pub fn row_indices(&self) -> impl Iterator<Item = usize> {
        0..self.num_rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_schema() -> Arc<BatchSchema> {
        Arc::new(BatchSchema::new(vec![
            FieldInfo::new("comune", FieldType::String, false),
            FieldInfo::new("x", FieldType::Int64, true),
            FieldInfo::new("attivo", FieldType::Boolean, true),
        ]))
    }

    fn sample_batch() -> ColumnBatch {
        ColumnBatch::new(
            sample_schema(),
            vec![
                Column::String(vec![
                    Some("H501".to_string()),
                    Some("F205".to_string()),
                    Some("L219".to_string()),
                ]),
                Column::Int64(vec![Some(12_496_000), None, Some(7_686_000)]),
                Column::Boolean(vec![Some(true), Some(false), None]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_schema_lookup() {
        let schema = sample_schema();
        assert_eq!(schema.index_of("comune"), Some(0));
        assert_eq!(schema.index_of("attivo"), Some(2));
        assert_eq!(schema.index_of("foglio"), None);
        assert_eq!(
            schema.field_names().collect::<Vec<_>>(),
            vec!["comune", "x", "attivo"]
        );
    }

    #[test]
    fn test_duplicate_field_names_resolve_to_first() {
        let schema = BatchSchema::new(vec![
            FieldInfo::new("a", FieldType::Int32, false),
            FieldInfo::new("a", FieldType::String, false),
        ]);
        assert_eq!(schema.field("a").unwrap().field_type, FieldType::Int32);
    }

    #[test]
    fn test_column_count_mismatch() {
        let err = ColumnBatch::new(sample_schema(), vec![Column::Int64(vec![])]).unwrap_err();
        assert!(matches!(err, TabularError::Schema(_)));
    }

    #[test]
    fn test_row_count_mismatch() {
        let err = ColumnBatch::new(
            sample_schema(),
            vec![
                Column::String(vec![Some("H501".to_string())]),
                Column::Int64(vec![]),
                Column::Boolean(vec![Some(true)]),
            ],
        )
        .unwrap_err();
        assert!(err.to_string().contains("Row count mismatch"));
    }

    #[test]
    fn test_value_access() {
        let batch = sample_batch();
        assert_eq!(batch.num_rows, 3);
        assert_eq!(batch.value("comune", 0).unwrap(), ScalarValue::text("H501"));
        assert_eq!(batch.value("x", 0).unwrap(), ScalarValue::Int(12_496_000));
        assert!(batch.value("x", 1).unwrap().is_null());
        assert!(batch.column_by_name("attivo").unwrap().is_null(2));
        assert!(matches!(
            batch.value("foglio", 0),
            Err(TabularError::ColumnNotFound(_))
        ));
    }

    #[test]
    fn test_filter_by_indices() {
        let filtered = sample_batch().filter_by_indices(&[0, 2]);
        assert_eq!(filtered.num_rows, 2);
        assert_eq!(
            filtered.column_by_name("comune").unwrap().get_string(1),
            Some("L219")
        );
    }

    #[test]
    fn test_project() {
        let projected = sample_batch().project(&["x", "comune"]).unwrap();
        assert_eq!(
            projected.schema.field_names().collect::<Vec<_>>(),
            vec!["x", "comune"]
        );
        assert!(projected.column_by_name("attivo").is_none());
        assert!(sample_batch().project(&["missing"]).is_err());
    }

    #[test]
    fn test_decimal_value_is_scaled() {
        let col = Column::Decimal {
            values: vec![Some(12345)],
            precision: 7,
            scale: 2,
        };
        assert_eq!(col.value(0), ScalarValue::Float(123.45));
    }

    #[test]
    fn test_sql_names() {
        assert_eq!(FieldType::String.sql_name(), "VARCHAR");
        assert_eq!(FieldType::Int64.sql_name(), "BIGINT");
        assert_eq!(
            FieldType::Decimal {
                precision: 10,
                scale: 2
            }
            .sql_name(),
            "DECIMAL(10,2)"
        );
    }
}
