//! In-memory Parquet fixtures for tests.
//!
//! Builds small shard files with the `parquet` writer so tests can serve them
//! from `MemoryStorage`. All columns are OPTIONAL, as DuckDB writes them.
//!
//! ```ignore
//! let bytes = ParquetFixture::new()
//!     .utf8("comune", &["H501", "H501"])
//!     .int64("x", &[12_496_000, 12_497_000])
//!     .row_group_size(1)
//!     .build()?;
//! ```

use std::ops::Range;
use std::sync::Arc;

use bytes::Bytes;
use parquet::basic::{ConvertedType, LogicalType, Repetition, Type as PhysicalType};
use parquet::column::writer::ColumnWriter;
use parquet::data_type::ByteArray;
use parquet::errors::{ParquetError, Result};
use parquet::file::properties::WriterProperties;
use parquet::file::writer::SerializedFileWriter;
use parquet::schema::types::Type;

#[derive(Debug, Clone)]
enum FixtureData {
    Utf8(Vec<Option<String>>),
    Int32(Vec<Option<i32>>),
    Int64(Vec<Option<i64>>),
    Float64(Vec<Option<f64>>),
}

impl FixtureData {
    fn len(&self) -> usize {
        match self {
            Self::Utf8(v) => v.len(),
            Self::Int32(v) => v.len(),
            Self::Int64(v) => v.len(),
            Self::Float64(v) => v.len(),
        }
    }

    fn parquet_type(&self, name: &str) -> Result<Type> {
        let builder = match self {
            Self::Utf8(_) => Type::primitive_type_builder(name, PhysicalType::BYTE_ARRAY)
                .with_logical_type(Some(LogicalType::String))
                .with_converted_type(ConvertedType::UTF8),
            Self::Int32(_) => Type::primitive_type_builder(name, PhysicalType::INT32),
            Self::Int64(_) => Type::primitive_type_builder(name, PhysicalType::INT64),
            Self::Float64(_) => Type::primitive_type_builder(name, PhysicalType::DOUBLE),
        };
        builder.with_repetition(Repetition::OPTIONAL).build()
    }

    fn write(&self, writer: &mut ColumnWriter<'_>, rows: Range<usize>) -> Result<()> {
        match (self, writer) {
            (Self::Utf8(v), ColumnWriter::ByteArrayColumnWriter(w)) => {
                let (values, defs) = with_levels(&v[rows], |s| ByteArray::from(s.as_str()));
                w.write_batch(&values, Some(&defs), None)?;
            }
            (Self::Int32(v), ColumnWriter::Int32ColumnWriter(w)) => {
                let (values, defs) = with_levels(&v[rows], |x| *x);
                w.write_batch(&values, Some(&defs), None)?;
            }
            (Self::Int64(v), ColumnWriter::Int64ColumnWriter(w)) => {
                let (values, defs) = with_levels(&v[rows], |x| *x);
                w.write_batch(&values, Some(&defs), None)?;
            }
            (Self::Float64(v), ColumnWriter::DoubleColumnWriter(w)) => {
                let (values, defs) = with_levels(&v[rows], |x| *x);
                w.write_batch(&values, Some(&defs), None)?;
            }
            _ => {
                return Err(ParquetError::General(
                    "unexpected column writer type".to_string(),
                ))
            }
        }
        Ok(())
    }
}

/// Split optional values into present values and definition levels.
fn with_levels<T, U>(values: &[Option<T>], convert: impl Fn(&T) -> U) -> (Vec<U>, Vec<i16>) {
    let present = values.iter().flatten().map(convert).collect();
    let defs = values.iter().map(|v| i16::from(v.is_some())).collect();
    (present, defs)
}

/// Builder for an in-memory Parquet file.
#[derive(Debug, Clone, Default)]
pub struct ParquetFixture {
    columns: Vec<(String, FixtureData)>,
    row_group_size: Option<usize>,
}

impl ParquetFixture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn utf8(self, name: &str, values: &[&str]) -> Self {
        self.utf8_nullable(name, &values.iter().map(|v| Some(*v)).collect::<Vec<_>>())
    }

    pub fn utf8_nullable(mut self, name: &str, values: &[Option<&str>]) -> Self {
        let data = values.iter().map(|v| v.map(str::to_string)).collect();
        self.columns.push((name.to_string(), FixtureData::Utf8(data)));
        self
    }

    pub fn int32(mut self, name: &str, values: &[i32]) -> Self {
        let data = values.iter().copied().map(Some).collect();
        self.columns.push((name.to_string(), FixtureData::Int32(data)));
        self
    }

    pub fn int64(self, name: &str, values: &[i64]) -> Self {
        self.int64_nullable(name, &values.iter().copied().map(Some).collect::<Vec<_>>())
    }

    pub fn int64_nullable(mut self, name: &str, values: &[Option<i64>]) -> Self {
        self.columns
            .push((name.to_string(), FixtureData::Int64(values.to_vec())));
        self
    }

    pub fn float64(mut self, name: &str, values: &[f64]) -> Self {
        let data = values.iter().copied().map(Some).collect();
        self.columns.push((name.to_string(), FixtureData::Float64(data)));
        self
    }

    /// Split the rows into row groups of at most `rows` rows.
    pub fn row_group_size(mut self, rows: usize) -> Self {
        self.row_group_size = Some(rows.max(1));
        self
    }

    /// Write the file. Always writes at least one (possibly empty) row group.
    pub fn build(&self) -> Result<Bytes> {
        let num_rows = self.columns.first().map_or(0, |(_, data)| data.len());
        if let Some((name, _)) = self.columns.iter().find(|(_, d)| d.len() != num_rows) {
            return Err(ParquetError::General(format!(
                "column {} does not have {} rows",
                name, num_rows
            )));
        }

        let fields = self
            .columns
            .iter()
            .map(|(name, data)| data.parquet_type(name).map(Arc::new))
            .collect::<Result<Vec<_>>>()?;
        let schema = Arc::new(
            Type::group_type_builder("duckdb_schema")
                .with_fields(fields)
                .build()?,
        );
        let props = Arc::new(WriterProperties::builder().build());
        let group_size = self.row_group_size.unwrap_or(num_rows.max(1));

        let mut buf = Vec::new();
        {
            let mut writer = SerializedFileWriter::new(&mut buf, schema, props)?;
            let mut start = 0;
            loop {
                let end = (start + group_size).min(num_rows);
                let mut row_group_writer = writer.next_row_group()?;
                let mut col_idx = 0;
                while let Some(mut col_writer) = row_group_writer.next_column()? {
                    self.columns[col_idx]
                        .1
                        .write(col_writer.untyped(), start..end)?;
                    col_writer.close()?;
                    col_idx += 1;
                }
                row_group_writer.close()?;

                start = end;
                if start >= num_rows {
                    break;
                }
            }
            writer.close()?;
        }

        Ok(Bytes::from(buf))
    }
}
