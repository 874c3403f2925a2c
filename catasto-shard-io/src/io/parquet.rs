//! Range-read Parquet shard reader.
//!
//! This module reads shard files without downloading them:
//! 1. Range-read the 8-byte tail (footer length + magic), then the footer
//! 2. Parse the footer to get row group and column chunk info
//! 3. Prune row groups whose statistics rule out the scan filter
//! 4. Range-read only the projected column chunks of the surviving row groups
//! 5. Decode on a blocking thread and apply the residual filter
//!
//! # Footer Cache
//!
//! Footers are small (~KB) and every query against a shard needs one. An LRU
//! cache keyed by path and validated by file size avoids re-reading them.

use std::num::NonZeroUsize;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::try_join_all;
use lru::LruCache;
use parquet::basic::{ConvertedType, LogicalType, Repetition, Type as PhysicalType};
use parquet::file::metadata::{ParquetMetaData, ParquetMetaDataReader};
use parquet::file::reader::FileReader;
use parquet::file::serialized_reader::SerializedFileReader;
use parquet::record::reader::RowIter;
use parquet::record::Field;
use parquet::schema::types::Type as SchemaType;
use tokio::sync::Mutex;

use catasto_tabular::{BatchSchema, Column, ColumnBatch, FieldInfo, FieldType};

use crate::error::{Result, ShardIoError};
use crate::io::chunk_reader::PrefetchedChunkReader;
use crate::io::ShardStorage;
use crate::scan::{Expression, ScanRequest};

/// Parquet magic bytes (footer ends with "PAR1").
const PARQUET_MAGIC: [u8; 4] = [b'P', b'A', b'R', b'1'];

/// Ranges closer than this are fetched with one request.
const COALESCE_GAP: u64 = 64 * 1024;

/// A parsed footer together with the raw bytes it was parsed from.
#[derive(Debug)]
pub struct ShardFooter {
    /// File size when the footer was read.
    pub file_size: u64,
    /// Offset of the first footer byte.
    pub footer_start: u64,
    /// Footer, length and magic: `[footer_start, file_size)`.
    bytes: Bytes,
    pub metadata: Arc<ParquetMetaData>,
}

/// Footer cache for shard files.
#[derive(Debug)]
pub struct ParquetFooterCache {
    cache: Mutex<LruCache<String, Arc<ShardFooter>>>,
}

impl ParquetFooterCache {
    /// Create a new footer cache with the given capacity (at least 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
        }
    }

    /// Get cached footer, or None if not cached or file size changed.
    pub async fn get(&self, path: &str, file_size: u64) -> Option<Arc<ShardFooter>> {
        let mut cache = self.cache.lock().await;
        match cache.get(path) {
            Some(cached) if cached.file_size == file_size => Some(Arc::clone(cached)),
            _ => None,
        }
    }

    /// Cache a footer.
    pub async fn put(&self, path: String, footer: Arc<ShardFooter>) {
        self.cache.lock().await.put(path, footer);
    }

    /// Number of cached footers.
    pub async fn len(&self) -> usize {
        self.cache.lock().await.len()
    }
}

impl Default for ParquetFooterCache {
    fn default() -> Self {
        Self::new(64)
    }
}

/// Shard reader with range-read support.
pub struct ShardReader<'a, S: ShardStorage + ?Sized> {
    storage: &'a S,
    footer_cache: Option<&'a ParquetFooterCache>,
}

impl<'a, S: ShardStorage + ?Sized> ShardReader<'a, S> {
    /// Create a new reader without footer caching.
    pub fn new(storage: &'a S) -> Self {
        Self {
            storage,
            footer_cache: None,
        }
    }

    /// Create a reader with footer caching.
    pub fn with_cache(storage: &'a S, cache: &'a ParquetFooterCache) -> Self {
        Self {
            storage,
            footer_cache: Some(cache),
        }
    }

    /// Read the footer of `path` using range reads (or the cache).
    pub async fn read_footer(&self, path: &str) -> Result<Arc<ShardFooter>> {
        // Cached footers are validated against the current size, so the size
        // lookup costs one remote request even on a cache hit.
        let file_size = self.storage.file_size(path).await?;

        if let Some(cache) = self.footer_cache {
            if let Some(cached) = cache.get(path, file_size).await {
                tracing::debug!(path, "Using cached Parquet footer");
                return Ok(cached);
            }
        }

        // Header magic + footer length + trailing magic
        if file_size < 12 {
            return Err(ShardIoError::storage(format!(
                "File too small to be Parquet: {} ({} bytes)",
                path, file_size
            )));
        }

        let tail = self
            .storage
            .read_range(path, (file_size - 8)..file_size)
            .await?;
        if tail.len() != 8 || tail[4..8] != PARQUET_MAGIC {
            return Err(ShardIoError::storage(format!(
                "Invalid Parquet file {}: missing magic bytes",
                path
            )));
        }

        let footer_len = u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]]) as u64;
        if footer_len + 12 > file_size {
            return Err(ShardIoError::storage(format!(
                "Invalid Parquet file {}: footer length {} exceeds file size {}",
                path, footer_len, file_size
            )));
        }

        let footer_start = file_size - 8 - footer_len;
        let bytes = self
            .storage
            .read_range(path, footer_start..file_size)
            .await?;

        let metadata = ParquetMetaDataReader::new()
            .parse_and_finish(&bytes)
            .map_err(|e| {
                ShardIoError::storage(format!("Failed to parse Parquet footer of {}: {}", path, e))
            })?;

        let footer = Arc::new(ShardFooter {
            file_size,
            footer_start,
            bytes,
            metadata: Arc::new(metadata),
        });

        if let Some(cache) = self.footer_cache {
            cache.put(path.to_string(), Arc::clone(&footer)).await;
        }

        Ok(footer)
    }

    /// Read the Parquet file metadata (footer) using range reads.
    pub async fn read_metadata(&self, path: &str) -> Result<Arc<ParquetMetaData>> {
        Ok(Arc::clone(&self.read_footer(path).await?.metadata))
    }

    /// Top-level columns of the shard, from the footer alone.
    pub async fn schema(&self, path: &str) -> Result<BatchSchema> {
        let metadata = self.read_metadata(path).await?;
        let file_schema = metadata.file_metadata().schema();
        let all: Vec<usize> = (0..file_schema.get_fields().len()).collect();
        Ok(build_batch_schema(file_schema, &all))
    }

    /// Scan a shard, returning one batch per row group with matching rows.
    ///
    /// Only the footer and the column chunks needed for the output columns and
    /// the filter are fetched.
    pub async fn scan(&self, path: &str, request: &ScanRequest) -> Result<Vec<ColumnBatch>> {
        let footer = self.read_footer(path).await?;
        let metadata = Arc::clone(&footer.metadata);
        let file_schema = metadata.file_metadata().schema();
        let top_fields = file_schema.get_fields();

        let output: Vec<String> = if request.columns.is_empty() {
            top_fields.iter().map(|f| f.name().to_string()).collect()
        } else {
            request.columns.clone()
        };
        let filter_columns = request.filter.referenced_columns();

        let mut root_indices = Vec::new();
        for name in output.iter().chain(filter_columns.iter()) {
            let idx = top_fields
                .iter()
                .position(|f| f.name() == name)
                .ok_or_else(|| {
                    ShardIoError::schema(format!("Column '{}' not found in {}", name, path))
                })?;
            if !root_indices.contains(&idx) {
                root_indices.push(idx);
            }
        }
        // Projected rows come back in file order.
        root_indices.sort_unstable();

        let row_groups: Vec<usize> = (0..metadata.num_row_groups())
            .filter(|&i| request.filter.can_match_row_group(metadata.row_group(i)))
            .collect();

        tracing::debug!(
            path,
            filter = %request.filter,
            total_row_groups = metadata.num_row_groups(),
            selected_row_groups = row_groups.len(),
            "Row-group pruning"
        );

        if row_groups.is_empty() || request.limit == Some(0) {
            return Ok(Vec::new());
        }

        let mut ranges = column_chunk_ranges(&metadata, &row_groups, &root_indices);
        let coalesced = coalesce_ranges(&mut ranges, COALESCE_GAP);
        let total_fetch: u64 = coalesced.iter().map(|(s, e)| e - s).sum();

        tracing::debug!(
            path,
            file_size = footer.file_size,
            num_ranges = coalesced.len(),
            total_fetch_bytes = total_fetch,
            "Range-reading shard column chunks"
        );

        // Storage bounds how many of these run at once.
        let mut fetched = try_join_all(coalesced.iter().map(|&(start, end)| async move {
            let data = self.storage.read_range(path, start..end).await?;
            if (data.len() as u64) < end - start {
                return Err(ShardIoError::storage(format!(
                    "Short read from {}: wanted [{}, {}), got {} bytes",
                    path,
                    start,
                    end,
                    data.len()
                )));
            }
            Ok((start, data))
        }))
        .await?;
        fetched.push((footer.footer_start, footer.bytes.clone()));

        let chunk_reader = PrefetchedChunkReader::new(footer.file_size, fetched);
        let task = DecodeTask {
            row_groups,
            projected_schema: build_projected_schema(file_schema, &root_indices)?,
            batch_schema: Arc::new(build_batch_schema(file_schema, &root_indices)),
            filter: request.filter.clone(),
            limit: request.limit,
        };

        let batches = tokio::task::spawn_blocking(move || task.run(chunk_reader))
            .await
            .map_err(|e| ShardIoError::storage(format!("Decoding {} failed: {}", path, e)))??;

        let names: Vec<&str> = output.iter().map(String::as_str).collect();
        batches
            .iter()
            .map(|batch| batch.project(&names).map_err(ShardIoError::from))
            .collect()
    }
}

/// CPU-bound part of a scan, run on the blocking pool.
struct DecodeTask {
    row_groups: Vec<usize>,
    projected_schema: SchemaType,
    batch_schema: Arc<BatchSchema>,
    filter: Expression,
    limit: Option<usize>,
}

impl DecodeTask {
    fn run(self, chunk_reader: PrefetchedChunkReader) -> Result<Vec<ColumnBatch>> {
        let reader = SerializedFileReader::new(chunk_reader)?;
        let mut remaining = self.limit.unwrap_or(usize::MAX);
        let mut batches = Vec::new();

        for rg_idx in self.row_groups {
            if remaining == 0 {
                break;
            }

            let row_group_reader = reader.get_row_group(rg_idx)?;
            let estimated_rows = row_group_reader.metadata().num_rows() as usize;
            let row_iter =
                RowIter::from_row_group(Some(self.projected_schema.clone()), row_group_reader.as_ref())?;

            let mut columns: Vec<Column> = self
                .batch_schema
                .fields
                .iter()
                .map(|f| Column::with_capacity(f.field_type, estimated_rows))
                .collect();

            for row in row_iter {
                let row = row?;
                for (column, (_, field)) in columns.iter_mut().zip(row.get_column_iter()) {
                    push_field(column, field);
                }
            }

            let batch = ColumnBatch::new(Arc::clone(&self.batch_schema), columns)?;
            let matching: Vec<usize> = batch
                .row_indices()
                .filter(|&row| self.filter.evaluate(&batch, row))
                .take(remaining)
                .collect();
            remaining -= matching.len();

            if matching.is_empty() {
                continue;
            }
            if matching.len() == batch.num_rows {
                batches.push(batch);
            } else {
                batches.push(batch.filter_by_indices(&matching));
            }
        }

        Ok(batches)
    }
}

/// Coalesce byte ranges that are within `gap_threshold` of each other.
/// This reduces the number of HTTP requests at the cost of fetching some extra bytes.
fn coalesce_ranges(ranges: &mut [(u64, u64)], gap_threshold: u64) -> Vec<(u64, u64)> {
    if ranges.is_empty() {
        return Vec::new();
    }

    ranges.sort_by_key(|(start, _)| *start);

    let mut coalesced = Vec::new();
    let mut current_start = ranges[0].0;
    let mut current_end = ranges[0].1;

    for &(start, end) in ranges.iter().skip(1) {
        if start <= current_end + gap_threshold {
            current_end = current_end.max(end);
        } else {
            coalesced.push((current_start, current_end));
            current_start = start;
            current_end = end;
        }
    }
    coalesced.push((current_start, current_end));

    coalesced
}

/// Byte ranges of the column chunks under `root_indices` in the given row groups.
fn column_chunk_ranges(
    metadata: &ParquetMetaData,
    row_groups: &[usize],
    root_indices: &[usize],
) -> Vec<(u64, u64)> {
    let descr = metadata.file_metadata().schema_descr();
    let leaves: Vec<usize> = (0..descr.num_columns())
        .filter(|&leaf| root_indices.contains(&descr.get_column_root_idx(leaf)))
        .collect();

    let mut ranges = Vec::with_capacity(row_groups.len() * leaves.len());
    for &rg_idx in row_groups {
        let row_group = metadata.row_group(rg_idx);
        for &leaf in &leaves {
            // Starts at the dictionary page when there is one and covers
            // dictionary and data pages; the page reader asks for exactly this.
            let (start, len) = row_group.column(leaf).byte_range();
            ranges.push((start, start + len));
        }
    }

    ranges
}

/// Append one decoded field to a column, coercing to the column's type.
///
/// Values that cannot be represented in the column become NULL.
fn push_field(column: &mut Column, field: &Field) {
    match column {
        Column::Boolean(v) => v.push(match field {
            Field::Bool(b) => Some(*b),
            _ => None,
        }),
        Column::Int32(v) => v.push(match field {
            Field::Byte(x) => Some(*x as i32),
            Field::Short(x) => Some(*x as i32),
            Field::Int(x) => Some(*x),
            Field::UByte(x) => Some(*x as i32),
            Field::UShort(x) => Some(*x as i32),
            _ => None,
        }),
        Column::Int64(v) => v.push(match field {
            Field::Int(x) => Some(*x as i64),
            Field::Long(x) => Some(*x),
            Field::UInt(x) => Some(*x as i64),
            Field::ULong(x) => Some(*x as i64),
            _ => None,
        }),
        Column::Float32(v) => v.push(match field {
            Field::Float(x) => Some(*x),
            Field::Float16(x) => Some(x.to_f32()),
            _ => None,
        }),
        Column::Float64(v) => v.push(match field {
            Field::Double(x) => Some(*x),
            Field::Float(x) => Some(*x as f64),
            _ => None,
        }),
        Column::String(v) => v.push(match field {
            Field::Str(s) => Some(s.clone()),
            Field::Bytes(b) => String::from_utf8(b.data().to_vec()).ok(),
            _ => None,
        }),
        Column::Bytes(v) => v.push(match field {
            Field::Bytes(b) => Some(b.data().to_vec()),
            Field::Str(s) => Some(s.as_bytes().to_vec()),
            _ => None,
        }),
        Column::Date(v) => v.push(match field {
            Field::Date(d) | Field::Int(d) => Some(*d),
            _ => None,
        }),
        Column::Timestamp(v) | Column::TimestampTz(v) => v.push(match field {
            // Stored as microseconds
            Field::TimestampMillis(ms) => Some(*ms * 1000),
            Field::TimestampMicros(us) => Some(*us),
            _ => None,
        }),
        Column::Decimal { values, .. } => values.push(match field {
            Field::Decimal(d) => Some(decimal_bytes_to_i128(d.data())),
            _ => None,
        }),
    }
}

/// Convert big-endian two's complement decimal bytes to i128.
///
/// More than 16 bytes cannot come from a valid decimal (precision <= 38);
/// only the low 16 bytes are kept.
fn decimal_bytes_to_i128(bytes: &[u8]) -> i128 {
    if bytes.is_empty() {
        return 0;
    }

    let bytes = if bytes.len() > 16 {
        tracing::warn!(
            byte_len = bytes.len(),
            "Decimal bytes exceed 16, truncating (value will be incorrect)"
        );
        &bytes[bytes.len() - 16..]
    } else {
        bytes
    };

    let fill_byte = if bytes[0] & 0x80 != 0 { 0xFF } else { 0x00 };
    let mut arr = [fill_byte; 16];
    arr[16 - bytes.len()..].copy_from_slice(bytes);

    i128::from_be_bytes(arr)
}

/// Build a batch schema for the given top-level field indices, in that order.
fn build_batch_schema(file_schema: &SchemaType, indices: &[usize]) -> BatchSchema {
    let fields = file_schema.get_fields();
    BatchSchema::new(
        indices
            .iter()
            .filter_map(|&idx| fields.get(idx))
            .map(|field| {
                let nullable = !matches!(
                    field.get_basic_info().repetition(),
                    Repetition::REQUIRED
                );
                FieldInfo::new(field.name(), parquet_type_to_field_type(field), nullable)
            })
            .collect(),
    )
}

/// Build a projected Parquet schema containing only the specified top-level fields.
///
/// parquet-rs decodes only these columns when the schema is passed to
/// `RowIter::from_row_group()`.
fn build_projected_schema(full_schema: &SchemaType, indices: &[usize]) -> Result<SchemaType> {
    let fields = full_schema.get_fields();
    let projected_fields: Vec<Arc<SchemaType>> = indices
        .iter()
        .filter_map(|&idx| fields.get(idx).cloned())
        .collect();

    // parquet-rs matches the projection against the file schema by root name.
    SchemaType::group_type_builder(full_schema.name())
        .with_fields(projected_fields)
        .build()
        .map_err(|e| ShardIoError::storage(format!("Failed to build projected schema: {}", e)))
}

/// Convert a Parquet schema type to a `FieldType`.
fn parquet_type_to_field_type(parquet_type: &SchemaType) -> FieldType {
    if !parquet_type.is_primitive() {
        // Nested groups are not decoded; they surface as opaque bytes.
        return FieldType::Bytes;
    }

    let basic_info = parquet_type.get_basic_info();
    let logical_type = basic_info.logical_type();

    match basic_info.converted_type() {
        ConvertedType::UTF8 | ConvertedType::ENUM | ConvertedType::JSON => {
            return FieldType::String
        }
        ConvertedType::DATE => return FieldType::Date,
        ConvertedType::TIMESTAMP_MILLIS | ConvertedType::TIMESTAMP_MICROS => {
            return match logical_type {
                Some(LogicalType::Timestamp {
                    is_adjusted_to_u_t_c: true,
                    ..
                }) => FieldType::TimestampTz,
                _ => FieldType::Timestamp,
            };
        }
        ConvertedType::DECIMAL => {
            return match logical_type {
                Some(LogicalType::Decimal { precision, scale }) => FieldType::Decimal {
                    precision: precision as u8,
                    scale: scale as i8,
                },
                _ => FieldType::Decimal {
                    precision: 38,
                    scale: 0,
                },
            };
        }
        ConvertedType::UINT_32 | ConvertedType::UINT_64 => return FieldType::Int64,
        _ => {}
    }

    if matches!(logical_type, Some(LogicalType::String)) {
        return FieldType::String;
    }

    match parquet_type.get_physical_type() {
        PhysicalType::BOOLEAN => FieldType::Boolean,
        PhysicalType::INT32 => FieldType::Int32,
        PhysicalType::INT64 => FieldType::Int64,
        PhysicalType::FLOAT => FieldType::Float32,
        PhysicalType::DOUBLE => FieldType::Float64,
        PhysicalType::BYTE_ARRAY | PhysicalType::FIXED_LEN_BYTE_ARRAY => FieldType::Bytes,
        // Legacy timestamps
        PhysicalType::INT96 => FieldType::Timestamp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::ParquetFixture;
    use crate::io::{CountingStorage, MemoryStorage};

    fn storage_with(path: &str, bytes: Bytes) -> CountingStorage<MemoryStorage> {
        let mut storage = MemoryStorage::new();
        storage.add_file(path, bytes);
        CountingStorage::new(storage)
    }

    #[tokio::test]
    async fn test_footer_cache_hit_skips_range_reads() {
        let bytes = ParquetFixture::new()
            .utf8("comune", &["H501", "F205"])
            .build()
            .unwrap();
        let storage = storage_with("lazio.parquet", bytes);
        let cache = ParquetFooterCache::new(4);
        let reader = ShardReader::with_cache(&storage, &cache);

        let first = reader.read_metadata("lazio.parquet").await.unwrap();
        let reads_after_first = storage.range_read_calls();
        assert_eq!(reads_after_first, 2);

        let second = reader.read_metadata("lazio.parquet").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(storage.range_read_calls(), reads_after_first);
        // One size lookup per read, hit or miss.
        assert_eq!(storage.size_calls(), 2);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_footer_cache_miss_on_size_change() {
        let cache = ParquetFooterCache::new(2);
        assert!(cache.get("file1.parquet", 1000).await.is_none());

        let bytes = ParquetFixture::new().int64("x", &[1]).build().unwrap();
        let size = bytes.len() as u64;
        let storage = storage_with("file1.parquet", bytes);
        ShardReader::with_cache(&storage, &cache)
            .read_footer("file1.parquet")
            .await
            .unwrap();

        assert!(cache.get("file1.parquet", size).await.is_some());
        assert!(cache.get("file1.parquet", size + 1).await.is_none());
    }

    #[tokio::test]
    async fn test_rejects_non_parquet() {
        let storage = storage_with("bad.parquet", Bytes::from_static(b"definitely not parquet"));
        let err = ShardReader::new(&storage)
            .read_metadata("bad.parquet")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("magic"));

        let storage = storage_with("tiny.parquet", Bytes::from_static(b"PAR1"));
        assert!(ShardReader::new(&storage)
            .read_metadata("tiny.parquet")
            .await
            .is_err());
    }

    #[test]
    fn test_parquet_magic() {
        assert_eq!(&PARQUET_MAGIC, b"PAR1");
    }

    #[test]
    fn test_coalesce_ranges_no_overlap() {
        let mut ranges = vec![(0, 100), (500, 600), (1000, 1100)];
        let coalesced = coalesce_ranges(&mut ranges, 50);
        assert_eq!(coalesced, vec![(0, 100), (500, 600), (1000, 1100)]);
    }

    #[test]
    fn test_coalesce_ranges_overlap() {
        let mut ranges = vec![(0, 100), (50, 150), (140, 200)];
        let coalesced = coalesce_ranges(&mut ranges, 50);
        assert_eq!(coalesced, vec![(0, 200)]);
    }

    #[test]
    fn test_coalesce_ranges_small_gap() {
        let mut ranges = vec![(0, 100), (120, 200)];
        let coalesced = coalesce_ranges(&mut ranges, 50);
        assert_eq!(coalesced, vec![(0, 200)]);
    }

    #[test]
    fn test_coalesce_ranges_unsorted() {
        let mut ranges = vec![(500, 600), (0, 100), (200, 300)];
        let coalesced = coalesce_ranges(&mut ranges, 50);
        assert_eq!(coalesced, vec![(0, 100), (200, 300), (500, 600)]);
    }

    #[test]
    fn test_coalesce_ranges_empty() {
        let mut ranges: Vec<(u64, u64)> = vec![];
        assert!(coalesce_ranges(&mut ranges, 50).is_empty());
    }

    #[test]
    fn test_decimal_bytes_to_i128() {
        assert_eq!(decimal_bytes_to_i128(&[0x30, 0x39]), 12345);
        assert_eq!(decimal_bytes_to_i128(&[0xCF, 0xC7]), -12345);
        assert_eq!(decimal_bytes_to_i128(&[0xFF, 0x00, 0x00]), -65536);
        assert_eq!(decimal_bytes_to_i128(&[]), 0);
        assert_eq!(decimal_bytes_to_i128(&[0x80]), -128);
    }

    #[test]
    fn test_push_field_coerces_and_nulls() {
        let mut ints = Column::Int64(Vec::new());
        push_field(&mut ints, &Field::Int(7));
        push_field(&mut ints, &Field::Null);
        push_field(&mut ints, &Field::Str("x".to_string()));
        assert_eq!(ints.len(), 3);
        assert_eq!(ints.value(0), catasto_tabular::ScalarValue::Int(7));
        assert!(ints.is_null(1));
        assert!(ints.is_null(2));

        let mut ts = Column::Timestamp(Vec::new());
        push_field(&mut ts, &Field::TimestampMillis(5));
        assert_eq!(ts.value(0), catasto_tabular::ScalarValue::Int(5000));
    }
}
