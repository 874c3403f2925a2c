//! ChunkReader over prefetched byte ranges.
//!
//! The shard reader works out which column chunks a scan needs, fetches their
//! (coalesced) byte ranges up front, then hands this reader to parquet-rs for
//! decoding on a blocking thread. Nothing is fetched from here: a read outside
//! the prefetched ranges is an error, never a silent network call.

use std::io::Cursor;

use bytes::Bytes;
use parquet::errors::ParquetError;
use parquet::file::reader::{ChunkReader, Length};

/// A fetched byte range.
#[derive(Debug, Clone)]
struct FetchedRange {
    /// Start offset in the file.
    start: u64,
    data: Bytes,
}

impl FetchedRange {
    fn end(&self) -> u64 {
        self.start + self.data.len() as u64
    }

    fn contains(&self, start: u64, len: usize) -> bool {
        start >= self.start && start + len as u64 <= self.end()
    }
}

/// Parquet `ChunkReader` backed only by ranges fetched ahead of time.
#[derive(Debug, Clone)]
pub struct PrefetchedChunkReader {
    file_size: u64,
    /// Sorted by start offset, non-overlapping.
    ranges: Vec<FetchedRange>,
}

impl PrefetchedChunkReader {
    /// Build a reader from `(offset, bytes)` pairs.
    ///
    /// Ranges may arrive in any order; they are sorted here.
    pub fn new(file_size: u64, ranges: Vec<(u64, Bytes)>) -> Self {
        let mut ranges: Vec<FetchedRange> = ranges
            .into_iter()
            .map(|(start, data)| FetchedRange { start, data })
            .collect();
        ranges.sort_by_key(|r| r.start);
        Self { file_size, ranges }
    }

    /// Total number of prefetched bytes held.
    pub fn prefetched_bytes(&self) -> usize {
        self.ranges.iter().map(|r| r.data.len()).sum()
    }

    /// Find the range containing `start`, if any.
    fn range_at(&self, start: u64) -> Option<&FetchedRange> {
        let idx = self.ranges.partition_point(|r| r.start <= start);
        if idx == 0 {
            return None;
        }
        let candidate = &self.ranges[idx - 1];
        (start < candidate.end()).then_some(candidate)
    }

    fn missing(&self, start: u64, len: usize) -> ParquetError {
        ParquetError::General(format!(
            "Byte range [{}, {}) was not prefetched (file size {})",
            start,
            start + len as u64,
            self.file_size
        ))
    }
}

impl Length for PrefetchedChunkReader {
    fn len(&self) -> u64 {
        self.file_size
    }
}

impl ChunkReader for PrefetchedChunkReader {
    type T = Cursor<Bytes>;

    /// Returns a reader from `start` to the end of the containing range.
    fn get_read(&self, start: u64) -> Result<Self::T, ParquetError> {
        let range = self.range_at(start).ok_or_else(|| self.missing(start, 0))?;
        let offset = (start - range.start) as usize;
        Ok(Cursor::new(range.data.slice(offset..)))
    }

    fn get_bytes(&self, start: u64, length: usize) -> Result<Bytes, ParquetError> {
        match self.range_at(start) {
            Some(range) if range.contains(start, length) => {
                let offset = (start - range.start) as usize;
                Ok(range.data.slice(offset..offset + length))
            }
            _ => Err(self.missing(start, length)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn reader() -> PrefetchedChunkReader {
        PrefetchedChunkReader::new(
            100,
            vec![
                (50, Bytes::from_static(b"0123456789")),
                (10, Bytes::from_static(b"abcdef")),
            ],
        )
    }

    #[test]
    fn test_get_bytes_inside_range() {
        let r = reader();
        assert_eq!(&r.get_bytes(12, 3).unwrap()[..], b"cde");
        assert_eq!(&r.get_bytes(50, 10).unwrap()[..], b"0123456789");
        assert_eq!(r.len(), 100);
        assert_eq!(r.prefetched_bytes(), 16);
    }

    #[test]
    fn test_get_bytes_outside_range_errors() {
        let r = reader();
        assert!(r.get_bytes(0, 4).is_err());
        // Straddles the end of the first range.
        assert!(r.get_bytes(14, 4).is_err());
        assert!(r.get_bytes(60, 1).is_err());
    }

    #[test]
    fn test_get_read_runs_to_end_of_range() {
        let r = reader();
        let mut buf = Vec::new();
        r.get_read(55).unwrap().read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"56789");
        assert!(r.get_read(30).is_err());
    }
}
