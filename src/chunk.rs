//! Chunk planning
//!
//! Splits a byte range into fixed-size chunks. A chunk is the unit of
//! transfer, retry, and resume bookkeeping; the planned chunks for a
//! file always partition `[0, total_size)` with no gaps or overlaps.

use crate::error::{Result, TransferError};

/// State of a single chunk within a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChunkState {
    /// Waiting to be transferred
    #[default]
    Pending,
    /// Currently being transferred
    InFlight,
    /// Transferred successfully
    Done,
    /// Transfer failed
    Failed,
}

/// A contiguous byte range of a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDescriptor {
    /// Chunk index (0-based)
    pub index: u32,
    /// Start byte offset (inclusive)
    pub start: u64,
    /// End byte offset (exclusive)
    pub end: u64,
    /// Current state
    pub state: ChunkState,
    /// Times this chunk has been retried
    pub retry_count: u32,
}

impl ChunkDescriptor {
    /// Create a new pending chunk for `[start, end)`
    pub fn new(index: u32, start: u64, end: u64) -> Self {
        Self {
            index,
            start,
            end,
            state: ChunkState::Pending,
            retry_count: 0,
        }
    }

    /// Size of this chunk in bytes
    pub fn size(&self) -> u64 {
        self.end - self.start
    }

    /// HTTP `Range` header value for this chunk (inclusive end)
    pub fn range_header(&self) -> String {
        format!("bytes={}-{}", self.start, self.end - 1)
    }
}

/// Number of chunks needed to cover `total_size` bytes
pub fn total_chunks(total_size: u64, chunk_size: u64) -> u64 {
    total_size.div_ceil(chunk_size)
}

/// Partition `[0, total_size)` into `chunk_size`-sized chunks
///
/// The last chunk may be shorter than `chunk_size`. A zero-byte file
/// yields an empty plan, which callers treat as immediate completion.
pub fn plan_chunks(total_size: u64, chunk_size: u64) -> Result<Vec<ChunkDescriptor>> {
    if chunk_size == 0 {
        return Err(TransferError::config("chunk_size", "must be greater than 0"));
    }

    let count = total_chunks(total_size, chunk_size);
    if count > u32::MAX as u64 {
        return Err(TransferError::config(
            "chunk_size",
            format!("{} chunks exceed the supported maximum", count),
        ));
    }

    let mut chunks = Vec::with_capacity(count as usize);
    for i in 0..count {
        let start = i * chunk_size;
        let end = (start + chunk_size).min(total_size);
        chunks.push(ChunkDescriptor::new(i as u32, start, end));
    }
    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_partitions_with_short_tail() {
        // 2.5 MB file in 1 MB chunks
        let chunks = plan_chunks(2_500_000, 1_000_000).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!((chunks[0].start, chunks[0].end), (0, 1_000_000));
        assert_eq!((chunks[1].start, chunks[1].end), (1_000_000, 2_000_000));
        assert_eq!((chunks[2].start, chunks[2].end), (2_000_000, 2_500_000));
        assert_eq!(chunks[2].size(), 500_000);
    }

    #[test]
    fn plan_covers_range_without_gaps_or_overlaps() {
        for (total, chunk) in [
            (0u64, 1u64),
            (1, 1),
            (1, 1024),
            (1024, 1024),
            (1025, 1024),
            (10 * 1024 * 1024 + 7, 1024 * 1024),
        ] {
            let chunks = plan_chunks(total, chunk).unwrap();

            let mut expected_start = 0;
            for (i, c) in chunks.iter().enumerate() {
                assert_eq!(c.index as usize, i);
                assert_eq!(c.start, expected_start, "gap or overlap at chunk {}", i);
                assert!(c.end > c.start);
                expected_start = c.end;
            }
            assert_eq!(expected_start, total);

            let sum: u64 = chunks.iter().map(|c| c.size()).sum();
            assert_eq!(sum, total);
        }
    }

    #[test]
    fn empty_file_yields_empty_plan() {
        let chunks = plan_chunks(0, 1024).unwrap();
        assert!(chunks.is_empty());
        assert_eq!(total_chunks(0, 1024), 0);
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let err = plan_chunks(100, 0).unwrap_err();
        assert!(matches!(err, TransferError::Config { .. }));
    }

    #[test]
    fn exact_multiple_has_no_short_tail() {
        let chunks = plan_chunks(4096, 1024).unwrap();
        assert_eq!(chunks.len(), 4);
        assert!(chunks.iter().all(|c| c.size() == 1024));
    }

    #[test]
    fn range_header_uses_inclusive_end() {
        let chunk = ChunkDescriptor::new(0, 0, 1000);
        assert_eq!(chunk.range_header(), "bytes=0-999");

        let chunk = ChunkDescriptor::new(2, 2_000_000, 2_500_000);
        assert_eq!(chunk.range_header(), "bytes=2000000-2499999");
    }
}
