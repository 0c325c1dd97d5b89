//! Splits an input record stream into numbered, bounded-size chunks.

use crate::error::{BulkError, BulkResult};
use crate::models::{Chunk, InputRecord};

/// Iterator adaptor turning records into [`Chunk`]s of at most `chunk_size`
///
/// Chunks are numbered from 1. The final chunk may be short; an empty source
/// yields no chunks at all. The partitioner pulls lazily, so unbounded sources
/// are fine.
#[derive(Debug)]
pub struct ChunkPartitioner<I> {
    source: I,
    chunk_size: usize,
    next_sequence: u64,
}

impl<I> ChunkPartitioner<I>
where
    I: Iterator<Item = InputRecord>,
{
    pub fn new(source: I, chunk_size: usize) -> BulkResult<Self> {
        if chunk_size == 0 {
            return Err(BulkError::Configuration(
                "chunk_size must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            source,
            chunk_size,
            next_sequence: 1,
        })
    }

    /// Sequence number the next emitted chunk will carry
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }
}

impl<I> Iterator for ChunkPartitioner<I>
where
    I: Iterator<Item = InputRecord>,
{
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        let records: Vec<InputRecord> = self.source.by_ref().take(self.chunk_size).collect();
        if records.is_empty() {
            return None;
        }

        let chunk = Chunk::new(self.next_sequence, records);
        self.next_sequence += 1;
        Some(chunk)
    }
}
