#![allow(dead_code)]

use bulkops_core::InputRecord;
use proptest::prelude::*;

/// Strategy for generating small input streams tagged by position
pub fn record_stream_strategy() -> impl Strategy<Value = Vec<InputRecord>> {
    (0usize..200).prop_map(|count| {
        (0..count)
            .map(|n| InputRecord::for_table("account").with_field("position", n as i64))
            .collect()
    })
}

/// Strategy for generating chunk sizes
pub fn chunk_size_strategy() -> impl Strategy<Value = usize> {
    1usize..64
}
