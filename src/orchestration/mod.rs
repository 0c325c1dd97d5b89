//! # Orchestration
//!
//! Per-record decision making for a bulk run.
//!
//! ## Core Components
//!
//! - **ChunkPartitioner**: Splits the record stream into numbered chunks
//! - **RecordResolver**: Locates existing rows through the MatchSpec and issues the remote write
//! - **ErrorClassifier**: Maps remote failures onto retryable and fatal categories
//! - **RetryQueue**: Holds transiently failed records until their backoff expires
//! - **RetryPolicy**: Exponential backoff with optional cap and retry-after floor
//!
//! Nothing here spawns tasks. Scheduling and output live in [`crate::execution`].

pub mod backoff_calculator;
pub mod chunk_partitioner;
pub mod error_classifier;
pub mod record_resolver;
pub mod retry_queue;

// Re-export core types and components for easy access
pub use backoff_calculator::RetryPolicy;
pub use chunk_partitioner::ChunkPartitioner;
pub use error_classifier::{
    ErrorCategory, ErrorClassification, ErrorClassifier, StandardErrorClassifier,
};
pub use record_resolver::{
    RecordResolver, Resolution, ResolverNote, ResolverReport, ResolverSettings,
};
pub use retry_queue::{
    RegisterOutcome, RetryDecision, RetryOwner, RetryQueue, RetryRecord, RetryState,
};
