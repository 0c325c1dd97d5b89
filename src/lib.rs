#![allow(clippy::doc_markdown)] // Allow technical terms like MatchSpec, IfExists in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Bulk Ops Core
//!
//! Parallel bulk record engine for a remote tabular data service.
//!
//! ## Overview
//!
//! A run takes an arbitrarily long stream of input records and applies one
//! operation (create, update, upsert or delete) to each of them against a
//! remote service. Records are split into chunks, chunks are processed by a
//! bounded pool of concurrent workers, and every worker reports on six
//! output lanes that are forwarded to the caller as they arrive.
//!
//! ## Key Features
//!
//! - **Chunked parallel dispatch**: at most `max_parallel` workers, one chunk each
//! - **Alternate-key matching**: ordered key-sets locate existing rows, with
//!   ambiguous-match detection and an opt-in multi-match mode
//! - **Retry with exponential backoff**: transient failures are retried per
//!   record through an atomic Idle/Scheduled/InFlight state machine
//! - **Ordered multiplexed output**: per-lane order is preserved for every worker
//! - **Cooperative cancellation**: a grace period, then abort
//!
//! ## Module Organization
//!
//! - [`engine`] - Builder, run handle and caller surface
//! - [`models`] - Records, chunks, match keys and outcomes
//! - [`orchestration`] - Partitioning, resolution, classification and retry
//! - [`execution`] - Dispatcher, workers, output lanes and multiplexer
//! - [`remote`] - The remote service collaborator traits
//! - [`config`] - Configuration management
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured logging setup and helpers
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bulkops_core::{BulkConfig, BulkEngine, InputRecord, MatchSpec, OperationKind, RemoteService};
//!
//! # async fn example(connection: Arc<dyn RemoteService>) -> Result<(), Box<dyn std::error::Error>> {
//! let config = BulkConfig {
//!     operation: OperationKind::Upsert,
//!     match_on: MatchSpec::from_columns(vec![vec!["emailaddress1"]]),
//!     ..BulkConfig::default()
//! };
//! let engine = BulkEngine::builder().config(config).connection(connection).build()?;
//!
//! let records = vec![InputRecord::for_table("contact").with_field("emailaddress1", "ann@example.com")];
//! let (_events, summary) = engine.run(records).await?;
//! assert!(summary.is_success());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod execution;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod remote;

pub use config::BulkConfig;
pub use engine::{BulkEngine, BulkEngineBuilder, BulkRun};
pub use error::{BulkError, BulkResult, MultiplexError, RecordError, RemoteError, RemoteErrorKind};
pub use execution::{
    OutcomeTally, OutputLane, RecordFailure, ReportEvent, ReportItem, RunStatus, RunSummary,
};
pub use models::{
    Chunk, EntityReference, FieldValue, InputRecord, KeySet, MatchSpec, OperationKind,
    OutcomeKind, RecordId, RecordOutcome,
};
pub use orchestration::{ErrorCategory, RetryPolicy};
pub use remote::{
    BusinessLogicKind, ConnectionResolver, LookupQuery, OperationOptions, RemoteOperation,
    RemoteService, StaticConnectionResolver,
};
