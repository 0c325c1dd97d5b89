//! Error types for the bulk record engine.
//!
//! Three layers of failure are modelled separately:
//!
//! - [`RemoteError`] is what the remote tabular service reports for one call.
//! - [`RecordError`] is the per-record failure attached to a `Failed` outcome.
//! - [`BulkError`] is a run-level failure surfaced to the caller of the engine.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::models::RecordId;
use crate::orchestration::error_classifier::ErrorCategory;

/// Kind tag reported by the remote collaborator for a failed call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteErrorKind {
    /// Service protection limit hit; the call may succeed later
    Throttled,
    /// Optimistic concurrency (row version) mismatch
    ConcurrencyConflict,
    /// Timeout, dropped connection or generic server-side fault
    TransientFault,
    /// The request was rejected by field or business validation
    Validation,
    /// Caller lacks privilege for the operation
    PermissionDenied,
    /// The addressed record does not exist
    NotFound,
    /// Anything the service could not categorise
    Other,
}

/// A failure returned by one remote call
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind:?}: {message}")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
    /// Server-requested minimum wait before the next attempt
    pub retry_after: Option<Duration>,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    pub fn throttled(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Throttled, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::TransientFault, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Validation, message)
    }
}

/// Per-record failure carried on the errors lane and on `Failed` outcomes
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecordError {
    /// A remote call failed and was classified as non-retryable, or retries ran out
    #[error("{operation} failed on table {table} ({category}): {source}")]
    Remote {
        operation: String,
        table: String,
        category: ErrorCategory,
        #[source]
        source: RemoteError,
    },

    /// A match key-set located more than one existing record
    #[error("ambiguous match on table {table}: key [{key_set}] matched {matches} records")]
    AmbiguousMatch {
        table: String,
        key_set: String,
        matches: usize,
    },

    /// Update or delete could not locate the record and IfExists was not set
    #[error("no existing record found in table {table} to {operation}")]
    NotFound { table: String, operation: String },

    /// Neither the record nor the configuration names a table
    #[error("record has no table name and no default table is configured")]
    MissingTable,

    /// Update without a primary identity and without usable match columns
    #[error("cannot {operation} in table {table}: record has no identity and no usable match key")]
    NoIdentity { table: String, operation: String },

    /// The worker processing this record faulted before reaching it
    #[error("worker {worker_id} faulted: {reason}")]
    WorkerFault { worker_id: usize, reason: String },
}

impl RecordError {
    /// Category used for reporting and summary breakdowns
    pub fn category(&self) -> ErrorCategory {
        match self {
            RecordError::Remote { category, .. } => *category,
            RecordError::AmbiguousMatch { .. } => ErrorCategory::AmbiguousMatch,
            RecordError::NotFound { .. } | RecordError::NoIdentity { .. } => {
                ErrorCategory::Permanent
            }
            RecordError::MissingTable => ErrorCategory::Validation,
            RecordError::WorkerFault { .. } => ErrorCategory::WorkerFault,
        }
    }
}

/// Run-level failures surfaced by the engine itself
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BulkError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Multiplex error: {0}")]
    Multiplex(#[from] MultiplexError),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<config::ConfigError> for BulkError {
    fn from(error: config::ConfigError) -> Self {
        BulkError::Configuration(error.to_string())
    }
}

/// Broken per-lane sequencing detected while forwarding worker output
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MultiplexError {
    #[error("worker {worker_id} lane {lane}: expected sequence {expected}, got {actual}")]
    OutOfSequence {
        worker_id: usize,
        lane: &'static str,
        expected: u64,
        actual: u64,
    },
    #[error("envelope for unknown worker {worker_id}")]
    UnknownWorker { worker_id: usize },
}

/// Identity of one match attempt, used in diagnostics
pub(crate) fn describe_ids(ids: &[RecordId]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

pub type BulkResult<T> = std::result::Result<T, BulkError>;
