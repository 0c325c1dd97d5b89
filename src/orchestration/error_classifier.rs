//! # Remote Error Classification
//!
//! Maps every [`RemoteError`] onto a fixed classification table that decides
//! whether a failed record operation is worth retrying.
//!
//! ## Classification Table
//!
//! ```text
//! RemoteErrorKind        Category            Retryable
//! ───────────────────    ──────────────────  ─────────
//! Throttled              RateLimit           yes
//! ConcurrencyConflict    StateInconsistency  yes
//! TransientFault         Transient           yes
//! Validation             Validation          no
//! PermissionDenied       Permission          no
//! NotFound               Permanent           no
//! Other                  Permanent           no
//! ```
//!
//! Retryable failures are parked in the retry queue; everything else becomes a
//! `Failed` outcome immediately.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{RemoteError, RemoteErrorKind};

/// Primary error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Service protection limits - retry with backoff
    RateLimit,

    /// Optimistic concurrency conflict - retry after the competing write lands
    StateInconsistency,

    /// Transient fault - may succeed on retry
    Transient,

    /// Data rejected by validation - will never succeed as is
    Validation,

    /// Caller lacks privilege
    Permission,

    /// Permanent error - will never succeed if retried
    Permanent,

    /// A match key located more than one existing record
    AmbiguousMatch,

    /// The worker owning the record faulted
    WorkerFault,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::RateLimit => write!(f, "Rate Limit"),
            ErrorCategory::StateInconsistency => write!(f, "State Inconsistency"),
            ErrorCategory::Transient => write!(f, "Transient"),
            ErrorCategory::Validation => write!(f, "Validation"),
            ErrorCategory::Permission => write!(f, "Permission"),
            ErrorCategory::Permanent => write!(f, "Permanent"),
            ErrorCategory::AmbiguousMatch => write!(f, "Ambiguous Match"),
            ErrorCategory::WorkerFault => write!(f, "Worker Fault"),
        }
    }
}

/// Result of error classification
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorClassification {
    /// Primary error category
    pub error_category: ErrorCategory,

    /// Whether this error should be retried
    pub is_retryable: bool,

    /// Stable code for log correlation
    pub error_code: &'static str,

    /// Server-requested minimum wait, when supplied
    pub retry_after: Option<Duration>,
}

/// Trait for error classification strategies
pub trait ErrorClassifier: Send + Sync {
    /// Classify a remote error
    fn classify_error(&self, error: &RemoteError) -> ErrorClassification;

    /// Get the classifier name for identification
    fn classifier_name(&self) -> &'static str;
}

/// Standard classifier implementing the fixed table above
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardErrorClassifier;

impl StandardErrorClassifier {
    pub fn new() -> Self {
        Self
    }
}

impl ErrorClassifier for StandardErrorClassifier {
    fn classify_error(&self, error: &RemoteError) -> ErrorClassification {
        let (error_category, is_retryable, error_code) = match error.kind {
            RemoteErrorKind::Throttled => (ErrorCategory::RateLimit, true, "REMOTE_THROTTLED"),
            RemoteErrorKind::ConcurrencyConflict => (
                ErrorCategory::StateInconsistency,
                true,
                "REMOTE_CONCURRENCY_CONFLICT",
            ),
            RemoteErrorKind::TransientFault => {
                (ErrorCategory::Transient, true, "REMOTE_TRANSIENT_FAULT")
            }
            RemoteErrorKind::Validation => {
                (ErrorCategory::Validation, false, "REMOTE_VALIDATION_ERROR")
            }
            RemoteErrorKind::PermissionDenied => {
                (ErrorCategory::Permission, false, "REMOTE_PERMISSION_DENIED")
            }
            RemoteErrorKind::NotFound => (ErrorCategory::Permanent, false, "REMOTE_NOT_FOUND"),
            RemoteErrorKind::Other => (ErrorCategory::Permanent, false, "REMOTE_GENERAL_ERROR"),
        };

        ErrorClassification {
            error_category,
            is_retryable,
            error_code,
            retry_after: if is_retryable { error.retry_after } else { None },
        }
    }

    fn classifier_name(&self) -> &'static str {
        "StandardErrorClassifier"
    }
}
