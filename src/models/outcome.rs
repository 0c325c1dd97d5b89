use serde::{Deserialize, Serialize};
use std::fmt;

use super::record::RecordId;
use crate::error::RecordError;

/// Final per-record classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Created,
    Updated,
    Deleted,
    Skipped,
    Failed,
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeKind::Created => write!(f, "created"),
            OutcomeKind::Updated => write!(f, "updated"),
            OutcomeKind::Deleted => write!(f, "deleted"),
            OutcomeKind::Skipped => write!(f, "skipped"),
            OutcomeKind::Failed => write!(f, "failed"),
        }
    }
}

/// Result of processing one input record, emitted on the results lane
#[derive(Debug, Clone, PartialEq)]
pub struct RecordOutcome {
    pub kind: OutcomeKind,
    /// Chunk the record belonged to (1-based)
    pub chunk: u64,
    /// Position of the record inside its chunk (0-based)
    pub index: usize,
    pub table: Option<String>,
    /// Identities created, updated or deleted
    pub ids: Vec<RecordId>,
    /// Total remote attempts made, including the first
    pub attempts: u32,
    pub error: Option<RecordError>,
}

impl RecordOutcome {
    pub fn is_failure(&self) -> bool {
        self.kind == OutcomeKind::Failed
    }
}
