//! Completion join: outcome aggregation and the final run summary.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::{OutcomeKind, RecordOutcome};

/// Running per-outcome counts, fed by the multiplexer as results are forwarded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeTally {
    pub created: u64,
    pub updated: u64,
    pub deleted: u64,
    pub skipped: u64,
    pub failed: u64,
    /// Successful outcomes that needed at least one retry
    pub retried_successes: u64,
}

impl OutcomeTally {
    pub fn record(&mut self, outcome: &RecordOutcome) {
        match outcome.kind {
            OutcomeKind::Created => self.created += 1,
            OutcomeKind::Updated => self.updated += 1,
            OutcomeKind::Deleted => self.deleted += 1,
            OutcomeKind::Skipped => self.skipped += 1,
            OutcomeKind::Failed => self.failed += 1,
        }
        if outcome.kind != OutcomeKind::Failed && outcome.attempts > 1 {
            self.retried_successes += 1;
        }
    }

    pub fn total(&self) -> u64 {
        self.created + self.updated + self.deleted + self.skipped + self.failed
    }

    pub fn succeeded(&self) -> u64 {
        self.total() - self.failed
    }
}

/// Overall verdict of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every dispatched record reached a non-failed outcome
    Succeeded,
    /// At least one record failed; successful outcomes are kept
    PartiallyFailed,
    /// The run was cancelled before every record was processed
    Cancelled,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Succeeded => write!(f, "succeeded"),
            RunStatus::PartiallyFailed => write!(f, "partially failed"),
            RunStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Final report produced once all workers and retries have drained
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub status: RunStatus,
    pub chunks_dispatched: u64,
    pub records_dispatched: u64,
    pub outcomes: OutcomeTally,
    /// Dispatched records that never reached an outcome (cancellation only)
    pub not_processed: u64,
    /// Workers that had to be aborted after the grace period
    pub workers_aborted: u64,
}

impl RunSummary {
    pub(crate) fn new(
        chunks_dispatched: u64,
        records_dispatched: u64,
        outcomes: OutcomeTally,
        not_processed: u64,
        workers_aborted: u64,
        cancelled: bool,
    ) -> Self {
        let status = if cancelled {
            RunStatus::Cancelled
        } else if outcomes.failed > 0 {
            RunStatus::PartiallyFailed
        } else {
            RunStatus::Succeeded
        };

        Self {
            status,
            chunks_dispatched,
            records_dispatched,
            outcomes,
            not_processed,
            workers_aborted,
        }
    }

    /// True only when nothing failed and the run was not cancelled
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(kind: OutcomeKind, attempts: u32) -> RecordOutcome {
        RecordOutcome {
            kind,
            chunk: 1,
            index: 0,
            table: Some("account".to_string()),
            ids: vec![],
            attempts,
            error: None,
        }
    }

    #[test]
    fn test_tally_counts_each_kind() {
        let mut tally = OutcomeTally::default();
        tally.record(&outcome(OutcomeKind::Created, 1));
        tally.record(&outcome(OutcomeKind::Updated, 3));
        tally.record(&outcome(OutcomeKind::Failed, 4));
        tally.record(&outcome(OutcomeKind::Skipped, 1));

        assert_eq!(tally.total(), 4);
        assert_eq!(tally.failed, 1);
        assert_eq!(tally.succeeded(), 3);
        assert_eq!(tally.retried_successes, 1);
    }

    #[test]
    fn test_status_prefers_cancelled_then_failed() {
        let mut tally = OutcomeTally::default();
        tally.record(&outcome(OutcomeKind::Failed, 1));

        assert_eq!(
            RunSummary::new(1, 1, tally, 0, 0, false).status,
            RunStatus::PartiallyFailed
        );
        assert_eq!(
            RunSummary::new(1, 1, tally, 0, 0, true).status,
            RunStatus::Cancelled
        );
        assert!(RunSummary::new(0, 0, OutcomeTally::default(), 0, 0, false).is_success());
    }
}
