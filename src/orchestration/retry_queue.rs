//! # Retry Queue
//!
//! Holds records whose last attempt failed with a retryable error and hands
//! them back to their owning worker once their backoff delay has elapsed.
//!
//! ## State Machine
//!
//! Each [`RetryRecord`] carries an atomic [`RetryState`]:
//!
//! ```text
//!   register          claim_due (CAS)         record_failure
//! Idle ──────▶ Scheduled ──────────▶ InFlight ──────────────▶ Scheduled
//!                                      │
//!                                      └── success / fatal / exhausted ──▶ removed
//! ```
//!
//! The compare-and-swap in [`RetryQueue::claim_due`] guarantees a record is
//! never attempted twice concurrently, even when a sweep races a finishing
//! attempt. Different records may be in flight at the same time.
//!
//! ## Retry Budget
//!
//! A record enters the queue after its first failed attempt with
//! `retries_remaining = retries`. Every failed retry decrements the budget;
//! reaching zero reports the record as failed with its last error. An
//! always-failing record therefore makes exactly `retries + 1` attempts.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use super::backoff_calculator::RetryPolicy;
use crate::error::RecordError;
use crate::logging::duration_millis;
use crate::models::InputRecord;

/// Lifecycle state of a queued retry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetryState {
    /// Created but not yet visible to sweeps
    Idle = 0,
    /// Waiting for its next retry time
    Scheduled = 1,
    /// Claimed by a sweep; an attempt is running
    InFlight = 2,
}

impl From<u8> for RetryState {
    fn from(value: u8) -> Self {
        match value {
            0 => RetryState::Idle,
            1 => RetryState::Scheduled,
            _ => RetryState::InFlight,
        }
    }
}

/// Where a retried record came from, so its outcome reaches the right lanes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RetryOwner {
    pub worker_id: usize,
    pub chunk: u64,
    /// Position of the record inside its chunk
    pub index: usize,
}

#[derive(Debug)]
struct RetryProgress {
    retries_remaining: u32,
    attempts: u32,
    next_retry_at: Instant,
    last_error: RecordError,
}

/// One record waiting for another attempt
#[derive(Debug)]
pub struct RetryRecord {
    id: u64,
    record: InputRecord,
    table: String,
    owner: RetryOwner,
    state: AtomicU8,
    progress: Mutex<RetryProgress>,
}

impl RetryRecord {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn record(&self) -> &InputRecord {
        &self.record
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn owner(&self) -> RetryOwner {
        self.owner
    }

    pub fn state(&self) -> RetryState {
        RetryState::from(self.state.load(Ordering::Acquire))
    }

    pub fn retries_remaining(&self) -> u32 {
        self.progress.lock().retries_remaining
    }

    /// Attempts made so far, including the one in flight
    pub fn attempts(&self) -> u32 {
        self.progress.lock().attempts
    }

    pub fn next_retry_at(&self) -> Instant {
        self.progress.lock().next_retry_at
    }

    pub fn last_error(&self) -> RecordError {
        self.progress.lock().last_error.clone()
    }

    fn transition(&self, from: RetryState, to: RetryState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Result of parking a freshly failed record
#[derive(Debug, Clone, PartialEq)]
pub enum RegisterOutcome {
    /// Queued for retry attempt 1 after `delay`
    Scheduled { id: u64, delay: Duration },
    /// Retries are disabled; the record fails with its first error
    Exhausted,
}

/// What happened after a retry attempt failed again
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// Retry attempt `attempt` will run after `delay`
    Rescheduled { attempt: u32, delay: Duration },
    /// Budget spent; the record is removed
    Exhausted { attempts: u32, last_error: RecordError },
}

// Saturated delays park the record for good rather than overflowing the clock
fn schedule_at(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay)
        .unwrap_or_else(|| now + Duration::from_secs(60 * 60 * 24 * 365))
}

/// Shared queue of pending retries for one run
#[derive(Debug)]
pub struct RetryQueue {
    records: DashMap<u64, Arc<RetryRecord>>,
    next_id: AtomicU64,
    policy: RetryPolicy,
}

impl RetryQueue {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            records: DashMap::new(),
            next_id: AtomicU64::new(1),
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Park a record after its first attempt failed with a retryable error
    pub fn register(
        &self,
        owner: RetryOwner,
        record: InputRecord,
        table: String,
        error: RecordError,
        retry_after: Option<Duration>,
        now: Instant,
    ) -> RegisterOutcome {
        if self.policy.retries == 0 {
            return RegisterOutcome::Exhausted;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let delay = self.policy.delay_with_hint(1, retry_after);
        let entry = Arc::new(RetryRecord {
            id,
            record,
            table,
            owner,
            state: AtomicU8::new(RetryState::Idle as u8),
            progress: Mutex::new(RetryProgress {
                retries_remaining: self.policy.retries,
                attempts: 1,
                next_retry_at: schedule_at(now, delay),
                last_error: error,
            }),
        });

        self.records.insert(id, Arc::clone(&entry));
        entry.transition(RetryState::Idle, RetryState::Scheduled);

        debug!(
            retry_id = id,
            worker_id = owner.worker_id,
            chunk = owner.chunk,
            index = owner.index,
            delay_ms = duration_millis(delay),
            "Record parked for retry"
        );

        RegisterOutcome::Scheduled { id, delay }
    }

    /// Claim every due record owned by `worker_id`, moving each Scheduled → InFlight
    pub fn claim_due(&self, worker_id: usize, now: Instant) -> Vec<Arc<RetryRecord>> {
        let candidates: Vec<Arc<RetryRecord>> = self
            .records
            .iter()
            .filter(|entry| entry.owner.worker_id == worker_id)
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut claimed: Vec<Arc<RetryRecord>> = candidates
            .into_iter()
            .filter(|record| record.next_retry_at() <= now)
            .filter(|record| record.transition(RetryState::Scheduled, RetryState::InFlight))
            .collect();

        for record in &claimed {
            record.progress.lock().attempts += 1;
        }
        claimed.sort_by_key(|record| record.owner.index);
        claimed
    }

    /// Earliest retry time among `worker_id`'s scheduled records
    pub fn next_due_for(&self, worker_id: usize) -> Option<Instant> {
        self.records
            .iter()
            .filter(|entry| entry.owner.worker_id == worker_id)
            .filter(|entry| entry.state() == RetryState::Scheduled)
            .map(|entry| entry.next_retry_at())
            .min()
    }

    /// The attempt succeeded, or failed fatally; drop the record
    pub fn complete(&self, record: &RetryRecord) {
        self.records.remove(&record.id);
    }

    /// The attempt failed with another retryable error
    pub fn record_failure(
        &self,
        record: &RetryRecord,
        error: RecordError,
        retry_after: Option<Duration>,
        now: Instant,
    ) -> RetryDecision {
        let decision = {
            let mut progress = record.progress.lock();
            progress.retries_remaining = progress.retries_remaining.saturating_sub(1);
            progress.last_error = error;

            if progress.retries_remaining == 0 {
                RetryDecision::Exhausted {
                    attempts: progress.attempts,
                    last_error: progress.last_error.clone(),
                }
            } else {
                let attempt = self.policy.retries - progress.retries_remaining + 1;
                let delay = self.policy.delay_with_hint(attempt, retry_after);
                progress.next_retry_at = schedule_at(now, delay);
                RetryDecision::Rescheduled { attempt, delay }
            }
        };

        match &decision {
            RetryDecision::Rescheduled { attempt, delay } => {
                record.transition(RetryState::InFlight, RetryState::Scheduled);
                debug!(
                    retry_id = record.id,
                    attempt,
                    delay_ms = duration_millis(*delay),
                    "Retry rescheduled"
                );
            }
            RetryDecision::Exhausted { attempts, .. } => {
                self.records.remove(&record.id);
                info!(
                    retry_id = record.id,
                    worker_id = record.owner.worker_id,
                    attempts,
                    "Retries exhausted"
                );
            }
        }

        decision
    }

    /// Remove and return every record owned by `worker_id`
    pub fn drain_worker(&self, worker_id: usize) -> Vec<Arc<RetryRecord>> {
        let ids: Vec<u64> = self
            .records
            .iter()
            .filter(|entry| entry.owner.worker_id == worker_id)
            .map(|entry| *entry.key())
            .collect();

        let mut drained: Vec<Arc<RetryRecord>> = ids
            .into_iter()
            .filter_map(|id| self.records.remove(&id).map(|(_, record)| record))
            .collect();
        drained.sort_by_key(|record| record.owner.index);
        drained
    }

    #[cfg(test)]
    pub fn pending_for(&self, worker_id: usize) -> usize {
        self.records
            .iter()
            .filter(|entry| entry.owner.worker_id == worker_id)
            .count()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
