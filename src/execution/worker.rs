//! # Chunk Worker
//!
//! Runs the record pipeline for one chunk.
//!
//! A worker makes one sequential pass over its chunk in record order, then
//! keeps sweeping the shared [`RetryQueue`] for its own due records until none
//! are left. Everything it learns goes out on its [`WorkerChannels`]:
//!
//! - results lane: one [`RecordOutcome`] per record, written exactly once
//! - errors lane: one [`RecordFailure`] per failed record
//! - verbose/debug/warning lanes: resolver diagnostics and retry scheduling
//! - information lane: chunk start and finish
//!
//! Cancellation stops the first pass before the next record and stops the
//! retry sweeps. Records left behind are counted by the dispatcher.

use futures::future::join_all;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::channels::{RecordFailure, WorkerChannels};
use crate::error::RecordError;
use crate::logging::{log_chunk_operation, log_record_operation, log_retry_operation};
use crate::models::{Chunk, InputRecord, OutcomeKind, RecordId, RecordOutcome};
use crate::orchestration::record_resolver::{
    RecordResolver, Resolution, ResolverNote, ResolverReport,
};
use crate::orchestration::retry_queue::{
    RegisterOutcome, RetryDecision, RetryOwner, RetryQueue, RetryRecord,
};

/// Progress shared with the dispatcher, read after the worker exits or faults
#[derive(Debug, Default)]
pub struct WorkerProgress {
    pub(super) completed_first_pass: AtomicUsize,
    pub(super) first_pass_done: AtomicBool,
}

impl WorkerProgress {
    /// Records whose first attempt has finished
    pub fn completed_first_pass(&self) -> usize {
        self.completed_first_pass.load(Ordering::Acquire)
    }

    pub fn is_first_pass_done(&self) -> bool {
        self.first_pass_done.load(Ordering::Acquire)
    }
}

pub struct ChunkWorker {
    worker_id: usize,
    chunk: Arc<Chunk>,
    channels: Arc<WorkerChannels>,
    resolver: RecordResolver,
    retry_queue: Arc<RetryQueue>,
    progress: Arc<WorkerProgress>,
    cancel: CancellationToken,
    poll_interval: Duration,
}

impl ChunkWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        worker_id: usize,
        chunk: Arc<Chunk>,
        channels: Arc<WorkerChannels>,
        resolver: RecordResolver,
        retry_queue: Arc<RetryQueue>,
        progress: Arc<WorkerProgress>,
        cancel: CancellationToken,
        poll_interval: Duration,
    ) -> Self {
        Self {
            worker_id,
            chunk,
            channels,
            resolver,
            retry_queue,
            progress,
            cancel,
            poll_interval,
        }
    }

    /// Process the chunk to completion or cancellation, then seal the lanes
    pub async fn run(self) {
        let sequence = self.chunk.sequence();
        log_chunk_operation("process", self.worker_id, sequence, self.chunk.len(), "started", None);
        self.channels.information(format!(
            "worker {} started chunk {} ({} records)",
            self.worker_id,
            sequence,
            self.chunk.len()
        ));

        self.first_pass().await;
        self.retry_sweeps().await;

        let status = if self.cancel.is_cancelled() {
            "cancelled"
        } else {
            "completed"
        };
        log_chunk_operation("process", self.worker_id, sequence, self.chunk.len(), status, None);
        self.channels.information(format!(
            "worker {} {} chunk {}",
            self.worker_id, status, sequence
        ));
        self.channels.complete();
    }

    async fn first_pass(&self) {
        for (index, record) in self.chunk.records().iter().enumerate() {
            if self.cancel.is_cancelled() {
                debug!(
                    worker_id = self.worker_id,
                    index, "Cancellation requested, stopping first pass"
                );
                return;
            }

            let report = self.resolver.resolve(record).await;
            self.handle_first_attempt(index, record, report);
            self.progress
                .completed_first_pass
                .store(index + 1, Ordering::Release);
        }
        self.progress.first_pass_done.store(true, Ordering::Release);
    }

    fn handle_first_attempt(&self, index: usize, record: &InputRecord, report: ResolverReport) {
        self.forward_notes(report.notes);
        let table = report.table;

        match report.resolution {
            Resolution::Completed { kind, ids } => self.succeed(index, table, kind, ids, 1),
            Resolution::Failed(error) => self.fail(index, table, error, 1),
            Resolution::Retryable { error, retry_after } => {
                // Retryable errors only come from remote calls, which require a table
                let Some(table_name) = table.clone() else {
                    self.fail(index, table, error, 1);
                    return;
                };

                let owner = RetryOwner {
                    worker_id: self.worker_id,
                    chunk: self.chunk.sequence(),
                    index,
                };
                let reason = error.to_string();
                match self.retry_queue.register(
                    owner,
                    record.clone(),
                    table_name.clone(),
                    error.clone(),
                    retry_after,
                    Instant::now(),
                ) {
                    RegisterOutcome::Scheduled { delay, .. } => {
                        self.announce_retry(index, &table_name, 1, delay, &reason);
                    }
                    RegisterOutcome::Exhausted => self.fail(index, table, error, 1),
                }
            }
        }
    }

    /// Sweep for due retries until none of ours remain
    async fn retry_sweeps(&self) {
        loop {
            if self.cancel.is_cancelled() {
                return;
            }

            let due = self.retry_queue.claim_due(self.worker_id, Instant::now());
            if !due.is_empty() {
                debug!(
                    worker_id = self.worker_id,
                    count = due.len(),
                    "Resubmitting due retries"
                );
                join_all(due.iter().map(|entry| self.retry(entry))).await;
                continue;
            }

            let Some(next_due) = self.retry_queue.next_due_for(self.worker_id) else {
                return;
            };
            let wake_at = next_due.min(Instant::now() + self.poll_interval);

            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = sleep_until(wake_at) => {}
            }
        }
    }

    async fn retry(&self, entry: &RetryRecord) {
        let owner = entry.owner();
        let attempts = entry.attempts();
        let report = self.resolver.resolve(entry.record()).await;
        self.forward_notes(report.notes);
        let table = Some(entry.table().to_string());

        match report.resolution {
            Resolution::Completed { kind, ids } => {
                self.retry_queue.complete(entry);
                self.succeed(owner.index, table, kind, ids, attempts);
            }
            Resolution::Failed(error) => {
                self.retry_queue.complete(entry);
                self.fail(owner.index, table, error, attempts);
            }
            Resolution::Retryable { error, retry_after } => {
                let reason = error.to_string();
                match self
                    .retry_queue
                    .record_failure(entry, error, retry_after, Instant::now())
                {
                    RetryDecision::Rescheduled { attempt, delay } => {
                        self.announce_retry(owner.index, entry.table(), attempt, delay, &reason);
                    }
                    RetryDecision::Exhausted {
                        attempts,
                        last_error,
                    } => self.fail(owner.index, table, last_error, attempts),
                }
            }
        }
    }

    fn succeed(
        &self,
        index: usize,
        table: Option<String>,
        kind: OutcomeKind,
        ids: Vec<RecordId>,
        attempts: u32,
    ) {
        log_record_operation(
            "resolve",
            self.chunk.sequence(),
            index,
            table.as_deref(),
            &kind.to_string(),
            attempts,
        );
        self.channels.result(RecordOutcome {
            kind,
            chunk: self.chunk.sequence(),
            index,
            table,
            ids,
            attempts,
            error: None,
        });
    }

    fn fail(&self, index: usize, table: Option<String>, error: RecordError, attempts: u32) {
        log_record_operation(
            "resolve",
            self.chunk.sequence(),
            index,
            table.as_deref(),
            "failed",
            attempts,
        );
        report_failure(&self.channels, index, table, error, attempts);
    }

    fn announce_retry(&self, index: usize, table: &str, attempt: u32, delay: Duration, reason: &str) {
        log_retry_operation(self.chunk.sequence(), index, table, attempt, delay, reason);
        self.channels.verbose(format!(
            "record {index} of chunk {} scheduled for retry {attempt} in {}ms: {reason}",
            self.chunk.sequence(),
            delay.as_millis()
        ));
    }

    fn forward_notes(&self, notes: Vec<ResolverNote>) {
        for note in notes {
            match note {
                ResolverNote::Verbose(message) => self.channels.verbose(message),
                ResolverNote::Debug(message) => self.channels.debug(message),
                ResolverNote::Warning(message) => self.channels.warning(message),
            }
        }
    }
}

/// Write a `Failed` outcome on the results lane and its error on the errors lane
pub(crate) fn report_failure(
    channels: &WorkerChannels,
    index: usize,
    table: Option<String>,
    error: RecordError,
    attempts: u32,
) {
    channels.result(RecordOutcome {
        kind: OutcomeKind::Failed,
        chunk: channels.chunk(),
        index,
        table: table.clone(),
        ids: vec![],
        attempts,
        error: Some(error.clone()),
    });
    channels.error(RecordFailure {
        chunk: channels.chunk(),
        index,
        table,
        error,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteError;
    use crate::execution::channels::{Envelope, EnvelopeBody, ReportItem};
    use crate::models::OperationKind;
    use crate::orchestration::backoff_calculator::RetryPolicy;
    use crate::orchestration::error_classifier::StandardErrorClassifier;
    use crate::orchestration::record_resolver::ResolverSettings;
    use crate::remote::{LookupQuery, RemoteOperation, RemoteService};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    /// Fails the first `failures` creates with a transient fault
    struct FlakyRemote {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl RemoteService for FlakyRemote {
        async fn execute(&self, _operation: &RemoteOperation) -> Result<RecordId, RemoteError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                Err(RemoteError::transient("gateway timeout"))
            } else {
                Ok(Uuid::new_v4())
            }
        }

        async fn lookup(&self, _query: &LookupQuery) -> Result<Vec<RecordId>, RemoteError> {
            Ok(vec![])
        }
    }

    fn worker(
        remote: Arc<FlakyRemote>,
        records: Vec<InputRecord>,
        retries: u32,
        cancel: CancellationToken,
    ) -> (ChunkWorker, mpsc::UnboundedReceiver<Envelope>, Arc<WorkerProgress>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let resolver = RecordResolver::new(
            remote,
            Arc::new(StandardErrorClassifier::new()),
            Arc::new(ResolverSettings {
                operation: OperationKind::Create,
                default_table: Some("account".to_string()),
                ..Default::default()
            }),
        );
        let queue = Arc::new(RetryQueue::new(RetryPolicy {
            retries,
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: None,
        }));
        let progress = Arc::new(WorkerProgress::default());
        let worker = ChunkWorker::new(
            1,
            Arc::new(Chunk::new(1, records)),
            Arc::new(WorkerChannels::new(1, 1, tx)),
            resolver,
            queue,
            progress.clone(),
            cancel,
            Duration::from_millis(100),
        );
        (worker, rx, progress)
    }

    fn outcomes(rx: &mut mpsc::UnboundedReceiver<Envelope>) -> Vec<RecordOutcome> {
        std::iter::from_fn(|| rx.try_recv().ok())
            .filter_map(|envelope| match envelope.body {
                EnvelopeBody::Item {
                    item: ReportItem::Result(outcome),
                    ..
                } => Some(outcome),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_then_success_reports_attempts() {
        let remote = Arc::new(FlakyRemote {
            failures: 2,
            calls: AtomicU32::new(0),
        });
        let (worker, mut rx, progress) = worker(
            remote.clone(),
            vec![InputRecord::new().with_field("name", "Contoso")],
            3,
            CancellationToken::new(),
        );

        worker.run().await;

        let results = outcomes(&mut rx);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].kind, OutcomeKind::Created);
        assert_eq!(results[0].attempts, 3);
        assert_eq!(progress.completed_first_pass(), 1);
        assert!(progress.is_first_pass_done());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_fail_with_last_error() {
        let remote = Arc::new(FlakyRemote {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
        });
        let (worker, mut rx, _) = worker(
            remote.clone(),
            vec![InputRecord::new().with_field("name", "Fabrikam")],
            2,
            CancellationToken::new(),
        );

        worker.run().await;

        let results = outcomes(&mut rx);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].kind, OutcomeKind::Failed);
        assert_eq!(results[0].attempts, 3);
        assert_eq!(remote.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cancelled_worker_starts_nothing() {
        let remote = Arc::new(FlakyRemote {
            failures: 0,
            calls: AtomicU32::new(0),
        });
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (worker, mut rx, progress) = worker(
            remote.clone(),
            vec![InputRecord::new(), InputRecord::new()],
            3,
            cancel,
        );

        worker.run().await;

        assert!(outcomes(&mut rx).is_empty());
        assert_eq!(progress.completed_first_pass(), 0);
        assert_eq!(remote.calls.load(Ordering::SeqCst), 0);
    }
}
