//! # Worker Dispatcher
//!
//! Coordinating loop of a bulk run. Pulls chunks from the partitioner, keeps
//! at most `max_parallel` [`ChunkWorker`]s alive in a [`JoinSet`], and feeds
//! every envelope the workers write into the [`StreamMultiplexer`].
//!
//! ## Loop
//!
//! ```text
//!   ┌─▶ fill free slots from the partitioner (skipped once cancelled)
//!   │   no workers left? ─▶ final drain ─▶ RunSummary
//!   │   select! (biased)
//!   │     envelope arrived      ─▶ multiplexer.accept
//!   │     worker exited         ─▶ account leftovers / report fault
//!   │     cancellation observed ─▶ arm grace deadline
//!   │     grace deadline passed ─▶ abort remaining workers
//!   └────────────────────────────┘
//! ```
//!
//! When every slot is busy no chunk is pulled, while forwarding carries on.
//!
//! ## Faults
//!
//! A panicking worker is caught at its task boundary. Each record it had not
//! finished, including its pending retries, is reported as a failed outcome
//! with [`RecordError::WorkerFault`]. Other workers keep running, and the
//! chunk is not retried as a whole.

use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::channels::{Envelope, WorkerChannels};
use super::completion::RunSummary;
use super::multiplexer::{ReportSender, StreamMultiplexer};
use super::worker::{report_failure, ChunkWorker, WorkerProgress};
use crate::error::{BulkError, BulkResult, RecordError};
use crate::logging::{duration_millis, log_chunk_operation, log_error};
use crate::models::{Chunk, InputRecord};
use crate::orchestration::chunk_partitioner::ChunkPartitioner;
use crate::orchestration::record_resolver::RecordResolver;
use crate::orchestration::retry_queue::RetryQueue;

/// Scheduling knobs taken from the run configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherSettings {
    pub max_parallel: usize,
    pub poll_interval: Duration,
    pub cancellation_grace_period: Duration,
}

type WorkerExit = (usize, Result<(), String>);

/// Dispatcher-side view of a running worker
struct ActiveWorker {
    chunk: Arc<Chunk>,
    channels: Arc<WorkerChannels>,
    progress: Arc<WorkerProgress>,
}

impl ActiveWorker {
    /// Indices of records that never finished their first attempt
    fn unstarted(&self) -> std::ops::Range<usize> {
        let total = self.chunk.len();
        if self.progress.is_first_pass_done() {
            return total..total;
        }
        self.progress.completed_first_pass().min(total)..total
    }
}

#[derive(Debug, Default)]
struct RunCounters {
    chunks_dispatched: u64,
    records_dispatched: u64,
    not_processed: u64,
    workers_aborted: u64,
}

pub struct Dispatcher {
    settings: DispatcherSettings,
    resolver: RecordResolver,
    retry_queue: Arc<RetryQueue>,
    cancel: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        settings: DispatcherSettings,
        resolver: RecordResolver,
        retry_queue: Arc<RetryQueue>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            settings,
            resolver,
            retry_queue,
            cancel,
        }
    }

    /// Drive the whole run and return its summary
    pub async fn run<I>(
        self,
        mut partitioner: ChunkPartitioner<I>,
        output: ReportSender,
    ) -> BulkResult<RunSummary>
    where
        I: Iterator<Item = InputRecord>,
    {
        let (envelope_tx, mut envelope_rx) = mpsc::unbounded_channel();
        let mut multiplexer = StreamMultiplexer::new(output);
        let mut workers: JoinSet<WorkerExit> = JoinSet::new();
        let mut active: HashMap<usize, ActiveWorker> = HashMap::new();
        let mut counters = RunCounters::default();
        let mut next_worker_id = 1usize;
        let mut source_exhausted = false;
        let mut grace_deadline: Option<Instant> = None;

        info!(
            max_parallel = self.settings.max_parallel,
            "Bulk run dispatching"
        );

        loop {
            while !source_exhausted
                && !self.cancel.is_cancelled()
                && workers.len() < self.settings.max_parallel
            {
                let Some(chunk) = partitioner.next() else {
                    source_exhausted = true;
                    debug!(
                        chunks = counters.chunks_dispatched,
                        "Record source exhausted"
                    );
                    break;
                };

                let worker_id = next_worker_id;
                next_worker_id += 1;
                counters.chunks_dispatched += 1;
                counters.records_dispatched += chunk.len() as u64;
                multiplexer.register(worker_id, chunk.sequence());
                let worker = self.spawn_worker(&mut workers, worker_id, chunk, &envelope_tx);
                active.insert(worker_id, worker);
            }

            if workers.is_empty() {
                break;
            }

            tokio::select! {
                biased;

                Some(envelope) = envelope_rx.recv() => {
                    if let Err(error) = multiplexer.accept(envelope) {
                        log_error("dispatcher", "forward", &error.to_string(), None);
                        self.cancel.cancel();
                        workers.shutdown().await;
                        return Err(BulkError::Multiplex(error));
                    }
                }

                Some(joined) = workers.join_next() => match joined {
                    Ok((worker_id, Ok(()))) => {
                        if let Some(worker) = active.remove(&worker_id) {
                            counters.not_processed += self.leftovers(worker_id, &worker);
                        }
                    }
                    Ok((worker_id, Err(reason))) => {
                        if let Some(worker) = active.remove(&worker_id) {
                            self.report_fault(worker_id, &worker, &reason);
                        }
                    }
                    Err(error) => {
                        // Panics are caught inside the task; this is an abort or runtime shutdown
                        warn!(error = %error, "Worker task ended without reporting");
                    }
                },

                _ = self.cancel.cancelled(), if grace_deadline.is_none() => {
                    let deadline = Instant::now() + self.settings.cancellation_grace_period;
                    info!(
                        grace_ms = duration_millis(self.settings.cancellation_grace_period),
                        running = workers.len(),
                        "Cancellation requested, waiting for in-flight work"
                    );
                    grace_deadline = Some(deadline);
                }

                _ = sleep_until(grace_deadline.unwrap_or_else(Instant::now)), if grace_deadline.is_some() => {
                    warn!(running = workers.len(), "Grace period elapsed, aborting workers");
                    workers.shutdown().await;
                    break;
                }
            }
        }

        // Whatever is still tracked was aborted or ended without reporting
        for (worker_id, worker) in active.drain() {
            counters.workers_aborted += 1;
            counters.not_processed += self.leftovers(worker_id, &worker);
        }

        drop(envelope_tx);
        while let Ok(envelope) = envelope_rx.try_recv() {
            multiplexer.accept(envelope)?;
        }
        if multiplexer.active_handles() > 0 {
            warn!(
                handles = multiplexer.active_handles(),
                "Worker handles left unretired at end of run"
            );
        }

        let cancelled = self.cancel.is_cancelled();
        let summary = RunSummary::new(
            counters.chunks_dispatched,
            counters.records_dispatched,
            multiplexer.tally(),
            counters.not_processed,
            counters.workers_aborted,
            cancelled,
        );

        info!(
            status = %summary.status,
            chunks = summary.chunks_dispatched,
            records = summary.records_dispatched,
            failed = summary.outcomes.failed,
            not_processed = summary.not_processed,
            forwarded = multiplexer.forwarded(),
            "Bulk run finished"
        );
        Ok(summary)
    }

    fn spawn_worker(
        &self,
        workers: &mut JoinSet<WorkerExit>,
        worker_id: usize,
        chunk: Chunk,
        envelope_tx: &mpsc::UnboundedSender<Envelope>,
    ) -> ActiveWorker {
        let sequence = chunk.sequence();
        let chunk = Arc::new(chunk);
        let channels = Arc::new(WorkerChannels::new(
            worker_id,
            sequence,
            envelope_tx.clone(),
        ));
        let progress = Arc::new(WorkerProgress::default());

        let worker = ChunkWorker::new(
            worker_id,
            Arc::clone(&chunk),
            Arc::clone(&channels),
            self.resolver.clone(),
            Arc::clone(&self.retry_queue),
            Arc::clone(&progress),
            self.cancel.clone(),
            self.settings.poll_interval,
        );

        log_chunk_operation("dispatch", worker_id, sequence, chunk.len(), "spawned", None);
        let span = info_span!("chunk_worker", worker_id, chunk = sequence);
        workers.spawn(
            AssertUnwindSafe(worker.run())
                .catch_unwind()
                .map(move |result| (worker_id, result.map_err(panic_reason)))
                .instrument(span),
        );

        ActiveWorker {
            chunk,
            channels,
            progress,
        }
    }

    /// Seal a worker that exited normally and count what it left undone
    fn leftovers(&self, worker_id: usize, worker: &ActiveWorker) -> u64 {
        let unstarted = worker.unstarted().len();
        let pending = self.retry_queue.drain_worker(worker_id).len();
        worker.channels.complete();

        let leftover = (unstarted + pending) as u64;
        if leftover > 0 {
            debug!(
                worker_id,
                chunk = worker.chunk.sequence(),
                unstarted,
                pending,
                "Worker left records without an outcome"
            );
        }
        leftover
    }

    fn report_fault(&self, worker_id: usize, worker: &ActiveWorker, reason: &str) {
        log_error(
            "dispatcher",
            "worker",
            reason,
            Some(&format!("worker {worker_id} chunk {}", worker.chunk.sequence())),
        );

        let fault = RecordError::WorkerFault {
            worker_id,
            reason: reason.to_string(),
        };

        for index in worker.unstarted() {
            let table = self
                .resolver
                .table_for(&worker.chunk.records()[index]);
            report_failure(&worker.channels, index, table, fault.clone(), 1);
        }

        for pending in self.retry_queue.drain_worker(worker_id) {
            report_failure(
                &worker.channels,
                pending.owner().index,
                Some(pending.table().to_string()),
                fault.clone(),
                pending.attempts(),
            );
        }

        worker.channels.complete();
    }
}

fn panic_reason(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "worker panicked".to_string()
    }
}
