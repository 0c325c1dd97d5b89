//! # Stream Multiplexer
//!
//! Forwards worker output to the caller as it arrives.
//!
//! Workers push tagged envelopes onto one shared queue; the coordinator hands
//! each envelope to [`StreamMultiplexer::accept`]. The multiplexer keeps one
//! [`WorkerHandle`] per active worker holding the last forwarded sequence of
//! each lane, rejects gaps and duplicates, and retires the handle once the
//! worker has completed and every lane has caught up.
//!
//! Within one lane of one worker, forwarding order equals append order and
//! every item is forwarded exactly once. Nothing is promised about ordering
//! across workers or across lanes.

use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::channels::{Envelope, EnvelopeBody, LaneCounts, OutputLane, ReportItem};
use super::completion::OutcomeTally;
use crate::error::MultiplexError;

/// Item delivered to the caller
#[derive(Debug, Clone, PartialEq)]
pub struct ReportEvent {
    pub worker_id: usize,
    pub chunk: u64,
    pub lane: OutputLane,
    /// 1-based position within this worker's lane
    pub sequence: u64,
    pub item: ReportItem,
}

/// Multiplexer bookkeeping for one in-flight worker
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    pub worker_id: usize,
    pub chunk: u64,
    emitted: LaneCounts,
    totals: Option<LaneCounts>,
}

impl WorkerHandle {
    fn new(worker_id: usize, chunk: u64) -> Self {
        Self {
            worker_id,
            chunk,
            emitted: [0; OutputLane::COUNT],
            totals: None,
        }
    }

    /// Last forwarded sequence of `lane`
    pub fn emitted(&self, lane: OutputLane) -> u64 {
        self.emitted[lane.index()]
    }

    pub fn is_completed(&self) -> bool {
        self.totals.is_some()
    }

    /// Completed, and every lane has forwarded as many items as the worker wrote
    pub fn is_drained(&self) -> bool {
        self.totals.is_some_and(|totals| totals == self.emitted)
    }
}

pub type ReportSender = mpsc::UnboundedSender<ReportEvent>;

pub struct StreamMultiplexer {
    handles: HashMap<usize, WorkerHandle>,
    output: ReportSender,
    tally: OutcomeTally,
    forwarded: u64,
}

impl StreamMultiplexer {
    pub fn new(output: ReportSender) -> Self {
        Self {
            handles: HashMap::new(),
            output,
            tally: OutcomeTally::default(),
            forwarded: 0,
        }
    }

    /// Start tracking a freshly dispatched worker
    pub fn register(&mut self, worker_id: usize, chunk: u64) {
        self.handles
            .insert(worker_id, WorkerHandle::new(worker_id, chunk));
    }

    /// Forward or account for one envelope
    pub fn accept(&mut self, envelope: Envelope) -> Result<(), MultiplexError> {
        let worker_id = envelope.worker_id;
        let handle = self
            .handles
            .get_mut(&worker_id)
            .ok_or(MultiplexError::UnknownWorker { worker_id })?;

        match envelope.body {
            EnvelopeBody::Item { sequence, item } => {
                let lane = item.lane();
                let expected = handle.emitted[lane.index()] + 1;
                if sequence != expected {
                    return Err(MultiplexError::OutOfSequence {
                        worker_id,
                        lane: lane.name(),
                        expected,
                        actual: sequence,
                    });
                }
                handle.emitted[lane.index()] = sequence;

                if let ReportItem::Result(outcome) = &item {
                    self.tally.record(outcome);
                }

                let event = ReportEvent {
                    worker_id,
                    chunk: envelope.chunk,
                    lane,
                    sequence,
                    item,
                };
                if self.output.send(event).is_err() {
                    debug!(worker_id, "Caller stopped listening, event dropped");
                }
                self.forwarded += 1;
            }
            EnvelopeBody::Completed { totals } => {
                handle.totals = Some(totals);
            }
        }

        if let Some(handle) = self.handles.get(&worker_id) {
            if handle.is_drained() {
                debug!(
                    worker_id,
                    chunk = handle.chunk,
                    "Worker output drained, retiring handle"
                );
                self.handles.remove(&worker_id);
            } else if handle
                .totals
                .is_some_and(|totals| totals.iter().zip(handle.emitted).any(|(t, e)| e > *t))
            {
                warn!(worker_id, "Worker forwarded more items than it reported");
            }
        }

        Ok(())
    }

    pub fn handle(&self, worker_id: usize) -> Option<&WorkerHandle> {
        self.handles.get(&worker_id)
    }

    /// Handles not yet retired
    pub fn active_handles(&self) -> usize {
        self.handles.len()
    }

    pub fn tally(&self) -> OutcomeTally {
        self.tally
    }

    /// Total items forwarded across every worker and lane
    pub fn forwarded(&self) -> u64 {
        self.forwarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::channels::WorkerChannels;

    fn drain(
        rx: &mut mpsc::UnboundedReceiver<Envelope>,
        mux: &mut StreamMultiplexer,
    ) -> Result<(), MultiplexError> {
        while let Ok(envelope) = rx.try_recv() {
            mux.accept(envelope)?;
        }
        Ok(())
    }

    #[test]
    fn test_forwards_in_append_order_and_retires() {
        let (env_tx, mut env_rx) = mpsc::unbounded_channel();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let mut mux = StreamMultiplexer::new(out_tx);
        mux.register(7, 1);

        let channels = WorkerChannels::new(7, 1, env_tx);
        for n in 0..5 {
            channels.verbose(format!("step {n}"));
        }
        drain(&mut env_rx, &mut mux).unwrap();
        assert_eq!(mux.handle(7).unwrap().emitted(OutputLane::Verbose), 5);

        channels.complete();
        drain(&mut env_rx, &mut mux).unwrap();
        assert_eq!(mux.active_handles(), 0);

        let forwarded: Vec<String> = std::iter::from_fn(|| out_rx.try_recv().ok())
            .map(|event| match event.item {
                ReportItem::Verbose(message) => message,
                other => panic!("unexpected item {other:?}"),
            })
            .collect();
        assert_eq!(
            forwarded,
            (0..5).map(|n| format!("step {n}")).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_gap_is_rejected() {
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let mut mux = StreamMultiplexer::new(out_tx);
        mux.register(1, 1);

        let err = mux
            .accept(Envelope {
                worker_id: 1,
                chunk: 1,
                body: EnvelopeBody::Item {
                    sequence: 2,
                    item: ReportItem::Debug("skipped one".into()),
                },
            })
            .unwrap_err();
        assert_eq!(
            err,
            MultiplexError::OutOfSequence {
                worker_id: 1,
                lane: "debug",
                expected: 1,
                actual: 2
            }
        );
    }

    #[test]
    fn test_unknown_worker_is_rejected() {
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let mut mux = StreamMultiplexer::new(out_tx);
        let err = mux
            .accept(Envelope {
                worker_id: 9,
                chunk: 1,
                body: EnvelopeBody::Completed {
                    totals: [0; OutputLane::COUNT],
                },
            })
            .unwrap_err();
        assert_eq!(err, MultiplexError::UnknownWorker { worker_id: 9 });
    }
}
