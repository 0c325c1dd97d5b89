//! Per-worker output lanes and the envelopes that carry them.
//!
//! Every worker owns a [`WorkerChannels`] writer. Writing an item stamps it
//! with the next sequence number of its lane and pushes a tagged [`Envelope`]
//! onto the single queue shared by all workers. Stamping and sending happen
//! under one lock, so queue order always matches sequence order for a lane.

use parking_lot::Mutex;
use std::fmt;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::RecordError;
use crate::models::RecordOutcome;

/// The six logical output lanes of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputLane {
    Results,
    Errors,
    Verbose,
    Warning,
    Debug,
    Information,
}

impl OutputLane {
    pub const COUNT: usize = 6;

    pub const ALL: [OutputLane; Self::COUNT] = [
        OutputLane::Results,
        OutputLane::Errors,
        OutputLane::Verbose,
        OutputLane::Warning,
        OutputLane::Debug,
        OutputLane::Information,
    ];

    pub fn index(self) -> usize {
        match self {
            OutputLane::Results => 0,
            OutputLane::Errors => 1,
            OutputLane::Verbose => 2,
            OutputLane::Warning => 3,
            OutputLane::Debug => 4,
            OutputLane::Information => 5,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            OutputLane::Results => "results",
            OutputLane::Errors => "errors",
            OutputLane::Verbose => "verbose",
            OutputLane::Warning => "warning",
            OutputLane::Debug => "debug",
            OutputLane::Information => "information",
        }
    }
}

impl fmt::Display for OutputLane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A per-record failure as reported on the errors lane
#[derive(Debug, Clone, PartialEq)]
pub struct RecordFailure {
    pub chunk: u64,
    pub index: usize,
    pub table: Option<String>,
    pub error: RecordError,
}

/// One item written by a worker
#[derive(Debug, Clone, PartialEq)]
pub enum ReportItem {
    Result(RecordOutcome),
    Error(RecordFailure),
    Verbose(String),
    Warning(String),
    Debug(String),
    Information(String),
}

impl ReportItem {
    pub fn lane(&self) -> OutputLane {
        match self {
            ReportItem::Result(_) => OutputLane::Results,
            ReportItem::Error(_) => OutputLane::Errors,
            ReportItem::Verbose(_) => OutputLane::Verbose,
            ReportItem::Warning(_) => OutputLane::Warning,
            ReportItem::Debug(_) => OutputLane::Debug,
            ReportItem::Information(_) => OutputLane::Information,
        }
    }
}

/// Per-lane counters, indexed by [`OutputLane::index`]
pub type LaneCounts = [u64; OutputLane::COUNT];

#[derive(Debug, Clone, PartialEq)]
pub enum EnvelopeBody {
    /// Lane item stamped with its 1-based lane sequence
    Item { sequence: u64, item: ReportItem },
    /// Worker finished; carries how many items each lane received
    Completed { totals: LaneCounts },
}

/// Tagged unit travelling on the shared output queue
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub worker_id: usize,
    pub chunk: u64,
    pub body: EnvelopeBody,
}

pub type EnvelopeSender = mpsc::UnboundedSender<Envelope>;
pub type EnvelopeReceiver = mpsc::UnboundedReceiver<Envelope>;

#[derive(Debug)]
struct LaneState {
    counts: LaneCounts,
    completed: bool,
}

/// Writer side of one worker's six lanes
#[derive(Debug)]
pub struct WorkerChannels {
    worker_id: usize,
    chunk: u64,
    sender: EnvelopeSender,
    state: Mutex<LaneState>,
}

impl WorkerChannels {
    pub fn new(worker_id: usize, chunk: u64, sender: EnvelopeSender) -> Self {
        Self {
            worker_id,
            chunk,
            sender,
            state: Mutex::new(LaneState {
                counts: [0; OutputLane::COUNT],
                completed: false,
            }),
        }
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    pub fn chunk(&self) -> u64 {
        self.chunk
    }

    /// Append `item` to its lane. Items written after completion are dropped.
    pub fn emit(&self, item: ReportItem) {
        let mut state = self.state.lock();
        if state.completed {
            debug!(
                worker_id = self.worker_id,
                lane = %item.lane(),
                "Dropping item written after worker completion"
            );
            return;
        }

        let lane = item.lane().index();
        state.counts[lane] += 1;
        let sequence = state.counts[lane];
        self.send(EnvelopeBody::Item { sequence, item });
    }

    pub fn result(&self, outcome: RecordOutcome) {
        self.emit(ReportItem::Result(outcome));
    }

    pub fn error(&self, failure: RecordFailure) {
        self.emit(ReportItem::Error(failure));
    }

    pub fn verbose(&self, message: impl Into<String>) {
        self.emit(ReportItem::Verbose(message.into()));
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.emit(ReportItem::Warning(message.into()));
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.emit(ReportItem::Debug(message.into()));
    }

    pub fn information(&self, message: impl Into<String>) {
        self.emit(ReportItem::Information(message.into()));
    }

    /// Seal the lanes and announce final per-lane totals. Idempotent.
    pub fn complete(&self) {
        let mut state = self.state.lock();
        if state.completed {
            return;
        }
        state.completed = true;
        let totals = state.counts;
        self.send(EnvelopeBody::Completed { totals });
    }

    pub fn is_completed(&self) -> bool {
        self.state.lock().completed
    }

    // Called with the state lock held so queue order follows sequence order.
    fn send(&self, body: EnvelopeBody) {
        let envelope = Envelope {
            worker_id: self.worker_id,
            chunk: self.chunk,
            body,
        };
        if self.sender.send(envelope).is_err() {
            debug!(
                worker_id = self.worker_id,
                "Output queue closed, envelope discarded"
            );
        }
    }
}
