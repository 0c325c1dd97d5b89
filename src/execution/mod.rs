//! # Execution
//!
//! Task-level machinery of a bulk run: the bounded worker pool, the per-chunk
//! worker pipeline, the six output lanes, and the multiplexer that forwards
//! lane items to the caller in order.

pub mod channels;
pub mod completion;
pub mod dispatcher;
pub mod multiplexer;
pub mod worker;

pub use channels::{OutputLane, RecordFailure, ReportItem, WorkerChannels};
pub use completion::{OutcomeTally, RunStatus, RunSummary};
pub use dispatcher::{Dispatcher, DispatcherSettings};
pub use multiplexer::{ReportEvent, StreamMultiplexer, WorkerHandle};
pub use worker::{ChunkWorker, WorkerProgress};
