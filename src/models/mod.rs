pub mod chunk;
pub mod match_spec;
pub mod operation;
pub mod outcome;
pub mod record;

// Re-export core models for easy access
pub use chunk::Chunk;
pub use match_spec::{KeySet, MatchSpec};
pub use operation::OperationKind;
pub use outcome::{OutcomeKind, RecordOutcome};
pub use record::{EntityReference, FieldValue, InputRecord, RecordId};
