use super::record::InputRecord;

/// Bounded, numbered group of input records; the unit of parallel dispatch
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    sequence: u64,
    records: Vec<InputRecord>,
}

impl Chunk {
    /// `sequence` is 1-based
    pub fn new(sequence: u64, records: Vec<InputRecord>) -> Self {
        Self { sequence, records }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn records(&self) -> &[InputRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
