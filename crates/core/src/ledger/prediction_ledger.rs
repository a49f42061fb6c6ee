use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::prediction_record::PredictionRecord;

#[derive(Default)]
struct LedgerState {
    records: Vec<PredictionRecord>,
    next_sequence_id: u64,
}

/// Append-only, in-memory log of finalized predictions.
///
/// Cloning yields another handle onto the same log. Every operation takes the
/// single lock, so a drain never observes half of an append. Sequence ids
/// start at 1 and are never reused, also across drains.
#[derive(Clone, Default)]
pub struct PredictionLedger {
    inner: Arc<Mutex<LedgerState>>,
}

impl PredictionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, LedgerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stamps `record` with the next sequence id, stores it and returns the id.
    pub fn append(&self, mut record: PredictionRecord) -> u64 {
        let mut state = self.state();
        state.next_sequence_id += 1;
        record.sequence_id = state.next_sequence_id;
        state.records.push(record);
        state.next_sequence_id
    }

    /// Removes and returns every record, oldest first.
    pub fn drain(&self) -> Vec<PredictionRecord> {
        std::mem::take(&mut self.state().records)
    }

    pub fn snapshot(&self) -> Vec<PredictionRecord> {
        self.state().records.clone()
    }

    /// Drops records up to and including `sequence_id`. Later appends survive.
    pub fn acknowledge_through(&self, sequence_id: u64) -> usize {
        let mut state = self.state();
        let before = state.records.len();
        state.records.retain(|r| r.sequence_id > sequence_id);
        before - state.records.len()
    }

    pub fn len(&self) -> usize {
        self.state().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().records.is_empty()
    }
}
