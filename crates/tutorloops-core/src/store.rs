use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;

use crate::cell::{CellFailure, CellRecord, CellStatus, EvaluationCell, JudgeScores};
use crate::design::{CellKey, CellPlan};
use crate::error::StoreError;
use crate::session::NegotiationSession;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub pending: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Per-cell-keyed results table.
///
/// Each cell is written by exactly one worker; writes lock only that key's
/// shard.
#[derive(Debug, Default)]
pub struct ResultsStore {
    cells: DashMap<CellKey, EvaluationCell>,
}

impl ResultsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&self, plan: &CellPlan) -> Result<(), StoreError> {
        match self.cells.entry(plan.key.clone()) {
            Entry::Occupied(_) => Err(StoreError::Duplicate(plan.key.clone())),
            Entry::Vacant(slot) => {
                slot.insert(EvaluationCell::pending(plan));
                Ok(())
            }
        }
    }

    pub fn complete(
        &self,
        key: &CellKey,
        session: NegotiationSession,
        judgements: Vec<JudgeScores>,
    ) -> Result<(), StoreError> {
        let mut cell = self.pending_cell(key)?;
        cell.complete(session, judgements);
        Ok(())
    }

    pub fn fail(
        &self,
        key: &CellKey,
        session: Option<NegotiationSession>,
        failure: CellFailure,
    ) -> Result<(), StoreError> {
        let mut cell = self.pending_cell(key)?;
        cell.fail(session, failure);
        Ok(())
    }

    fn pending_cell(
        &self,
        key: &CellKey,
    ) -> Result<dashmap::mapref::one::RefMut<'_, CellKey, EvaluationCell>, StoreError> {
        let cell = self
            .cells
            .get_mut(key)
            .ok_or_else(|| StoreError::Unknown(key.clone()))?;
        if cell.status() != CellStatus::Pending {
            return Err(StoreError::AlreadyFinished(key.clone()));
        }
        Ok(cell)
    }

    pub fn get(&self, key: &CellKey) -> Option<EvaluationCell> {
        self.cells.get(key).map(|c| c.value().clone())
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// All rows, sorted by cell key
    pub fn records(&self, include_sessions: bool) -> Vec<CellRecord> {
        let mut records: Vec<CellRecord> = self
            .cells
            .iter()
            .map(|c| c.record(include_sessions))
            .collect();
        records.sort_by_key(CellRecord::key);
        records
    }

    pub fn counts(&self) -> StoreCounts {
        let mut counts = StoreCounts::default();
        for cell in self.cells.iter() {
            match cell.status() {
                CellStatus::Pending => counts.pending += 1,
                CellStatus::Completed => counts.completed += 1,
                CellStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    pub fn pending_keys(&self) -> Vec<CellKey> {
        let mut keys: Vec<CellKey> = self
            .cells
            .iter()
            .filter(|c| c.status() == CellStatus::Pending)
            .map(|c| c.key().clone())
            .collect();
        keys.sort();
        keys
    }
}
