//! Per-replica record of decided values.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::CommitLogError;
use crate::value::StateValue;

/// Append-only log keyed by sequence number. Sequence numbers strictly
/// increase but may skip values.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitLog {
    entries: BTreeMap<u64, StateValue>,
}

impl CommitLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, sequence: u64, value: StateValue) -> Result<(), CommitLogError> {
        if let Some(highest) = self.highest_sequence_number() {
            if sequence <= highest {
                return Err(CommitLogError::NonIncreasing { sequence, highest });
            }
        }
        self.entries.insert(sequence, value);
        Ok(())
    }

    /// Appends at the next sequence number and returns it.
    pub fn push(&mut self, value: StateValue) -> Result<u64, CommitLogError> {
        let sequence = match self.highest_sequence_number() {
            Some(highest) => highest
                .checked_add(1)
                .ok_or(CommitLogError::SequenceOverflow(highest))?,
            None => 0,
        };
        self.entries.insert(sequence, value);
        Ok(sequence)
    }

    pub fn lowest_sequence_number(&self) -> Option<u64> {
        self.entries.keys().next().copied()
    }

    pub fn highest_sequence_number(&self) -> Option<u64> {
        self.entries.keys().next_back().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, sequence: u64) -> Option<&StateValue> {
        self.entries.get(&sequence)
    }

    pub fn entries(&self) -> impl Iterator<Item = (u64, &StateValue)> {
        self.entries.iter().map(|(seq, value)| (*seq, value))
    }
}
