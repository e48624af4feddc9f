//! Faults that fire at fixed steps without scheduler involvement.

use serde::{Deserialize, Serialize};

/// A fault scheduled to be enabled before a given step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutomaticFault {
    pub step: u64,
    pub fault_id: String,
}

impl AutomaticFault {
    pub fn new(step: u64, fault_id: impl Into<String>) -> Self {
        Self {
            step,
            fault_id: fault_id.into(),
        }
    }
}

/// Step-ordered automatic faults, consumed through a cursor.
#[derive(Clone, Debug, Default)]
pub struct AutomaticFaults {
    faults: Vec<AutomaticFault>,
    cursor: usize,
}

impl AutomaticFaults {
    pub fn new(mut faults: Vec<AutomaticFault>) -> Self {
        // Stable sort keeps configuration order for faults due at the same step.
        faults.sort_by_key(|f| f.step);
        Self { faults, cursor: 0 }
    }

    /// Returns the ids of faults due at or before `step`, advancing the cursor.
    pub fn drain_due(&mut self, step: u64) -> Vec<String> {
        let mut due = Vec::new();
        while let Some(fault) = self.faults.get(self.cursor) {
            if fault.step > step {
                break;
            }
            due.push(fault.fault_id.clone());
            self.cursor += 1;
        }
        due
    }

    pub fn remaining(&self) -> usize {
        self.faults.len() - self.cursor
    }

    pub fn total(&self) -> usize {
        self.faults.len()
    }

    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    pub fn iter(&self) -> impl Iterator<Item = &AutomaticFault> {
        self.faults.iter()
    }
}
