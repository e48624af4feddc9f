//! Extra network faults, automatic fault timing and schedulable faults.

use serde::{Deserialize, Serialize};
use validator::{self, Validate, ValidationError};

use bftlab_core::faults::{AutomaticFault, NetworkFault};

use crate::validation;

#[derive(Default, Debug, Serialize, Deserialize, Validate, Clone, PartialEq)]
pub struct FaultsConfig {
    /// Faults registered in addition to the protocol's own catalog.
    #[serde(default)]
    #[validate(custom(function = validate_definitions))]
    pub definitions: Vec<NetworkFault>,

    /// Faults enabled without scheduler involvement when their step is reached.
    #[serde(default)]
    pub automatic: Vec<AutomaticFault>,

    /// Fault ids the scheduler may inject as node-level actions.
    #[serde(default)]
    #[validate(custom(function = validation::validate_fault_ids))]
    pub schedulable: Vec<String>,
}

fn validate_definitions(faults: &[NetworkFault]) -> Result<(), ValidationError> {
    let ids: Vec<String> = faults.iter().map(|f| f.id.clone()).collect();
    validation::validate_fault_ids(&ids)
}
