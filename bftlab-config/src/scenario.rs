//! Scenario shape: protocol, node counts and the step budget.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use validator::{self, Validate};

use crate::validation;

#[derive(Debug, Serialize, Deserialize, Validate, Clone, PartialEq)]
pub struct ScenarioConfig {
    /// Registered protocol to instantiate.
    #[serde(default = "default_protocol")]
    #[validate(custom(function = validation::validate_identifier))]
    pub protocol: String,

    #[serde(default = "default_replicas")]
    #[validate(range(min = 1, max = 64))]
    pub num_replicas: u32,

    #[serde(default = "default_clients")]
    #[validate(range(max = 64))]
    pub num_clients: u32,

    #[serde(default = "default_requests")]
    #[validate(range(max = 10_000))]
    pub requests_per_client: u32,

    /// Replicas treated as Byzantine. Only their messages may be mutated and
    /// they are excluded from invariant checks.
    #[serde(default)]
    #[validate(custom(function = validation::validate_identifier_set))]
    pub faulty_replicas: BTreeSet<String>,

    /// Maximum number of steps per scenario.
    #[serde(default = "default_budget")]
    #[validate(range(min = 1, max = 10_000_000))]
    pub budget: u64,

    /// Seed for a single simulation. Campaigns derive per-scenario seeds
    /// from `campaign.initial_seed` instead.
    #[serde(default)]
    pub seed: u64,

    /// Steps allowed after global stabilization time before a scenario
    /// without a new commit breaks bounded liveness. Unset disables GST.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 1, max = 10_000_000))]
    pub gst_grace_period: Option<u64>,
}

fn default_protocol() -> String {
    "toy-consensus".into()
}

fn default_replicas() -> u32 {
    4
}

fn default_clients() -> u32 {
    1
}

fn default_requests() -> u32 {
    1
}

fn default_budget() -> u64 {
    200
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            protocol: default_protocol(),
            num_replicas: default_replicas(),
            num_clients: default_clients(),
            requests_per_client: default_requests(),
            faulty_replicas: BTreeSet::new(),
            budget: default_budget(),
            seed: 0,
            gst_grace_period: None,
        }
    }
}
