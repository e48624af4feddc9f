//! Exploration strategy selection and its tuning knobs.

use serde::{Deserialize, Serialize};
use validator::{self, Validate};

use bftlab_core::schedule::{ActionWeights, ByzzFuzzParameters, StrategyKind, StrategyParameters};

#[derive(Debug, Serialize, Deserialize, Validate, Clone, PartialEq)]
pub struct StrategyConfig {
    /// `random`, `fifo`, `exhaustive` or `byzzfuzz`.
    #[serde(default)]
    pub kind: StrategyKind,

    /// Relative weights per action category. The byzzfuzz strategy only
    /// reads the delivery weights.
    #[serde(default)]
    pub weights: ActionWeights,

    #[serde(default)]
    #[validate(range(max = 100_000))]
    pub max_drop_messages: u32,

    #[serde(default)]
    #[validate(range(max = 100_000))]
    pub max_mutate_messages: u32,

    /// Depth of the decision tree the exhaustive strategy branches over.
    #[serde(default = "default_depth_bound")]
    #[validate(range(min = 1, max = 64))]
    pub depth_bound: u32,

    #[serde(default)]
    #[validate(nested)]
    pub byzzfuzz: ByzzFuzzConfig,
}

/// Fault budget of the byzzfuzz strategy.
#[derive(Debug, Serialize, Deserialize, Validate, Clone, PartialEq)]
pub struct ByzzFuzzConfig {
    #[serde(default = "default_fault_count")]
    #[validate(range(max = 64))]
    pub process_faults: u32,

    #[serde(default = "default_fault_count")]
    #[validate(range(max = 64))]
    pub network_faults: u32,

    /// Faults are placed in protocol rounds `1..=rounds`.
    #[serde(default = "default_fault_rounds")]
    #[validate(range(min = 1, max = 1_000))]
    pub rounds: u32,

    /// Payload field carrying the protocol round.
    #[serde(default = "default_round_field")]
    #[validate(length(min = 1))]
    pub round_field: String,
}

fn default_fault_count() -> u32 {
    1
}

fn default_fault_rounds() -> u32 {
    3
}

fn default_round_field() -> String {
    "seq".into()
}

impl Default for ByzzFuzzConfig {
    fn default() -> Self {
        Self {
            process_faults: default_fault_count(),
            network_faults: default_fault_count(),
            rounds: default_fault_rounds(),
            round_field: default_round_field(),
        }
    }
}

fn default_depth_bound() -> u32 {
    8
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            kind: StrategyKind::default(),
            weights: ActionWeights::default(),
            max_drop_messages: 0,
            max_mutate_messages: 0,
            depth_bound: default_depth_bound(),
            byzzfuzz: ByzzFuzzConfig::default(),
        }
    }
}

impl StrategyConfig {
    pub fn parameters(&self) -> StrategyParameters {
        StrategyParameters {
            kind: self.kind,
            weights: self.weights,
            max_drop_messages: self.max_drop_messages,
            max_mutate_messages: self.max_mutate_messages,
            depth_bound: self.depth_bound,
            byzzfuzz: ByzzFuzzParameters {
                process_faults: self.byzzfuzz.process_faults,
                network_faults: self.byzzfuzz.network_faults,
                rounds: self.byzzfuzz.rounds,
                round_field: self.byzzfuzz.round_field.clone(),
            },
        }
    }
}
