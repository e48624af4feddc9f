//! Scenario parameters and the schedule trace that reproduces a run.

use std::collections::BTreeSet;
use std::fmt;

use blake3::Hasher;
use serde::{Deserialize, Serialize};

use crate::action::{Action, ActionKind};
use crate::events::NodeId;
use crate::faults::{AutomaticFault, NetworkFault};

pub type ScheduleId = String;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminationKind {
    InvariantBroken,
    BudgetExhausted,
    Errored,
    Stalled,
}

impl TerminationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationKind::InvariantBroken => "invariant_broken",
            TerminationKind::BudgetExhausted => "budget_exhausted",
            TerminationKind::Errored => "errored",
            TerminationKind::Stalled => "stalled",
        }
    }
}

impl fmt::Display for TerminationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A predicate recorded as broken, with the explanation captured at the
/// step it broke.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokenInvariant {
    pub id: String,
    pub explanation: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[default]
    Random,
    Fifo,
    Exhaustive,
    Replay,
    #[serde(rename = "byzzfuzz")]
    ByzzFuzz,
}

/// Relative weights of each action category for the random strategy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionWeights {
    pub deliver_message: u32,
    pub deliver_timeout: u32,
    pub drop_message: u32,
    pub mutate_message: u32,
    pub inject_fault: u32,
}

impl Default for ActionWeights {
    fn default() -> Self {
        Self {
            deliver_message: 99,
            deliver_timeout: 1,
            drop_message: 0,
            mutate_message: 0,
            inject_fault: 0,
        }
    }
}

impl ActionWeights {
    pub fn weight(&self, kind: ActionKind) -> u32 {
        match kind {
            ActionKind::DeliverMessage => self.deliver_message,
            ActionKind::TriggerTimeout => self.deliver_timeout,
            ActionKind::DropMessage => self.drop_message,
            ActionKind::MutateMessage => self.mutate_message,
            ActionKind::InjectFault => self.inject_fault,
        }
    }

    pub fn total(&self) -> u64 {
        ActionKind::ALL
            .iter()
            .map(|kind| u64::from(self.weight(*kind)))
            .sum()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyParameters {
    pub kind: StrategyKind,
    pub weights: ActionWeights,
    pub max_drop_messages: u32,
    pub max_mutate_messages: u32,
    /// Tree depth explored by the exhaustive strategy before it stops branching.
    pub depth_bound: u32,
    pub byzzfuzz: ByzzFuzzParameters,
}

impl Default for StrategyParameters {
    fn default() -> Self {
        Self {
            kind: StrategyKind::Random,
            weights: ActionWeights::default(),
            max_drop_messages: 0,
            max_mutate_messages: 0,
            depth_bound: 8,
            byzzfuzz: ByzzFuzzParameters::default(),
        }
    }
}

/// Small-scope fault budget of the ByzzFuzz strategy: `process_faults`
/// message corruptions and `network_faults` round partitions, each placed
/// in a protocol round drawn from `1..=rounds`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ByzzFuzzParameters {
    pub process_faults: u32,
    pub network_faults: u32,
    pub rounds: u32,
    /// Payload field holding the protocol round. Messages without it are
    /// never faulted.
    pub round_field: String,
}

impl Default for ByzzFuzzParameters {
    fn default() -> Self {
        Self {
            process_faults: 1,
            network_faults: 1,
            rounds: 3,
            round_field: "seq".into(),
        }
    }
}

/// Fixed inputs of a scenario. Two runs with equal parameters and the same
/// strategy decisions produce identical schedules.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScenarioParameters {
    pub protocol: String,
    pub seed: u64,
    pub budget: u64,
    pub num_replicas: u32,
    pub num_clients: u32,
    pub requests_per_client: u32,
    pub faulty_replicas: BTreeSet<NodeId>,
    pub strategy: StrategyParameters,
    pub automatic_faults: Vec<AutomaticFault>,
    pub schedulable_faults: Vec<String>,
    /// Faults registered on top of the protocol's own catalog.
    pub extra_faults: Vec<NetworkFault>,
    /// Enables global stabilization time: when no action is chosen before
    /// GST, GST is declared instead of stalling, and the bounded liveness
    /// predicate then requires a new commit within this many steps.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gst_grace_period: Option<u64>,
}

impl Default for ScenarioParameters {
    fn default() -> Self {
        Self {
            protocol: "toy-consensus".into(),
            seed: 0,
            budget: 100,
            num_replicas: 4,
            num_clients: 1,
            requests_per_client: 1,
            faulty_replicas: BTreeSet::new(),
            strategy: StrategyParameters::default(),
            automatic_faults: Vec::new(),
            schedulable_faults: Vec::new(),
            extra_faults: Vec::new(),
            gst_grace_period: None,
        }
    }
}

/// Ordered trace of the actions applied to one scenario. Frozen once the
/// scenario terminates.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    schedule_id: ScheduleId,
    scenario_id: String,
    parameters: ScenarioParameters,
    actions: Vec<Action>,
    broken_invariants: Vec<BrokenInvariant>,
    termination: TerminationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl Schedule {
    pub fn new(
        scenario_id: impl Into<String>,
        parameters: ScenarioParameters,
        actions: Vec<Action>,
        broken_invariants: Vec<BrokenInvariant>,
        termination: TerminationKind,
        error: Option<String>,
    ) -> Self {
        let scenario_id = scenario_id.into();
        Self {
            schedule_id: format!("{scenario_id}.schedule"),
            scenario_id,
            parameters,
            actions,
            broken_invariants,
            termination,
            error,
        }
    }

    pub fn schedule_id(&self) -> &str {
        &self.schedule_id
    }

    pub fn scenario_id(&self) -> &str {
        &self.scenario_id
    }

    pub fn parameters(&self) -> &ScenarioParameters {
        &self.parameters
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn broken_invariants(&self) -> &[BrokenInvariant] {
        &self.broken_invariants
    }

    pub fn termination(&self) -> TerminationKind {
        self.termination
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// A schedule is buggy when it recorded at least one broken invariant.
    pub fn is_buggy(&self) -> bool {
        !self.broken_invariants.is_empty()
    }

    /// Hex BLAKE3 digest of the canonical JSON encoding.
    pub fn fingerprint(&self) -> Result<String, serde_json::Error> {
        let bytes = serde_json::to_vec(self)?;
        let mut hasher = Hasher::new();
        hasher.update(&bytes);
        Ok(hex::encode(hasher.finalize().as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule(actions: Vec<Action>) -> Schedule {
        Schedule::new(
            "c0-s1",
            ScenarioParameters::default(),
            actions,
            Vec::new(),
            TerminationKind::Stalled,
            None,
        )
    }

    #[test]
    fn stable_shape_is_preserved() {
        let json = serde_json::to_value(schedule(Vec::new())).unwrap();
        for key in ["scheduleId", "scenarioId", "parameters", "actions", "brokenInvariants"] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
        assert_eq!(json["termination"], "STALLED");
    }

    #[test]
    fn fingerprint_tracks_content() {
        let drop = Action::DropMessageAction {
            action_id: 0,
            event_id: 0,
            sender_id: "a".into(),
            recipient_id: "b".into(),
        };
        let a = schedule(vec![drop.clone()]).fingerprint().unwrap();
        let b = schedule(vec![drop]).fingerprint().unwrap();
        let c = schedule(Vec::new()).fingerprint().unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn weights_total_ignores_zero_categories() {
        assert_eq!(ActionWeights::default().total(), 100);
    }
}
