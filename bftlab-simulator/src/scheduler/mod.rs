//! ## bftlab-simulator::scheduler
//! **Exploration strategies choosing one enabled action per step**
//!
//! ### Strategies:
//! - `random`: seeded weighted choice by action kind
//! - `fifo`: first enabled delivery or timeout, no randomness
//! - `replay`: re-applies a recorded schedule, failing loudly on divergence
//! - `exhaustive`: depth-bounded DFS over the action tree with a frontier
//!   shared between scenarios
//! - `byzzfuzz`: seeded random deliveries plus a small number of
//!   round-scoped partitions and message corruptions
//!
//! A strategy instance belongs to exactly one scenario. Only the exhaustive
//! frontier is shared, behind its own lock.

mod byzzfuzz;
mod exhaustive;
mod fifo;
mod random;
mod replay;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use bftlab_core::action::{Action, ActionKey};
use bftlab_core::events::NodeId;
use bftlab_core::schedule::{StrategyKind, StrategyParameters, TerminationKind};
use bftlab_core::value::StateValue;

pub use byzzfuzz::ByzzFuzzStrategy;
pub use exhaustive::{ExhaustiveStrategy, FrontierStats, SharedFrontier};
pub use fifo::FifoStrategy;
pub use random::RandomStrategy;
pub use replay::ReplayStrategy;

/// What a strategy may know about the scenario it is driving.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScenarioMetadata {
    pub scenario_id: String,
    pub step: u64,
    pub budget: u64,
    pub seed: u64,
    pub replicas: Vec<NodeId>,
    /// Global stabilization time has been reached.
    pub after_gst: bool,
}

/// Read-only view of a strategy's per-scenario state.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StrategyMetadata {
    pub strategy: String,
    pub scenario_id: String,
    pub decisions: u64,
    pub details: BTreeMap<String, StateValue>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayDivergence {
    pub step: usize,
    pub expected: Action,
    pub enabled: Vec<Action>,
}

impl fmt::Display for ReplayDivergence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "step {}: recorded action {} is not enabled; enabled actions:",
            self.step, self.expected
        )?;
        for action in &self.enabled {
            writeln!(f, "  - {action}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Replay diverged at {0}")]
    ReplayDivergence(Box<ReplayDivergence>),

    #[error("Exploration prefix diverged at depth {depth}: {expected:?} is not enabled")]
    PrefixDiverged { depth: usize, expected: ActionKey },

    #[error("Strategy '{0:?}' cannot be created from parameters alone")]
    NotConfigurable(StrategyKind),
}

pub trait ExplorationStrategy: Send {
    fn id(&self) -> &str;

    /// Called once before the first step of a scenario.
    fn initialize_scenario(&mut self, _scenario: &ScenarioMetadata) {}

    /// Picks one element of `enabled`, or `None` when nothing should run.
    fn next_action(
        &mut self,
        enabled: &[Action],
        scenario: &ScenarioMetadata,
    ) -> Result<Option<Action>, SchedulerError>;

    /// Operator fault toggle due at this step. Toggles are never part of
    /// the enabled set, so only a replay of a recorded schedule has one.
    fn pending_toggle(&mut self, _scenario: &ScenarioMetadata) -> Option<Action> {
        None
    }

    /// Called once after the scenario terminated.
    fn finish_scenario(&mut self, _scenario: &ScenarioMetadata, _termination: TerminationKind) {}

    fn metadata(&self, scenario_id: &str) -> StrategyMetadata;
}

/// First deliver or trigger action in the default ordering.
pub(crate) fn first_delivery(enabled: &[Action]) -> Option<&Action> {
    enabled.iter().find(|a| {
        matches!(
            a,
            Action::DeliverMessageAction { .. } | Action::TriggerTimeoutAction { .. }
        )
    })
}

/// Builds one strategy per scenario from shared parameters. Exhaustive
/// strategies created by the same factory share one frontier.
#[derive(Clone)]
pub struct StrategyFactory {
    parameters: StrategyParameters,
    frontier: Option<Arc<SharedFrontier>>,
}

impl StrategyFactory {
    pub fn new(parameters: StrategyParameters) -> Result<Self, SchedulerError> {
        let frontier = match parameters.kind {
            StrategyKind::Exhaustive => Some(Arc::new(SharedFrontier::new(parameters.depth_bound))),
            StrategyKind::Random | StrategyKind::Fifo | StrategyKind::ByzzFuzz => None,
            StrategyKind::Replay => return Err(SchedulerError::NotConfigurable(parameters.kind)),
        };
        Ok(Self {
            parameters,
            frontier,
        })
    }

    pub fn parameters(&self) -> &StrategyParameters {
        &self.parameters
    }

    pub fn frontier(&self) -> Option<&Arc<SharedFrontier>> {
        self.frontier.as_ref()
    }

    pub fn create(&self, seed: u64) -> Box<dyn ExplorationStrategy> {
        match (&self.frontier, self.parameters.kind) {
            (Some(frontier), _) => Box::new(ExhaustiveStrategy::new(Arc::clone(frontier))),
            (None, StrategyKind::Fifo) => Box::new(FifoStrategy::new()),
            (None, StrategyKind::ByzzFuzz) => Box::new(ByzzFuzzStrategy::new(seed, &self.parameters)),
            (None, _) => Box::new(RandomStrategy::new(seed, &self.parameters)),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use bftlab_core::action::Action;

    pub fn deliver(action_id: u64, event_id: u64) -> Action {
        Action::DeliverMessageAction {
            action_id,
            event_id,
            sender_id: "r0".into(),
            recipient_id: "r1".into(),
            payload: None,
        }
    }

    pub fn drop(action_id: u64, event_id: u64) -> Action {
        Action::DropMessageAction {
            action_id,
            event_id,
            sender_id: "r0".into(),
            recipient_id: "r1".into(),
        }
    }

    pub fn timeout(action_id: u64, event_id: u64) -> Action {
        Action::TriggerTimeoutAction {
            action_id,
            event_id,
            node_id: "r1".into(),
            description: "view-timer".into(),
        }
    }

    pub fn mutate(action_id: u64, event_id: u64) -> Action {
        Action::FaultInjectionAction {
            action_id,
            event_id: Some(event_id),
            fault_id: None,
            mutator_id: Some("propose-shift-seq".into()),
            node_id: None,
            toggle: None,
        }
    }

    pub fn meta(step: u64) -> super::ScenarioMetadata {
        super::ScenarioMetadata {
            scenario_id: "s0".into(),
            step,
            budget: 100,
            seed: 7,
            replicas: vec!["r0".into(), "r1".into(), "r2".into(), "r3".into()],
            after_gst: false,
        }
    }
}
