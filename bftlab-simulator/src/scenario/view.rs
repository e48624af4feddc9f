use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use bftlab_core::action::Action;
use bftlab_core::events::{Event, NodeId};
use bftlab_core::schedule::{BrokenInvariant, TerminationKind};
use bftlab_core::transport::TransportStats;
use bftlab_core::value::StateValue;

use crate::invariants::PredicateResult;
use crate::scheduler::StrategyMetadata;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScenarioStatus {
    Initializing,
    Running,
    Terminated(TerminationKind),
}

impl ScenarioStatus {
    pub fn termination(&self) -> Option<TerminationKind> {
        match self {
            ScenarioStatus::Terminated(kind) => Some(*kind),
            ScenarioStatus::Initializing | ScenarioStatus::Running => None,
        }
    }
}

/// Immutable picture of a scenario after a step.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioView {
    pub scenario_id: String,
    pub campaign_id: Option<String>,
    pub status: ScenarioStatus,
    pub step: u64,
    pub queued: Vec<Event>,
    pub actions: Vec<Action>,
    pub stats: TransportStats,
    pub active_faults: Vec<String>,
    pub predicates: BTreeMap<String, PredicateResult>,
    pub broken_invariants: Vec<BrokenInvariant>,
    pub states: BTreeMap<NodeId, StateValue>,
    pub strategy: StrategyMetadata,
}

/// Shared handle to the latest published view. Readers clone an `Arc` and
/// never wait on the stepping worker beyond the swap.
#[derive(Clone, Debug)]
pub struct ViewHandle {
    inner: Arc<RwLock<Arc<ScenarioView>>>,
}

impl ViewHandle {
    pub(crate) fn new(view: ScenarioView) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(view))),
        }
    }

    pub(crate) fn publish(&self, view: ScenarioView) {
        *self.inner.write() = Arc::new(view);
    }

    pub fn latest(&self) -> Arc<ScenarioView> {
        Arc::clone(&self.inner.read())
    }
}
