//! ## bftlab-core::faults
//! **Network fault and payload mutator catalog with per-scenario activation state**
//!
//! A [`FaultCatalog`] is built once and shared between scenarios. Each
//! scenario wraps it in a [`FaultLayer`] that tracks which faults are active,
//! which ones the scheduler may inject, and which fire automatically at a
//! given step.
//!
//! Enabling a partitioning fault rewrites the transport's partition map
//! before `enable` returns.

mod automatic;
mod mutator;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{FaultError, TransportError};
use crate::events::{Event, EventId, NodeId};
use crate::transport::{Router, Transport, DEFAULT_PARTITION};

pub use automatic::{AutomaticFault, AutomaticFaults};
pub use mutator::{FieldMutator, FieldOp, MutationError, Mutator};

/// Matches message-like events by sender, recipient and payload class.
/// Unset fields match anything.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
}

impl MessageFilter {
    pub fn matches(&self, event: &Event) -> bool {
        let Some(payload) = event.payload() else {
            return false;
        };
        field_matches(&self.sender_id, &event.sender_id)
            && field_matches(&self.recipient_id, &event.recipient_id)
            && field_matches(&self.class, &payload.class)
    }
}

fn field_matches(wanted: &Option<String>, actual: &str) -> bool {
    wanted.as_deref().map_or(true, |w| w == actual)
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "behavior", rename_all = "snake_case")]
pub enum FaultBehavior {
    /// Moves one node into its own partition.
    IsolateNode { node_id: NodeId },
    /// Moves each group into its own partition. Nodes not listed stay in
    /// the default partition.
    Partition { groups: Vec<Vec<NodeId>> },
    /// One-shot: returns a node to the default partition.
    HealNode { node_id: NodeId },
    /// One-shot: clears every partition.
    HealNetwork,
    /// While active, partitions no longer block delivery.
    PartitionOverride,
    /// While active, matching queued messages can be omitted by the scheduler.
    OmitMessages {
        #[serde(default)]
        filter: MessageFilter,
    },
    /// Global stabilization time: clears every partition and stays active
    /// for the rest of the scenario.
    GlobalStabilization,
}

impl FaultBehavior {
    pub fn target_node(&self) -> Option<&str> {
        match self {
            FaultBehavior::IsolateNode { node_id } | FaultBehavior::HealNode { node_id } => {
                Some(node_id)
            }
            FaultBehavior::Partition { .. }
            | FaultBehavior::HealNetwork
            | FaultBehavior::PartitionOverride
            | FaultBehavior::OmitMessages { .. }
            | FaultBehavior::GlobalStabilization => None,
        }
    }

    fn is_partitioning(&self) -> bool {
        matches!(
            self,
            FaultBehavior::IsolateNode { .. } | FaultBehavior::Partition { .. }
        )
    }

    fn involves(&self, node_id: &str) -> bool {
        match self {
            FaultBehavior::IsolateNode { node_id: target } => target == node_id,
            FaultBehavior::Partition { groups } => groups.iter().flatten().any(|n| n == node_id),
            _ => false,
        }
    }
}

fn apply_partition(behavior: &FaultBehavior, transport: &mut Transport) -> Result<(), TransportError> {
    match behavior {
        FaultBehavior::IsolateNode { node_id } => {
            transport.isolate_node(node_id)?;
        }
        FaultBehavior::Partition { groups } => {
            for group in groups {
                transport.isolate_nodes(group.iter().map(String::as_str))?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Catalog id of the [`FaultBehavior::GlobalStabilization`] fault.
pub const GST_FAULT_ID: &str = "gst";

/// Catalog entry for a network-level fault.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkFault {
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub behavior: FaultBehavior,
}

impl NetworkFault {
    pub fn new(id: impl Into<String>, name: impl Into<String>, behavior: FaultBehavior) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            behavior,
        }
    }

    pub fn isolate(node_id: &str) -> Self {
        Self::new(
            format!("isolate({node_id})"),
            format!("Isolate {node_id}"),
            FaultBehavior::IsolateNode {
                node_id: node_id.to_string(),
            },
        )
    }

    pub fn partition(groups: Vec<Vec<NodeId>>) -> Self {
        let label = groups
            .iter()
            .map(|g| g.join(","))
            .collect::<Vec<_>>()
            .join("|");
        Self::new(
            format!("partition({label})"),
            format!("Partition {label}"),
            FaultBehavior::Partition { groups },
        )
    }

    pub fn heal(node_id: &str) -> Self {
        Self::new(
            format!("heal({node_id})"),
            format!("Heal {node_id}"),
            FaultBehavior::HealNode {
                node_id: node_id.to_string(),
            },
        )
    }

    pub fn heal_network() -> Self {
        Self::new("heal-network", "Heal network", FaultBehavior::HealNetwork)
    }

    pub fn global_stabilization() -> Self {
        Self::new(GST_FAULT_ID, "Global stabilization time", FaultBehavior::GlobalStabilization)
    }

    pub fn partition_override() -> Self {
        Self::new(
            "partition-override",
            "Deliver across partitions",
            FaultBehavior::PartitionOverride,
        )
    }

    pub fn omit(id: impl Into<String>, filter: MessageFilter) -> Self {
        let id = id.into();
        Self::new(id.clone(), id, FaultBehavior::OmitMessages { filter })
    }

    /// Payload classes the fault is restricted to, if any.
    pub fn input_classes(&self) -> Option<Vec<&str>> {
        match &self.behavior {
            FaultBehavior::OmitMessages {
                filter:
                    MessageFilter {
                        class: Some(class),
                        ..
                    },
            } => Some(vec![class.as_str()]),
            _ => None,
        }
    }
}

/// Registry of faults and mutators available to a scenario.
#[derive(Clone, Debug, Default)]
pub struct FaultCatalog {
    faults: BTreeMap<String, NetworkFault>,
    mutators: BTreeMap<String, Arc<dyn Mutator>>,
}

impl FaultCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_fault(&mut self, fault: NetworkFault) -> Result<(), FaultError> {
        if self.faults.contains_key(&fault.id) {
            return Err(FaultError::DuplicateFault(fault.id));
        }
        self.faults.insert(fault.id.clone(), fault);
        Ok(())
    }

    pub fn register_mutator(&mut self, mutator: Arc<dyn Mutator>) -> Result<(), FaultError> {
        let id = mutator.id().to_string();
        if self.mutators.contains_key(&id) {
            return Err(FaultError::DuplicateMutator(id));
        }
        self.mutators.insert(id, mutator);
        Ok(())
    }

    pub fn fault(&self, fault_id: &str) -> Option<&NetworkFault> {
        self.faults.get(fault_id)
    }

    pub fn mutator(&self, mutator_id: &str) -> Option<&Arc<dyn Mutator>> {
        self.mutators.get(mutator_id)
    }

    pub fn faults(&self) -> impl Iterator<Item = &NetworkFault> {
        self.faults.values()
    }

    pub fn mutators(&self) -> impl Iterator<Item = &Arc<dyn Mutator>> {
        self.mutators.values()
    }
}

/// One entry of the ordered history the partition map is rebuilt from.
#[derive(Clone, Debug, PartialEq, Eq)]
enum PartitionStep {
    Fault(String),
    Heal(NodeId),
}

/// Per-scenario fault state.
#[derive(Clone, Debug)]
pub struct FaultLayer {
    catalog: Arc<FaultCatalog>,
    active: BTreeSet<String>,
    partition_history: Vec<PartitionStep>,
    schedulable: BTreeSet<String>,
    automatic: AutomaticFaults,
    faulty_nodes: BTreeSet<NodeId>,
}

impl FaultLayer {
    pub fn new(catalog: Arc<FaultCatalog>) -> Self {
        Self {
            catalog,
            active: BTreeSet::new(),
            partition_history: Vec::new(),
            schedulable: BTreeSet::new(),
            automatic: AutomaticFaults::default(),
            faulty_nodes: BTreeSet::new(),
        }
    }

    /// Restricts mutation to messages sent by these nodes.
    pub fn with_faulty_nodes<I>(mut self, nodes: I) -> Self
    where
        I: IntoIterator<Item = NodeId>,
    {
        self.faulty_nodes = nodes.into_iter().collect();
        self
    }

    pub fn with_automatic(mut self, faults: Vec<AutomaticFault>) -> Result<Self, FaultError> {
        if let Some(unknown) = faults
            .iter()
            .find(|f| self.catalog.fault(&f.fault_id).is_none())
        {
            return Err(FaultError::UnknownFault(unknown.fault_id.clone()));
        }
        self.automatic = AutomaticFaults::new(faults);
        Ok(self)
    }

    /// Faults the scheduler may activate as node-level actions.
    pub fn with_schedulable<I, S>(mut self, fault_ids: I) -> Result<Self, FaultError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for id in fault_ids {
            let id = id.into();
            if self.catalog.fault(&id).is_none() {
                return Err(FaultError::UnknownFault(id));
            }
            self.schedulable.insert(id);
        }
        Ok(self)
    }

    pub fn register_fault(&mut self, fault: NetworkFault) -> Result<(), FaultError> {
        Arc::make_mut(&mut self.catalog).register_fault(fault)
    }

    pub fn register_mutator(&mut self, mutator: Arc<dyn Mutator>) -> Result<(), FaultError> {
        Arc::make_mut(&mut self.catalog).register_mutator(mutator)
    }

    pub fn catalog(&self) -> &FaultCatalog {
        &self.catalog
    }

    pub fn is_active(&self, fault_id: &str) -> bool {
        self.active.contains(fault_id)
    }

    /// True once a global stabilization fault has been enabled.
    pub fn gst_reached(&self) -> bool {
        self.active.iter().any(|id| {
            self.catalog
                .fault(id)
                .is_some_and(|f| f.behavior == FaultBehavior::GlobalStabilization)
        })
    }

    pub fn active_faults(&self) -> impl Iterator<Item = &str> {
        self.active.iter().map(String::as_str)
    }

    pub fn faulty_nodes(&self) -> &BTreeSet<NodeId> {
        &self.faulty_nodes
    }

    pub fn enable(&mut self, fault_id: &str, transport: &mut Transport) -> Result<(), FaultError> {
        let fault = self
            .catalog
            .fault(fault_id)
            .ok_or_else(|| FaultError::UnknownFault(fault_id.to_string()))?
            .clone();
        if self.active.contains(fault_id) {
            debug!(fault_id, "Fault already active");
            return Ok(());
        }

        match &fault.behavior {
            FaultBehavior::IsolateNode { .. } | FaultBehavior::Partition { .. } => {
                apply_partition(&fault.behavior, transport)?;
                self.active.insert(fault.id.clone());
                self.partition_history
                    .push(PartitionStep::Fault(fault.id.clone()));
            }
            FaultBehavior::HealNode { node_id } => {
                transport.unpartition(node_id);
                let catalog = &self.catalog;
                let healed: Vec<String> = self
                    .active
                    .iter()
                    .filter(|id| {
                        matches!(
                            catalog.fault(id).map(|f| &f.behavior),
                            Some(FaultBehavior::IsolateNode { node_id: target }) if target == node_id
                        )
                    })
                    .cloned()
                    .collect();
                for id in &healed {
                    self.active.remove(id);
                }
                self.partition_history.retain(
                    |step| !matches!(step, PartitionStep::Fault(id) if healed.contains(id)),
                );
                self.partition_history
                    .push(PartitionStep::Heal(node_id.clone()));
            }
            FaultBehavior::HealNetwork | FaultBehavior::GlobalStabilization => {
                transport.reset_partitions();
                let catalog = &self.catalog;
                self.active.retain(|id| {
                    !catalog
                        .fault(id)
                        .is_some_and(|f| f.behavior.is_partitioning())
                });
                self.partition_history.clear();
                if fault.behavior == FaultBehavior::GlobalStabilization {
                    self.active.insert(fault.id.clone());
                }
            }
            FaultBehavior::PartitionOverride => {
                transport.set_partition_override(true);
                self.active.insert(fault.id.clone());
            }
            FaultBehavior::OmitMessages { .. } => {
                self.active.insert(fault.id.clone());
            }
        }

        transport.record_fault(fault_id);
        info!(fault_id, "Fault enabled");
        Ok(())
    }

    /// Deactivates a fault. Disabling a partitioning fault rebuilds the
    /// partition map from the faults still active, so nodes it shares with
    /// another active partition stay cut off.
    pub fn disable(&mut self, fault_id: &str, transport: &mut Transport) -> Result<(), FaultError> {
        let fault = self
            .catalog
            .fault(fault_id)
            .ok_or_else(|| FaultError::UnknownFault(fault_id.to_string()))?;
        if !self.active.remove(fault_id) {
            return Ok(());
        }

        match &fault.behavior {
            FaultBehavior::IsolateNode { .. } | FaultBehavior::Partition { .. } => {
                self.partition_history
                    .retain(|step| !matches!(step, PartitionStep::Fault(id) if id == fault_id));
                self.rebuild_partitions(transport)?;
            }
            FaultBehavior::PartitionOverride => transport.set_partition_override(false),
            FaultBehavior::OmitMessages { .. }
            | FaultBehavior::HealNode { .. }
            | FaultBehavior::HealNetwork
            | FaultBehavior::GlobalStabilization => {}
        }
        info!(fault_id, "Fault disabled");
        Ok(())
    }

    /// Replays the partition history onto a cleared router.
    fn rebuild_partitions(&self, transport: &mut Transport) -> Result<(), TransportError> {
        transport.reset_partitions();
        for step in &self.partition_history {
            match step {
                PartitionStep::Heal(node_id) => transport.unpartition(node_id),
                PartitionStep::Fault(id) => {
                    if let Some(fault) = self.catalog.fault(id) {
                        apply_partition(&fault.behavior, transport)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Ids of automatic faults due at `step`. Each fires once.
    pub fn automatic_faults(&mut self, step: u64) -> Vec<String> {
        self.automatic.drain_due(step)
    }

    pub fn pending_automatic_faults(&self) -> usize {
        self.automatic.remaining()
    }

    /// Whether messages from this event's sender may be mutated at all.
    pub fn may_mutate(&self, event: &Event) -> bool {
        event.kind.is_message()
            && (self.faulty_nodes.is_empty() || self.faulty_nodes.contains(&event.sender_id))
    }

    /// Mutators whose input classes include the event's payload class.
    pub fn mutators_applicable_to(&self, event: &Event) -> Vec<&Arc<dyn Mutator>> {
        match event.payload() {
            Some(payload) => self
                .catalog
                .mutators()
                .filter(|m| m.applies_to(payload))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Active faults that can be applied to a queued message.
    pub fn faults_applicable_to(&self, event: &Event, router: &Router) -> Vec<&str> {
        if !event.is_queued() || !event.kind.is_message() {
            return Vec::new();
        }
        let crosses = !router.have_connectivity(&event.sender_id, &event.recipient_id);
        self.active
            .iter()
            .filter_map(|id| self.catalog.fault(id))
            .filter(|fault| match &fault.behavior {
                FaultBehavior::IsolateNode { .. } | FaultBehavior::Partition { .. } => {
                    crosses
                        && (fault.behavior.involves(&event.sender_id)
                            || fault.behavior.involves(&event.recipient_id))
                }
                FaultBehavior::OmitMessages { filter } => filter.matches(event),
                FaultBehavior::HealNode { .. }
                | FaultBehavior::HealNetwork
                | FaultBehavior::PartitionOverride
                | FaultBehavior::GlobalStabilization => false,
            })
            .map(|fault| fault.id.as_str())
            .collect()
    }

    /// Schedulable faults that are inactive and would change something.
    pub fn schedulable_faults(&self, router: &Router) -> Vec<&NetworkFault> {
        self.schedulable
            .iter()
            .filter(|id| !self.active.contains(*id))
            .filter_map(|id| self.catalog.fault(id))
            .filter(|fault| match &fault.behavior {
                FaultBehavior::HealNode { node_id } => {
                    router.partition_of(node_id) != DEFAULT_PARTITION
                }
                FaultBehavior::HealNetwork => router.is_partitioned(),
                FaultBehavior::IsolateNode { .. }
                | FaultBehavior::Partition { .. }
                | FaultBehavior::PartitionOverride
                | FaultBehavior::OmitMessages { .. } => true,
                FaultBehavior::GlobalStabilization => false,
            })
            .collect()
    }

    /// Applies an active fault to one queued message, omitting it.
    pub fn apply_to_event(
        &self,
        fault_id: &str,
        event_id: EventId,
        transport: &mut Transport,
    ) -> Result<(), FaultError> {
        if self.catalog.fault(fault_id).is_none() {
            return Err(FaultError::UnknownFault(fault_id.to_string()));
        }
        let event = transport
            .event(event_id)
            .ok_or(TransportError::EventNotFound(event_id))?;
        if !event.is_queued() {
            return Err(TransportError::EventNotQueued {
                event_id,
                status: event.status,
            }
            .into());
        }
        if !self
            .faults_applicable_to(event, transport.router())
            .contains(&fault_id)
        {
            return Err(FaultError::FaultNotApplicable {
                fault_id: fault_id.to_string(),
                event_id,
            });
        }
        transport.drop_event(event_id)?;
        debug!(fault_id, event_id, "Fault applied to event");
        Ok(())
    }

    /// Replaces a queued message with its mutated copy.
    pub fn mutate(
        &self,
        event_id: EventId,
        mutator_id: &str,
        transport: &mut Transport,
    ) -> Result<EventId, FaultError> {
        let mutator = Arc::clone(
            self.catalog
                .mutator(mutator_id)
                .ok_or_else(|| FaultError::UnknownMutator(mutator_id.to_string()))?,
        );
        let event = transport
            .event(event_id)
            .ok_or(TransportError::EventNotFound(event_id))?;
        if event.kind.is_message() && !self.may_mutate(event) {
            return Err(FaultError::SenderNotFaulty {
                event_id,
                sender_id: event.sender_id.clone(),
            });
        }
        let replacement = transport.mutate(event_id, mutator.as_ref())?;
        debug!(mutator_id, event_id, replacement, "Event mutated");
        Ok(replacement)
    }
}
