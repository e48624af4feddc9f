//! ## bftlab-core::transport
//! **In-process network owning every pending event of a scenario**
//!
//! The transport keeps one mailbox per node, applies status transitions,
//! routes outbound mail produced by participants back into mailboxes and
//! derives the set of actions the scheduler may choose from.
//!
//! ### Action ordering
//! `available_actions` walks queued events in ascending id. For each event it
//! emits the deliver/trigger action, then the drop action, then one action
//! per compatible active fault (by fault id), then one per applicable
//! mutator (by mutator id). Node-level schedulable faults come last.

mod router;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::action::Action;
use crate::commit_log::CommitLog;
use crate::error::TransportError;
use crate::events::{Event, EventId, EventKind, EventStatus, NodeId, Outbound};
use crate::faults::{FaultLayer, Mutator};
use crate::participant::{NodeContext, Participant, Role};
use crate::time::VirtualClock;
use crate::value::StateValue;

pub use router::{Router, DEFAULT_PARTITION};

/// Sender and recipient recorded on `FaultInjection` events.
pub const NETWORK_NODE: &str = "network";

/// Event counts by status.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportStats {
    pub created: usize,
    pub queued: usize,
    pub delivered: usize,
    pub dropped: usize,
    pub mutated: usize,
}

impl TransportStats {
    /// Every created event is accounted for by exactly one status.
    pub fn is_conserved(&self) -> bool {
        self.created == self.queued + self.delivered + self.dropped + self.mutated
    }
}

pub struct Transport {
    events: BTreeMap<EventId, Event>,
    queued: BTreeSet<EventId>,
    mailboxes: BTreeMap<NodeId, BTreeSet<EventId>>,
    participants: BTreeMap<NodeId, Box<dyn Participant>>,
    router: Router,
    clock: VirtualClock,
    next_event_id: EventId,
    next_action_id: u64,
    partition_override: bool,
}

impl Transport {
    pub fn new(clock: VirtualClock) -> Self {
        Self {
            events: BTreeMap::new(),
            queued: BTreeSet::new(),
            mailboxes: BTreeMap::new(),
            participants: BTreeMap::new(),
            router: Router::new(),
            clock,
            next_event_id: 0,
            next_action_id: 0,
            partition_override: false,
        }
    }

    pub fn add_participant(&mut self, participant: Box<dyn Participant>) -> Result<(), TransportError> {
        let node_id = participant.id().to_string();
        if self.participants.contains_key(&node_id) {
            return Err(TransportError::DuplicateNode(node_id));
        }
        self.mailboxes.entry(node_id.clone()).or_default();
        self.participants.insert(node_id, participant);
        Ok(())
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.participants.keys().map(String::as_str)
    }

    pub fn replica_ids(&self) -> impl Iterator<Item = &str> {
        self.participants
            .iter()
            .filter(|(_, p)| p.role() == Role::Replica)
            .map(|(id, _)| id.as_str())
    }

    pub fn participant(&self, node_id: &str) -> Option<&dyn Participant> {
        self.participants.get(node_id).map(|p| p.as_ref())
    }

    pub fn clock(&self) -> &VirtualClock {
        &self.clock
    }

    fn context(&self) -> NodeContext {
        NodeContext {
            now_ns: self.clock.now_ns(),
        }
    }

    /// Runs every participant's start hook in node-id order.
    pub fn start(&mut self) -> Result<Vec<EventId>, TransportError> {
        let ctx = self.context();
        let node_ids: Vec<NodeId> = self.participants.keys().cloned().collect();
        let mut created = Vec::new();
        for node_id in node_ids {
            let outbound = match self.participants.get_mut(&node_id) {
                Some(participant) => {
                    participant
                        .start(&ctx)
                        .map_err(|source| TransportError::Participant {
                            node_id: node_id.clone(),
                            source,
                        })?
                }
                None => continue,
            };
            created.extend(self.dispatch(&node_id, outbound)?);
        }
        Ok(created)
    }

    /// Adds a new `QUEUED` event to the recipient's mailbox.
    pub fn enqueue(
        &mut self,
        sender_id: &str,
        recipient_id: &str,
        kind: EventKind,
    ) -> Result<EventId, TransportError> {
        if !self.participants.contains_key(recipient_id) {
            return Err(TransportError::UnknownNode(recipient_id.to_string()));
        }
        Ok(self.insert(sender_id, recipient_id, kind, EventStatus::Queued))
    }

    /// Records an applied network fault. The record is never queued.
    pub fn record_fault(&mut self, fault_id: &str) -> EventId {
        self.insert(
            NETWORK_NODE,
            NETWORK_NODE,
            EventKind::FaultInjection {
                fault_id: fault_id.to_string(),
            },
            EventStatus::Delivered,
        )
    }

    fn insert(
        &mut self,
        sender_id: &str,
        recipient_id: &str,
        kind: EventKind,
        status: EventStatus,
    ) -> EventId {
        let event_id = self.next_event_id;
        self.next_event_id += 1;
        trace!(event_id, sender_id, recipient_id, kind = kind.type_name(), "Event created");
        if status == EventStatus::Queued {
            self.queued.insert(event_id);
            self.mailboxes
                .entry(recipient_id.to_string())
                .or_default()
                .insert(event_id);
        }
        self.events.insert(
            event_id,
            Event {
                event_id,
                sender_id: sender_id.to_string(),
                recipient_id: recipient_id.to_string(),
                created_at_ns: self.clock.now_ns(),
                status,
                replaced_by: None,
                kind,
            },
        );
        event_id
    }

    fn queued_event(&self, event_id: EventId) -> Result<&Event, TransportError> {
        let event = self
            .events
            .get(&event_id)
            .ok_or(TransportError::EventNotFound(event_id))?;
        if !event.is_queued() {
            return Err(TransportError::EventNotQueued {
                event_id,
                status: event.status,
            });
        }
        Ok(event)
    }

    fn finish(&mut self, event_id: EventId, status: EventStatus) {
        self.queued.remove(&event_id);
        if let Some(event) = self.events.get_mut(&event_id) {
            event.status = status;
            if let Some(mailbox) = self.mailboxes.get_mut(&event.recipient_id) {
                mailbox.remove(&event_id);
            }
        }
    }

    /// Whether a queued event may be delivered under the current partitions.
    pub fn can_deliver(&self, event: &Event) -> bool {
        match &event.kind {
            EventKind::Timeout { .. } => true,
            EventKind::FaultInjection { .. } => false,
            EventKind::Message { .. }
            | EventKind::ClientRequest { .. }
            | EventKind::ClientReply { .. }
            | EventKind::MutateMessage { .. } => {
                self.partition_override
                    || self
                        .router
                        .have_connectivity(&event.sender_id, &event.recipient_id)
            }
        }
    }

    /// Delivers a message or fires a timeout, returning the events the
    /// recipient produced.
    pub fn deliver(&mut self, event_id: EventId) -> Result<Vec<EventId>, TransportError> {
        let event = self.queued_event(event_id)?;
        if let EventKind::FaultInjection { .. } = event.kind {
            return Err(TransportError::NotDeliverable {
                event_id,
                kind: event.kind.type_name(),
            });
        }
        if !self.can_deliver(event) {
            return Err(TransportError::Partitioned {
                event_id,
                sender_id: event.sender_id.clone(),
                recipient_id: event.recipient_id.clone(),
            });
        }
        if !self.participants.contains_key(&event.recipient_id) {
            return Err(TransportError::UnknownNode(event.recipient_id.clone()));
        }
        if let EventKind::Timeout { expires_at_ns, .. } = event.kind {
            self.clock.advance_to(expires_at_ns);
        }

        self.finish(event_id, EventStatus::Delivered);
        let event = self
            .events
            .get(&event_id)
            .cloned()
            .ok_or(TransportError::EventNotFound(event_id))?;
        let ctx = self.context();
        let recipient_id = event.recipient_id.clone();
        let outbound = match self.participants.get_mut(&recipient_id) {
            Some(participant) => participant.handle(&event, &ctx),
            None => return Err(TransportError::UnknownNode(recipient_id)),
        }
        .map_err(|source| TransportError::Participant {
            node_id: recipient_id.clone(),
            source,
        })?;
        self.dispatch(&recipient_id, outbound)
    }

    fn dispatch(
        &mut self,
        from: &str,
        outbound: Vec<Outbound>,
    ) -> Result<Vec<EventId>, TransportError> {
        let mut created = Vec::with_capacity(outbound.len());
        for mail in outbound {
            match mail {
                Outbound::Message { to, payload } => {
                    created.push(self.enqueue(from, &to, EventKind::Message { payload })?)
                }
                Outbound::ClientRequest { to, payload } => {
                    created.push(self.enqueue(from, &to, EventKind::ClientRequest { payload })?)
                }
                Outbound::ClientReply { to, payload } => {
                    created.push(self.enqueue(from, &to, EventKind::ClientReply { payload })?)
                }
                Outbound::SetTimeout {
                    description,
                    delay_ns,
                } => {
                    let expires_at_ns = self.clock.now_ns().saturating_add(delay_ns);
                    created.push(self.enqueue(
                        from,
                        from,
                        EventKind::Timeout {
                            description,
                            expires_at_ns,
                        },
                    )?)
                }
                Outbound::ClearTimeouts { description } => {
                    self.clear_timeouts(from, description.as_deref())
                }
            }
        }
        Ok(created)
    }

    fn clear_timeouts(&mut self, node_id: &str, description: Option<&str>) {
        let cleared: Vec<EventId> = self
            .mailboxes
            .get(node_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.events.get(id))
            .filter(|event| match &event.kind {
                EventKind::Timeout {
                    description: d, ..
                } => event.sender_id == node_id && description.map_or(true, |wanted| wanted == d),
                _ => false,
            })
            .map(|event| event.event_id)
            .collect();
        for event_id in cleared {
            trace!(event_id, node_id, "Timeout cleared");
            self.finish(event_id, EventStatus::Dropped);
        }
    }

    pub fn drop_event(&mut self, event_id: EventId) -> Result<(), TransportError> {
        self.queued_event(event_id)?;
        self.finish(event_id, EventStatus::Dropped);
        Ok(())
    }

    /// Replaces a queued message with a mutated copy and returns the copy's id.
    pub fn mutate(
        &mut self,
        event_id: EventId,
        mutator: &dyn Mutator,
    ) -> Result<EventId, TransportError> {
        let event = self.queued_event(event_id)?;
        let payload = event
            .payload()
            .ok_or(TransportError::NotMutable(event_id))?;
        if !mutator.applies_to(payload) {
            return Err(TransportError::MutatorNotApplicable {
                mutator_id: mutator.id().to_string(),
                event_id,
            });
        }
        let mutated = mutator
            .mutate(payload)
            .map_err(|e| TransportError::Mutation {
                mutator_id: mutator.id().to_string(),
                reason: e.to_string(),
            })?;
        let sender_id = event.sender_id.clone();
        let recipient_id = event.recipient_id.clone();

        self.finish(event_id, EventStatus::Mutated);
        let replacement = self.insert(
            &sender_id,
            &recipient_id,
            EventKind::MutateMessage {
                payload: mutated,
                original_event_id: event_id,
                mutator_id: mutator.id().to_string(),
            },
            EventStatus::Queued,
        );
        if let Some(original) = self.events.get_mut(&event_id) {
            original.replaced_by = Some(replacement);
        }
        Ok(replacement)
    }

    /// Derives the enabled action set. Action ids increase across calls.
    pub fn available_actions(&mut self, faults: &FaultLayer) -> Vec<Action> {
        let mut next_id = self.next_action_id;
        let mut allocate = || {
            let id = next_id;
            next_id += 1;
            id
        };
        let mut actions = Vec::new();

        for event in self.queued.iter().filter_map(|id| self.events.get(id)) {
            match &event.kind {
                EventKind::Timeout { description, .. } => {
                    actions.push(Action::TriggerTimeoutAction {
                        action_id: allocate(),
                        event_id: event.event_id,
                        node_id: event.recipient_id.clone(),
                        description: description.clone(),
                    });
                }
                EventKind::FaultInjection { .. } => continue,
                EventKind::Message { .. }
                | EventKind::ClientRequest { .. }
                | EventKind::ClientReply { .. }
                | EventKind::MutateMessage { .. } => {
                    if self.can_deliver(event) {
                        actions.push(Action::DeliverMessageAction {
                            action_id: allocate(),
                            event_id: event.event_id,
                            sender_id: event.sender_id.clone(),
                            recipient_id: event.recipient_id.clone(),
                            payload: event.payload().cloned(),
                        });
                    }
                    actions.push(Action::DropMessageAction {
                        action_id: allocate(),
                        event_id: event.event_id,
                        sender_id: event.sender_id.clone(),
                        recipient_id: event.recipient_id.clone(),
                    });
                }
            }

            for fault_id in faults.faults_applicable_to(event, &self.router) {
                actions.push(Action::FaultInjectionAction {
                    action_id: allocate(),
                    event_id: Some(event.event_id),
                    fault_id: Some(fault_id.to_string()),
                    mutator_id: None,
                    node_id: None,
                    toggle: None,
                });
            }
            if faults.may_mutate(event) {
                for mutator in faults.mutators_applicable_to(event) {
                    actions.push(Action::FaultInjectionAction {
                        action_id: allocate(),
                        event_id: Some(event.event_id),
                        fault_id: None,
                        mutator_id: Some(mutator.id().to_string()),
                        node_id: None,
                        toggle: None,
                    });
                }
            }
        }

        for fault in faults.schedulable_faults(&self.router) {
            actions.push(Action::FaultInjectionAction {
                action_id: allocate(),
                event_id: None,
                fault_id: Some(fault.id.clone()),
                mutator_id: None,
                node_id: fault.behavior.target_node().map(str::to_string),
                toggle: None,
            });
        }

        self.next_action_id = next_id;
        actions
    }

    /// Reserves one action id outside the derived action set.
    pub fn allocate_action_id(&mut self) -> u64 {
        let id = self.next_action_id;
        self.next_action_id += 1;
        id
    }

    pub fn partition(&mut self, node_id: &str, partition_id: u64) -> Result<(), TransportError> {
        self.router.assign(node_id, partition_id)
    }

    pub fn unpartition(&mut self, node_id: &str) {
        self.router.heal_node(node_id);
    }

    pub fn isolate_node(&mut self, node_id: &str) -> Result<u64, TransportError> {
        self.router.isolate_node(node_id)
    }

    pub fn isolate_nodes<'a, I>(&mut self, nodes: I) -> Result<u64, TransportError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.router.isolate_nodes(nodes)
    }

    pub fn reset_partitions(&mut self) {
        self.router.reset();
    }

    pub fn have_connectivity(&self, a: &str, b: &str) -> bool {
        self.router.have_connectivity(a, b)
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn set_partition_override(&mut self, enabled: bool) {
        self.partition_override = enabled;
    }

    pub fn partition_override(&self) -> bool {
        self.partition_override
    }

    pub fn event(&self, event_id: EventId) -> Option<&Event> {
        self.events.get(&event_id)
    }

    pub fn events(&self) -> impl Iterator<Item = &Event> {
        self.events.values()
    }

    pub fn queued_events(&self) -> impl Iterator<Item = &Event> {
        self.queued.iter().filter_map(|id| self.events.get(id))
    }

    pub fn mailbox(&self, node_id: &str) -> Vec<&Event> {
        self.mailboxes
            .get(node_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.events.get(id))
            .collect()
    }

    pub fn stats(&self) -> TransportStats {
        let mut stats = TransportStats {
            created: self.events.len(),
            ..TransportStats::default()
        };
        for event in self.events.values() {
            match event.status {
                EventStatus::Queued => stats.queued += 1,
                EventStatus::Delivered => stats.delivered += 1,
                EventStatus::Dropped => stats.dropped += 1,
                EventStatus::Mutated => stats.mutated += 1,
            }
        }
        stats
    }

    /// Copies every replica's commit log in one pass.
    pub fn commit_logs(&self) -> BTreeMap<NodeId, CommitLog> {
        self.participants
            .iter()
            .filter_map(|(id, p)| p.commit_log().map(|log| (id.clone(), log.clone())))
            .collect()
    }

    pub fn participant_states(&self) -> BTreeMap<NodeId, StateValue> {
        self.participants
            .iter()
            .map(|(id, p)| (id.clone(), p.current_state()))
            .collect()
    }
}
