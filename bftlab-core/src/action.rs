//! Scheduler-visible actions.
//!
//! Actions are derived fresh from the transport at every step and only ever
//! persisted as part of a [`Schedule`](crate::schedule::Schedule).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::events::{EventId, NodeId, Payload};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum Action {
    DeliverMessageAction {
        action_id: u64,
        event_id: EventId,
        sender_id: NodeId,
        recipient_id: NodeId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Payload>,
    },
    TriggerTimeoutAction {
        action_id: u64,
        event_id: EventId,
        node_id: NodeId,
        description: String,
    },
    DropMessageAction {
        action_id: u64,
        event_id: EventId,
        sender_id: NodeId,
        recipient_id: NodeId,
    },
    /// Applies a mutator to an event, applies an active fault to an event,
    /// or (with no `event_id`) activates a schedulable network fault.
    /// Operator fault toggles carry `toggle` and are never offered by the
    /// transport.
    FaultInjectionAction {
        action_id: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event_id: Option<EventId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fault_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mutator_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        node_id: Option<NodeId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        toggle: Option<FaultToggle>,
    },
}

/// Direction of an operator fault toggle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultToggle {
    Enable,
    Disable,
}

/// Coarse action category used for weighting and metrics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    DeliverMessage,
    TriggerTimeout,
    DropMessage,
    MutateMessage,
    InjectFault,
}

impl ActionKind {
    pub const ALL: [ActionKind; 5] = [
        ActionKind::DeliverMessage,
        ActionKind::TriggerTimeout,
        ActionKind::DropMessage,
        ActionKind::MutateMessage,
        ActionKind::InjectFault,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::DeliverMessage => "deliver_message",
            ActionKind::TriggerTimeout => "trigger_timeout",
            ActionKind::DropMessage => "drop_message",
            ActionKind::MutateMessage => "mutate_message",
            ActionKind::InjectFault => "inject_fault",
        }
    }
}

/// Identity of a choice independent of the per-step `action_id`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ActionKey {
    pub kind: ActionKind,
    pub event_id: Option<EventId>,
    pub fault_id: Option<String>,
    pub mutator_id: Option<String>,
    pub node_id: Option<NodeId>,
    pub toggle: Option<FaultToggle>,
}

impl Action {
    pub fn action_id(&self) -> u64 {
        match self {
            Action::DeliverMessageAction { action_id, .. }
            | Action::TriggerTimeoutAction { action_id, .. }
            | Action::DropMessageAction { action_id, .. }
            | Action::FaultInjectionAction { action_id, .. } => *action_id,
        }
    }

    pub fn event_id(&self) -> Option<EventId> {
        match self {
            Action::DeliverMessageAction { event_id, .. }
            | Action::TriggerTimeoutAction { event_id, .. }
            | Action::DropMessageAction { event_id, .. } => Some(*event_id),
            Action::FaultInjectionAction { event_id, .. } => *event_id,
        }
    }

    pub fn kind(&self) -> ActionKind {
        match self {
            Action::DeliverMessageAction { .. } => ActionKind::DeliverMessage,
            Action::TriggerTimeoutAction { .. } => ActionKind::TriggerTimeout,
            Action::DropMessageAction { .. } => ActionKind::DropMessage,
            Action::FaultInjectionAction {
                mutator_id: Some(_),
                ..
            } => ActionKind::MutateMessage,
            Action::FaultInjectionAction { .. } => ActionKind::InjectFault,
        }
    }

    pub fn key(&self) -> ActionKey {
        let (fault_id, mutator_id, node_id) = match self {
            Action::TriggerTimeoutAction { node_id, .. } => (None, None, Some(node_id.clone())),
            Action::FaultInjectionAction {
                fault_id,
                mutator_id,
                node_id,
                ..
            } => (fault_id.clone(), mutator_id.clone(), node_id.clone()),
            Action::DeliverMessageAction { .. } | Action::DropMessageAction { .. } => {
                (None, None, None)
            }
        };
        ActionKey {
            kind: self.kind(),
            event_id: self.event_id(),
            fault_id,
            mutator_id,
            node_id,
            toggle: self.fault_toggle(),
        }
    }

    /// Set on operator fault toggles, which bypass the enabled-action set.
    pub fn fault_toggle(&self) -> Option<FaultToggle> {
        match self {
            Action::FaultInjectionAction { toggle, .. } => *toggle,
            _ => None,
        }
    }

    /// True when both actions make the same choice, ignoring `action_id`.
    pub fn same_choice(&self, other: &Action) -> bool {
        self.key() == other.key()
    }

    /// Recipient of a delivery, used to check partition filtering.
    pub fn recipient_id(&self) -> Option<&str> {
        match self {
            Action::DeliverMessageAction { recipient_id, .. }
            | Action::DropMessageAction { recipient_id, .. } => Some(recipient_id),
            Action::TriggerTimeoutAction { node_id, .. } => Some(node_id),
            Action::FaultInjectionAction { node_id, .. } => node_id.as_deref(),
        }
    }

    pub fn sender_id(&self) -> Option<&str> {
        match self {
            Action::DeliverMessageAction { sender_id, .. }
            | Action::DropMessageAction { sender_id, .. } => Some(sender_id),
            Action::TriggerTimeoutAction { .. } | Action::FaultInjectionAction { .. } => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::DeliverMessageAction {
                action_id,
                event_id,
                sender_id,
                recipient_id,
                ..
            } => write!(
                f,
                "#{action_id} deliver event {event_id} {sender_id} -> {recipient_id}"
            ),
            Action::TriggerTimeoutAction {
                action_id,
                event_id,
                node_id,
                description,
            } => write!(
                f,
                "#{action_id} trigger timeout {event_id} ({description}) on {node_id}"
            ),
            Action::DropMessageAction {
                action_id,
                event_id,
                sender_id,
                recipient_id,
            } => write!(
                f,
                "#{action_id} drop event {event_id} {sender_id} -> {recipient_id}"
            ),
            Action::FaultInjectionAction {
                action_id,
                event_id,
                fault_id,
                mutator_id,
                node_id,
                toggle,
            } => {
                match toggle {
                    Some(FaultToggle::Enable) => write!(f, "#{action_id} enable")?,
                    Some(FaultToggle::Disable) => write!(f, "#{action_id} disable")?,
                    None => write!(f, "#{action_id} inject")?,
                }
                if let Some(fault_id) = fault_id {
                    write!(f, " fault {fault_id}")?;
                }
                if let Some(mutator_id) = mutator_id {
                    write!(f, " mutator {mutator_id}")?;
                }
                if let Some(event_id) = event_id {
                    write!(f, " on event {event_id}")?;
                }
                if let Some(node_id) = node_id {
                    write!(f, " at {node_id}")?;
                }
                Ok(())
            }
        }
    }
}
