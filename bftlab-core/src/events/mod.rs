//! ## bftlab-core::events
//! **Units of mail flowing through the transport**
//!
//! Every message, timeout, client request/reply, applied fault and mutated
//! copy of a message is an [`Event`]. Status moves one way only:
//! `QUEUED -> {DELIVERED | DROPPED | MUTATED}`.

use serde::{Deserialize, Serialize};

use crate::value::StateValue;

pub type NodeId = String;
pub type EventId = u64;

/// Protocol payload. `class` names the message type and is what mutators
/// and message filters match on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub class: String,
    pub body: StateValue,
}

impl Payload {
    pub fn new(class: impl Into<String>, body: StateValue) -> Self {
        Self {
            class: class.into(),
            body,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    Queued,
    Delivered,
    Dropped,
    Mutated,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum EventKind {
    Message {
        payload: Payload,
    },
    Timeout {
        description: String,
        expires_at_ns: u64,
    },
    ClientRequest {
        payload: Payload,
    },
    ClientReply {
        payload: Payload,
    },
    FaultInjection {
        fault_id: String,
    },
    MutateMessage {
        payload: Payload,
        original_event_id: EventId,
        mutator_id: String,
    },
}

impl EventKind {
    pub fn payload(&self) -> Option<&Payload> {
        match self {
            EventKind::Message { payload }
            | EventKind::ClientRequest { payload }
            | EventKind::ClientReply { payload }
            | EventKind::MutateMessage { payload, .. } => Some(payload),
            EventKind::Timeout { .. } | EventKind::FaultInjection { .. } => None,
        }
    }

    /// Message-like events travel between nodes and are subject to partitions.
    pub fn is_message(&self) -> bool {
        self.payload().is_some()
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            EventKind::Message { .. } => "Message",
            EventKind::Timeout { .. } => "Timeout",
            EventKind::ClientRequest { .. } => "ClientRequest",
            EventKind::ClientReply { .. } => "ClientReply",
            EventKind::FaultInjection { .. } => "FaultInjection",
            EventKind::MutateMessage { .. } => "MutateMessage",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub event_id: EventId,
    pub sender_id: NodeId,
    pub recipient_id: NodeId,
    pub created_at_ns: u64,
    pub status: EventStatus,
    /// Replacement event, set exactly when `status` is `MUTATED`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replaced_by: Option<EventId>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl Event {
    pub fn is_queued(&self) -> bool {
        self.status == EventStatus::Queued
    }

    pub fn payload(&self) -> Option<&Payload> {
        self.kind.payload()
    }
}

/// New mail produced by a participant in response to an event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    Message { to: NodeId, payload: Payload },
    ClientRequest { to: NodeId, payload: Payload },
    ClientReply { to: NodeId, payload: Payload },
    SetTimeout { description: String, delay_ns: u64 },
    /// Cancels the participant's own queued timeouts, optionally only those
    /// with a matching description.
    ClearTimeouts { description: Option<String> },
}

impl Outbound {
    pub fn message(to: impl Into<NodeId>, class: impl Into<String>, body: StateValue) -> Self {
        Outbound::Message {
            to: to.into(),
            payload: Payload::new(class, body),
        }
    }

    pub fn request(to: impl Into<NodeId>, class: impl Into<String>, body: StateValue) -> Self {
        Outbound::ClientRequest {
            to: to.into(),
            payload: Payload::new(class, body),
        }
    }

    pub fn reply(to: impl Into<NodeId>, class: impl Into<String>, body: StateValue) -> Self {
        Outbound::ClientReply {
            to: to.into(),
            payload: Payload::new(class, body),
        }
    }

    pub fn timeout(description: impl Into<String>, delay_ns: u64) -> Self {
        Outbound::SetTimeout {
            description: description.into(),
            delay_ns,
        }
    }
}
