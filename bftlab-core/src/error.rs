use thiserror::Error;

use crate::events::{EventId, EventStatus, NodeId};

/// Failure raised by a protocol participant while handling an event.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ParticipantError {
    pub message: String,
}

impl ParticipantError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<CommitLogError> for ParticipantError {
    fn from(err: CommitLogError) -> Self {
        Self::new(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Event {0} not found")]
    EventNotFound(EventId),

    #[error("Event {event_id} is not queued (status {status:?})")]
    EventNotQueued { event_id: EventId, status: EventStatus },

    #[error("Unknown node '{0}'")]
    UnknownNode(NodeId),

    #[error("Node '{0}' is already registered")]
    DuplicateNode(NodeId),

    #[error("Event {event_id} from '{sender_id}' to '{recipient_id}' crosses a partition")]
    Partitioned {
        event_id: EventId,
        sender_id: NodeId,
        recipient_id: NodeId,
    },

    #[error("Event {event_id} of type {kind} cannot be delivered")]
    NotDeliverable { event_id: EventId, kind: &'static str },

    #[error("Event {0} carries no mutable payload")]
    NotMutable(EventId),

    #[error("Mutator '{mutator_id}' does not apply to event {event_id}")]
    MutatorNotApplicable { mutator_id: String, event_id: EventId },

    #[error("Mutator '{mutator_id}' failed: {reason}")]
    Mutation { mutator_id: String, reason: String },

    #[error("Partition ids exhausted")]
    PartitionOverflow,

    #[error("Participant '{node_id}' failed: {source}")]
    Participant {
        node_id: NodeId,
        #[source]
        source: ParticipantError,
    },
}

#[derive(Debug, Error)]
pub enum FaultError {
    #[error("Unknown fault '{0}'")]
    UnknownFault(String),

    #[error("Unknown mutator '{0}'")]
    UnknownMutator(String),

    #[error("Fault '{0}' is already registered")]
    DuplicateFault(String),

    #[error("Mutator '{0}' is already registered")]
    DuplicateMutator(String),

    #[error("Fault '{fault_id}' does not apply to event {event_id}")]
    FaultNotApplicable { fault_id: String, event_id: EventId },

    #[error("Event {event_id} was sent by non-faulty node '{sender_id}' and cannot be mutated")]
    SenderNotFaulty { event_id: EventId, sender_id: NodeId },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommitLogError {
    #[error("Sequence number {sequence} does not exceed highest committed {highest}")]
    NonIncreasing { sequence: u64, highest: u64 },

    #[error("No sequence number follows {0}")]
    SequenceOverflow(u64),
}
