//! Contract between the harness and protocol implementations under test.

use serde::{Deserialize, Serialize};

use crate::commit_log::CommitLog;
use crate::error::ParticipantError;
use crate::events::{Event, Outbound};
use crate::value::StateValue;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Replica,
    Client,
}

/// What a participant may observe about the simulation while handling an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NodeContext {
    pub now_ns: u64,
}

/// A replica or client driven by the transport.
///
/// Implementations must be deterministic: the same sequence of events has
/// to produce the same outbound mail.
pub trait Participant: Send {
    fn id(&self) -> &str;

    fn role(&self) -> Role;

    /// Called once when the scenario starts.
    fn start(&mut self, _ctx: &NodeContext) -> Result<Vec<Outbound>, ParticipantError> {
        Ok(Vec::new())
    }

    fn handle(&mut self, event: &Event, ctx: &NodeContext)
        -> Result<Vec<Outbound>, ParticipantError>;

    fn current_state(&self) -> StateValue;

    /// Replicas expose their commit log. Clients return `None`.
    fn commit_log(&self) -> Option<&CommitLog>;
}
