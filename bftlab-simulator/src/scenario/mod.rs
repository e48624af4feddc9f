//! ## bftlab-simulator::scenario
//! **One simulation run from initialization to an immutable schedule**
//!
//! A [`ScenarioController`] owns the transport, the fault state, the
//! invariant engine and one exploration strategy. It is stepped by exactly
//! one worker; other threads read the published [`ScenarioView`].

mod controller;
mod registry;
mod view;

use thiserror::Error;

use bftlab_core::error::{FaultError, TransportError};

use crate::scheduler::SchedulerError;

pub use controller::ScenarioController;
pub use registry::{ScenarioFactory, ScenarioRegistry, ScenarioSetup};
pub use view::{ScenarioStatus, ScenarioView, ViewHandle};

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("Unknown protocol '{0}'")]
    UnknownProtocol(String),

    #[error("Protocol '{0}' is already registered")]
    DuplicateProtocol(String),

    #[error("Invalid scenario parameters: {0}")]
    InvalidParameters(String),

    #[error("Action {0} is not enabled")]
    ActionNotEnabled(String),

    #[error("Action {0} does not name an event, fault or mutator")]
    MalformedAction(String),

    #[error("Scenario '{0}' is not running")]
    NotRunning(String),

    #[error("Scenario '{0}' was already started")]
    AlreadyStarted(String),

    #[error("Scenario '{0}' was cancelled")]
    Cancelled(String),

    #[error(transparent)]
    Fault(#[from] FaultError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

impl ScenarioError {
    /// Whether the error was raised by a participant's handler.
    pub fn is_participant_failure(&self) -> bool {
        matches!(
            self,
            ScenarioError::Transport(TransportError::Participant { .. })
                | ScenarioError::Fault(FaultError::Transport(TransportError::Participant { .. }))
        )
    }
}
