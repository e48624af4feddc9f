//! # bftlab-core
//!
//! Foundation layer of the BFT testing harness: the event and action model,
//! the in-process transport that owns every pending message, and the fault
//! injection layer that turns network faults and payload mutations into
//! schedulable choices.
//!
//! Everything in this crate is single-threaded and deterministic. A scenario
//! owns exactly one [`Transport`](transport::Transport) and one
//! [`FaultLayer`](faults::FaultLayer) and mutates them from the stepping
//! worker only.
//!
//! ### Key Submodules:
//! - `events`: events, payloads and the outbound messages participants emit
//! - `action`: scheduler-visible actions derived from pending events
//! - `transport`: per-node mailboxes, status transitions and the partition router
//! - `faults`: fault/mutator catalog, activation state and automatic faults
//! - `schedule`: scenario parameters and the immutable schedule trace
//! - `time`: `VirtualClock` shared with participants
//!
//! ### Future:
//! - Per-link latency models feeding timeout expiry

pub mod action;
pub mod commit_log;
pub mod error;
pub mod events;
pub mod faults;
pub mod participant;
pub mod schedule;
pub mod time;
pub mod transport;
pub mod value;

pub mod prelude {
    pub use crate::action::{Action, ActionKey, ActionKind, FaultToggle};
    pub use crate::commit_log::CommitLog;
    pub use crate::error::*;
    pub use crate::events::*;
    pub use crate::faults::{
        AutomaticFault, AutomaticFaults, FaultBehavior, FaultCatalog, FaultLayer, FieldMutator,
        FieldOp, MessageFilter, Mutator, NetworkFault, GST_FAULT_ID,
    };
    pub use crate::participant::{NodeContext, Participant, Role};
    pub use crate::schedule::*;
    pub use crate::time::VirtualClock;
    pub use crate::transport::{Router, Transport, TransportStats};
    pub use crate::value::StateValue;
}

pub use error::{FaultError, ParticipantError, TransportError};
