//! Reference protocols registered by [`ScenarioRegistry::with_builtin`](crate::scenario::ScenarioRegistry::with_builtin).

pub mod toy;

use std::sync::Arc;

use crate::scenario::ScenarioFactory;

pub use toy::{ToyClient, ToyConsensusFactory, ToyReplica};

pub fn builtin() -> Vec<Arc<dyn ScenarioFactory>> {
    vec![
        Arc::new(ToyConsensusFactory::new()),
        Arc::new(ToyConsensusFactory::eager()),
    ]
}
