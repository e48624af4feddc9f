use std::collections::BTreeMap;
use std::sync::Arc;

use bftlab_core::faults::FaultCatalog;
use bftlab_core::participant::Participant;
use bftlab_core::schedule::ScenarioParameters;

use super::ScenarioError;
use crate::invariants::Predicate;

/// Everything a protocol contributes to one scenario.
pub struct ScenarioSetup {
    pub participants: Vec<Box<dyn Participant>>,
    pub catalog: FaultCatalog,
    pub predicates: Vec<Box<dyn Predicate>>,
}

/// Builds fresh participants, faults and predicates for a protocol.
pub trait ScenarioFactory: Send + Sync {
    fn id(&self) -> &str;

    fn description(&self) -> &str;

    fn build(&self, parameters: &ScenarioParameters) -> Result<ScenarioSetup, ScenarioError>;
}

/// Protocols known to a simulation or campaign, passed in explicitly.
#[derive(Clone, Default)]
pub struct ScenarioRegistry {
    factories: BTreeMap<String, Arc<dyn ScenarioFactory>>,
}

impl ScenarioRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the reference protocols.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        for factory in crate::protocols::builtin() {
            registry.factories.insert(factory.id().to_string(), factory);
        }
        registry
    }

    pub fn register(&mut self, factory: Arc<dyn ScenarioFactory>) -> Result<(), ScenarioError> {
        let id = factory.id().to_string();
        if self.factories.contains_key(&id) {
            return Err(ScenarioError::DuplicateProtocol(id));
        }
        self.factories.insert(id, factory);
        Ok(())
    }

    pub fn get(&self, protocol: &str) -> Result<&Arc<dyn ScenarioFactory>, ScenarioError> {
        self.factories
            .get(protocol)
            .ok_or_else(|| ScenarioError::UnknownProtocol(protocol.to_string()))
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}
