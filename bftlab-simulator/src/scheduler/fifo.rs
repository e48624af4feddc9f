use std::collections::BTreeMap;

use bftlab_core::action::Action;

use super::{
    first_delivery, ExplorationStrategy, ScenarioMetadata, SchedulerError, StrategyMetadata,
};

/// Delivers in event order. Never drops, mutates or injects.
#[derive(Debug, Default)]
pub struct FifoStrategy {
    decisions: u64,
}

impl FifoStrategy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExplorationStrategy for FifoStrategy {
    fn id(&self) -> &str {
        "fifo"
    }

    fn next_action(
        &mut self,
        enabled: &[Action],
        _scenario: &ScenarioMetadata,
    ) -> Result<Option<Action>, SchedulerError> {
        let chosen = first_delivery(enabled).cloned();
        if chosen.is_some() {
            self.decisions += 1;
        }
        Ok(chosen)
    }

    fn metadata(&self, scenario_id: &str) -> StrategyMetadata {
        StrategyMetadata {
            strategy: self.id().to_string(),
            scenario_id: scenario_id.to_string(),
            decisions: self.decisions,
            details: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    #[test]
    fn skips_drops_and_mutations() {
        let mut strategy = FifoStrategy::new();
        let enabled = vec![drop(0, 0), mutate(1, 0), timeout(2, 1), deliver(3, 2)];
        assert_eq!(
            strategy.next_action(&enabled, &meta(0)).unwrap(),
            Some(timeout(2, 1))
        );
        assert_eq!(strategy.next_action(&[drop(0, 0)], &meta(1)).unwrap(), None);
    }
}
