use std::collections::BTreeMap;

use tracing::warn;

use bftlab_core::action::Action;
use bftlab_core::schedule::Schedule;
use bftlab_core::value::StateValue;

use super::{
    ExplorationStrategy, ReplayDivergence, ScenarioMetadata, SchedulerError, StrategyMetadata,
};

/// Re-applies the actions of a recorded schedule in order.
///
/// Recorded actions are matched by the choice they make, not by `action_id`.
pub struct ReplayStrategy {
    recorded: Vec<Action>,
    cursor: usize,
}

impl ReplayStrategy {
    pub fn new(actions: Vec<Action>) -> Self {
        Self {
            recorded: actions,
            cursor: 0,
        }
    }

    pub fn from_schedule(schedule: &Schedule) -> Self {
        Self::new(schedule.actions().to_vec())
    }

    pub fn remaining(&self) -> usize {
        self.recorded.len() - self.cursor
    }
}

impl ExplorationStrategy for ReplayStrategy {
    fn id(&self) -> &str {
        "replay"
    }

    fn pending_toggle(&mut self, _scenario: &ScenarioMetadata) -> Option<Action> {
        let recorded = self.recorded.get(self.cursor)?;
        recorded.fault_toggle()?;
        self.cursor += 1;
        Some(recorded.clone())
    }

    fn next_action(
        &mut self,
        enabled: &[Action],
        scenario: &ScenarioMetadata,
    ) -> Result<Option<Action>, SchedulerError> {
        let Some(expected) = self.recorded.get(self.cursor) else {
            warn!(
                scenario_id = %scenario.scenario_id,
                step = scenario.step,
                "Recorded schedule exhausted"
            );
            return Ok(None);
        };
        match enabled.iter().find(|a| a.same_choice(expected)) {
            Some(action) => {
                self.cursor += 1;
                Ok(Some(action.clone()))
            }
            None => Err(SchedulerError::ReplayDivergence(Box::new(ReplayDivergence {
                step: self.cursor,
                expected: expected.clone(),
                enabled: enabled.to_vec(),
            }))),
        }
    }

    fn metadata(&self, scenario_id: &str) -> StrategyMetadata {
        StrategyMetadata {
            strategy: self.id().to_string(),
            scenario_id: scenario_id.to_string(),
            decisions: self.cursor as u64,
            details: BTreeMap::from([
                ("recorded".to_string(), StateValue::from(self.recorded.len())),
                ("remaining".to_string(), StateValue::from(self.remaining())),
            ]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    #[test]
    fn matches_ignoring_action_id() {
        let mut strategy = ReplayStrategy::new(vec![deliver(0, 4), drop(1, 5)]);
        let chosen = strategy
            .next_action(&[drop(10, 4), deliver(11, 4)], &meta(0))
            .unwrap();
        assert_eq!(chosen, Some(deliver(11, 4)));
        assert_eq!(strategy.remaining(), 1);
    }

    #[test]
    fn divergence_is_an_error() {
        let mut strategy = ReplayStrategy::new(vec![drop(0, 5)]);
        let err = strategy
            .next_action(&[deliver(3, 5)], &meta(0))
            .unwrap_err();
        match err {
            SchedulerError::ReplayDivergence(divergence) => {
                assert_eq!(divergence.step, 0);
                assert_eq!(divergence.enabled, vec![deliver(3, 5)]);
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn recorded_toggles_bypass_the_enabled_set() {
        let toggle = Action::FaultInjectionAction {
            action_id: 2,
            event_id: None,
            fault_id: Some("isolate(r3)".into()),
            mutator_id: None,
            node_id: Some("r3".into()),
            toggle: Some(bftlab_core::action::FaultToggle::Disable),
        };
        let mut strategy = ReplayStrategy::new(vec![deliver(0, 4), toggle.clone()]);
        assert_eq!(strategy.pending_toggle(&meta(0)), None);
        assert_eq!(
            strategy.next_action(&[deliver(1, 4)], &meta(0)).unwrap(),
            Some(deliver(1, 4))
        );
        assert_eq!(strategy.pending_toggle(&meta(1)), Some(toggle));
        assert_eq!(strategy.remaining(), 0);
    }

    #[test]
    fn exhausted_schedule_yields_nothing() {
        let mut strategy = ReplayStrategy::new(Vec::new());
        assert_eq!(strategy.next_action(&[deliver(0, 0)], &meta(0)).unwrap(), None);
    }
}
