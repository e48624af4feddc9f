use std::collections::BTreeMap;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::trace;

use bftlab_core::action::{Action, ActionKind};
use bftlab_core::schedule::{ActionWeights, StrategyParameters};
use bftlab_core::value::StateValue;

use super::{ExplorationStrategy, ScenarioMetadata, SchedulerError, StrategyMetadata};

/// Picks an action kind with probability proportional to its weight, then
/// an action of that kind uniformly.
///
/// All randomness comes from one `ChaCha8Rng` seeded per scenario, so equal
/// seeds and equal enabled sets give equal choices. Drops stop once global
/// stabilization time is reached.
pub struct RandomStrategy {
    rng: ChaCha8Rng,
    seed: u64,
    weights: ActionWeights,
    drops_left: u32,
    mutations_left: u32,
    decisions: u64,
}

impl RandomStrategy {
    pub fn new(seed: u64, parameters: &StrategyParameters) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            seed,
            weights: parameters.weights,
            drops_left: parameters.max_drop_messages,
            mutations_left: parameters.max_mutate_messages,
            decisions: 0,
        }
    }

    fn within_budget(&self, kind: ActionKind, after_gst: bool) -> bool {
        match kind {
            ActionKind::DropMessage => self.drops_left > 0 && !after_gst,
            ActionKind::MutateMessage => self.mutations_left > 0,
            ActionKind::DeliverMessage | ActionKind::TriggerTimeout | ActionKind::InjectFault => {
                true
            }
        }
    }
}

impl ExplorationStrategy for RandomStrategy {
    fn id(&self) -> &str {
        "random"
    }

    fn next_action(
        &mut self,
        enabled: &[Action],
        scenario: &ScenarioMetadata,
    ) -> Result<Option<Action>, SchedulerError> {
        let mut by_kind: BTreeMap<ActionKind, Vec<&Action>> = BTreeMap::new();
        for action in enabled {
            let kind = action.kind();
            if self.weights.weight(kind) > 0 && self.within_budget(kind, scenario.after_gst) {
                by_kind.entry(kind).or_default().push(action);
            }
        }

        let total: u64 = by_kind
            .keys()
            .map(|kind| u64::from(self.weights.weight(*kind)))
            .sum();
        if total == 0 {
            trace!(scenario_id = %scenario.scenario_id, "No weighted action enabled");
            return Ok(None);
        }

        let mut roll = self.rng.random_range(0..total);
        let mut chosen = None;
        for (kind, actions) in &by_kind {
            let weight = u64::from(self.weights.weight(*kind));
            if roll < weight {
                let index = self.rng.random_range(0..actions.len());
                chosen = Some((*kind, actions[index].clone()));
                break;
            }
            roll -= weight;
        }

        let Some((kind, action)) = chosen else {
            return Ok(None);
        };
        match kind {
            ActionKind::DropMessage => self.drops_left -= 1,
            ActionKind::MutateMessage => self.mutations_left -= 1,
            ActionKind::DeliverMessage | ActionKind::TriggerTimeout | ActionKind::InjectFault => {}
        }
        self.decisions += 1;
        Ok(Some(action))
    }

    fn metadata(&self, scenario_id: &str) -> StrategyMetadata {
        StrategyMetadata {
            strategy: self.id().to_string(),
            scenario_id: scenario_id.to_string(),
            decisions: self.decisions,
            details: BTreeMap::from([
                ("seed".to_string(), StateValue::from(self.seed)),
                ("dropsRemaining".to_string(), StateValue::from(u64::from(self.drops_left))),
                (
                    "mutationsRemaining".to_string(),
                    StateValue::from(u64::from(self.mutations_left)),
                ),
            ]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    fn enabled() -> Vec<Action> {
        vec![
            deliver(0, 0),
            drop(1, 0),
            deliver(2, 1),
            drop(3, 1),
            timeout(4, 2),
            mutate(5, 0),
        ]
    }

    #[test]
    fn same_seed_same_choices() {
        let parameters = StrategyParameters::default();
        let mut a = RandomStrategy::new(42, &parameters);
        let mut b = RandomStrategy::new(42, &parameters);
        for step in 0..50 {
            assert_eq!(
                a.next_action(&enabled(), &meta(step)).unwrap(),
                b.next_action(&enabled(), &meta(step)).unwrap()
            );
        }
    }

    #[test]
    fn zero_weight_kinds_are_never_chosen() {
        let mut strategy = RandomStrategy::new(1, &StrategyParameters::default());
        for step in 0..200 {
            let action = strategy.next_action(&enabled(), &meta(step)).unwrap().unwrap();
            assert!(matches!(
                action.kind(),
                ActionKind::DeliverMessage | ActionKind::TriggerTimeout
            ));
        }
    }

    #[test]
    fn drop_budget_is_respected() {
        let parameters = StrategyParameters {
            weights: ActionWeights {
                deliver_message: 0,
                deliver_timeout: 0,
                drop_message: 1,
                mutate_message: 0,
                inject_fault: 0,
            },
            max_drop_messages: 2,
            ..StrategyParameters::default()
        };
        let mut strategy = RandomStrategy::new(3, &parameters);
        assert!(strategy.next_action(&enabled(), &meta(0)).unwrap().is_some());
        assert!(strategy.next_action(&enabled(), &meta(1)).unwrap().is_some());
        assert!(strategy.next_action(&enabled(), &meta(2)).unwrap().is_none());
        assert_eq!(
            strategy.metadata("s0").details["dropsRemaining"],
            StateValue::from(0_u64)
        );
    }

    #[test]
    fn no_drops_after_gst() {
        let parameters = StrategyParameters {
            weights: ActionWeights {
                deliver_message: 1,
                deliver_timeout: 0,
                drop_message: 100,
                mutate_message: 0,
                inject_fault: 0,
            },
            max_drop_messages: 50,
            ..StrategyParameters::default()
        };
        let mut strategy = RandomStrategy::new(5, &parameters);
        let stable = ScenarioMetadata {
            after_gst: true,
            ..meta(0)
        };
        for _ in 0..30 {
            let action = strategy.next_action(&enabled(), &stable).unwrap().unwrap();
            assert_eq!(action.kind(), ActionKind::DeliverMessage);
        }
    }
}
