use std::collections::{BTreeMap, BTreeSet};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use bftlab_core::action::{Action, ActionKind};
use bftlab_core::events::{EventId, NodeId, Payload};
use bftlab_core::schedule::{ActionWeights, ByzzFuzzParameters, StrategyParameters};
use bftlab_core::value::StateValue;

use super::{ExplorationStrategy, RandomStrategy, ScenarioMetadata, SchedulerError, StrategyMetadata};

/// Messages of `round` crossing the boundary of `partition` are dropped.
#[derive(Clone, Debug, PartialEq, Eq)]
struct RoundPartition {
    round: u64,
    partition: BTreeSet<NodeId>,
}

impl RoundPartition {
    fn separates(&self, sender: &str, recipient: &str) -> bool {
        self.partition.contains(sender) != self.partition.contains(recipient)
    }
}

/// Messages of `round` from `sender` to `recipients` are corrupted, once
/// per recipient.
#[derive(Clone, Debug, PartialEq, Eq)]
struct RoundCorruption {
    round: u64,
    sender: NodeId,
    recipients: BTreeSet<NodeId>,
    corrupted: BTreeSet<NodeId>,
}

/// Small-scope Byzantine fuzzing.
///
/// At scenario start a fixed number of network faults (a protocol round
/// plus a random partition of the replicas) and process faults (a round, a
/// sender and a random set of recipients) are drawn from the scenario seed.
/// Every other decision is a weighted random choice between deliveries and
/// timeouts; drops and mutations only ever come from the drawn faults.
///
/// The round of a message is its payload's round field plus one. Messages
/// without one are never faulted, and a process fault only fires where the
/// fault layer offers a mutation for the message.
pub struct ByzzFuzzStrategy {
    rng: ChaCha8Rng,
    seed: u64,
    parameters: ByzzFuzzParameters,
    deliveries: RandomStrategy,
    network: Vec<RoundPartition>,
    process: Vec<RoundCorruption>,
    drops: u64,
    mutations: u64,
    decisions: u64,
}

impl ByzzFuzzStrategy {
    pub fn new(seed: u64, parameters: &StrategyParameters) -> Self {
        let deliveries_only = StrategyParameters {
            weights: ActionWeights {
                deliver_message: parameters.weights.deliver_message,
                deliver_timeout: parameters.weights.deliver_timeout,
                drop_message: 0,
                mutate_message: 0,
                inject_fault: 0,
            },
            max_drop_messages: 0,
            max_mutate_messages: 0,
            ..parameters.clone()
        };
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            seed,
            parameters: parameters.byzzfuzz.clone(),
            deliveries: RandomStrategy::new(seed, &deliveries_only),
            network: Vec::new(),
            process: Vec::new(),
            drops: 0,
            mutations: 0,
            decisions: 0,
        }
    }

    fn draw_round(&mut self) -> u64 {
        self.rng.random_range(1..=u64::from(self.parameters.rounds))
    }

    fn draw_subset<'a>(&mut self, nodes: impl Iterator<Item = &'a NodeId>) -> BTreeSet<NodeId> {
        nodes.filter(|_| self.rng.random_bool(0.5)).cloned().collect()
    }

    fn draw_faults(&mut self, replicas: &[NodeId]) {
        self.network.clear();
        self.process.clear();
        if self.parameters.rounds == 0 || replicas.is_empty() {
            return;
        }
        for _ in 0..self.parameters.network_faults {
            let round = self.draw_round();
            let partition = self.draw_subset(replicas.iter());
            self.network.push(RoundPartition { round, partition });
        }
        for _ in 0..self.parameters.process_faults {
            let round = self.draw_round();
            let sender = replicas[self.rng.random_range(0..replicas.len())].clone();
            let recipients = self.draw_subset(replicas.iter().filter(|id| **id != sender));
            self.process.push(RoundCorruption {
                round,
                sender,
                recipients,
                corrupted: BTreeSet::new(),
            });
        }
    }

    fn round_of(&self, payload: Option<&Payload>) -> Option<u64> {
        payload?
            .body
            .get(&self.parameters.round_field)?
            .as_u64()?
            .checked_add(1)
    }

    /// Drop of the first enabled message a network fault cuts off.
    fn partition_drop(&self, enabled: &[Action]) -> Option<Action> {
        let cut: EventId = enabled.iter().find_map(|action| match action {
            Action::DeliverMessageAction {
                event_id,
                sender_id,
                recipient_id,
                payload,
                ..
            } => {
                let round = self.round_of(payload.as_ref())?;
                self.network
                    .iter()
                    .any(|f| f.round == round && f.separates(sender_id, recipient_id))
                    .then_some(*event_id)
            }
            _ => None,
        })?;
        enabled
            .iter()
            .find(|a| a.kind() == ActionKind::DropMessage && a.event_id() == Some(cut))
            .cloned()
    }

    /// Mutation replacing `delivery`, when a process fault covers it.
    fn corruption(&mut self, delivery: &Action, enabled: &[Action]) -> Option<Action> {
        let Action::DeliverMessageAction {
            event_id,
            sender_id,
            recipient_id,
            payload,
            ..
        } = delivery
        else {
            return None;
        };
        let round = self.round_of(payload.as_ref())?;
        let fault = self.process.iter().position(|f| {
            f.round == round
                && f.sender == *sender_id
                && f.recipients.contains(recipient_id)
                && !f.corrupted.contains(recipient_id)
        })?;
        let mutations: Vec<&Action> = enabled
            .iter()
            .filter(|a| a.kind() == ActionKind::MutateMessage && a.event_id() == Some(*event_id))
            .collect();
        if mutations.is_empty() {
            return None;
        }
        let chosen = mutations[self.rng.random_range(0..mutations.len())].clone();
        self.process[fault].corrupted.insert(recipient_id.clone());
        Some(chosen)
    }

    fn describe_faults(&self) -> (StateValue, StateValue) {
        let members = |nodes: &BTreeSet<NodeId>| {
            nodes.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
        };
        let network = self
            .network
            .iter()
            .map(|f| StateValue::from(format!("round {}: {{{}}}", f.round, members(&f.partition))))
            .collect();
        let process = self
            .process
            .iter()
            .map(|f| {
                StateValue::from(format!(
                    "round {}: {} -> {{{}}}",
                    f.round,
                    f.sender,
                    members(&f.recipients)
                ))
            })
            .collect();
        (StateValue::List(network), StateValue::List(process))
    }
}

impl ExplorationStrategy for ByzzFuzzStrategy {
    fn id(&self) -> &str {
        "byzzfuzz"
    }

    fn initialize_scenario(&mut self, scenario: &ScenarioMetadata) {
        self.rng = ChaCha8Rng::seed_from_u64(self.seed);
        self.draw_faults(&scenario.replicas);
        debug!(
            scenario_id = %scenario.scenario_id,
            network_faults = self.network.len(),
            process_faults = self.process.len(),
            "Drew round faults"
        );
    }

    fn next_action(
        &mut self,
        enabled: &[Action],
        scenario: &ScenarioMetadata,
    ) -> Result<Option<Action>, SchedulerError> {
        if !scenario.after_gst {
            if let Some(drop) = self.partition_drop(enabled) {
                self.drops += 1;
                self.decisions += 1;
                return Ok(Some(drop));
            }
        }

        let Some(chosen) = self.deliveries.next_action(enabled, scenario)? else {
            return Ok(None);
        };
        self.decisions += 1;
        match self.corruption(&chosen, enabled) {
            Some(mutation) => {
                self.mutations += 1;
                Ok(Some(mutation))
            }
            None => Ok(Some(chosen)),
        }
    }

    fn metadata(&self, scenario_id: &str) -> StrategyMetadata {
        let (network, process) = self.describe_faults();
        StrategyMetadata {
            strategy: self.id().to_string(),
            scenario_id: scenario_id.to_string(),
            decisions: self.decisions,
            details: BTreeMap::from([
                ("seed".to_string(), StateValue::from(self.seed)),
                ("networkFaults".to_string(), network),
                ("processFaults".to_string(), process),
                ("drops".to_string(), StateValue::from(self.drops)),
                ("mutations".to_string(), StateValue::from(self.mutations)),
            ]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    fn in_round(action: Action, seq: u64) -> Action {
        match action {
            Action::DeliverMessageAction {
                action_id,
                event_id,
                sender_id,
                recipient_id,
                ..
            } => Action::DeliverMessageAction {
                action_id,
                event_id,
                sender_id,
                recipient_id,
                payload: Some(Payload::new(
                    "Propose",
                    StateValue::map([("seq", StateValue::from(seq))]),
                )),
            },
            other => other,
        }
    }

    fn initialized(seed: u64) -> ByzzFuzzStrategy {
        let mut strategy = ByzzFuzzStrategy::new(seed, &StrategyParameters::default());
        strategy.initialize_scenario(&meta(0));
        strategy
    }

    #[test]
    fn faults_are_drawn_from_the_seed() {
        let a = initialized(21);
        let b = initialized(21);
        assert_eq!(a.network, b.network);
        assert_eq!(a.process, b.process);
        assert_eq!(a.network.len(), 1);
        assert_eq!(a.process.len(), 1);
        assert!((1..=3).contains(&a.network[0].round));
        assert!(!a.process[0].recipients.contains(&a.process[0].sender));
        assert_eq!(
            a.metadata("s0").details["networkFaults"],
            b.metadata("s0").details["networkFaults"]
        );
    }

    #[test]
    fn partitioned_round_messages_are_dropped() {
        let mut strategy = initialized(3);
        strategy.process.clear();
        strategy.network = vec![RoundPartition {
            round: 2,
            partition: ["r0".to_string()].into(),
        }];
        // deliver() sends r0 -> r1, which crosses the partition.
        let enabled = vec![in_round(deliver(0, 4), 1), drop(1, 4)];
        assert_eq!(
            strategy.next_action(&enabled, &meta(0)).unwrap(),
            Some(drop(1, 4))
        );

        let other_round = vec![in_round(deliver(0, 4), 0), drop(1, 4)];
        assert_eq!(
            strategy.next_action(&other_round, &meta(1)).unwrap(),
            Some(in_round(deliver(0, 4), 0))
        );

        let stable = ScenarioMetadata {
            after_gst: true,
            ..meta(2)
        };
        assert_eq!(
            strategy.next_action(&enabled, &stable).unwrap(),
            Some(in_round(deliver(0, 4), 1))
        );
    }

    #[test]
    fn messages_without_round_are_never_faulted() {
        let mut strategy = initialized(3);
        strategy.network = vec![RoundPartition {
            round: 1,
            partition: ["r0".to_string()].into(),
        }];
        let enabled = vec![deliver(0, 4), drop(1, 4), mutate(2, 4)];
        for step in 0..20 {
            let action = strategy.next_action(&enabled, &meta(step)).unwrap().unwrap();
            assert_eq!(action.kind(), ActionKind::DeliverMessage);
        }
    }

    #[test]
    fn corruption_fires_once_per_recipient() {
        let mut strategy = initialized(9);
        strategy.network.clear();
        strategy.process = vec![RoundCorruption {
            round: 1,
            sender: "r0".into(),
            recipients: ["r1".to_string()].into(),
            corrupted: BTreeSet::new(),
        }];
        let enabled = vec![in_round(deliver(0, 4), 0), drop(1, 4), mutate(2, 4)];
        assert_eq!(
            strategy.next_action(&enabled, &meta(0)).unwrap(),
            Some(mutate(2, 4))
        );
        assert_eq!(
            strategy.next_action(&enabled, &meta(1)).unwrap(),
            Some(in_round(deliver(0, 4), 0))
        );
        assert_eq!(
            strategy.metadata("s0").details["mutations"],
            StateValue::from(1_u64)
        );
    }
}
