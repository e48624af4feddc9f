use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use tracing::{debug, warn};

use bftlab_core::action::{Action, ActionKey};
use bftlab_core::schedule::TerminationKind;
use bftlab_core::value::StateValue;

use super::{
    first_delivery, ExplorationStrategy, ScenarioMetadata, SchedulerError, StrategyMetadata,
};

#[derive(Debug, Default)]
struct FrontierState {
    /// Unexplored prefixes, popped from the back for depth-first order.
    pending: Vec<Vec<ActionKey>>,
    started: bool,
    in_flight: usize,
    explored: u64,
    exhausted: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct FrontierStats {
    pub depth_bound: usize,
    pub pending: usize,
    pub in_flight: usize,
    pub explored: u64,
    pub exhausted: bool,
}

/// How long a claim waits for running scenarios to push siblings.
const CLAIM_WAIT: Duration = Duration::from_secs(10);

/// Decision-tree frontier shared by every exhaustive strategy of a campaign.
///
/// Each scenario claims one prefix at its first decision, follows it, and
/// then always takes the first enabled action while pushing every sibling as
/// a new prefix, until the depth bound is reached. A claim that finds no
/// prefix while other scenarios are still exploring waits for them to
/// branch or finish.
#[derive(Debug)]
pub struct SharedFrontier {
    depth_bound: usize,
    state: Mutex<FrontierState>,
    changed: Condvar,
}

impl SharedFrontier {
    pub fn new(depth_bound: u32) -> Self {
        Self {
            depth_bound: depth_bound as usize,
            state: Mutex::new(FrontierState::default()),
            changed: Condvar::new(),
        }
    }

    fn claim(&self) -> Option<Vec<ActionKey>> {
        let mut state = self.state.lock();
        if !state.started {
            state.started = true;
            state.in_flight += 1;
            return Some(Vec::new());
        }
        let deadline = Instant::now() + CLAIM_WAIT;
        loop {
            if let Some(prefix) = state.pending.pop() {
                state.in_flight += 1;
                return Some(prefix);
            }
            if state.in_flight == 0 {
                state.exhausted = true;
                return None;
            }
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                let prefix = state.pending.pop()?;
                state.in_flight += 1;
                return Some(prefix);
            }
        }
    }

    fn branch(&self, prefixes: Vec<Vec<ActionKey>>) {
        let mut state = self.state.lock();
        state.pending.extend(prefixes.into_iter().rev());
        self.changed.notify_all();
    }

    fn release(&self) {
        let mut state = self.state.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        state.explored += 1;
        self.changed.notify_all();
    }

    pub fn stats(&self) -> FrontierStats {
        let state = self.state.lock();
        FrontierStats {
            depth_bound: self.depth_bound,
            pending: state.pending.len(),
            in_flight: state.in_flight,
            explored: state.explored,
            exhausted: state.exhausted,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.state.lock().exhausted
    }
}

pub struct ExhaustiveStrategy {
    frontier: Arc<SharedFrontier>,
    prefix: Option<Vec<ActionKey>>,
    path: Vec<ActionKey>,
    claimed: bool,
    /// Set by `initialize_scenario`; the claim itself is deferred to the
    /// first decision so that siblings pushed meanwhile are visible.
    needs_claim: bool,
    decisions: u64,
}

impl ExhaustiveStrategy {
    pub fn new(frontier: Arc<SharedFrontier>) -> Self {
        Self {
            frontier,
            prefix: None,
            path: Vec::new(),
            claimed: false,
            needs_claim: true,
            decisions: 0,
        }
    }

    fn claim(&mut self, scenario: &ScenarioMetadata) {
        self.needs_claim = false;
        self.prefix = self.frontier.claim();
        self.claimed = self.prefix.is_some();
        match &self.prefix {
            Some(prefix) => debug!(
                scenario_id = %scenario.scenario_id,
                depth = prefix.len(),
                "Claimed exploration prefix"
            ),
            None => warn!(
                scenario_id = %scenario.scenario_id,
                "No unexplored prefix, falling back to FIFO"
            ),
        }
    }

    fn take(&mut self, action: &Action) -> Option<Action> {
        self.path.push(action.key());
        self.decisions += 1;
        Some(action.clone())
    }

    fn release(&mut self) {
        if self.claimed {
            self.frontier.release();
            self.claimed = false;
        }
    }
}

impl ExplorationStrategy for ExhaustiveStrategy {
    fn id(&self) -> &str {
        "exhaustive"
    }

    fn initialize_scenario(&mut self, _scenario: &ScenarioMetadata) {
        self.release();
        self.path.clear();
        self.prefix = None;
        self.needs_claim = true;
    }

    fn next_action(
        &mut self,
        enabled: &[Action],
        scenario: &ScenarioMetadata,
    ) -> Result<Option<Action>, SchedulerError> {
        if self.needs_claim {
            self.claim(scenario);
        }
        let depth = self.path.len();
        let expected = self.prefix.as_ref().and_then(|p| p.get(depth).cloned());
        if let Some(expected) = expected {
            return match enabled.iter().find(|a| a.key() == expected) {
                Some(action) => Ok(self.take(action)),
                None => Err(SchedulerError::PrefixDiverged { depth, expected }),
            };
        }
        if self.prefix.is_some() && depth < self.frontier.depth_bound {
            let Some((first, siblings)) = enabled.split_first() else {
                return Ok(None);
            };
            let prefixes = siblings
                .iter()
                .map(|sibling| {
                    let mut prefix = self.path.clone();
                    prefix.push(sibling.key());
                    prefix
                })
                .collect();
            self.frontier.branch(prefixes);
            return Ok(self.take(first));
        }
        Ok(first_delivery(enabled).and_then(|action| self.take(action)))
    }

    fn finish_scenario(&mut self, _scenario: &ScenarioMetadata, _termination: TerminationKind) {
        self.release();
    }

    fn metadata(&self, scenario_id: &str) -> StrategyMetadata {
        let stats = self.frontier.stats();
        StrategyMetadata {
            strategy: self.id().to_string(),
            scenario_id: scenario_id.to_string(),
            decisions: self.decisions,
            details: BTreeMap::from([
                (
                    "prefixDepth".to_string(),
                    StateValue::from(self.prefix.as_ref().map(Vec::len)),
                ),
                ("frontierPending".to_string(), StateValue::from(stats.pending)),
                ("explored".to_string(), StateValue::from(stats.explored)),
                ("exhausted".to_string(), StateValue::from(stats.exhausted)),
            ]),
        }
    }
}

impl Drop for ExhaustiveStrategy {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::super::test_support::{deliver, drop, meta};
    use super::*;

    fn run(strategy: &mut ExhaustiveStrategy, steps: u64) -> Vec<ActionKey> {
        let enabled = vec![deliver(0, 0), drop(1, 0)];
        strategy.initialize_scenario(&meta(0));
        let mut keys = Vec::new();
        for step in 0..steps {
            if let Some(action) = strategy.next_action(&enabled, &meta(step)).unwrap() {
                keys.push(action.key());
            }
        }
        strategy.finish_scenario(&meta(steps), TerminationKind::BudgetExhausted);
        keys
    }

    #[test]
    fn enumerates_every_path_up_to_depth_bound() {
        let frontier = Arc::new(SharedFrontier::new(2));
        let mut paths = BTreeSet::new();
        for _ in 0..4 {
            let mut strategy = ExhaustiveStrategy::new(Arc::clone(&frontier));
            paths.insert(run(&mut strategy, 2));
        }
        assert_eq!(paths.len(), 4);

        let mut extra = ExhaustiveStrategy::new(Arc::clone(&frontier));
        extra.initialize_scenario(&meta(0));
        assert!(!frontier.is_exhausted());
        assert_eq!(
            extra.next_action(&[deliver(0, 0)], &meta(0)).unwrap(),
            Some(deliver(0, 0))
        );
        assert!(frontier.is_exhausted());
        assert_eq!(frontier.stats().explored, 4);
    }

    #[test]
    fn dropped_strategy_releases_its_claim() {
        let frontier = Arc::new(SharedFrontier::new(2));
        {
            let mut strategy = ExhaustiveStrategy::new(Arc::clone(&frontier));
            strategy.initialize_scenario(&meta(0));
            assert_eq!(frontier.stats().in_flight, 0);
            strategy.next_action(&[deliver(0, 0)], &meta(0)).unwrap();
            assert_eq!(frontier.stats().in_flight, 1);
        }
        assert_eq!(frontier.stats().in_flight, 0);
    }

    #[test]
    fn strategies_initialized_together_take_distinct_paths() {
        let frontier = Arc::new(SharedFrontier::new(2));
        let enabled = vec![deliver(0, 0), drop(1, 0)];
        let mut a = ExhaustiveStrategy::new(Arc::clone(&frontier));
        let mut b = ExhaustiveStrategy::new(Arc::clone(&frontier));
        a.initialize_scenario(&meta(0));
        b.initialize_scenario(&meta(0));

        let mut paths = [Vec::new(), Vec::new()];
        for step in 0..2 {
            for (strategy, path) in [&mut a, &mut b].into_iter().zip(paths.iter_mut()) {
                let action = strategy.next_action(&enabled, &meta(step)).unwrap().unwrap();
                path.push(action.key());
            }
        }
        assert_ne!(paths[0], paths[1]);
        assert_eq!(paths[1][0], drop(1, 0).key());
        assert_eq!(frontier.stats().in_flight, 2);
    }

    #[test]
    fn waiting_claim_takes_sibling_pushed_by_another_thread() {
        let frontier = Arc::new(SharedFrontier::new(2));
        let mut root = ExhaustiveStrategy::new(Arc::clone(&frontier));
        root.initialize_scenario(&meta(0));
        // A single enabled action at the root pushes nothing.
        root.next_action(&[deliver(0, 0)], &meta(0)).unwrap();

        let waiting = {
            let frontier = Arc::clone(&frontier);
            std::thread::spawn(move || {
                let mut late = ExhaustiveStrategy::new(frontier);
                late.initialize_scenario(&meta(0));
                let enabled = vec![deliver(0, 0), drop(1, 0)];
                let first = late.next_action(&enabled, &meta(0)).unwrap().unwrap();
                let second = late.next_action(&enabled, &meta(1)).unwrap().unwrap();
                vec![first.key(), second.key()]
            })
        };
        std::thread::sleep(Duration::from_millis(50));
        root.next_action(&[deliver(0, 0), drop(1, 0)], &meta(1)).unwrap();

        let late_path = waiting.join().unwrap();
        assert_eq!(late_path, vec![deliver(0, 0).key(), drop(1, 0).key()]);
    }
}
