//! ## bftlab-simulator::invariants
//! **Safety predicates evaluated after every step**
//!
//! Predicates read a [`GlobalSnapshot`] taken in one pass over the transport,
//! so every evaluation sees the commit logs of all replicas at the same step.
//! The engine remembers the last result of each predicate and reports the
//! first `satisfied -> unsatisfied` transition as a broken invariant.

mod consistency;
mod integrity;
mod liveness;

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::warn;

use bftlab_core::commit_log::CommitLog;
use bftlab_core::events::NodeId;
use bftlab_core::schedule::BrokenInvariant;
use bftlab_core::transport::Transport;

pub use consistency::ConsistencyPredicate;
pub use integrity::IntegrityPredicate;
pub use liveness::BoundedLivenessPredicate;

/// Point at which global stabilization time was reached.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct GstMark {
    pub step: u64,
    /// Entries committed by correct replicas when GST was reached.
    pub committed: usize,
}

/// Commit logs of every replica, copied at one step.
#[derive(Clone, Debug, Default)]
pub struct GlobalSnapshot {
    pub step: u64,
    pub commit_logs: BTreeMap<NodeId, CommitLog>,
    pub faulty: BTreeSet<NodeId>,
    pub gst: Option<GstMark>,
}

impl GlobalSnapshot {
    pub fn capture(step: u64, transport: &Transport, faulty: &BTreeSet<NodeId>) -> Self {
        Self {
            step,
            commit_logs: transport.commit_logs(),
            faulty: faulty.clone(),
            gst: None,
        }
    }

    pub fn with_gst(mut self, gst: Option<GstMark>) -> Self {
        self.gst = gst;
        self
    }

    /// Total entries committed by correct replicas.
    pub fn committed(&self) -> usize {
        self.correct_logs().map(|(_, log)| log.len()).sum()
    }

    /// Logs of replicas not marked faulty.
    pub fn correct_logs(&self) -> impl Iterator<Item = (&NodeId, &CommitLog)> {
        self.commit_logs
            .iter()
            .filter(|(id, _)| !self.faulty.contains(*id))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PredicateResult {
    pub satisfied: bool,
    pub explanation: String,
}

impl PredicateResult {
    pub fn holds() -> Self {
        Self {
            satisfied: true,
            explanation: String::new(),
        }
    }

    pub fn holds_because(explanation: impl Into<String>) -> Self {
        Self {
            satisfied: true,
            explanation: explanation.into(),
        }
    }

    pub fn violated(explanation: impl Into<String>) -> Self {
        Self {
            satisfied: false,
            explanation: explanation.into(),
        }
    }
}

pub trait Predicate: Send + Sync {
    fn id(&self) -> &str;

    fn evaluate(&self, snapshot: &GlobalSnapshot) -> PredicateResult;
}

struct FnPredicate<F> {
    id: String,
    check: F,
}

impl<F> Predicate for FnPredicate<F>
where
    F: Fn(&GlobalSnapshot) -> PredicateResult + Send + Sync,
{
    fn id(&self) -> &str {
        &self.id
    }

    fn evaluate(&self, snapshot: &GlobalSnapshot) -> PredicateResult {
        (self.check)(snapshot)
    }
}

/// Wraps a closure as a predicate.
pub fn predicate_fn<F>(id: impl Into<String>, check: F) -> Box<dyn Predicate>
where
    F: Fn(&GlobalSnapshot) -> PredicateResult + Send + Sync + 'static,
{
    Box::new(FnPredicate {
        id: id.into(),
        check,
    })
}

/// Result of one `evaluate_all` pass.
#[derive(Clone, Debug, Default)]
pub struct Evaluation {
    pub results: BTreeMap<String, PredicateResult>,
    /// Predicates that broke at this step for the first time.
    pub newly_broken: Vec<BrokenInvariant>,
}

pub struct InvariantEngine {
    predicates: Vec<Box<dyn Predicate>>,
    last: BTreeMap<String, PredicateResult>,
    broken: Vec<BrokenInvariant>,
}

impl InvariantEngine {
    pub fn new(predicates: Vec<Box<dyn Predicate>>) -> Self {
        Self {
            predicates,
            last: BTreeMap::new(),
            broken: Vec::new(),
        }
    }

    pub fn predicate_ids(&self) -> impl Iterator<Item = &str> {
        self.predicates.iter().map(|p| p.id())
    }

    pub fn evaluate_all(&mut self, snapshot: &GlobalSnapshot) -> Evaluation {
        let mut evaluation = Evaluation::default();
        for predicate in &self.predicates {
            let id = predicate.id().to_string();
            let result = predicate.evaluate(snapshot);
            let was_satisfied = self.last.get(&id).map_or(true, |r| r.satisfied);
            let already_broken = self.broken.iter().any(|b| b.id == id);
            if was_satisfied && !result.satisfied && !already_broken {
                warn!(
                    predicate = %id,
                    step = snapshot.step,
                    explanation = %result.explanation,
                    "Invariant broken"
                );
                let broken = BrokenInvariant {
                    id: id.clone(),
                    explanation: result.explanation.clone(),
                };
                self.broken.push(broken.clone());
                evaluation.newly_broken.push(broken);
            }
            self.last.insert(id.clone(), result.clone());
            evaluation.results.insert(id, result);
        }
        evaluation
    }

    /// Every predicate broken so far, in the order they broke.
    pub fn broken(&self) -> &[BrokenInvariant] {
        &self.broken
    }

    pub fn last_results(&self) -> &BTreeMap<String, PredicateResult> {
        &self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bftlab_core::value::StateValue;

    fn snapshot(step: u64, entries: Vec<(&str, Vec<(u64, &str)>)>) -> GlobalSnapshot {
        let commit_logs = entries
            .into_iter()
            .map(|(node, log)| {
                let mut commit_log = CommitLog::new();
                for (seq, value) in log {
                    commit_log.append(seq, StateValue::from(value)).unwrap();
                }
                (node.to_string(), commit_log)
            })
            .collect();
        GlobalSnapshot {
            step,
            commit_logs,
            faulty: BTreeSet::new(),
            gst: None,
        }
    }

    #[test]
    fn broken_invariant_is_reported_once_and_kept() {
        let mut engine = InvariantEngine::new(vec![Box::new(ConsistencyPredicate)]);
        let ok = snapshot(0, vec![("a", vec![(0, "x")]), ("b", vec![(0, "x")])]);
        let bad = snapshot(1, vec![("a", vec![(0, "x")]), ("b", vec![(0, "y")])]);

        assert!(engine.evaluate_all(&ok).newly_broken.is_empty());
        assert_eq!(engine.evaluate_all(&bad).newly_broken.len(), 1);
        assert!(engine.evaluate_all(&bad).newly_broken.is_empty());
        // Recovery does not erase the finding.
        engine.evaluate_all(&ok);
        assert_eq!(engine.broken().len(), 1);
        assert!(engine.evaluate_all(&bad).newly_broken.is_empty());
    }

    #[test]
    fn closure_predicates() {
        let mut engine = InvariantEngine::new(vec![predicate_fn("max-two-commits", |s| {
            if s.correct_logs().all(|(_, log)| log.len() <= 2) {
                PredicateResult::holds()
            } else {
                PredicateResult::violated("more than two commits")
            }
        })]);
        let small = snapshot(0, vec![("a", vec![(0, "x")])]);
        let large = snapshot(1, vec![("a", vec![(0, "x"), (1, "y"), (2, "z")])]);
        assert!(engine.evaluate_all(&small).results["max-two-commits"].satisfied);
        let evaluation = engine.evaluate_all(&large);
        assert_eq!(evaluation.newly_broken[0].explanation, "more than two commits");
    }
}
