use std::collections::BTreeMap;

use super::{GlobalSnapshot, Predicate, PredicateResult};

/// A non-faulty replica never commits the same value at two indices.
#[derive(Clone, Copy, Debug, Default)]
pub struct IntegrityPredicate;

impl Predicate for IntegrityPredicate {
    fn id(&self) -> &str {
        "integrity"
    }

    fn evaluate(&self, snapshot: &GlobalSnapshot) -> PredicateResult {
        for (node_id, log) in snapshot.correct_logs() {
            let mut first_seen = BTreeMap::new();
            for (index, value) in log.entries() {
                if let Some(earlier) = first_seen.insert(value, index) {
                    return PredicateResult::violated(format!(
                        "{node_id} committed {value} at indices {earlier} and {index}"
                    ));
                }
            }
        }
        PredicateResult::holds()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use bftlab_core::commit_log::CommitLog;
    use bftlab_core::value::StateValue;

    use super::*;

    #[test]
    fn duplicate_value_is_reported() {
        let mut log = CommitLog::new();
        log.append(0, StateValue::from("x")).unwrap();
        log.append(3, StateValue::from("x")).unwrap();
        let snapshot = GlobalSnapshot {
            step: 0,
            commit_logs: [("r1".to_string(), log)].into(),
            faulty: BTreeSet::new(),
            gst: None,
        };
        let result = IntegrityPredicate.evaluate(&snapshot);
        assert!(!result.satisfied);
        assert_eq!(result.explanation, "r1 committed \"x\" at indices 0 and 3");
    }
}
