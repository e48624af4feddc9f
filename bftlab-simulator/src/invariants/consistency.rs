use std::collections::BTreeMap;

use bftlab_core::value::StateValue;

use super::{GlobalSnapshot, Predicate, PredicateResult};

/// Non-faulty replicas never commit different values at the same index.
///
/// Logs may be sparse. An index only constrains the replicas whose log
/// holds an entry for it.
#[derive(Clone, Copy, Debug, Default)]
pub struct ConsistencyPredicate;

impl Predicate for ConsistencyPredicate {
    fn id(&self) -> &str {
        "consistency"
    }

    fn evaluate(&self, snapshot: &GlobalSnapshot) -> PredicateResult {
        // index -> value -> replicas that committed it
        let mut committed: BTreeMap<u64, BTreeMap<&StateValue, Vec<&str>>> = BTreeMap::new();
        for (node_id, log) in snapshot.correct_logs() {
            for (index, value) in log.entries() {
                committed
                    .entry(index)
                    .or_default()
                    .entry(value)
                    .or_default()
                    .push(node_id);
            }
        }

        let conflicts: Vec<String> = committed
            .iter()
            .filter(|(_, values)| values.len() > 1)
            .map(|(index, values)| {
                let detail = values
                    .iter()
                    .map(|(value, nodes)| format!("{} committed {value}", nodes.join(",")))
                    .collect::<Vec<_>>()
                    .join("; ");
                format!("index {index}: {detail}")
            })
            .collect();

        if conflicts.is_empty() {
            PredicateResult::holds()
        } else {
            PredicateResult::violated(conflicts.join(" | "))
        }
    }
}
