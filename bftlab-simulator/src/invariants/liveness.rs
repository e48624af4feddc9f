use super::{GlobalSnapshot, Predicate, PredicateResult};

/// After global stabilization time, a correct replica commits a new entry
/// within `grace_period` steps.
#[derive(Clone, Copy, Debug)]
pub struct BoundedLivenessPredicate {
    grace_period: u64,
}

impl BoundedLivenessPredicate {
    pub fn new(grace_period: u64) -> Self {
        Self { grace_period }
    }
}

impl Predicate for BoundedLivenessPredicate {
    fn id(&self) -> &str {
        "bounded-liveness"
    }

    fn evaluate(&self, snapshot: &GlobalSnapshot) -> PredicateResult {
        let Some(gst) = snapshot.gst else {
            return PredicateResult::holds_because("before GST");
        };
        if snapshot.committed() > gst.committed {
            return PredicateResult::holds_because("a value was committed after GST");
        }
        let since = snapshot.step.saturating_sub(gst.step);
        if since > self.grace_period {
            PredicateResult::violated(format!(
                "{since} steps since GST without a new commit (grace period {})",
                self.grace_period
            ))
        } else {
            PredicateResult::holds_because(format!(
                "grace period: {since} of {} steps since GST",
                self.grace_period
            ))
        }
    }
}
