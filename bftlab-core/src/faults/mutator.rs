//! Payload mutators.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::events::Payload;
use crate::value::StateValue;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct MutationError(pub String);

/// Deterministic transformation of a message payload.
pub trait Mutator: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    /// Payload classes this mutator accepts.
    fn input_classes(&self) -> &[String];

    fn applies_to(&self, payload: &Payload) -> bool {
        self.input_classes().iter().any(|c| *c == payload.class)
    }

    fn mutate(&self, payload: &Payload) -> Result<Payload, MutationError>;
}

/// Rewrite applied to one field of a map-shaped payload body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "value", rename_all = "snake_case")]
pub enum FieldOp {
    /// Adds to a numeric field.
    Offset(i64),
    Replace(StateValue),
    /// Flips a boolean field.
    Negate,
}

/// Mutator that rewrites a single named field.
#[derive(Clone, Debug)]
pub struct FieldMutator {
    id: String,
    name: String,
    input_classes: Vec<String>,
    field: String,
    op: FieldOp,
}

impl FieldMutator {
    pub fn new<I, S>(
        id: impl Into<String>,
        name: impl Into<String>,
        input_classes: I,
        field: impl Into<String>,
        op: FieldOp,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            name: name.into(),
            input_classes: input_classes.into_iter().map(Into::into).collect(),
            field: field.into(),
            op,
        }
    }
}

impl Mutator for FieldMutator {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn input_classes(&self) -> &[String] {
        &self.input_classes
    }

    fn mutate(&self, payload: &Payload) -> Result<Payload, MutationError> {
        let current = payload
            .body
            .get(&self.field)
            .ok_or_else(|| MutationError(format!("payload has no field '{}'", self.field)))?;
        let replacement = match &self.op {
            FieldOp::Offset(delta) => {
                let n = current
                    .as_i64()
                    .ok_or_else(|| MutationError(format!("field '{}' is not a number", self.field)))?;
                StateValue::Number(n.wrapping_add(*delta))
            }
            FieldOp::Replace(value) => value.clone(),
            FieldOp::Negate => {
                let b = current
                    .as_bool()
                    .ok_or_else(|| MutationError(format!("field '{}' is not a bool", self.field)))?;
                StateValue::Bool(!b)
            }
        };
        let mut body = payload.body.clone();
        body.set(&self.field, replacement);
        Ok(Payload::new(payload.class.clone(), body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn propose(seq: i64) -> Payload {
        Payload::new(
            "Propose",
            StateValue::map([("seq", StateValue::from(seq)), ("final", true.into())]),
        )
    }

    #[test]
    fn offset_rewrites_numeric_field() {
        let mutator = FieldMutator::new("shift", "Shift", ["Propose"], "seq", FieldOp::Offset(1));
        let out = mutator.mutate(&propose(4)).unwrap();
        assert_eq!(out.body.get("seq"), Some(&StateValue::from(5_i64)));
        assert_eq!(out.class, "Propose");
    }

    #[test]
    fn negate_requires_bool() {
        let flip = FieldMutator::new("flip", "Flip", ["Propose"], "final", FieldOp::Negate);
        assert_eq!(
            flip.mutate(&propose(1)).unwrap().body.get("final"),
            Some(&StateValue::Bool(false))
        );
        let bad = FieldMutator::new("bad", "Bad", ["Propose"], "seq", FieldOp::Negate);
        assert!(bad.mutate(&propose(1)).is_err());
    }

    #[test]
    fn applies_by_payload_class() {
        let mutator = FieldMutator::new("shift", "Shift", ["Propose"], "seq", FieldOp::Offset(1));
        assert!(mutator.applies_to(&propose(0)));
        assert!(!mutator.applies_to(&Payload::new("Accept", StateValue::Null)));
    }
}
