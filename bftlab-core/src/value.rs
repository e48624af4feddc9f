//! Tagged value trees used for participant state and message bodies.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Arbitrary nested state. Maps are ordered so serialized forms are stable.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateValue {
    #[default]
    Null,
    Bool(bool),
    Number(i64),
    String(String),
    List(Vec<StateValue>),
    Map(BTreeMap<String, StateValue>),
}

impl StateValue {
    /// Builds a map value from `(key, value)` pairs.
    pub fn map<K, V, I>(entries: I) -> Self
    where
        K: Into<String>,
        V: Into<StateValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        StateValue::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn get(&self, key: &str) -> Option<&StateValue> {
        match self {
            StateValue::Map(entries) => entries.get(key),
            _ => None,
        }
    }

    /// Replaces a field of a map value. Returns `false` for non-map values.
    pub fn set(&mut self, key: &str, value: StateValue) -> bool {
        match self {
            StateValue::Map(entries) => {
                entries.insert(key.to_string(), value);
                true
            }
            _ => false,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            StateValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        self.as_i64().and_then(|n| u64::try_from(n).ok())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            StateValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            StateValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, StateValue::Null)
    }
}

impl fmt::Display for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateValue::Null => write!(f, "null"),
            StateValue::Bool(b) => write!(f, "{b}"),
            StateValue::Number(n) => write!(f, "{n}"),
            StateValue::String(s) => write!(f, "{s:?}"),
            StateValue::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            StateValue::Map(entries) => {
                write!(f, "{{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<bool> for StateValue {
    fn from(value: bool) -> Self {
        StateValue::Bool(value)
    }
}

impl From<i64> for StateValue {
    fn from(value: i64) -> Self {
        StateValue::Number(value)
    }
}

impl From<u64> for StateValue {
    fn from(value: u64) -> Self {
        StateValue::Number(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<usize> for StateValue {
    fn from(value: usize) -> Self {
        StateValue::Number(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<&str> for StateValue {
    fn from(value: &str) -> Self {
        StateValue::String(value.to_string())
    }
}

impl From<String> for StateValue {
    fn from(value: String) -> Self {
        StateValue::String(value)
    }
}

impl<T: Into<StateValue>> From<Vec<T>> for StateValue {
    fn from(values: Vec<T>) -> Self {
        StateValue::List(values.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<StateValue>> From<Option<T>> for StateValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(StateValue::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_fields_are_addressable() {
        let mut value = StateValue::map([("seq", StateValue::from(3_i64)), ("op", "put".into())]);
        assert_eq!(value.get("seq").and_then(StateValue::as_i64), Some(3));
        assert!(value.set("op", "get".into()));
        assert_eq!(value.get("op").and_then(StateValue::as_str), Some("get"));
        assert!(!StateValue::Null.clone().set("op", StateValue::Null));
    }

    #[test]
    fn serializes_as_plain_json() {
        let value = StateValue::map([("ok", StateValue::Bool(true)), ("n", StateValue::Null)]);
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(json, r#"{"n":null,"ok":true}"#);
        let back: StateValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn display_quotes_strings() {
        let value = StateValue::from(vec!["x", "y"]);
        assert_eq!(value.to_string(), r#"["x", "y"]"#);
    }
}
