//! Custom validation functions for configuration.
//!
//! Field validators plug into `#[validate(custom(...))]`. Cross-section
//! checks that need more than one field live in [`check_consistency`].

use std::collections::BTreeSet;

use lazy_static::lazy_static;
use regex::Regex;
use validator::ValidationError;

use bftlab_core::schedule::StrategyKind;

use crate::{BenchConfig, ConfigError};

lazy_static! {
    static ref IDENTIFIER: Regex = Regex::new("^[A-Za-z0-9_.:-]+$").expect("valid identifier pattern");
}

/// Validate a protocol or node identifier.
pub fn validate_identifier(id: &str) -> Result<(), ValidationError> {
    if IDENTIFIER.is_match(id) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_identifier"))
    }
}

pub fn validate_identifier_set(ids: &BTreeSet<String>) -> Result<(), ValidationError> {
    ids.iter().try_for_each(|id| validate_identifier(id))
}

/// Fault ids may contain punctuation such as `partition(r0,r1|r2)` but never
/// whitespace.
pub fn validate_fault_ids(ids: &[String]) -> Result<(), ValidationError> {
    if ids
        .iter()
        .all(|id| !id.is_empty() && !id.chars().any(char::is_whitespace))
    {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_fault_id"))
    }
}

/// Validate a tracing level name.
pub fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid = ["trace", "debug", "info", "warn", "error"]
        .contains(&level.to_lowercase().as_str());
    if valid {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_log_level"))
    }
}

/// Replica ids follow the `r<index>` naming used when scenarios are built.
pub fn replica_ids(num_replicas: u32) -> BTreeSet<String> {
    (0..num_replicas).map(|i| format!("r{i}")).collect()
}

/// Checks that span sections.
pub fn check_consistency(config: &BenchConfig) -> Result<(), ConfigError> {
    let replicas = replica_ids(config.scenario.num_replicas);
    if let Some(unknown) = config
        .scenario
        .faulty_replicas
        .iter()
        .find(|id| !replicas.contains(*id))
    {
        return Err(ConfigError::Inconsistent(format!(
            "faulty replica '{unknown}' is not one of the {} replicas",
            config.scenario.num_replicas
        )));
    }

    if config.strategy.kind == StrategyKind::Replay {
        return Err(ConfigError::Inconsistent(
            "strategy 'replay' is selected by replaying a stored schedule, not by configuration"
                .into(),
        ));
    }
    if config.strategy.kind == StrategyKind::Random && config.strategy.weights.total() == 0 {
        return Err(ConfigError::Inconsistent(
            "random strategy needs at least one non-zero action weight".into(),
        ));
    }
    let weights = &config.strategy.weights;
    if config.strategy.kind == StrategyKind::ByzzFuzz
        && weights.deliver_message == 0
        && weights.deliver_timeout == 0
    {
        return Err(ConfigError::Inconsistent(
            "byzzfuzz strategy needs a non-zero delivery or timeout weight".into(),
        ));
    }

    let defined: BTreeSet<&str> = config
        .faults
        .definitions
        .iter()
        .map(|f| f.id.as_str())
        .collect();
    if defined.len() != config.faults.definitions.len() {
        return Err(ConfigError::Inconsistent(
            "fault definitions contain duplicate ids".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers() {
        assert!(validate_identifier("toy-consensus").is_ok());
        assert!(validate_identifier("r0").is_ok());
        assert!(validate_identifier("bad id").is_err());
        assert!(validate_identifier("").is_err());
    }

    #[test]
    fn fault_ids_allow_punctuation() {
        assert!(validate_fault_ids(&["partition(r0,r1|r2,r3)".into()]).is_ok());
        assert!(validate_fault_ids(&["heal network".into()]).is_err());
    }

    #[test]
    fn log_levels() {
        assert!(validate_log_level("INFO").is_ok());
        assert!(validate_log_level("verbose").is_err());
    }
}
