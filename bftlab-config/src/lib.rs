//! # BFT Lab Configuration System
//!
//! Hierarchical configuration for simulations and campaigns.
//!
//! ## Features
//! - **Single Source**: scenario shape, strategy, campaign, faults, storage and telemetry in one tree
//! - **Validation**: field ranges via `validator`, cross-section checks in [`validation::check_consistency`]
//! - **Environment Awareness**: per-environment overlay files and `BFTLAB_*` overrides

#![warn(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

use bftlab_core::schedule::ScenarioParameters;

mod campaign;
mod error;
mod faults;
mod scenario;
mod storage;
mod strategy;
mod telemetry;
pub mod validation;

pub use campaign::{CampaignConfig, SavePolicy};
pub use error::ConfigError;
pub use faults::FaultsConfig;
pub use scenario::ScenarioConfig;
pub use storage::StorageConfig;
pub use strategy::StrategyConfig;
pub use telemetry::TelemetryConfig;

const ENV_PREFIX: &str = "BFTLAB_";

/// Top-level configuration container.
#[derive(Debug, Serialize, Deserialize, Validate, Default, Clone, PartialEq)]
pub struct BenchConfig {
    /// Protocol, node counts and step budget.
    #[serde(default)]
    #[validate(nested)]
    pub scenario: ScenarioConfig,

    /// Exploration strategy and its weights and budgets.
    #[serde(default)]
    #[validate(nested)]
    pub strategy: StrategyConfig,

    /// Campaign size, concurrency and save policy.
    #[serde(default)]
    #[validate(nested)]
    pub campaign: CampaignConfig,

    /// Extra, automatic and schedulable network faults.
    #[serde(default)]
    #[validate(nested)]
    pub faults: FaultsConfig,

    /// Schedule persistence.
    #[serde(default)]
    #[validate(nested)]
    pub storage: StorageConfig,

    #[serde(default)]
    #[validate(nested)]
    pub telemetry: TelemetryConfig,
}

impl BenchConfig {
    /// Load configuration from default files and environment.
    ///
    /// Hierarchy:
    /// 1. Default Values
    /// 2. `config/bftlab.yaml` - Base settings. If missing, defaults are used.
    /// 3. `config/<BFTLAB_ENV>.yaml` - Environment-specific overrides.
    /// 4. `BFTLAB_*` environment variables, `__` separating nested keys.
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(BenchConfig::default()));

        if Path::new("config/bftlab.yaml").exists() {
            figment = figment.merge(Yaml::file("config/bftlab.yaml"));
        }

        let env = std::env::var("BFTLAB_ENV").unwrap_or_else(|_| "development".into());
        let env_file = format!("config/{}.yaml", env);
        if Path::new(&env_file).exists() {
            figment = figment.merge(Yaml::file(env_file));
        }

        Self::finish(figment)
    }

    /// Load configuration from a specific file, still honouring `BFTLAB_*`
    /// overrides.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        Self::finish(
            Figment::from(Serialized::defaults(BenchConfig::default())).merge(Yaml::file(path)),
        )
    }

    fn finish(figment: Figment) -> Result<Self, ConfigError> {
        figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(ConfigError::from)
            .and_then(|config: Self| {
                config.check()?;
                Ok(config)
            })
    }

    /// Field validation followed by cross-section checks.
    pub fn check(&self) -> Result<(), ConfigError> {
        self.validate()?;
        validation::check_consistency(self)
    }

    /// Parameters for one scenario run with the given seed.
    pub fn scenario_parameters(&self, seed: u64) -> ScenarioParameters {
        ScenarioParameters {
            protocol: self.scenario.protocol.clone(),
            seed,
            budget: self.scenario.budget,
            num_replicas: self.scenario.num_replicas,
            num_clients: self.scenario.num_clients,
            requests_per_client: self.scenario.requests_per_client,
            faulty_replicas: self.scenario.faulty_replicas.clone(),
            strategy: self.strategy.parameters(),
            automatic_faults: self.faults.automatic.clone(),
            schedulable_faults: self.faults.schedulable.clone(),
            extra_faults: self.faults.definitions.clone(),
            gst_grace_period: self.scenario.gst_grace_period,
        }
    }
}

#[cfg(test)]
mod tests {
    use bftlab_core::faults::FaultBehavior;
    use bftlab_core::schedule::StrategyKind;
    use figment::Jail;

    use super::*;

    #[test]
    fn full_config_validation() {
        let config = BenchConfig::default();
        config.check().expect("Default config should validate");
    }

    #[test]
    fn environment_override() {
        Jail::expect_with(|jail| {
            jail.set_env("BFTLAB_CAMPAIGN__CONCURRENCY", "3");
            jail.set_env("BFTLAB_SCENARIO__NUM_REPLICAS", "7");
            let config = BenchConfig::load().map_err(|e| e.to_string())?;
            assert_eq!(config.campaign.concurrency, 3);
            assert_eq!(config.scenario.num_replicas, 7);
            Ok(())
        });
    }

    #[test]
    fn environment_file_overlays_base_file() {
        Jail::expect_with(|jail| {
            jail.create_dir("config")?;
            jail.create_file(
                "config/bftlab.yaml",
                r#"
scenario:
  budget: 50
strategy:
  kind: fifo
faults:
  definitions:
    - id: omit-accepts
      name: Omit accepts
      behavior: omit_messages
      filter:
        class: Accept
  schedulable: [omit-accepts]
"#,
            )?;
            jail.create_file("config/ci.yaml", "scenario:\n  budget: 75\n")?;
            jail.set_env("BFTLAB_ENV", "ci");

            let config = BenchConfig::load().map_err(|e| e.to_string())?;
            assert_eq!(config.scenario.budget, 75);
            assert_eq!(config.strategy.kind, StrategyKind::Fifo);
            assert!(matches!(
                config.faults.definitions[0].behavior,
                FaultBehavior::OmitMessages { .. }
            ));

            let params = config.scenario_parameters(9);
            assert_eq!(params.seed, 9);
            assert_eq!(params.schedulable_faults, vec!["omit-accepts".to_string()]);
            Ok(())
        });
    }

    #[test]
    fn missing_file_is_reported() {
        assert!(matches!(
            BenchConfig::load_from_path("does/not/exist.yaml"),
            Err(ConfigError::FileNotFound(_))
        ));
    }

    #[test]
    fn rejects_unknown_faulty_replica() {
        let mut config = BenchConfig::default();
        config.scenario.faulty_replicas.insert("r9".into());
        assert!(matches!(config.check(), Err(ConfigError::Inconsistent(_))));
    }

    #[test]
    fn rejects_all_zero_weights() {
        let mut config = BenchConfig::default();
        config.strategy.weights.deliver_message = 0;
        config.strategy.weights.deliver_timeout = 0;
        assert!(matches!(config.check(), Err(ConfigError::Inconsistent(_))));
    }

    #[test]
    fn byzzfuzz_and_gst_reach_scenario_parameters() {
        Jail::expect_with(|jail| {
            jail.create_dir("config")?;
            jail.create_file(
                "config/bftlab.yaml",
                r#"
scenario:
  gst_grace_period: 40
strategy:
  kind: byzzfuzz
  byzzfuzz:
    network_faults: 2
    rounds: 5
"#,
            )?;
            let config = BenchConfig::load().map_err(|e| e.to_string())?;
            let params = config.scenario_parameters(1);
            assert_eq!(params.strategy.kind, StrategyKind::ByzzFuzz);
            assert_eq!(params.strategy.byzzfuzz.network_faults, 2);
            assert_eq!(params.strategy.byzzfuzz.process_faults, 1);
            assert_eq!(params.strategy.byzzfuzz.rounds, 5);
            assert_eq!(params.strategy.byzzfuzz.round_field, "seq");
            assert_eq!(params.gst_grace_period, Some(40));
            Ok(())
        });
    }

    #[test]
    fn byzzfuzz_needs_delivery_weights() {
        let mut config = BenchConfig::default();
        config.strategy.kind = StrategyKind::ByzzFuzz;
        config.strategy.weights.deliver_message = 0;
        config.strategy.weights.deliver_timeout = 0;
        config.strategy.weights.drop_message = 10;
        assert!(matches!(config.check(), Err(ConfigError::Inconsistent(_))));
    }

    #[test]
    fn rejects_out_of_range_concurrency() {
        let mut config = BenchConfig::default();
        config.campaign.concurrency = 0;
        assert!(matches!(config.check(), Err(ConfigError::Validation(_))));
        config.campaign.concurrency = 257;
        assert!(matches!(config.check(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn rejects_bad_identifiers() {
        let mut config = BenchConfig::default();
        config.scenario.protocol = "toy consensus".into();
        assert!(matches!(config.check(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn yaml_round_trip_keeps_sections() {
        let config = BenchConfig::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: BenchConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, config);
    }
}
