//! Campaign sizing, parallelism and schedule retention.

use serde::{Deserialize, Serialize};
use validator::{self, Validate};

/// Which finished schedules are handed to the store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SavePolicy {
    All,
    /// Only schedules that broke an invariant.
    #[default]
    Buggy,
    None,
}

impl SavePolicy {
    pub fn should_save(&self, buggy: bool) -> bool {
        match self {
            SavePolicy::All => true,
            SavePolicy::Buggy => buggy,
            SavePolicy::None => false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Validate, Clone, PartialEq)]
pub struct CampaignConfig {
    #[serde(default = "default_num_scenarios")]
    #[validate(range(min = 1, max = 10_000_000))]
    pub num_scenarios: u64,

    /// Upper bound on scenarios running at the same time.
    #[serde(default = "default_concurrency")]
    #[validate(range(min = 1, max = 256))]
    pub concurrency: usize,

    #[serde(default)]
    pub initial_seed: u64,

    #[serde(default)]
    pub save_schedules: SavePolicy,
}

fn default_num_scenarios() -> u64 {
    100
}

fn default_concurrency() -> usize {
    num_cpus::get().clamp(1, 256)
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            num_scenarios: default_num_scenarios(),
            concurrency: default_concurrency(),
            initial_seed: 0,
            save_schedules: SavePolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_policy() {
        assert!(SavePolicy::All.should_save(false));
        assert!(SavePolicy::Buggy.should_save(true));
        assert!(!SavePolicy::Buggy.should_save(false));
        assert!(!SavePolicy::None.should_save(true));
    }
}
