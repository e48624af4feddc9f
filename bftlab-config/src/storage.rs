//! Where schedules are persisted and how hard to retry.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use validator::{self, Validate};

#[derive(Debug, Serialize, Deserialize, Validate, Clone, PartialEq)]
pub struct StorageConfig {
    #[serde(default = "default_directory")]
    pub directory: PathBuf,

    /// Attempts after the first failed save.
    #[serde(default = "default_max_retries")]
    #[validate(range(max = 10))]
    pub max_retries: u32,

    /// Base delay between attempts, doubled after each failure.
    #[serde(default = "default_backoff")]
    #[validate(range(max = 60_000))]
    pub retry_backoff_ms: u64,
}

fn default_directory() -> PathBuf {
    PathBuf::from("schedules")
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff() -> u64 {
    50
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            directory: default_directory(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_backoff(),
        }
    }
}
