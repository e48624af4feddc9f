use thiserror::Error;
use tokio::task::JoinError;

use bftlab_config::ConfigError;
use bftlab_simulator::scenario::ScenarioError;
use bftlab_simulator::scheduler::SchedulerError;
use bftlab_telemetry::logging::TelemetryError;

/// Failures of a schedule store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Schedule '{0}' not found")]
    NotFound(String),

    #[error("Invalid schedule id '{0}'")]
    InvalidId(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Schedule encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Scenario error: {0}")]
    Scenario(#[from] ScenarioError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),

    #[error("Unknown campaign '{0}'")]
    UnknownCampaign(String),

    #[error("Replay of '{schedule_id}' diverged: expected fingerprint {expected}, got {actual}")]
    ReplayMismatch {
        schedule_id: String,
        expected: String,
        actual: String,
    },

    #[error("Report error: {0}")]
    Report(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Worker task failed: {0}")]
    Worker(String),
}

impl From<JoinError> for EngineError {
    fn from(err: JoinError) -> Self {
        EngineError::Worker(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Storage(StorageError::Encoding(err))
    }
}
