//! # BFT Lab Telemetry
//!
//! Crate for logging and metrics of simulations and campaigns.

pub mod logging;
pub mod metrics;

pub use logging::{EventLogger, TelemetryError};
pub use metrics::MetricsRecorder;
pub use opentelemetry::KeyValue;
