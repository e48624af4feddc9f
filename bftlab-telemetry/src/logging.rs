//! ## bftlab-telemetry::logging
//! **Subscriber setup and structured lifecycle events**
//!
//! ### Components:
//! - `EventLogger::init`: fmt subscriber, human-readable or JSON lines
//! - `EventLogger::log_event`: one `info` record per lifecycle event with
//!   OpenTelemetry-style key/values
//!
//! ### Future:
//! - OTLP export of lifecycle spans

use opentelemetry::KeyValue;
use thiserror::Error;
use tracing::info_span;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Failed to install tracing subscriber: {0}")]
    Subscriber(String),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

#[derive(Clone)]
pub struct EventLogger;

impl EventLogger {
    /// Installs the global subscriber. `RUST_LOG` overrides `level`.
    pub fn init(level: &str, json: bool) -> Result<(), TelemetryError> {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
        let builder = fmt()
            .with_env_filter(filter)
            .with_thread_names(true)
            .with_span_events(FmtSpan::CLOSE);
        let installed = if json {
            builder.json().try_init()
        } else {
            builder.try_init()
        };
        installed.map_err(|e| TelemetryError::Subscriber(e.to_string()))
    }

    /// Emits a structured lifecycle event such as `scenario_terminated`.
    pub fn log_event(event_type: &str, metadata: Vec<KeyValue>) {
        let span = info_span!("lifecycle_event", event_type = event_type, otel.kind = "INTERNAL");
        let _entered = span.enter();
        let fields: Vec<String> = metadata
            .iter()
            .map(|kv| format!("{}={}", kv.key, kv.value))
            .collect();
        tracing::info!(event_type, metadata = %fields.join(" "), "Lifecycle event");
    }
}
