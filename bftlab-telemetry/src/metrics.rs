//! ## bftlab-telemetry::metrics
//! **Prometheus registry for campaign outcomes**
//!
//! Scenario outcomes are labelled with the termination kind, applied
//! actions with the action category.

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

#[derive(Debug, Clone)]
pub struct MetricsRecorder {
    pub registry: Registry,
    pub scenarios: IntCounterVec,
    pub actions: IntCounterVec,
    pub invariant_violations: IntCounter,
    pub persistence_failures: IntCounter,
    pub scenario_steps: Histogram,
}

impl MetricsRecorder {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let scenarios = IntCounterVec::new(
            Opts::new("bftlab_scenarios_total", "Finished scenarios by outcome"),
            &["outcome"],
        )?;
        let actions = IntCounterVec::new(
            Opts::new("bftlab_actions_total", "Applied actions by kind"),
            &["kind"],
        )?;
        let invariant_violations = IntCounter::new(
            "bftlab_invariant_violations_total",
            "Scenarios that broke at least one invariant",
        )?;
        let persistence_failures = IntCounter::new(
            "bftlab_persistence_failures_total",
            "Schedules that could not be persisted after retries",
        )?;
        let scenario_steps = Histogram::with_opts(
            HistogramOpts::new("bftlab_scenario_steps", "Steps taken per scenario")
                .buckets(vec![1.0, 10.0, 50.0, 100.0, 500.0, 1_000.0, 10_000.0]),
        )?;

        registry.register(Box::new(scenarios.clone()))?;
        registry.register(Box::new(actions.clone()))?;
        registry.register(Box::new(invariant_violations.clone()))?;
        registry.register(Box::new(persistence_failures.clone()))?;
        registry.register(Box::new(scenario_steps.clone()))?;

        Ok(Self {
            registry,
            scenarios,
            actions,
            invariant_violations,
            persistence_failures,
            scenario_steps,
        })
    }

    pub fn gather_metrics(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::<u8>::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    pub fn record_scenario(&self, outcome: &str, steps: u64, broke_invariant: bool) {
        self.scenarios.with_label_values(&[outcome]).inc();
        self.scenario_steps.observe(steps as f64);
        if broke_invariant {
            self.invariant_violations.inc();
        }
    }

    pub fn record_action(&self, kind: &str) {
        self.actions.with_label_values(&[kind]).inc();
    }

    pub fn inc_persistence_failures(&self) {
        self.persistence_failures.inc();
    }
}
