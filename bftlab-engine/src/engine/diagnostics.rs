use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use bftlab_core::schedule::{BrokenInvariant, Schedule, ScheduleId, TerminationKind};

use super::campaign::CampaignSnapshot;
use super::error::EngineError;

/// A schedule worth a human look: it broke an invariant or errored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub schedule_id: ScheduleId,
    pub scenario_id: String,
    pub protocol: String,
    pub seed: u64,
    pub termination: TerminationKind,
    pub steps: usize,
    pub broken_invariants: Vec<BrokenInvariant>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub fingerprint: String,
}

#[derive(Debug, Serialize)]
struct BugReport<'a> {
    generated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    campaign: Option<&'a CampaignSnapshot>,
    findings: &'a [Finding],
}

/// Collects findings and schedule fingerprints and renders them as a YAML
/// bug report.
#[derive(Debug, Default)]
pub struct DiagnosticsCollector {
    findings: Vec<Finding>,
    fingerprints: HashMap<ScheduleId, String>,
    reports: Vec<PathBuf>,
}

impl DiagnosticsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_schedule(&mut self, schedule: &Schedule) -> Result<(), EngineError> {
        let fingerprint = schedule.fingerprint()?;
        self.fingerprints
            .insert(schedule.schedule_id().to_string(), fingerprint.clone());

        if schedule.is_buggy() || schedule.termination() == TerminationKind::Errored {
            self.findings.push(Finding {
                schedule_id: schedule.schedule_id().to_string(),
                scenario_id: schedule.scenario_id().to_string(),
                protocol: schedule.parameters().protocol.clone(),
                seed: schedule.parameters().seed,
                termination: schedule.termination(),
                steps: schedule.len(),
                broken_invariants: schedule.broken_invariants().to_vec(),
                error: schedule.error().map(str::to_string),
                fingerprint,
            });
        }
        Ok(())
    }

    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    pub fn fingerprint(&self, schedule_id: &str) -> Option<&str> {
        self.fingerprints.get(schedule_id).map(String::as_str)
    }

    pub fn reports(&self) -> &[PathBuf] {
        &self.reports
    }

    pub fn render_report(&self, campaign: Option<&CampaignSnapshot>) -> Result<String, EngineError> {
        let report = BugReport {
            generated_at: Utc::now(),
            campaign,
            findings: &self.findings,
        };
        serde_yaml::to_string(&report).map_err(|e| EngineError::Report(e.to_string()))
    }

    /// Writes `<name>_report.yaml` into `directory`.
    pub fn write_report(
        &mut self,
        directory: &Path,
        name: &str,
        campaign: Option<&CampaignSnapshot>,
    ) -> Result<PathBuf, EngineError> {
        let rendered = self.render_report(campaign)?;
        fs::create_dir_all(directory)?;
        let path = directory.join(format!("{name}_report.yaml"));
        fs::write(&path, rendered)?;
        self.reports.push(path.clone());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bftlab_core::schedule::ScenarioParameters;

    fn schedule(id: &str, termination: TerminationKind, broken: Vec<BrokenInvariant>) -> Schedule {
        Schedule::new(id, ScenarioParameters::default(), Vec::new(), broken, termination, None)
    }

    #[test]
    fn only_buggy_or_errored_schedules_are_findings() {
        let mut diagnostics = DiagnosticsCollector::new();
        diagnostics
            .record_schedule(&schedule("s0", TerminationKind::Stalled, Vec::new()))
            .unwrap();
        diagnostics
            .record_schedule(&schedule(
                "s1",
                TerminationKind::InvariantBroken,
                vec![BrokenInvariant {
                    id: "integrity".into(),
                    explanation: "r1 committed c0:0 at 0 and 1".into(),
                }],
            ))
            .unwrap();

        assert_eq!(diagnostics.findings().len(), 1);
        assert_eq!(diagnostics.findings()[0].scenario_id, "s1");
        assert_eq!(diagnostics.fingerprint("s0.schedule").map(str::len), Some(64));
    }

    #[test]
    fn report_is_written_as_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let mut diagnostics = DiagnosticsCollector::new();
        diagnostics
            .record_schedule(&schedule("s2", TerminationKind::Errored, Vec::new()))
            .unwrap();

        let path = diagnostics.write_report(dir.path(), "run", None).unwrap();
        assert_eq!(diagnostics.reports(), [path.clone()]);
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.contains("schedule_id: s2.schedule"));
        assert!(text.contains("termination: ERRORED"));
    }
}
