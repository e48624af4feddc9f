/*!
# Runtime Entry Points

Single simulations, campaigns and replays share these functions so that
every frontend (the CLI today) runs scenarios, persists schedules and
writes bug reports the same way.
*/

use std::path::{Path, PathBuf};
use std::sync::Arc;

use opentelemetry::KeyValue;
use tracing::{error, info, instrument, warn};

use bftlab_config::BenchConfig;
use bftlab_core::schedule::Schedule;
use bftlab_simulator::scenario::ScenarioRegistry;
use bftlab_simulator::{replay_schedule, run_scenario};
use bftlab_telemetry::{EventLogger, MetricsRecorder};

use crate::engine::{
    CampaignOrchestrator, CampaignPlan, CampaignSnapshot, DiagnosticsCollector, EngineError,
    ScheduleFilter, ScheduleStore,
};

/// A finished campaign and the bug report written for it, if any finding
/// was persisted.
#[derive(Debug, Clone)]
pub struct CampaignSummary {
    pub snapshot: CampaignSnapshot,
    pub report: Option<PathBuf>,
}

/// Runs one scenario with `seed` (or the configured seed) and saves its
/// schedule according to the campaign save policy.
#[instrument(level = "info", name = "run_simulation_mode", skip(config, registry, store, metrics))]
pub async fn run_simulation_mode(
    config: &BenchConfig,
    registry: &ScenarioRegistry,
    seed: Option<u64>,
    store: Arc<dyn ScheduleStore>,
    metrics: &MetricsRecorder,
) -> Result<Schedule, EngineError> {
    let seed = seed.unwrap_or(config.scenario.seed);
    let parameters = config.scenario_parameters(seed);
    let scenario_id = format!("sim-{seed}");
    let registry = registry.clone();

    let schedule = tokio::task::spawn_blocking(move || {
        run_scenario(&registry, &scenario_id, parameters)
    })
    .await??;

    let fingerprint = schedule.fingerprint()?;
    metrics.record_scenario(
        schedule.termination().as_str(),
        schedule.len() as u64,
        schedule.is_buggy(),
    );
    for action in schedule.actions() {
        metrics.record_action(action.kind().as_str());
    }
    info!(
        scenario_id = schedule.scenario_id(),
        termination = %schedule.termination(),
        steps = schedule.len(),
        fingerprint = %fingerprint,
        "Simulation complete"
    );
    EventLogger::log_event(
        "simulation_complete",
        vec![
            KeyValue::new("seed", seed.to_string()),
            KeyValue::new("termination", schedule.termination().as_str()),
            KeyValue::new("steps", schedule.len().to_string()),
            KeyValue::new("fingerprint", fingerprint),
        ],
    );

    if config.campaign.save_schedules.should_save(schedule.is_buggy()) {
        let saved = schedule.clone();
        let id = tokio::task::spawn_blocking(move || store.save_schedule(&saved)).await??;
        info!(schedule_id = %id, "Schedule saved");
    }
    Ok(schedule)
}

/// Runs a campaign to completion. Ctrl-C requests a cooperative stop.
/// Persisted findings are summarised in `<campaignId>_report.yaml` next to
/// the schedules.
#[instrument(level = "info", name = "run_campaign_mode", skip_all)]
pub async fn run_campaign_mode(
    config: &BenchConfig,
    registry: &ScenarioRegistry,
    store: Arc<dyn ScheduleStore>,
    metrics: &MetricsRecorder,
) -> Result<CampaignSummary, EngineError> {
    let orchestrator =
        CampaignOrchestrator::new(registry.clone(), Arc::clone(&store)).with_metrics(metrics.clone());
    let handle = orchestrator.start(CampaignPlan::from_config(config))?;
    let campaign_id = handle.campaign_id().to_string();

    let wait = handle.wait();
    tokio::pin!(wait);
    let mut snapshot = tokio::select! {
        result = &mut wait => result?,
        Ok(()) = tokio::signal::ctrl_c() => {
            warn!(campaign_id = %campaign_id, "Interrupted, stopping campaign");
            orchestrator.stop(&campaign_id)?;
            wait.await?
        }
    };

    if !snapshot.pending_schedule_ids.is_empty() {
        warn!(
            campaign_id = %campaign_id,
            pending = snapshot.pending_schedule_ids.len(),
            "Retrying schedules that failed to persist"
        );
        snapshot = orchestrator.retry_pending(&campaign_id).await?;
    }

    let report = write_campaign_report(&config.storage.directory, store, &snapshot).await?;
    Ok(CampaignSummary { snapshot, report })
}

/// Loads a persisted schedule, replays it and checks that the replay
/// reproduces the recorded fingerprint.
#[instrument(level = "info", name = "run_replay_mode", skip(registry, store))]
pub async fn run_replay_mode(
    registry: &ScenarioRegistry,
    store: Arc<dyn ScheduleStore>,
    schedule_id: &str,
) -> Result<Schedule, EngineError> {
    let id = schedule_id.to_string();
    let recorded = tokio::task::spawn_blocking(move || store.load_schedule(&id)).await??;

    let registry = registry.clone();
    let original = recorded.clone();
    let replayed =
        tokio::task::spawn_blocking(move || replay_schedule(&registry, &original)).await??;

    let expected = recorded.fingerprint()?;
    let actual = replayed.fingerprint()?;
    EventLogger::log_event(
        "replay_complete",
        vec![
            KeyValue::new("schedule_id", schedule_id.to_string()),
            KeyValue::new("termination", replayed.termination().as_str()),
            KeyValue::new("fingerprint", actual.clone()),
        ],
    );
    if expected != actual {
        error!(schedule_id, expected = %expected, actual = %actual, "Replay diverged");
        return Err(EngineError::ReplayMismatch {
            schedule_id: schedule_id.to_string(),
            expected,
            actual,
        });
    }
    info!(schedule_id, fingerprint = %actual, "Replay reproduced the recorded schedule");
    Ok(replayed)
}

/// Writes a bug report for the given schedules. Returns `None` when none of
/// them is a finding.
pub fn generate_bug_report(
    directory: &Path,
    name: &str,
    schedules: &[Schedule],
    campaign: Option<&CampaignSnapshot>,
) -> Result<Option<PathBuf>, EngineError> {
    let mut diagnostics = DiagnosticsCollector::new();
    for schedule in schedules {
        diagnostics.record_schedule(schedule)?;
    }
    if diagnostics.findings().is_empty() {
        return Ok(None);
    }
    let path = diagnostics.write_report(directory, name, campaign)?;
    info!(path = %path.display(), findings = diagnostics.findings().len(), "Bug report written");
    Ok(Some(path))
}

async fn write_campaign_report(
    directory: &Path,
    store: Arc<dyn ScheduleStore>,
    snapshot: &CampaignSnapshot,
) -> Result<Option<PathBuf>, EngineError> {
    let directory = directory.to_path_buf();
    let snapshot = snapshot.clone();
    tokio::task::spawn_blocking(move || {
        let filter = ScheduleFilter::campaign(&snapshot.campaign_id).buggy();
        let schedules = store
            .list_schedules(&filter)?
            .iter()
            .map(|id| store.load_schedule(id))
            .collect::<Result<Vec<_>, _>>()?;
        generate_bug_report(&directory, &snapshot.campaign_id, &schedules, Some(&snapshot))
    })
    .await?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::InMemoryScheduleStore;
    use bftlab_config::SavePolicy;

    #[tokio::test]
    async fn simulation_then_replay() {
        let mut config = BenchConfig::default();
        config.campaign.save_schedules = SavePolicy::All;
        let registry = ScenarioRegistry::with_builtin();
        let store: Arc<dyn ScheduleStore> = Arc::new(InMemoryScheduleStore::new());
        let metrics = MetricsRecorder::new().unwrap();

        let schedule = run_simulation_mode(&config, &registry, Some(42), Arc::clone(&store), &metrics)
            .await
            .unwrap();
        assert_eq!(schedule.scenario_id(), "sim-42");
        assert!(schedule.len() as u64 <= config.scenario.budget);
        assert!(metrics
            .gather_metrics()
            .unwrap()
            .contains("bftlab_scenario_steps_count 1"));

        let replayed = run_replay_mode(&registry, store, schedule.schedule_id())
            .await
            .unwrap();
        assert_eq!(replayed, schedule);
    }

    #[tokio::test]
    async fn replay_of_unknown_schedule_fails() {
        let registry = ScenarioRegistry::with_builtin();
        let store: Arc<dyn ScheduleStore> = Arc::new(InMemoryScheduleStore::new());
        assert!(matches!(
            run_replay_mode(&registry, store, "nope.schedule").await,
            Err(EngineError::Storage(_))
        ));
    }

    #[test]
    fn no_report_without_findings() {
        let dir = tempfile::tempdir().unwrap();
        let schedule = Schedule::new(
            "quiet",
            Default::default(),
            Vec::new(),
            Vec::new(),
            bftlab_core::schedule::TerminationKind::Stalled,
            None,
        );
        assert_eq!(
            generate_bug_report(dir.path(), "quiet", &[schedule], None).unwrap(),
            None
        );
    }
}
