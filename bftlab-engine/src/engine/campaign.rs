//! Campaign orchestration.
//!
//! A campaign runs `num_scenarios` scenarios on a bounded pool of blocking
//! workers. Workers claim scenario indices from a shared counter, run one
//! controller each and send the finished schedule over a completion
//! channel. A single supervisor task persists schedules and updates the
//! aggregate counters, so persistence never happens on a stepping thread.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use bftlab_config::{BenchConfig, SavePolicy};
use bftlab_core::schedule::{ScenarioParameters, Schedule, ScheduleId, TerminationKind};
use bftlab_simulator::scenario::{ScenarioController, ScenarioError, ScenarioRegistry};
use bftlab_simulator::scheduler::StrategyFactory;
use bftlab_telemetry::{EventLogger, MetricsRecorder};

use super::error::EngineError;
use super::storage::{save_with_retry, RetryPolicy, ScheduleStore};

/// Everything needed to start a campaign.
#[derive(Clone, Debug, PartialEq)]
pub struct CampaignPlan {
    /// Shared by every scenario; the seed is replaced per scenario.
    pub base: ScenarioParameters,
    pub num_scenarios: u64,
    pub concurrency: usize,
    pub initial_seed: u64,
    pub save_policy: SavePolicy,
    pub retry: RetryPolicy,
}

impl CampaignPlan {
    pub fn from_config(config: &BenchConfig) -> Self {
        Self {
            base: config.scenario_parameters(config.campaign.initial_seed),
            num_scenarios: config.campaign.num_scenarios,
            concurrency: config.campaign.concurrency,
            initial_seed: config.campaign.initial_seed,
            save_policy: config.campaign.save_schedules,
            retry: RetryPolicy::from_config(&config.storage),
        }
    }
}

/// splitmix64 of the campaign seed offset by the scenario index.
pub fn scenario_seed(initial_seed: u64, index: u64) -> u64 {
    let mut z = initial_seed.wrapping_add(index.wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15));
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Point-in-time copy of a campaign's aggregate state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignSnapshot {
    pub campaign_id: String,
    pub num_scenarios: u64,
    pub num_term: u64,
    pub num_err: u64,
    pub num_maxed_out: u64,
    pub schedule_ids: Vec<ScheduleId>,
    /// Finished schedules that could not be persisted.
    pub pending_schedule_ids: Vec<ScheduleId>,
    pub warnings: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stopped: bool,
}

impl CampaignSnapshot {
    pub fn completed(&self) -> u64 {
        self.num_term + self.num_err + self.num_maxed_out
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}

#[derive(Debug, Default)]
struct CampaignState {
    num_term: u64,
    num_err: u64,
    num_maxed_out: u64,
    schedule_ids: Vec<ScheduleId>,
    pending: BTreeMap<ScheduleId, Arc<Schedule>>,
    warnings: Vec<String>,
    finished_at: Option<DateTime<Utc>>,
}

impl CampaignState {
    fn count(&mut self, termination: TerminationKind) {
        match termination {
            TerminationKind::InvariantBroken => self.num_term += 1,
            TerminationKind::Errored => self.num_err += 1,
            TerminationKind::BudgetExhausted | TerminationKind::Stalled => {
                self.num_maxed_out += 1
            }
        }
    }
}

#[derive(Debug)]
struct Campaign {
    id: String,
    num_scenarios: u64,
    created_at: DateTime<Utc>,
    save_policy: SavePolicy,
    retry: RetryPolicy,
    cancel: AtomicBool,
    next_index: AtomicU64,
    state: Mutex<CampaignState>,
}

impl Campaign {
    fn snapshot(&self) -> CampaignSnapshot {
        let state = self.state.lock();
        CampaignSnapshot {
            campaign_id: self.id.clone(),
            num_scenarios: self.num_scenarios,
            num_term: state.num_term,
            num_err: state.num_err,
            num_maxed_out: state.num_maxed_out,
            schedule_ids: state.schedule_ids.clone(),
            pending_schedule_ids: state.pending.keys().cloned().collect(),
            warnings: state.warnings.clone(),
            created_at: self.created_at,
            finished_at: state.finished_at,
            stopped: self.cancel.load(Ordering::Acquire),
        }
    }

    fn stop(&self) {
        if !self.cancel.swap(true, Ordering::AcqRel) {
            info!(campaign_id = %self.id, "Campaign stop requested");
        }
    }
}

enum ScenarioOutcome {
    Finished(Schedule),
    Failed { scenario_id: String, error: String },
    Cancelled { scenario_id: String },
}

/// Starts campaigns and keeps them queryable by id.
#[derive(Clone)]
pub struct CampaignOrchestrator {
    registry: ScenarioRegistry,
    store: Arc<dyn ScheduleStore>,
    metrics: Option<MetricsRecorder>,
    campaigns: Arc<Mutex<BTreeMap<String, Arc<Campaign>>>>,
    sequence: Arc<AtomicU64>,
}

impl CampaignOrchestrator {
    pub fn new(registry: ScenarioRegistry, store: Arc<dyn ScheduleStore>) -> Self {
        Self {
            registry,
            store,
            metrics: None,
            campaigns: Arc::new(Mutex::new(BTreeMap::new())),
            sequence: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsRecorder) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn registry(&self) -> &ScenarioRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn ScheduleStore> {
        &self.store
    }

    /// Spawns the worker pool and supervisor. Must be called from within a
    /// Tokio runtime. Protocol and strategy are validated up front.
    #[instrument(level = "info", skip_all, fields(protocol = %plan.base.protocol))]
    pub fn start(&self, plan: CampaignPlan) -> Result<CampaignHandle, EngineError> {
        self.registry.get(&plan.base.protocol)?;
        let factory = StrategyFactory::new(plan.base.strategy.clone())?;

        let created_at = Utc::now();
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let campaign = Arc::new(Campaign {
            id: format!("campaign-{sequence}-{}", created_at.format("%Y%m%dT%H%M%S")),
            num_scenarios: plan.num_scenarios,
            created_at,
            save_policy: plan.save_policy,
            retry: plan.retry,
            cancel: AtomicBool::new(false),
            next_index: AtomicU64::new(0),
            state: Mutex::new(CampaignState::default()),
        });
        self.campaigns
            .lock()
            .insert(campaign.id.clone(), Arc::clone(&campaign));

        let workers = plan
            .concurrency
            .clamp(1, plan.num_scenarios.max(1) as usize);
        info!(
            campaign_id = %campaign.id,
            num_scenarios = plan.num_scenarios,
            workers,
            "Campaign started"
        );
        EventLogger::log_event(
            "campaign_started",
            vec![
                KeyValue::new("campaign_id", campaign.id.clone()),
                KeyValue::new("num_scenarios", plan.num_scenarios.to_string()),
                KeyValue::new("strategy", format!("{:?}", plan.base.strategy.kind)),
            ],
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let pool: Vec<JoinHandle<()>> = (0..workers)
            .map(|_| {
                let worker = Worker {
                    campaign: Arc::clone(&campaign),
                    registry: self.registry.clone(),
                    factory: factory.clone(),
                    base: plan.base.clone(),
                    initial_seed: plan.initial_seed,
                    outcomes: tx.clone(),
                };
                tokio::task::spawn_blocking(move || worker.run())
            })
            .collect();
        drop(tx);

        let supervisor = Supervisor {
            campaign: Arc::clone(&campaign),
            store: Arc::clone(&self.store),
            metrics: self.metrics.clone(),
        };
        let task = tokio::spawn(supervisor.run(rx, pool));

        Ok(CampaignHandle { campaign, task })
    }

    /// Cooperative: running scenarios stop between steps and are neither
    /// counted nor persisted.
    pub fn stop(&self, campaign_id: &str) -> Result<(), EngineError> {
        self.campaign(campaign_id)?.stop();
        Ok(())
    }

    pub fn snapshot(&self, campaign_id: &str) -> Result<CampaignSnapshot, EngineError> {
        Ok(self.campaign(campaign_id)?.snapshot())
    }

    pub fn campaign_ids(&self) -> Vec<String> {
        self.campaigns.lock().keys().cloned().collect()
    }

    /// A finished schedule still waiting to be persisted.
    pub fn pending_schedule(&self, campaign_id: &str, schedule_id: &str) -> Option<Schedule> {
        let campaign = self.campaign(campaign_id).ok()?;
        let state = campaign.state.lock();
        state.pending.get(schedule_id).map(|s| Schedule::clone(s))
    }

    /// Tries to persist every pending schedule again, with the campaign's
    /// retry policy.
    pub async fn retry_pending(&self, campaign_id: &str) -> Result<CampaignSnapshot, EngineError> {
        let campaign = self.campaign(campaign_id)?;
        let pending: Vec<Arc<Schedule>> = campaign.state.lock().pending.values().cloned().collect();

        for schedule in pending {
            match save_with_retry(Arc::clone(&self.store), Arc::clone(&schedule), campaign.retry).await
            {
                Ok(id) => {
                    let mut state = campaign.state.lock();
                    state.pending.remove(schedule.schedule_id());
                    state.schedule_ids.push(id);
                    info!(campaign_id, schedule_id = schedule.schedule_id(), "Pending schedule persisted");
                }
                Err(e) => {
                    warn!(campaign_id, schedule_id = schedule.schedule_id(), error = %e, "Pending schedule still not persisted");
                    if let Some(metrics) = &self.metrics {
                        metrics.inc_persistence_failures();
                    }
                }
            }
        }
        Ok(campaign.snapshot())
    }

    fn campaign(&self, campaign_id: &str) -> Result<Arc<Campaign>, EngineError> {
        self.campaigns
            .lock()
            .get(campaign_id)
            .cloned()
            .ok_or_else(|| EngineError::UnknownCampaign(campaign_id.to_string()))
    }
}

/// A running campaign.
pub struct CampaignHandle {
    campaign: Arc<Campaign>,
    task: JoinHandle<()>,
}

impl CampaignHandle {
    pub fn campaign_id(&self) -> &str {
        &self.campaign.id
    }

    pub fn stop(&self) {
        self.campaign.stop();
    }

    pub fn snapshot(&self) -> CampaignSnapshot {
        self.campaign.snapshot()
    }

    /// Waits for every worker and the supervisor to finish.
    pub async fn wait(self) -> Result<CampaignSnapshot, EngineError> {
        self.task.await?;
        Ok(self.campaign.snapshot())
    }
}

struct Worker {
    campaign: Arc<Campaign>,
    registry: ScenarioRegistry,
    factory: StrategyFactory,
    base: ScenarioParameters,
    initial_seed: u64,
    outcomes: mpsc::UnboundedSender<ScenarioOutcome>,
}

impl Worker {
    fn run(self) {
        loop {
            if self.campaign.cancel.load(Ordering::Acquire) {
                break;
            }
            let index = self.campaign.next_index.fetch_add(1, Ordering::AcqRel);
            if index >= self.campaign.num_scenarios {
                break;
            }
            let outcome = self.run_scenario(index);
            if self.outcomes.send(outcome).is_err() {
                break;
            }
        }
    }

    fn run_scenario(&self, index: u64) -> ScenarioOutcome {
        let scenario_id = format!("{}-s{index}", self.campaign.id);
        let seed = scenario_seed(self.initial_seed, index);
        let parameters = ScenarioParameters {
            seed,
            ..self.base.clone()
        };
        debug!(scenario_id = %scenario_id, seed, "Scenario claimed");

        let result = ScenarioController::new(
            scenario_id.as_str(),
            &self.registry,
            parameters,
            self.factory.create(seed),
        )
        .and_then(|controller| {
            controller
                .with_campaign(self.campaign.id.as_str())
                .run(&self.campaign.cancel)
        });

        match result {
            Ok(schedule) => ScenarioOutcome::Finished(schedule),
            Err(ScenarioError::Cancelled(_)) => ScenarioOutcome::Cancelled { scenario_id },
            Err(e) => ScenarioOutcome::Failed {
                scenario_id,
                error: e.to_string(),
            },
        }
    }
}

struct Supervisor {
    campaign: Arc<Campaign>,
    store: Arc<dyn ScheduleStore>,
    metrics: Option<MetricsRecorder>,
}

impl Supervisor {
    async fn run(self, mut outcomes: mpsc::UnboundedReceiver<ScenarioOutcome>, pool: Vec<JoinHandle<()>>) {
        while let Some(outcome) = outcomes.recv().await {
            match outcome {
                ScenarioOutcome::Finished(schedule) => self.finish(schedule).await,
                ScenarioOutcome::Failed { scenario_id, error } => {
                    error!(campaign_id = %self.campaign.id, scenario_id = %scenario_id, error = %error, "Scenario could not run");
                    if let Some(metrics) = &self.metrics {
                        metrics.record_scenario(TerminationKind::Errored.as_str(), 0, false);
                    }
                    let mut state = self.campaign.state.lock();
                    state.count(TerminationKind::Errored);
                    state.warnings.push(format!("{scenario_id}: {error}"));
                }
                ScenarioOutcome::Cancelled { scenario_id } => {
                    debug!(scenario_id = %scenario_id, "Scenario discarded after stop");
                }
            }
        }

        for worker in pool {
            if let Err(e) = worker.await {
                error!(campaign_id = %self.campaign.id, error = %e, "Campaign worker failed");
                self.campaign
                    .state
                    .lock()
                    .warnings
                    .push(format!("worker failed: {e}"));
            }
        }

        let snapshot = {
            let mut state = self.campaign.state.lock();
            state.finished_at = Some(Utc::now());
            drop(state);
            self.campaign.snapshot()
        };
        info!(
            campaign_id = %snapshot.campaign_id,
            num_term = snapshot.num_term,
            num_err = snapshot.num_err,
            num_maxed_out = snapshot.num_maxed_out,
            stopped = snapshot.stopped,
            "Campaign finished"
        );
        EventLogger::log_event(
            "campaign_finished",
            vec![
                KeyValue::new("campaign_id", snapshot.campaign_id.clone()),
                KeyValue::new("num_term", snapshot.num_term.to_string()),
                KeyValue::new("num_err", snapshot.num_err.to_string()),
                KeyValue::new("num_maxed_out", snapshot.num_maxed_out.to_string()),
                KeyValue::new("pending", snapshot.pending_schedule_ids.len().to_string()),
            ],
        );
    }

    async fn finish(&self, schedule: Schedule) {
        let termination = schedule.termination();
        let buggy = schedule.is_buggy();
        if let Some(metrics) = &self.metrics {
            metrics.record_scenario(termination.as_str(), schedule.len() as u64, buggy);
            for action in schedule.actions() {
                metrics.record_action(action.kind().as_str());
            }
        }
        EventLogger::log_event(
            "scenario_terminated",
            vec![
                KeyValue::new("scenario_id", schedule.scenario_id().to_string()),
                KeyValue::new("termination", termination.as_str()),
                KeyValue::new("steps", schedule.len().to_string()),
            ],
        );

        let schedule = Arc::new(schedule);
        let saved = if self.campaign.save_policy.should_save(buggy) {
            Some(save_with_retry(Arc::clone(&self.store), Arc::clone(&schedule), self.campaign.retry).await)
        } else {
            None
        };

        let mut state = self.campaign.state.lock();
        state.count(termination);
        match saved {
            Some(Ok(id)) => state.schedule_ids.push(id),
            Some(Err(e)) => {
                warn!(
                    campaign_id = %self.campaign.id,
                    schedule_id = schedule.schedule_id(),
                    error = %e,
                    "Schedule kept in memory after failed persistence"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.inc_persistence_failures();
                }
                state
                    .warnings
                    .push(format!("{} not persisted: {e}", schedule.schedule_id()));
                state
                    .pending
                    .insert(schedule.schedule_id().to_string(), schedule);
            }
            None => {}
        }
    }
}
