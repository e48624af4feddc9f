use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::info;

use bftlab_config::{BenchConfig, SavePolicy};
use bftlab_core::schedule::StrategyKind;
use bftlab_engine::prelude::*;
use bftlab_engine::{run_campaign_mode, run_replay_mode, run_simulation_mode};
use bftlab_simulator::scenario::ScenarioRegistry;
use bftlab_telemetry::{EventLogger, MetricsRecorder};

#[derive(Parser, Debug)]
#[command(name = "bftlab", version, about)]
pub struct Cli {
    /// Configuration file; defaults to `config/bftlab.yaml` plus the
    /// `BFTLAB_ENV` overlay
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Overrides `telemetry.log_level`
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Print Prometheus metrics after the command
    #[arg(long, global = true)]
    pub metrics: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one scenario to termination
    Simulate(SimulateArgs),
    /// Run a batch of scenarios in parallel
    Campaign(CampaignArgs),
    /// Replay a persisted schedule and verify its fingerprint
    Replay(ReplayArgs),
    /// List persisted schedules
    List(ListArgs),
    /// List registered protocols
    Protocols,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum StrategyArg {
    Random,
    Fifo,
    Exhaustive,
    #[value(name = "byzzfuzz")]
    ByzzFuzz,
}

impl From<StrategyArg> for StrategyKind {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Random => StrategyKind::Random,
            StrategyArg::Fifo => StrategyKind::Fifo,
            StrategyArg::Exhaustive => StrategyKind::Exhaustive,
            StrategyArg::ByzzFuzz => StrategyKind::ByzzFuzz,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum SaveArg {
    All,
    Buggy,
    None,
}

impl From<SaveArg> for SavePolicy {
    fn from(arg: SaveArg) -> Self {
        match arg {
            SaveArg::All => SavePolicy::All,
            SaveArg::Buggy => SavePolicy::Buggy,
            SaveArg::None => SavePolicy::None,
        }
    }
}

/// Overrides shared by `simulate` and `campaign`.
#[derive(Args, Debug, Clone, Default)]
pub struct ScenarioArgs {
    #[arg(long)]
    pub protocol: Option<String>,
    #[arg(long)]
    pub replicas: Option<u32>,
    #[arg(long)]
    pub budget: Option<u64>,
    #[arg(long, value_enum)]
    pub strategy: Option<StrategyArg>,
    #[arg(long, value_enum)]
    pub save: Option<SaveArg>,
    /// Schedule directory
    #[arg(long)]
    pub out: Option<PathBuf>,
    /// Enables GST with this bounded-liveness grace period in steps
    #[arg(long)]
    pub gst_grace_period: Option<u64>,
}

#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    #[arg(long)]
    pub seed: Option<u64>,
    #[command(flatten)]
    pub scenario: ScenarioArgs,
}

#[derive(Args, Debug, Clone)]
pub struct CampaignArgs {
    #[arg(short = 'n', long)]
    pub scenarios: Option<u64>,
    #[arg(short = 'j', long)]
    pub concurrency: Option<usize>,
    /// Campaign seed; scenario seeds are derived from it
    #[arg(long)]
    pub seed: Option<u64>,
    #[command(flatten)]
    pub scenario: ScenarioArgs,
}

#[derive(Args, Debug, Clone)]
pub struct ReplayArgs {
    pub schedule_id: String,
    #[arg(long)]
    pub dir: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ListArgs {
    /// Only schedules of this campaign
    #[arg(long)]
    pub campaign: Option<String>,
    /// Only schedules that broke an invariant
    #[arg(long)]
    pub buggy: bool,
    #[arg(long)]
    pub dir: Option<PathBuf>,
}

impl ScenarioArgs {
    fn apply(&self, config: &mut BenchConfig) {
        if let Some(protocol) = &self.protocol {
            config.scenario.protocol = protocol.clone();
        }
        if let Some(replicas) = self.replicas {
            config.scenario.num_replicas = replicas;
        }
        if let Some(budget) = self.budget {
            config.scenario.budget = budget;
        }
        if let Some(strategy) = self.strategy {
            config.strategy.kind = strategy.into();
        }
        if let Some(save) = self.save {
            config.campaign.save_schedules = save.into();
        }
        if let Some(out) = &self.out {
            config.storage.directory = out.clone();
        }
        if let Some(grace_period) = self.gst_grace_period {
            config.scenario.gst_grace_period = Some(grace_period);
        }
    }
}

impl Cli {
    /// Loads the configuration and applies command-line overrides.
    pub fn resolve_config(&self) -> anyhow::Result<BenchConfig> {
        let mut config = match &self.config {
            Some(path) => BenchConfig::load_from_path(path)?,
            None => BenchConfig::load()?,
        };
        if let Some(level) = &self.log_level {
            config.telemetry.log_level = level.clone();
        }

        match &self.command {
            Commands::Simulate(args) => args.scenario.apply(&mut config),
            Commands::Campaign(args) => {
                args.scenario.apply(&mut config);
                if let Some(n) = args.scenarios {
                    config.campaign.num_scenarios = n;
                }
                if let Some(j) = args.concurrency {
                    config.campaign.concurrency = j;
                }
                if let Some(seed) = args.seed {
                    config.campaign.initial_seed = seed;
                }
            }
            Commands::Replay(ReplayArgs { dir, .. }) | Commands::List(ListArgs { dir, .. }) => {
                if let Some(dir) = dir {
                    config.storage.directory = dir.clone();
                }
            }
            Commands::Protocols => {}
        }

        config.check().context("invalid configuration after overrides")?;
        Ok(config)
    }
}

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = cli.resolve_config()?;
    EventLogger::init(&config.telemetry.log_level, config.telemetry.json)?;
    let metrics = MetricsRecorder::new()?;
    let registry = ScenarioRegistry::with_builtin();
    let store: Arc<dyn ScheduleStore> = Arc::new(FileScheduleStore::new(&config.storage.directory));

    match &cli.command {
        Commands::Simulate(args) => {
            let schedule = run_simulation_mode(&config, &registry, args.seed, store, &metrics).await?;
            println!(
                "{}: {} after {} steps",
                schedule.scenario_id(),
                schedule.termination(),
                schedule.len()
            );
            for broken in schedule.broken_invariants() {
                println!("  broken {}: {}", broken.id, broken.explanation);
            }
        }
        Commands::Campaign(_) => {
            let summary = run_campaign_mode(&config, &registry, store, &metrics).await?;
            println!("{}", serde_json::to_string_pretty(&summary.snapshot)?);
            if let Some(report) = summary.report {
                println!("Bug report: {}", report.display());
            }
        }
        Commands::Replay(args) => {
            let schedule = run_replay_mode(&registry, store, &args.schedule_id)
                .await
                .with_context(|| format!("replaying {}", args.schedule_id))?;
            println!(
                "{} reproduced: {} after {} steps",
                schedule.schedule_id(),
                schedule.termination(),
                schedule.len()
            );
        }
        Commands::List(args) => {
            let mut filter = match &args.campaign {
                Some(campaign) => ScheduleFilter::campaign(campaign),
                None => ScheduleFilter::default(),
            };
            filter.buggy_only = args.buggy;
            let ids = store.list_schedules(&filter)?;
            info!(count = ids.len(), directory = %config.storage.directory.display(), "Listed schedules");
            for id in ids {
                println!("{id}");
            }
        }
        Commands::Protocols => {
            for id in registry.ids() {
                let description = registry.get(id).map(|f| f.description().to_string())?;
                println!("{id:<24} {description}");
            }
        }
    }

    if cli.metrics {
        print!("{}", metrics.gather_metrics()?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn campaign_flags_override_config() {
        let cli = Cli::try_parse_from([
            "bftlab", "campaign", "-n", "25", "-j", "3", "--seed", "9", "--strategy", "fifo",
            "--save", "all", "--replicas", "7",
        ])
        .unwrap();
        let Commands::Campaign(args) = &cli.command else {
            panic!("expected campaign");
        };

        let mut config = BenchConfig::default();
        args.scenario.apply(&mut config);
        assert_eq!(config.strategy.kind, StrategyKind::Fifo);
        assert_eq!(config.campaign.save_schedules, SavePolicy::All);
        assert_eq!(config.scenario.num_replicas, 7);
        assert_eq!(args.scenarios, Some(25));
        assert_eq!(args.concurrency, Some(3));
    }

    #[test]
    fn byzzfuzz_with_gst() {
        let cli = Cli::try_parse_from([
            "bftlab", "simulate", "--strategy", "byzzfuzz", "--gst-grace-period", "30",
        ])
        .unwrap();
        let Commands::Simulate(args) = &cli.command else {
            panic!("expected simulate");
        };
        let mut config = BenchConfig::default();
        args.scenario.apply(&mut config);
        assert_eq!(config.strategy.kind, StrategyKind::ByzzFuzz);
        assert_eq!(config.scenario.gst_grace_period, Some(30));
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["bftlab", "list", "--buggy", "--metrics"]).unwrap();
        assert!(cli.metrics);
        assert!(matches!(cli.command, Commands::List(ListArgs { buggy: true, .. })));
    }

    #[test]
    fn replay_requires_schedule_id() {
        assert!(Cli::try_parse_from(["bftlab", "replay"]).is_err());
    }
}
