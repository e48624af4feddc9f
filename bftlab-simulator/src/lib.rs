//! # bftlab-simulator
//!
//! Runs deterministic BFT scenarios on top of `bftlab-core`: the invariant
//! engine checks safety after every step, an exploration strategy picks the
//! next enabled action, and the scenario controller ties both to one
//! transport and produces a replayable [`Schedule`].
//!
//! ### Key Submodules:
//! - `invariants`: consistency and integrity predicates over commit logs
//! - `scheduler`: random, FIFO, replay and bounded exhaustive strategies
//! - `scenario`: controller, protocol registry and published views
//! - `protocols`: the `toy-consensus` reference protocol
//!
//! All randomness of a scenario flows through its strategy's seeded RNG.

pub mod invariants;
pub mod protocols;
pub mod scenario;
pub mod scheduler;

use std::sync::atomic::AtomicBool;

use bftlab_core::schedule::{ScenarioParameters, Schedule};

use scenario::{ScenarioController, ScenarioError, ScenarioRegistry};
use scheduler::{ReplayStrategy, StrategyFactory};

/// Runs one scenario to termination with the strategy named in `parameters`.
pub fn run_scenario(
    registry: &ScenarioRegistry,
    scenario_id: &str,
    parameters: ScenarioParameters,
) -> Result<Schedule, ScenarioError> {
    let factory = StrategyFactory::new(parameters.strategy.clone())?;
    let strategy = factory.create(parameters.seed);
    let mut controller = ScenarioController::new(scenario_id, registry, parameters, strategy)?;
    controller.run(&AtomicBool::new(false))
}

/// Re-runs a recorded schedule against a freshly built scenario with the
/// same parameters. Divergence terminates the replay as `ERRORED`.
pub fn replay_schedule(
    registry: &ScenarioRegistry,
    schedule: &Schedule,
) -> Result<Schedule, ScenarioError> {
    let strategy = Box::new(ReplayStrategy::from_schedule(schedule));
    let mut controller = ScenarioController::new(
        schedule.scenario_id(),
        registry,
        schedule.parameters().clone(),
        strategy,
    )?;
    controller.run(&AtomicBool::new(false))
}
