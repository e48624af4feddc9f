//! ## bftlab-cli
//! **Operator interface for the BFT testing harness**
//!
//! Runs single simulations, campaigns and replays of persisted schedules
//! from one layered configuration.
//!
//! ### Expectations:
//! - Flags override the loaded configuration
//! - Every command ends with a structured lifecycle event
//!
//! ### Future:
//! - Interactive stepping through a scenario's operator API

use clap::Parser;

mod commands;

use commands::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    commands::run_command(cli).await
}
