//! # bftlab-engine
//!
//! Campaign orchestration, schedule persistence and the runtime entry
//! points shared by frontends.

pub mod engine;
pub mod runtime;

pub use engine::prelude;

// Re-export the runtime functions so frontends can simply do:
pub use runtime::{
    generate_bug_report, run_campaign_mode, run_replay_mode, run_simulation_mode, CampaignSummary,
};
