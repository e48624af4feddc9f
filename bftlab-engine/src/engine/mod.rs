mod campaign;
mod diagnostics;
mod error;
mod storage;

pub use self::{
    campaign::{
        scenario_seed, CampaignHandle, CampaignOrchestrator, CampaignPlan, CampaignSnapshot,
    },
    diagnostics::{DiagnosticsCollector, Finding},
    error::{EngineError, StorageError},
    storage::{
        save_with_retry, FileScheduleStore, InMemoryScheduleStore, RetryPolicy, ScheduleFilter,
        ScheduleStore,
    },
};

pub mod prelude {
    pub use super::{
        CampaignHandle, CampaignOrchestrator, CampaignPlan, CampaignSnapshot, DiagnosticsCollector,
        EngineError, FileScheduleStore, InMemoryScheduleStore, ScheduleFilter, ScheduleStore,
    };
}
