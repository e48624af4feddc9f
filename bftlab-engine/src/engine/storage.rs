//! Schedule persistence: the store contract, a JSON file store, an
//! in-memory store and the bounded retry used by campaigns.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, warn};

use bftlab_config::validation::validate_identifier;
use bftlab_config::StorageConfig;
use bftlab_core::schedule::{Schedule, ScheduleId};

use super::error::StorageError;

/// Selects schedules in [`ScheduleStore::list_schedules`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScheduleFilter {
    /// Keep only schedules whose scenario id starts with this prefix.
    pub scenario_prefix: Option<String>,
    /// Keep only schedules that recorded a broken invariant.
    pub buggy_only: bool,
}

impl ScheduleFilter {
    pub fn campaign(campaign_id: &str) -> Self {
        Self {
            scenario_prefix: Some(format!("{campaign_id}-")),
            buggy_only: false,
        }
    }

    pub fn buggy(mut self) -> Self {
        self.buggy_only = true;
        self
    }

    fn matches_id(&self, schedule_id: &str) -> bool {
        self.scenario_prefix
            .as_deref()
            .map_or(true, |prefix| schedule_id.starts_with(prefix))
    }
}

/// Persistence collaborator. Calls may block on I/O and are never made
/// while a scenario is stepping.
pub trait ScheduleStore: Send + Sync {
    fn save_schedule(&self, schedule: &Schedule) -> Result<ScheduleId, StorageError>;

    fn load_schedule(&self, schedule_id: &str) -> Result<Schedule, StorageError>;

    /// Matching ids in ascending order.
    fn list_schedules(&self, filter: &ScheduleFilter) -> Result<Vec<ScheduleId>, StorageError>;
}

/// One pretty-printed JSON file per schedule, named `<scheduleId>.json`.
#[derive(Debug, Clone)]
pub struct FileScheduleStore {
    directory: PathBuf,
}

impl FileScheduleStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, schedule_id: &str) -> Result<PathBuf, StorageError> {
        validate_identifier(schedule_id)
            .map_err(|_| StorageError::InvalidId(schedule_id.to_string()))?;
        Ok(self.directory.join(format!("{schedule_id}.json")))
    }
}

impl ScheduleStore for FileScheduleStore {
    fn save_schedule(&self, schedule: &Schedule) -> Result<ScheduleId, StorageError> {
        let path = self.path_for(schedule.schedule_id())?;
        fs::create_dir_all(&self.directory)?;

        // Write-then-rename so readers never see a half-written file.
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, serde_json::to_vec_pretty(schedule)?)?;
        fs::rename(&staging, &path)?;

        debug!(schedule_id = schedule.schedule_id(), path = %path.display(), "Schedule saved");
        Ok(schedule.schedule_id().to_string())
    }

    fn load_schedule(&self, schedule_id: &str) -> Result<Schedule, StorageError> {
        let path = self.path_for(schedule_id)?;
        let bytes = fs::read(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound(schedule_id.to_string()),
            _ => StorageError::Io(e),
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn list_schedules(&self, filter: &ScheduleFilter) -> Result<Vec<ScheduleId>, StorageError> {
        if !self.directory.exists() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.directory)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if !filter.matches_id(id) {
                continue;
            }
            if filter.buggy_only && !self.load_schedule(id)?.is_buggy() {
                continue;
            }
            ids.push(id.to_string());
        }
        ids.sort();
        Ok(ids)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryScheduleStore {
    schedules: RwLock<BTreeMap<ScheduleId, Schedule>>,
}

impl InMemoryScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.schedules.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.schedules.read().is_empty()
    }
}

impl ScheduleStore for InMemoryScheduleStore {
    fn save_schedule(&self, schedule: &Schedule) -> Result<ScheduleId, StorageError> {
        let id = schedule.schedule_id().to_string();
        self.schedules.write().insert(id.clone(), schedule.clone());
        Ok(id)
    }

    fn load_schedule(&self, schedule_id: &str) -> Result<Schedule, StorageError> {
        self.schedules
            .read()
            .get(schedule_id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(schedule_id.to_string()))
    }

    fn list_schedules(&self, filter: &ScheduleFilter) -> Result<Vec<ScheduleId>, StorageError> {
        Ok(self
            .schedules
            .read()
            .iter()
            .filter(|(id, schedule)| {
                filter.matches_id(id) && (!filter.buggy_only || schedule.is_buggy())
            })
            .map(|(id, _)| id.clone())
            .collect())
    }
}

/// Bounded retry with exponential backoff.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first failure.
    pub max_retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &StorageConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }

    fn delay(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(1_u32 << attempt.min(16))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&StorageConfig::default())
    }
}

/// Saves on the blocking pool, retrying failed attempts. Returns the last
/// error once the retries are spent.
pub async fn save_with_retry(
    store: Arc<dyn ScheduleStore>,
    schedule: Arc<Schedule>,
    policy: RetryPolicy,
) -> Result<ScheduleId, StorageError> {
    let mut attempt = 0;
    loop {
        let store = store.clone();
        let pending = schedule.clone();
        let result = tokio::task::spawn_blocking(move || store.save_schedule(&pending))
            .await
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;

        match result {
            Ok(id) => return Ok(id),
            Err(e) if attempt < policy.max_retries => {
                let delay = policy.delay(attempt);
                warn!(
                    schedule_id = schedule.schedule_id(),
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Schedule save failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bftlab_core::prelude::*;
    use tracing_test::traced_test;

    fn schedule(scenario_id: &str, buggy: bool) -> Schedule {
        let broken = if buggy {
            vec![BrokenInvariant {
                id: "consistency".into(),
                explanation: "r0 committed x, r1 committed y at 0".into(),
            }]
        } else {
            Vec::new()
        };
        let termination = if buggy {
            TerminationKind::InvariantBroken
        } else {
            TerminationKind::Stalled
        };
        Schedule::new(
            scenario_id,
            ScenarioParameters::default(),
            Vec::new(),
            broken,
            termination,
            None,
        )
    }

    #[test]
    fn file_store_round_trip_and_filters() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileScheduleStore::new(dir.path().join("schedules"));
        assert!(store.list_schedules(&ScheduleFilter::default()).unwrap().is_empty());

        let buggy = schedule("c1-s0", true);
        let clean = schedule("c1-s1", false);
        let other = schedule("c2-s0", true);
        for s in [&buggy, &clean, &other] {
            store.save_schedule(s).unwrap();
        }

        assert_eq!(store.load_schedule("c1-s0.schedule").unwrap(), buggy);
        assert_eq!(
            store.list_schedules(&ScheduleFilter::campaign("c1")).unwrap(),
            vec!["c1-s0.schedule", "c1-s1.schedule"]
        );
        assert_eq!(
            store
                .list_schedules(&ScheduleFilter::default().buggy())
                .unwrap(),
            vec!["c1-s0.schedule", "c2-s0.schedule"]
        );

        let text = std::fs::read_to_string(store.directory().join("c1-s0.schedule.json")).unwrap();
        assert!(text.contains("\"brokenInvariants\""));
    }

    #[test]
    fn file_store_rejects_unknown_and_unsafe_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileScheduleStore::new(dir.path());
        assert!(matches!(
            store.load_schedule("missing.schedule"),
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            store.load_schedule("../escape"),
            Err(StorageError::InvalidId(_))
        ));
    }

    #[test]
    fn in_memory_store_filters() {
        let store = InMemoryScheduleStore::new();
        store.save_schedule(&schedule("c1-s0", false)).unwrap();
        store.save_schedule(&schedule("c1-s1", true)).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(
            store
                .list_schedules(&ScheduleFilter::campaign("c1").buggy())
                .unwrap(),
            vec!["c1-s1.schedule"]
        );
    }

    struct Refusing;

    impl ScheduleStore for Refusing {
        fn save_schedule(&self, _schedule: &Schedule) -> Result<ScheduleId, StorageError> {
            Err(StorageError::Unavailable("read-only volume".into()))
        }

        fn load_schedule(&self, schedule_id: &str) -> Result<Schedule, StorageError> {
            Err(StorageError::NotFound(schedule_id.into()))
        }

        fn list_schedules(&self, _filter: &ScheduleFilter) -> Result<Vec<ScheduleId>, StorageError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn retries_are_bounded_and_logged() {
        let policy = RetryPolicy {
            max_retries: 2,
            backoff: Duration::from_millis(1),
        };
        let result = save_with_retry(Arc::new(Refusing), Arc::new(schedule("c3-s0", false)), policy).await;
        assert!(matches!(result, Err(StorageError::Unavailable(_))));
        assert!(logs_contain("Schedule save failed, retrying"));
        assert!(logs_contain("attempt=2"));
        assert!(!logs_contain("attempt=3"));
    }

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy {
            max_retries: 3,
            backoff: Duration::from_millis(10),
        };
        assert_eq!(policy.delay(0), Duration::from_millis(10));
        assert_eq!(policy.delay(2), Duration::from_millis(40));
    }
}
