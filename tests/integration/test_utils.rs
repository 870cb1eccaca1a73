//! Shared test utilities for integration tests
//!
//! Builds agents over a shared sled store so a test can simulate a process restart
//! by dropping one agent and building another on the same storage.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use pulse::agent::Agent;
use pulse::config::AgentConfig;
use pulse::http::RecordingExportClient;
use pulse::identity::UuidIdFactory;
use pulse::resource::{MemoryInspector, MemorySnapshot};
use pulse::scheduler::Scheduler;
use pulse::storage::{SledDatabase, SledPrefs};
use pulse::time::ManualTimeProvider;

pub const T0: i64 = 1_700_000_000_000;
pub const MINUTE: u64 = 60 * 1000;

/// Serializes tests that touch process environment variables.
static ENV_MUTEX: Mutex<()> = Mutex::new(());

pub fn lock_env() -> MutexGuard<'static, ()> {
    ENV_MUTEX.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct FixedInspector;

impl MemoryInspector for FixedInspector {
    fn snapshot(&self) -> MemorySnapshot {
        MemorySnapshot {
            free_memory: 1,
            used_memory: 2,
            total_memory: 3,
            max_memory: 4,
            available_heap_space: 5,
        }
    }
}

/// Storage that outlives individual agents.
pub struct Device {
    pub db: Arc<SledDatabase>,
    pub prefs: Arc<SledPrefs>,
    pub time: Arc<ManualTimeProvider>,
    pub client: Arc<RecordingExportClient>,
}

impl Device {
    pub fn new() -> Self {
        let db = Arc::new(SledDatabase::temporary().unwrap());
        let prefs = Arc::new(db.prefs().unwrap());
        Self {
            db,
            prefs,
            time: Arc::new(ManualTimeProvider::new(T0)),
            client: Arc::new(RecordingExportClient::new()),
        }
    }

    /// A stopped agent with periodic export effectively disabled.
    pub fn agent(&self) -> Agent {
        self.agent_with(AgentConfig {
            auto_start: false,
            time_between_exports_ms: 60 * 60 * 1000,
            resource_sample_interval_ms: 60 * 60 * 1000,
            ..AgentConfig::default()
        })
    }

    pub fn agent_with(&self, config: AgentConfig) -> Agent {
        Agent::builder()
            .config(config)
            .storage(self.db.clone(), self.prefs.clone())
            .client(self.client.clone())
            .memory_inspector(Arc::new(FixedInspector))
            .time_provider(self.time.clone())
            .id_factory(Arc::new(UuidIdFactory))
            .scheduler(Scheduler::with_worker_threads(1).unwrap())
            .build()
            .unwrap()
    }

    pub fn started_agent(&self) -> Agent {
        let agent = self.agent();
        agent.start();
        agent
    }
}

/// Poll `condition` for up to two seconds.
pub fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}
