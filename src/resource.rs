//! Periodic resource-usage sampling.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::buffer::{BufferedStore, FlushOutcome, Flushable, OfferOutcome};
use crate::identity::IdFactory;
use crate::scheduler::{ScheduledTask, Scheduler};
use crate::session::SessionManager;
use crate::storage::{Database, ResourceUsageEntity};
use crate::time::TimeProvider;

/// Memory counters in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemorySnapshot {
    pub free_memory: u64,
    pub used_memory: u64,
    pub total_memory: u64,
    pub max_memory: u64,
    pub available_heap_space: u64,
}

/// Source of memory counters. Implementations must be cheap and non-blocking.
pub trait MemoryInspector: Send + Sync {
    fn snapshot(&self) -> MemorySnapshot;
}

/// Reads `/proc/self/statm` and `/proc/meminfo`; reports zeros where they are missing.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessMemoryInspector;

const PAGE_SIZE: u64 = 4096;

impl ProcessMemoryInspector {
    fn resident_bytes() -> Option<u64> {
        let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
        let resident_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
        Some(resident_pages * PAGE_SIZE)
    }

    fn meminfo_bytes(meminfo: &str, key: &str) -> Option<u64> {
        meminfo.lines().find_map(|line| {
            let rest = line.strip_prefix(key)?.strip_prefix(':')?;
            let kib: u64 = rest.split_whitespace().next()?.parse().ok()?;
            Some(kib * 1024)
        })
    }
}

impl MemoryInspector for ProcessMemoryInspector {
    fn snapshot(&self) -> MemorySnapshot {
        let meminfo = std::fs::read_to_string("/proc/meminfo").unwrap_or_default();
        let total = Self::meminfo_bytes(&meminfo, "MemTotal").unwrap_or(0);
        MemorySnapshot {
            free_memory: Self::meminfo_bytes(&meminfo, "MemFree").unwrap_or(0),
            used_memory: Self::resident_bytes().unwrap_or(0),
            total_memory: total,
            max_memory: total,
            available_heap_space: Self::meminfo_bytes(&meminfo, "MemAvailable").unwrap_or(0),
        }
    }
}

/// Buffered store for memory samples.
pub struct ResourceUsageStore {
    buffer: BufferedStore<ResourceUsageEntity>,
    session_manager: Arc<SessionManager>,
    ids: Arc<dyn IdFactory>,
    time: Arc<dyn TimeProvider>,
}

impl ResourceUsageStore {
    pub fn new(
        database: Arc<dyn Database>,
        session_manager: Arc<SessionManager>,
        ids: Arc<dyn IdFactory>,
        time: Arc<dyn TimeProvider>,
        capacity: usize,
    ) -> Self {
        Self {
            buffer: BufferedStore::new(database, capacity),
            session_manager,
            ids,
            time,
        }
    }

    pub fn store(&self, snapshot: MemorySnapshot) -> Option<OfferOutcome> {
        let session_id = match self.session_manager.session_id() {
            Ok(id) => id,
            Err(err) => {
                warn!(error = %err, "dropping resource sample");
                return None;
            }
        };
        let row = ResourceUsageEntity {
            id: self.ids.create_id(),
            session_id,
            free_memory: snapshot.free_memory,
            used_memory: snapshot.used_memory,
            total_memory: snapshot.total_memory,
            max_memory: snapshot.max_memory,
            available_heap_space: snapshot.available_heap_space,
            created_at: self.time.now_millis(),
            exported: false,
        };
        Some(self.buffer.offer(row))
    }

    pub fn buffer(&self) -> &BufferedStore<ResourceUsageEntity> {
        &self.buffer
    }
}

impl Flushable for ResourceUsageStore {
    fn kind(&self) -> &'static str {
        self.buffer.kind()
    }

    fn flush(&self) -> FlushOutcome {
        self.buffer.flush()
    }

    fn len(&self) -> usize {
        self.buffer.len()
    }
}

/// Samples memory at a fixed rate while registered.
pub struct ResourceUsageCollector {
    inspector: Arc<dyn MemoryInspector>,
    store: Arc<ResourceUsageStore>,
    scheduler: Scheduler,
    interval: Duration,
    task: Mutex<Option<ScheduledTask>>,
}

impl ResourceUsageCollector {
    pub fn new(
        inspector: Arc<dyn MemoryInspector>,
        store: Arc<ResourceUsageStore>,
        scheduler: Scheduler,
        interval: Duration,
    ) -> Self {
        Self {
            inspector,
            store,
            scheduler,
            interval,
            task: Mutex::new(None),
        }
    }

    pub fn sample_once(&self) -> Option<OfferOutcome> {
        self.store.store(self.inspector.snapshot())
    }

    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }
        let inspector = Arc::clone(&self.inspector);
        let store = Arc::clone(&self.store);
        *task = Some(self.scheduler.schedule_at_fixed_rate(
            Duration::ZERO,
            self.interval,
            move || {
                let inspector = Arc::clone(&inspector);
                let store = Arc::clone(&store);
                async move {
                    let sampled =
                        tokio::task::spawn_blocking(move || store.store(inspector.snapshot()))
                            .await;
                    if let Err(err) = sampled {
                        warn!(error = %err, "resource sample task failed");
                    }
                }
            },
        ));
        debug!(interval_ms = self.interval.as_millis() as u64, "resource sampling started");
    }

    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.cancel();
            debug!("resource sampling stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::SequentialIdFactory;
    use crate::session::SessionPolicy;
    use crate::storage::SledDatabase;
    use crate::time::ManualTimeProvider;

    struct FixedInspector;

    impl MemoryInspector for FixedInspector {
        fn snapshot(&self) -> MemorySnapshot {
            MemorySnapshot {
                free_memory: 10,
                used_memory: 20,
                total_memory: 30,
                max_memory: 40,
                available_heap_space: 50,
            }
        }
    }

    #[test]
    fn meminfo_parsing_converts_kib() {
        let meminfo = "MemTotal:       16384 kB\nMemFree:         2048 kB\nMemAvailable:    4096 kB\n";
        assert_eq!(
            ProcessMemoryInspector::meminfo_bytes(meminfo, "MemTotal"),
            Some(16384 * 1024)
        );
        assert_eq!(
            ProcessMemoryInspector::meminfo_bytes(meminfo, "MemAvailable"),
            Some(4096 * 1024)
        );
        assert_eq!(ProcessMemoryInspector::meminfo_bytes(meminfo, "Swap"), None);
    }

    #[test]
    fn samples_are_stamped_with_current_session() {
        let db = Arc::new(SledDatabase::temporary().unwrap());
        let time = Arc::new(ManualTimeProvider::new(5_000));
        let ids = Arc::new(SequentialIdFactory::new("r"));
        let scheduler = Scheduler::with_worker_threads(1).unwrap();
        let manager = Arc::new(SessionManager::new(
            db.clone(),
            Arc::new(db.prefs().unwrap()),
            time.clone(),
            ids.clone(),
            scheduler.clone(),
            SessionPolicy::default(),
        ));
        manager.init();
        let store = Arc::new(ResourceUsageStore::new(
            db.clone(),
            manager.clone(),
            ids,
            time,
            4,
        ));
        let collector = ResourceUsageCollector::new(
            Arc::new(FixedInspector),
            store.clone(),
            scheduler,
            Duration::from_secs(2),
        );

        assert_eq!(collector.sample_once(), Some(OfferOutcome::Queued));
        store.flush();

        let data = db
            .get_data_for_export(&manager.session_id().unwrap())
            .unwrap();
        assert_eq!(data.resource_samples.len(), 1);
        assert_eq!(data.resource_samples[0].used_memory, 20);
        assert_eq!(data.resource_samples[0].created_at, 5_000);
    }
}
