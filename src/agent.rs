//! Agent
//!
//! The embedding application's handle. [`Agent::builder`] wires storage, the
//! collector client, clocks and id generation into the session and installation
//! managers, the buffered stores, the collectors and the export ticker.
//!
//! Producer calls never block on the network and never fail; before `start` (or
//! after `stop`) they are dropped by the unregistered collectors.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::buffer::Flushable;
use crate::collector::{
    ActivityLifecycleCollector, AppLifecycleCollector, CollectorKind, CollectorRegistry,
    NavigationCollector, TraceCollector, UncaughtExceptionCollector,
};
use crate::config::{AgentConfig, CollectorCredentials, API_KEY_ENV, COLLECTOR_URL_ENV};
use crate::error::AgentError;
use crate::events::{ActivityLifecycleKind, EventData, EventStore, EventTracker, ExceptionData};
use crate::export::{CleanupService, ExportOutcome, ExportTicker, Exporter};
use crate::http::{ExportClient, HttpExportClient};
use crate::identity::{IdFactory, UuidIdFactory};
use crate::installation::InstallationManager;
use crate::resource::{
    MemoryInspector, ProcessMemoryInspector, ResourceUsageCollector, ResourceUsageStore,
};
use crate::scheduler::{ScheduledTask, Scheduler};
use crate::session::{SessionManager, SessionPolicy, SessionStart};
use crate::storage::{Database, KeyValueStore, SledDatabase};
use crate::time::{SystemTimeProvider, TimeProvider};
use crate::trace::{Trace, TraceStore, Tracer};

#[derive(Default)]
pub struct AgentBuilder {
    config: Option<AgentConfig>,
    database: Option<Arc<dyn Database>>,
    prefs: Option<Arc<dyn KeyValueStore>>,
    client: Option<Arc<dyn ExportClient>>,
    inspector: Option<Arc<dyn MemoryInspector>>,
    time: Option<Arc<dyn TimeProvider>>,
    ids: Option<Arc<dyn IdFactory>>,
    scheduler: Option<Scheduler>,
}

impl AgentBuilder {
    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Durable and key-value storage. Without this the agent opens a sled database
    /// at `config.storage.path`.
    pub fn storage(mut self, database: Arc<dyn Database>, prefs: Arc<dyn KeyValueStore>) -> Self {
        self.database = Some(database);
        self.prefs = Some(prefs);
        self
    }

    /// Collector transport. Without this the agent builds an HTTP client from the
    /// `PULSE_COLLECTOR_URL` and `PULSE_API_KEY` environment variables.
    pub fn client(mut self, client: Arc<dyn ExportClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn memory_inspector(mut self, inspector: Arc<dyn MemoryInspector>) -> Self {
        self.inspector = Some(inspector);
        self
    }

    pub fn time_provider(mut self, time: Arc<dyn TimeProvider>) -> Self {
        self.time = Some(time);
        self
    }

    pub fn id_factory(mut self, ids: Arc<dyn IdFactory>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn scheduler(mut self, scheduler: Scheduler) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn build(self) -> Result<Agent, AgentError> {
        let config = self.config.unwrap_or_default();
        if let Err(errors) = config.validate() {
            return Err(AgentError::ConfigError(errors.join("; ")));
        }

        let (database, prefs) = match (self.database, self.prefs) {
            (Some(database), Some(prefs)) => (database, prefs),
            _ => {
                let sled = SledDatabase::open(&config.storage.path)?;
                let prefs: Arc<dyn KeyValueStore> = Arc::new(sled.prefs()?);
                let database: Arc<dyn Database> = Arc::new(sled);
                (database, prefs)
            }
        };
        let client = match self.client {
            Some(client) => client,
            None => {
                let credentials = CollectorCredentials::from_env().ok_or_else(|| {
                    AgentError::ConfigError(format!(
                        "Collector credentials missing: set {} and {}",
                        COLLECTOR_URL_ENV, API_KEY_ENV
                    ))
                })?;
                Arc::new(HttpExportClient::new(credentials)?) as Arc<dyn ExportClient>
            }
        };
        let time: Arc<dyn TimeProvider> = self
            .time
            .unwrap_or_else(|| Arc::new(SystemTimeProvider::new()));
        let ids: Arc<dyn IdFactory> = self.ids.unwrap_or_else(|| Arc::new(UuidIdFactory));
        let inspector: Arc<dyn MemoryInspector> = self
            .inspector
            .unwrap_or_else(|| Arc::new(ProcessMemoryInspector));
        let scheduler = match self.scheduler {
            Some(scheduler) => scheduler,
            None => Scheduler::current_or_owned()?,
        };

        let session_manager = Arc::new(SessionManager::new(
            Arc::clone(&database),
            Arc::clone(&prefs),
            Arc::clone(&time),
            Arc::clone(&ids),
            scheduler.clone(),
            SessionPolicy::from_config(&config),
        ));
        let installation_manager = Arc::new(InstallationManager::new(
            prefs,
            Arc::clone(&ids),
            Arc::clone(&time),
            Arc::clone(&client),
            scheduler.clone(),
        ));

        let event_store = Arc::new(EventStore::new(
            Arc::clone(&database),
            Arc::clone(&ids),
            Arc::clone(&time),
            config.event_buffer_capacity,
        ));
        let trace_store = Arc::new(TraceStore::new(
            Arc::clone(&database),
            Arc::clone(&session_manager),
            config.trace_buffer_capacity,
        ));
        let resource_store = Arc::new(ResourceUsageStore::new(
            Arc::clone(&database),
            Arc::clone(&session_manager),
            Arc::clone(&ids),
            Arc::clone(&time),
            config.resource_buffer_capacity,
        ));
        let stores: Vec<Arc<dyn Flushable>> = vec![
            event_store.clone(),
            trace_store.clone(),
            resource_store.clone(),
        ];

        let tracker = Arc::new(EventTracker::new(
            Arc::clone(&session_manager),
            event_store,
            Arc::clone(&time),
        ));
        let tracer = Arc::new(Tracer::new(Arc::clone(&ids), Arc::clone(&time), trace_store));
        let cleanup = Arc::new(CleanupService::new(
            Arc::clone(&database),
            Arc::clone(&session_manager),
        ));
        let exporter = Arc::new(Exporter::new(
            Arc::clone(&database),
            Arc::clone(&session_manager),
            Arc::clone(&installation_manager),
            client,
            stores.clone(),
            Arc::clone(&cleanup),
        ));
        let ticker = Arc::new(ExportTicker::new(
            Arc::clone(&exporter),
            scheduler.clone(),
            config.time_between_exports(),
        ));

        let app_lifecycle = Arc::new(AppLifecycleCollector::new(
            Arc::clone(&session_manager),
            Arc::clone(&tracker),
            stores.clone(),
            cleanup,
        ));
        let activity_lifecycle = Arc::new(ActivityLifecycleCollector::new(Arc::clone(&tracker)));
        let exceptions = Arc::new(UncaughtExceptionCollector::new(Arc::clone(&tracker)));
        let navigation = Arc::new(NavigationCollector::new(Arc::clone(&tracker)));
        let resources = Arc::new(ResourceUsageCollector::new(
            inspector,
            resource_store,
            scheduler.clone(),
            config.resource_sample_interval(),
        ));

        let mut registry = CollectorRegistry::new();
        registry.add(activity_lifecycle.clone());
        registry.add(app_lifecycle.clone());
        registry.add(exceptions.clone());
        registry.add(navigation.clone());
        registry.add(Arc::new(TraceCollector::new(Arc::clone(&tracer))));
        registry.add(resources);
        registry.add(ticker.clone());

        Ok(Agent {
            config,
            scheduler,
            session_manager,
            installation_manager,
            tracker,
            tracer,
            stores,
            ticker,
            app_lifecycle,
            activity_lifecycle,
            exceptions,
            navigation,
            registry,
            started: AtomicBool::new(false),
        })
    }
}

pub struct Agent {
    config: AgentConfig,
    scheduler: Scheduler,
    session_manager: Arc<SessionManager>,
    installation_manager: Arc<InstallationManager>,
    tracker: Arc<EventTracker>,
    tracer: Arc<Tracer>,
    stores: Vec<Arc<dyn Flushable>>,
    ticker: Arc<ExportTicker>,
    app_lifecycle: Arc<AppLifecycleCollector>,
    activity_lifecycle: Arc<ActivityLifecycleCollector>,
    exceptions: Arc<UncaughtExceptionCollector>,
    navigation: Arc<NavigationCollector>,
    registry: CollectorRegistry,
    started: AtomicBool,
}

impl Agent {
    pub fn builder() -> AgentBuilder {
        AgentBuilder::default()
    }

    /// Build with default collaborators and start right away when `auto_start` is set.
    pub fn init(config: AgentConfig) -> Result<Self, AgentError> {
        let agent = Self::builder().config(config).build()?;
        if agent.config.auto_start {
            agent.start();
        }
        Ok(agent)
    }

    /// Initialize identity and session, then register every collector. Idempotent.
    pub fn start(&self) {
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("agent already started");
            return;
        }
        self.installation_manager.init();
        let start = self.session_manager.init();
        self.registry.register_all();
        info!(
            session = ?start,
            collectors = self.registry.len(),
            "agent started"
        );
    }

    /// Unregister collectors, cancel tickers and persist everything buffered. Idempotent.
    pub fn stop(&self) {
        if !self.started.swap(false, Ordering::AcqRel) {
            return;
        }
        self.registry.unregister_all();
        self.flush();
        info!("agent stopped");
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Record an event against the current session.
    pub fn track(&self, data: EventData, timestamp: i64) {
        if self.is_started() {
            self.tracker.track(data, timestamp);
        }
    }

    pub fn track_custom(&self, name: impl Into<String>, attributes: Map<String, Value>) {
        if self.is_started() {
            self.tracker.track_custom(name, attributes);
        }
    }

    pub fn on_app_foreground(&self) -> Option<SessionStart> {
        self.app_lifecycle.on_app_foreground()
    }

    pub fn on_app_background(&self) {
        self.app_lifecycle.on_app_background();
    }

    pub fn on_navigation(&self, route: impl Into<String>) {
        self.navigation.on_navigation(route);
    }

    pub fn on_activity(&self, kind: ActivityLifecycleKind, class_name: impl Into<String>) {
        self.activity_lifecycle.on_activity(kind, class_name);
    }

    pub fn on_exception(&self, exception: ExceptionData) {
        self.exceptions.on_exception(exception);
    }

    /// Report panics as unhandled exceptions.
    pub fn install_panic_hook(&self) {
        self.exceptions.install_panic_hook();
    }

    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    /// Shorthand for `tracer().start(name)`.
    pub fn start_trace(&self, name: impl Into<String>) -> Trace {
        self.tracer.start(name)
    }

    /// Kick off an export cycle in the background.
    pub fn export_now(&self) -> ScheduledTask {
        self.ticker.export_now()
    }

    /// Run an export cycle on the caller's task.
    pub async fn export(&self) -> ExportOutcome {
        self.ticker.run_once().await
    }

    /// Export what is already stored without starting collectors or re-evaluating
    /// the session: the recent session is adopted as is, expired or not.
    pub async fn export_stored(&self) -> ExportOutcome {
        if !self.installation_manager.is_initialized() {
            self.installation_manager.init();
        }
        if !self.session_manager.is_initialized() && !self.session_manager.load_recent() {
            debug!("no recorded session to export");
            return ExportOutcome::NothingToExport;
        }
        let outcome = self.ticker.run_once().await;
        self.session_manager.flush();
        outcome
    }

    /// Drain every buffered store into durable storage.
    pub fn flush(&self) {
        for store in &self.stores {
            store.flush();
        }
        self.session_manager.flush();
    }

    pub fn session_id(&self) -> Result<String, AgentError> {
        self.session_manager.session_id()
    }

    pub fn installation_id(&self) -> Result<String, AgentError> {
        self.installation_manager.installation_id()
    }

    pub fn collectors(&self) -> Vec<CollectorKind> {
        self.registry.kinds()
    }

    pub fn is_collector_registered(&self, kind: CollectorKind) -> bool {
        self.registry
            .get(kind)
            .map(|collector| collector.is_registered())
            .unwrap_or(false)
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        self.stop();
    }
}
