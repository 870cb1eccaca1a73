//! Collectors
//!
//! Every telemetry source is a [`Collector`] that can be switched on and off. While
//! unregistered a collector drops its input silently. [`CollectorRegistry`] owns the
//! set and toggles it in order.

use std::fmt;
#[allow(deprecated)]
use std::panic::{self, PanicInfo};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tracing::{debug, info};

use crate::buffer::Flushable;
use crate::events::{
    ActivityLifecycleKind, AppLifecycleKind, EventData, EventTracker, ExceptionData,
    ExceptionUnit,
};
use crate::export::{CleanupService, ExportTicker};
use crate::resource::ResourceUsageCollector;
use crate::session::{SessionManager, SessionStart};
use crate::trace::Tracer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectorKind {
    ActivityLifecycle,
    AppLifecycle,
    UncaughtException,
    Navigation,
    Trace,
    ResourceUsage,
    Exporter,
}

impl fmt::Display for CollectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CollectorKind::ActivityLifecycle => "activity_lifecycle",
            CollectorKind::AppLifecycle => "app_lifecycle",
            CollectorKind::UncaughtException => "uncaught_exception",
            CollectorKind::Navigation => "navigation",
            CollectorKind::Trace => "trace",
            CollectorKind::ResourceUsage => "resource_usage",
            CollectorKind::Exporter => "exporter",
        };
        f.write_str(name)
    }
}

pub trait Collector: Send + Sync {
    fn kind(&self) -> CollectorKind;

    /// Start collecting. Calling twice is a no-op.
    fn register(&self);

    /// Stop collecting. Calling twice is a no-op.
    fn unregister(&self);

    fn is_registered(&self) -> bool;
}

/// On/off flag shared by the event-driven collectors.
#[derive(Debug, Default)]
struct Switch(AtomicBool);

impl Switch {
    fn on(&self) {
        self.0.store(true, Ordering::Release);
    }

    fn off(&self) {
        self.0.store(false, Ordering::Release);
    }

    fn is_on(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Foreground/background transitions.
pub struct AppLifecycleCollector {
    enabled: Switch,
    session_manager: Arc<SessionManager>,
    tracker: Arc<EventTracker>,
    stores: Vec<Arc<dyn Flushable>>,
    cleanup: Arc<CleanupService>,
}

impl AppLifecycleCollector {
    pub fn new(
        session_manager: Arc<SessionManager>,
        tracker: Arc<EventTracker>,
        stores: Vec<Arc<dyn Flushable>>,
        cleanup: Arc<CleanupService>,
    ) -> Self {
        Self {
            enabled: Switch::default(),
            session_manager,
            tracker,
            stores,
            cleanup,
        }
    }

    /// Re-evaluate the session, then record the transition in it.
    pub fn on_app_foreground(&self) -> Option<SessionStart> {
        if !self.enabled.is_on() {
            return None;
        }
        let start = self.session_manager.on_app_foreground();
        self.tracker.track_app_lifecycle(AppLifecycleKind::Foreground);
        start
    }

    /// Record the transition, then persist everything buffered and drop exported sessions.
    pub fn on_app_background(&self) {
        if !self.enabled.is_on() {
            return;
        }
        self.tracker.track_app_lifecycle(AppLifecycleKind::Background);
        self.session_manager.on_app_background();
        for store in &self.stores {
            store.flush();
        }
        self.cleanup.cleanup();
    }
}

impl Collector for AppLifecycleCollector {
    fn kind(&self) -> CollectorKind {
        CollectorKind::AppLifecycle
    }

    fn register(&self) {
        self.enabled.on();
    }

    fn unregister(&self) {
        self.enabled.off();
    }

    fn is_registered(&self) -> bool {
        self.enabled.is_on()
    }
}

/// Screen-level lifecycle callbacks.
pub struct ActivityLifecycleCollector {
    enabled: Switch,
    tracker: Arc<EventTracker>,
}

impl ActivityLifecycleCollector {
    pub fn new(tracker: Arc<EventTracker>) -> Self {
        Self {
            enabled: Switch::default(),
            tracker,
        }
    }

    pub fn on_activity(&self, kind: ActivityLifecycleKind, class_name: impl Into<String>) {
        if self.enabled.is_on() {
            self.tracker.track_now(EventData::ActivityLifecycle {
                kind,
                class_name: class_name.into(),
            });
        }
    }
}

impl Collector for ActivityLifecycleCollector {
    fn kind(&self) -> CollectorKind {
        CollectorKind::ActivityLifecycle
    }

    fn register(&self) {
        self.enabled.on();
    }

    fn unregister(&self) {
        self.enabled.off();
    }

    fn is_registered(&self) -> bool {
        self.enabled.is_on()
    }
}

pub struct NavigationCollector {
    enabled: Switch,
    tracker: Arc<EventTracker>,
}

impl NavigationCollector {
    pub fn new(tracker: Arc<EventTracker>) -> Self {
        Self {
            enabled: Switch::default(),
            tracker,
        }
    }

    pub fn on_navigation(&self, route: impl Into<String>) {
        if self.enabled.is_on() {
            self.tracker.track_navigation(route);
        }
    }
}

impl Collector for NavigationCollector {
    fn kind(&self) -> CollectorKind {
        CollectorKind::Navigation
    }

    fn register(&self) {
        self.enabled.on();
    }

    fn unregister(&self) {
        self.enabled.off();
    }

    fn is_registered(&self) -> bool {
        self.enabled.is_on()
    }
}

/// Exceptions, handled or not. The event store is flushed inline because the
/// process may be about to exit.
pub struct UncaughtExceptionCollector {
    enabled: Switch,
    tracker: Arc<EventTracker>,
}

impl UncaughtExceptionCollector {
    pub fn new(tracker: Arc<EventTracker>) -> Self {
        Self {
            enabled: Switch::default(),
            tracker,
        }
    }

    pub fn on_exception(&self, exception: ExceptionData) {
        if !self.enabled.is_on() {
            return;
        }
        let handled = exception.handled;
        self.tracker.track_exception(exception);
        let outcome = self.tracker.flush();
        debug!(handled, outcome = ?outcome, "exception recorded");
    }

    /// Route panics into this collector as unhandled exceptions. The previous hook
    /// still runs afterwards.
    pub fn install_panic_hook(self: &Arc<Self>) {
        let collector: Weak<Self> = Arc::downgrade(self);
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if let Some(collector) = collector.upgrade() {
                collector.on_exception(exception_from_panic(info));
            }
            previous(info);
        }));
        info!("panic hook installed");
    }
}

#[allow(deprecated)]
fn exception_from_panic(info: &PanicInfo<'_>) -> ExceptionData {
    let payload = info.payload();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned());
    let frames = info
        .location()
        .map(|location| vec![format!("{}:{}:{}", location.file(), location.line(), location.column())])
        .unwrap_or_default();
    ExceptionData {
        handled: false,
        exceptions: vec![ExceptionUnit {
            exception_type: "panic".to_string(),
            message,
            frames,
        }],
        thread_name: std::thread::current()
            .name()
            .unwrap_or("unnamed")
            .to_string(),
    }
}

impl Collector for UncaughtExceptionCollector {
    fn kind(&self) -> CollectorKind {
        CollectorKind::UncaughtException
    }

    fn register(&self) {
        self.enabled.on();
    }

    fn unregister(&self) {
        self.enabled.off();
    }

    fn is_registered(&self) -> bool {
        self.enabled.is_on()
    }
}

/// Turns span recording on and off.
pub struct TraceCollector {
    tracer: Arc<Tracer>,
}

impl TraceCollector {
    pub fn new(tracer: Arc<Tracer>) -> Self {
        Self { tracer }
    }
}

impl Collector for TraceCollector {
    fn kind(&self) -> CollectorKind {
        CollectorKind::Trace
    }

    fn register(&self) {
        self.tracer.enable();
    }

    fn unregister(&self) {
        self.tracer.disable();
    }

    fn is_registered(&self) -> bool {
        self.tracer.is_enabled()
    }
}

impl Collector for ResourceUsageCollector {
    fn kind(&self) -> CollectorKind {
        CollectorKind::ResourceUsage
    }

    fn register(&self) {
        self.start();
    }

    fn unregister(&self) {
        self.stop();
    }

    fn is_registered(&self) -> bool {
        self.is_running()
    }
}

impl Collector for ExportTicker {
    fn kind(&self) -> CollectorKind {
        CollectorKind::Exporter
    }

    fn register(&self) {
        ExportTicker::register(self);
    }

    fn unregister(&self) {
        ExportTicker::unregister(self);
    }

    fn is_registered(&self) -> bool {
        self.is_running()
    }
}

/// Ordered set of collectors. Registration runs front to back, unregistration back
/// to front.
#[derive(Default)]
pub struct CollectorRegistry {
    collectors: Vec<Arc<dyn Collector>>,
}

impl CollectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, collector: Arc<dyn Collector>) {
        self.collectors.push(collector);
    }

    pub fn register_all(&self) {
        for collector in &self.collectors {
            collector.register();
            debug!(kind = %collector.kind(), "collector registered");
        }
    }

    pub fn unregister_all(&self) {
        for collector in self.collectors.iter().rev() {
            collector.unregister();
            debug!(kind = %collector.kind(), "collector unregistered");
        }
    }

    pub fn get(&self, kind: CollectorKind) -> Option<&Arc<dyn Collector>> {
        self.collectors.iter().find(|c| c.kind() == kind)
    }

    pub fn kinds(&self) -> Vec<CollectorKind> {
        self.collectors.iter().map(|c| c.kind()).collect()
    }

    pub fn len(&self) -> usize {
        self.collectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collectors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventStore;
    use crate::identity::SequentialIdFactory;
    use crate::scheduler::Scheduler;
    use crate::session::SessionPolicy;
    use crate::storage::{Database, SledDatabase};
    use crate::time::ManualTimeProvider;
    use parking_lot::Mutex;

    struct Fixture {
        db: Arc<SledDatabase>,
        sessions: Arc<SessionManager>,
        tracker: Arc<EventTracker>,
        time: Arc<ManualTimeProvider>,
    }

    fn fixture() -> Fixture {
        let db = Arc::new(SledDatabase::temporary().unwrap());
        let time = Arc::new(ManualTimeProvider::new(1_000));
        let ids = Arc::new(SequentialIdFactory::new("c"));
        let sessions = Arc::new(SessionManager::new(
            db.clone(),
            Arc::new(db.prefs().unwrap()),
            time.clone(),
            ids.clone(),
            Scheduler::with_worker_threads(1).unwrap(),
            SessionPolicy::default(),
        ));
        sessions.init();
        let store = Arc::new(EventStore::new(db.clone(), ids, time.clone(), 30));
        let tracker = Arc::new(EventTracker::new(sessions.clone(), store, time.clone()));
        Fixture {
            db,
            sessions,
            tracker,
            time,
        }
    }

    struct Probe {
        kind: CollectorKind,
        log: Arc<Mutex<Vec<String>>>,
        on: Switch,
    }

    impl Collector for Probe {
        fn kind(&self) -> CollectorKind {
            self.kind
        }

        fn register(&self) {
            self.on.on();
            self.log.lock().push(format!("+{}", self.kind));
        }

        fn unregister(&self) {
            self.on.off();
            self.log.lock().push(format!("-{}", self.kind));
        }

        fn is_registered(&self) -> bool {
            self.on.is_on()
        }
    }

    #[test]
    fn registry_toggles_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = CollectorRegistry::new();
        for kind in [CollectorKind::AppLifecycle, CollectorKind::Exporter] {
            registry.add(Arc::new(Probe {
                kind,
                log: log.clone(),
                on: Switch::default(),
            }));
        }

        registry.register_all();
        registry.unregister_all();
        assert_eq!(
            *log.lock(),
            vec!["+app_lifecycle", "+exporter", "-exporter", "-app_lifecycle"]
        );
        assert!(!registry.get(CollectorKind::Exporter).unwrap().is_registered());
    }

    #[test]
    fn unregistered_navigation_is_dropped() {
        let f = fixture();
        let collector = NavigationCollector::new(f.tracker.clone());
        collector.on_navigation("ignored");
        assert_eq!(f.tracker.store().len(), 0);

        collector.register();
        collector.on_navigation("home");
        assert_eq!(f.tracker.store().len(), 1);
    }

    #[test]
    fn exception_is_flushed_immediately() {
        let f = fixture();
        let collector = UncaughtExceptionCollector::new(f.tracker.clone());
        collector.register();
        collector.on_exception(ExceptionData {
            handled: false,
            exceptions: Vec::new(),
            thread_name: "main".to_string(),
        });

        assert_eq!(f.tracker.store().len(), 0);
        let data = f
            .db
            .get_data_for_export(&f.sessions.session_id().unwrap())
            .unwrap();
        assert_eq!(data.events.len(), 1);
        assert_eq!(data.events[0].event_type, "exception");
        assert!(f.sessions.current_session().unwrap().crashed);
    }

    #[test]
    fn background_flushes_and_foreground_reevaluates() {
        let f = fixture();
        let first = f.sessions.session_id().unwrap();
        let stores: Vec<Arc<dyn Flushable>> = vec![f.tracker.store().clone()];
        let cleanup = Arc::new(CleanupService::new(f.db.clone(), f.sessions.clone()));
        let collector =
            AppLifecycleCollector::new(f.sessions.clone(), f.tracker.clone(), stores, cleanup);
        collector.register();

        collector.on_app_background();
        assert_eq!(f.tracker.store().len(), 0);
        let data = f.db.get_data_for_export(&first).unwrap();
        assert_eq!(data.events[0].event_type, "lifecycle_app");

        f.time.advance(25 * 60 * 1000);
        assert_eq!(collector.on_app_foreground(), Some(SessionStart::Created));
        assert_ne!(f.sessions.session_id().unwrap(), first);
    }
}
