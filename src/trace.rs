//! Trace spans.
//!
//! A [`Trace`] moves Created → Started → Ended. Spans that share a `group_id` form
//! one causal tree; `set_parent` copies the parent's group at call time and does not
//! re-propagate to existing children. Ended spans are handed to a [`TraceSink`],
//! normally the buffered [`TraceStore`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::buffer::{BufferedStore, FlushOutcome, Flushable, OfferOutcome};
use crate::identity::IdFactory;
use crate::session::SessionManager;
use crate::storage::{Database, TraceEntity, TraceStatus};
use crate::time::TimeProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceState {
    Created,
    Started,
    Ended,
}

/// Receives spans once they end.
pub trait TraceSink: Send + Sync {
    fn on_trace_ended(&self, trace: &Trace);
}

pub struct Trace {
    trace_id: String,
    group_id: String,
    parent_id: Option<String>,
    name: String,
    status: TraceStatus,
    start_time: i64,
    end_time: i64,
    state: TraceState,
    time: Arc<dyn TimeProvider>,
    sink: Arc<dyn TraceSink>,
}

impl std::fmt::Debug for Trace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trace")
            .field("trace_id", &self.trace_id)
            .field("group_id", &self.group_id)
            .field("parent_id", &self.parent_id)
            .field("name", &self.name)
            .field("status", &self.status)
            .field("state", &self.state)
            .finish()
    }
}

impl Trace {
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> &TraceStatus {
        &self.status
    }

    pub fn state(&self) -> TraceState {
        self.state
    }

    pub fn start_time(&self) -> i64 {
        self.start_time
    }

    pub fn end_time(&self) -> i64 {
        self.end_time
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Join `parent`'s group as its child.
    pub fn set_parent(&mut self, parent: &Trace) -> &mut Self {
        if self.state != TraceState::Created {
            debug!(trace_id = %self.trace_id, "set_parent called after start");
        }
        self.parent_id = Some(parent.trace_id.clone());
        self.group_id = parent.group_id.clone();
        self
    }

    pub fn start(&mut self) -> &mut Self {
        if self.state != TraceState::Created {
            warn!(trace_id = %self.trace_id, name = %self.name, "trace already started");
            return self;
        }
        self.start_time = self.time.now_millis();
        self.state = TraceState::Started;
        self
    }

    pub fn end(&mut self) {
        self.finish(TraceStatus::Ok);
    }

    pub fn end_with_error(&mut self, message: impl Into<String>) {
        self.finish(TraceStatus::Error {
            message: message.into(),
        });
    }

    fn finish(&mut self, status: TraceStatus) {
        match self.state {
            TraceState::Created => {
                warn!(trace_id = %self.trace_id, name = %self.name, "ending a trace that was never started");
            }
            TraceState::Ended => {
                warn!(trace_id = %self.trace_id, name = %self.name, "trace already ended");
            }
            TraceState::Started => {
                self.end_time = self.time.now_millis();
                self.status = status;
                self.state = TraceState::Ended;
                let sink = Arc::clone(&self.sink);
                sink.on_trace_ended(self);
            }
        }
    }

    /// Row form of this span bound to `session_id`.
    pub fn to_entity(&self, session_id: impl Into<String>) -> TraceEntity {
        TraceEntity {
            trace_id: self.trace_id.clone(),
            group_id: self.group_id.clone(),
            parent_id: self.parent_id.clone(),
            name: self.name.clone(),
            status: self.status.clone(),
            start_time: self.start_time,
            end_time: self.end_time,
            has_ended: self.state == TraceState::Ended,
            session_id: session_id.into(),
            exported: false,
        }
    }
}

/// Drops spans while the trace collector is unregistered.
struct GatedSink {
    enabled: Arc<AtomicBool>,
    inner: Arc<dyn TraceSink>,
}

impl TraceSink for GatedSink {
    fn on_trace_ended(&self, trace: &Trace) {
        if self.enabled.load(Ordering::Acquire) {
            self.inner.on_trace_ended(trace);
        } else {
            debug!(trace_id = %trace.trace_id, "trace collector disabled, span discarded");
        }
    }
}

/// Factory for spans; also the on/off switch for trace collection.
pub struct Tracer {
    ids: Arc<dyn IdFactory>,
    time: Arc<dyn TimeProvider>,
    enabled: Arc<AtomicBool>,
    sink: Arc<dyn TraceSink>,
}

impl Tracer {
    pub fn new(
        ids: Arc<dyn IdFactory>,
        time: Arc<dyn TimeProvider>,
        sink: Arc<dyn TraceSink>,
    ) -> Self {
        let enabled = Arc::new(AtomicBool::new(false));
        let sink: Arc<dyn TraceSink> = Arc::new(GatedSink {
            enabled: Arc::clone(&enabled),
            inner: sink,
        });
        Self {
            ids,
            time,
            enabled,
            sink,
        }
    }

    /// New root span in its own group.
    pub fn create(&self, name: impl Into<String>) -> Trace {
        let trace_id = self.ids.create_id();
        Trace {
            group_id: self.ids.create_id(),
            trace_id,
            parent_id: None,
            name: name.into(),
            status: TraceStatus::Ok,
            start_time: 0,
            end_time: 0,
            state: TraceState::Created,
            time: Arc::clone(&self.time),
            sink: Arc::clone(&self.sink),
        }
    }

    /// Create and start a span in one call.
    pub fn start(&self, name: impl Into<String>) -> Trace {
        let mut trace = self.create(name);
        trace.start();
        trace
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }
}

/// Buffered store for ended spans.
pub struct TraceStore {
    buffer: BufferedStore<TraceEntity>,
    session_manager: Arc<SessionManager>,
}

impl TraceStore {
    pub fn new(
        database: Arc<dyn Database>,
        session_manager: Arc<SessionManager>,
        capacity: usize,
    ) -> Self {
        Self {
            buffer: BufferedStore::new(database, capacity),
            session_manager,
        }
    }

    pub fn store(&self, trace: &Trace) -> Option<OfferOutcome> {
        let session_id = match self.session_manager.session_id() {
            Ok(id) => id,
            Err(err) => {
                warn!(trace_id = %trace.trace_id(), error = %err, "dropping trace");
                return None;
            }
        };
        Some(self.buffer.offer(trace.to_entity(session_id)))
    }

    pub fn buffer(&self) -> &BufferedStore<TraceEntity> {
        &self.buffer
    }
}

impl TraceSink for TraceStore {
    fn on_trace_ended(&self, trace: &Trace) {
        self.store(trace);
    }
}

impl Flushable for TraceStore {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::SequentialIdFactory;
    use crate::time::ManualTimeProvider;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct CollectingSink {
        ended: Mutex<Vec<TraceEntity>>,
    }

    impl TraceSink for CollectingSink {
        fn on_trace_ended(&self, trace: &Trace) {
            self.ended.lock().push(trace.to_entity("s1"));
        }
    }

    fn tracer() -> (Tracer, Arc<CollectingSink>, Arc<ManualTimeProvider>) {
        let sink = Arc::new(CollectingSink::default());
        let time = Arc::new(ManualTimeProvider::new(1_000));
        let tracer = Tracer::new(
            Arc::new(SequentialIdFactory::new("t")),
            time.clone(),
            sink.clone(),
        );
        tracer.enable();
        (tracer, sink, time)
    }

    #[test]
    fn child_joins_parent_group() {
        let (tracer, _, _) = tracer();
        let a = tracer.create("a");
        let a_group = a.group_id().to_string();
        let mut b = tracer.create("b");
        assert_ne!(b.group_id(), a.group_id());

        b.set_parent(&a);
        assert_eq!(b.group_id(), a.group_id());
        assert_eq!(b.parent_id(), Some(a.trace_id()));
        assert_eq!(a.group_id(), a_group);
        assert!(a.is_root());
    }

    #[test]
    fn reparenting_does_not_propagate_to_children() {
        let (tracer, _, _) = tracer();
        let root_one = tracer.create("one");
        let root_two = tracer.create("two");
        let mut middle = tracer.create("middle");
        let mut leaf = tracer.create("leaf");

        middle.set_parent(&root_one);
        leaf.set_parent(&middle);
        middle.set_parent(&root_two);

        assert_eq!(middle.group_id(), root_two.group_id());
        assert_eq!(leaf.group_id(), root_one.group_id());
    }

    #[test]
    fn lifecycle_records_times_and_status() {
        let (tracer, sink, time) = tracer();
        let mut trace = tracer.start("load");
        time.advance(250);
        trace.end_with_error("timeout");

        let ended = sink.ended.lock();
        assert_eq!(ended.len(), 1);
        assert_eq!(ended[0].start_time, 1_000);
        assert_eq!(ended[0].end_time, 1_250);
        assert!(ended[0].has_ended);
        assert_eq!(
            ended[0].status,
            TraceStatus::Error {
                message: "timeout".to_string()
            }
        );
    }

    #[test]
    fn misuse_is_ignored_not_fatal() {
        let (tracer, sink, _) = tracer();
        let mut unstarted = tracer.create("never");
        unstarted.end();
        assert_eq!(unstarted.state(), TraceState::Created);

        let mut trace = tracer.start("twice");
        let started_at = trace.start_time();
        trace.start();
        assert_eq!(trace.start_time(), started_at);
        trace.end();
        trace.end();
        assert_eq!(sink.ended.lock().len(), 1);
    }

    #[test]
    fn disabled_tracer_discards_spans() {
        let (tracer, sink, _) = tracer();
        tracer.disable();
        let mut trace = tracer.start("quiet");
        trace.end();
        assert_eq!(trace.state(), TraceState::Ended);
        assert!(sink.ended.lock().is_empty());
    }
}
