//! Periodic export driver.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::export::{ExportOutcome, Exporter};
use crate::scheduler::{ScheduledTask, Scheduler};

#[derive(Default)]
struct TickerState {
    registered: bool,
    paused: bool,
    task: Option<ScheduledTask>,
}

/// Runs [`Exporter::export_cycle`] every `period` while registered and not paused.
///
/// Stopping cancels the tick loop only; a cycle already running finishes.
pub struct ExportTicker {
    exporter: Arc<Exporter>,
    scheduler: Scheduler,
    period: Duration,
    state: Mutex<TickerState>,
}

impl ExportTicker {
    pub fn new(exporter: Arc<Exporter>, scheduler: Scheduler, period: Duration) -> Self {
        Self {
            exporter,
            scheduler,
            period,
            state: Mutex::new(TickerState::default()),
        }
    }

    pub fn register(&self) {
        let mut state = self.state.lock();
        state.registered = true;
        self.ensure_running(&mut state);
    }

    pub fn unregister(&self) {
        let mut state = self.state.lock();
        state.registered = false;
        state.paused = false;
        Self::stop_task(&mut state);
    }

    pub fn pause(&self) {
        let mut state = self.state.lock();
        state.paused = true;
        Self::stop_task(&mut state);
    }

    pub fn resume(&self) {
        let mut state = self.state.lock();
        state.paused = false;
        self.ensure_running(&mut state);
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().task.is_some()
    }

    /// Start a cycle now on the scheduler, independent of the tick loop.
    pub fn export_now(&self) -> ScheduledTask {
        let exporter = Arc::clone(&self.exporter);
        self.scheduler.spawn(async move {
            let outcome = exporter.export_cycle().await;
            debug!(outcome = ?outcome, "on-demand export finished");
        })
    }

    /// Run a cycle on the caller's task and return its outcome.
    pub async fn run_once(&self) -> ExportOutcome {
        self.exporter.export_cycle().await
    }

    fn ensure_running(&self, state: &mut TickerState) {
        if !state.registered || state.paused || state.task.is_some() {
            return;
        }
        let exporter = Arc::clone(&self.exporter);
        let scheduler = self.scheduler.clone();
        // Each cycle is its own task: cancelling the loop leaves a running cycle alone.
        state.task = Some(self.scheduler.schedule_at_fixed_rate(
            self.period,
            self.period,
            move || {
                let exporter = Arc::clone(&exporter);
                let cycle = scheduler.spawn(async move {
                    let outcome = exporter.export_cycle().await;
                    debug!(outcome = ?outcome, "scheduled export finished");
                });
                cycle.join()
            },
        ));
        debug!(period_ms = self.period.as_millis() as u64, "export ticker started");
    }

    fn stop_task(state: &mut TickerState) {
        if let Some(task) = state.task.take() {
            task.cancel();
            debug!("export ticker stopped");
        }
    }
}
