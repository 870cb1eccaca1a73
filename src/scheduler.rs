//! Background task scheduling on tokio.
//!
//! One-shot, delayed and fixed-rate tasks. The scheduler either borrows the host's
//! runtime (when built inside one) or owns a small multi-threaded runtime of its own.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::{Handle, Runtime};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

use crate::error::AgentError;

const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Handle to a spawned task. Dropping it does not cancel the task.
#[derive(Debug)]
pub struct ScheduledTask {
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// Abort the task at its next await point. Blocking sections run to completion.
    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the task to end; a cancelled task resolves without error.
    pub async fn join(self) {
        if let Err(err) = self.handle.await {
            if !err.is_cancelled() {
                debug!(error = %err, "scheduled task panicked");
            }
        }
    }
}

struct OwnedRuntime(Option<Runtime>);

impl Drop for OwnedRuntime {
    fn drop(&mut self) {
        // Dropping a runtime from async context panics; shutting down in the background does not.
        if let Some(runtime) = self.0.take() {
            runtime.shutdown_background();
        }
    }
}

#[derive(Clone)]
pub struct Scheduler {
    handle: Handle,
    _owned: Option<Arc<OwnedRuntime>>,
}

impl Scheduler {
    /// Use the runtime the caller is running in.
    pub fn from_handle(handle: Handle) -> Self {
        Self {
            handle,
            _owned: None,
        }
    }

    /// Build a dedicated worker pool.
    pub fn with_worker_threads(worker_threads: usize) -> Result<Self, AgentError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(worker_threads.max(1))
            .thread_name("pulse-worker")
            .enable_time()
            .build()
            .map_err(|e| AgentError::SchedulerError(format!("Failed to build runtime: {}", e)))?;
        Ok(Self {
            handle: runtime.handle().clone(),
            _owned: Some(Arc::new(OwnedRuntime(Some(runtime)))),
        })
    }

    /// Reuse the ambient runtime if there is one, otherwise start a two-thread pool.
    pub fn current_or_owned() -> Result<Self, AgentError> {
        match Handle::try_current() {
            Ok(handle) => Ok(Self::from_handle(handle)),
            Err(_) => Self::with_worker_threads(2),
        }
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn spawn<F>(&self, future: F) -> ScheduledTask
    where
        F: Future<Output = ()> + Send + 'static,
    {
        ScheduledTask {
            handle: self.handle.spawn(future),
        }
    }

    /// Run blocking work (storage I/O) off the async workers.
    pub fn spawn_blocking<F>(&self, work: F) -> ScheduledTask
    where
        F: FnOnce() + Send + 'static,
    {
        ScheduledTask {
            handle: self.handle.spawn_blocking(work),
        }
    }

    pub fn schedule_after<F>(&self, delay: Duration, future: F) -> ScheduledTask
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.spawn(async move {
            tokio::time::sleep(delay).await;
            future.await;
        })
    }

    /// Run `task` every `period`, first after `initial_delay`. Runs never overlap;
    /// ticks missed while a run is in progress are skipped.
    pub fn schedule_at_fixed_rate<F, Fut>(
        &self,
        initial_delay: Duration,
        period: Duration,
        mut task: F,
    ) -> ScheduledTask
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let period = period.max(MIN_PERIOD);
        self.spawn(async move {
            let mut ticker = interval_at(Instant::now() + initial_delay, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                task().await;
            }
        })
    }

    /// Drive a future to completion from synchronous code outside the runtime.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.handle.block_on(future)
    }
}
