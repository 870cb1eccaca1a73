//! Wall-clock and monotonic time sources.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Source of the two clocks the agent reasons about.
///
/// `now_millis` is persisted and compared across process restarts, so it may
/// jump when the user changes the device clock. `elapsed_realtime_millis` is
/// monotonic within one process and only used to measure background duration.
pub trait TimeProvider: Send + Sync {
    fn now_millis(&self) -> i64;
    fn elapsed_realtime_millis(&self) -> u64;
}

/// Current time as milliseconds since Unix epoch.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Clocks backed by the operating system.
pub struct SystemTimeProvider {
    anchor: Instant,
}

impl SystemTimeProvider {
    pub fn new() -> Self {
        Self {
            anchor: Instant::now(),
        }
    }
}

impl Default for SystemTimeProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeProvider for SystemTimeProvider {
    fn now_millis(&self) -> i64 {
        now_millis()
    }

    fn elapsed_realtime_millis(&self) -> u64 {
        self.anchor.elapsed().as_millis() as u64
    }
}

/// Settable clocks for tests and deterministic replays.
#[derive(Debug, Default)]
pub struct ManualTimeProvider {
    now: AtomicI64,
    elapsed: AtomicU64,
}

impl ManualTimeProvider {
    pub fn new(now_millis: i64) -> Self {
        Self {
            now: AtomicI64::new(now_millis),
            elapsed: AtomicU64::new(0),
        }
    }

    pub fn set_now(&self, millis: i64) {
        self.now.store(millis, Ordering::SeqCst);
    }

    /// Moves both clocks forward by `millis`.
    pub fn advance(&self, millis: u64) {
        self.now.fetch_add(millis as i64, Ordering::SeqCst);
        self.elapsed.fetch_add(millis, Ordering::SeqCst);
    }
}

impl TimeProvider for ManualTimeProvider {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }

    fn elapsed_realtime_millis(&self) -> u64 {
        self.elapsed.load(Ordering::SeqCst)
    }
}
