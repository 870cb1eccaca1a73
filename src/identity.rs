//! Unique id generation for sessions, rows, traces and installations.

use std::sync::atomic::{AtomicU64, Ordering};

pub trait IdFactory: Send + Sync {
    fn create_id(&self) -> String;
}

/// Random v4 UUIDs.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidIdFactory;

impl IdFactory for UuidIdFactory {
    fn create_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Predictable ids (`{prefix}-1`, `{prefix}-2`, ...) for tests.
#[derive(Debug)]
pub struct SequentialIdFactory {
    prefix: String,
    next: AtomicU64,
}

impl SequentialIdFactory {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(1),
        }
    }
}

impl IdFactory for SequentialIdFactory {
    fn create_id(&self) -> String {
        let seq = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{}-{seq}", self.prefix)
    }
}
