//! Buffered Store
//!
//! Bounded in-memory queue in front of the durable store, shared by every telemetry
//! kind. Producers never wait on storage unless the queue is full, in which case the
//! row is written inline and a flush is kicked off. Flushes are serialized by a
//! single compare-and-set flag; a caller that loses the race returns immediately.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::StorageError;
use crate::storage::Database;

mod rows;

/// A row type the buffered store knows how to persist.
pub trait BufferRow: Send + 'static {
    /// Short name used in logs.
    const KIND: &'static str;

    fn row_id(&self) -> &str;

    fn write_one(&self, database: &dyn Database) -> Result<(), StorageError>;

    /// Write `rows` as one transaction and return how many were stored.
    fn write_batch(database: &dyn Database, rows: &[Self]) -> Result<usize, StorageError>
    where
        Self: Sized;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferOutcome {
    Queued,
    /// Queue was full; the row went straight to storage.
    WrittenDirectly { persisted: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Another flush holds the flag.
    AlreadyFlushing,
    Empty,
    Flushed { written: usize, failed: usize },
}

/// Type-erased flush handle so callers can drain every store alike.
pub trait Flushable: Send + Sync {
    fn kind(&self) -> &'static str;
    fn flush(&self) -> FlushOutcome;
    fn len(&self) -> usize;
}

/// Clears the in-progress flag however the flush ends.
struct FlushGuard<'a>(&'a AtomicBool);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct BufferedStore<R: BufferRow> {
    database: Arc<dyn Database>,
    queue: Mutex<VecDeque<R>>,
    capacity: usize,
    is_flushing: AtomicBool,
}

impl<R: BufferRow> BufferedStore<R> {
    pub fn new(database: Arc<dyn Database>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            database,
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            is_flushing: AtomicBool::new(false),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Enqueue `row`, or write it inline and flush when the queue is full.
    pub fn offer(&self, row: R) -> OfferOutcome {
        let overflow = {
            let mut queue = self.queue.lock();
            if queue.len() < self.capacity {
                queue.push_back(row);
                None
            } else {
                Some(row)
            }
        };

        let Some(row) = overflow else {
            return OfferOutcome::Queued;
        };

        debug!(kind = R::KIND, row_id = %row.row_id(), "queue full, writing directly");
        let persisted = match row.write_one(self.database.as_ref()) {
            Ok(()) => true,
            Err(err) => {
                log_write_failure(R::KIND, row.row_id(), &err);
                false
            }
        };
        self.flush();
        OfferOutcome::WrittenDirectly { persisted }
    }

    /// Drain the queue into storage as one batch.
    pub fn flush(&self) -> FlushOutcome {
        if self
            .is_flushing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return FlushOutcome::AlreadyFlushing;
        }
        let _guard = FlushGuard(&self.is_flushing);

        let batch: Vec<R> = self.queue.lock().drain(..).collect();
        if batch.is_empty() {
            return FlushOutcome::Empty;
        }

        let total = batch.len();
        match R::write_batch(self.database.as_ref(), &batch) {
            Ok(written) => {
                let failed = total.saturating_sub(written);
                if failed > 0 {
                    warn!(kind = R::KIND, written, failed, "flush stored a partial batch");
                } else {
                    debug!(kind = R::KIND, written, "flushed batch");
                }
                FlushOutcome::Flushed { written, failed }
            }
            Err(err) => {
                warn!(kind = R::KIND, rows = total, error = %err, "flush failed");
                FlushOutcome::Flushed {
                    written: 0,
                    failed: total,
                }
            }
        }
    }
}

impl<R: BufferRow> Flushable for BufferedStore<R> {
    fn kind(&self) -> &'static str {
        R::KIND
    }

    fn flush(&self) -> FlushOutcome {
        BufferedStore::flush(self)
    }

    fn len(&self) -> usize {
        BufferedStore::len(self)
    }
}

fn log_write_failure(kind: &str, row_id: &str, err: &StorageError) {
    if err.is_referential() {
        debug!(kind, row_id = %row_id, error = %err, "row dropped: session missing");
    } else {
        warn!(kind, row_id = %row_id, error = %err, "failed to write row");
    }
}
