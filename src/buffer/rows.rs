//! Persistence bindings for the three telemetry row types.

use crate::buffer::BufferRow;
use crate::error::StorageError;
use crate::storage::{Database, EventEntity, ResourceUsageEntity, TraceEntity};

impl BufferRow for EventEntity {
    const KIND: &'static str = "event";

    fn row_id(&self) -> &str {
        &self.id
    }

    fn write_one(&self, database: &dyn Database) -> Result<(), StorageError> {
        database.create_event(self)
    }

    fn write_batch(database: &dyn Database, rows: &[Self]) -> Result<usize, StorageError> {
        database.insert_events(rows)
    }
}

impl BufferRow for TraceEntity {
    const KIND: &'static str = "trace";

    fn row_id(&self) -> &str {
        &self.trace_id
    }

    fn write_one(&self, database: &dyn Database) -> Result<(), StorageError> {
        database.create_trace(self)
    }

    fn write_batch(database: &dyn Database, rows: &[Self]) -> Result<usize, StorageError> {
        database.insert_traces(rows)
    }
}

impl BufferRow for ResourceUsageEntity {
    const KIND: &'static str = "resource_usage";

    fn row_id(&self) -> &str {
        &self.id
    }

    fn write_one(&self, database: &dyn Database) -> Result<(), StorageError> {
        database.create_resource_usage(self)
    }

    fn write_batch(database: &dyn Database, rows: &[Self]) -> Result<usize, StorageError> {
        database.insert_resource_usage(rows)
    }
}
