//! Export pipeline: the periodic ticker, the export cycle and post-export cleanup.

pub mod cleanup;
pub mod exporter;
pub mod ticker;

pub use cleanup::CleanupService;
pub use exporter::{ExportOutcome, Exporter};
pub use ticker::ExportTicker;
