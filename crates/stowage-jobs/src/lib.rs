//! # stowage-jobs
//!
//! Batch jobs over attachment records.
//!
//! - [`MigrationJob`]: inline payloads into the blob store
//! - [`RepairJob`]: decode blobs stored base64-encoded, certify the rest
//! - [`IndexJob`]: full-text index content for stored blobs
//!
//! Each job runs one bounded pass per call through [`BatchRunner`] and
//! returns a [`BatchReport`]. Per-record failures are counted, never raised.

pub mod handler;
pub mod index;
pub mod indexer;
pub mod migrate;
pub mod repair;
pub mod runner;

pub use handler::{ProgressCallback, RecordJob, RecordOutcome};
pub use index::IndexJob;
pub use indexer::PlainTextIndexer;
pub use migrate::MigrationJob;
pub use repair::RepairJob;
pub use runner::{BatchReport, BatchRunner, CancelFlag};
