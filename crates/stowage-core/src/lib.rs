//! # stowage-core
//!
//! Core types, traits, and pure functions for stowage.
//!
//! This crate provides the attachment data model, content addressing,
//! base64 mis-encoding detection, configuration, and the contracts the
//! record store, blob store and indexer implement.
//!
//! ## Log level contract
//!
//! Events carry `subsystem`, `component` and `op` fields; batch passes run
//! inside a span with a UUIDv7 `run_id`.
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Aggregate batch errors, aborted passes |
//! | WARN  | Per-record failures, missing blobs, swallowed unlink errors |
//! | INFO  | Pass start/finish, progress every 64 records |
//! | DEBUG | Per-record decisions (deduplicated write, repair needed) |

pub mod address;
pub mod config;
pub mod defaults;
pub mod encoding;
pub mod error;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use address::{address_of, StorageKey};
pub use config::{BatchLimits, StorageLocation, StowageConfig};
pub use encoding::{decode_if_encoded, looks_base64};
pub use error::{Error, Result};
pub use models::*;
pub use traits::*;
