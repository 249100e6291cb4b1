//! # stowage-db
//!
//! Storage layer for stowage.
//!
//! This crate provides:
//! - Connection pool management and embedded schema migrations
//! - The PostgreSQL attachment record store
//! - An in-process record store for hosts without a database
//! - The filesystem blob store and its unconfigured counterpart
//! - [`AttachmentService`], the read/write/delete path for payloads
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use stowage_db::{blob_store_from_config, create_pool, AttachmentService, PgRecordStore};
//!
//! let pool = create_pool(&config.database_url).await?;
//! let records = Arc::new(PgRecordStore::new(pool));
//! let blobs = blob_store_from_config(&config, records.clone());
//!
//! let service = AttachmentService::new(records, blobs);
//! let id = service.create("invoice.pdf", &bytes).await?;
//! ```
pub mod attachments;
pub mod blob_store;
pub mod memory;
pub mod pool;
pub mod service;

pub use attachments::PgRecordStore;
pub use blob_store::{blob_store_from_config, FileBlobStore, FilesystemBackend, NullBlobStore};
pub use memory::MemoryRecordStore;
#[cfg(feature = "migrations")]
pub use pool::run_migrations;
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};
pub use service::AttachmentService;

// Re-export core types
pub use stowage_core::*;
