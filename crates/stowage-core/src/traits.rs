//! Trait definitions for the storage seams.
//!
//! The record store and the indexer are host services; stowage only relies
//! on the narrow contracts below.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::{
    AttachmentId, AttachmentRecord, AttachmentUpdate, CandidateSelection, DeleteOutcome,
    Extraction, NewAttachment, Result, StorageKey,
};

// =============================================================================
// RECORD STORE
// =============================================================================

/// Counts the records pointing at a storage key.
#[async_trait]
pub trait ReferenceCounter: Send + Sync {
    async fn count_references(&self, key: &StorageKey) -> Result<i64>;
}

/// Persistence of attachment records.
#[async_trait]
pub trait RecordStore: ReferenceCounter {
    /// Identifiers of records matching `selection`, in the selection's order,
    /// at most `limit` of them.
    async fn select_candidates(
        &self,
        selection: CandidateSelection,
        limit: i64,
    ) -> Result<Vec<AttachmentId>>;

    /// Open a secondary session, independent of any caller transaction.
    async fn session(&self) -> Result<Box<dyn RecordSession>>;

    /// Create a record.
    async fn insert(&self, record: NewAttachment) -> Result<AttachmentId>;

    /// Fetch a record.
    async fn get(&self, id: AttachmentId) -> Result<AttachmentRecord>;

    /// Remove a record. Blob cleanup is the caller's concern.
    async fn delete(&self, id: AttachmentId) -> Result<()>;
}

/// A long-lived context from which per-record units of work are started.
#[async_trait]
pub trait RecordSession: Send {
    async fn begin<'a>(&'a mut self) -> Result<Box<dyn UnitOfWork + 'a>>;
}

/// One record's read-transform-write.
///
/// Dropping a unit of work without calling [`UnitOfWork::commit`] rolls
/// back every change made through it.
#[async_trait]
pub trait UnitOfWork: Send {
    async fn read(&mut self, id: AttachmentId) -> Result<AttachmentRecord>;

    async fn update(&mut self, id: AttachmentId, update: AttachmentUpdate) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;
}

// =============================================================================
// BLOB STORE
// =============================================================================

/// Content-addressed payload storage.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// False for the null store selected when no root is configured.
    fn is_configured(&self) -> bool;

    /// Absolute path of the blob for `key`.
    fn path_of(&self, key: &StorageKey) -> Result<PathBuf>;

    /// Store `data` and return its key. Writing the same bytes twice is a no-op.
    async fn put(&self, data: &[u8]) -> Result<StorageKey>;

    /// Read a blob.
    async fn get(&self, key: &StorageKey) -> Result<Vec<u8>>;

    /// Size of a blob in bytes, without reading it.
    async fn size(&self, key: &StorageKey) -> Result<u64>;

    /// Unlink the blob if the caller holds the last reference (count ≤ 1).
    async fn delete(&self, key: &StorageKey) -> Result<DeleteOutcome>;

    /// Unlink the blob if no record references it any more (count = 0).
    async fn prune(&self, key: &StorageKey) -> Result<DeleteOutcome>;
}

// =============================================================================
// INDEXER
// =============================================================================

/// Text extraction for the full-text index.
///
/// Implementations must not modify the file at `path`.
#[async_trait]
pub trait Indexer: Send + Sync {
    async fn extract(
        &self,
        filename: &str,
        media_type_hint: Option<&str>,
        path: &Path,
    ) -> Result<Extraction>;

    /// Human-readable name of this indexer.
    fn name(&self) -> &str;
}
