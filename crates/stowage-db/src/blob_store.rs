//! Content-addressed blob storage on the local filesystem.
//!
//! This module provides:
//! - SHA-1 content addressing with `<shard>/<digest>` layout
//! - Atomic, idempotent writes (identical content is stored once)
//! - Reference-counted deletes through the record store
//! - A null store selected when no storage root is configured
//!
//! ## Example
//!
//! ```rust,ignore
//! use stowage_db::{blob_store_from_config, PgRecordStore};
//!
//! let records = Arc::new(PgRecordStore::new(pool));
//! let blobs = blob_store_from_config(&config, records.clone());
//!
//! let key = blobs.put(&data).await?;
//! let data = blobs.get(&key).await?;
//! ```

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use stowage_core::defaults::HEALTH_CHECK_DIR;
use stowage_core::{
    address_of, BlobStore, DeleteOutcome, Error, ReferenceCounter, Result, StorageKey,
    StowageConfig,
};

/// Raw file operations under a root directory.
///
/// Paths handed to this type are always derived from a parsed
/// [`StorageKey`], never from caller-supplied strings.
pub struct FilesystemBackend {
    base_path: PathBuf,
}

impl FilesystemBackend {
    /// Create a new filesystem backend with the given base directory.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn full_path(&self, relative: &Path) -> PathBuf {
        self.base_path.join(relative)
    }

    /// Validate that the storage root can write, read, and delete files.
    ///
    /// Performs a full round-trip test at startup to catch filesystem issues
    /// (permission errors, read-only mounts, missing directories) early.
    pub async fn validate(&self) -> std::result::Result<(), String> {
        let test_dir = self.base_path.join(HEALTH_CHECK_DIR);
        let test_file = test_dir.join("test.bin");

        fs::create_dir_all(&test_dir)
            .await
            .map_err(|e| format!("create_dir_all({:?}): {}", test_dir, e))?;

        let data = b"storage-health-check";
        fs::write(&test_file, data)
            .await
            .map_err(|e| format!("write({:?}): {}", test_file, e))?;

        let read_data = fs::read(&test_file)
            .await
            .map_err(|e| format!("read({:?}): {}", test_file, e))?;
        if read_data != data {
            return Err("read-back mismatch".to_string());
        }

        fs::remove_file(&test_file)
            .await
            .map_err(|e| format!("remove_file({:?}): {}", test_file, e))?;
        let _ = fs::remove_dir(&test_dir).await; // Best-effort cleanup

        Ok(())
    }

    async fn write(&self, relative: &Path, data: &[u8]) -> Result<()> {
        let full_path = self.full_path(relative);
        debug!(full_path = %full_path.display(), size = data.len(), "blob_store: write");

        let parent = full_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.base_path.clone());
        fs::create_dir_all(&parent).await.map_err(|e| {
            warn!(parent = %parent.display(), error = %e, "blob_store: create_dir_all failed");
            Error::StorageWrite(format!("create_dir_all({}): {}", parent.display(), e))
        })?;

        // Atomic write: private temp file + rename. Writers of the same key
        // never share a temp file, so the final path only ever holds
        // complete content.
        let file_name = full_path
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("blob");
        let temp_path = parent.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));
        let write_err =
            |e: std::io::Error| Error::StorageWrite(format!("{}: {}", full_path.display(), e));

        if let Err(e) = Self::write_temp(&temp_path, data).await {
            warn!(temp_path = %temp_path.display(), error = %e, "blob_store: temp write failed");
            let _ = fs::remove_file(&temp_path).await;
            return Err(write_err(e));
        }

        if let Err(e) = fs::rename(&temp_path, &full_path).await {
            let _ = fs::remove_file(&temp_path).await;
            // A concurrent writer of the same key may have won.
            if let Ok(meta) = fs::metadata(&full_path).await {
                if meta.len() == data.len() as u64 {
                    debug!(full_path = %full_path.display(), "blob_store: stored by concurrent writer");
                    return Ok(());
                }
            }
            warn!(from = %temp_path.display(), to = %full_path.display(), error = %e, "blob_store: rename failed");
            return Err(write_err(e));
        }

        Ok(())
    }

    async fn write_temp(temp_path: &Path, data: &[u8]) -> std::io::Result<()> {
        let mut file = fs::File::create(temp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);

        // rw-r--r--, never executable
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(temp_path, std::fs::Permissions::from_mode(0o644)).await?;
        }
        Ok(())
    }

    async fn read(&self, relative: &Path) -> Result<Vec<u8>> {
        let full_path = self.full_path(relative);
        fs::read(&full_path)
            .await
            .map_err(|e| Error::StorageRead(format!("{}: {}", full_path.display(), e)))
    }

    async fn len(&self, relative: &Path) -> Result<u64> {
        let full_path = self.full_path(relative);
        fs::metadata(&full_path)
            .await
            .map(|m| m.len())
            .map_err(|e| Error::StorageRead(format!("{}: {}", full_path.display(), e)))
    }

    async fn remove(&self, relative: &Path) -> DeleteOutcome {
        let full_path = self.full_path(relative);
        match fs::remove_file(&full_path).await {
            Ok(()) => DeleteOutcome::Removed,
            Err(e) => {
                // Missing files are expected under concurrent deletes.
                if e.kind() == ErrorKind::NotFound {
                    debug!(full_path = %full_path.display(), "blob_store: already gone");
                } else {
                    warn!(full_path = %full_path.display(), error = %e, "blob_store: could not unlink");
                }
                DeleteOutcome::AlreadyGone
            }
        }
    }
}

/// Blob store rooted at a configured directory.
pub struct FileBlobStore {
    backend: FilesystemBackend,
    references: Arc<dyn ReferenceCounter>,
}

impl FileBlobStore {
    /// Create a store whose deletes consult `references` for the remaining
    /// referent count.
    pub fn new(root: impl Into<PathBuf>, references: Arc<dyn ReferenceCounter>) -> Self {
        Self {
            backend: FilesystemBackend::new(root),
            references,
        }
    }

    pub fn root(&self) -> &Path {
        self.backend.base_path()
    }

    /// Startup health check of the storage root.
    pub async fn validate(&self) -> std::result::Result<(), String> {
        self.backend.validate().await
    }

    async fn delete_if_at_most(&self, key: &StorageKey, max_refs: i64) -> Result<DeleteOutcome> {
        let count = self.references.count_references(key).await?;
        if count > max_refs {
            debug!(
                storage_key = %key,
                references = count,
                "blob_store: still referenced, not deleting"
            );
            return Ok(DeleteOutcome::StillReferenced(count));
        }
        Ok(self.backend.remove(&key.relative_path()).await)
    }
}

#[async_trait]
impl BlobStore for FileBlobStore {
    fn is_configured(&self) -> bool {
        true
    }

    fn path_of(&self, key: &StorageKey) -> Result<PathBuf> {
        Ok(self.backend.full_path(&key.relative_path()))
    }

    async fn put(&self, data: &[u8]) -> Result<StorageKey> {
        let key = address_of(data);
        let relative = key.relative_path();

        // Same key means same bytes: an existing file of the right size is
        // the content we were asked to store.
        if let Ok(len) = self.backend.len(&relative).await {
            if len == data.len() as u64 {
                debug!(storage_key = %key, "blob_store: content already stored");
                return Ok(key);
            }
            warn!(storage_key = %key, on_disk = len, expected = data.len(), "blob_store: size mismatch, rewriting");
        }

        self.backend.write(&relative, data).await?;
        Ok(key)
    }

    async fn get(&self, key: &StorageKey) -> Result<Vec<u8>> {
        self.backend.read(&key.relative_path()).await
    }

    async fn size(&self, key: &StorageKey) -> Result<u64> {
        self.backend.len(&key.relative_path()).await
    }

    async fn delete(&self, key: &StorageKey) -> Result<DeleteOutcome> {
        self.delete_if_at_most(key, 1).await
    }

    async fn prune(&self, key: &StorageKey) -> Result<DeleteOutcome> {
        self.delete_if_at_most(key, 0).await
    }
}

/// Blob store used when no storage root is configured.
///
/// Payloads stay inline; every payload operation reports
/// [`Error::StorageNotConfigured`] and deletes are no-ops.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullBlobStore;

#[async_trait]
impl BlobStore for NullBlobStore {
    fn is_configured(&self) -> bool {
        false
    }

    fn path_of(&self, _key: &StorageKey) -> Result<PathBuf> {
        Err(Error::StorageNotConfigured)
    }

    async fn put(&self, _data: &[u8]) -> Result<StorageKey> {
        Err(Error::StorageNotConfigured)
    }

    async fn get(&self, _key: &StorageKey) -> Result<Vec<u8>> {
        Err(Error::StorageNotConfigured)
    }

    async fn size(&self, _key: &StorageKey) -> Result<u64> {
        Err(Error::StorageNotConfigured)
    }

    async fn delete(&self, _key: &StorageKey) -> Result<DeleteOutcome> {
        Ok(DeleteOutcome::Skipped)
    }

    async fn prune(&self, _key: &StorageKey) -> Result<DeleteOutcome> {
        Ok(DeleteOutcome::Skipped)
    }
}

/// Select the blob store variant for this process.
pub fn blob_store_from_config(
    config: &StowageConfig,
    references: Arc<dyn ReferenceCounter>,
) -> Arc<dyn BlobStore> {
    match &config.storage {
        Some(location) => Arc::new(FileBlobStore::new(location.root(), references)),
        None => Arc::new(NullBlobStore),
    }
}
