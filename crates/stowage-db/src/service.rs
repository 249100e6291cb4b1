//! External read/write/delete path for attachment payloads.
//!
//! New payloads go to the blob store when one is configured and stay inline
//! otherwise. Reads accept either home, so records not yet migrated keep
//! working.

use std::sync::Arc;

use tracing::{debug, info, warn};

use stowage_core::{
    AttachmentId, AttachmentRecord, AttachmentUpdate, BlobStore, DeleteOutcome, Error,
    FieldChange, NewAttachment, RecordStore, Result, StorageKey,
};

/// Composes a record store with a blob store.
#[derive(Clone)]
pub struct AttachmentService {
    records: Arc<dyn RecordStore>,
    blobs: Arc<dyn BlobStore>,
}

impl AttachmentService {
    pub fn new(records: Arc<dyn RecordStore>, blobs: Arc<dyn BlobStore>) -> Self {
        Self { records, blobs }
    }

    pub fn records(&self) -> &Arc<dyn RecordStore> {
        &self.records
    }

    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    /// Create an attachment holding `data`.
    pub async fn create(&self, name: &str, data: &[u8]) -> Result<AttachmentId> {
        let byte_size = data.len() as i64;
        let new = if self.blobs.is_configured() {
            let key = self.blobs.put(data).await?;
            NewAttachment {
                name: name.to_string(),
                inline_payload: None,
                storage_key: Some(key),
                byte_size,
            }
        } else {
            NewAttachment {
                name: name.to_string(),
                inline_payload: Some(data.to_vec()),
                storage_key: None,
                byte_size,
            }
        };
        let id = self.records.insert(new).await?;
        debug!(
            subsystem = "db",
            component = "attachment_service",
            op = "create",
            attachment_id = %id,
            byte_size,
            "Attachment created"
        );
        Ok(id)
    }

    /// Payload bytes of `id`.
    ///
    /// A missing or unreadable blob is a data-integrity problem, not a
    /// caller error: it is logged and the payload reads as empty.
    pub async fn read_data(&self, id: AttachmentId) -> Result<Vec<u8>> {
        let record = self.records.get(id).await?;
        match &record.storage_key {
            Some(key) if self.blobs.is_configured() => match self.blobs.get(key).await {
                Ok(data) => Ok(data),
                Err(e @ Error::StorageRead(_)) => {
                    Self::integrity_warning(&record, key, &e);
                    Ok(Vec::new())
                }
                Err(e) => Err(e),
            },
            _ => Ok(record.inline_payload.unwrap_or_default()),
        }
    }

    /// Payload size of `id` without reading the payload.
    pub async fn data_size(&self, id: AttachmentId) -> Result<u64> {
        let record = self.records.get(id).await?;
        match &record.storage_key {
            Some(key) if self.blobs.is_configured() => match self.blobs.size(key).await {
                Ok(size) => Ok(size),
                Err(e @ Error::StorageRead(_)) => {
                    Self::integrity_warning(&record, key, &e);
                    Ok(0)
                }
                Err(e) => Err(e),
            },
            _ => Ok(record
                .inline_payload
                .as_ref()
                .map(|p| p.len() as u64)
                .unwrap_or(0)),
        }
    }

    /// Replace the payload of `id`.
    ///
    /// The record switches to the new key in its own unit of work; the
    /// previous blob is pruned afterwards if nothing references it any more.
    pub async fn write_data(&self, id: AttachmentId, data: &[u8]) -> Result<()> {
        let byte_size = data.len() as i64;

        let mut session = self.records.session().await?;
        let mut uow = session.begin().await?;
        let previous = uow.read(id).await?.storage_key;

        let update = if self.blobs.is_configured() {
            AttachmentUpdate::moved_to(self.blobs.put(data).await?, byte_size)
        } else {
            let mut update = AttachmentUpdate::new()
                .with_inline_payload(data.to_vec())
                .with_byte_size(byte_size);
            if previous.is_some() {
                update.storage_key = FieldChange::Clear;
            }
            update
        };
        let current = match &update.storage_key {
            FieldChange::Set(key) => Some(key.clone()),
            _ => None,
        };

        uow.update(id, update).await?;
        uow.commit().await?;

        if let Some(old) = previous.filter(|old| Some(old) != current.as_ref()) {
            self.release(&old).await;
        }
        Ok(())
    }

    /// Delete the record, then its blob if it was the last referent.
    pub async fn unlink(&self, id: AttachmentId) -> Result<()> {
        let record = self.records.get(id).await?;
        self.records.delete(id).await?;
        info!(
            subsystem = "db",
            component = "attachment_service",
            op = "unlink",
            attachment_id = %id,
            attachment_name = %record.name,
            "Attachment deleted"
        );
        if let Some(key) = &record.storage_key {
            self.release(key).await;
        }
        Ok(())
    }

    /// Prune a key the caller no longer references. Never fails the caller.
    async fn release(&self, key: &StorageKey) {
        match self.blobs.prune(key).await {
            Ok(DeleteOutcome::StillReferenced(count)) => {
                warn!(
                    subsystem = "db",
                    component = "attachment_service",
                    op = "release",
                    storage_key = %key,
                    references = count,
                    "Blob still referenced, kept"
                );
            }
            Ok(outcome) => {
                debug!(storage_key = %key, outcome = ?outcome, "Blob released");
            }
            Err(e) => {
                warn!(
                    subsystem = "db",
                    component = "attachment_service",
                    op = "release",
                    storage_key = %key,
                    error = %e,
                    "Could not release blob"
                );
            }
        }
    }

    fn integrity_warning(record: &AttachmentRecord, key: &StorageKey, error: &Error) {
        warn!(
            subsystem = "db",
            component = "attachment_service",
            attachment_id = %record.id,
            attachment_name = %record.name,
            storage_key = %key,
            error = %error,
            "Blob missing for attachment"
        );
    }
}
