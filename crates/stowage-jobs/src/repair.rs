//! Certifies stored blobs as raw binary, decoding those that were written
//! base64-encoded. Newest records first.

use std::borrow::Cow;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use stowage_core::{
    decode_if_encoded, AttachmentRecord, AttachmentUpdate, BlobStore, CandidateSelection,
    DeleteOutcome, RecordStore, Result, UnitOfWork,
};

use crate::handler::{RecordJob, RecordOutcome};
use crate::runner::{BatchReport, BatchRunner, CancelFlag};

pub struct RepairJob {
    runner: BatchRunner,
    blobs: Arc<dyn BlobStore>,
    limit: i64,
}

impl RepairJob {
    pub fn new(records: Arc<dyn RecordStore>, blobs: Arc<dyn BlobStore>, limit: i64) -> Self {
        Self {
            runner: BatchRunner::new(records),
            blobs,
            limit,
        }
    }

    pub fn with_cancel(mut self, flag: CancelFlag) -> Self {
        self.runner = self.runner.with_cancel(flag);
        self
    }

    pub async fn run(&self) -> BatchReport {
        self.runner.run(self).await
    }
}

#[async_trait]
impl RecordJob for RepairJob {
    fn name(&self) -> &'static str {
        "repair"
    }

    fn selection(&self) -> CandidateSelection {
        CandidateSelection::UnverifiedBinary
    }

    fn limit(&self) -> i64 {
        self.limit
    }

    fn is_ready(&self) -> bool {
        self.blobs.is_configured()
    }

    async fn process(
        &self,
        uow: &mut dyn UnitOfWork,
        record: &AttachmentRecord,
    ) -> Result<RecordOutcome> {
        let Some(key) = &record.storage_key else {
            return Ok(RecordOutcome::Unchanged);
        };

        let stored = self.blobs.get(key).await?;

        let mut update = AttachmentUpdate::new().verified_binary();
        let mut outcome = RecordOutcome::Unchanged;

        if let Cow::Owned(decoded) = decode_if_encoded(&stored)? {
            let new_key = self.blobs.put(&decoded).await?;
            if &new_key != key {
                info!(
                    subsystem = "jobs",
                    component = "repair",
                    attachment_id = %record.id,
                    storage_key = %key,
                    new_storage_key = %new_key,
                    byte_size = decoded.len(),
                    "Decoded base64 payload"
                );
                update = update
                    .with_storage_key(new_key)
                    .with_byte_size(decoded.len() as i64);
                outcome = RecordOutcome::Changed {
                    released: Some(key.clone()),
                };
            }
        }

        uow.update(record.id, update).await?;
        Ok(outcome)
    }

    async fn after_commit(&self, record: &AttachmentRecord, outcome: &RecordOutcome) {
        let RecordOutcome::Changed {
            released: Some(old_key),
        } = outcome
        else {
            return;
        };
        match self.blobs.prune(old_key).await {
            Ok(DeleteOutcome::StillReferenced(count)) => {
                warn!(
                    subsystem = "jobs",
                    component = "repair",
                    attachment_id = %record.id,
                    storage_key = %old_key,
                    references = count,
                    "Encoded blob still referenced, kept"
                );
            }
            Ok(_) => {}
            Err(e) => {
                warn!(
                    subsystem = "jobs",
                    component = "repair",
                    attachment_id = %record.id,
                    storage_key = %old_key,
                    error = %e,
                    "Could not prune encoded blob"
                );
            }
        }
    }
}
