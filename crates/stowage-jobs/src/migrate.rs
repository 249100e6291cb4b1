//! Moves inline payloads into the blob store, oldest records first.

use std::sync::Arc;

use async_trait::async_trait;

use stowage_core::{
    AttachmentRecord, AttachmentUpdate, BlobStore, CandidateSelection, RecordStore, Result,
    UnitOfWork,
};

use crate::handler::{RecordJob, RecordOutcome};
use crate::runner::{BatchReport, BatchRunner, CancelFlag};

pub struct MigrationJob {
    runner: BatchRunner,
    blobs: Arc<dyn BlobStore>,
    limit: i64,
}

impl MigrationJob {
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
impl RecordJob for MigrationJob {
    fn name(&self) -> &'static str {
        "migrate"
    }

    fn selection(&self) -> CandidateSelection {
        CandidateSelection::PendingMove
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
        // Moved or emptied since selection.
        let payload = match &record.inline_payload {
            Some(payload) if !payload.is_empty() && record.storage_key.is_none() => payload,
            _ => return Ok(RecordOutcome::Unchanged),
        };

        let key = self.blobs.put(payload).await?;
        uow.update(
            record.id,
            AttachmentUpdate::moved_to(key, payload.len() as i64),
        )
        .await?;
        Ok(RecordOutcome::changed())
    }
}
