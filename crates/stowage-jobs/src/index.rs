//! Fills the full-text index for stored blobs that have none. Newest
//! records first.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use stowage_core::defaults::INDEX_NOT_APPLICABLE;
use stowage_core::{
    AttachmentRecord, AttachmentUpdate, BlobStore, CandidateSelection, Error, Indexer,
    RecordStore, Result, UnitOfWork,
};

use crate::handler::{RecordJob, RecordOutcome};
use crate::runner::{BatchReport, BatchRunner, CancelFlag};

pub struct IndexJob {
    runner: BatchRunner,
    blobs: Arc<dyn BlobStore>,
    indexer: Arc<dyn Indexer>,
    limit: i64,
}

impl IndexJob {
    pub fn new(
        records: Arc<dyn RecordStore>,
        blobs: Arc<dyn BlobStore>,
        indexer: Arc<dyn Indexer>,
        limit: i64,
    ) -> Self {
        Self {
            runner: BatchRunner::new(records),
            blobs,
            indexer,
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
impl RecordJob for IndexJob {
    fn name(&self) -> &'static str {
        "index"
    }

    fn selection(&self) -> CandidateSelection {
        CandidateSelection::Unindexed
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
        let path = self.blobs.path_of(key)?;

        let extraction = self
            .indexer
            .extract(&record.name, record.index_media_type.as_deref(), &path)
            .await
            .map_err(|e| match e {
                Error::Extraction(_) | Error::StorageRead(_) => e,
                other => Error::Extraction(format!("{}: {}", self.indexer.name(), other)),
            })?;

        let content = if extraction.text.is_empty() {
            INDEX_NOT_APPLICABLE.to_string()
        } else {
            extraction.text
        };
        debug!(
            subsystem = "jobs",
            component = "index",
            attachment_id = %record.id,
            indexer = self.indexer.name(),
            media_type = extraction.media_type.as_deref().unwrap_or(""),
            chars = content.len(),
            "Extracted index content"
        );

        uow.update(
            record.id,
            AttachmentUpdate::new().with_index(content, extraction.media_type),
        )
        .await?;
        Ok(RecordOutcome::changed())
    }
}
