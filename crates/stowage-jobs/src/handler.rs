//! Per-record job contract.

use async_trait::async_trait;

use stowage_core::{AttachmentRecord, CandidateSelection, Result, StorageKey, UnitOfWork};

/// Progress callback type for batch passes: `(done_so_far, total)`.
pub type ProgressCallback = Box<dyn Fn(usize, usize) + Send + Sync>;

/// Result of transforming one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// The record was rewritten. `released` is a key the record stopped
    /// referencing, to be pruned once the change is committed.
    Changed { released: Option<StorageKey> },
    /// Nothing to do for this record; the unit of work is still committed.
    Unchanged,
}

impl RecordOutcome {
    pub fn changed() -> Self {
        RecordOutcome::Changed { released: None }
    }

    pub fn is_changed(&self) -> bool {
        matches!(self, RecordOutcome::Changed { .. })
    }
}

/// A batch job: a selection plus a per-record transform.
#[async_trait]
pub trait RecordJob: Send + Sync {
    /// Short name used in logs and reports.
    fn name(&self) -> &'static str;

    /// Which records this job works on.
    fn selection(&self) -> CandidateSelection;

    /// Maximum records per pass.
    fn limit(&self) -> i64;

    /// False when the job has nothing it could do in this process
    /// (no storage root configured).
    fn is_ready(&self) -> bool {
        true
    }

    /// Transform one record inside `uow`. Any error rolls the unit back.
    async fn process(
        &self,
        uow: &mut dyn UnitOfWork,
        record: &AttachmentRecord,
    ) -> Result<RecordOutcome>;

    /// Runs after a successful commit.
    async fn after_commit(&self, _record: &AttachmentRecord, _outcome: &RecordOutcome) {}
}
