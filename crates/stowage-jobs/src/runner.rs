//! Batch runner shared by the migration, repair and index jobs.
//!
//! One pass selects a bounded, ordered list of candidate ids, opens a
//! secondary session for the whole pass, and processes each record in its
//! own unit of work. A record that fails is rolled back, logged and counted;
//! the pass carries on with the next one. Only a failure to select
//! candidates or to open the session aborts the pass.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use stowage_core::defaults::PROGRESS_INTERVAL;
use stowage_core::{
    AttachmentId, AttachmentRecord, CandidateSelection, RecordSession, RecordStore, Result,
};

use crate::handler::{ProgressCallback, RecordJob, RecordOutcome};

/// Cooperative cancellation, checked between records.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Summary of one pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub run_id: Uuid,
    pub job: String,
    pub selection: CandidateSelection,
    pub limit: i64,
    /// Candidates returned by the selection.
    pub selected: usize,
    /// Ids in the order they were attempted.
    pub processed_ids: Vec<AttachmentId>,
    /// Records committed, changed or not.
    pub done: usize,
    /// Records actually rewritten.
    pub changed: usize,
    pub errors: usize,
    pub failed_ids: Vec<AttachmentId>,
    /// Selection or session failure; nothing was processed.
    pub aborted: bool,
    /// Stopped early through the [`CancelFlag`].
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl BatchReport {
    fn new(run_id: Uuid, job: &dyn RecordJob) -> Self {
        Self {
            run_id,
            job: job.name().to_string(),
            selection: job.selection(),
            limit: job.limit(),
            selected: 0,
            processed_ids: Vec::new(),
            done: 0,
            changed: 0,
            errors: 0,
            failed_ids: Vec::new(),
            aborted: false,
            cancelled: false,
            started_at: Utc::now(),
            duration_ms: 0,
        }
    }

    /// True when every selected record was committed.
    pub fn is_clean(&self) -> bool {
        !self.aborted && !self.cancelled && self.errors == 0
    }
}

/// Drives a [`RecordJob`] over its candidates.
#[derive(Clone)]
pub struct BatchRunner {
    records: Arc<dyn RecordStore>,
    cancel: Option<CancelFlag>,
    progress: Option<Arc<ProgressCallback>>,
}

impl BatchRunner {
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        Self {
            records,
            cancel: None,
            progress: None,
        }
    }

    /// Stop between records once `flag` is raised.
    pub fn with_cancel(mut self, flag: CancelFlag) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Set the progress callback, called after every record.
    pub fn with_progress_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(usize, usize) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(Box::new(callback)));
        self
    }

    pub fn records(&self) -> &Arc<dyn RecordStore> {
        &self.records
    }

    /// Run one pass of `job`. Never fails: the outcome is in the report.
    pub async fn run(&self, job: &dyn RecordJob) -> BatchReport {
        let run_id = Uuid::now_v7();
        let span = info_span!("batch", run_id = %run_id, job = job.name());
        self.run_pass(run_id, job).instrument(span).await
    }

    async fn run_pass(&self, run_id: Uuid, job: &dyn RecordJob) -> BatchReport {
        let start = Instant::now();
        let mut report = BatchReport::new(run_id, job);

        if !job.is_ready() {
            info!(
                subsystem = "jobs",
                component = "batch",
                op = job.name(),
                "Storage not configured, nothing to do"
            );
            return report;
        }

        let ids = match self
            .records
            .select_candidates(job.selection(), job.limit())
            .await
        {
            Ok(ids) => ids,
            Err(e) => {
                error!(
                    subsystem = "jobs",
                    component = "batch",
                    op = job.name(),
                    error = %e,
                    "Candidate selection failed, pass aborted"
                );
                report.aborted = true;
                report.duration_ms = start.elapsed().as_millis() as u64;
                return report;
            }
        };
        report.selected = ids.len();

        if ids.is_empty() {
            debug!(op = job.name(), "No candidates");
            report.duration_ms = start.elapsed().as_millis() as u64;
            return report;
        }

        let mut session = match self.records.session().await {
            Ok(session) => session,
            Err(e) => {
                error!(
                    subsystem = "jobs",
                    component = "batch",
                    op = job.name(),
                    error = %e,
                    "Could not open batch session, pass aborted"
                );
                report.aborted = true;
                report.duration_ms = start.elapsed().as_millis() as u64;
                return report;
            }
        };

        let total = ids.len();
        info!(
            subsystem = "jobs",
            component = "batch",
            op = job.name(),
            total,
            limit = job.limit(),
            "Batch pass started"
        );

        for (index, id) in ids.into_iter().enumerate() {
            if self.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
                warn!(
                    subsystem = "jobs",
                    component = "batch",
                    op = job.name(),
                    done = report.done,
                    total,
                    "Batch pass cancelled"
                );
                report.cancelled = true;
                break;
            }

            report.processed_ids.push(id);
            let mut name = None;
            match Self::process_one(session.as_mut(), job, id, &mut name).await {
                Ok(outcome) => {
                    report.done += 1;
                    if outcome.is_changed() {
                        report.changed += 1;
                    }
                }
                Err(e) => {
                    report.errors += 1;
                    report.failed_ids.push(id);
                    warn!(
                        subsystem = "jobs",
                        component = "batch",
                        op = job.name(),
                        attachment_id = %id,
                        attachment_name = name.as_deref().unwrap_or(""),
                        error = %e,
                        "Record failed, rolled back"
                    );
                }
            }

            let position = index + 1;
            if position % PROGRESS_INTERVAL == 0 || position == total {
                info!(
                    subsystem = "jobs",
                    component = "batch",
                    op = job.name(),
                    done = report.done,
                    changed = report.changed,
                    errors = report.errors,
                    position,
                    total,
                    "Batch progress"
                );
            }
            if let Some(callback) = &self.progress {
                callback(position, total);
            }
        }

        report.duration_ms = start.elapsed().as_millis() as u64;

        if report.errors > 0 {
            error!(
                subsystem = "jobs",
                component = "batch",
                op = job.name(),
                errors = report.errors,
                total,
                "Batch pass finished with errors"
            );
        }
        info!(
            subsystem = "jobs",
            component = "batch",
            op = job.name(),
            done = report.done,
            changed = report.changed,
            errors = report.errors,
            duration_ms = report.duration_ms,
            "Batch pass finished"
        );
        report
    }

    /// Read, transform and commit one record. The unit of work is dropped,
    /// and so rolled back, on any error.
    async fn process_one(
        session: &mut dyn RecordSession,
        job: &dyn RecordJob,
        id: AttachmentId,
        name: &mut Option<String>,
    ) -> Result<RecordOutcome> {
        let mut uow = session.begin().await?;
        let record: AttachmentRecord = uow.read(id).await?;
        *name = Some(record.name.clone());

        let outcome = job.process(uow.as_mut(), &record).await?;
        uow.commit().await?;

        job.after_commit(&record, &outcome).await;
        Ok(outcome)
    }
}
