//! In-process record store.
//!
//! Used by hosts that keep attachment metadata elsewhere and by the job
//! tests. Changes made through a unit of work are staged and only become
//! visible on commit, so dropping the unit rolls back like a transaction.
//! Faults can be injected per record to exercise the batch error paths.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, RwLock};

use stowage_core::{
    AttachmentId, AttachmentRecord, AttachmentUpdate, CandidateSelection, Error, NewAttachment,
    RecordSession, RecordStore, ReferenceCounter, Result, SortOrder, StorageKey, UnitOfWork,
};

#[derive(Default)]
struct Faults {
    update: HashSet<AttachmentId>,
    commit: HashSet<AttachmentId>,
}

struct Inner {
    records: RwLock<BTreeMap<AttachmentId, AttachmentRecord>>,
    next_id: AtomicI64,
    faults: Mutex<Faults>,
    fail_selection: AtomicBool,
}

/// [`RecordStore`] backed by an ordered map.
#[derive(Clone)]
pub struct MemoryRecordStore {
    inner: Arc<Inner>,
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                records: RwLock::new(BTreeMap::new()),
                next_id: AtomicI64::new(1),
                faults: Mutex::new(Faults::default()),
                fail_selection: AtomicBool::new(false),
            }),
        }
    }

    /// Make every update of `id` fail.
    pub async fn fail_updates_for(&self, id: AttachmentId) {
        self.inner.faults.lock().await.update.insert(id);
    }

    /// Make the commit of any unit of work that touched `id` fail.
    pub async fn fail_commits_for(&self, id: AttachmentId) {
        self.inner.faults.lock().await.commit.insert(id);
    }

    /// Make candidate selection fail until cleared.
    pub fn fail_selection(&self, fail: bool) {
        self.inner.fail_selection.store(fail, Ordering::SeqCst);
    }

    /// Committed records, in id order.
    pub async fn snapshot(&self) -> Vec<AttachmentRecord> {
        self.inner.records.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl ReferenceCounter for MemoryRecordStore {
    async fn count_references(&self, key: &StorageKey) -> Result<i64> {
        let records = self.inner.records.read().await;
        Ok(records
            .values()
            .filter(|r| r.storage_key.as_ref() == Some(key))
            .count() as i64)
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn select_candidates(
        &self,
        selection: CandidateSelection,
        limit: i64,
    ) -> Result<Vec<AttachmentId>> {
        if self.inner.fail_selection.load(Ordering::SeqCst) {
            return Err(Error::Internal("candidate selection failed".to_string()));
        }
        let limit = usize::try_from(limit).unwrap_or(0);
        let records = self.inner.records.read().await;
        let matching = records.values().filter(|r| r.matches(selection)).map(|r| r.id);
        let ids = match selection.order() {
            SortOrder::Ascending => matching.take(limit).collect(),
            SortOrder::Descending => matching.rev().take(limit).collect(),
        };
        Ok(ids)
    }

    async fn session(&self) -> Result<Box<dyn RecordSession>> {
        Ok(Box::new(MemorySession {
            inner: self.inner.clone(),
        }))
    }

    async fn insert(&self, record: NewAttachment) -> Result<AttachmentId> {
        let id = AttachmentId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        let now = Utc::now();
        let stored = AttachmentRecord {
            id,
            name: record.name,
            inline_payload: record.inline_payload,
            storage_key: record.storage_key,
            byte_size: record.byte_size,
            verified_binary: false,
            index_content: None,
            index_media_type: None,
            created_at: now,
            updated_at: now,
        };
        self.inner.records.write().await.insert(id, stored);
        Ok(id)
    }

    async fn get(&self, id: AttachmentId) -> Result<AttachmentRecord> {
        let records = self.inner.records.read().await;
        records
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("attachment {}", id)))
    }

    async fn delete(&self, id: AttachmentId) -> Result<()> {
        let removed = self.inner.records.write().await.remove(&id);
        removed
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("attachment {}", id)))
    }
}

struct MemorySession {
    inner: Arc<Inner>,
}

#[async_trait]
impl RecordSession for MemorySession {
    async fn begin<'a>(&'a mut self) -> Result<Box<dyn UnitOfWork + 'a>> {
        Ok(Box::new(MemoryUnitOfWork {
            inner: &self.inner,
            staged: Vec::new(),
        }))
    }
}

struct MemoryUnitOfWork<'a> {
    inner: &'a Inner,
    staged: Vec<(AttachmentId, AttachmentUpdate)>,
}

#[async_trait]
impl<'a> UnitOfWork for MemoryUnitOfWork<'a> {
    async fn read(&mut self, id: AttachmentId) -> Result<AttachmentRecord> {
        let mut record = self
            .inner
            .records
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("attachment {}", id)))?;
        let now = Utc::now();
        for (staged_id, update) in &self.staged {
            if *staged_id == id {
                update.clone().apply(&mut record, now);
            }
        }
        Ok(record)
    }

    async fn update(&mut self, id: AttachmentId, update: AttachmentUpdate) -> Result<()> {
        if self.inner.faults.lock().await.update.contains(&id) {
            return Err(Error::Internal(format!("injected update fault for {}", id)));
        }
        if !self.inner.records.read().await.contains_key(&id) {
            return Err(Error::NotFound(format!("attachment {}", id)));
        }
        self.staged.push((id, update));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryUnitOfWork { inner, staged } = *self;
        {
            let faults = inner.faults.lock().await;
            if let Some((id, _)) = staged.iter().find(|(id, _)| faults.commit.contains(id)) {
                return Err(Error::Internal(format!("injected commit fault for {}", id)));
            }
        }
        let mut records = inner.records.write().await;
        let now = Utc::now();
        for (id, update) in staged {
            if let Some(record) = records.get_mut(&id) {
                update.apply(record, now);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stowage_core::address_of;

    fn inline(name: &str, payload: &[u8]) -> NewAttachment {
        NewAttachment {
            name: name.to_string(),
            inline_payload: Some(payload.to_vec()),
            storage_key: None,
            byte_size: payload.len() as i64,
        }
    }

    #[tokio::test]
    async fn test_ids_are_monotonic() {
        let store = MemoryRecordStore::new();
        let a = store.insert(inline("a", b"1")).await.unwrap();
        let b = store.insert(inline("b", b"2")).await.unwrap();
        assert!(b > a);
    }

    #[tokio::test]
    async fn test_selection_order_and_limit() {
        let store = MemoryRecordStore::new();
        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(store.insert(inline("f", &[i])).await.unwrap());
        }

        let asc = store
            .select_candidates(CandidateSelection::PendingMove, 3)
            .await
            .unwrap();
        assert_eq!(asc, ids[..3].to_vec());

        for id in &ids {
            let mut session = store.session().await.unwrap();
            let mut uow = session.begin().await.unwrap();
            uow.update(*id, AttachmentUpdate::moved_to(address_of(b"k"), 1))
                .await
                .unwrap();
            uow.commit().await.unwrap();
        }

        let desc = store
            .select_candidates(CandidateSelection::UnverifiedBinary, 10)
            .await
            .unwrap();
        let mut expected = ids.clone();
        expected.reverse();
        assert_eq!(desc, expected);
    }

    #[tokio::test]
    async fn test_dropped_unit_of_work_rolls_back() {
        let store = MemoryRecordStore::new();
        let id = store.insert(inline("a", b"payload")).await.unwrap();

        let mut session = store.session().await.unwrap();
        {
            let mut uow = session.begin().await.unwrap();
            uow.update(id, AttachmentUpdate::moved_to(address_of(b"payload"), 7))
                .await
                .unwrap();
            let staged = uow.read(id).await.unwrap();
            assert!(staged.storage_key.is_some());
        }

        let record = store.get(id).await.unwrap();
        assert!(record.storage_key.is_none());
        assert_eq!(record.inline_payload.as_deref(), Some(&b"payload"[..]));
    }

    #[tokio::test]
    async fn test_commit_fault_leaves_record_unchanged() {
        let store = MemoryRecordStore::new();
        let id = store.insert(inline("a", b"payload")).await.unwrap();
        store.fail_commits_for(id).await;

        let mut session = store.session().await.unwrap();
        let mut uow = session.begin().await.unwrap();
        uow.update(id, AttachmentUpdate::new().verified_binary())
            .await
            .unwrap();
        assert!(uow.commit().await.is_err());
        assert!(!store.get(id).await.unwrap().verified_binary);
    }

    #[tokio::test]
    async fn test_reference_count_uses_committed_state() {
        let store = MemoryRecordStore::new();
        let key = address_of(b"shared");
        for name in ["a", "b"] {
            store
                .insert(NewAttachment {
                    name: name.to_string(),
                    storage_key: Some(key.clone()),
                    byte_size: 6,
                    ..NewAttachment::default()
                })
                .await
                .unwrap();
        }
        assert_eq!(store.count_references(&key).await.unwrap(), 2);
    }
}
