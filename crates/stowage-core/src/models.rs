//! Data model shared by the record stores, the blob store and the jobs.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::address::StorageKey;

/// Stable identifier of an attachment record, assigned at creation.
///
/// Identifiers increase monotonically, so ordering by id is ordering by age.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttachmentId(pub i64);

impl fmt::Display for AttachmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for AttachmentId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// An attachment row: metadata plus the payload in one of its two homes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentRecord {
    pub id: AttachmentId,
    pub name: String,
    /// Legacy inline payload. `None` once moved to the blob store.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_payload: Option<Vec<u8>>,
    pub storage_key: Option<StorageKey>,
    pub byte_size: i64,
    pub verified_binary: bool,
    pub index_content: Option<String>,
    pub index_media_type: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AttachmentRecord {
    /// True if the inline payload is present and non-empty.
    pub fn has_inline_payload(&self) -> bool {
        self.inline_payload.as_ref().is_some_and(|p| !p.is_empty())
    }

    /// True if the record has been indexed (sentinel included).
    pub fn is_indexed(&self) -> bool {
        self.index_content.as_ref().is_some_and(|c| !c.is_empty())
    }

    /// Whether this record matches a job's selection predicate.
    pub fn matches(&self, selection: CandidateSelection) -> bool {
        match selection {
            CandidateSelection::PendingMove => {
                self.has_inline_payload() && self.storage_key.is_none()
            }
            CandidateSelection::UnverifiedBinary => {
                self.storage_key.is_some() && !self.verified_binary
            }
            CandidateSelection::Unindexed => self.storage_key.is_some() && !self.is_indexed(),
        }
    }
}

/// Values for a record created through the external write path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewAttachment {
    pub name: String,
    pub inline_payload: Option<Vec<u8>>,
    pub storage_key: Option<StorageKey>,
    pub byte_size: i64,
}

/// Tri-state field assignment for [`AttachmentUpdate`].
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FieldChange<T> {
    #[default]
    Keep,
    Set(T),
    Clear,
}

impl<T> FieldChange<T> {
    /// Apply the change to an optional field.
    pub fn apply_to(self, field: &mut Option<T>) {
        match self {
            FieldChange::Keep => {}
            FieldChange::Set(value) => *field = Some(value),
            FieldChange::Clear => *field = None,
        }
    }

    pub fn is_keep(&self) -> bool {
        matches!(self, FieldChange::Keep)
    }
}

/// A set of field assignments applied to one record inside a unit of work.
///
/// `verified_binary` can only be raised: the flag is monotonic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttachmentUpdate {
    pub inline_payload: FieldChange<Vec<u8>>,
    pub storage_key: FieldChange<StorageKey>,
    pub byte_size: Option<i64>,
    pub mark_verified_binary: bool,
    pub index_content: FieldChange<String>,
    pub index_media_type: FieldChange<String>,
}

impl AttachmentUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point the record at a blob and drop the inline copy.
    pub fn moved_to(key: StorageKey, byte_size: i64) -> Self {
        Self {
            inline_payload: FieldChange::Clear,
            storage_key: FieldChange::Set(key),
            byte_size: Some(byte_size),
            ..Self::default()
        }
    }

    pub fn with_storage_key(mut self, key: StorageKey) -> Self {
        self.storage_key = FieldChange::Set(key);
        self
    }

    pub fn with_inline_payload(mut self, payload: Vec<u8>) -> Self {
        self.inline_payload = FieldChange::Set(payload);
        self
    }

    pub fn with_byte_size(mut self, byte_size: i64) -> Self {
        self.byte_size = Some(byte_size);
        self
    }

    pub fn verified_binary(mut self) -> Self {
        self.mark_verified_binary = true;
        self
    }

    pub fn with_index(mut self, content: String, media_type: Option<String>) -> Self {
        self.index_content = FieldChange::Set(content);
        self.index_media_type = match media_type {
            Some(media_type) => FieldChange::Set(media_type),
            None => FieldChange::Clear,
        };
        self
    }

    /// True if applying this update would change nothing.
    pub fn is_empty(&self) -> bool {
        self.inline_payload.is_keep()
            && self.storage_key.is_keep()
            && self.byte_size.is_none()
            && !self.mark_verified_binary
            && self.index_content.is_keep()
            && self.index_media_type.is_keep()
    }

    /// Apply to an in-memory record.
    pub fn apply(self, record: &mut AttachmentRecord, now: DateTime<Utc>) {
        self.inline_payload.apply_to(&mut record.inline_payload);
        self.storage_key.apply_to(&mut record.storage_key);
        if let Some(byte_size) = self.byte_size {
            record.byte_size = byte_size;
        }
        if self.mark_verified_binary {
            record.verified_binary = true;
        }
        self.index_content.apply_to(&mut record.index_content);
        self.index_media_type.apply_to(&mut record.index_media_type);
        record.updated_at = now;
    }
}

/// Selection predicates of the three batch jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateSelection {
    /// Inline payload present, no storage key. Oldest first.
    PendingMove,
    /// Stored in the blob store but not yet certified binary. Newest first.
    UnverifiedBinary,
    /// Stored in the blob store without index content. Newest first.
    Unindexed,
}

/// Ordering of candidate identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl CandidateSelection {
    pub fn order(self) -> SortOrder {
        match self {
            CandidateSelection::PendingMove => SortOrder::Ascending,
            CandidateSelection::UnverifiedBinary | CandidateSelection::Unindexed => {
                SortOrder::Descending
            }
        }
    }
}

/// Result of running the indexer on one file.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Extraction {
    pub media_type: Option<String>,
    pub text: String,
}

/// What [`crate::BlobStore::delete`] did with a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteOutcome {
    /// The file was unlinked.
    Removed,
    /// No file to unlink, or unlinking was refused; treated as deleted.
    AlreadyGone,
    /// Other records still reference the key; nothing was touched.
    StillReferenced(i64),
    /// No storage root configured.
    Skipped,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::address_of;

    fn record() -> AttachmentRecord {
        let now = Utc::now();
        AttachmentRecord {
            id: AttachmentId(7),
            name: "invoice.pdf".to_string(),
            inline_payload: Some(b"payload".to_vec()),
            storage_key: None,
            byte_size: 7,
            verified_binary: false,
            index_content: None,
            index_media_type: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_pending_move_predicate() {
        let mut rec = record();
        assert!(rec.matches(CandidateSelection::PendingMove));
        assert!(!rec.matches(CandidateSelection::UnverifiedBinary));
        assert!(!rec.matches(CandidateSelection::Unindexed));

        rec.inline_payload = Some(Vec::new());
        assert!(!rec.matches(CandidateSelection::PendingMove));
    }

    #[test]
    fn test_moved_update_switches_source() {
        let mut rec = record();
        let key = address_of(b"payload");
        AttachmentUpdate::moved_to(key.clone(), 7).apply(&mut rec, Utc::now());

        assert_eq!(rec.inline_payload, None);
        assert_eq!(rec.storage_key, Some(key));
        assert_eq!(rec.byte_size, 7);
        assert!(rec.matches(CandidateSelection::UnverifiedBinary));
        assert!(rec.matches(CandidateSelection::Unindexed));
    }

    #[test]
    fn test_sentinel_counts_as_indexed() {
        let mut rec = record();
        rec.storage_key = Some(address_of(b"x"));
        AttachmentUpdate::new()
            .with_index(crate::defaults::INDEX_NOT_APPLICABLE.to_string(), None)
            .apply(&mut rec, Utc::now());
        assert!(rec.is_indexed());
        assert!(!rec.matches(CandidateSelection::Unindexed));
    }

    #[test]
    fn test_verified_flag_is_monotonic() {
        let mut rec = record();
        rec.verified_binary = true;
        AttachmentUpdate::new()
            .with_byte_size(3)
            .apply(&mut rec, Utc::now());
        assert!(rec.verified_binary);
    }

    #[test]
    fn test_empty_update() {
        assert!(AttachmentUpdate::new().is_empty());
        assert!(!AttachmentUpdate::new().verified_binary().is_empty());
    }

    #[test]
    fn test_selection_order() {
        assert_eq!(CandidateSelection::PendingMove.order(), SortOrder::Ascending);
        assert_eq!(
            CandidateSelection::UnverifiedBinary.order(),
            SortOrder::Descending
        );
        assert_eq!(CandidateSelection::Unindexed.order(), SortOrder::Descending);
    }
}
