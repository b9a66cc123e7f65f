//! Catalog of committed uploads.
//!
//! The catalog is the single source of truth for which uploads exist. It also tracks ids that are
//! reserved by in-flight uploads, so that checking an id and claiming it is one operation under
//! one lock.
//!
//! Two implementations are provided:
//!
//! - [`MemoryCatalog`] keeps everything in process memory.
//! - [`JsonCatalog`] additionally persists the committed records as `{"images": [...]}`.

mod json;
mod memory;

pub use json::JsonCatalog;
pub use memory::MemoryCatalog;

use crate::error::{CatalogError, CatalogResult};
use chrono::{DateTime, Utc};
use scape_types::{NonEmptyText, UploadId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

/// Metadata for one committed upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRecord {
    pub id: UploadId,
    pub owner_id: NonEmptyText,
    pub title: String,
    pub description: String,
    pub tags: String,
    /// Canonical file name, always `<id>.png`.
    pub filename: String,
    pub created_at: DateTime<Utc>,
}

/// Storage for [`UploadRecord`]s plus the set of ids held by in-flight uploads.
///
/// Every method takes `&self`; implementations serialise access internally so the catalog can be
/// shared as `Arc<dyn Catalog>` across request handlers.
pub trait Catalog: Send + Sync + fmt::Debug {
    /// Snapshot of all committed records in insertion order.
    fn all(&self) -> CatalogResult<Vec<UploadRecord>>;

    fn get(&self, id: UploadId) -> CatalogResult<Option<UploadRecord>>;

    /// Claims `id` if it is neither committed nor already reserved.
    ///
    /// Returns `false` when the id is taken. The check and the claim happen under one lock.
    fn try_reserve(&self, id: UploadId) -> CatalogResult<bool>;

    /// Drops a reservation. Releasing an id that is not reserved is a no-op.
    fn release(&self, id: UploadId);

    /// Commits `record`, consuming any reservation held for its id.
    ///
    /// # Errors
    ///
    /// - [`CatalogError::DuplicateId`] if a record with this id is already committed
    /// - [`CatalogError::Persist`] if the change could not be made durable; the catalog is then
    ///   unchanged
    fn append(&self, record: UploadRecord) -> CatalogResult<()>;

    /// Removes the record for `id`, returning it if it existed.
    ///
    /// The id stays reserved afterwards so it is not handed out while its file is still being
    /// removed. Callers release it once they are done.
    fn remove(&self, id: UploadId) -> CatalogResult<Option<UploadRecord>>;
}

/// In-memory state shared by the catalog implementations.
#[derive(Debug, Default)]
pub(crate) struct CatalogState {
    records: Vec<UploadRecord>,
    committed: HashSet<UploadId>,
    reserved: HashSet<UploadId>,
}

impl CatalogState {
    /// Builds state from loaded records, failing with the first duplicated id.
    pub(crate) fn from_records(records: Vec<UploadRecord>) -> Result<Self, UploadId> {
        let mut committed = HashSet::with_capacity(records.len());
        for record in &records {
            if !committed.insert(record.id) {
                return Err(record.id);
            }
        }
        Ok(Self {
            records,
            committed,
            reserved: HashSet::new(),
        })
    }

    pub(crate) fn records(&self) -> &[UploadRecord] {
        &self.records
    }

    pub(crate) fn get(&self, id: UploadId) -> Option<UploadRecord> {
        self.records.iter().find(|r| r.id == id).cloned()
    }

    pub(crate) fn try_reserve(&mut self, id: UploadId) -> bool {
        if self.committed.contains(&id) {
            return false;
        }
        self.reserved.insert(id)
    }

    pub(crate) fn release(&mut self, id: UploadId) {
        self.reserved.remove(&id);
    }

    pub(crate) fn ensure_appendable(&self, record: &UploadRecord) -> CatalogResult<()> {
        if self.committed.contains(&record.id) {
            return Err(CatalogError::DuplicateId(record.id));
        }
        Ok(())
    }

    pub(crate) fn insert(&mut self, record: UploadRecord) {
        self.reserved.remove(&record.id);
        self.committed.insert(record.id);
        self.records.push(record);
    }

    pub(crate) fn position(&self, id: UploadId) -> Option<usize> {
        self.records.iter().position(|r| r.id == id)
    }

    /// Removes the record at `index`, keeping its id reserved.
    pub(crate) fn take(&mut self, index: usize) -> UploadRecord {
        let record = self.records.remove(index);
        self.committed.remove(&record.id);
        self.reserved.insert(record.id);
        record
    }
}

/// Locks catalog state, recovering it if another thread panicked while holding the lock.
///
/// Mutations only touch the state after every fallible step has succeeded, so a poisoned lock
/// never guards a half-applied change.
pub(crate) fn lock_state(state: &Mutex<CatalogState>) -> MutexGuard<'_, CatalogState> {
    state
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}


#[cfg(test)]
mod tests {
    use super::test_support::record;
    use super::*;

    #[test]
    fn test_record_serialises_with_camel_case_fields() {
        let rec = record(12345, "U1", "cat");
        let json = serde_json::to_value(&rec).unwrap();

        assert_eq!(json["id"], 12345);
        assert_eq!(json["ownerId"], "U1");
        assert_eq!(json["filename"], "12345.png");
        assert!(json.get("createdAt").is_some());
        assert!(json.get("owner_id").is_none());
    }

    #[test]
    fn test_state_rejects_duplicate_ids_on_load() {
        let err = CatalogState::from_records(vec![record(11111, "U1", "a"), record(11111, "U2", "b")])
            .unwrap_err();
        assert_eq!(err, UploadId::new(11111));
    }

    #[test]
    fn test_reserved_id_cannot_be_reserved_twice() {
        let mut state = CatalogState::default();
        let id = UploadId::new(20000);

        assert!(state.try_reserve(id));
        assert!(!state.try_reserve(id));

        state.release(id);
        assert!(state.try_reserve(id));
    }

    #[test]
    fn test_committed_id_cannot_be_reserved() {
        let mut state = CatalogState::default();
        state.insert(record(30000, "U1", "a"));

        assert!(!state.try_reserve(UploadId::new(30000)));
    }

    #[test]
    fn test_take_keeps_id_reserved_until_released() {
        let mut state = CatalogState::default();
        state.insert(record(40000, "U1", "a"));
        let index = state.position(UploadId::new(40000)).unwrap();

        let removed = state.take(index);

        assert_eq!(removed.id, UploadId::new(40000));
        assert!(state.get(UploadId::new(40000)).is_none());
        assert!(!state.try_reserve(UploadId::new(40000)));
        state.release(UploadId::new(40000));
        assert!(state.try_reserve(UploadId::new(40000)));
    }
}
