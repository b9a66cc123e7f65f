use super::{lock_state, Catalog, CatalogState, UploadRecord};
use crate::error::CatalogResult;
use scape_types::UploadId;
use std::sync::Mutex;

/// Catalog held entirely in process memory. Contents are lost on exit.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    state: Mutex<CatalogState>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Catalog for MemoryCatalog {
    fn all(&self) -> CatalogResult<Vec<UploadRecord>> {
        Ok(lock_state(&self.state).records().to_vec())
    }

    fn get(&self, id: UploadId) -> CatalogResult<Option<UploadRecord>> {
        Ok(lock_state(&self.state).get(id))
    }

    fn try_reserve(&self, id: UploadId) -> CatalogResult<bool> {
        Ok(lock_state(&self.state).try_reserve(id))
    }

    fn release(&self, id: UploadId) {
        lock_state(&self.state).release(id);
    }

    fn append(&self, record: UploadRecord) -> CatalogResult<()> {
        let mut state = lock_state(&self.state);
        state.ensure_appendable(&record)?;
        state.insert(record);
        Ok(())
    }

    fn remove(&self, id: UploadId) -> CatalogResult<Option<UploadRecord>> {
        let mut state = lock_state(&self.state);
        Ok(state.position(id).map(|index| state.take(index)))
    }
}
