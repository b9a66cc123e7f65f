use super::{lock_state, Catalog, CatalogState, UploadRecord};
use crate::error::{CatalogError, CatalogResult};
use scape_types::UploadId;
use serde::{Deserialize, Serialize};
use fs4::FileExt;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::NamedTempFile;

#[derive(Deserialize)]
struct CatalogDocument {
    images: Vec<UploadRecord>,
}

#[derive(Serialize)]
struct CatalogDocumentRef<'a> {
    images: &'a [UploadRecord],
}

/// Catalog persisted as a single JSON document.
///
/// Every mutation rewrites the whole document through a temp file in the same directory, which is
/// synced and then renamed over the catalog file. The in-memory state only changes once the rename
/// has succeeded.
///
/// An open catalog holds an exclusive lock on `<catalog>.lock` until it is dropped, so only one
/// process at a time can read and rewrite the document.
#[derive(Debug)]
pub struct JsonCatalog {
    path: PathBuf,
    state: Mutex<CatalogState>,
    _lock: File,
}

impl JsonCatalog {
    /// Loads the catalog at `path`, starting empty if the file does not exist yet.
    ///
    /// # Errors
    ///
    /// - [`CatalogError::InUse`] if another process holds the catalog open
    /// - [`CatalogError::Lock`] if the lock file cannot be created or locked
    /// - [`CatalogError::Read`] if the file exists but cannot be read
    /// - [`CatalogError::Corrupt`] if it is not a valid catalog document or repeats an id
    pub fn open(path: impl Into<PathBuf>) -> CatalogResult<Self> {
        let path = path.into();
        let lock = acquire_lock(&path)?;

        let records = match fs::read(&path) {
            Ok(bytes) => {
                let document: CatalogDocument =
                    serde_json::from_slice(&bytes).map_err(|e| CatalogError::Corrupt {
                        path: path.clone(),
                        reason: e.to_string(),
                    })?;
                document.images
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(source) => return Err(CatalogError::Read { path, source }),
        };

        let state = CatalogState::from_records(records).map_err(|id| CatalogError::Corrupt {
            path: path.clone(),
            reason: format!("upload id {id} appears more than once"),
        })?;

        tracing::debug!(
            path = %path.display(),
            records = state.records().len(),
            "opened catalog"
        );

        Ok(Self {
            path,
            state: Mutex::new(state),
            _lock: lock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, records: &[UploadRecord]) -> CatalogResult<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let tmp = tempfile::Builder::new()
            .prefix(".catalog-")
            .suffix(".tmp")
            .tempfile_in(dir)
            .map_err(CatalogError::Persist)?;

        write_document(&tmp, records)?;

        tmp.persist(&self.path)
            .map_err(|e| CatalogError::Persist(e.error))?;
        Ok(())
    }
}

/// Path of the lock file guarding the catalog at `path`.
fn lock_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("catalog"));
    name.push(".lock");
    path.with_file_name(name)
}

fn acquire_lock(path: &Path) -> CatalogResult<File> {
    let lock_path = lock_path(path);
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(&lock_path)
        .map_err(|source| CatalogError::Lock {
            path: lock_path.clone(),
            source,
        })?;

    match file.try_lock_exclusive() {
        Ok(()) => Ok(file),
        Err(e) if e.kind() == ErrorKind::WouldBlock => {
            tracing::warn!(path = %path.display(), "catalog is locked by another process");
            Err(CatalogError::InUse {
                path: path.to_path_buf(),
            })
        }
        Err(source) => Err(CatalogError::Lock {
            path: lock_path,
            source,
        }),
    }
}

fn write_document(tmp: &NamedTempFile, records: &[UploadRecord]) -> CatalogResult<()> {
    let mut writer = BufWriter::new(tmp.as_file());
    serde_json::to_writer_pretty(&mut writer, &CatalogDocumentRef { images: records })
        .map_err(CatalogError::Serialization)?;
    writer.flush().map_err(CatalogError::Persist)?;
    drop(writer);
    tmp.as_file().sync_all().map_err(CatalogError::Persist)
}

impl Catalog for JsonCatalog {
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

        let mut next = state.records().to_vec();
        next.push(record.clone());
        self.persist(&next)?;

        state.insert(record);
        Ok(())
    }

    fn remove(&self, id: UploadId) -> CatalogResult<Option<UploadRecord>> {
        let mut state = lock_state(&self.state);
        let Some(index) = state.position(id) else {
            return Ok(None);
        };

        let mut next = state.records().to_vec();
        next.remove(index);
        self.persist(&next)?;

        Ok(Some(state.take(index)))
    }
}
