//! Final store for canonical files.
//!
//! Files here are named `<id>.png` and are the only files viewers may be served. Writes go
//! through the [`Canonicalizer`](crate::Canonicalizer), which encodes into a private temp file
//! from [`FinalStore::create_temp`] and renames it into place. Removal is reserved for the
//! delete operation and for reconciliation.

use crate::constants::{CANONICAL_EXTENSION, TEMP_PREFIX, TEMP_SUFFIX};
use crate::{canonical_dir, FilesError, FilesResult};
use scape_types::UploadId;
use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Directory of committed canonical files.
#[derive(Debug, Clone)]
pub struct FinalStore {
    dir: PathBuf,
}

/// A canonical file that has been written under its public name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalFile {
    id: UploadId,
    path: PathBuf,
}

impl FinalFile {
    pub(crate) fn new(id: UploadId, path: PathBuf) -> Self {
        Self { id, path }
    }

    pub fn id(&self) -> UploadId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Public file name, `<id>.png`.
    pub fn file_name(&self) -> String {
        canonical_file_name(self.id)
    }
}

/// Canonical file name for an upload.
pub(crate) fn canonical_file_name(id: UploadId) -> String {
    id.file_name(CANONICAL_EXTENSION)
}

impl FinalStore {
    /// Creates a final store rooted at an existing directory.
    ///
    /// # Errors
    ///
    /// Returns [`FilesError::InvalidRootDirectory`] if `dir` is missing, is not a directory, or
    /// cannot be canonicalised.
    pub fn new(dir: &Path) -> FilesResult<Self> {
        Ok(Self {
            dir: canonical_dir(dir)?,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Absolute path of the canonical file for `id`. The file need not exist.
    pub fn path_for(&self, id: UploadId) -> PathBuf {
        self.dir.join(canonical_file_name(id))
    }

    /// True if a canonical file for `id` is present.
    pub fn contains(&self, id: UploadId) -> bool {
        self.path_for(id).is_file()
    }

    /// Reads the canonical bytes of `id`.
    ///
    /// # Errors
    ///
    /// Returns [`FilesError::NotFound`] if no file exists for `id`, otherwise
    /// [`FilesError::Io`] if reading fails.
    pub fn read(&self, id: UploadId) -> FilesResult<Vec<u8>> {
        let path = self.path_for(id);
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(FilesError::NotFound(path)),
            Err(e) => Err(FilesError::Io(e)),
        }
    }

    /// Removes the canonical file of `id`. Returns `false` if there was nothing to remove.
    ///
    /// # Errors
    ///
    /// Returns [`FilesError::Io`] if the file exists but cannot be removed.
    pub fn remove(&self, id: UploadId) -> FilesResult<bool> {
        match fs::remove_file(self.path_for(id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(FilesError::Io(e)),
        }
    }

    /// Ids of every canonical file on disk, ascending.
    ///
    /// Entries that do not look like `<digits>.png` (temp files, stray files, directories) are
    /// ignored.
    pub fn list_ids(&self) -> FilesResult<Vec<UploadId>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(id) = entry.file_name().to_str().and_then(parse_canonical_name) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Private encode targets left behind by an interrupted conversion.
    pub fn list_temp_files(&self) -> FilesResult<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let is_temp = entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(TEMP_PREFIX) && name.ends_with(TEMP_SUFFIX));
            if is_temp {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }

    /// Creates a hidden temp file inside the store for `id` to encode into.
    ///
    /// Living in the same directory keeps the final rename on one filesystem. The file is
    /// deleted when the handle drops unless it is persisted.
    pub(crate) fn create_temp(&self, id: UploadId) -> io::Result<NamedTempFile> {
        tempfile::Builder::new()
            .prefix(&format!("{TEMP_PREFIX}{id}-"))
            .suffix(TEMP_SUFFIX)
            .tempfile_in(&self.dir)
    }
}

fn parse_canonical_name(name: &str) -> Option<UploadId> {
    let stem = name.strip_suffix(CANONICAL_EXTENSION)?.strip_suffix('.')?;
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse::<UploadId>().ok()
}
