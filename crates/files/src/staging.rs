//! Staging store for raw inbound bytes.
//!
//! A staged file lives at `<staging_dir>/<id>.<ext>` from the moment its id is allocated until
//! the pipeline either converts it or gives up. The [`StagedFile`] handle is the only owner of
//! that path: calling [`StagedFile::discard`] removes it and reports failures, dropping the
//! handle removes it on a best-effort basis.

use crate::constants::{FALLBACK_EXTENSION, MAX_EXTENSION_LEN};
use crate::{canonical_dir, FilesError, FilesResult};
use scape_types::UploadId;
use std::fs::{self, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Directory reserved for in-flight uploads.
#[derive(Debug, Clone)]
pub struct StagingStore {
    dir: PathBuf,
}

impl StagingStore {
    /// Creates a staging store rooted at an existing directory.
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

    /// Path at which `id` is staged when the client file had the given extension.
    pub fn staging_path(&self, id: UploadId, original_extension: &str) -> PathBuf {
        self.dir
            .join(id.file_name(&sanitise_extension(original_extension)))
    }

    /// Writes `bytes` to the staging area under a name derived from `id`.
    ///
    /// The file is created exclusively, fully written and synced to disk before the handle is
    /// returned. If writing fails part-way the partial file is removed.
    ///
    /// # Errors
    ///
    /// - [`FilesError::FileAlreadyExists`] if `id` is already staged with this extension
    /// - [`FilesError::Io`] for any other create, write or sync failure
    pub fn stage(
        &self,
        id: UploadId,
        bytes: &[u8],
        original_extension: &str,
    ) -> FilesResult<StagedFile> {
        let path = self.staging_path(id, original_extension);

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(FilesError::FileAlreadyExists(path));
            }
            Err(e) => return Err(FilesError::Io(e)),
        };

        let written = file.write_all(bytes).and_then(|()| file.sync_all());
        drop(file);

        if let Err(e) = written {
            if let Err(cleanup) = fs::remove_file(&path) {
                tracing::warn!(
                    "failed to remove partially staged file {}: {}",
                    path.display(),
                    cleanup
                );
            }
            return Err(FilesError::Io(e));
        }

        tracing::debug!(upload_id = %id, path = %path.display(), "staged upload");

        Ok(StagedFile {
            id,
            path,
            armed: true,
        })
    }

    /// Lists every regular file currently in the staging directory.
    ///
    /// Nothing should be here while no upload is in flight, so anything returned at startup is
    /// left over from an interrupted pipeline.
    pub fn list(&self) -> FilesResult<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }
}

/// Reduces a client-supplied extension to a safe, lower-case ASCII token.
///
/// A leading dot is ignored. Anything longer than ten characters, empty, or containing
/// non-alphanumeric characters becomes `bin`.
pub fn sanitise_extension(raw: &str) -> String {
    let trimmed = raw.trim().trim_start_matches('.');
    if trimmed.is_empty()
        || trimmed.len() > MAX_EXTENSION_LEN
        || !trimmed.bytes().all(|b| b.is_ascii_alphanumeric())
    {
        return FALLBACK_EXTENSION.to_string();
    }
    trimmed.to_ascii_lowercase()
}

/// Raw bytes of one upload sitting in the staging area.
#[derive(Debug)]
pub struct StagedFile {
    id: UploadId,
    path: PathBuf,
    armed: bool,
}

impl StagedFile {
    pub fn id(&self) -> UploadId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes the staged file. A file that is already gone counts as removed.
    ///
    /// # Errors
    ///
    /// Returns the underlying [`io::Error`] if the file exists but cannot be removed. The
    /// handle is consumed either way and will not retry on drop.
    pub fn discard(mut self) -> io::Result<()> {
        self.armed = false;
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                "failed to remove staged file {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(temp: &TempDir) -> StagingStore {
        let dir = temp.path().join("staging");
        fs::create_dir_all(&dir).unwrap();
        StagingStore::new(&dir).unwrap()
    }

    #[test]
    fn test_new_rejects_missing_dir() {
        let temp = TempDir::new().unwrap();
        let result = StagingStore::new(&temp.path().join("missing"));
        assert!(matches!(result, Err(FilesError::InvalidRootDirectory(_))));
    }

    #[test]
    fn test_new_rejects_file_as_dir() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("staging");
        fs::write(&path, b"not a directory").unwrap();
        let result = StagingStore::new(&path);
        assert!(matches!(result, Err(FilesError::InvalidRootDirectory(_))));
    }

    #[test]
    fn test_stage_writes_bytes_under_id_name() {
        let temp = TempDir::new().unwrap();
        let staging = store(&temp);

        let staged = staging
            .stage(UploadId::new(48213), b"raw bytes", "JPG")
            .unwrap();

        assert_eq!(staged.id(), UploadId::new(48213));
        assert!(staged.path().ends_with("48213.jpg"));
        assert_eq!(fs::read(staged.path()).unwrap(), b"raw bytes");
    }

    #[test]
    fn test_stage_same_id_twice_is_rejected() {
        let temp = TempDir::new().unwrap();
        let staging = store(&temp);

        let first = staging.stage(UploadId::new(10001), b"a", "png").unwrap();
        let second = staging.stage(UploadId::new(10001), b"b", "png");

        assert!(matches!(second, Err(FilesError::FileAlreadyExists(_))));
        assert_eq!(fs::read(first.path()).unwrap(), b"a");
    }

    #[test]
    fn test_distinct_ids_do_not_interfere() {
        let temp = TempDir::new().unwrap();
        let staging = store(&temp);

        let a = staging.stage(UploadId::new(11111), b"a", "png").unwrap();
        let b = staging.stage(UploadId::new(22222), b"b", "png").unwrap();

        assert_ne!(a.path(), b.path());
        assert_eq!(staging.list().unwrap().len(), 2);
    }

    #[test]
    fn test_discard_removes_file() {
        let temp = TempDir::new().unwrap();
        let staging = store(&temp);

        let staged = staging.stage(UploadId::new(12345), b"x", "gif").unwrap();
        let path = staged.path().to_path_buf();
        staged.discard().unwrap();

        assert!(!path.exists());
        assert!(staging.list().unwrap().is_empty());
    }

    #[test]
    fn test_discard_tolerates_missing_file() {
        let temp = TempDir::new().unwrap();
        let staging = store(&temp);

        let staged = staging.stage(UploadId::new(12345), b"x", "gif").unwrap();
        fs::remove_file(staged.path()).unwrap();

        assert!(staged.discard().is_ok());
    }

    #[test]
    fn test_drop_removes_file() {
        let temp = TempDir::new().unwrap();
        let staging = store(&temp);

        let path = {
            let staged = staging.stage(UploadId::new(54321), b"x", "png").unwrap();
            staged.path().to_path_buf()
        };

        assert!(!path.exists());
    }

    #[test]
    fn test_stage_into_removed_dir_fails_with_io() {
        let temp = TempDir::new().unwrap();
        let staging = store(&temp);
        fs::remove_dir_all(staging.dir()).unwrap();

        let result = staging.stage(UploadId::new(12345), b"x", "png");
        assert!(matches!(result, Err(FilesError::Io(_))));
    }

    #[test]
    fn test_sanitise_extension() {
        assert_eq!(sanitise_extension("jpg"), "jpg");
        assert_eq!(sanitise_extension(".JPEG"), "jpeg");
        assert_eq!(sanitise_extension(""), "bin");
        assert_eq!(sanitise_extension("tar.gz"), "bin");
        assert_eq!(sanitise_extension("../../etc"), "bin");
        assert_eq!(sanitise_extension("averyveryverylongext"), "bin");
    }
}
