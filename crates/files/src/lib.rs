//! Scape File Storage
//!
//! This crate owns every byte an upload writes to disk on its way into the catalog.
//!
//! ## Storage Model
//!
//! Two directories are involved and they are never the same directory:
//!
//! ```text
//! <data_dir>/
//! ├── staging/          # raw inbound bytes, one file per in-flight upload
//! │   └── 48213.jpg
//! └── uploads/          # canonical files, the only files served to viewers
//!     ├── 48213.png
//!     └── .48213-x7Qa.tmp   # private encode target, renamed into place when complete
//! ```
//!
//! - [`StagingStore`] writes the raw upload under `<id>.<original-ext>` and hands back a
//!   [`StagedFile`] guard that removes the file when dropped.
//! - [`Canonicalizer`] decodes a staged file as an image and re-encodes it as PNG into the
//!   [`FinalStore`], writing to a hidden temp file first so a half-written canonical file is
//!   never visible under its public name.
//! - [`FinalStore`] resolves, reads, lists and removes canonical files.
//!
//! ## Example Usage
//!
//! ```no_run
//! use scape_files::{Canonicalizer, FinalStore, StagingStore};
//! use scape_types::UploadId;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let staging = StagingStore::new(Path::new("scape_data/staging"))?;
//! let store = FinalStore::new(Path::new("scape_data/uploads"))?;
//! let canonicalizer = Canonicalizer::new(store);
//!
//! let bytes = std::fs::read("cat.jpg")?;
//! let staged = staging.stage(UploadId::new(48213), &bytes, "jpg")?;
//! let canonical = canonicalizer.canonicalize(&staged)?;
//! staged.discard()?;
//! println!("stored {}", canonical.path().display());
//! # Ok(())
//! # }
//! ```

mod canonical;
mod constants;
mod final_store;
mod staging;

pub use canonical::Canonicalizer;
pub use constants::{CANONICAL_EXTENSION, CANONICAL_MEDIA_TYPE, FALLBACK_EXTENSION};
pub use final_store::{FinalFile, FinalStore};
pub use staging::{sanitise_extension, StagedFile, StagingStore};

use std::path::PathBuf;

/// Errors that can occur during staging and final-store operations
#[derive(Debug, thiserror::Error)]
pub enum FilesError {
    /// Root directory does not exist or is not a directory
    #[error("Invalid root directory: {0}")]
    InvalidRootDirectory(String),

    /// A file for this upload is already present (ids are never reused while a file exists)
    #[error("File already exists: {}", .0.display())]
    FileAlreadyExists(PathBuf),

    /// No file exists for the requested upload
    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),

    /// I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors produced while converting a staged upload into its canonical encoding.
///
/// `UnsupportedFormat` and `Undecodable` describe bad input; every other variant is a storage
/// problem on our side.
#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("failed to read staged file {}: {source}", .path.display())]
    ReadStaged {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported input format: {0}")]
    UnsupportedFormat(String),

    #[error("input could not be decoded as an image: {0}")]
    Undecodable(#[source] image::ImageError),

    #[error("failed to encode canonical image: {0}")]
    Encode(#[source] image::ImageError),

    #[error("canonical file already exists: {}", .0.display())]
    FinalExists(PathBuf),

    #[error("failed to write canonical file: {0}")]
    Write(#[source] std::io::Error),
}

impl ConversionError {
    /// True when the conversion failed because of what the client sent.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            ConversionError::UnsupportedFormat(_) | ConversionError::Undecodable(_)
        )
    }
}

pub type FilesResult<T> = std::result::Result<T, FilesError>;

/// Validates that `dir` exists and is a directory, returning its canonical path.
pub(crate) fn canonical_dir(dir: &std::path::Path) -> FilesResult<PathBuf> {
    if !dir.exists() {
        return Err(FilesError::InvalidRootDirectory(format!(
            "Directory does not exist: {}",
            dir.display()
        )));
    }

    if !dir.is_dir() {
        return Err(FilesError::InvalidRootDirectory(format!(
            "Path is not a directory: {}",
            dir.display()
        )));
    }

    dir.canonicalize().map_err(|e| {
        FilesError::InvalidRootDirectory(format!(
            "Cannot canonicalize path {}: {}",
            dir.display(),
            e
        ))
    })
}
