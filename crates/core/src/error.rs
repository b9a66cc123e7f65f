use scape_files::{ConversionError, FilesError};
use scape_types::UploadId;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: '{value}' ({reason})")]
    InvalidValue {
        name: &'static str,
        value: String,
        reason: &'static str,
    },
    #[error("invalid id range {min}..={max}")]
    InvalidIdRange { min: u32, max: u32 },
    #[error("failed to create data directory {}: {source}", .path.display())]
    DataDirCreation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("catalog unavailable: {0}")]
    Unavailable(String),
    #[error("failed to read catalog {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("catalog {} is corrupt: {reason}", .path.display())]
    Corrupt { path: PathBuf, reason: String },
    #[error("failed to lock catalog {}: {source}", .path.display())]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("catalog {} is already open in another process", .path.display())]
    InUse { path: PathBuf },
    #[error("failed to serialize catalog: {0}")]
    Serialization(serde_json::Error),
    #[error("failed to persist catalog: {0}")]
    Persist(std::io::Error),
    #[error("upload id {0} is already in the catalog")]
    DuplicateId(UploadId),
}

pub type CatalogResult<T> = std::result::Result<T, CatalogError>;

#[derive(Debug, thiserror::Error)]
pub enum AllocationError {
    #[error("no free upload id found after {attempts} attempts")]
    Exhausted { attempts: u32 },
    #[error("catalog could not be read during allocation: {0}")]
    Catalog(#[source] CatalogError),
}

pub type AllocationResult<T> = std::result::Result<T, AllocationError>;

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("invalid upload: {0}")]
    InvalidInput(String),
    #[error("identifier allocation failed: {0}")]
    Allocation(#[from] AllocationError),
    #[error("staging failed: {0}")]
    Staging(#[source] FilesError),
    #[error("conversion failed: {0}")]
    Conversion(#[from] ConversionError),
    #[error(
        "upload {id} was written to {} but the catalog append failed: {source}",
        .final_path.display()
    )]
    CatalogAppend {
        id: UploadId,
        final_path: PathBuf,
        #[source]
        source: CatalogError,
    },
    #[error(
        "upload rejected and cleanup also failed (path: {path}): upload={upload_error}; cleanup={cleanup_error}",
        path = path.display()
    )]
    CleanupAfterUploadFailed {
        path: PathBuf,
        #[source]
        upload_error: Box<UploadError>,
        cleanup_error: std::io::Error,
    },
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),
    #[error("storage error: {0}")]
    Storage(#[source] FilesError),
    #[error("upload {0} not found")]
    NotFound(UploadId),
    #[error("upload {0} belongs to another owner")]
    NotOwner(UploadId),
}

/// Coarse classification of an [`UploadError`], the granularity clients are told about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadErrorKind {
    /// The client sent something we cannot accept (not an image, empty, too large).
    InvalidInput,
    /// Something on our side failed; nothing was committed.
    StorageFailure,
    /// A canonical file exists without a catalog record and needs reconciliation.
    OrphanCommit,
    NotFound,
    Forbidden,
}

impl UploadError {
    pub fn kind(&self) -> UploadErrorKind {
        match self {
            UploadError::InvalidInput(_) => UploadErrorKind::InvalidInput,
            UploadError::Conversion(e) if e.is_invalid_input() => UploadErrorKind::InvalidInput,
            UploadError::CatalogAppend { .. } => UploadErrorKind::OrphanCommit,
            UploadError::NotFound(_) => UploadErrorKind::NotFound,
            UploadError::NotOwner(_) => UploadErrorKind::Forbidden,
            UploadError::CleanupAfterUploadFailed { upload_error, .. } => {
                match upload_error.kind() {
                    UploadErrorKind::InvalidInput => UploadErrorKind::InvalidInput,
                    _ => UploadErrorKind::StorageFailure,
                }
            }
            UploadError::Allocation(_)
            | UploadError::Staging(_)
            | UploadError::Conversion(_)
            | UploadError::Catalog(_)
            | UploadError::Storage(_) => UploadErrorKind::StorageFailure,
        }
    }
}

pub type UploadResult<T> = std::result::Result<T, UploadError>;
