//! Upload admission and catalog queries.
//!
//! [`UploadService`] owns the collaborators of the pipeline and exposes the operations callers
//! need: admitting an upload, looking records up, searching, deleting.
//!
//! ## Admission
//!
//! One upload moves through explicit stages, each a method that consumes the previous state:
//!
//! ```text
//! Received -> Allocated -> Staged -> Canonicalized -> committed UploadRecord
//! ```
//!
//! Any stage may fail, and each failure only has to undo what the previous stages produced:
//!
//! - the [`IdReservation`] releases its id when dropped,
//! - the [`StagedFile`] is discarded explicitly, reporting a failed removal,
//! - the canonical file, once written, is kept when the catalog append fails. The id stays
//!   reserved for the life of the process and the orphan is reported in the error and the log.

use crate::allocator::{IdAllocator, IdReservation};
use crate::catalog::{Catalog, UploadRecord};
use crate::config::CoreConfig;
use crate::error::{UploadError, UploadResult};
use chrono::Utc;
use scape_files::{
    Canonicalizer, FilesError, FinalFile, FinalStore, StagedFile, StagingStore,
    CANONICAL_EXTENSION,
};
use scape_types::{NonEmptyText, UploadId};
use serde::Serialize;
use std::collections::HashSet;
use std::io;
use std::path::Path;
use std::sync::Arc;

#[cfg(test)]
use std::sync::{LazyLock, Mutex};

/// One inbound upload as handed over by the transport layer.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub owner_id: NonEmptyText,
    pub title: String,
    pub description: String,
    pub tags: String,
    /// Name the client gave the file. Only its extension is used, to name the staged file.
    pub original_filename: String,
    pub bytes: Vec<u8>,
}

impl UploadRequest {
    fn original_extension(&self) -> &str {
        Path::new(&self.original_filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default()
    }
}

/// Filters for [`UploadService::search`]. An empty query matches every record.
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    /// Case-insensitive substring matched against title, description and tags.
    pub text: Option<String>,
    pub owner_id: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CatalogStats {
    pub uploads: usize,
    pub owners: usize,
}

/// Entry point for everything that reads or changes uploads.
#[derive(Clone, Debug)]
pub struct UploadService {
    cfg: Arc<CoreConfig>,
    catalog: Arc<dyn Catalog>,
    allocator: IdAllocator,
    staging: StagingStore,
    canonicalizer: Canonicalizer,
}

impl UploadService {
    /// Builds a service over the directories named in `cfg`.
    ///
    /// The directories must already exist, see [`CoreConfig::ensure_layout`].
    ///
    /// # Errors
    ///
    /// Returns [`UploadError::Storage`] if the staging or uploads directory is unusable.
    pub fn new(cfg: Arc<CoreConfig>, catalog: Arc<dyn Catalog>) -> UploadResult<Self> {
        let allocator = IdAllocator::from_config(&cfg);
        Self::with_allocator(cfg, catalog, allocator)
    }

    /// Like [`new`](Self::new) with a caller-supplied allocator.
    pub fn with_allocator(
        cfg: Arc<CoreConfig>,
        catalog: Arc<dyn Catalog>,
        allocator: IdAllocator,
    ) -> UploadResult<Self> {
        let staging = StagingStore::new(&cfg.staging_dir()).map_err(UploadError::Storage)?;
        let store = FinalStore::new(&cfg.uploads_dir()).map_err(UploadError::Storage)?;

        Ok(Self {
            cfg,
            catalog,
            allocator,
            staging,
            canonicalizer: Canonicalizer::new(store),
        })
    }

    pub fn config(&self) -> &CoreConfig {
        &self.cfg
    }

    pub fn catalog(&self) -> &Arc<dyn Catalog> {
        &self.catalog
    }

    pub fn final_store(&self) -> &FinalStore {
        self.canonicalizer.store()
    }

    pub fn staging_store(&self) -> &StagingStore {
        &self.staging
    }

    /// Admits one upload: allocate, stage, canonicalize, commit.
    ///
    /// # Errors
    ///
    /// - [`UploadError::InvalidInput`] for an empty or oversized payload
    /// - [`UploadError::Allocation`] if no id could be reserved
    /// - [`UploadError::Staging`] if the raw bytes could not be written
    /// - [`UploadError::Conversion`] if the payload is not a usable image or the PNG could not be
    ///   written
    /// - [`UploadError::CleanupAfterUploadFailed`] if conversion failed and the staged file could
    ///   not be removed either
    /// - [`UploadError::CatalogAppend`] if the canonical file was written but the record could not
    ///   be committed
    pub fn upload(&self, request: UploadRequest) -> UploadResult<UploadRecord> {
        UploadAdmission::receive(self, request)?
            .allocate()?
            .stage()?
            .canonicalize()?
            .commit()
    }

    /// # Errors
    ///
    /// Returns [`UploadError::NotFound`] if no record has this id.
    pub fn get(&self, id: UploadId) -> UploadResult<UploadRecord> {
        self.catalog.get(id)?.ok_or(UploadError::NotFound(id))
    }

    /// Every committed record, oldest first.
    pub fn list(&self) -> UploadResult<Vec<UploadRecord>> {
        Ok(self.catalog.all()?)
    }

    /// Records matching `query`, newest first.
    pub fn search(&self, query: &SearchQuery) -> UploadResult<Vec<UploadRecord>> {
        let needle = query
            .text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase);
        let owner = query
            .owner_id
            .as_deref()
            .map(str::trim)
            .filter(|o| !o.is_empty());

        let mut matches: Vec<UploadRecord> = self
            .catalog
            .all()?
            .into_iter()
            .filter(|r| owner.map_or(true, |o| r.owner_id.as_str() == o))
            .filter(|r| {
                needle.as_deref().map_or(true, |n| {
                    [&r.title, &r.description, &r.tags]
                        .iter()
                        .any(|field| field.to_lowercase().contains(n))
                })
            })
            .collect();

        // Stable sort: equal timestamps keep reverse insertion order.
        matches.reverse();
        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        if let Some(limit) = query.limit {
            matches.truncate(limit);
        }
        Ok(matches)
    }

    pub fn stats(&self) -> UploadResult<CatalogStats> {
        let records = self.catalog.all()?;
        let owners: HashSet<&str> = records.iter().map(|r| r.owner_id.as_str()).collect();
        Ok(CatalogStats {
            uploads: records.len(),
            owners: owners.len(),
        })
    }

    /// PNG bytes of a committed upload.
    ///
    /// # Errors
    ///
    /// - [`UploadError::NotFound`] if there is no record, or the record's file is missing
    /// - [`UploadError::Storage`] if the file exists but cannot be read
    pub fn read_final(&self, id: UploadId) -> UploadResult<Vec<u8>> {
        self.get(id)?;
        match self.final_store().read(id) {
            Ok(bytes) => Ok(bytes),
            Err(FilesError::NotFound(path)) => {
                tracing::warn!(
                    upload_id = %id,
                    path = %path.display(),
                    "catalog record has no canonical file"
                );
                Err(UploadError::NotFound(id))
            }
            Err(e) => Err(UploadError::Storage(e)),
        }
    }

    /// Deletes an upload on behalf of `requester`.
    ///
    /// The record is removed first, so the upload disappears from every listing even if removing
    /// the file then fails. A file left behind that way shows up as an orphan during
    /// reconciliation.
    ///
    /// # Errors
    ///
    /// - [`UploadError::NotFound`] if no record has this id
    /// - [`UploadError::NotOwner`] if `requester` did not upload it
    /// - [`UploadError::Catalog`] if the removal could not be persisted
    pub fn delete(&self, id: UploadId, requester: &NonEmptyText) -> UploadResult<UploadRecord> {
        let record = self.get(id)?;
        if record.owner_id != *requester {
            return Err(UploadError::NotOwner(id));
        }

        let Some(removed) = self.catalog.remove(id)? else {
            return Err(UploadError::NotFound(id));
        };
        let _held = IdReservation::held(Arc::clone(&self.catalog), id);

        match self.final_store().remove(id) {
            Ok(true) => {}
            Ok(false) => tracing::warn!(upload_id = %id, "deleted record had no canonical file"),
            Err(e) => tracing::warn!(
                upload_id = %id,
                "failed to remove canonical file of deleted upload: {e}"
            ),
        }

        tracing::info!(upload_id = %id, owner_id = %removed.owner_id, "upload deleted");
        Ok(removed)
    }
}

/// Marker type: the request has been validated but holds no id yet.
#[derive(Debug)]
pub struct Received {
    bytes: Vec<u8>,
    extension: String,
}

/// Marker type: an id is reserved for this upload.
#[derive(Debug)]
pub struct Allocated {
    reservation: IdReservation,
    bytes: Vec<u8>,
    extension: String,
}

/// Marker type: the raw bytes are on disk in the staging area.
#[derive(Debug)]
pub struct Staged {
    reservation: IdReservation,
    staged: StagedFile,
}

/// Marker type: the canonical file exists in the final store.
#[derive(Debug)]
pub struct Canonicalized {
    reservation: IdReservation,
    staged: StagedFile,
    final_file: FinalFile,
}

/// Metadata carried unchanged from the request into the committed record.
#[derive(Debug)]
struct RecordFields {
    owner_id: NonEmptyText,
    title: String,
    description: String,
    tags: String,
}

/// One upload on its way through the pipeline.
///
/// The state parameter `S` decides which step can run next, so steps cannot be skipped or
/// repeated. Use [`UploadService::upload`] to run all of them.
#[derive(Debug)]
pub struct UploadAdmission<'a, S> {
    service: &'a UploadService,
    fields: RecordFields,
    state: S,
}

impl<'a> UploadAdmission<'a, Received> {
    /// Validates the payload size and takes ownership of the request.
    ///
    /// # Errors
    ///
    /// Returns [`UploadError::InvalidInput`] if the payload is empty or exceeds the configured
    /// maximum.
    pub fn receive(service: &'a UploadService, request: UploadRequest) -> UploadResult<Self> {
        if request.bytes.is_empty() {
            return Err(UploadError::InvalidInput("uploaded file is empty".into()));
        }
        let max = service.cfg.max_upload_bytes();
        if request.bytes.len() > max {
            return Err(UploadError::InvalidInput(format!(
                "uploaded file is {} bytes, the limit is {max}",
                request.bytes.len()
            )));
        }

        let extension = request.original_extension().to_string();
        Ok(Self {
            service,
            fields: RecordFields {
                owner_id: request.owner_id,
                title: request.title,
                description: request.description,
                tags: request.tags,
            },
            state: Received {
                bytes: request.bytes,
                extension,
            },
        })
    }

    /// Reserves an id that is free in the catalog and has no canonical file on disk.
    pub fn allocate(self) -> UploadResult<UploadAdmission<'a, Allocated>> {
        let store = self.service.final_store();
        let reservation = self
            .service
            .allocator
            .allocate(&self.service.catalog, |id| store.contains(id))?;

        tracing::debug!(upload_id = %reservation.id(), "allocated upload id");

        Ok(UploadAdmission {
            service: self.service,
            fields: self.fields,
            state: Allocated {
                reservation,
                bytes: self.state.bytes,
                extension: self.state.extension,
            },
        })
    }
}

impl<'a> UploadAdmission<'a, Allocated> {
    pub fn id(&self) -> UploadId {
        self.state.reservation.id()
    }

    /// Writes the raw bytes to the staging area. On failure the id is released.
    pub fn stage(self) -> UploadResult<UploadAdmission<'a, Staged>> {
        let Allocated {
            reservation,
            bytes,
            extension,
        } = self.state;

        let staged = self
            .service
            .staging
            .stage(reservation.id(), &bytes, &extension)
            .map_err(UploadError::Staging)?;

        Ok(UploadAdmission {
            service: self.service,
            fields: self.fields,
            state: Staged {
                reservation,
                staged,
            },
        })
    }
}

impl<'a> UploadAdmission<'a, Staged> {
    pub fn id(&self) -> UploadId {
        self.state.reservation.id()
    }

    /// Converts the staged bytes into the canonical file.
    ///
    /// On failure the staged file is removed and the id released. If removing the staged file
    /// fails too, both errors are returned as [`UploadError::CleanupAfterUploadFailed`].
    pub fn canonicalize(self) -> UploadResult<UploadAdmission<'a, Canonicalized>> {
        let Staged {
            reservation,
            staged,
        } = self.state;

        let final_file = match self.service.canonicalizer.canonicalize(&staged) {
            Ok(final_file) => final_file,
            Err(conversion_error) => {
                let upload_error = UploadError::Conversion(conversion_error);
                let path = staged.path().to_path_buf();
                tracing::debug!(upload_id = %reservation.id(), "rejecting upload: {upload_error}");

                return match discard_staged(staged) {
                    Ok(()) => Err(upload_error),
                    Err(cleanup_error) => Err(UploadError::CleanupAfterUploadFailed {
                        path,
                        upload_error: Box::new(upload_error),
                        cleanup_error,
                    }),
                };
            }
        };

        Ok(UploadAdmission {
            service: self.service,
            fields: self.fields,
            state: Canonicalized {
                reservation,
                staged,
                final_file,
            },
        })
    }
}

impl UploadAdmission<'_, Canonicalized> {
    pub fn id(&self) -> UploadId {
        self.state.reservation.id()
    }

    /// Removes the staged file and appends the record to the catalog.
    ///
    /// A staged file that cannot be removed is logged and left for reconciliation; the upload
    /// still commits. If the append fails the canonical file stays where it is and the error
    /// names it.
    pub fn commit(self) -> UploadResult<UploadRecord> {
        let Canonicalized {
            reservation,
            staged,
            final_file,
        } = self.state;
        let id = reservation.id();

        let staged_path = staged.path().to_path_buf();
        if let Err(e) = discard_staged(staged) {
            tracing::warn!(
                upload_id = %id,
                path = %staged_path.display(),
                "failed to remove staged file after conversion: {e}"
            );
        }

        let record = UploadRecord {
            id,
            owner_id: self.fields.owner_id,
            title: self.fields.title,
            description: self.fields.description,
            tags: self.fields.tags,
            filename: id.file_name(CANONICAL_EXTENSION),
            created_at: Utc::now(),
        };

        if let Err(source) = reservation.commit(record.clone()) {
            tracing::error!(
                upload_id = %id,
                path = %final_file.path().display(),
                "canonical file written but catalog append failed, file is orphaned: {source}"
            );
            return Err(UploadError::CatalogAppend {
                id,
                final_path: final_file.path().to_path_buf(),
                source,
            });
        }

        tracing::info!(
            upload_id = %id,
            owner_id = %record.owner_id,
            filename = %record.filename,
            "upload committed"
        );
        Ok(record)
    }
}

#[cfg(test)]
static FORCE_CLEANUP_ERROR_FOR_THREADS: LazyLock<Mutex<HashSet<std::thread::ThreadId>>> =
    LazyLock::new(|| Mutex::new(HashSet::new()));

#[cfg(test)]
fn force_cleanup_error_for_current_thread() {
    let mut guard = FORCE_CLEANUP_ERROR_FOR_THREADS
        .lock()
        .expect("FORCE_CLEANUP_ERROR_FOR_THREADS mutex poisoned");
    guard.insert(std::thread::current().id());
}

/// Removes a staged file.
///
/// Wrapper around [`StagedFile::discard`] with test instrumentation: in test builds it can be
/// forced to fail once for the current thread.
fn discard_staged(staged: StagedFile) -> io::Result<()> {
    #[cfg(test)]
    {
        let current_id = std::thread::current().id();
        let mut guard = FORCE_CLEANUP_ERROR_FOR_THREADS
            .lock()
            .expect("FORCE_CLEANUP_ERROR_FOR_THREADS mutex poisoned");

        if guard.remove(&current_id) {
            std::mem::forget(staged);
            return Err(io::Error::other("forced cleanup failure (test hook)"));
        }
    }

    staged.discard()
}
