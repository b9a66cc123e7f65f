//! Consistency sweep between the catalog and the data directory.
//!
//! The pipeline never leaves a half-committed catalog entry behind, but a crash or a failed
//! cleanup can leave files. This pass finds them:
//!
//! - orphan files: `uploads/<id>.png` with no catalog record
//! - dangling records: catalog records whose canonical file is missing
//! - stale staging files: anything in `staging/`
//! - stale temp files: abandoned encode targets in `uploads/`
//!
//! Run it while no uploads are in flight. An in-flight upload looks exactly like a stale
//! staging file or an orphan.

use crate::catalog::Catalog;
use crate::config::CoreConfig;
use crate::error::{UploadError, UploadResult};
use scape_files::{FinalStore, StagingStore};
use scape_types::UploadId;
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileMode {
    /// Only report what was found.
    Report,
    /// Remove stale staging and temp files. Orphan canonical files are removed only when
    /// `purge_orphans` is set. Dangling records are never touched.
    Repair { purge_orphans: bool },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub orphan_files: Vec<UploadId>,
    pub dangling_records: Vec<UploadId>,
    pub stale_staging_files: Vec<PathBuf>,
    pub stale_temp_files: Vec<PathBuf>,
    /// Number of files removed in repair mode.
    pub removed: usize,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.orphan_files.is_empty()
            && self.dangling_records.is_empty()
            && self.stale_staging_files.is_empty()
            && self.stale_temp_files.is_empty()
    }
}

/// Compares `catalog` with the directories named in `cfg`.
///
/// # Errors
///
/// Returns [`UploadError::Storage`] if a directory cannot be listed and [`UploadError::Catalog`]
/// if the catalog cannot be read. Failures to remove individual files are logged and skipped.
pub fn reconcile(
    cfg: &CoreConfig,
    catalog: &dyn Catalog,
    mode: ReconcileMode,
) -> UploadResult<ReconcileReport> {
    let staging = StagingStore::new(&cfg.staging_dir()).map_err(UploadError::Storage)?;
    let store = FinalStore::new(&cfg.uploads_dir()).map_err(UploadError::Storage)?;

    let recorded: HashSet<UploadId> = catalog.all()?.into_iter().map(|r| r.id).collect();
    let on_disk = store.list_ids().map_err(UploadError::Storage)?;
    let on_disk_set: HashSet<UploadId> = on_disk.iter().copied().collect();

    let mut report = ReconcileReport {
        orphan_files: on_disk
            .into_iter()
            .filter(|id| !recorded.contains(id))
            .collect(),
        stale_staging_files: staging.list().map_err(UploadError::Storage)?,
        stale_temp_files: store.list_temp_files().map_err(UploadError::Storage)?,
        ..ReconcileReport::default()
    };
    report.dangling_records = recorded
        .into_iter()
        .filter(|id| !on_disk_set.contains(id))
        .collect();
    report.dangling_records.sort();

    for id in &report.orphan_files {
        tracing::warn!(upload_id = %id, path = %store.path_for(*id).display(), "orphan canonical file");
    }
    for id in &report.dangling_records {
        tracing::warn!(upload_id = %id, "catalog record has no canonical file");
    }

    let ReconcileMode::Repair { purge_orphans } = mode else {
        return Ok(report);
    };

    for path in report
        .stale_staging_files
        .iter()
        .chain(report.stale_temp_files.iter())
    {
        if remove_stale(path) {
            report.removed += 1;
        }
    }

    if purge_orphans {
        for id in &report.orphan_files {
            match store.remove(*id) {
                Ok(true) => {
                    tracing::info!(upload_id = %id, "purged orphan canonical file");
                    report.removed += 1;
                }
                Ok(false) => {}
                Err(e) => tracing::warn!(upload_id = %id, "failed to purge orphan: {e}"),
            }
        }
    }

    tracing::info!(
        orphans = report.orphan_files.len(),
        dangling = report.dangling_records.len(),
        staging = report.stale_staging_files.len(),
        temp = report.stale_temp_files.len(),
        removed = report.removed,
        "reconciliation finished"
    );
    Ok(report)
}

fn remove_stale(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "removed stale file");
            true
        }
        Err(e) if e.kind() == ErrorKind::NotFound => false,
        Err(e) => {
            tracing::warn!(path = %path.display(), "failed to remove stale file: {e}");
            false
        }
    }
}
