//! # Scape Core
//!
//! Core business logic for the Scape media catalog.
//!
//! This crate contains the upload admission pipeline and everything it coordinates:
//! - Identifier allocation against the live catalog ([`IdAllocator`])
//! - The catalog of committed uploads ([`Catalog`], [`MemoryCatalog`], [`JsonCatalog`])
//! - Admission of one upload through staging, canonical conversion and commit ([`UploadService`])
//! - Consistency checks between catalog and disk ([`reconcile`])
//!
//! **No API concerns**: HTTP servers, authentication and command-line parsing belong in
//! `api-rest` and `cli`.

pub mod allocator;
pub mod catalog;
pub mod config;
pub mod constants;
pub mod error;
pub mod reconcile;
pub mod upload;

pub use allocator::{IdAllocator, IdRange, IdReservation, IdSource};
pub use catalog::{Catalog, JsonCatalog, MemoryCatalog, UploadRecord};
pub use config::{
    max_allocation_attempts_from_env_value, max_upload_bytes_from_env_value, CoreConfig,
};
pub use error::{
    AllocationError, CatalogError, ConfigError, UploadError, UploadErrorKind, UploadResult,
};
pub use reconcile::{reconcile, ReconcileMode, ReconcileReport};
pub use upload::{CatalogStats, SearchQuery, UploadAdmission, UploadRequest, UploadService};

pub use scape_files::{CANONICAL_EXTENSION, CANONICAL_MEDIA_TYPE};
pub use scape_types::{NonEmptyText, TextError, UploadId, UploadIdError};
