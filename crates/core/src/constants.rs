//! Constants used throughout the Scape core crate.
//!
//! This module contains all path, filename and default values so the on-disk layout is defined
//! in exactly one place.

/// Default directory for all service data when no explicit directory is configured.
pub const DEFAULT_DATA_DIR: &str = "scape_data";

/// Directory name for raw bytes of in-flight uploads.
pub const STAGING_DIR_NAME: &str = "staging";

/// Directory name for canonical files. The only directory viewers are served from.
pub const UPLOADS_DIR_NAME: &str = "uploads";

/// Filename of the persisted catalog.
pub const CATALOG_FILENAME: &str = "catalog.json";

/// Smallest identifier handed out by default (five decimal digits).
pub const DEFAULT_MIN_UPLOAD_ID: u32 = 10_000;

/// Largest identifier handed out by default (five decimal digits).
pub const DEFAULT_MAX_UPLOAD_ID: u32 = 99_999;

/// Default cap on allocator draws before giving up.
pub const DEFAULT_MAX_ALLOCATION_ATTEMPTS: u32 = 1_000;

/// Default cap on the size of a single upload.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024; // 20 MiB
