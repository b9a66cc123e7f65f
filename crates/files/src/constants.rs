//! File naming constants.

/// Extension of every canonical file in the final store.
pub const CANONICAL_EXTENSION: &str = "png";

/// Media type served for canonical files.
pub const CANONICAL_MEDIA_TYPE: &str = "image/png";

/// Extension used for staged files when the client supplied none (or an unusable one).
pub const FALLBACK_EXTENSION: &str = "bin";

/// Longest extension kept from a client-supplied file name.
pub(crate) const MAX_EXTENSION_LEN: usize = 10;

/// Prefix of private encode targets in the final store. Hidden so directory listings and
/// static file servers skip them.
pub(crate) const TEMP_PREFIX: &str = ".";

/// Suffix of private encode targets in the final store.
pub(crate) const TEMP_SUFFIX: &str = ".tmp";
