//! Identifier allocation.
//!
//! Candidates are drawn from an [`IdRange`] and claimed with [`Catalog::try_reserve`], so two
//! concurrent uploads can never end up holding the same id. The number of draws is capped; a
//! nearly full range fails with [`AllocationError::Exhausted`] instead of spinning.

use crate::catalog::{Catalog, UploadRecord};
use crate::config::CoreConfig;
use crate::constants::{DEFAULT_MAX_UPLOAD_ID, DEFAULT_MIN_UPLOAD_ID};
use crate::error::{AllocationError, AllocationResult, CatalogResult, ConfigError, ConfigResult};
use rand::Rng;
use scape_types::UploadId;
use std::fmt;
use std::sync::Arc;

/// Inclusive range identifiers are drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdRange {
    min: u32,
    max: u32,
}

impl IdRange {
    /// `10000..=99999`, every five-digit decimal number.
    pub const FIVE_DIGIT: IdRange = IdRange {
        min: DEFAULT_MIN_UPLOAD_ID,
        max: DEFAULT_MAX_UPLOAD_ID,
    };

    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidIdRange`] if `min > max`.
    pub fn new(min: u32, max: u32) -> ConfigResult<Self> {
        if min > max {
            return Err(ConfigError::InvalidIdRange { min, max });
        }
        Ok(Self { min, max })
    }

    pub fn min(&self) -> u32 {
        self.min
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    pub fn contains(&self, id: UploadId) -> bool {
        (self.min..=self.max).contains(&id.get())
    }
}

impl Default for IdRange {
    fn default() -> Self {
        Self::FIVE_DIGIT
    }
}

/// Produces candidate ids. The default draws uniformly at random from the range.
pub type IdSource = Arc<dyn Fn(&IdRange) -> UploadId + Send + Sync>;

fn random_id(range: &IdRange) -> UploadId {
    UploadId::new(rand::thread_rng().gen_range(range.min..=range.max))
}

/// Hands out catalog-unique ids as [`IdReservation`]s.
#[derive(Clone)]
pub struct IdAllocator {
    range: IdRange,
    max_attempts: u32,
    source: IdSource,
}

impl fmt::Debug for IdAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdAllocator")
            .field("range", &self.range)
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

impl IdAllocator {
    pub fn new(range: IdRange, max_attempts: u32) -> Self {
        Self::with_source(range, max_attempts, Arc::new(random_id))
    }

    /// Allocator drawing candidates from `source` instead of the random default.
    pub fn with_source(range: IdRange, max_attempts: u32, source: IdSource) -> Self {
        Self {
            range,
            max_attempts,
            source,
        }
    }

    pub fn from_config(cfg: &CoreConfig) -> Self {
        Self::new(cfg.id_range(), cfg.max_allocation_attempts())
    }

    pub fn range(&self) -> IdRange {
        self.range
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Reserves an id that is neither in `catalog` nor reported as `taken`.
    ///
    /// `taken` is asked about every candidate the catalog accepted; returning `true` (for example
    /// because a file with that id already exists on disk) releases the candidate and draws again.
    ///
    /// # Errors
    ///
    /// - [`AllocationError::Exhausted`] after `max_attempts` draws without a free id
    /// - [`AllocationError::Catalog`] if the catalog cannot be consulted
    pub fn allocate(
        &self,
        catalog: &Arc<dyn Catalog>,
        mut taken: impl FnMut(UploadId) -> bool,
    ) -> AllocationResult<IdReservation> {
        for attempt in 1..=self.max_attempts {
            let candidate = (self.source)(&self.range);

            if !catalog
                .try_reserve(candidate)
                .map_err(AllocationError::Catalog)?
            {
                tracing::debug!(upload_id = %candidate, attempt, "id already in use, drawing again");
                continue;
            }

            if taken(candidate) {
                catalog.release(candidate);
                tracing::debug!(upload_id = %candidate, attempt, "id has a file on disk, drawing again");
                continue;
            }

            return Ok(IdReservation::new(Arc::clone(catalog), candidate));
        }

        tracing::warn!(
            attempts = self.max_attempts,
            "gave up allocating an upload id"
        );
        Err(AllocationError::Exhausted {
            attempts: self.max_attempts,
        })
    }
}

/// An id held in the catalog's reserved set.
///
/// Dropping the reservation releases the id. [`commit`](Self::commit) turns it into a committed
/// record instead.
#[derive(Debug)]
pub struct IdReservation {
    catalog: Arc<dyn Catalog>,
    id: UploadId,
    armed: bool,
}

impl IdReservation {
    fn new(catalog: Arc<dyn Catalog>, id: UploadId) -> Self {
        Self {
            catalog,
            id,
            armed: true,
        }
    }

    /// Wraps an id the caller already holds reserved, such as one left behind by
    /// [`Catalog::remove`], so it is released when the guard goes out of scope.
    pub(crate) fn held(catalog: Arc<dyn Catalog>, id: UploadId) -> Self {
        Self::new(catalog, id)
    }

    pub fn id(&self) -> UploadId {
        self.id
    }

    /// Appends `record` to the catalog under this reservation.
    ///
    /// On failure the id is deliberately left reserved: the caller may already have written
    /// files under it, and those must not be claimed by another upload.
    pub fn commit(mut self, record: UploadRecord) -> CatalogResult<()> {
        debug_assert_eq!(record.id, self.id);
        self.armed = false;
        self.catalog.append(record)
    }
}

impl Drop for IdReservation {
    fn drop(&mut self) {
        if self.armed {
            self.catalog.release(self.id);
        }
    }
}
