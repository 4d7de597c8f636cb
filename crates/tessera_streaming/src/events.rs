//! Worker notifications and counters.

use tessera_core::RegionKey;

use crate::error::{StorageError, StreamingError};

/// Something the worker did or failed to do.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamingEvent {
    /// A region's entities became resident.
    Loaded {
        /// Loaded region.
        key: RegionKey,
        /// Entities added to the live set.
        count: usize,
    },
    /// A region was saved and evicted.
    Unloaded {
        /// Evicted region.
        key: RegionKey,
        /// Entities removed from the live set.
        count: usize,
    },
    /// A region was saved but interest came back during the save.
    UnloadCancelled {
        /// Region that stays resident.
        key: RegionKey,
    },
    /// Entities that lay outside every tracked region were merged into
    /// their region's stored contents and dropped from the live set.
    OrphansSaved {
        /// Region they were saved to.
        key: RegionKey,
        /// Entities saved.
        count: usize,
    },
    /// Loading failed; the region will be tried again.
    LoadFailed {
        /// Affected region.
        key: RegionKey,
        /// Store error.
        error: StorageError,
    },
    /// Saving failed; the region stays resident and will be tried again.
    SaveFailed {
        /// Affected region.
        key: RegionKey,
        /// Store error.
        error: StorageError,
    },
    /// The worker stopped on an internal error.
    Fault {
        /// What went wrong.
        error: StreamingError,
    },
}

/// Worker counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StreamingStats {
    /// Successful loads.
    pub loads: u64,
    /// Successful saves, flushes excluded.
    pub saves: u64,
    /// Entities added by loads.
    pub entities_loaded: u64,
    /// Entities removed by evictions.
    pub entities_evicted: u64,
    /// Saves whose eviction was cancelled by a new subscription.
    pub unloads_cancelled: u64,
    /// Evictions that needed a second save because entities changed
    /// during the first.
    pub unloads_resaved: u64,
    /// Regions saved for entities outside every tracked region.
    pub orphans_saved: u64,
    /// Failed loads.
    pub load_failures: u64,
    /// Failed saves, flushes included.
    pub save_failures: u64,
    /// Regions saved by the shutdown flush.
    pub flushed_regions: u64,
    /// Events dropped because the channel was full.
    pub events_dropped: u64,
}
