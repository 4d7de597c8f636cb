//! # TESSERA Streaming
//!
//! Keeps the entities of a wrap-around planet resident around moving
//! observers and streams them to and from persistent storage.
//!
//! ## Design
//!
//! 1. **Reference-counted interest** - observers subscribe to a square of
//!    columns; the [`SubscriptionLedger`] counts hard and soft covers
//! 2. **One worker** - a background thread loads and saves one region at a
//!    time, never holding a lock across I/O
//! 3. **Cancellable eviction** - a region wanted again before or during
//!    its save stays resident
//! 4. **No lost writes** - a region that changed during its save is saved
//!    again before it is evicted, and entities that stray outside every
//!    tracked region are merged into their region's stored contents
//!
//! ## Thread Safety
//!
//! [`EntityCache`] is `Send + Sync`. Lock order is always ledger, then
//! live set; readers of entities only take the live-set lock.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tessera_streaming::{ActivationTracker, EntityCache, MemoryStore, StreamingConfig};
//!
//! let cache = EntityCache::with_config(Arc::new(MemoryStore::new()), StreamingConfig::production())?;
//! let mut tracker = ActivationTracker::attach(&cache, planet, &player.position, 4)?;
//! tracker.relocate(&cache, planet, &new_position)?;
//! tracker.detach(&cache)?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod ledger;
pub mod live_set;
pub mod state;
pub mod store;
pub mod tracker;
mod worker;

pub use cache::EntityCache;
pub use config::StreamingConfig;
pub use error::{StorageError, StorageResult, StreamingError, StreamingResult};
pub use events::{StreamingEvent, StreamingStats};
pub use ledger::{Claim, SubscriptionInfo, SubscriptionLedger, UnloadOutcome};
pub use live_set::{Eviction, LiveEntitySet, RegionSnapshot};
pub use state::{InterestLost, LoadState};
pub use store::{EntityStore, MemoryStore, SaveRecord};
pub use tracker::ActivationTracker;
