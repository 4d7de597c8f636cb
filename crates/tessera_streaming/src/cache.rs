//! # Entity Cache
//!
//! The public face of the streaming engine: subscription bookkeeping,
//! read and write access to resident entities, and the worker's
//! lifetime.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tessera_core::{ColumnIndex, Planet, PlanetId};
//! use tessera_streaming::{EntityCache, MemoryStore};
//!
//! let cache = EntityCache::new(Arc::new(MemoryStore::new()))?;
//! let planet = Planet::new(PlanetId(0), ColumnIndex::new(32, 32))?;
//!
//! cache.subscribe(&planet, ColumnIndex::new(4, 4), 2)?;
//! // ... entities around (4, 4) stream in ...
//! cache.unsubscribe(&planet, ColumnIndex::new(4, 4), 2)?;
//! cache.shutdown();
//! ```

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use tracing::{error, info};

use tessera_core::{ColumnChange, ColumnIndex, Entity, EntityId, Planet, RegionKey};

use crate::config::StreamingConfig;
use crate::error::StreamingResult;
use crate::events::{StreamingEvent, StreamingStats};
use crate::ledger::SubscriptionInfo;
use crate::live_set::LiveEntitySet;
use crate::state::LoadState;
use crate::store::EntityStore;
use crate::worker::{self, Shared};

/// Streaming entity cache. `Send + Sync`; share it behind an `Arc`.
#[derive(Debug)]
pub struct EntityCache {
    shared: Arc<Shared>,
    events: Receiver<StreamingEvent>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl EntityCache {
    /// Creates a cache with the default configuration and starts its
    /// worker.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StreamingError::WorkerSpawn`] if the thread cannot
    /// be started.
    pub fn new(store: Arc<dyn EntityStore>) -> StreamingResult<Self> {
        Self::with_config(store, StreamingConfig::default())
    }

    /// Creates a cache and starts its worker.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StreamingError::InvalidConfig`] for an invalid
    /// configuration, or [`crate::StreamingError::WorkerSpawn`] if the
    /// thread cannot be started.
    pub fn with_config(store: Arc<dyn EntityStore>, config: StreamingConfig) -> StreamingResult<Self> {
        config.validate()?;
        let (sender, events) = crossbeam_channel::bounded(config.event_capacity.max(1));
        let shared = Arc::new(Shared::new(config, sender));
        let handle = worker::spawn(Arc::clone(&shared), store)?;

        Ok(Self {
            shared,
            events,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Registers interest in the square of `radius` columns around
    /// `column`, plus the soft border.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StreamingError::InvalidState`] for a negative
    /// radius.
    pub fn subscribe(&self, planet: &Planet, column: ColumnIndex, radius: i32) -> StreamingResult<()> {
        let mut ledger = self.shared.ledger.lock();
        ledger.subscribe(planet, column, radius)?;
        self.shared.wake.notify_all();
        Ok(())
    }

    /// Releases interest registered by a matching [`Self::subscribe`].
    ///
    /// # Errors
    ///
    /// Returns [`crate::StreamingError::InvalidState`] if the request does
    /// not match earlier subscriptions. The ledger is left unchanged.
    pub fn unsubscribe(&self, planet: &Planet, column: ColumnIndex, radius: i32) -> StreamingResult<()> {
        let mut ledger = self.shared.ledger.lock();
        ledger.unsubscribe(planet, column, radius)?;
        self.shared.wake.notify_all();
        Ok(())
    }

    /// The resident entities.
    #[must_use]
    pub fn live(&self) -> &LiveEntitySet {
        &self.shared.live
    }

    /// Copies of all resident entities.
    #[must_use]
    pub fn entities(&self) -> Vec<Entity> {
        self.shared.live.all()
    }

    /// Copies of the resident entities of one region.
    #[must_use]
    pub fn entities_in(&self, key: &RegionKey) -> Vec<Entity> {
        self.shared.live.in_region(key)
    }

    /// Runs `f` over all resident entities without copying them.
    pub fn with_entities<R>(&self, f: impl FnOnce(&mut dyn Iterator<Item = &Entity>) -> R) -> R {
        self.shared.live.with_entities(f)
    }

    /// Copy of one resident entity.
    #[must_use]
    pub fn entity(&self, id: EntityId) -> Option<Entity> {
        self.shared.live.get(id)
    }

    /// Mutates a resident entity standing on `planet` after `f`. Its
    /// position is wrapped onto the planet.
    ///
    /// Returns `Ok(None)` if it is not resident, otherwise `f`'s result
    /// and the column change, if any.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StreamingError::InvalidState`] if `f` moved the
    /// entity off `planet` or changed its id; the entity is left as it
    /// was.
    pub fn update_entity<R>(
        &self,
        planet: &Planet,
        id: EntityId,
        f: impl FnOnce(&mut Entity) -> R,
    ) -> StreamingResult<Option<(R, Option<ColumnChange>)>> {
        self.shared.live.update(planet, id, f)
    }

    /// Adds a new entity to the live set, wrapping its position onto
    /// `planet`. Returns false if its id is already resident.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StreamingError::InvalidState`] if the entity is not
    /// on `planet`.
    pub fn spawn_entity(&self, planet: &Planet, entity: Entity) -> StreamingResult<bool> {
        self.shared.live.insert(planet, entity)
    }

    /// Removes an entity from the live set.
    pub fn despawn_entity(&self, id: EntityId) -> Option<Entity> {
        self.shared.live.remove(id)
    }

    /// Number of resident entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.live.len()
    }

    /// True if no entity is resident.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shared.live.is_empty()
    }

    /// Load state of a region, `None` if it is not tracked.
    #[must_use]
    pub fn region_state(&self, key: &RegionKey) -> Option<LoadState> {
        self.shared.ledger.lock().state(key)
    }

    /// Ledger entry of a region.
    #[must_use]
    pub fn subscription(&self, key: &RegionKey) -> Option<SubscriptionInfo> {
        self.shared.ledger.lock().get(key).copied()
    }

    /// Copies of all ledger entries.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<SubscriptionInfo> {
        self.shared.ledger.lock().iter().copied().collect()
    }

    /// Number of tracked regions.
    #[must_use]
    pub fn ledger_len(&self) -> usize {
        self.shared.ledger.lock().len()
    }

    /// Worker counters.
    #[must_use]
    pub fn stats(&self) -> StreamingStats {
        *self.shared.stats.lock()
    }

    /// Receiver for worker events. All clones share one queue.
    #[must_use]
    pub fn events(&self) -> Receiver<StreamingEvent> {
        self.events.clone()
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &StreamingConfig {
        &self.shared.config
    }

    /// True until the worker exits.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Blocks until no region is queued or in flight and every resident
    /// entity lies in a tracked region.
    ///
    /// Returns false on timeout, or if the worker stopped first.
    #[must_use]
    pub fn wait_until_settled(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut ledger = self.shared.ledger.lock();
        loop {
            if self.shared.is_settled(&ledger) {
                return true;
            }
            if !self.is_running() {
                return false;
            }
            if self.shared.settled.wait_until(&mut ledger, deadline).timed_out() {
                return self.shared.is_settled(&ledger);
            }
        }
    }

    /// Stops the worker and waits for it. The current load or save
    /// finishes first; with `flush_on_shutdown` every resident region is
    /// saved. Calling it again does nothing.
    pub fn shutdown(&self) {
        let Some(handle) = self.worker.lock().take() else {
            return;
        };

        self.shared.shutdown.store(true, Ordering::Release);
        {
            let _ledger = self.shared.ledger.lock();
            self.shared.wake.notify_all();
        }

        if handle.join().is_err() {
            error!("streaming worker panicked");
            return;
        }
        let stats = self.stats();
        info!(loads = stats.loads, saves = stats.saves, flushed = stats.flushed_regions,
            "entity cache shut down");
    }
}

impl Drop for EntityCache {
    fn drop(&mut self) {
        self.shutdown();
    }
}
