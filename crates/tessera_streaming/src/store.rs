//! # Entity Stores
//!
//! [`EntityStore`] is the persistence seam of the cache. The worker calls
//! it outside every lock, one region at a time.
//!
//! [`MemoryStore`] keeps regions in a hash map. Besides serving the
//! simulation binary it can inject failures, add latency and hold loads
//! or saves at a gate so tests can observe in-flight states.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use tessera_core::{ColumnIndex, Entity, EntityId, PlanetId, RegionKey};

use crate::error::{StorageError, StorageResult};

/// Persistent storage for region entities.
///
/// Implementations must be safe to call from the worker thread while
/// other threads use the store.
pub trait EntityStore: Send + Sync {
    /// Loads every entity stored for a region. A region never saved
    /// loads as empty.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if the region cannot be read.
    fn load_entities(&self, planet: PlanetId, column: ColumnIndex) -> StorageResult<Vec<Entity>>;

    /// Replaces the stored entities of a region. Saving the same data
    /// twice must leave the same result.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if the region cannot be written.
    fn save_entities(
        &self,
        planet: PlanetId,
        column: ColumnIndex,
        entities: &[Entity],
    ) -> StorageResult<()>;
}

/// Blocks callers while closed.
#[derive(Debug, Default)]
struct Gate {
    state: Mutex<GateState>,
    changed: Condvar,
}

#[derive(Debug, Default)]
struct GateState {
    closed: bool,
    waiting: usize,
}

impl Gate {
    fn close(&self) {
        self.state.lock().closed = true;
    }

    fn open(&self) {
        self.state.lock().closed = false;
        self.changed.notify_all();
    }

    fn pass(&self) {
        let mut state = self.state.lock();
        if !state.closed {
            return;
        }
        state.waiting += 1;
        self.changed.notify_all();
        while state.closed {
            self.changed.wait(&mut state);
        }
        state.waiting -= 1;
    }

    fn wait_for_waiter(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.waiting == 0 {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                return state.waiting > 0;
            }
        }
        true
    }
}

/// One recorded save.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SaveRecord {
    /// Saved region.
    pub key: RegionKey,
    /// Ids of the saved entities, in the order given.
    pub entities: Vec<EntityId>,
}

/// In-memory [`EntityStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    regions: Mutex<HashMap<RegionKey, Vec<Entity>>>,
    saves: Mutex<Vec<SaveRecord>>,
    load_count: AtomicU64,
    save_count: AtomicU64,
    failing_loads: AtomicU32,
    failing_saves: AtomicU32,
    latency: Mutex<Duration>,
    load_gate: Gate,
    save_gate: Gate,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores entities for a region without counting it as a save.
    pub fn seed(&self, key: RegionKey, entities: Vec<Entity>) {
        self.regions.lock().insert(key, entities);
    }

    /// Entities currently stored for a region.
    #[must_use]
    pub fn stored(&self, key: &RegionKey) -> Vec<Entity> {
        self.regions.lock().get(key).cloned().unwrap_or_default()
    }

    /// Number of regions with stored data.
    #[must_use]
    pub fn region_count(&self) -> usize {
        self.regions.lock().len()
    }

    /// Completed loads (failed ones included).
    #[must_use]
    pub fn load_count(&self) -> u64 {
        self.load_count.load(Ordering::Acquire)
    }

    /// Completed saves (failed ones included).
    #[must_use]
    pub fn save_count(&self) -> u64 {
        self.save_count.load(Ordering::Acquire)
    }

    /// Every successful save, in order.
    #[must_use]
    pub fn save_log(&self) -> Vec<SaveRecord> {
        self.saves.lock().clone()
    }

    /// Number of successful saves of one region.
    #[must_use]
    pub fn saves_of(&self, key: &RegionKey) -> usize {
        self.saves.lock().iter().filter(|record| record.key == *key).count()
    }

    /// Makes the next `count` loads fail with [`StorageError::Unavailable`].
    pub fn fail_next_loads(&self, count: u32) {
        self.failing_loads.store(count, Ordering::Release);
    }

    /// Makes the next `count` saves fail with [`StorageError::Unavailable`].
    pub fn fail_next_saves(&self, count: u32) {
        self.failing_saves.store(count, Ordering::Release);
    }

    /// Delays every load and save.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Blocks loads until [`Self::release_loads`].
    pub fn hold_loads(&self) {
        self.load_gate.close();
    }

    /// Lets held loads continue.
    pub fn release_loads(&self) {
        self.load_gate.open();
    }

    /// Blocks saves until [`Self::release_saves`].
    pub fn hold_saves(&self) {
        self.save_gate.close();
    }

    /// Lets held saves continue.
    pub fn release_saves(&self) {
        self.save_gate.open();
    }

    /// Waits until a load is blocked at the gate.
    #[must_use]
    pub fn wait_for_held_load(&self, timeout: Duration) -> bool {
        self.load_gate.wait_for_waiter(timeout)
    }

    /// Waits until a save is blocked at the gate.
    #[must_use]
    pub fn wait_for_held_save(&self, timeout: Duration) -> bool {
        self.save_gate.wait_for_waiter(timeout)
    }

    fn delay(&self) {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            std::thread::sleep(latency);
        }
    }
}

fn take_failure(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        .is_ok()
}

impl EntityStore for MemoryStore {
    fn load_entities(&self, planet: PlanetId, column: ColumnIndex) -> StorageResult<Vec<Entity>> {
        self.load_gate.pass();
        self.delay();
        self.load_count.fetch_add(1, Ordering::AcqRel);
        if take_failure(&self.failing_loads) {
            return Err(StorageError::Unavailable("injected load failure".to_string()));
        }
        Ok(self.stored(&RegionKey::new(planet, column)))
    }

    fn save_entities(
        &self,
        planet: PlanetId,
        column: ColumnIndex,
        entities: &[Entity],
    ) -> StorageResult<()> {
        self.save_gate.pass();
        self.delay();
        self.save_count.fetch_add(1, Ordering::AcqRel);
        if take_failure(&self.failing_saves) {
            return Err(StorageError::Unavailable("injected save failure".to_string()));
        }

        let key = RegionKey::new(planet, column);
        self.regions.lock().insert(key, entities.to_vec());
        self.saves.lock().push(SaveRecord {
            key,
            entities: entities.iter().map(|entity| entity.id).collect(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tessera_core::{BlockIndex, Coordinate};

    fn prop(id: u64) -> Entity {
        Entity::prop(
            EntityId::from_raw(id),
            Coordinate::at_block(PlanetId(0), BlockIndex::new(1, 1, 1)),
        )
    }

    #[test]
    fn test_unknown_region_loads_empty() {
        let store = MemoryStore::new();
        let loaded = store.load_entities(PlanetId(0), ColumnIndex::new(9, 9)).unwrap();
        assert!(loaded.is_empty());
        assert_eq!(store.load_count(), 1);
    }

    #[test]
    fn test_save_replaces_and_logs() {
        let store = MemoryStore::new();
        let column = ColumnIndex::new(0, 0);
        store.save_entities(PlanetId(0), column, &[prop(1), prop(2)]).unwrap();
        store.save_entities(PlanetId(0), column, &[prop(2)]).unwrap();

        let key = RegionKey::new(PlanetId(0), column);
        assert_eq!(store.stored(&key).len(), 1);
        assert_eq!(store.saves_of(&key), 2);
        assert_eq!(store.save_log()[0].entities, vec![EntityId::from_raw(1), EntityId::from_raw(2)]);
    }

    #[test]
    fn test_injected_failures_are_consumed() {
        let store = MemoryStore::new();
        store.fail_next_loads(1);
        assert!(store.load_entities(PlanetId(0), ColumnIndex::new(0, 0)).is_err());
        assert!(store.load_entities(PlanetId(0), ColumnIndex::new(0, 0)).is_ok());

        store.fail_next_saves(2);
        assert!(store.save_entities(PlanetId(0), ColumnIndex::new(0, 0), &[]).is_err());
        assert!(store.save_entities(PlanetId(0), ColumnIndex::new(0, 0), &[]).is_err());
        assert!(store.save_entities(PlanetId(0), ColumnIndex::new(0, 0), &[]).is_ok());
        assert_eq!(store.save_log().len(), 1);
    }

    #[test]
    fn test_gate_holds_save() {
        let store = Arc::new(MemoryStore::new());
        store.hold_saves();

        let writer = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || store.save_entities(PlanetId(0), ColumnIndex::new(0, 0), &[prop(1)]))
        };

        assert!(store.wait_for_held_save(Duration::from_secs(5)));
        assert_eq!(store.save_count(), 0);
        store.release_saves();
        writer.join().unwrap().unwrap();
        assert_eq!(store.save_count(), 1);
    }
}
