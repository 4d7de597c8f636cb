//! # Live Entity Set
//!
//! Entities currently resident in memory, sharded by region. Each shard
//! carries a revision taken from a global counter; a save commits only if
//! the shard still has the revision its snapshot was taken at.
//!
//! Positions are kept normalized onto their planet, so an entity's shard
//! is always a key the ledger can hold.
//!
//! Lock order: callers holding the ledger lock may take this lock, never
//! the other way round.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::warn;

use tessera_core::{ColumnChange, Coordinate, Entity, EntityId, Planet, RegionKey};

use crate::error::{StreamingError, StreamingResult};

#[derive(Debug, Default)]
struct Shard {
    entities: Vec<Entity>,
    revision: u64,
}

#[derive(Debug, Default)]
struct LiveInner {
    shards: HashMap<RegionKey, Shard>,
    index: HashMap<EntityId, RegionKey>,
    next_revision: u64,
}

impl LiveInner {
    fn bump(&mut self) -> u64 {
        self.next_revision += 1;
        self.next_revision
    }

    fn push(&mut self, key: RegionKey, entity: Entity) {
        let revision = self.bump();
        self.index.insert(entity.id, key);
        let shard = self.shards.entry(key).or_default();
        shard.entities.push(entity);
        shard.revision = revision;
    }

    fn take(&mut self, id: EntityId) -> Option<Entity> {
        let key = self.index.remove(&id)?;
        let revision = self.bump();
        let shard = self.shards.get_mut(&key)?;
        let position = shard.entities.iter().position(|entity| entity.id == id)?;
        let entity = shard.entities.swap_remove(position);
        shard.revision = revision;
        if shard.entities.is_empty() {
            self.shards.remove(&key);
        }
        Some(entity)
    }

    fn remove_shard(&mut self, key: &RegionKey) -> Vec<Entity> {
        let Some(shard) = self.shards.remove(key) else {
            return Vec::new();
        };
        for entity in &shard.entities {
            self.index.remove(&entity.id);
        }
        shard.entities
    }
}

/// Checks that `position` lies on `planet`.
pub(crate) fn check_planet(planet: &Planet, position: &Coordinate) -> StreamingResult<()> {
    if position.planet == planet.id() {
        return Ok(());
    }
    Err(StreamingError::InvalidState {
        key: RegionKey::of(position),
        reason: format!("coordinate lies on {}, not {}", position.planet, planet.id()),
    })
}

/// Wraps an entity's position onto `planet`.
fn wrap_onto(planet: &Planet, entity: &mut Entity) -> StreamingResult<()> {
    check_planet(planet, &entity.position)?;
    entity.position = planet.normalize_coordinate(entity.position);
    Ok(())
}

/// Entities of one region at a point in time.
#[derive(Clone, Debug, Default)]
pub struct RegionSnapshot {
    /// Copies of the region's entities.
    pub entities: Vec<Entity>,
    /// Shard revision the copy was taken at (0 for an absent shard).
    pub revision: u64,
}

/// What [`LiveEntitySet::evict`] removed.
#[derive(Clone, Debug, PartialEq)]
pub enum Eviction {
    /// The shard still had the snapshot's revision.
    Unchanged(usize),
    /// The shard changed after the snapshot. Its entities were removed
    /// anyway and must be saved once more.
    Changed(Vec<Entity>),
}

/// Thread-safe set of resident entities.
#[derive(Debug, Default)]
pub struct LiveEntitySet {
    inner: RwLock<LiveInner>,
}

impl LiveEntitySet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of resident entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().index.len()
    }

    /// True if no entity is resident.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().index.is_empty()
    }

    /// Number of regions with at least one resident entity.
    #[must_use]
    pub fn region_count(&self) -> usize {
        self.inner.read().shards.len()
    }

    /// Regions with at least one resident entity, sorted.
    #[must_use]
    pub fn region_keys(&self) -> Vec<RegionKey> {
        let mut keys: Vec<_> = self.inner.read().shards.keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    /// First occupied region matching `predicate`, in arbitrary order.
    pub fn find_region(&self, predicate: impl Fn(&RegionKey) -> bool) -> Option<RegionKey> {
        self.inner.read().shards.keys().find(|key| predicate(key)).copied()
    }

    /// True if the entity is resident.
    #[must_use]
    pub fn contains(&self, id: EntityId) -> bool {
        self.inner.read().index.contains_key(&id)
    }

    /// Copy of one entity.
    #[must_use]
    pub fn get(&self, id: EntityId) -> Option<Entity> {
        let inner = self.inner.read();
        let key = inner.index.get(&id)?;
        inner
            .shards
            .get(key)?
            .entities
            .iter()
            .find(|entity| entity.id == id)
            .cloned()
    }

    /// Copies of every resident entity.
    #[must_use]
    pub fn all(&self) -> Vec<Entity> {
        let inner = self.inner.read();
        inner
            .shards
            .values()
            .flat_map(|shard| shard.entities.iter().cloned())
            .collect()
    }

    /// Copies of the entities in one region.
    #[must_use]
    pub fn in_region(&self, key: &RegionKey) -> Vec<Entity> {
        self.inner
            .read()
            .shards
            .get(key)
            .map(|shard| shard.entities.clone())
            .unwrap_or_default()
    }

    /// Runs `f` over every resident entity under the read lock.
    ///
    /// `f` must not call back into the cache that owns this set.
    pub fn with_entities<R>(&self, f: impl FnOnce(&mut dyn Iterator<Item = &Entity>) -> R) -> R {
        let inner = self.inner.read();
        let mut iter = inner.shards.values().flat_map(|shard| shard.entities.iter());
        f(&mut iter)
    }

    /// Copies a region together with its revision.
    #[must_use]
    pub fn snapshot(&self, key: &RegionKey) -> RegionSnapshot {
        let inner = self.inner.read();
        inner
            .shards
            .get(key)
            .map(|shard| RegionSnapshot {
                entities: shard.entities.clone(),
                revision: shard.revision,
            })
            .unwrap_or_default()
    }

    /// Adds the entities read from region `key`.
    ///
    /// They are kept in that region's shard even if a stored position
    /// points elsewhere, so they leave with the region. An entity already
    /// resident keeps its live copy. Returns how many entities were added.
    pub fn insert_loaded(&self, key: RegionKey, entities: Vec<Entity>) -> usize {
        let mut inner = self.inner.write();
        let mut added = 0;
        for entity in entities {
            if inner.index.contains_key(&entity.id) {
                warn!(entity = entity.id.raw(), "loaded entity already resident, keeping live copy");
                continue;
            }
            if entity.region() != key {
                warn!(entity = entity.id.raw(), planet = key.planet.0, x = key.column.x,
                    y = key.column.y, "stored entity lies outside its region, keeping it there");
            }
            inner.push(key, entity);
            added += 1;
        }
        added
    }

    /// Adds one new entity, wrapping its position onto `planet`.
    ///
    /// Returns false if its id is already resident.
    ///
    /// # Errors
    ///
    /// Returns [`StreamingError::InvalidState`] if the entity is not on
    /// `planet`.
    pub fn insert(&self, planet: &Planet, mut entity: Entity) -> StreamingResult<bool> {
        wrap_onto(planet, &mut entity)?;
        let mut inner = self.inner.write();
        if inner.index.contains_key(&entity.id) {
            return Ok(false);
        }
        inner.push(entity.region(), entity);
        Ok(true)
    }

    /// Removes one entity.
    pub fn remove(&self, id: EntityId) -> Option<Entity> {
        self.inner.write().take(id)
    }

    /// Mutates one entity in place. The new position is wrapped onto
    /// `planet` and the entity moves to another shard if its region
    /// changed. An update that leaves the entity equal to what it was
    /// does not touch the shard revision.
    ///
    /// Returns `Ok(None)` if the entity is not resident.
    ///
    /// # Errors
    ///
    /// Returns [`StreamingError::InvalidState`] if `f` put the entity on
    /// another planet or changed its id. The entity is left as it was.
    pub fn update<R>(
        &self,
        planet: &Planet,
        id: EntityId,
        f: impl FnOnce(&mut Entity) -> R,
    ) -> StreamingResult<Option<(R, Option<ColumnChange>)>> {
        let mut inner = self.inner.write();
        let Some(&from) = inner.index.get(&id) else {
            return Ok(None);
        };
        let Some(entity) = inner
            .shards
            .get_mut(&from)
            .and_then(|shard| shard.entities.iter_mut().find(|entity| entity.id == id))
        else {
            return Ok(None);
        };

        let before = entity.clone();
        let result = f(entity);
        if entity.id != id {
            *entity = before;
            return Err(StreamingError::InvalidState {
                key: from,
                reason: format!("update changed the id of entity {id}"),
            });
        }
        if let Err(error) = wrap_onto(planet, entity) {
            *entity = before;
            return Err(error);
        }
        if *entity == before {
            return Ok(Some((result, None)));
        }
        let to = entity.region();

        let revision = inner.bump();
        if let Some(shard) = inner.shards.get_mut(&from) {
            shard.revision = revision;
        }
        if to == from {
            return Ok(Some((result, None)));
        }
        if let Some(entity) = inner.take(id) {
            inner.push(to, entity);
        }
        Ok(Some((result, Some(ColumnChange { from, to }))))
    }

    /// Removes a region's entities. Reports whether the shard still had
    /// `revision`; if not, the removed entities are handed back.
    pub fn evict(&self, key: &RegionKey, revision: u64) -> Eviction {
        let mut inner = self.inner.write();
        let current = inner.shards.get(key).map_or(0, |shard| shard.revision);
        let entities = inner.remove_shard(key);
        if current == revision {
            Eviction::Unchanged(entities.len())
        } else {
            Eviction::Changed(entities)
        }
    }

    /// Removes and returns a region's entities.
    pub fn take_region(&self, key: &RegionKey) -> Vec<Entity> {
        self.inner.write().remove_shard(key)
    }
}
