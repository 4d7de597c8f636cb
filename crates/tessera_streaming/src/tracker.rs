//! Keeps an observer's surroundings subscribed while it moves.

use tessera_core::{ColumnIndex, Coordinate, Entity, Planet, RegionKey};

use crate::cache::EntityCache;
use crate::error::StreamingResult;
use crate::live_set::check_planet;

/// Subscription held on behalf of one observer.
///
/// Dropping a tracker without [`ActivationTracker::detach`] leaks its
/// subscription.
#[derive(Debug)]
#[must_use = "a tracker holds a subscription until detached"]
pub struct ActivationTracker {
    planet: Planet,
    column: ColumnIndex,
    range: i32,
}

impl ActivationTracker {
    /// Subscribes around `position` with hard radius `range`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StreamingError::InvalidState`] for a negative range or a
    /// position on another planet.
    pub fn attach(
        cache: &EntityCache,
        planet: Planet,
        position: &Coordinate,
        range: i32,
    ) -> StreamingResult<Self> {
        check_planet(&planet, position)?;
        let column = planet.normalize_column(position.column());
        cache.subscribe(&planet, column, range)?;
        Ok(Self {
            planet,
            column,
            range,
        })
    }

    /// Attaches a tracker if the entity is an observer.
    ///
    /// # Errors
    ///
    /// See [`Self::attach`].
    pub fn for_entity(
        cache: &EntityCache,
        planet: Planet,
        entity: &Entity,
    ) -> StreamingResult<Option<Self>> {
        entity
            .activation
            .map(|activation| Self::attach(cache, planet, &entity.position, activation.range))
            .transpose()
    }

    /// Follows the observer to `position`, possibly on another planet.
    ///
    /// The new square is subscribed before the old one is released so
    /// shared regions never drop to zero interest. Returns false if the
    /// column did not change.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StreamingError::InvalidState`] if `position` is not on
    /// `planet`. On error the tracker keeps its old subscription.
    pub fn relocate(
        &mut self,
        cache: &EntityCache,
        planet: Planet,
        position: &Coordinate,
    ) -> StreamingResult<bool> {
        check_planet(&planet, position)?;
        let column = planet.normalize_column(position.column());
        if planet.id() == self.planet.id() && column == self.column {
            return Ok(false);
        }

        cache.subscribe(&planet, column, self.range)?;
        if let Err(e) = cache.unsubscribe(&self.planet, self.column, self.range) {
            cache.unsubscribe(&planet, column, self.range)?;
            return Err(e);
        }

        self.planet = planet;
        self.column = column;
        Ok(true)
    }

    /// Releases the subscription.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StreamingError::InvalidState`] if the cache no longer
    /// holds the subscription.
    pub fn detach(self, cache: &EntityCache) -> StreamingResult<()> {
        cache.unsubscribe(&self.planet, self.column, self.range)
    }

    /// Region the observer is centred on.
    #[must_use]
    pub const fn center(&self) -> RegionKey {
        self.planet.region_key(self.column)
    }

    /// Hard radius in columns.
    #[must_use]
    pub const fn range(&self) -> i32 {
        self.range
    }
}
