//! # Entities
//!
//! An entity is plain data: an identifier, a position, and a set of
//! optional capability records. Systems look for the capability they
//! need instead of matching on a concrete entity kind.
//!
//! | Capability   | Meaning                                         |
//! |--------------|-------------------------------------------------|
//! | `Body`       | Collides with blocks and other bodies           |
//! | `Movement`   | Has velocity and accepts movement input         |
//! | `Inventory`  | Carries item stacks                             |
//! | `Activation` | Keeps the world around it resident (observers)  |
//!
//! The streaming cache only ever reads `position`.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::coord::Coordinate;
use crate::planet::RegionKey;

/// Activation range of a player, in columns.
pub const PLAYER_ACTIVATION_RANGE: i32 = 4;

/// Largest tilt magnitude, in radians.
pub const MAX_TILT: f32 = 1.5;

/// Unique identifier for an entity.
///
/// Identifiers survive save/load cycles, so two entities with the same id
/// are the same entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct EntityId(u64);

impl EntityId {
    /// Null/invalid entity ID.
    pub const NULL: Self = Self(u64::MAX);

    /// Creates an entity ID from its raw value.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Checks if this entity ID is null/invalid.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == u64::MAX
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::NULL
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Entity({})", self.0)
    }
}

/// Hands out monotonically increasing entity IDs. Safe to share.
#[derive(Debug)]
pub struct EntityIdAllocator {
    next: AtomicU64,
}

impl EntityIdAllocator {
    /// Creates an allocator whose first ID is `first`.
    #[must_use]
    pub const fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    /// Allocates a fresh entity ID.
    pub fn allocate(&self) -> EntityId {
        EntityId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for EntityIdAllocator {
    fn default() -> Self {
        Self::starting_at(0)
    }
}

/// View direction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Heading {
    angle: f32,
    tilt: f32,
}

impl Heading {
    /// Creates a heading, wrapping the angle and clamping the tilt.
    #[must_use]
    pub fn new(angle: f32, tilt: f32) -> Self {
        let mut heading = Self::default();
        heading.set_angle(angle);
        heading.set_tilt(tilt);
        heading
    }

    /// Horizontal angle in `(-PI, PI]`.
    #[inline]
    #[must_use]
    pub const fn angle(&self) -> f32 {
        self.angle
    }

    /// Vertical tilt in `[-MAX_TILT, MAX_TILT]`.
    #[inline]
    #[must_use]
    pub const fn tilt(&self) -> f32 {
        self.tilt
    }

    /// Sets the horizontal angle, wrapping it into `(-PI, PI]`.
    pub fn set_angle(&mut self, angle: f32) {
        use std::f32::consts::{PI, TAU};
        let mut wrapped = angle.rem_euclid(TAU);
        if wrapped > PI {
            wrapped -= TAU;
        }
        self.angle = wrapped;
    }

    /// Sets the tilt, clamped to `[-MAX_TILT, MAX_TILT]`.
    pub fn set_tilt(&mut self, tilt: f32) {
        self.tilt = tilt.clamp(-MAX_TILT, MAX_TILT);
    }
}

/// Physical extent of a colliding entity (in blocks / kilograms).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Body {
    /// Mass.
    pub mass: f32,
    /// Horizontal radius.
    pub radius: f32,
    /// Height.
    pub height: f32,
}

/// Velocity and input state of a controllable entity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Movement {
    /// Current velocity in blocks per second.
    pub velocity: [f32; 3],
    /// Requested planar movement (strafe, forward).
    pub input: [f32; 2],
    /// Gravity is ignored while flying.
    pub fly_mode: bool,
    /// Whether the entity stood on ground after the last physics step.
    pub on_ground: bool,
}

/// A stack of one item definition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventorySlot {
    /// Item or block definition index.
    pub definition: u16,
    /// Number of items in the stack.
    pub amount: u32,
}

/// Item stacks carried by an entity.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    /// All stacks, in pickup order.
    pub slots: Vec<InventorySlot>,
    /// Index of the active tool slot, if any.
    pub active: Option<usize>,
}

impl Inventory {
    /// Adds one item, filling the first non-full stack of the same
    /// definition or opening a new stack.
    pub fn add(&mut self, definition: u16, stack_limit: u32) {
        let open = self
            .slots
            .iter_mut()
            .find(|slot| slot.definition == definition && slot.amount < stack_limit);

        match open {
            Some(slot) => slot.amount += 1,
            None => self.slots.push(InventorySlot {
                definition,
                amount: 1,
            }),
        }
    }

    /// Removes one item from the active slot and returns its definition.
    ///
    /// An emptied slot is removed and the active tool is cleared.
    pub fn take_active(&mut self) -> Option<u16> {
        let index = self.active?;
        let slot = self.slots.get_mut(index)?;
        let definition = slot.definition;
        slot.amount = slot.amount.saturating_sub(1);
        if slot.amount == 0 {
            self.slots.remove(index);
            self.active = None;
        }
        Some(definition)
    }

    /// Total number of items across all stacks.
    #[must_use]
    pub fn item_count(&self) -> u64 {
        self.slots.iter().map(|slot| u64::from(slot.amount)).sum()
    }
}

/// Marks an entity that keeps the world around it resident.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activation {
    /// Hard interest radius, in columns.
    pub range: i32,
}

/// Reported by [`Entity::move_to`] when an entity crosses into another
/// column or planet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ColumnChange {
    /// Region the entity left.
    pub from: RegionKey,
    /// Region the entity entered.
    pub to: RegionKey,
}

/// A game entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Stable identifier.
    pub id: EntityId,
    /// Current position.
    pub position: Coordinate,
    /// View direction.
    pub heading: Heading,
    /// Collision body.
    pub body: Option<Body>,
    /// Movement state.
    pub movement: Option<Movement>,
    /// Carried items.
    pub inventory: Option<Inventory>,
    /// Activation radius for observers.
    pub activation: Option<Activation>,
}

impl Entity {
    /// Creates a bare entity with no capabilities.
    #[must_use]
    pub fn new(id: EntityId, position: Coordinate) -> Self {
        Self {
            id,
            position,
            heading: Heading::default(),
            body: None,
            movement: None,
            inventory: None,
            activation: None,
        }
    }

    /// Static prop: position only.
    #[must_use]
    pub fn prop(id: EntityId, position: Coordinate) -> Self {
        Self::new(id, position)
    }

    /// Wandering animal: body and movement.
    #[must_use]
    pub fn dog(id: EntityId, position: Coordinate) -> Self {
        Self {
            body: Some(Body {
                mass: 100.0,
                radius: 0.5,
                height: 1.0,
            }),
            movement: Some(Movement::default()),
            ..Self::new(id, position)
        }
    }

    /// Player: body, movement, inventory and activation.
    #[must_use]
    pub fn player(id: EntityId, position: Coordinate) -> Self {
        Self {
            body: Some(Body {
                mass: 100.0,
                radius: 0.75,
                height: 3.5,
            }),
            movement: Some(Movement::default()),
            inventory: Some(Inventory::default()),
            activation: Some(Activation {
                range: PLAYER_ACTIVATION_RANGE,
            }),
            ..Self::new(id, position)
        }
    }

    /// Region the entity currently lies in.
    #[inline]
    #[must_use]
    pub const fn region(&self) -> RegionKey {
        RegionKey::of(&self.position)
    }

    /// Returns true if the entity keeps the world around it resident.
    #[inline]
    #[must_use]
    pub const fn is_observer(&self) -> bool {
        self.activation.is_some()
    }

    /// Moves the entity, reporting a column change if one happened.
    pub fn move_to(&mut self, position: Coordinate) -> Option<ColumnChange> {
        let from = self.region();
        self.position = position;
        let to = self.region();
        (from != to).then_some(ColumnChange { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::{BlockIndex, ColumnIndex};
    use crate::planet::PlanetId;

    fn at(x: i32, y: i32) -> Coordinate {
        Coordinate::at_block(PlanetId(0), BlockIndex::new(x, y, 64))
    }

    #[test]
    fn test_entity_id_null() {
        assert!(EntityId::NULL.is_null());
        assert!(EntityId::default().is_null());
        assert!(!EntityId::from_raw(0).is_null());
    }

    #[test]
    fn test_allocator_produces_unique_ids() {
        let alloc = EntityIdAllocator::starting_at(10);
        assert_eq!(alloc.allocate().raw(), 10);
        assert_eq!(alloc.allocate().raw(), 11);
    }

    #[test]
    fn test_heading_wraps_and_clamps() {
        let heading = Heading::new(2.5 * std::f32::consts::PI, 4.0);
        assert!((heading.angle() - std::f32::consts::FRAC_PI_2).abs() < 1e-4);
        assert_eq!(heading.tilt(), MAX_TILT);
    }

    #[test]
    fn test_move_within_column_reports_nothing() {
        let mut dog = Entity::dog(EntityId::from_raw(1), at(1, 1));
        assert!(dog.move_to(at(15, 15)).is_none());
    }

    #[test]
    fn test_move_across_column_reports_change() {
        let mut player = Entity::player(EntityId::from_raw(1), at(15, 0));
        let change = player.move_to(at(16, 0)).unwrap();
        assert_eq!(change.from.column, ColumnIndex::new(0, 0));
        assert_eq!(change.to.column, ColumnIndex::new(1, 0));
        assert!(player.is_observer());
    }

    #[test]
    fn test_inventory_stacks_up_to_limit() {
        let mut inventory = Inventory::default();
        for _ in 0..3 {
            inventory.add(7, 2);
        }
        assert_eq!(inventory.slots.len(), 2);
        assert_eq!(inventory.item_count(), 3);

        inventory.active = Some(1);
        assert_eq!(inventory.take_active(), Some(7));
        assert_eq!(inventory.slots.len(), 1);
        assert_eq!(inventory.active, None);
    }
}
