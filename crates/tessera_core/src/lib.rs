//! # TESSERA Core
//!
//! Shared world types for the streaming engine.
//!
//! ## Contents
//!
//! - `ColumnIndex`, `BlockIndex`, `Coordinate`: addressing on a planet
//! - `Planet`, `RegionKey`: wrap-around planets and the column keys the
//!   streaming cache indexes by
//! - `Entity`: data entity with optional capability records
//!
//! ## Example
//!
//! ```rust,ignore
//! use tessera_core::{ColumnIndex, Planet, PlanetId};
//!
//! let planet = Planet::new(PlanetId(1), ColumnIndex::new(64, 64))?;
//! let key = planet.region_key(ColumnIndex::new(-1, 0)); // wraps to (63, 0)
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod coord;
pub mod entity;
pub mod error;
pub mod planet;

pub use coord::{BlockIndex, ColumnIndex, Coordinate, COLUMN_SIZE};
pub use entity::{
    Activation, Body, ColumnChange, Entity, EntityId, EntityIdAllocator, Heading, Inventory,
    InventorySlot, Movement, PLAYER_ACTIVATION_RANGE,
};
pub use error::{CoreError, CoreResult};
pub use planet::{Planet, PlanetId, RegionKey};
