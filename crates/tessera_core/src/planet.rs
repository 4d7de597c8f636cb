//! # Planets and Region Keys
//!
//! A planet is a finite, wrap-around grid of columns. Walking off the
//! east edge puts you on the west edge, so every column address is
//! normalized through the planet before it is used as a key.

use serde::{Deserialize, Serialize};

use crate::coord::{ColumnIndex, Coordinate};
use crate::error::{CoreError, CoreResult};

/// Planet identifier.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct PlanetId(pub i32);

impl std::fmt::Display for PlanetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "planet {}", self.0)
    }
}

/// A planet surface: identifier plus size in columns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Planet {
    id: PlanetId,
    size: ColumnIndex,
}

impl Planet {
    /// Creates a planet of `size` columns.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidPlanetSize`] if either axis is not
    /// positive.
    pub fn new(id: PlanetId, size: ColumnIndex) -> CoreResult<Self> {
        if size.x <= 0 || size.y <= 0 {
            return Err(CoreError::InvalidPlanetSize {
                planet: id.0,
                x: size.x,
                y: size.y,
            });
        }
        Ok(Self { id, size })
    }

    /// Returns the planet identifier.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> PlanetId {
        self.id
    }

    /// Returns the planet size in columns.
    #[inline]
    #[must_use]
    pub const fn size(&self) -> ColumnIndex {
        self.size
    }

    /// Wraps a column address onto this planet.
    #[inline]
    #[must_use]
    pub const fn normalize_column(&self, column: ColumnIndex) -> ColumnIndex {
        column.normalize(self.size)
    }

    /// Wraps a coordinate onto this planet.
    #[inline]
    #[must_use]
    pub fn normalize_coordinate(&self, coordinate: Coordinate) -> Coordinate {
        coordinate.normalize(self.size)
    }

    /// Returns the normalized region key for a column of this planet.
    #[inline]
    #[must_use]
    pub const fn region_key(&self, column: ColumnIndex) -> RegionKey {
        RegionKey::new(self.id, self.normalize_column(column))
    }
}

/// Identifies one column of one planet.
///
/// Keys are compared by value. The column is expected to be normalized
/// already; [`Planet::region_key`] is the usual way to build one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegionKey {
    /// Planet the column belongs to.
    pub planet: PlanetId,
    /// Column address on that planet.
    pub column: ColumnIndex,
}

impl RegionKey {
    /// Creates a region key.
    #[inline]
    #[must_use]
    pub const fn new(planet: PlanetId, column: ColumnIndex) -> Self {
        Self { planet, column }
    }

    /// Returns the key of the region a coordinate lies in.
    ///
    /// The coordinate must already be normalized onto its planet.
    #[inline]
    #[must_use]
    pub const fn of(coordinate: &Coordinate) -> Self {
        Self::new(coordinate.planet, coordinate.column())
    }
}

impl std::fmt::Display for RegionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} column {}", self.planet, self.column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::BlockIndex;

    #[test]
    fn test_planet_rejects_empty_size() {
        assert!(Planet::new(PlanetId(1), ColumnIndex::new(0, 4)).is_err());
        assert!(Planet::new(PlanetId(1), ColumnIndex::new(4, -1)).is_err());
        assert!(Planet::new(PlanetId(1), ColumnIndex::new(4, 4)).is_ok());
    }

    #[test]
    fn test_region_key_is_normalized() {
        let planet = Planet::new(PlanetId(2), ColumnIndex::new(10, 10)).unwrap();
        let key = planet.region_key(ColumnIndex::new(-1, 12));
        assert_eq!(key, RegionKey::new(PlanetId(2), ColumnIndex::new(9, 2)));
    }

    #[test]
    fn test_region_key_of_coordinate() {
        let coord = Coordinate::at_block(PlanetId(7), BlockIndex::new(33, 2, 0));
        assert_eq!(RegionKey::of(&coord), RegionKey::new(PlanetId(7), ColumnIndex::new(2, 0)));
    }
}
