//! # Coordinates
//!
//! The world surface is a grid of columns. Each column is
//! `COLUMN_SIZE x COLUMN_SIZE` blocks wide and unbounded in height.
//!
//! ## Addressing
//!
//! ```text
//! Coordinate ──> BlockIndex ──> ColumnIndex
//!  (precise)     (integer)      (block / COLUMN_SIZE, Euclidean)
//! ```
//!
//! All divisions are Euclidean so negative blocks land in negative
//! columns (`-1 / 16 = -1`, not `0`).

use serde::{Deserialize, Serialize};

use crate::planet::PlanetId;

/// Column width/depth in blocks.
pub const COLUMN_SIZE: i32 = 16;

/// Address of a column on a planet surface.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ColumnIndex {
    /// X coordinate (in columns, not blocks).
    pub x: i32,
    /// Y coordinate (in columns, not blocks).
    pub y: i32,
}

impl ColumnIndex {
    /// Creates a new column index.
    #[inline]
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Converts a block position to the column containing it.
    #[inline]
    #[must_use]
    pub const fn from_block(block_x: i32, block_y: i32) -> Self {
        Self {
            x: block_x.div_euclid(COLUMN_SIZE),
            y: block_y.div_euclid(COLUMN_SIZE),
        }
    }

    /// Returns this index offset by `(dx, dy)` columns.
    #[inline]
    #[must_use]
    pub const fn offset(self, dx: i32, dy: i32) -> Self {
        Self {
            x: self.x.wrapping_add(dx),
            y: self.y.wrapping_add(dy),
        }
    }

    /// Wraps this index into `[0, size.x) x [0, size.y)`.
    ///
    /// `size` must be positive in both axes; [`crate::Planet`] guarantees
    /// that for every planet it hands out.
    #[inline]
    #[must_use]
    pub const fn normalize(self, size: ColumnIndex) -> Self {
        Self {
            x: self.x.rem_euclid(size.x),
            y: self.y.rem_euclid(size.y),
        }
    }
}

impl std::fmt::Display for ColumnIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Integer block address in the world.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockIndex {
    /// X coordinate in blocks.
    pub x: i32,
    /// Y coordinate in blocks.
    pub y: i32,
    /// Z coordinate (height) in blocks.
    pub z: i32,
}

impl BlockIndex {
    /// Creates a new block index.
    #[inline]
    #[must_use]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Returns the column containing this block.
    #[inline]
    #[must_use]
    pub const fn column(self) -> ColumnIndex {
        ColumnIndex::from_block(self.x, self.y)
    }
}

/// Precise position of something on a planet.
///
/// `offset` is the position inside the block and is kept in `[0, 1)` on
/// every axis by [`Coordinate::translate`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    /// Planet the position lies on.
    pub planet: PlanetId,
    /// Block containing the position.
    pub block: BlockIndex,
    /// Sub-block offset.
    pub offset: [f32; 3],
}

impl Coordinate {
    /// Creates a coordinate at the origin corner of a block.
    #[inline]
    #[must_use]
    pub const fn at_block(planet: PlanetId, block: BlockIndex) -> Self {
        Self {
            planet,
            block,
            offset: [0.0; 3],
        }
    }

    /// Creates a coordinate with an explicit sub-block offset.
    ///
    /// The offset is folded into the block index if it leaves `[0, 1)`.
    #[must_use]
    pub fn new(planet: PlanetId, block: BlockIndex, offset: [f32; 3]) -> Self {
        Self::at_block(planet, block).translate(offset)
    }

    /// Returns the column this coordinate lies in.
    #[inline]
    #[must_use]
    pub const fn column(&self) -> ColumnIndex {
        self.block.column()
    }

    /// Moves the coordinate by `delta` blocks, carrying whole blocks from
    /// the offset into the block index.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn translate(mut self, delta: [f32; 3]) -> Self {
        let mut carry = [0i32; 3];
        for axis in 0..3 {
            let value = self.offset[axis] + delta[axis];
            let whole = value.floor();
            self.offset[axis] = value - whole;
            carry[axis] = whole as i32;
        }
        self.block = BlockIndex::new(
            self.block.x.wrapping_add(carry[0]),
            self.block.y.wrapping_add(carry[1]),
            self.block.z.wrapping_add(carry[2]),
        );
        self
    }

    /// Wraps the block index into a planet of `size` columns.
    #[must_use]
    pub fn normalize(mut self, size: ColumnIndex) -> Self {
        self.block.x = self.block.x.rem_euclid(size.x * COLUMN_SIZE);
        self.block.y = self.block.y.rem_euclid(size.y * COLUMN_SIZE);
        self
    }
}
