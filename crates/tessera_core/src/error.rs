//! # Core Error Types

use thiserror::Error;

/// Errors raised while building core world types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A planet must have at least one column on each axis.
    #[error("invalid size for planet {planet}: {x}x{y} columns")]
    InvalidPlanetSize {
        /// The planet being created.
        planet: i32,
        /// Requested width.
        x: i32,
        /// Requested depth.
        y: i32,
    },
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
