//! Error type used by the crate.

use thiserror::Error;

/// Error enum.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TileTypesError {
    /// Input string could not be parsed into a value.
    #[error("cannot parse {input:?}: {reason}")]
    Parse {
        /// The rejected input.
        input: String,
        /// What was wrong with it.
        reason: &'static str,
    },
    /// Coordinate is outside of the tile grid.
    #[error("tile coordinate {0} is outside of the tile grid")]
    OutOfGrid(String),
}
