//! Error types used by the crate.

use image::ImageError;
use meridian_types::error::TileTypesError;
use thiserror::Error;

/// Meridian error type.
#[derive(Debug, Error)]
pub enum TileError {
    /// The tile cache could not be opened or its schema could not be created.
    #[error("tile cache is unavailable: {0}")]
    StoreUnavailable(String),
    /// Writing an entry to the tile cache failed.
    #[error("failed to write tile cache entry: {0}")]
    StoreWrite(String),
    /// Error reported by the database engine.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// Transport level network error.
    #[error("network error: {0}")]
    Network(String),
    /// The tile server answered with a non-success status.
    #[error("tile server responded with status {0}")]
    HttpStatus(u16),
    /// The request was cancelled before it completed.
    #[error("request was cancelled")]
    Cancelled,
    /// The request did not complete in the configured time.
    #[error("request timed out")]
    TimedOut,
    /// Another request for the same tile is already in flight.
    #[error("tile is already being loaded")]
    AlreadyInFlight,
    /// Item not found.
    #[error("item not found")]
    NotFound,
    /// Tile coordinate does not address a tile of the grid.
    #[error("invalid tile coordinate: {0}")]
    InvalidCoordinate(#[from] TileTypesError),
    /// Image decoding error.
    #[error("image decode error: {0:?}")]
    ImageDecode(#[from] ImageError),
    /// Invalid layer configuration.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Generic error - details are inside.
    #[error("{0}")]
    Generic(String),
}

impl TileError {
    /// Returns true if the error is an expected outcome of cancelling a request rather than a
    /// failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::TimedOut)
    }
}

impl From<reqwest::Error> for TileError {
    fn from(value: reqwest::Error) -> Self {
        match value.status() {
            Some(status) => Self::HttpStatus(status.as_u16()),
            None => Self::Network(value.to_string()),
        }
    }
}
