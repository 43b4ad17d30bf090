//! Provides access to the network through the [`TileFetcher`] trait.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::TileError;

mod native;
pub use native::HttpTileFetcher;

/// Issues network requests for tile data.
///
/// The returned future is dropped when the request is cancelled, so implementations must
/// abort the underlying operation on drop.
#[async_trait]
pub trait TileFetcher: Send + Sync {
    /// Loads a byte array from the given url.
    async fn fetch(&self, url: &str) -> Result<Bytes, TileError>;
}
