//! Persistent cache for raw tile data.
//!
//! Tiles are identified in the cache by a [`CacheKey`]: the tile coordinate together with the
//! name of the tile provider. The provider name is derived from the tile URL by the
//! [`ProviderKey`] strategy of the layer.

use async_trait::async_trait;
use bytes::Bytes;
use meridian_types::TileCoordinate;
use serde::{Deserialize, Serialize};

use crate::error::TileError;

mod sqlite;
pub use sqlite::{StoreState, TileCacheStore, DEFAULT_CACHE_FILE};

/// Identifies one cache entry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheKey {
    /// Position of the tile.
    pub coordinate: TileCoordinate,
    /// Name of the tile provider.
    pub provider: String,
}

impl CacheKey {
    /// Creates a new key.
    pub fn new(coordinate: TileCoordinate, provider: impl Into<String>) -> Self {
        Self {
            coordinate,
            provider: provider.into(),
        }
    }
}

/// Strategy to name the provider part of a [`CacheKey`].
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKey {
    /// Takes the third `/`-separated element of the tile URL, which is the authority for
    /// `scheme://authority/...` URLs.
    ///
    /// This is the naming used by existing cache files, but URLs in other shapes may produce
    /// an empty or shared provider name.
    #[default]
    UrlAuthority,
    /// Uses the given name for every tile of the layer.
    Explicit(String),
}

impl ProviderKey {
    /// Provider name for the tile loaded from `url`.
    pub fn provider_name(&self, url: &str) -> String {
        match self {
            Self::UrlAuthority => url.split('/').nth(2).unwrap_or_default().to_owned(),
            Self::Explicit(name) => name.clone(),
        }
    }

    /// Cache key for the tile at `coordinate` loaded from `url`.
    pub fn cache_key(&self, coordinate: TileCoordinate, url: &str) -> CacheKey {
        CacheKey::new(coordinate, self.provider_name(url))
    }
}

/// Persistent storage of raw tile data.
///
/// Has no eviction: entries are only ever replaced by newer data for the same key.
#[async_trait]
pub trait PersistentTileCache: Send + Sync {
    /// Returns the stored data for the exact key, if any.
    async fn get(&self, key: &CacheKey) -> Option<Bytes>;
    /// Inserts the data, replacing an existing entry with the same key.
    async fn insert(&self, key: &CacheKey, data: &Bytes) -> Result<(), TileError>;
}
