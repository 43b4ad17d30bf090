//! Meridian is an online raster tile layer. It loads map tiles from a tile server, keeps them
//! in a SQLite tile cache and hands decoded tiles to the application.
//!
//! # Quick start
//!
//! ```no_run
//! use meridian::layer::{OnlineTileLayerBuilder, Tile};
//! use meridian::meridian_types::TileCoordinate;
//!
//! # tokio_test::block_on(async {
//! let layer = OnlineTileLayerBuilder::new_osm()
//!     .with_default_cache_db()
//!     .with_consumer(|coordinate: TileCoordinate, tile: Tile| {
//!         println!("{coordinate}: {}x{}", tile.image().width(), tile.image().height());
//!     })
//!     .build()
//!     .await?;
//!
//! layer.request(TileCoordinate::new(0, 0, 0));
//! # Ok::<(), meridian::error::TileError>(())
//! # });
//! ```
//!
//! # Main components
//!
//! * [`OnlineTileLayer`](layer::OnlineTileLayer) coordinates the requests. It keeps at most one
//!   request per tile in flight, looks up the cache before going to the network and writes
//!   loaded tiles back to the cache.
//! * [`TileCacheStore`](cache::TileCacheStore) is the persistent cache: a single SQLite table
//!   keyed by zoom, x, y and the tile provider. A store that cannot be opened does not stop
//!   the layer, it just turns every lookup into a miss.
//! * [`UrlTemplate`](layer::UrlTemplate) and any [`UrlSource`](layer::UrlSource) closure
//!   resolve the URL of a tile.
//! * [`TileFetcher`](platform::TileFetcher) and [`TileDecoder`](decoded_image::TileDecoder)
//!   load and decode the tile images. Both can be replaced, for example to read tiles from a
//!   local server or to keep them in a different pixel format.
//!
//! The crate logs through the [`log`] facade. Install any logger, e.g. `env_logger`, to see
//! what the layer does.

#![warn(clippy::unwrap_used)]
#![warn(missing_docs)]

pub(crate) mod async_runtime;
pub mod cache;
pub mod decoded_image;
pub mod error;
pub mod layer;
pub mod platform;

#[cfg(test)]
pub(crate) mod tests;

pub use layer::{OnlineTileLayer, OnlineTileLayerBuilder};

// Reexport meridian_types
pub use meridian_types;
