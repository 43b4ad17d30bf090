//! Tile layers and their url sources.

pub mod online_tile_layer;
mod url_source;

pub use online_tile_layer::{
    FetchOptions, FetchOutcome, OnlineTileLayer, OnlineTileLayerBuilder, RequestStatus, Tile,
    TileConsumer, TileSource,
};
pub use url_source::{UrlSource, UrlTemplate};
