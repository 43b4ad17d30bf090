//! Value types shared by the `meridian` tile layer: tile coordinates of the Web Mercator tile
//! grid and geographic rectangles covered by the tiles.
//!
//! ```
//! use meridian_types::{latlon, TileCoordinate};
//!
//! let tile = TileCoordinate::containing(&latlon!(37.566, 126.9784), 10).unwrap();
//! let rect = tile.to_geo_rect().unwrap();
//! assert!(rect.contains(&latlon!(37.566, 126.9784)));
//! ```

pub mod error;

mod geo_point;
pub use geo_point::GeoPoint2d;

mod geo_rect;
pub use geo_rect::GeoRect;

pub mod tile;
pub use tile::TileCoordinate;
