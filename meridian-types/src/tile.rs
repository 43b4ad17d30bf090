//! [`TileCoordinate`] identifies a tile in the standard Web Mercator tile grid, where tile
//! `0/0/0` covers the whole world and `y` grows from north to south.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TileTypesError;
use crate::{GeoPoint2d, GeoRect};

/// Maximum zoom level for which tile indices still fit into `i32`.
pub const MAX_ZOOM: u32 = 30;

/// Latitude limit of the Web Mercator projection, in degrees.
pub const MAX_LATITUDE: f64 = 85.051_128_779_806_59;

/// Position of a tile in the zoom-level grid.
///
/// Ordering is by zoom level first, then by `x` and `y`, so that sorted sets of coordinates
/// group tiles of the same level together.
#[derive(
    Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TileCoordinate {
    /// Zoom level.
    pub zoom: u32,
    /// Column, counted from the antimeridian eastwards.
    pub x: i32,
    /// Row, counted from the north edge of the grid southwards.
    pub y: i32,
}

impl TileCoordinate {
    /// Creates a new coordinate. The value is not checked against the grid, use
    /// [`TileCoordinate::is_in_grid`] for that.
    pub const fn new(zoom: u32, x: i32, y: i32) -> Self {
        Self { zoom, x, y }
    }

    /// Number of tiles along one side of the grid at this zoom level.
    ///
    /// Returns `None` if the zoom level is above [`MAX_ZOOM`].
    pub fn grid_size(&self) -> Option<i64> {
        (self.zoom <= MAX_ZOOM).then(|| 1_i64 << self.zoom)
    }

    /// Returns true if the coordinate addresses an existing tile of the grid.
    pub fn is_in_grid(&self) -> bool {
        match self.grid_size() {
            Some(size) => {
                (0..size).contains(&(self.x as i64)) && (0..size).contains(&(self.y as i64))
            }
            None => false,
        }
    }

    /// Geographic rectangle covered by the tile.
    ///
    /// Returns `None` if the coordinate is outside of the grid.
    pub fn to_geo_rect(&self) -> Option<GeoRect> {
        if !self.is_in_grid() {
            return None;
        }

        let size = self.grid_size()? as f64;
        let lon_min = tile_x_to_lon(self.x as f64, size);
        let lon_max = tile_x_to_lon(self.x as f64 + 1.0, size);
        let lat_max = tile_y_to_lat(self.y as f64, size);
        let lat_min = tile_y_to_lat(self.y as f64 + 1.0, size);

        Some(GeoRect::new(lat_min, lon_min, lat_max, lon_max))
    }

    /// Coordinate of the tile at the given zoom level that contains the point.
    ///
    /// Latitudes beyond [`MAX_LATITUDE`] are clamped to the edge of the grid. Returns `None` for
    /// non-finite input or zoom levels above [`MAX_ZOOM`].
    pub fn containing(point: &GeoPoint2d, zoom: u32) -> Option<Self> {
        if !point.lat().is_finite() || !point.lon().is_finite() || zoom > MAX_ZOOM {
            return None;
        }

        let size = (1_i64 << zoom) as f64;
        let lat = point.lat().clamp(-MAX_LATITUDE, MAX_LATITUDE).to_radians();
        let lon = point.lon().clamp(-180.0, 180.0);

        let x = ((lon + 180.0) / 360.0 * size).floor();
        let y = ((1.0 - (lat.tan() + 1.0 / lat.cos()).ln() / std::f64::consts::PI) / 2.0 * size)
            .floor();

        let max_index = size - 1.0;
        Some(Self {
            zoom,
            x: x.clamp(0.0, max_index) as i32,
            y: y.clamp(0.0, max_index) as i32,
        })
    }
}

fn tile_x_to_lon(x: f64, size: f64) -> f64 {
    x / size * 360.0 - 180.0
}

fn tile_y_to_lat(y: f64, size: f64) -> f64 {
    let n = std::f64::consts::PI * (1.0 - 2.0 * y / size);
    n.sinh().atan().to_degrees()
}

impl Display for TileCoordinate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}

impl FromStr for TileCoordinate {
    type Err = TileTypesError;

    /// Parses the `z/x/y` notation used by [`Display`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let error = |reason| TileTypesError::Parse {
            input: s.to_owned(),
            reason,
        };

        let mut parts = s.trim().split('/');
        let (Some(zoom), Some(x), Some(y), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(error("expected three '/' separated values"));
        };

        Ok(Self {
            zoom: zoom.parse().map_err(|_| error("invalid zoom level"))?,
            x: x.parse().map_err(|_| error("invalid x index"))?,
            y: y.parse().map_err(|_| error("invalid y index"))?,
        })
    }
}

impl TryFrom<(u32, i32, i32)> for TileCoordinate {
    type Error = TileTypesError;

    /// Creates a coordinate from a `(zoom, x, y)` triple, rejecting values outside of the grid.
    fn try_from((zoom, x, y): (u32, i32, i32)) -> Result<Self, Self::Error> {
        let coordinate = Self::new(zoom, x, y);
        if coordinate.is_in_grid() {
            Ok(coordinate)
        } else {
            Err(TileTypesError::OutOfGrid(coordinate.to_string()))
        }
    }
}
