use approx::AbsDiffEq;
use serde::{Deserialize, Serialize};

use crate::GeoPoint2d;

/// Rectangle on the surface of the Earth bounded by two parallels and two meridians.
///
/// All values are in degrees. The rectangle never crosses the antimeridian, so
/// `lon_min <= lon_max` always holds for rectangles produced by this crate.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoRect {
    lat_min: f64,
    lon_min: f64,
    lat_max: f64,
    lon_max: f64,
}

impl GeoRect {
    /// Creates a new rectangle. The bounds are normalized so that the minimum values are always
    /// less or equal to the maximum ones.
    pub fn new(lat_min: f64, lon_min: f64, lat_max: f64, lon_max: f64) -> Self {
        Self {
            lat_min: lat_min.min(lat_max),
            lon_min: lon_min.min(lon_max),
            lat_max: lat_min.max(lat_max),
            lon_max: lon_min.max(lon_max),
        }
    }

    /// Southern bound.
    pub fn lat_min(&self) -> f64 {
        self.lat_min
    }

    /// Western bound.
    pub fn lon_min(&self) -> f64 {
        self.lon_min
    }

    /// Northern bound.
    pub fn lat_max(&self) -> f64 {
        self.lat_max
    }

    /// Eastern bound.
    pub fn lon_max(&self) -> f64 {
        self.lon_max
    }

    /// Top-left (north-west) corner.
    pub fn top_left(&self) -> GeoPoint2d {
        GeoPoint2d::latlon(self.lat_max, self.lon_min)
    }

    /// Bottom-right (south-east) corner.
    pub fn bottom_right(&self) -> GeoPoint2d {
        GeoPoint2d::latlon(self.lat_min, self.lon_max)
    }

    /// Center of the rectangle in degrees.
    pub fn center(&self) -> GeoPoint2d {
        GeoPoint2d::latlon(
            (self.lat_min + self.lat_max) / 2.0,
            (self.lon_min + self.lon_max) / 2.0,
        )
    }

    /// Returns true if the point is inside the rectangle or on its border.
    pub fn contains(&self, point: &GeoPoint2d) -> bool {
        point.lat() >= self.lat_min
            && point.lat() <= self.lat_max
            && point.lon() >= self.lon_min
            && point.lon() <= self.lon_max
    }

    /// Returns true if the rectangles have at least one common point.
    pub fn intersects(&self, other: &GeoRect) -> bool {
        self.lat_min <= other.lat_max
            && self.lat_max >= other.lat_min
            && self.lon_min <= other.lon_max
            && self.lon_max >= other.lon_min
    }
}

impl AbsDiffEq for GeoRect {
    type Epsilon = f64;

    fn default_epsilon() -> Self::Epsilon {
        f64::default_epsilon()
    }

    fn abs_diff_eq(&self, other: &Self, epsilon: Self::Epsilon) -> bool {
        self.lat_min.abs_diff_eq(&other.lat_min, epsilon)
            && self.lon_min.abs_diff_eq(&other.lon_min, epsilon)
            && self.lat_max.abs_diff_eq(&other.lat_max, epsilon)
            && self.lon_max.abs_diff_eq(&other.lon_max, epsilon)
    }
}
