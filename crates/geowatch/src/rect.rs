//! Planar geometry in (longitude, latitude) degrees.

use rstar::AABB;
use serde::{
    Deserialize,
    Serialize,
};
use tracing::warn;

/// Longitude cap used when a rectangle is split at the antimeridian. Kept
/// slightly inside ±180 so the split halves never degenerate at the boundary.
pub const EASTMOST_LONGITUDE: f64 = 179.999_999_9;

/// Latitude cap used when a rectangle is split at a pole.
pub const NORTHMOST_LATITUDE: f64 = 89.999_999_9;

/// Side length of the fallback box substituted for a rectangle that fails the
/// planar validity check (south-west corner past the north-east corner).
const DEGENERATE_SIDE: f64 = 0.001;

/// A position on the sphere, in decimal degrees.
///
/// Longitude is the `x` axis and latitude the `y` axis everywhere in this
/// crate. Construction clamps out-of-range coordinates and maps non-finite
/// input to `0.0`, so a stored `Point` is always valid.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Point {
    longitude: f64,
    latitude: f64,
}

impl Point {
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            longitude: clamp_coordinate(longitude, 180.0),
            latitude: clamp_coordinate(latitude, 90.0),
        }
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }
}

fn clamp_coordinate(value: f64, limit: f64) -> f64 {
    if !value.is_finite() {
        warn!(value, "non-finite coordinate replaced with 0");
        return 0.0;
    }
    if value < -limit || value > limit {
        warn!(value, limit, "out-of-range coordinate clamped");
    }
    value.clamp(-limit, limit)
}

/// An axis-aligned rectangle between a south-west and a north-east corner.
///
/// A rectangle whose south-west longitude exceeds its north-east longitude
/// denotes a region crossing the antimeridian; one whose south-west latitude
/// exceeds its north-east latitude denotes a region crossing a pole. Such
/// rectangles are handled by [`Rect::split`]; stored or queried directly they
/// degrade to a tiny box around the south-west corner (see
/// [`Rect::envelope`]).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    south_west: Point,
    north_east: Point,
}

impl Rect {
    /// Builds a rectangle from `(min_lon, min_lat, max_lon, max_lat)`.
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self {
            south_west: Point::new(min_lon, min_lat),
            north_east: Point::new(max_lon, max_lat),
        }
    }

    pub fn from_corners(south_west: Point, north_east: Point) -> Self {
        Self {
            south_west,
            north_east,
        }
    }

    pub fn south_west(&self) -> Point {
        self.south_west
    }

    pub fn north_east(&self) -> Point {
        self.north_east
    }

    /// Splits an antimeridian- or pole-crossing rectangle into up to four
    /// normal rectangles covering the same area. A normal rectangle is
    /// returned unchanged as a singleton.
    ///
    /// The longitude split is applied first, then the latitude split to each
    /// intermediate rectangle.
    pub fn split(&self) -> Vec<Rect> {
        let mut rects = vec![*self];

        if self.south_west.longitude > self.north_east.longitude {
            rects = rects
                .iter()
                .flat_map(|r| {
                    [
                        // western half, up to the antimeridian
                        Rect::new(
                            r.south_west.longitude,
                            r.south_west.latitude,
                            EASTMOST_LONGITUDE,
                            r.north_east.latitude,
                        ),
                        // eastern half, from the antimeridian
                        Rect::new(
                            -EASTMOST_LONGITUDE,
                            r.south_west.latitude,
                            r.north_east.longitude,
                            r.north_east.latitude,
                        ),
                    ]
                })
                .collect();
        }

        if self.south_west.latitude > self.north_east.latitude {
            rects = rects
                .iter()
                .flat_map(|r| {
                    [
                        // northern half, up to the pole
                        Rect::new(
                            r.south_west.longitude,
                            r.south_west.latitude,
                            r.north_east.longitude,
                            NORTHMOST_LATITUDE,
                        ),
                        // southern half, from the opposite pole
                        Rect::new(
                            r.south_west.longitude,
                            -NORTHMOST_LATITUDE,
                            r.north_east.longitude,
                            r.north_east.latitude,
                        ),
                    ]
                })
                .collect();
        }

        rects
    }

    /// Planar closed-interval intersection test. Crossing rectangles are not
    /// special-cased here; split them first.
    pub fn intersects(&self, other: &Rect) -> bool {
        self.south_west.longitude <= other.north_east.longitude
            && other.south_west.longitude <= self.north_east.longitude
            && self.south_west.latitude <= other.north_east.latitude
            && other.south_west.latitude <= self.north_east.latitude
    }

    /// Converts to an R-tree envelope. A rectangle that fails the planar
    /// validity check degrades to a [`DEGENERATE_SIDE`]-sided box centered on
    /// its south-west corner.
    pub(crate) fn envelope(&self) -> AABB<[f64; 2]> {
        if self.south_west.longitude <= self.north_east.longitude
            && self.south_west.latitude <= self.north_east.latitude
        {
            AABB::from_corners(
                [self.south_west.longitude, self.south_west.latitude],
                [self.north_east.longitude, self.north_east.latitude],
            )
        } else {
            let half = DEGENERATE_SIDE / 2.0;
            AABB::from_corners(
                [
                    self.south_west.longitude - half,
                    self.south_west.latitude - half,
                ],
                [
                    self.south_west.longitude + half,
                    self.south_west.latitude + half,
                ],
            )
        }
    }
}
