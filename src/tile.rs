use crate::error::TileError;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Half the width of the web mercator plane in meters.
pub const EXTENT: f64 = 20037508.342789244;

/// Deepest zoom level for which tile indexes still fit in a `u32`.
pub const MAX_ZOOM: u8 = 30;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub longitude: f64,
    pub latitude: f64,
}

#[derive(Debug)]
pub struct Corners {
    pub north_west: GeoPoint,
    pub north_east: GeoPoint,
    pub south_west: GeoPoint,
    pub south_east: GeoPoint,
}

/// Axis aligned extent in EPSG:3857 meters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bounds {
    pub left: f64,
    pub bottom: f64,
    pub right: f64,
    pub top: f64,
}

impl Bounds {
    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    pub fn height(&self) -> f64 {
        self.top - self.bottom
    }

    /// True when the two extents share some area; touching edges do not count.
    pub fn intersects(&self, other: &Bounds) -> bool {
        self.left < other.right
            && other.left < self.right
            && self.bottom < other.top
            && other.bottom < self.top
    }

    /// Fraction of `self` covered by `other`.
    pub fn cover_ratio(&self, other: &Bounds) -> f64 {
        let x_overlap = (self.right.min(other.right) - self.left.max(other.left)).max(0.0);
        let y_overlap = (self.top.min(other.top) - self.bottom.max(other.bottom)).max(0.0);
        let area = self.width() * self.height();
        if area <= 0.0 {
            return 0.0;
        }
        x_overlap * y_overlap / area
    }

    /// Strict containment, a point on the edge is outside.
    pub fn contains(&self, point: &Point) -> bool {
        self.left < point.x && point.x < self.right && self.bottom < point.y && point.y < self.top
    }
}

/// Tile grids known to the tiler. Only the web mercator quad tree is supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileMatrixSet {
    WebMercatorQuad,
}

impl TileMatrixSet {
    pub fn id(&self) -> &'static str {
        match self {
            TileMatrixSet::WebMercatorQuad => "WebMercatorQuad",
        }
    }

    /// Whether `z/x/y` addresses a tile that exists in this grid.
    pub fn is_valid(&self, zoom: u8, x: u32, y: u32) -> bool {
        if zoom > MAX_ZOOM {
            return false;
        }
        let count = 1_u64 << zoom;
        (x as u64) < count && (y as u64) < count
    }

    pub fn xy_bounds(&self, zoom: u8, x: u32, y: u32) -> Bounds {
        match self {
            TileMatrixSet::WebMercatorQuad => xy_bounds(zoom, x, y),
        }
    }
}

impl fmt::Display for TileMatrixSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for TileMatrixSet {
    type Err = TileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "WebMercatorQuad" => Ok(TileMatrixSet::WebMercatorQuad),
            other => Err(TileError::UnknownTileMatrixSet(other.to_string())),
        }
    }
}

pub fn tile_corners(zoom: u8, x: u32, y: u32) -> Corners {
    let (x, y) = (x as f64, y as f64);
    Corners {
        north_west: square_to_geodetic(&tile_to_square(zoom, x, y)),
        north_east: square_to_geodetic(&tile_to_square(zoom, x + 1.0, y)),
        south_west: square_to_geodetic(&tile_to_square(zoom, x, y + 1.0)),
        south_east: square_to_geodetic(&tile_to_square(zoom, x + 1.0, y + 1.0)),
    }
}

/// Web mercator extent of a tile.
pub fn xy_bounds(zoom: u8, x: u32, y: u32) -> Bounds {
    let north_west = square_to_meters(&tile_to_square(zoom, x as f64, y as f64));
    let south_east = square_to_meters(&tile_to_square(zoom, x as f64 + 1.0, y as f64 + 1.0));
    Bounds {
        left: north_west.x,
        bottom: south_east.y,
        right: south_east.x,
        top: north_west.y,
    }
}

pub fn geodetic_to_square(point: &GeoPoint) -> Point {
    let pi = std::f64::consts::PI;
    // from https://wiki.openstreetmap.org/wiki/Slippy_map_tilenames
    let x = (point.longitude + 180.0) / 360.0;
    let lat_rad = point.latitude.to_radians();
    let y_web_mercator = (lat_rad.tan() + 1.0 / lat_rad.cos()).ln();
    let y = 0.5 - y_web_mercator / (2.0 * pi);
    Point { x, y }
}

pub fn geodetic_to_meters(point: &GeoPoint) -> Point {
    square_to_meters(&geodetic_to_square(point))
}

pub fn square_to_meters(point: &Point) -> Point {
    Point {
        x: point.x * 2.0 * EXTENT - EXTENT,
        y: (1.0 - point.y) * 2.0 * EXTENT - EXTENT,
    }
}

pub fn meters_to_square(point: &Point) -> Point {
    Point {
        x: (point.x + EXTENT) / (2.0 * EXTENT),
        y: 1.0 - (point.y + EXTENT) / (2.0 * EXTENT),
    }
}

/// Number of tiles along one axis at `zoom`.
fn tiles_per_axis(zoom: u8) -> f64 {
    2_f64.powi(zoom as i32)
}

pub fn square_to_tile(zoom: u8, point: &Point) -> Point {
    let zoom_scale = tiles_per_axis(zoom);
    Point {
        x: point.x * zoom_scale,
        y: point.y * zoom_scale,
    }
}

pub fn tile_to_square(zoom: u8, x: f64, y: f64) -> Point {
    let zoom_scale = tiles_per_axis(zoom);
    Point {
        x: x / zoom_scale,
        y: y / zoom_scale,
    }
}

pub fn square_to_geodetic(point: &Point) -> GeoPoint {
    let pi = std::f64::consts::PI;
    // from https://wiki.openstreetmap.org/wiki/Slippy_map_tilenames
    let longitude = point.x * 360.0 - 180.0;
    let latitude = (pi - point.y * 2.0 * pi).sinh().atan().to_degrees();
    GeoPoint {
        longitude,
        latitude,
    }
}
