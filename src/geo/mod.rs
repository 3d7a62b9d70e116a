//! Geographic primitives for the crawl
//!
//! This module contains:
//! - Bounding boxes and tile centers
//! - The grid planner that covers a bounding box with overlapping tiles
//! - Boundary lookup through the Overpass API (with a disk cache)
//! - Viewport coverage math used to size grid cells
//! - Coordinate-derived place identifiers

mod bbox;
mod coverage;
mod grid;
mod place_id;

pub use bbox::{BboxError, BoundingBoxSource, OverpassClient, DEFAULT_OVERPASS_ENDPOINTS};
pub use coverage::{
    cell_size_from_coverage, fallback_meters_per_pixel, plan_cell_size, CellSize, Coverage,
};
pub use grid::{
    generate_grid, km_per_degree_longitude, KM_PER_DEGREE_LATITUDE, KM_PER_DEGREE_LONGITUDE,
};
pub use place_id::{make_place_id, parse_lat_lng, place_id_from_href};

use serde::{Deserialize, Serialize};

/// Geographic rectangle in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub min_lng: f64,
    pub max_lat: f64,
    pub max_lng: f64,
}

impl BoundingBox {
    pub fn new(min_lat: f64, min_lng: f64, max_lat: f64, max_lng: f64) -> Self {
        Self {
            min_lat,
            min_lng,
            max_lat,
            max_lng,
        }
    }

    /// Center point as (lat, lng)
    pub fn center(&self) -> (f64, f64) {
        (
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lng + self.max_lng) / 2.0,
        )
    }

    /// Returns true if the point lies inside the box (edges included)
    pub fn contains(&self, lat: f64, lng: f64) -> bool {
        lat >= self.min_lat && lat <= self.max_lat && lng >= self.min_lng && lng <= self.max_lng
    }
}

/// Center of one grid cell
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TilePoint {
    /// Position in row-major enumeration order
    pub index: u32,
    pub row: u32,
    pub col: u32,
    pub latitude: f64,
    pub longitude: f64,
}
