//! Storage module for persisting crawl progress
//!
//! This module handles all database operations for the crawler, including:
//! - SQLite database initialization and schema management
//! - Run metadata and geometry
//! - Tile lifecycle and counters
//! - Place records, deduplicated by a global place id

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult};

use crate::geo::TilePoint;
use crate::state::{PlaceStatus, TileStatus};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Opens (or creates) the crawl database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file; parent directories are created
///
/// # Returns
///
/// * `Ok(SqliteStorage)` - Successfully initialized storage
/// * `Err(StorageError)` - Failed to open the database
pub fn open_storage(path: &Path) -> StorageResult<SqliteStorage> {
    SqliteStorage::new(path)
}

/// Represents a crawl run
#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub run_id: String,
    pub started_at: String,
    pub city: String,
    pub country: Option<String>,
    pub query: String,
    pub zoom: u8,
    pub language: String,
    pub config_hash: Option<String>,
    pub geometry: RunGeometry,
}

/// Geometry fields of a run, backfilled once the grid has been sized
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunGeometry {
    pub window_width_px: Option<u32>,
    pub window_height_px: Option<u32>,
    pub viewport_width_px: Option<u32>,
    pub viewport_height_px: Option<u32>,
    pub meters_per_pixel: Option<f64>,
    pub cell_width_km: Option<f64>,
    pub cell_height_km: Option<f64>,
    pub overlap_ratio: Option<f64>,
}

/// Input row for `init_tiles`
#[derive(Debug, Clone, PartialEq)]
pub struct TileSeed {
    pub point: TilePoint,
    pub url: String,
    pub window_width_px: Option<u32>,
    pub window_height_px: Option<u32>,
    pub viewport_width_px: Option<u32>,
    pub viewport_height_px: Option<u32>,
}

/// Represents a tile in the database
#[derive(Debug, Clone, PartialEq)]
pub struct TileRecord {
    pub city: String,
    pub query: String,
    pub tile_index: u32,
    pub row: u32,
    pub col: u32,
    pub latitude: f64,
    pub longitude: f64,
    pub url: Option<String>,
    pub status: TileStatus,
    pub result_count: u32,
    pub processed_count: u32,
    pub failed_count: u32,
    pub updated_at: Option<String>,
    pub last_error: Option<String>,
}

impl TileRecord {
    pub fn point(&self) -> TilePoint {
        TilePoint {
            index: self.tile_index,
            row: self.row,
            col: self.col,
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }
}

/// Counters written when a tile completes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TileCounts {
    /// Places discovered on the tile
    pub result_count: u32,
    pub processed_count: u32,
    pub failed_count: u32,
}

/// Identity and provenance of a place, shared by success and failure rows
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceRef {
    pub place_id: String,
    pub city: String,
    pub query: String,
    pub tile_index: u32,
    pub name: String,
    pub href: String,
    pub lat: f64,
    pub lng: f64,
    pub run_id: String,
}

/// Non-fatal problem with one optional field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldWarning {
    pub field: String,
    pub error: String,
}

/// Fields extracted from a place page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaceFields {
    pub address: String,
    pub location: String,
    pub phone: String,
    pub plus_code: String,
    pub website: String,
    pub social_media_urls: Vec<String>,
    pub open_time: String,
    /// Contact bundle gathered from linked sites, stored as-is
    pub contacts: serde_json::Value,
    pub warnings: Vec<FieldWarning>,
}

/// Represents a place in the database
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceRecord {
    pub place: PlaceRef,
    pub status: PlaceStatus,
    pub fields: PlaceFields,
    pub last_error: Option<String>,
    pub extracted_at: Option<String>,
}

/// Selection criteria for failed places
#[derive(Debug, Clone, Default)]
pub struct FailedPlaceFilter {
    pub city: Option<String>,
    pub query: Option<String>,
    /// Only places whose last error is one of these codes; empty means any
    pub error_codes: Vec<String>,
}
