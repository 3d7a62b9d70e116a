//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::geo::TilePoint;
use crate::state::{PlaceStatus, TileStatus};
use crate::storage::{
    FailedPlaceFilter, FieldWarning, PlaceFields, PlaceRecord, PlaceRef, RunGeometry, RunRecord,
    TileCounts, TileRecord, TileSeed,
};
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Tile not found: {city}/{query}#{index}")]
    TileNotFound {
        city: String,
        query: String,
        index: u32,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// Every method commits before returning. Implementations are shared between the
/// driver, tile workers and the result writer, so they take `&self` and must be
/// safe to call from several threads.
pub trait Storage: Send + Sync {
    // ===== Run Management =====

    /// Records a new crawl run
    fn start_run(&self, run: &RunRecord) -> StorageResult<()>;

    /// Backfills run geometry; `None` fields keep their stored value
    fn update_run_meta(&self, run_id: &str, geometry: &RunGeometry) -> StorageResult<()>;

    /// Gets a run by ID
    fn get_run(&self, run_id: &str) -> StorageResult<RunRecord>;

    // ===== Tile Management =====

    /// Lists the tiles of a city/query ordered by index
    fn list_tiles(&self, city: &str, query: &str) -> StorageResult<Vec<TileRecord>>;

    /// Inserts tiles, or refreshes geometry and URL of existing ones
    ///
    /// Existing rows keep their status and counters. All rows are written in one
    /// transaction.
    ///
    /// # Arguments
    ///
    /// * `city` - City the grid belongs to
    /// * `query` - Search text of the crawl
    /// * `seeds` - Tiles to write
    fn init_tiles(&self, city: &str, query: &str, seeds: &[TileSeed]) -> StorageResult<()>;

    /// Gets the status of one tile, if it exists
    fn get_tile_status(
        &self,
        city: &str,
        query: &str,
        tile_index: u32,
    ) -> StorageResult<Option<TileStatus>>;

    /// Marks a tile in progress
    ///
    /// Upsert: creates the row if needed, clears the last error and resets the result
    /// counter regardless of the previous status.
    fn set_tile_in_progress(&self, city: &str, query: &str, tile: &TilePoint)
        -> StorageResult<()>;

    /// Marks a tile completed with its final counters
    fn set_tile_completed(
        &self,
        city: &str,
        query: &str,
        tile_index: u32,
        counts: TileCounts,
    ) -> StorageResult<()>;

    /// Marks a tile failed with the error text
    fn set_tile_failed(
        &self,
        city: &str,
        query: &str,
        tile_index: u32,
        error_text: &str,
    ) -> StorageResult<()>;

    /// Attaches a note to a tile without changing its status
    fn set_tile_note(&self, city: &str, query: &str, tile_index: u32, note: &str)
        -> StorageResult<()>;

    /// Moves every in-progress tile back to pending
    ///
    /// # Returns
    ///
    /// The number of tiles reset
    fn reset_in_progress(&self, city: &str, query: &str) -> StorageResult<usize>;

    /// Moves every failed tile back to pending
    fn reset_failed_tiles(&self, city: &str, query: &str) -> StorageResult<usize>;

    /// Sets the canonical URL of a tile
    fn update_tile_url(&self, city: &str, query: &str, tile_index: u32, url: &str)
        -> StorageResult<()>;

    /// Recomputes processed and failed counters of a tile from its place rows
    fn refresh_tile_counters(&self, city: &str, query: &str, tile_index: u32)
        -> StorageResult<TileCounts>;

    // ===== Place Management =====

    /// Returns true if a successful (or legacy status-less) record exists
    ///
    /// Failed records do not count, so failed places are picked up again.
    fn place_exists(&self, place_id: &str) -> StorageResult<bool>;

    /// Writes a successful extraction; last write wins
    fn upsert_place_success(&self, place: &PlaceRef, fields: &PlaceFields) -> StorageResult<()>;

    /// Writes a failed extraction; previously extracted fields are kept
    fn upsert_place_failure(
        &self,
        place: &PlaceRef,
        last_error: &str,
        warnings: &[FieldWarning],
    ) -> StorageResult<()>;

    /// Gets a place by ID
    fn get_place(&self, place_id: &str) -> StorageResult<Option<PlaceRecord>>;

    /// Selects failed place ids, most recently attempted first
    fn select_failed_places(&self, filter: &FailedPlaceFilter) -> StorageResult<Vec<String>>;

    // ===== Statistics =====

    /// Counts tiles of a city/query per status
    fn tile_status_summary(&self, city: &str, query: &str)
        -> StorageResult<HashMap<TileStatus, u64>>;

    /// Counts places with the given status
    fn count_places_by_status(&self, status: PlaceStatus) -> StorageResult<u64>;
}
