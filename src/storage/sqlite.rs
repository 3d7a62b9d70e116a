//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::geo::TilePoint;
use crate::state::{PlaceStatus, TileStatus};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{
    FailedPlaceFilter, FieldWarning, PlaceFields, PlaceRecord, PlaceRef, RunGeometry, RunRecord,
    TileCounts, TileRecord, TileSeed,
};
use chrono::Utc;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Status predicate for rows that count as successfully extracted
const SUCCESS_PREDICATE: &str = "(status IS NULL OR status = '' OR status = 'success')";

const TILE_COLUMNS: &str = "city, query, tile_index, tile_row, tile_col, tile_center_lat,
    tile_center_lng, tile_url, status, result_count, processed_count, failed_count,
    updated_at, last_error";

const PLACE_COLUMNS: &str = "place_id, city, query, tile_index, name, href, lat, lng,
    address, location, phone, plus_code, website, social_media_urls, open_time,
    emails_phones_socials, status, last_error, warnings, extracted_at, run_id";

const RUN_COLUMNS: &str = "run_id, started_at, city, country, query, zoom, language,
    config_hash, window_width_px, window_height_px, viewport_width_px, viewport_height_px,
    mpp, cell_width_km, cell_height_km, overlap_ratio";

/// SQLite storage backend
///
/// One connection guarded by a mutex; each trait call holds the lock for exactly one
/// statement or transaction.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;

        // Configure SQLite for crash safety and concurrent readers
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory database (for tests and dry runs)
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

fn run_from_row(row: &Row) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        run_id: row.get(0)?,
        started_at: row.get(1)?,
        city: row.get(2)?,
        country: row.get(3)?,
        query: row.get(4)?,
        zoom: row.get::<_, Option<u8>>(5)?.unwrap_or_default(),
        language: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
        config_hash: row.get(7)?,
        geometry: RunGeometry {
            window_width_px: row.get(8)?,
            window_height_px: row.get(9)?,
            viewport_width_px: row.get(10)?,
            viewport_height_px: row.get(11)?,
            meters_per_pixel: row.get(12)?,
            cell_width_km: row.get(13)?,
            cell_height_km: row.get(14)?,
            overlap_ratio: row.get(15)?,
        },
    })
}

fn tile_from_row(row: &Row) -> rusqlite::Result<TileRecord> {
    Ok(TileRecord {
        city: row.get(0)?,
        query: row.get(1)?,
        tile_index: row.get(2)?,
        row: row.get(3)?,
        col: row.get(4)?,
        latitude: row.get(5)?,
        longitude: row.get(6)?,
        url: row.get(7)?,
        status: TileStatus::from_db_string(&row.get::<_, String>(8)?)
            .unwrap_or(TileStatus::Pending),
        result_count: row.get(9)?,
        processed_count: row.get(10)?,
        failed_count: row.get(11)?,
        updated_at: row.get(12)?,
        last_error: row.get(13)?,
    })
}

fn place_from_row(row: &Row) -> rusqlite::Result<PlaceRecord> {
    let text = |idx: usize| -> rusqlite::Result<String> {
        Ok(row.get::<_, Option<String>>(idx)?.unwrap_or_default())
    };

    let social_media_urls: Vec<String> =
        serde_json::from_str(&text(13)?).unwrap_or_default();
    let contacts: serde_json::Value = serde_json::from_str(&text(15)?).unwrap_or_default();
    let warnings: Vec<FieldWarning> = serde_json::from_str(&text(18)?).unwrap_or_default();

    Ok(PlaceRecord {
        place: PlaceRef {
            place_id: row.get(0)?,
            city: text(1)?,
            query: text(2)?,
            tile_index: row.get::<_, Option<u32>>(3)?.unwrap_or_default(),
            name: text(4)?,
            href: text(5)?,
            lat: row.get::<_, Option<f64>>(6)?.unwrap_or_default(),
            lng: row.get::<_, Option<f64>>(7)?.unwrap_or_default(),
            run_id: text(20)?,
        },
        status: PlaceStatus::from_db_value(row.get::<_, Option<String>>(16)?.as_deref())
            .unwrap_or(PlaceStatus::Failed),
        fields: PlaceFields {
            address: text(8)?,
            location: text(9)?,
            phone: text(10)?,
            plus_code: text(11)?,
            website: text(12)?,
            social_media_urls,
            open_time: text(14)?,
            contacts,
            warnings,
        },
        last_error: row.get(17)?,
        extracted_at: row.get(19)?,
    })
}

impl Storage for SqliteStorage {
    // ===== Run Management =====

    fn start_run(&self, run: &RunRecord) -> StorageResult<()> {
        let conn = self.conn()?;
        let g = &run.geometry;
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO runs ({}) VALUES
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                RUN_COLUMNS
            ),
            params![
                run.run_id,
                run.started_at,
                run.city,
                run.country,
                run.query,
                run.zoom,
                run.language,
                run.config_hash,
                g.window_width_px,
                g.window_height_px,
                g.viewport_width_px,
                g.viewport_height_px,
                g.meters_per_pixel,
                g.cell_width_km,
                g.cell_height_km,
                g.overlap_ratio,
            ],
        )?;
        Ok(())
    }

    fn update_run_meta(&self, run_id: &str, geometry: &RunGeometry) -> StorageResult<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE runs SET
                window_width_px = COALESCE(?1, window_width_px),
                window_height_px = COALESCE(?2, window_height_px),
                viewport_width_px = COALESCE(?3, viewport_width_px),
                viewport_height_px = COALESCE(?4, viewport_height_px),
                mpp = COALESCE(?5, mpp),
                cell_width_km = COALESCE(?6, cell_width_km),
                cell_height_km = COALESCE(?7, cell_height_km),
                overlap_ratio = COALESCE(?8, overlap_ratio)
             WHERE run_id = ?9",
            params![
                geometry.window_width_px,
                geometry.window_height_px,
                geometry.viewport_width_px,
                geometry.viewport_height_px,
                geometry.meters_per_pixel,
                geometry.cell_width_km,
                geometry.cell_height_km,
                geometry.overlap_ratio,
                run_id,
            ],
        )?;

        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id.to_string()));
        }
        Ok(())
    }

    fn get_run(&self, run_id: &str) -> StorageResult<RunRecord> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {} FROM runs WHERE run_id = ?1", RUN_COLUMNS),
            params![run_id],
            run_from_row,
        )
        .optional()?
        .ok_or_else(|| StorageError::RunNotFound(run_id.to_string()))
    }

    // ===== Tile Management =====

    fn list_tiles(&self, city: &str, query: &str) -> StorageResult<Vec<TileRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM tiles WHERE city = ?1 AND query = ?2 ORDER BY tile_index",
            TILE_COLUMNS
        ))?;

        let rows = stmt.query_map(params![city, query], tile_from_row)?;

        let mut tiles = Vec::new();
        for row in rows {
            tiles.push(row?);
        }
        Ok(tiles)
    }

    fn init_tiles(&self, city: &str, query: &str, seeds: &[TileSeed]) -> StorageResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO tiles (
                    city, query, tile_index, tile_row, tile_col, tile_center_lat,
                    tile_center_lng, tile_url, status, window_width_px, window_height_px,
                    viewport_width_px, viewport_height_px, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'pending', ?9, ?10, ?11, ?12, ?13)
                 ON CONFLICT(city, query, tile_index) DO UPDATE SET
                    tile_row = excluded.tile_row,
                    tile_col = excluded.tile_col,
                    tile_center_lat = excluded.tile_center_lat,
                    tile_center_lng = excluded.tile_center_lng,
                    tile_url = excluded.tile_url,
                    window_width_px = excluded.window_width_px,
                    window_height_px = excluded.window_height_px,
                    viewport_width_px = excluded.viewport_width_px,
                    viewport_height_px = excluded.viewport_height_px,
                    updated_at = excluded.updated_at",
            )?;

            let ts = now();
            for seed in seeds {
                stmt.execute(params![
                    city,
                    query,
                    seed.point.index,
                    seed.point.row,
                    seed.point.col,
                    seed.point.latitude,
                    seed.point.longitude,
                    seed.url,
                    seed.window_width_px,
                    seed.window_height_px,
                    seed.viewport_width_px,
                    seed.viewport_height_px,
                    ts,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn get_tile_status(
        &self,
        city: &str,
        query: &str,
        tile_index: u32,
    ) -> StorageResult<Option<TileStatus>> {
        let conn = self.conn()?;
        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM tiles WHERE city = ?1 AND query = ?2 AND tile_index = ?3",
                params![city, query, tile_index],
                |row| row.get(0),
            )
            .optional()?;

        Ok(status.and_then(|s| TileStatus::from_db_string(&s)))
    }

    fn set_tile_in_progress(
        &self,
        city: &str,
        query: &str,
        tile: &TilePoint,
    ) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO tiles (
                city, query, tile_index, tile_row, tile_col, tile_center_lat, tile_center_lng,
                status, result_count, updated_at, last_error
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'in_progress', 0, ?8, NULL)
             ON CONFLICT(city, query, tile_index) DO UPDATE SET
                status = 'in_progress',
                result_count = 0,
                last_error = NULL,
                updated_at = excluded.updated_at",
            params![
                city,
                query,
                tile.index,
                tile.row,
                tile.col,
                tile.latitude,
                tile.longitude,
                now(),
            ],
        )?;
        Ok(())
    }

    fn set_tile_completed(
        &self,
        city: &str,
        query: &str,
        tile_index: u32,
        counts: TileCounts,
    ) -> StorageResult<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE tiles SET status = 'completed', result_count = ?1, processed_count = ?2,
                failed_count = ?3, last_error = NULL, updated_at = ?4
             WHERE city = ?5 AND query = ?6 AND tile_index = ?7",
            params![
                counts.result_count,
                counts.processed_count,
                counts.failed_count,
                now(),
                city,
                query,
                tile_index,
            ],
        )?;
        ensure_tile_updated(updated, city, query, tile_index)
    }

    fn set_tile_failed(
        &self,
        city: &str,
        query: &str,
        tile_index: u32,
        error_text: &str,
    ) -> StorageResult<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE tiles SET status = 'failed', last_error = ?1, updated_at = ?2
             WHERE city = ?3 AND query = ?4 AND tile_index = ?5",
            params![error_text, now(), city, query, tile_index],
        )?;
        ensure_tile_updated(updated, city, query, tile_index)
    }

    fn set_tile_note(
        &self,
        city: &str,
        query: &str,
        tile_index: u32,
        note: &str,
    ) -> StorageResult<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE tiles SET last_error = ?1, updated_at = ?2
             WHERE city = ?3 AND query = ?4 AND tile_index = ?5",
            params![note, now(), city, query, tile_index],
        )?;
        ensure_tile_updated(updated, city, query, tile_index)
    }

    fn reset_in_progress(&self, city: &str, query: &str) -> StorageResult<usize> {
        let conn = self.conn()?;
        let reset = conn.execute(
            "UPDATE tiles SET status = 'pending', updated_at = ?1
             WHERE city = ?2 AND query = ?3 AND status = 'in_progress'",
            params![now(), city, query],
        )?;
        Ok(reset)
    }

    fn reset_failed_tiles(&self, city: &str, query: &str) -> StorageResult<usize> {
        let conn = self.conn()?;
        let reset = conn.execute(
            "UPDATE tiles SET status = 'pending', updated_at = ?1
             WHERE city = ?2 AND query = ?3 AND status = 'failed'",
            params![now(), city, query],
        )?;
        Ok(reset)
    }

    fn update_tile_url(
        &self,
        city: &str,
        query: &str,
        tile_index: u32,
        url: &str,
    ) -> StorageResult<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE tiles SET tile_url = ?1 WHERE city = ?2 AND query = ?3 AND tile_index = ?4",
            params![url, city, query, tile_index],
        )?;
        ensure_tile_updated(updated, city, query, tile_index)
    }

    fn refresh_tile_counters(
        &self,
        city: &str,
        query: &str,
        tile_index: u32,
    ) -> StorageResult<TileCounts> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let updated = tx.execute(
            &format!(
                "UPDATE tiles SET
                    processed_count = (
                        SELECT COUNT(*) FROM places
                        WHERE city = ?1 AND query = ?2 AND tile_index = ?3 AND {success}
                    ),
                    failed_count = (
                        SELECT COUNT(*) FROM places
                        WHERE city = ?1 AND query = ?2 AND tile_index = ?3 AND status = 'failed'
                    ),
                    updated_at = ?4
                 WHERE city = ?1 AND query = ?2 AND tile_index = ?3",
                success = SUCCESS_PREDICATE
            ),
            params![city, query, tile_index, now()],
        )?;
        ensure_tile_updated(updated, city, query, tile_index)?;

        let counts = tx.query_row(
            "SELECT result_count, processed_count, failed_count FROM tiles
             WHERE city = ?1 AND query = ?2 AND tile_index = ?3",
            params![city, query, tile_index],
            |row| {
                Ok(TileCounts {
                    result_count: row.get(0)?,
                    processed_count: row.get(1)?,
                    failed_count: row.get(2)?,
                })
            },
        )?;

        tx.commit()?;
        Ok(counts)
    }

    // ===== Place Management =====

    fn place_exists(&self, place_id: &str) -> StorageResult<bool> {
        let conn = self.conn()?;
        let found: Option<i64> = conn
            .query_row(
                &format!(
                    "SELECT 1 FROM places WHERE place_id = ?1 AND {} LIMIT 1",
                    SUCCESS_PREDICATE
                ),
                params![place_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn upsert_place_success(&self, place: &PlaceRef, fields: &PlaceFields) -> StorageResult<()> {
        let social_media_urls = serde_json::to_string(&fields.social_media_urls)?;
        let contacts = if fields.contacts.is_null() {
            "{}".to_string()
        } else {
            serde_json::to_string(&fields.contacts)?
        };
        let warnings = serde_json::to_string(&fields.warnings)?;

        let conn = self.conn()?;
        conn.execute(
            &format!(
                "INSERT INTO places ({}) VALUES
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                  'success', '', ?17, ?18, ?19)
                 ON CONFLICT(place_id) DO UPDATE SET
                    city = excluded.city,
                    query = excluded.query,
                    tile_index = excluded.tile_index,
                    name = excluded.name,
                    href = excluded.href,
                    lat = excluded.lat,
                    lng = excluded.lng,
                    address = excluded.address,
                    location = excluded.location,
                    phone = excluded.phone,
                    plus_code = excluded.plus_code,
                    website = excluded.website,
                    social_media_urls = excluded.social_media_urls,
                    open_time = excluded.open_time,
                    emails_phones_socials = excluded.emails_phones_socials,
                    status = 'success',
                    last_error = '',
                    warnings = excluded.warnings,
                    extracted_at = excluded.extracted_at,
                    run_id = excluded.run_id",
                PLACE_COLUMNS
            ),
            params![
                place.place_id,
                place.city,
                place.query,
                place.tile_index,
                place.name,
                place.href,
                place.lat,
                place.lng,
                fields.address,
                fields.location,
                fields.phone,
                fields.plus_code,
                fields.website,
                social_media_urls,
                fields.open_time,
                contacts,
                warnings,
                now(),
                place.run_id,
            ],
        )?;
        Ok(())
    }

    fn upsert_place_failure(
        &self,
        place: &PlaceRef,
        last_error: &str,
        warnings: &[FieldWarning],
    ) -> StorageResult<()> {
        let warnings = serde_json::to_string(warnings)?;

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO places (
                place_id, city, query, tile_index, name, href, lat, lng,
                status, last_error, warnings, extracted_at, run_id
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'failed', ?9, ?10, ?11, ?12)
             ON CONFLICT(place_id) DO UPDATE SET
                city = excluded.city,
                query = excluded.query,
                tile_index = excluded.tile_index,
                name = excluded.name,
                href = excluded.href,
                lat = excluded.lat,
                lng = excluded.lng,
                status = 'failed',
                last_error = excluded.last_error,
                warnings = excluded.warnings,
                extracted_at = excluded.extracted_at,
                run_id = excluded.run_id",
            params![
                place.place_id,
                place.city,
                place.query,
                place.tile_index,
                place.name,
                place.href,
                place.lat,
                place.lng,
                last_error,
                warnings,
                now(),
                place.run_id,
            ],
        )?;
        Ok(())
    }

    fn get_place(&self, place_id: &str) -> StorageResult<Option<PlaceRecord>> {
        let conn = self.conn()?;
        let place = conn
            .query_row(
                &format!("SELECT {} FROM places WHERE place_id = ?1", PLACE_COLUMNS),
                params![place_id],
                place_from_row,
            )
            .optional()?;
        Ok(place)
    }

    fn select_failed_places(&self, filter: &FailedPlaceFilter) -> StorageResult<Vec<String>> {
        let mut sql = String::from("SELECT place_id FROM places WHERE status = 'failed'");
        let mut args: Vec<&str> = Vec::new();

        if let Some(city) = &filter.city {
            args.push(city);
            sql.push_str(&format!(" AND city = ?{}", args.len()));
        }
        if let Some(query) = &filter.query {
            args.push(query);
            sql.push_str(&format!(" AND query = ?{}", args.len()));
        }
        if !filter.error_codes.is_empty() {
            let mut placeholders = Vec::with_capacity(filter.error_codes.len());
            for code in &filter.error_codes {
                args.push(code);
                placeholders.push(format!("?{}", args.len()));
            }
            sql.push_str(&format!(" AND last_error IN ({})", placeholders.join(", ")));
        }
        sql.push_str(" ORDER BY extracted_at DESC, place_id");

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), |row| row.get::<_, String>(0))?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    // ===== Statistics =====

    fn tile_status_summary(
        &self,
        city: &str,
        query: &str,
    ) -> StorageResult<HashMap<TileStatus, u64>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT status, COUNT(*) FROM tiles WHERE city = ?1 AND query = ?2 GROUP BY status",
        )?;
        let rows = stmt.query_map(params![city, query], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut summary = HashMap::new();
        for row in rows {
            let (status, count) = row?;
            if let Some(status) = TileStatus::from_db_string(&status) {
                summary.insert(status, count as u64);
            }
        }
        Ok(summary)
    }

    fn count_places_by_status(&self, status: PlaceStatus) -> StorageResult<u64> {
        let predicate = match status {
            PlaceStatus::Success => SUCCESS_PREDICATE,
            PlaceStatus::Failed => "status = 'failed'",
        };

        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM places WHERE {}", predicate),
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

fn ensure_tile_updated(updated: usize, city: &str, query: &str, index: u32) -> StorageResult<()> {
    if updated == 0 {
        return Err(StorageError::TileNotFound {
            city: city.to_string(),
            query: query.to_string(),
            index,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const CITY: &str = "Paris";
    const QUERY: &str = "cafe";

    fn point(index: u32, row: u32, col: u32) -> TilePoint {
        TilePoint {
            index,
            row,
            col,
            latitude: 48.8 + row as f64 * 0.01,
            longitude: 2.3 + col as f64 * 0.01,
        }
    }

    fn seed(index: u32) -> TileSeed {
        TileSeed {
            point: point(index, 0, index),
            url: format!("https://maps.example/tile/{}", index),
            window_width_px: Some(1920),
            window_height_px: Some(1080),
            viewport_width_px: None,
            viewport_height_px: None,
        }
    }

    fn place(place_id: &str, tile_index: u32) -> PlaceRef {
        PlaceRef {
            place_id: place_id.to_string(),
            city: CITY.to_string(),
            query: QUERY.to_string(),
            tile_index,
            name: format!("Place {}", place_id),
            href: format!("https://maps.example/place/{}/@48.8,2.3,17z", place_id),
            lat: 48.8,
            lng: 2.3,
            run_id: "run-1".to_string(),
        }
    }

    fn fields(address: &str) -> PlaceFields {
        PlaceFields {
            address: address.to_string(),
            phone: "+33 1 23 45 67 89".to_string(),
            social_media_urls: vec!["https://instagram.com/cafe".to_string()],
            ..PlaceFields::default()
        }
    }

    fn run(run_id: &str) -> RunRecord {
        RunRecord {
            run_id: run_id.to_string(),
            started_at: now(),
            city: CITY.to_string(),
            country: Some("France".to_string()),
            query: QUERY.to_string(),
            zoom: 15,
            language: "en".to_string(),
            config_hash: None,
            geometry: RunGeometry {
                window_width_px: Some(1920),
                window_height_px: Some(1080),
                ..RunGeometry::default()
            },
        }
    }

    #[test]
    fn test_create_in_memory() {
        assert!(SqliteStorage::open_in_memory().is_ok());
    }

    #[test]
    fn test_open_on_disk_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db").join("gmaps.sqlite");
        let storage = SqliteStorage::new(&path).unwrap();
        storage.start_run(&run("r1")).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_run_meta_backfill_keeps_known_fields() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        storage.start_run(&run("r1")).unwrap();

        storage
            .update_run_meta(
                "r1",
                &RunGeometry {
                    meters_per_pixel: Some(3.2),
                    cell_width_km: Some(2.5),
                    cell_height_km: Some(1.4),
                    overlap_ratio: Some(0.25),
                    ..RunGeometry::default()
                },
            )
            .unwrap();

        let stored = storage.get_run("r1").unwrap();
        assert_eq!(stored.geometry.window_width_px, Some(1920));
        assert_eq!(stored.geometry.meters_per_pixel, Some(3.2));
        assert_eq!(stored.geometry.overlap_ratio, Some(0.25));
        assert_eq!(stored.country.as_deref(), Some("France"));
    }

    #[test]
    fn test_update_run_meta_unknown_run() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let result = storage.update_run_meta("missing", &RunGeometry::default());
        assert!(matches!(result, Err(StorageError::RunNotFound(_))));
    }

    #[test]
    fn test_init_tiles_keeps_status_on_conflict() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        storage.init_tiles(CITY, QUERY, &[seed(0), seed(1)]).unwrap();
        storage
            .set_tile_completed(CITY, QUERY, 0, TileCounts::default())
            .unwrap();

        let mut moved = seed(0);
        moved.url = "https://maps.example/tile/0?v=2".to_string();
        moved.point.latitude = 10.0;
        storage.init_tiles(CITY, QUERY, &[moved, seed(1)]).unwrap();

        let tiles = storage.list_tiles(CITY, QUERY).unwrap();
        assert_eq!(tiles.len(), 2);
        assert_eq!(tiles[0].status, TileStatus::Completed);
        assert_eq!(tiles[0].latitude, 10.0);
        assert_eq!(tiles[0].url.as_deref(), Some("https://maps.example/tile/0?v=2"));
        assert_eq!(tiles[1].status, TileStatus::Pending);
    }

    #[test]
    fn test_list_tiles_is_ordered_and_scoped() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        storage.init_tiles(CITY, QUERY, &[seed(2), seed(0), seed(1)]).unwrap();
        storage.init_tiles(CITY, "bakery", &[seed(0)]).unwrap();

        let indices: Vec<u32> = storage
            .list_tiles(CITY, QUERY)
            .unwrap()
            .iter()
            .map(|t| t.tile_index)
            .collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_tile_in_progress_then_restart_resets_to_pending() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        storage.init_tiles(CITY, QUERY, &[seed(0), seed(1)]).unwrap();
        storage.set_tile_in_progress(CITY, QUERY, &point(0, 0, 0)).unwrap();
        assert_eq!(
            storage.get_tile_status(CITY, QUERY, 0).unwrap(),
            Some(TileStatus::InProgress)
        );

        let reset = storage.reset_in_progress(CITY, QUERY).unwrap();
        assert_eq!(reset, 1);
        assert_eq!(
            storage.get_tile_status(CITY, QUERY, 0).unwrap(),
            Some(TileStatus::Pending)
        );
    }

    #[test]
    fn test_completed_is_not_reverted_by_reset() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        storage.init_tiles(CITY, QUERY, &[seed(0)]).unwrap();
        storage.set_tile_in_progress(CITY, QUERY, &point(0, 0, 0)).unwrap();
        storage
            .set_tile_completed(
                CITY,
                QUERY,
                0,
                TileCounts {
                    result_count: 3,
                    processed_count: 2,
                    failed_count: 1,
                },
            )
            .unwrap();

        storage.reset_in_progress(CITY, QUERY).unwrap();
        storage.reset_failed_tiles(CITY, QUERY).unwrap();

        for _ in 0..3 {
            assert_eq!(
                storage.get_tile_status(CITY, QUERY, 0).unwrap(),
                Some(TileStatus::Completed)
            );
        }
        let tile = &storage.list_tiles(CITY, QUERY).unwrap()[0];
        assert_eq!(tile.result_count, 3);
    }

    #[test]
    fn test_set_tile_in_progress_upserts_and_clears_error() {
        let storage = SqliteStorage::open_in_memory().unwrap();

        // No prior row
        storage.set_tile_in_progress(CITY, QUERY, &point(5, 1, 2)).unwrap();
        assert_eq!(
            storage.get_tile_status(CITY, QUERY, 5).unwrap(),
            Some(TileStatus::InProgress)
        );

        storage.set_tile_failed(CITY, QUERY, 5, "tile failed: boom").unwrap();
        let failed = &storage.list_tiles(CITY, QUERY).unwrap()[0];
        assert_eq!(failed.status, TileStatus::Failed);
        assert_eq!(failed.last_error.as_deref(), Some("tile failed: boom"));

        storage.set_tile_in_progress(CITY, QUERY, &point(5, 1, 2)).unwrap();
        let again = &storage.list_tiles(CITY, QUERY).unwrap()[0];
        assert_eq!(again.status, TileStatus::InProgress);
        assert_eq!(again.last_error, None);
        assert_eq!(again.result_count, 0);
    }

    #[test]
    fn test_failed_tiles_reset_separately() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        storage.init_tiles(CITY, QUERY, &[seed(0)]).unwrap();
        storage.set_tile_failed(CITY, QUERY, 0, "boom").unwrap();

        assert_eq!(storage.reset_in_progress(CITY, QUERY).unwrap(), 0);
        assert_eq!(storage.reset_failed_tiles(CITY, QUERY).unwrap(), 1);
        assert_eq!(
            storage.get_tile_status(CITY, QUERY, 0).unwrap(),
            Some(TileStatus::Pending)
        );
    }

    #[test]
    fn test_tile_updates_on_missing_tile() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        assert!(matches!(
            storage.set_tile_failed(CITY, QUERY, 9, "x"),
            Err(StorageError::TileNotFound { index: 9, .. })
        ));
        assert_eq!(storage.get_tile_status(CITY, QUERY, 9).unwrap(), None);
    }

    #[test]
    fn test_tile_note_and_url() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        storage.init_tiles(CITY, QUERY, &[seed(0)]).unwrap();
        storage.set_tile_note(CITY, QUERY, 0, "no results panel").unwrap();
        storage.update_tile_url(CITY, QUERY, 0, "https://new").unwrap();

        let tile = &storage.list_tiles(CITY, QUERY).unwrap()[0];
        assert_eq!(tile.status, TileStatus::Pending);
        assert_eq!(tile.last_error.as_deref(), Some("no results panel"));
        assert_eq!(tile.url.as_deref(), Some("https://new"));
    }

    #[test]
    fn test_place_exists_only_for_success() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        assert!(!storage.place_exists("p1").unwrap());

        storage.upsert_place_failure(&place("p1", 0), "missing_address", &[]).unwrap();
        assert!(!storage.place_exists("p1").unwrap());

        storage.upsert_place_success(&place("p1", 0), &fields("1 Rue X")).unwrap();
        assert!(storage.place_exists("p1").unwrap());
    }

    #[test]
    fn test_legacy_status_counts_as_existing() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        storage
            .conn()
            .unwrap()
            .execute("INSERT INTO places (place_id, status) VALUES ('legacy', NULL)", [])
            .unwrap();
        assert!(storage.place_exists("legacy").unwrap());
    }

    #[test]
    fn test_failure_then_success_flips_status_in_place() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let warnings = vec![FieldWarning {
            field: "phone".to_string(),
            error: "not_found".to_string(),
        }];
        storage
            .upsert_place_failure(&place("p1", 0), "missing_address", &warnings)
            .unwrap();

        let failed = storage.get_place("p1").unwrap().unwrap();
        assert_eq!(failed.status, PlaceStatus::Failed);
        assert_eq!(failed.last_error.as_deref(), Some("missing_address"));
        assert_eq!(failed.fields.warnings, warnings);

        storage.upsert_place_success(&place("p1", 0), &fields("1 Rue X")).unwrap();
        let ok = storage.get_place("p1").unwrap().unwrap();
        assert_eq!(ok.status, PlaceStatus::Success);
        assert_eq!(ok.last_error.as_deref(), Some(""));
        assert_eq!(ok.fields.address, "1 Rue X");
        assert_eq!(ok.fields.social_media_urls, vec!["https://instagram.com/cafe"]);
        assert_eq!(ok.fields.contacts, serde_json::json!({}));
        assert_eq!(storage.count_places_by_status(PlaceStatus::Success).unwrap(), 1);
        assert_eq!(storage.count_places_by_status(PlaceStatus::Failed).unwrap(), 0);
    }

    #[test]
    fn test_failure_keeps_previous_fields() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        storage.upsert_place_success(&place("p1", 0), &fields("1 Rue X")).unwrap();
        storage.upsert_place_failure(&place("p1", 0), "timeout", &[]).unwrap();

        let record = storage.get_place("p1").unwrap().unwrap();
        assert_eq!(record.status, PlaceStatus::Failed);
        assert_eq!(record.fields.address, "1 Rue X");
    }

    #[test]
    fn test_concurrent_upserts_keep_one_row() {
        let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let storage = Arc::clone(&storage);
                std::thread::spawn(move || {
                    let address = format!("{} Rue X", i);
                    storage.upsert_place_success(&place("dup", 0), &fields(&address))
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        let count: i64 = storage
            .conn()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM places WHERE place_id = 'dup'", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_refresh_tile_counters_matches_place_rows() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        storage.init_tiles(CITY, QUERY, &[seed(0), seed(1)]).unwrap();
        storage
            .set_tile_completed(
                CITY,
                QUERY,
                0,
                TileCounts {
                    result_count: 4,
                    processed_count: 99,
                    failed_count: 99,
                },
            )
            .unwrap();

        storage.upsert_place_success(&place("a", 0), &fields("A")).unwrap();
        storage.upsert_place_success(&place("b", 0), &fields("B")).unwrap();
        storage.upsert_place_failure(&place("c", 0), "missing_address", &[]).unwrap();
        storage.upsert_place_success(&place("d", 1), &fields("D")).unwrap();

        let counts = storage.refresh_tile_counters(CITY, QUERY, 0).unwrap();
        assert_eq!(
            counts,
            TileCounts {
                result_count: 4,
                processed_count: 2,
                failed_count: 1,
            }
        );

        let tile = &storage.list_tiles(CITY, QUERY).unwrap()[0];
        assert_eq!(tile.status, TileStatus::Completed);
        assert_eq!((tile.processed_count, tile.failed_count), (2, 1));
    }

    #[test]
    fn test_select_failed_places_filters() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        storage.upsert_place_failure(&place("a", 0), "missing_address", &[]).unwrap();
        storage.upsert_place_failure(&place("b", 0), "navigation", &[]).unwrap();
        storage.upsert_place_success(&place("c", 0), &fields("C")).unwrap();

        let mut other_city = place("d", 0);
        other_city.city = "Lyon".to_string();
        storage.upsert_place_failure(&other_city, "missing_address", &[]).unwrap();

        let all = storage.select_failed_places(&FailedPlaceFilter::default()).unwrap();
        assert_eq!(all.len(), 3);

        let paris = storage
            .select_failed_places(&FailedPlaceFilter {
                city: Some(CITY.to_string()),
                ..FailedPlaceFilter::default()
            })
            .unwrap();
        assert_eq!(paris.len(), 2);

        let only_missing = storage
            .select_failed_places(&FailedPlaceFilter {
                city: Some(CITY.to_string()),
                query: Some(QUERY.to_string()),
                error_codes: vec!["missing_address".to_string()],
            })
            .unwrap();
        assert_eq!(only_missing, vec!["a".to_string()]);
    }

    #[test]
    fn test_tile_status_summary() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        storage.init_tiles(CITY, QUERY, &[seed(0), seed(1), seed(2)]).unwrap();
        storage.set_tile_failed(CITY, QUERY, 2, "boom").unwrap();

        let summary = storage.tile_status_summary(CITY, QUERY).unwrap();
        assert_eq!(summary.get(&TileStatus::Pending), Some(&2));
        assert_eq!(summary.get(&TileStatus::Failed), Some(&1));
        assert_eq!(summary.get(&TileStatus::Completed), None);
    }
}
