//! Database schema definitions
//!
//! Three tables: `runs` (one row per crawl invocation), `tiles` (grid cells keyed by
//! city, query and index) and `places` (one row per place id, unique store-wide).

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- One row per crawl invocation
CREATE TABLE IF NOT EXISTS runs (
    run_id TEXT PRIMARY KEY,
    started_at TEXT NOT NULL,
    city TEXT NOT NULL,
    country TEXT,
    query TEXT NOT NULL,
    zoom INTEGER,
    language TEXT,
    config_hash TEXT,
    window_width_px INTEGER,
    window_height_px INTEGER,
    viewport_width_px INTEGER,
    viewport_height_px INTEGER,
    mpp REAL,
    cell_width_km REAL,
    cell_height_km REAL,
    overlap_ratio REAL
);

-- Grid cells and their lifecycle
CREATE TABLE IF NOT EXISTS tiles (
    city TEXT NOT NULL,
    query TEXT NOT NULL,
    tile_index INTEGER NOT NULL,
    tile_row INTEGER NOT NULL,
    tile_col INTEGER NOT NULL,
    tile_center_lat REAL NOT NULL,
    tile_center_lng REAL NOT NULL,
    tile_url TEXT,
    status TEXT NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'in_progress', 'completed', 'failed')),
    result_count INTEGER NOT NULL DEFAULT 0,
    processed_count INTEGER NOT NULL DEFAULT 0,
    failed_count INTEGER NOT NULL DEFAULT 0,
    window_width_px INTEGER,
    window_height_px INTEGER,
    viewport_width_px INTEGER,
    viewport_height_px INTEGER,
    updated_at TEXT,
    last_error TEXT,
    PRIMARY KEY (city, query, tile_index)
);

CREATE INDEX IF NOT EXISTS tiles_q ON tiles(city, query, status);

-- Extracted places, unique across every city and query
CREATE TABLE IF NOT EXISTS places (
    place_id TEXT NOT NULL UNIQUE,
    city TEXT,
    query TEXT,
    tile_index INTEGER,
    name TEXT,
    href TEXT,
    lat REAL,
    lng REAL,
    address TEXT,
    location TEXT,
    phone TEXT,
    plus_code TEXT,
    website TEXT,
    social_media_urls TEXT,
    open_time TEXT,
    emails_phones_socials TEXT,
    status TEXT CHECK (status IN ('success', 'failed')),
    last_error TEXT,
    warnings TEXT,
    extracted_at TEXT,
    run_id TEXT
);

CREATE INDEX IF NOT EXISTS places_tile ON places(city, query, tile_index);
CREATE INDEX IF NOT EXISTS places_status ON places(status);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
