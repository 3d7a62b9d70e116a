//! gmaps-grid: resumable tiled crawl of map search results
//!
//! This crate partitions a city into overlapping map tiles, visits each tile with a
//! small pool of browser tabs, and persists one record per discovered place so that an
//! interrupted crawl resumes without re-work or duplication.

pub mod browser;
pub mod config;
pub mod crawler;
pub mod geo;
pub mod state;
pub mod storage;

use thiserror::Error;

/// Main error type for crawl operations
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Grid error: {0}")]
    Grid(#[from] GridError),

    #[error("Bounding box lookup failed: {0}")]
    Bbox(#[from] geo::BboxError),

    #[error("Browser error: {0}")]
    Driver(#[from] browser::DriverError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Place not found: {0}")]
    NotFound(String),

    #[error("Place {0} has no source link")]
    MissingLink(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Task failed: {0}")]
    Task(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid environment override {name}: {message}")]
    InvalidEnv { name: String, message: String },
}

/// Grid planning errors
#[derive(Debug, Error, PartialEq)]
pub enum GridError {
    #[error("Invalid grid argument: {0}")]
    InvalidArgument(String),

    #[error("Longitude scale is undefined at latitude {latitude}")]
    UndefinedLongitudeScale { latitude: f64 },
}

/// Scheduler errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Scheduler is not running")]
    NotRunning,
}

/// Result type alias for crawl operations
pub type Result<T> = std::result::Result<T, CrawlError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for grid operations
pub type GridResult<T> = std::result::Result<T, GridError>;

// Re-export commonly used types
pub use config::Config;
pub use geo::{generate_grid, BoundingBox, TilePoint};
pub use state::{PlaceStatus, TileStatus};
