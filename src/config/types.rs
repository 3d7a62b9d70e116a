use serde::Deserialize;

/// Main configuration structure
///
/// Every section and field has a default, so an empty file (or no file at all) is a
/// valid configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub crawl: CrawlConfig,
    pub scheduler: SchedulerConfig,
    pub writer: WriterConfig,
    pub proxy: ProxyConfig,
    pub rerun: RerunConfig,
    pub storage: StorageConfig,
    pub geocoding: GeocodingConfig,
    pub retry: RetryConfig,
}

/// Crawl behaviour and grid geometry
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    /// UI language passed as `hl=` on search URLs
    pub language: String,

    /// Map zoom level
    pub zoom: u8,

    /// Run the browser without a visible window
    pub headless: bool,

    /// Tabs used in parallel per tile
    pub workers: usize,

    #[serde(rename = "window-width")]
    pub window_width: u32,

    #[serde(rename = "window-height")]
    pub window_height: u32,

    /// Fraction of a cell shared with neighbouring cells
    #[serde(rename = "overlap-ratio")]
    pub overlap_ratio: f64,

    /// Fixed cell width; derived from viewport coverage when unset
    #[serde(rename = "cell-width-km")]
    pub cell_width_km: Option<f64>,

    /// Fixed cell height; derived from viewport coverage when unset
    #[serde(rename = "cell-height-km")]
    pub cell_height_km: Option<f64>,

    /// Shrink factor applied to the measured viewport footprint
    #[serde(rename = "cell-safety-factor")]
    pub cell_safety_factor: f64,

    /// Put failed tiles back to pending when a crawl is resumed
    #[serde(rename = "retry-failed-tiles-on-resume")]
    pub retry_failed_tiles_on_resume: bool,

    /// Per-navigation timeout of the HTTP driver (seconds)
    #[serde(rename = "page-timeout-secs")]
    pub page_timeout_secs: u64,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
            zoom: 16,
            headless: false,
            workers: 1,
            window_width: 1920,
            window_height: 1080,
            overlap_ratio: 0.25,
            cell_width_km: None,
            cell_height_km: None,
            cell_safety_factor: 0.9,
            retry_failed_tiles_on_resume: true,
            page_timeout_secs: 30,
        }
    }
}

/// Pacing of the progressive scheduler
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Delay between launches within one batch (milliseconds)
    #[serde(rename = "startup-delay-ms")]
    pub startup_delay_ms: u64,

    /// Tasks launched per batch
    #[serde(rename = "batch-size")]
    pub batch_size: usize,

    /// Delay after a full batch (milliseconds)
    #[serde(rename = "batch-delay-ms")]
    pub batch_delay_ms: u64,

    /// Dispatch and completion poll interval (milliseconds)
    #[serde(rename = "poll-interval-ms")]
    pub poll_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            startup_delay_ms: 1000,
            batch_size: 2,
            batch_delay_ms: 3000,
            poll_interval_ms: 100,
        }
    }
}

/// Result writer settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Log progress every N writes
    #[serde(rename = "progress-every")]
    pub progress_every: u64,

    /// Capacity of the writer queue
    #[serde(rename = "queue-capacity")]
    pub queue_capacity: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            progress_every: 10,
            queue_capacity: 256,
        }
    }
}

/// Proxy selection strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum ProxyStrategy {
    #[default]
    #[serde(rename = "round_robin", alias = "round-robin")]
    RoundRobin,
    #[serde(rename = "random")]
    Random,
}

impl std::str::FromStr for ProxyStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "round_robin" | "round-robin" => Ok(Self::RoundRobin),
            "random" => Ok(Self::Random),
            other => Err(format!("unknown proxy strategy '{}'", other)),
        }
    }
}

/// Proxy sources
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Explicit proxy URLs
    pub proxies: Vec<String>,

    /// Comma-separated proxy list
    pub list: Option<String>,

    /// File with one proxy per line
    pub file: Option<String>,

    pub strategy: ProxyStrategy,
}

/// End-of-run retry of failed places
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RerunConfig {
    pub enabled: bool,

    pub workers: usize,

    /// Maximum places attempted per rerun
    pub limit: Option<usize>,

    /// Only places whose last error is one of these codes
    #[serde(rename = "only-errors")]
    pub only_errors: Vec<String>,
}

impl Default for RerunConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            workers: 2,
            limit: None,
            only_errors: Vec::new(),
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: "data/db/gmaps.sqlite".to_string(),
        }
    }
}

/// Boundary lookup settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeocodingConfig {
    /// Overpass interpreter URLs; empty means the public mirrors
    pub endpoints: Vec<String>,

    #[serde(rename = "cache-path")]
    pub cache_path: Option<String>,

    #[serde(rename = "timeout-secs")]
    pub timeout_secs: u64,
}

impl Default for GeocodingConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            cache_path: Some("data/cache/bbox_cache.json".to_string()),
            timeout_secs: 30,
        }
    }
}

/// Bounded retry of transient collaborator errors
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub attempts: u32,

    #[serde(rename = "backoff-ms")]
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_ms: 2000,
        }
    }
}
