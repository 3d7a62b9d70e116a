//! City boundary lookup
//!
//! Bounding boxes come from the Overpass API. Endpoints are tried in order with a
//! short pause between them, and successful lookups are cached in memory and in a
//! JSON file keyed by `"city|country"`.

use crate::geo::BoundingBox;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Public Overpass mirrors, tried in this order
pub const DEFAULT_OVERPASS_ENDPOINTS: &[&str] = &[
    "https://overpass-api.de/api/interpreter",
    "https://overpass.kumi.systems/api/interpreter",
    "https://overpass.osm.ch/api/interpreter",
    "https://overpass.openstreetmap.ru/cgi/interpreter",
    "https://overpass.nchc.org.tw/api/interpreter",
];

/// Server-side query timeout in seconds
const QUERY_TIMEOUT_SECS: u64 = 30;

/// Errors from a boundary lookup
#[derive(Debug, Error)]
pub enum BboxError {
    #[error("Invalid lookup argument: {0}")]
    InvalidArgument(String),

    #[error("Failed to build HTTP client: {0}")]
    Client(String),

    #[error("Connection to {endpoint} failed: {message}")]
    Connection { endpoint: String, message: String },

    #[error("HTTP {status} from {endpoint}")]
    Response { endpoint: String, status: u16 },

    #[error("Bad boundary data: {0}")]
    Data(String),

    #[error("All Overpass endpoints failed for '{city}'. Last error: {last}")]
    Exhausted { city: String, last: String },
}

/// Source of city bounding boxes
#[async_trait]
pub trait BoundingBoxSource: Send + Sync {
    /// Looks up the administrative boundary of `city`, optionally within `country`
    async fn fetch_bbox(&self, city: &str, country: Option<&str>)
        -> Result<BoundingBox, BboxError>;
}

#[derive(Debug, Deserialize)]
struct OverpassResponse {
    #[serde(default)]
    elements: Vec<OverpassElement>,
}

#[derive(Debug, Deserialize)]
struct OverpassElement {
    bounds: Option<OverpassBounds>,
}

#[derive(Debug, Deserialize)]
struct OverpassBounds {
    minlat: f64,
    minlon: f64,
    maxlat: f64,
    maxlon: f64,
}

/// Overpass API client with a two-level cache
pub struct OverpassClient {
    client: Client,
    endpoints: Vec<String>,
    endpoint_pause: Duration,
    cache_path: Option<PathBuf>,
    /// `None` until the disk cache has been read once
    cache: Mutex<Option<HashMap<String, BoundingBox>>>,
}

impl OverpassClient {
    /// Creates a client
    ///
    /// # Arguments
    ///
    /// * `endpoints` - Interpreter URLs; empty means the public defaults
    /// * `cache_path` - JSON cache file, or `None` to keep the cache in memory only
    /// * `timeout` - Per-request timeout
    pub fn new(
        endpoints: Vec<String>,
        cache_path: Option<PathBuf>,
        timeout: Duration,
    ) -> Result<Self, BboxError> {
        let endpoints = if endpoints.is_empty() {
            DEFAULT_OVERPASS_ENDPOINTS
                .iter()
                .map(|e| e.to_string())
                .collect()
        } else {
            endpoints
        };

        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .gzip(true)
            .build()
            .map_err(|e| BboxError::Client(e.to_string()))?;

        Ok(Self {
            client,
            endpoints,
            endpoint_pause: Duration::from_secs(1),
            cache_path,
            cache: Mutex::new(None),
        })
    }

    /// Overrides the pause between endpoint attempts
    pub fn with_endpoint_pause(mut self, pause: Duration) -> Self {
        self.endpoint_pause = pause;
        self
    }

    fn cached(&self, key: &str) -> Option<BoundingBox> {
        let mut guard = self.cache.lock().ok()?;
        let entries = guard.get_or_insert_with(|| load_cache_file(self.cache_path.as_deref()));
        entries.get(key).copied()
    }

    fn remember(&self, key: String, bbox: BoundingBox) {
        let Ok(mut guard) = self.cache.lock() else {
            return;
        };
        let entries = guard.get_or_insert_with(|| load_cache_file(self.cache_path.as_deref()));
        entries.insert(key, bbox);
        if let Some(path) = &self.cache_path {
            if let Err(e) = save_cache_file(path, entries) {
                tracing::debug!("bbox cache save failed: {}", e);
            }
        }
    }

    async fn query_endpoint(
        &self,
        endpoint: &str,
        query: &str,
        city: &str,
    ) -> Result<BoundingBox, BboxError> {
        let response = self
            .client
            .post(endpoint)
            .form(&[("data", query)])
            .send()
            .await
            .map_err(|e| BboxError::Connection {
                endpoint: endpoint.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(BboxError::Response {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            });
        }

        let payload: OverpassResponse = response
            .json()
            .await
            .map_err(|e| BboxError::Data(format!("invalid JSON from {}: {}", endpoint, e)))?;

        let element = payload
            .elements
            .into_iter()
            .next()
            .ok_or_else(|| BboxError::Data(format!("no boundary found for '{}'", city)))?;

        let bounds = element
            .bounds
            .ok_or_else(|| BboxError::Data(format!("missing bounds for '{}'", city)))?;

        Ok(BoundingBox::new(
            bounds.minlat,
            bounds.minlon,
            bounds.maxlat,
            bounds.maxlon,
        ))
    }
}

#[async_trait]
impl BoundingBoxSource for OverpassClient {
    async fn fetch_bbox(
        &self,
        city: &str,
        country: Option<&str>,
    ) -> Result<BoundingBox, BboxError> {
        let city = city.trim();
        if city.is_empty() {
            return Err(BboxError::InvalidArgument("city cannot be empty".to_string()));
        }
        let country = country.map(str::trim).filter(|c| !c.is_empty());

        let key = cache_key(city, country);
        if let Some(bbox) = self.cached(&key) {
            tracing::info!("Using cached bbox for {}: {:?}", key, bbox);
            return Ok(bbox);
        }

        let query = build_query(city, country);
        tracing::info!(
            "Fetching bounding box for city={} country={} ({} endpoints)",
            city,
            country.unwrap_or("N/A"),
            self.endpoints.len()
        );

        let mut last_error = None;
        for (i, endpoint) in self.endpoints.iter().enumerate() {
            let started = Instant::now();
            match self.query_endpoint(endpoint, &query, city).await {
                Ok(bbox) => {
                    tracing::info!(
                        "Overpass lookup succeeded via {} in {}ms: {:?}",
                        endpoint,
                        started.elapsed().as_millis(),
                        bbox
                    );
                    self.remember(key, bbox);
                    return Ok(bbox);
                }
                Err(e) => {
                    tracing::warn!(
                        "Overpass endpoint {} failed after {}ms: {}",
                        endpoint,
                        started.elapsed().as_millis(),
                        e
                    );
                    last_error = Some(e);
                }
            }

            if i + 1 < self.endpoints.len() {
                tokio::time::sleep(self.endpoint_pause).await;
            }
        }

        Err(BboxError::Exhausted {
            city: city.to_string(),
            last: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no endpoints configured".to_string()),
        })
    }
}

fn cache_key(city: &str, country: Option<&str>) -> String {
    format!("{}|{}", city, country.unwrap_or(""))
}

/// Builds the Overpass QL query for an administrative boundary
fn build_query(city: &str, country: Option<&str>) -> String {
    match country {
        Some(country) => format!(
            "[out:json][timeout:{t}];\n\
             area[\"name\"=\"{country}\"][\"boundary\"=\"administrative\"][\"admin_level\"=\"2\"]->.searchArea;\n\
             relation[\"name\"=\"{city}\"][\"boundary\"=\"administrative\"](area.searchArea);\n\
             out bb;",
            t = QUERY_TIMEOUT_SECS,
        ),
        None => format!(
            "[out:json][timeout:{t}];\n\
             relation[\"name\"=\"{city}\"][\"boundary\"=\"administrative\"];\n\
             out bb;",
            t = QUERY_TIMEOUT_SECS,
        ),
    }
}

fn load_cache_file(path: Option<&Path>) -> HashMap<String, BoundingBox> {
    let mut entries = HashMap::new();
    let Some(path) = path else {
        return entries;
    };
    let Ok(content) = std::fs::read_to_string(path) else {
        return entries;
    };

    match serde_json::from_str::<HashMap<String, [f64; 4]>>(&content) {
        Ok(raw) => {
            for (key, [min_lat, min_lng, max_lat, max_lng]) in raw {
                if key.contains('|') {
                    entries.insert(key, BoundingBox::new(min_lat, min_lng, max_lat, max_lng));
                }
            }
        }
        Err(e) => tracing::debug!("bbox cache load failed: {}", e),
    }
    entries
}

fn save_cache_file(path: &Path, entries: &HashMap<String, BoundingBox>) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let raw: HashMap<&str, [f64; 4]> = entries
        .iter()
        .map(|(k, b)| (k.as_str(), [b.min_lat, b.min_lng, b.max_lat, b.max_lng]))
        .collect();
    let json = serde_json::to_string(&raw).map_err(std::io::Error::other)?;
    std::fs::write(path, json)
}
