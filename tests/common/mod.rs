//! Stub collaborators shared by the integration tests
//!
//! The stubs never touch the network: tabs only remember their URL, the discoverer
//! derives result cards from the tile center in that URL, and the extractor fabricates
//! fields from the href.

#![allow(dead_code)]

use async_trait::async_trait;
use gmaps_grid::browser::{
    BrowserDriver, BrowserSession, Collaborators, DiscoveredPlace, DriverError, ExtractError,
    PlaceDiscoverer, PlaceExtractor, SessionOptions, Tab,
};
use gmaps_grid::config::Config;
use gmaps_grid::geo::{
    km_per_degree_longitude, parse_lat_lng, BboxError, BoundingBox, BoundingBoxSource,
    KM_PER_DEGREE_LATITUDE,
};
use gmaps_grid::storage::{FieldWarning, PlaceFields, SqliteStorage};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

pub type Predicate = Box<dyn Fn(f64, f64) -> bool + Send + Sync>;

pub struct StubTab {
    url: Option<String>,
}

#[async_trait]
impl Tab for StubTab {
    async fn navigate(&mut self, url: &str) -> Result<(), DriverError> {
        self.url = Some(url.to_string());
        Ok(())
    }

    async fn html(&self) -> Result<String, DriverError> {
        Ok(String::new())
    }

    fn current_url(&self) -> Option<String> {
        self.url.clone()
    }

    async fn close(&mut self) {}
}

pub struct StubSession;

#[async_trait]
impl BrowserSession for StubSession {
    async fn open_tab(&self) -> Result<Box<dyn Tab>, DriverError> {
        Ok(Box::new(StubTab { url: None }))
    }

    async fn close(&self) {}
}

#[derive(Default)]
pub struct StubDriver {
    pub sessions: AtomicUsize,
}

#[async_trait]
impl BrowserDriver for StubDriver {
    async fn open_session(
        &self,
        _options: &SessionOptions,
    ) -> Result<Arc<dyn BrowserSession>, DriverError> {
        self.sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(StubSession))
    }
}

/// Emits `per_tile` cards around the center of whatever tile the tab shows
pub struct GridDiscoverer {
    pub per_tile: usize,
    /// Tiles whose center matches fail discovery
    pub fail_if: Option<Predicate>,
    /// Tiles whose center matches cancel the token after discovery
    pub cancel_if: Option<(Predicate, CancellationToken)>,
    /// Card appended to every tile's results
    pub shared: Option<DiscoveredPlace>,
    pub calls: AtomicUsize,
}

impl GridDiscoverer {
    pub fn new(per_tile: usize) -> Self {
        Self {
            per_tile,
            fail_if: None,
            cancel_if: None,
            shared: None,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl PlaceDiscoverer for GridDiscoverer {
    async fn discover(
        &self,
        tab: &mut dyn Tab,
        _query: &str,
        _cancel: &CancellationToken,
    ) -> Result<Vec<DiscoveredPlace>, DriverError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let url = tab.current_url().ok_or(DriverError::NoDocument)?;
        let (lat, lng) = parse_lat_lng(&url).ok_or(DriverError::NoDocument)?;

        if self.fail_if.as_ref().is_some_and(|f| f(lat, lng)) {
            return Err(DriverError::Navigation {
                url,
                message: "results panel never appeared".to_string(),
            });
        }

        let mut places: Vec<DiscoveredPlace> = (0..self.per_tile)
            .map(|i| {
                let place_lat = lat + i as f64 * 1e-4;
                DiscoveredPlace {
                    name: format!("P{}", i),
                    href: format!(
                        "https://www.google.com/maps/place/P{}/@{:.7},{:.7},17z",
                        i, place_lat, lng
                    ),
                }
            })
            .collect();
        places.extend(self.shared.clone());

        if let Some((when, token)) = &self.cancel_if {
            if when(lat, lng) {
                token.cancel();
            }
        }
        Ok(places)
    }
}

/// Succeeds unless the href names the failing card
#[derive(Default)]
pub struct StubExtractor {
    /// Card name (e.g. `P1`) that fails with a missing address
    pub failing: Mutex<Option<String>>,
    pub calls: AtomicUsize,
    /// Every href handed to the extractor, in call order
    pub hrefs: Mutex<Vec<String>>,
}

impl StubExtractor {
    pub fn failing(name: &str) -> Self {
        Self {
            failing: Mutex::new(Some(name.to_string())),
            ..Self::default()
        }
    }

    pub fn heal(&self) {
        *self.failing.lock().unwrap() = None;
    }

    /// How many times `href` was extracted
    pub fn calls_for(&self, href: &str) -> usize {
        self.hrefs.lock().unwrap().iter().filter(|h| *h == href).count()
    }
}

#[async_trait]
impl PlaceExtractor for StubExtractor {
    async fn extract(
        &self,
        _tab: &mut dyn Tab,
        href: &str,
        city: &str,
    ) -> Result<PlaceFields, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.hrefs.lock().unwrap().push(href.to_string());
        let failing = self.failing.lock().unwrap().clone();
        if let Some(name) = failing {
            if href.contains(&format!("/place/{}/", name)) {
                return Err(ExtractError::MissingAddress {
                    warnings: vec![FieldWarning {
                        field: "phone".to_string(),
                        error: "not_found".to_string(),
                    }],
                });
            }
        }
        Ok(PlaceFields {
            address: format!("1 Test Street, {}", city),
            location: city.to_string(),
            ..PlaceFields::default()
        })
    }
}

/// Always answers with the same box
pub struct StaticBbox {
    pub bbox: BoundingBox,
    pub calls: AtomicUsize,
}

#[async_trait]
impl BoundingBoxSource for StaticBbox {
    async fn fetch_bbox(
        &self,
        _city: &str,
        _country: Option<&str>,
    ) -> Result<BoundingBox, BboxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.bbox)
    }
}

/// A 2 km by 1 km box that a 1 km grid covers with exactly two tiles
pub fn two_by_one_km() -> BoundingBox {
    let (lat, lng) = (48.80, 2.25);
    let row_lat = lat + 0.5 / KM_PER_DEGREE_LATITUDE;
    let lng_span = 2.0 / km_per_degree_longitude(row_lat).unwrap();
    BoundingBox::new(lat, lng, lat + 1.0 / KM_PER_DEGREE_LATITUDE, lng + lng_span)
}

/// Fast settings with an explicit 1 km grid and no overlap
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.crawl.cell_width_km = Some(1.0);
    config.crawl.cell_height_km = Some(1.0);
    config.crawl.overlap_ratio = 0.0;
    config.crawl.workers = 2;
    config.scheduler.startup_delay_ms = 0;
    config.scheduler.batch_delay_ms = 0;
    config.scheduler.poll_interval_ms = 10;
    config.retry.attempts = 2;
    config.retry.backoff_ms = 1;
    config
}

pub fn collaborators(
    driver: Arc<StubDriver>,
    discoverer: Arc<GridDiscoverer>,
    extractor: Arc<StubExtractor>,
) -> Collaborators {
    Collaborators {
        driver,
        discoverer,
        extractor,
    }
}

pub fn temp_storage() -> (tempfile::TempDir, Arc<SqliteStorage>) {
    let dir = tempfile::tempdir().unwrap();
    let storage = SqliteStorage::new(&dir.path().join("crawl.db")).unwrap();
    (dir, Arc::new(storage))
}
