//! City crawl driver - end-to-end orchestration of one (city, query) crawl
//!
//! This module ties the crawl together:
//! - Registering the run
//! - Planning the tile grid, or resuming the stored one
//! - Visiting tiles in row-major order and recording their status
//! - Handling cancellation so an interrupted crawl resumes cleanly
//! - Re-extracting failed places once the tiles are done

use super::rerun::{RerunSummary, Rerunner};
use super::retry::RetryPolicy;
use super::tasks::TileScope;
use super::tile_runner::{TileJob, TileOutcome, TileRunner};
use crate::browser::{build_search_url, Collaborators, ProxyPool, SessionOptions};
use crate::config::Config;
use crate::geo::{generate_grid, plan_cell_size, BoundingBoxSource, Coverage};
use crate::state::TileStatus;
use crate::storage::{
    FailedPlaceFilter, RunGeometry, RunRecord, Storage, TileCounts, TileRecord, TileSeed,
};
use crate::CrawlError;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// What to crawl
#[derive(Debug, Clone, PartialEq)]
pub struct CrawlRequest {
    pub city: String,
    pub country: Option<String>,
    pub query: String,
    /// Hash of the effective configuration, stored with the run
    pub config_hash: Option<String>,
}

/// Totals of one driver run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrawlSummary {
    pub run_id: String,
    pub tiles_total: usize,
    /// Tiles completed by this run
    pub tiles_completed: usize,
    pub tiles_failed: usize,
    /// Tiles completed by an earlier run, or left failed when failed tiles are not retried
    pub tiles_skipped: usize,
    pub places_seen: usize,
    pub places_inserted: usize,
    pub places_failed: usize,
    /// Cancellation stopped the crawl before every tile was visited
    pub interrupted: bool,
    pub rerun: Option<RerunSummary>,
}

/// Orchestrates the crawl of one city and query
pub struct CityCrawlDriver {
    config: Config,
    collaborators: Collaborators,
    storage: Arc<dyn Storage>,
    bbox_source: Arc<dyn BoundingBoxSource>,
    proxies: Arc<ProxyPool>,
    retry: RetryPolicy,
}

impl CityCrawlDriver {
    /// Creates a new driver
    ///
    /// # Arguments
    ///
    /// * `config` - Validated configuration
    /// * `collaborators` - Browser driver, discoverer and extractor
    /// * `storage` - The persistent store shared by every component
    /// * `bbox_source` - Boundary lookup used when the grid is planned
    /// * `proxies` - Proxy rotation, possibly empty
    pub fn new(
        config: Config,
        collaborators: Collaborators,
        storage: Arc<dyn Storage>,
        bbox_source: Arc<dyn BoundingBoxSource>,
        proxies: Arc<ProxyPool>,
    ) -> Self {
        let retry = RetryPolicy::from_config(&config.retry);
        Self {
            config,
            collaborators,
            storage,
            bbox_source,
            proxies,
            retry,
        }
    }

    /// Runs the crawl until every tile is visited or `cancel` fires
    ///
    /// # Returns
    ///
    /// * `Ok(CrawlSummary)` - The crawl finished or was interrupted cleanly
    /// * `Err(CrawlError)` - Run setup failed (boundary lookup, grid planning) or the
    ///   store became unusable
    pub async fn run(
        &self,
        request: &CrawlRequest,
        cancel: &CancellationToken,
    ) -> crate::Result<CrawlSummary> {
        if request.city.trim().is_empty() || request.query.trim().is_empty() {
            return Err(CrawlError::InvalidArgument(
                "city and query must be non-empty".to_string(),
            ));
        }

        let crawl = &self.config.crawl;
        let run_id = Uuid::new_v4().simple().to_string();
        self.storage.start_run(&RunRecord {
            run_id: run_id.clone(),
            started_at: chrono::Utc::now().to_rfc3339(),
            city: request.city.clone(),
            country: request.country.clone(),
            query: request.query.clone(),
            zoom: crawl.zoom,
            language: crawl.language.clone(),
            config_hash: request.config_hash.clone(),
            geometry: RunGeometry {
                window_width_px: Some(crawl.window_width),
                window_height_px: Some(crawl.window_height),
                overlap_ratio: Some(crawl.overlap_ratio),
                ..RunGeometry::default()
            },
        })?;
        tracing::info!(
            "Starting run {} for '{}' in {}",
            run_id,
            request.query,
            request.city
        );

        let tiles = self.prepare_tiles(&run_id, request, cancel).await?;
        self.log_tile_summary(request);

        let mut summary = CrawlSummary {
            run_id: run_id.clone(),
            tiles_total: tiles.len(),
            ..CrawlSummary::default()
        };

        let runner = TileRunner::new(
            &self.config,
            self.collaborators.clone(),
            Arc::clone(&self.storage),
            Arc::clone(&self.proxies),
        );

        let retry_failed = crawl.retry_failed_tiles_on_resume;
        for tile in &tiles {
            if cancel.is_cancelled() {
                summary.interrupted = true;
                break;
            }
            if tile.status == TileStatus::Completed
                || (tile.status == TileStatus::Failed && !retry_failed)
            {
                summary.tiles_skipped += 1;
                continue;
            }

            let point = tile.point();
            self.storage
                .set_tile_in_progress(&request.city, &request.query, &point)?;

            let url = tile.url.clone().unwrap_or_else(|| {
                build_search_url(
                    &request.query,
                    point.latitude,
                    point.longitude,
                    crawl.zoom,
                    &crawl.language,
                )
            });
            let job = TileJob {
                scope: TileScope {
                    run_id: run_id.clone(),
                    city: request.city.clone(),
                    query: request.query.clone(),
                    tile_index: point.index,
                },
                point,
                url,
            };

            let started = Instant::now();
            match runner.run(&job, cancel).await {
                Ok(outcome) if outcome.interrupted => {
                    // Left in progress; the next run resets it to pending
                    tracing::warn!("[tile {}] interrupted, stopping crawl", point.index);
                    summary.interrupted = true;
                    break;
                }
                Ok(outcome) => {
                    self.complete_tile(request, point.index, &outcome)?;
                    tracing::info!(
                        "[tile {}/{}] done in {}ms: {} seen, {} inserted, {} failed",
                        point.index + 1,
                        tiles.len(),
                        started.elapsed().as_millis(),
                        outcome.seen,
                        outcome.inserted,
                        outcome.failed
                    );
                    summary.tiles_completed += 1;
                    summary.places_seen += outcome.seen;
                    summary.places_inserted += outcome.inserted;
                    summary.places_failed += outcome.failed;
                }
                Err(CrawlError::Cancelled) => {
                    tracing::warn!("[tile {}] cancelled, stopping crawl", point.index);
                    summary.interrupted = true;
                    break;
                }
                Err(e) => {
                    tracing::error!("[tile {}] failed: {}", point.index, e);
                    self.storage.set_tile_failed(
                        &request.city,
                        &request.query,
                        point.index,
                        &format!("tile failed: {}", e),
                    )?;
                    summary.tiles_failed += 1;
                }
            }
        }

        if !summary.interrupted && !cancel.is_cancelled() && self.config.rerun.enabled {
            summary.rerun = self.rerun_failed(request, cancel).await;
        }

        self.log_tile_summary(request);
        tracing::info!(
            "Run {} finished: {} tiles completed, {} failed, {} skipped, {} places inserted{}",
            run_id,
            summary.tiles_completed,
            summary.tiles_failed,
            summary.tiles_skipped,
            summary.places_inserted,
            if summary.interrupted { " (interrupted)" } else { "" }
        );
        Ok(summary)
    }

    /// Returns the tiles to visit, planning and persisting the grid on first run
    async fn prepare_tiles(
        &self,
        run_id: &str,
        request: &CrawlRequest,
        cancel: &CancellationToken,
    ) -> crate::Result<Vec<TileRecord>> {
        let city = request.city.as_str();
        let query = request.query.as_str();
        let existing = self.storage.list_tiles(city, query)?;

        if !existing.is_empty() {
            tracing::info!(
                "Resuming {} stored tiles for '{}' in {}",
                existing.len(),
                query,
                city
            );
            self.reset_for_resume(request)?;
            for tile in existing.iter().filter(|t| t.url.is_none()) {
                let url = self.tile_url(query, tile.latitude, tile.longitude);
                self.storage
                    .update_tile_url(city, query, tile.tile_index, &url)?;
            }
            return Ok(self.storage.list_tiles(city, query)?);
        }

        let source = &self.bbox_source;
        let country = request.country.as_deref();
        let bbox = self
            .retry
            .run("bounding box lookup", cancel, || source.fetch_bbox(city, country))
            .await?;
        let (center_lat, center_lng) = bbox.center();

        let crawl = &self.config.crawl;
        let explicit = crawl.cell_width_km.zip(crawl.cell_height_km);
        let measured = if explicit.is_none() {
            self.probe_coverage(query, center_lat, center_lng, cancel)
                .await
        } else {
            None
        };
        let cell = plan_cell_size(
            explicit,
            measured,
            center_lat,
            crawl.zoom,
            (crawl.window_width, crawl.window_height),
            crawl.cell_safety_factor,
        );

        let points = generate_grid(&bbox, cell.width_km, cell.height_km, crawl.overlap_ratio)?;
        tracing::info!(
            "Planned {} tiles of {:.3} x {:.3} km over {:?}",
            points.len(),
            cell.width_km,
            cell.height_km,
            bbox
        );

        let seeds: Vec<TileSeed> = points
            .iter()
            .map(|point| TileSeed {
                point: *point,
                url: self.tile_url(query, point.latitude, point.longitude),
                window_width_px: Some(crawl.window_width),
                window_height_px: Some(crawl.window_height),
                viewport_width_px: cell.viewport_width_px,
                viewport_height_px: cell.viewport_height_px,
            })
            .collect();
        self.storage.init_tiles(city, query, &seeds)?;
        self.storage.reset_in_progress(city, query)?;

        self.storage.update_run_meta(
            run_id,
            &RunGeometry {
                window_width_px: Some(crawl.window_width),
                window_height_px: Some(crawl.window_height),
                viewport_width_px: cell.viewport_width_px,
                viewport_height_px: cell.viewport_height_px,
                meters_per_pixel: cell.meters_per_pixel,
                cell_width_km: Some(cell.width_km),
                cell_height_km: Some(cell.height_km),
                overlap_ratio: Some(crawl.overlap_ratio),
            },
        )?;

        Ok(self.storage.list_tiles(city, query)?)
    }

    fn reset_for_resume(&self, request: &CrawlRequest) -> crate::Result<()> {
        let city = request.city.as_str();
        let query = request.query.as_str();

        let reset = self.storage.reset_in_progress(city, query)?;
        if reset > 0 {
            tracing::info!("Reset {} interrupted tiles to pending", reset);
        }
        if self.config.crawl.retry_failed_tiles_on_resume {
            let reset = self.storage.reset_failed_tiles(city, query)?;
            if reset > 0 {
                tracing::info!("Reset {} failed tiles to pending", reset);
            }
        }
        Ok(())
    }

    /// Measures viewport coverage at the city center; best effort
    async fn probe_coverage(
        &self,
        query: &str,
        lat: f64,
        lng: f64,
        cancel: &CancellationToken,
    ) -> Option<Coverage> {
        if cancel.is_cancelled() {
            return None;
        }

        let crawl = &self.config.crawl;
        let options = SessionOptions {
            headless: crawl.headless,
            window_width: crawl.window_width,
            window_height: crawl.window_height,
            proxy: self.proxies.next_proxy(),
            page_timeout: Duration::from_secs(crawl.page_timeout_secs),
        };

        let session = match self.collaborators.driver.open_session(&options).await {
            Ok(session) => session,
            Err(e) => {
                tracing::debug!("Coverage probe skipped, no session: {}", e);
                return None;
            }
        };

        let mut coverage = None;
        match session.open_tab().await {
            Ok(mut tab) => {
                let url = self.tile_url(query, lat, lng);
                match tab.navigate(&url).await {
                    Ok(()) => coverage = tab.measure_coverage().await,
                    Err(e) => tracing::debug!("Coverage probe navigation failed: {}", e),
                }
                tab.close().await;
            }
            Err(e) => tracing::debug!("Coverage probe skipped, no tab: {}", e),
        }
        session.close().await;

        if let Some(c) = &coverage {
            tracing::info!(
                "Measured {:.3} m/px over a {}x{} viewport",
                c.meters_per_pixel,
                c.viewport_width_px,
                c.viewport_height_px
            );
        }
        coverage
    }

    fn complete_tile(
        &self,
        request: &CrawlRequest,
        tile_index: u32,
        outcome: &TileOutcome,
    ) -> crate::Result<()> {
        let city = request.city.as_str();
        let query = request.query.as_str();
        self.storage.set_tile_completed(
            city,
            query,
            tile_index,
            TileCounts {
                result_count: outcome.seen as u32,
                processed_count: outcome.inserted as u32,
                failed_count: outcome.failed as u32,
            },
        )?;
        self.storage.refresh_tile_counters(city, query, tile_index)?;
        Ok(())
    }

    async fn rerun_failed(
        &self,
        request: &CrawlRequest,
        cancel: &CancellationToken,
    ) -> Option<RerunSummary> {
        let rerun = &self.config.rerun;
        let filter = FailedPlaceFilter {
            city: Some(request.city.clone()),
            query: Some(request.query.clone()),
            error_codes: rerun.only_errors.clone(),
        };

        let rerunner = Rerunner::new(
            &self.config,
            self.collaborators.clone(),
            Arc::clone(&self.storage),
        );
        match rerunner
            .rerun_failed(&filter, rerun.limit, rerun.workers, cancel)
            .await
        {
            Ok(summary) => Some(summary),
            Err(e) => {
                tracing::error!("Rerun of failed places aborted: {}", e);
                None
            }
        }
    }

    fn tile_url(&self, query: &str, lat: f64, lng: f64) -> String {
        build_search_url(
            query,
            lat,
            lng,
            self.config.crawl.zoom,
            &self.config.crawl.language,
        )
    }

    fn log_tile_summary(&self, request: &CrawlRequest) {
        match self
            .storage
            .tile_status_summary(&request.city, &request.query)
        {
            Ok(counts) => {
                let count = |status: TileStatus| counts.get(&status).copied().unwrap_or(0);
                tracing::info!(
                    "Tiles: {} pending, {} in progress, {} completed, {} failed",
                    count(TileStatus::Pending),
                    count(TileStatus::InProgress),
                    count(TileStatus::Completed),
                    count(TileStatus::Failed)
                );
            }
            Err(e) => tracing::warn!("Could not summarize tiles: {}", e),
        }
    }
}
