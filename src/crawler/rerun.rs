//! Re-extraction of failed places
//!
//! Each place is re-opened from its stored link with a fresh session, extracted with
//! the same extractor as the main crawl, written back, and its tile counters refreshed.

use super::retry::RetryPolicy;
use crate::browser::{BrowserSession, Collaborators, SessionOptions};
use crate::config::Config;
use crate::state::PlaceStatus;
use crate::storage::{FailedPlaceFilter, PlaceRecord, Storage, StorageError};
use crate::CrawlError;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Totals of a rerun batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RerunSummary {
    /// Failed places matching the filter
    pub selected: usize,
    /// Places actually started (at most the limit)
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Re-runs extraction for stored places
pub struct Rerunner {
    collaborators: Collaborators,
    storage: Arc<dyn Storage>,
    session_options: SessionOptions,
    retry: RetryPolicy,
}

impl Rerunner {
    pub fn new(config: &Config, collaborators: Collaborators, storage: Arc<dyn Storage>) -> Self {
        Self {
            collaborators,
            storage,
            session_options: SessionOptions {
                headless: config.crawl.headless,
                window_width: config.crawl.window_width,
                window_height: config.crawl.window_height,
                proxy: None,
                page_timeout: Duration::from_secs(config.crawl.page_timeout_secs),
            },
            retry: RetryPolicy::from_config(&config.retry),
        }
    }

    /// Re-extracts one place by id
    ///
    /// # Returns
    ///
    /// * `Ok(PlaceStatus)` - The status written for the place
    /// * `Err(CrawlError::NotFound)` - No place with this id
    /// * `Err(CrawlError::MissingLink)` - The place has no stored link
    /// * `Err(CrawlError)` - The session could not be opened or the write failed
    pub async fn rerun_place(
        &self,
        place_id: &str,
        cancel: &CancellationToken,
    ) -> crate::Result<PlaceStatus> {
        let record = self
            .storage
            .get_place(place_id)?
            .ok_or_else(|| CrawlError::NotFound(place_id.to_string()))?;
        if record.place.href.trim().is_empty() {
            return Err(CrawlError::MissingLink(place_id.to_string()));
        }

        let started = Instant::now();
        let driver = &self.collaborators.driver;
        let options = &self.session_options;
        let session = self
            .retry
            .run("open session", cancel, || driver.open_session(options))
            .await?;

        let result = self.extract_and_store(&record, &*session).await;
        session.close().await;
        let status = result?;

        tracing::info!(
            "Rerun of {} ({}) finished as {} in {}ms",
            record.place.name,
            place_id,
            status,
            started.elapsed().as_millis()
        );
        Ok(status)
    }

    async fn extract_and_store(
        &self,
        record: &PlaceRecord,
        session: &dyn BrowserSession,
    ) -> crate::Result<PlaceStatus> {
        let place = &record.place;
        let mut tab = session.open_tab().await?;
        let extracted = self
            .collaborators
            .extractor
            .extract(&mut *tab, &place.href, &place.city)
            .await;
        tab.close().await;

        let status = match extracted {
            Ok(fields) => {
                self.storage.upsert_place_success(place, &fields)?;
                PlaceStatus::Success
            }
            Err(e) => {
                tracing::warn!("Rerun extraction failed for {}: {}", place.place_id, e);
                self.storage.upsert_place_failure(place, e.code(), e.warnings())?;
                PlaceStatus::Failed
            }
        };

        match self
            .storage
            .refresh_tile_counters(&place.city, &place.query, place.tile_index)
        {
            Ok(_) => {}
            Err(StorageError::TileNotFound { .. }) => {
                tracing::debug!("Place {} has no tile row to refresh", place.place_id)
            }
            Err(e) => return Err(e.into()),
        }

        Ok(status)
    }

    /// Re-extracts failed places matching `filter`, most recent failures first
    ///
    /// # Arguments
    ///
    /// * `filter` - City, query and error-code filter
    /// * `limit` - Maximum number of places to attempt
    /// * `workers` - Places processed concurrently
    /// * `cancel` - Checked before each place starts
    pub async fn rerun_failed(
        &self,
        filter: &FailedPlaceFilter,
        limit: Option<usize>,
        workers: usize,
        cancel: &CancellationToken,
    ) -> crate::Result<RerunSummary> {
        let ids = self.storage.select_failed_places(filter)?;
        let selected = ids.len();
        let take = limit.unwrap_or(selected).min(selected);

        tracing::info!(
            "Rerunning {} of {} failed places with {} workers",
            take,
            selected,
            workers.max(1)
        );

        let results: Vec<Option<crate::Result<PlaceStatus>>> = stream::iter(ids.into_iter().take(take))
            .map(|place_id| async move {
                if cancel.is_cancelled() {
                    return None;
                }
                let result = self.rerun_place(&place_id, cancel).await;
                if let Err(e) = &result {
                    tracing::warn!("Rerun of {} failed: {}", place_id, e);
                }
                Some(result)
            })
            .buffer_unordered(workers.max(1))
            .collect()
            .await;

        let mut summary = RerunSummary {
            selected,
            ..RerunSummary::default()
        };
        for result in results.into_iter().flatten() {
            summary.attempted += 1;
            match result {
                Ok(PlaceStatus::Success) => summary.succeeded += 1,
                Ok(PlaceStatus::Failed) | Err(_) => summary.failed += 1,
            }
        }

        tracing::info!(
            "Rerun summary: selected={} attempted={} succeeded={} failed={}",
            summary.selected,
            summary.attempted,
            summary.succeeded,
            summary.failed
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{
        BrowserDriver, DiscoveredPlace, DriverError, ExtractError, PlaceDiscoverer,
        PlaceExtractor, Tab,
    };
    use crate::storage::{PlaceFields, PlaceRef, SqliteStorage};
    use async_trait::async_trait;

    struct StubTab;

    #[async_trait]
    impl Tab for StubTab {
        async fn navigate(&mut self, _url: &str) -> Result<(), DriverError> {
            Ok(())
        }
        async fn html(&self) -> Result<String, DriverError> {
            Ok(String::new())
        }
        fn current_url(&self) -> Option<String> {
            None
        }
        async fn close(&mut self) {}
    }

    struct StubSession;

    #[async_trait]
    impl BrowserSession for StubSession {
        async fn open_tab(&self) -> Result<Box<dyn Tab>, DriverError> {
            Ok(Box::new(StubTab))
        }
        async fn close(&self) {}
    }

    struct StubDriver;

    #[async_trait]
    impl BrowserDriver for StubDriver {
        async fn open_session(
            &self,
            _options: &SessionOptions,
        ) -> Result<Arc<dyn BrowserSession>, DriverError> {
            Ok(Arc::new(StubSession))
        }
    }

    struct NoDiscovery;

    #[async_trait]
    impl PlaceDiscoverer for NoDiscovery {
        async fn discover(
            &self,
            _tab: &mut dyn Tab,
            _query: &str,
            _cancel: &CancellationToken,
        ) -> Result<Vec<DiscoveredPlace>, DriverError> {
            Ok(Vec::new())
        }
    }

    struct AlwaysOk;

    #[async_trait]
    impl PlaceExtractor for AlwaysOk {
        async fn extract(
            &self,
            _tab: &mut dyn Tab,
            _href: &str,
            _city: &str,
        ) -> Result<PlaceFields, ExtractError> {
            Ok(PlaceFields {
                address: "rerun address".to_string(),
                ..PlaceFields::default()
            })
        }
    }

    fn rerunner(storage: Arc<SqliteStorage>) -> Rerunner {
        let mut config = Config::default();
        config.retry.backoff_ms = 1;
        Rerunner::new(
            &config,
            Collaborators {
                driver: Arc::new(StubDriver),
                discoverer: Arc::new(NoDiscovery),
                extractor: Arc::new(AlwaysOk),
            },
            storage,
        )
    }

    fn place(id: &str, href: &str) -> PlaceRef {
        PlaceRef {
            place_id: id.to_string(),
            city: "Paris".to_string(),
            query: "cafe".to_string(),
            tile_index: 0,
            name: id.to_string(),
            href: href.to_string(),
            lat: 0.0,
            lng: 0.0,
            run_id: "run1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_rerun_place_not_found() {
        let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
        let result = rerunner(storage)
            .rerun_place("missing", &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(CrawlError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_rerun_place_missing_link() {
        let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
        storage
            .upsert_place_failure(&place("p1", ""), "missing_address", &[])
            .unwrap();
        let result = rerunner(storage)
            .rerun_place("p1", &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(CrawlError::MissingLink(_))));
    }

    #[tokio::test]
    async fn test_rerun_place_recovers() {
        let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
        storage
            .upsert_place_failure(&place("p1", "https://maps.example/p1"), "missing_address", &[])
            .unwrap();

        let status = rerunner(storage.clone())
            .rerun_place("p1", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(status, PlaceStatus::Success);

        let record = storage.get_place("p1").unwrap().unwrap();
        assert_eq!(record.status, PlaceStatus::Success);
        assert_eq!(record.fields.address, "rerun address");
    }

    #[tokio::test]
    async fn test_rerun_failed_respects_limit() {
        let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
        for i in 0..5 {
            let id = format!("p{}", i);
            storage
                .upsert_place_failure(&place(&id, "https://maps.example/p"), "missing_address", &[])
                .unwrap();
        }

        let summary = rerunner(storage.clone())
            .rerun_failed(
                &FailedPlaceFilter::default(),
                Some(3),
                2,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(
            summary,
            RerunSummary {
                selected: 5,
                attempted: 3,
                succeeded: 3,
                failed: 0
            }
        );
        assert_eq!(storage.count_places_by_status(PlaceStatus::Failed).unwrap(), 2);
    }

    #[tokio::test]
    async fn test_rerun_failed_cancelled() {
        let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
        storage
            .upsert_place_failure(&place("p1", "https://maps.example/p"), "x", &[])
            .unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let summary = rerunner(storage)
            .rerun_failed(&FailedPlaceFilter::default(), None, 1, &cancel)
            .await
            .unwrap();
        assert_eq!(summary.selected, 1);
        assert_eq!(summary.attempted, 0);
    }
}
