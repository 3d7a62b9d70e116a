//! Integration tests for re-extraction of failed places

mod common;

use common::*;
use gmaps_grid::browser::ProxyPool;
use gmaps_grid::config::ProxyStrategy;
use gmaps_grid::crawler::{CityCrawlDriver, CrawlRequest, RerunSummary, Rerunner};
use gmaps_grid::state::PlaceStatus;
use gmaps_grid::storage::{FailedPlaceFilter, FieldWarning, SqliteStorage, Storage};
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Crawls the two-tile grid with `P1` failing on every tile and no end-of-run rerun
async fn crawl_with_failures(
    storage: &Arc<SqliteStorage>,
    extractor: &Arc<StubExtractor>,
) {
    let mut config = test_config();
    config.rerun.enabled = false;

    let driver = CityCrawlDriver::new(
        config,
        collaborators(
            Arc::new(StubDriver::default()),
            Arc::new(GridDiscoverer::new(3)),
            extractor.clone(),
        ),
        storage.clone(),
        Arc::new(StaticBbox {
            bbox: two_by_one_km(),
            calls: AtomicUsize::new(0),
        }),
        Arc::new(ProxyPool::new(Vec::new(), ProxyStrategy::RoundRobin)),
    );
    let summary = driver
        .run(
            &CrawlRequest {
                city: "Lyon".to_string(),
                country: None,
                query: "bakery".to_string(),
                config_hash: None,
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(summary.rerun, None);
}

fn rerunner(storage: &Arc<SqliteStorage>, extractor: &Arc<StubExtractor>) -> Rerunner {
    Rerunner::new(
        &test_config(),
        collaborators(
            Arc::new(StubDriver::default()),
            Arc::new(GridDiscoverer::new(0)),
            extractor.clone(),
        ),
        storage.clone(),
    )
}

fn lyon_bakeries() -> FailedPlaceFilter {
    FailedPlaceFilter {
        city: Some("Lyon".to_string()),
        query: Some("bakery".to_string()),
        error_codes: Vec::new(),
    }
}

#[tokio::test]
async fn test_rerun_failed_after_recovery() {
    let (_dir, storage) = temp_storage();
    let extractor = Arc::new(StubExtractor::failing("P1"));
    crawl_with_failures(&storage, &extractor).await;
    assert_eq!(storage.count_places_by_status(PlaceStatus::Failed).unwrap(), 2);

    extractor.heal();
    let summary = rerunner(&storage, &extractor)
        .rerun_failed(&lyon_bakeries(), Some(1), 2, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        summary,
        RerunSummary {
            selected: 2,
            attempted: 1,
            succeeded: 1,
            failed: 0
        }
    );
    assert_eq!(storage.count_places_by_status(PlaceStatus::Failed).unwrap(), 1);
    assert_eq!(storage.count_places_by_status(PlaceStatus::Success).unwrap(), 5);

    // Tile counters follow the rerun
    let tiles = storage.list_tiles("Lyon", "bakery").unwrap();
    let processed: u32 = tiles.iter().map(|t| t.processed_count).sum();
    let failed: u32 = tiles.iter().map(|t| t.failed_count).sum();
    assert_eq!((processed, failed), (5, 1));
}

#[tokio::test]
async fn test_rerun_filters_by_error_code() {
    let (_dir, storage) = temp_storage();
    let extractor = Arc::new(StubExtractor::failing("P1"));
    crawl_with_failures(&storage, &extractor).await;
    extractor.heal();

    let mut filter = lyon_bakeries();
    filter.error_codes = vec!["navigation_error".to_string()];
    let summary = rerunner(&storage, &extractor)
        .rerun_failed(&filter, None, 2, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.selected, 0);

    filter.error_codes = vec!["missing_address".to_string()];
    let summary = rerunner(&storage, &extractor)
        .rerun_failed(&filter, None, 2, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.selected, 2);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(storage.count_places_by_status(PlaceStatus::Failed).unwrap(), 0);
}

#[tokio::test]
async fn test_rerun_single_place() {
    let (_dir, storage) = temp_storage();
    let extractor = Arc::new(StubExtractor::failing("P1"));
    crawl_with_failures(&storage, &extractor).await;

    let ids = storage.select_failed_places(&lyon_bakeries()).unwrap();
    assert_eq!(ids.len(), 2);
    let phone_missing = vec![FieldWarning {
        field: "phone".to_string(),
        error: "not_found".to_string(),
    }];
    let record = storage.get_place(&ids[0]).unwrap().unwrap();
    assert_eq!(record.fields.warnings, phone_missing);

    // Still broken: the place stays failed with the same code
    let status = rerunner(&storage, &extractor)
        .rerun_place(&ids[0], &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(status, PlaceStatus::Failed);
    let record = storage.get_place(&ids[0]).unwrap().unwrap();
    assert_eq!(record.last_error.as_deref(), Some("missing_address"));
    assert_eq!(record.fields.warnings, phone_missing);

    extractor.heal();
    let status = rerunner(&storage, &extractor)
        .rerun_place(&ids[0], &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(status, PlaceStatus::Success);
    let record = storage.get_place(&ids[0]).unwrap().unwrap();
    assert_eq!(record.fields.address, "1 Test Street, Lyon");
}
