//! Single-tile crawl
//!
//! This module handles one tile end to end:
//! - Opening a browser session (retried, behind the next proxy)
//! - Loading the tile's search page and discovering result cards
//! - Building extraction tasks for places that are not done yet
//! - Draining them with paced tab workers whose outcomes go through a `ResultWriter`

use super::retry::RetryPolicy;
use super::scheduler::{task, ProgressiveScheduler, SchedulerSettings, TaskOutcome};
use super::tasks::{build_place_tasks, PlaceTask, TileScope};
use super::worker_pool::{run_worker, TabPool, WorkerContext, WorkerReport};
use super::writer::{ResultWriter, WriterSettings};
use crate::browser::{BrowserSession, Collaborators, ProxyPool, SessionOptions};
use crate::config::Config;
use crate::geo::TilePoint;
use crate::storage::Storage;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// One tile to crawl
#[derive(Debug, Clone, PartialEq)]
pub struct TileJob {
    pub scope: TileScope,
    pub point: TilePoint,
    pub url: String,
}

/// Result of crawling one tile
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TileOutcome {
    /// Cards discovered on the search page
    pub seen: usize,
    /// Successful place writes
    pub inserted: usize,
    /// Failed place writes
    pub failed: usize,
    /// Cancellation cut the tile short
    pub interrupted: bool,
}

/// Crawls tiles with a fixed set of collaborators and settings
pub struct TileRunner {
    collaborators: Collaborators,
    storage: Arc<dyn Storage>,
    proxies: Arc<ProxyPool>,
    session_options: SessionOptions,
    workers: usize,
    scheduler: SchedulerSettings,
    writer: WriterSettings,
    retry: RetryPolicy,
}

impl TileRunner {
    pub fn new(
        config: &Config,
        collaborators: Collaborators,
        storage: Arc<dyn Storage>,
        proxies: Arc<ProxyPool>,
    ) -> Self {
        let workers = config.crawl.workers.max(1);
        Self {
            collaborators,
            storage,
            proxies,
            session_options: SessionOptions {
                headless: config.crawl.headless,
                window_width: config.crawl.window_width,
                window_height: config.crawl.window_height,
                proxy: None,
                page_timeout: Duration::from_secs(config.crawl.page_timeout_secs),
            },
            workers,
            scheduler: SchedulerSettings::from_config(&config.scheduler, workers),
            writer: WriterSettings {
                queue_capacity: config.writer.queue_capacity,
                progress_every: config.writer.progress_every,
            },
            retry: RetryPolicy::from_config(&config.retry),
        }
    }

    /// Crawls one tile
    ///
    /// # Returns
    ///
    /// * `Ok(TileOutcome)` - The tile ran (possibly cut short by cancellation)
    /// * `Err(CrawlError)` - A tile-level failure: no session, no search page, no
    ///   discovery, or a storage error while building tasks
    pub async fn run(
        &self,
        job: &TileJob,
        cancel: &CancellationToken,
    ) -> crate::Result<TileOutcome> {
        let index = job.scope.tile_index;
        let mut options = self.session_options.clone();
        options.proxy = self.proxies.next_proxy();
        if let Some(proxy) = &options.proxy {
            tracing::info!("[tile {}] using proxy {}", index, proxy);
        }

        let started = Instant::now();
        let driver = &self.collaborators.driver;
        let session = self
            .retry
            .run("open session", cancel, || driver.open_session(&options))
            .await?;
        tracing::debug!(
            "[tile {}] session opened in {}ms",
            index,
            started.elapsed().as_millis()
        );

        let result = self.run_in_session(job, Arc::clone(&session), cancel).await;
        session.close().await;
        result
    }

    async fn run_in_session(
        &self,
        job: &TileJob,
        session: Arc<dyn BrowserSession>,
        cancel: &CancellationToken,
    ) -> crate::Result<TileOutcome> {
        let index = job.scope.tile_index;

        let started = Instant::now();
        let mut search_tab = session.open_tab().await?;
        let navigated = search_tab.navigate(&job.url).await;
        if let Err(e) = navigated {
            search_tab.close().await;
            return Err(e.into());
        }
        tracing::debug!(
            "[tile {}] search page loaded in {}ms",
            index,
            started.elapsed().as_millis()
        );

        let started = Instant::now();
        let discovered = self
            .collaborators
            .discoverer
            .discover(&mut *search_tab, &job.scope.query, cancel)
            .await;
        search_tab.close().await;
        let discovered = match discovered {
            Ok(places) => places,
            Err(_) if cancel.is_cancelled() => {
                return Ok(TileOutcome {
                    interrupted: true,
                    ..TileOutcome::default()
                })
            }
            Err(e) => return Err(e.into()),
        };
        tracing::info!(
            "[tile {}] collected {} cards in {}ms",
            index,
            discovered.len(),
            started.elapsed().as_millis()
        );

        let seen = discovered.len();
        if cancel.is_cancelled() {
            return Ok(TileOutcome {
                seen,
                interrupted: true,
                ..TileOutcome::default()
            });
        }

        let (tasks, stats) = build_place_tasks(&discovered, &job.scope, self.storage.as_ref())?;
        tracing::info!(
            "[tile {}] {} tasks ({} already done, {} duplicates, {} without coordinates)",
            index,
            tasks.len(),
            stats.already_done,
            stats.duplicates,
            stats.unparsed
        );

        if tasks.is_empty() {
            return Ok(TileOutcome {
                seen,
                ..TileOutcome::default()
            });
        }

        let (inserted, failed, pending) = self.drain_tasks(job, session, tasks, cancel).await?;
        let interrupted = cancel.is_cancelled() && pending > 0;

        tracing::info!(
            "[tile {}] summary: seen={} inserted={} failed={}{}",
            index,
            seen,
            inserted,
            failed,
            if interrupted { " (interrupted)" } else { "" }
        );

        Ok(TileOutcome {
            seen,
            inserted,
            failed,
            interrupted,
        })
    }

    /// Runs the worker pool over `tasks`; returns (inserted, failed, still pending)
    async fn drain_tasks(
        &self,
        job: &TileJob,
        session: Arc<dyn BrowserSession>,
        tasks: Vec<PlaceTask>,
        cancel: &CancellationToken,
    ) -> crate::Result<(usize, usize, usize)> {
        let index = job.scope.tile_index;
        let total = tasks.len();
        let workers = self.workers.min(total).max(1);

        let writer = ResultWriter::spawn(
            Arc::clone(&self.storage),
            self.writer,
            format!("tile {}", index),
        )?;

        let (sender, receiver) = mpsc::unbounded_channel();
        for task in tasks {
            // The receiver is alive until the context is dropped below
            let _ = sender.send(task);
        }
        // Closing the channel is the drain signal
        drop(sender);

        let pool = Arc::new(TabPool::new(session, workers));
        let ctx = Arc::new(WorkerContext {
            pool: Arc::clone(&pool),
            queue: tokio::sync::Mutex::new(receiver),
            extractor: Arc::clone(&self.collaborators.extractor),
            writer: writer.handle(),
            city: job.scope.city.clone(),
            pending: AtomicUsize::new(total),
            cancel: cancel.clone(),
        });

        let mut settings = self.scheduler.clone();
        settings.max_workers = workers;
        let mut scheduler: ProgressiveScheduler<crate::Result<WorkerReport>> =
            ProgressiveScheduler::new(settings, cancel.clone());
        scheduler.start();

        let loops = (0..workers)
            .map(|slot| {
                let ctx = Arc::clone(&ctx);
                task(move || run_worker(slot, ctx))
            })
            .collect();
        scheduler.submit_batch(loops)?;

        let mut outcomes = scheduler.wait_for_completion(None).await;
        scheduler.stop(true).await;
        outcomes.extend(scheduler.get_results());

        for outcome in outcomes {
            match outcome {
                TaskOutcome::Completed(Ok(_)) => {}
                TaskOutcome::Completed(Err(e)) => {
                    tracing::warn!("[tile {}] worker stopped early: {}", index, e)
                }
                TaskOutcome::Panicked(message) | TaskOutcome::Dropped(message) => {
                    tracing::error!("[tile {}] worker failed: {}", index, message)
                }
                TaskOutcome::Cancelled => {
                    tracing::debug!("[tile {}] worker not started before cancel", index)
                }
            }
        }

        pool.close_all().await;
        let pending = ctx.pending.load(Ordering::SeqCst);
        drop(ctx);

        let stats = writer.stop().await?;
        if stats.write_errors > 0 {
            tracing::warn!("[tile {}] {} place writes failed", index, stats.write_errors);
        }

        Ok((stats.succeeded as usize, stats.failed as usize, pending))
    }
}
