//! Per-tile tab pool and extraction workers
//!
//! A `TabPool` is an arena of tab slots opened from one browser session. Worker `i`
//! checks out slot `i` for each place it extracts and checks it back in afterwards. A
//! tab that hit a browser error is closed instead and reopened on the next checkout.

use super::tasks::PlaceTask;
use super::writer::{WriteRequest, WriterHandle};
use crate::browser::{BrowserSession, ExtractError, PlaceExtractor, Tab};
use crate::CrawlError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Fixed set of tab slots over one session
pub struct TabPool {
    session: Arc<dyn BrowserSession>,
    slots: Mutex<Vec<Option<Box<dyn Tab>>>>,
}

impl TabPool {
    pub fn new(session: Arc<dyn BrowserSession>, size: usize) -> Self {
        let slots = (0..size.max(1)).map(|_| None).collect();
        Self {
            session,
            slots: Mutex::new(slots),
        }
    }

    pub fn size(&self) -> usize {
        self.slots().len()
    }

    fn slots(&self) -> MutexGuard<'_, Vec<Option<Box<dyn Tab>>>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Takes the tab of a slot, opening one if the slot is empty
    pub async fn checkout(&self, slot: usize) -> crate::Result<Box<dyn Tab>> {
        let existing = {
            let mut slots = self.slots();
            let entry = slots.get_mut(slot).ok_or_else(|| {
                CrawlError::InvalidArgument(format!("tab slot {} out of range", slot))
            })?;
            entry.take()
        };

        match existing {
            Some(tab) => Ok(tab),
            None => Ok(self.session.open_tab().await?),
        }
    }

    /// Returns a tab to its slot
    pub fn checkin(&self, slot: usize, tab: Box<dyn Tab>) {
        let mut slots = self.slots();
        if let Some(entry) = slots.get_mut(slot) {
            *entry = Some(tab);
        }
    }

    /// Closes every parked tab
    pub async fn close_all(&self) {
        let tabs: Vec<Box<dyn Tab>> = self.slots().iter_mut().filter_map(Option::take).collect();
        for mut tab in tabs {
            tab.close().await;
        }
    }
}

/// Everything the workers of one tile share
pub struct WorkerContext {
    pub pool: Arc<TabPool>,
    pub queue: tokio::sync::Mutex<mpsc::UnboundedReceiver<PlaceTask>>,
    pub extractor: Arc<dyn PlaceExtractor>,
    pub writer: WriterHandle,
    pub city: String,
    /// Tasks not yet handed to the writer
    pub pending: AtomicUsize,
    pub cancel: CancellationToken,
}

/// What one worker loop did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub slot: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Pulls tasks until the queue is closed and empty, or the crawl is cancelled
pub async fn run_worker(slot: usize, ctx: Arc<WorkerContext>) -> crate::Result<WorkerReport> {
    let mut report = WorkerReport {
        slot,
        ..WorkerReport::default()
    };

    loop {
        if ctx.cancel.is_cancelled() {
            break;
        }

        let next = {
            let mut queue = ctx.queue.lock().await;
            tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => None,
                task = queue.recv() => task,
            }
        };
        let Some(task) = next else {
            break;
        };

        let request = extract_one(slot, &ctx, task).await;
        let succeeded = matches!(request, WriteRequest::Success { .. });

        let submitted = ctx.writer.submit(request).await;
        ctx.pending.fetch_sub(1, Ordering::SeqCst);
        submitted?;

        if succeeded {
            report.succeeded += 1;
        } else {
            report.failed += 1;
        }
    }

    tracing::debug!(
        "Worker {} done: {} ok, {} failed",
        slot,
        report.succeeded,
        report.failed
    );
    Ok(report)
}

/// Extracts one place; every extraction failure becomes a failure write
async fn extract_one(
    slot: usize,
    ctx: &WorkerContext,
    task: PlaceTask,
) -> WriteRequest {
    let PlaceTask { place } = task;

    let mut tab = match ctx.pool.checkout(slot).await {
        Ok(tab) => tab,
        Err(e) => {
            tracing::warn!("Worker {} could not open a tab: {}", slot, e);
            return WriteRequest::Failure {
                place,
                last_error: "tab_error".to_string(),
                warnings: Vec::new(),
            };
        }
    };

    let started = Instant::now();
    let result = ctx
        .extractor
        .extract(&mut *tab, &place.href, &ctx.city)
        .await;
    let elapsed_ms = started.elapsed().as_millis();

    match result {
        Ok(fields) => {
            ctx.pool.checkin(slot, tab);
            tracing::debug!(
                "Extracted {} ({}) in {}ms",
                place.name,
                place.place_id,
                elapsed_ms
            );
            WriteRequest::Success { place, fields }
        }
        Err(e) => {
            if matches!(e, ExtractError::Driver(_)) {
                tab.close().await;
            } else {
                ctx.pool.checkin(slot, tab);
            }
            tracing::warn!(
                "Extraction failed for {} ({}) after {}ms: {}",
                place.name,
                place.place_id,
                elapsed_ms,
                e
            );
            WriteRequest::Failure {
                place,
                last_error: e.code().to_string(),
                warnings: e.warnings().to_vec(),
            }
        }
    }
}
