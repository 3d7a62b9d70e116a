//! Asynchronous result writer
//!
//! Workers hand finished extractions to a bounded queue. One dedicated OS thread drains
//! it in FIFO order and performs the blocking SQLite writes, so workers never wait on the
//! database.

use crate::storage::{FieldWarning, PlaceFields, PlaceRef, Storage};
use crate::CrawlError;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc;

/// One place outcome to persist
#[derive(Debug, Clone, PartialEq)]
pub enum WriteRequest {
    Success {
        place: PlaceRef,
        fields: PlaceFields,
    },
    Failure {
        place: PlaceRef,
        last_error: String,
        warnings: Vec<FieldWarning>,
    },
}

impl WriteRequest {
    pub fn place_id(&self) -> &str {
        match self {
            WriteRequest::Success { place, .. } | WriteRequest::Failure { place, .. } => {
                &place.place_id
            }
        }
    }
}

enum Message {
    Write(Box<WriteRequest>),
    Stop,
}

/// Counters kept by the writer thread
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub succeeded: u64,
    pub failed: u64,
    pub write_errors: u64,
}

impl WriterStats {
    pub fn written(&self) -> u64 {
        self.succeeded + self.failed
    }
}

/// Writer queue settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterSettings {
    pub queue_capacity: usize,
    pub progress_every: u64,
}

impl Default for WriterSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            progress_every: 10,
        }
    }
}

/// Cloneable sending side of a `ResultWriter`
#[derive(Clone)]
pub struct WriterHandle {
    sender: mpsc::Sender<Message>,
}

impl WriterHandle {
    /// Queues a write, waiting while the queue is full
    pub async fn submit(&self, request: WriteRequest) -> crate::Result<()> {
        self.sender
            .send(Message::Write(Box::new(request)))
            .await
            .map_err(|_| CrawlError::Task("result writer has stopped".to_string()))
    }
}

/// Single consumer thread that persists place outcomes
pub struct ResultWriter {
    sender: mpsc::Sender<Message>,
    thread: Option<JoinHandle<WriterStats>>,
    label: String,
}

impl ResultWriter {
    /// Spawns the writer thread
    ///
    /// # Arguments
    ///
    /// * `storage` - Store the thread writes to
    /// * `settings` - Queue capacity and progress log interval
    /// * `label` - Prefix for log lines, e.g. `tile 3`
    ///
    /// # Returns
    ///
    /// * `Ok(ResultWriter)` - The running writer
    /// * `Err(CrawlError::Io)` - The thread could not be spawned
    pub fn spawn(
        storage: Arc<dyn Storage>,
        settings: WriterSettings,
        label: impl Into<String>,
    ) -> crate::Result<Self> {
        let label = label.into();
        let (sender, receiver) = mpsc::channel(settings.queue_capacity.max(1));

        let thread_label = label.clone();
        let thread = std::thread::Builder::new()
            .name("result-writer".to_string())
            .spawn(move || consume(storage, receiver, settings, &thread_label))?;

        Ok(Self {
            sender,
            thread: Some(thread),
            label,
        })
    }

    pub fn handle(&self) -> WriterHandle {
        WriterHandle {
            sender: self.sender.clone(),
        }
    }

    /// Stops the writer after every queued write has been applied
    ///
    /// # Returns
    ///
    /// The final counters
    pub async fn stop(mut self) -> crate::Result<WriterStats> {
        if self.sender.send(Message::Stop).await.is_err() {
            tracing::warn!("[{}] writer thread already exited", self.label);
        }

        let Some(thread) = self.thread.take() else {
            return Ok(WriterStats::default());
        };

        let joined = tokio::task::spawn_blocking(move || thread.join())
            .await
            .map_err(|e| CrawlError::Task(format!("writer join failed: {}", e)))?;

        joined.map_err(|_| CrawlError::Task("writer thread panicked".to_string()))
    }
}

fn consume(
    storage: Arc<dyn Storage>,
    mut receiver: mpsc::Receiver<Message>,
    settings: WriterSettings,
    label: &str,
) -> WriterStats {
    let mut stats = WriterStats::default();
    let progress_every = settings.progress_every.max(1);

    while let Some(message) = receiver.blocking_recv() {
        let request = match message {
            Message::Write(request) => request,
            Message::Stop => break,
        };

        let result = match request.as_ref() {
            WriteRequest::Success { place, fields } => storage
                .upsert_place_success(place, fields)
                .map(|_| stats.succeeded += 1),
            WriteRequest::Failure {
                place,
                last_error,
                warnings,
            } => storage
                .upsert_place_failure(place, last_error, warnings)
                .map(|_| stats.failed += 1),
        };

        if let Err(e) = result {
            stats.write_errors += 1;
            tracing::error!("[{}] failed to write place {}: {}", label, request.place_id(), e);
            continue;
        }

        if stats.written() % progress_every == 0 {
            tracing::info!(
                "[{}] written {} places ({} ok, {} failed)",
                label,
                stats.written(),
                stats.succeeded,
                stats.failed
            );
        }
    }

    tracing::debug!(
        "[{}] writer finished: {} ok, {} failed, {} write errors",
        label,
        stats.succeeded,
        stats.failed,
        stats.write_errors
    );
    stats
}
