//! Progressive task scheduler
//!
//! This module handles:
//! - A bounded pool of execution slots (a tokio semaphore)
//! - Paced launches: a delay between tasks of one batch and a longer one between batches
//! - Exactly one drained result per submitted task, whatever happened to it
//!
//! Pacing exists so browser tabs are not all created at the same instant.

use crate::config::SchedulerConfig;
use crate::SchedulerError;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::Any;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, TryAcquireError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A unit of work: builds the future to run once a slot is free
pub type Task<T> = Box<dyn FnOnce() -> BoxFuture<'static, T> + Send>;

/// What became of one submitted task
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome<T> {
    /// The task ran to completion
    Completed(T),

    /// The task panicked while running in a slot
    Panicked(String),

    /// The scheduler stopped before the task was launched
    Cancelled,

    /// The task could not be launched in a slot and also failed inline
    Dropped(String),
}

impl<T> TaskOutcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, TaskOutcome::Completed(_))
    }

    pub fn into_completed(self) -> Option<T> {
        match self {
            TaskOutcome::Completed(value) => Some(value),
            _ => None,
        }
    }
}

/// Scheduler pacing and capacity
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerSettings {
    pub max_workers: usize,
    pub startup_delay: Duration,
    pub batch_size: usize,
    pub batch_delay: Duration,
    pub poll_interval: Duration,
}

impl SchedulerSettings {
    pub fn from_config(config: &SchedulerConfig, max_workers: usize) -> Self {
        Self {
            max_workers: max_workers.max(1),
            startup_delay: Duration::from_millis(config.startup_delay_ms),
            batch_size: config.batch_size.max(1),
            batch_delay: Duration::from_millis(config.batch_delay_ms),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
        }
    }
}

struct Shared<T> {
    queue: Mutex<VecDeque<Task<T>>>,
    results: Mutex<Vec<TaskOutcome<T>>>,
    /// Tasks taken off the queue and not yet reported
    active: AtomicUsize,
    running: AtomicBool,
}

impl<T> Shared<T> {
    fn queue(&self) -> MutexGuard<'_, VecDeque<Task<T>>> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn results(&self) -> MutexGuard<'_, Vec<TaskOutcome<T>>> {
        self.results.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Takes up to `n` tasks and counts them active under the queue lock
    fn take_batch(&self, n: usize) -> Vec<Task<T>> {
        let mut queue = self.queue();
        let take = n.min(queue.len());
        self.active.fetch_add(take, Ordering::SeqCst);
        queue.drain(..take).collect()
    }

    /// Returns unlaunched tasks to the front of the queue, keeping their order
    fn put_back(&self, tasks: Vec<Task<T>>) {
        let mut queue = self.queue();
        let count = tasks.len();
        for task in tasks.into_iter().rev() {
            queue.push_front(task);
        }
        self.active.fetch_sub(count, Ordering::SeqCst);
    }

    fn report(&self, outcome: TaskOutcome<T>) {
        self.results().push(outcome);
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    fn is_idle(&self) -> bool {
        let queue = self.queue();
        queue.is_empty() && self.active.load(Ordering::SeqCst) == 0
    }

    fn cancel_queued(&self) -> usize {
        let drained: Vec<Task<T>> = self.queue().drain(..).collect();
        let count = drained.len();
        if count > 0 {
            let mut results = self.results();
            results.extend(drained.into_iter().map(|_| TaskOutcome::Cancelled));
        }
        count
    }
}

/// Launches queued tasks into a bounded slot pool at a controlled pace
///
/// The scheduler coordinates:
/// - A fixed number of slots (`max_workers`); active tasks never exceed it
/// - A dispatch loop that launches at most `batch_size` tasks per round, sleeping
///   `startup_delay` between launches and `batch_delay` after a full batch
/// - A result list drained with `get_results` or `wait_for_completion`
pub struct ProgressiveScheduler<T: Send + 'static> {
    settings: SchedulerSettings,
    shared: Arc<Shared<T>>,
    slots: Arc<Semaphore>,
    cancel: CancellationToken,
    stop_token: CancellationToken,
    dispatcher: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> ProgressiveScheduler<T> {
    /// Creates a stopped scheduler
    ///
    /// # Arguments
    ///
    /// * `settings` - Capacity and pacing
    /// * `cancel` - Crawl-wide cancellation; firing it halts dispatch
    pub fn new(settings: SchedulerSettings, cancel: CancellationToken) -> Self {
        let slots = Arc::new(Semaphore::new(settings.max_workers.max(1)));
        let stop_token = cancel.child_token();
        Self {
            settings,
            shared: Arc::new(Shared {
                queue: Mutex::new(VecDeque::new()),
                results: Mutex::new(Vec::new()),
                active: AtomicUsize::new(0),
                running: AtomicBool::new(false),
            }),
            slots,
            cancel,
            stop_token,
            dispatcher: None,
        }
    }

    /// Starts the dispatch loop; calling it again has no effect
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&mut self) {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.stop_token.is_cancelled() {
            self.stop_token = self.cancel.child_token();
        }

        let shared = Arc::clone(&self.shared);
        let slots = Arc::clone(&self.slots);
        let settings = self.settings.clone();
        let stop = self.stop_token.clone();

        self.dispatcher = Some(tokio::spawn(dispatch_loop(shared, slots, settings, stop)));
        tracing::debug!(
            "Scheduler started (max_workers={}, batch_size={})",
            self.settings.max_workers,
            self.settings.batch_size
        );
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Queues one task
    pub fn submit(&self, task: Task<T>) -> Result<(), SchedulerError> {
        if !self.is_running() {
            return Err(SchedulerError::NotRunning);
        }
        self.shared.queue().push_back(task);
        Ok(())
    }

    /// Queues several tasks, preserving their order
    pub fn submit_batch(&self, tasks: Vec<Task<T>>) -> Result<(), SchedulerError> {
        if !self.is_running() {
            return Err(SchedulerError::NotRunning);
        }
        self.shared.queue().extend(tasks);
        Ok(())
    }

    /// Number of tasks launched or being launched
    pub fn active_count(&self) -> usize {
        self.shared.active.load(Ordering::SeqCst)
    }

    pub fn queued_count(&self) -> usize {
        self.shared.queue().len()
    }

    /// Drains finished results without blocking
    pub fn get_results(&self) -> Vec<TaskOutcome<T>> {
        std::mem::take(&mut *self.shared.results())
    }

    /// Waits until nothing is queued or active, the timeout passes, or the crawl is
    /// cancelled
    ///
    /// # Returns
    ///
    /// Every result drained while waiting
    pub async fn wait_for_completion(&self, timeout: Option<Duration>) -> Vec<TaskOutcome<T>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut drained = Vec::new();

        loop {
            drained.extend(self.get_results());

            if self.shared.is_idle() {
                drained.extend(self.get_results());
                break;
            }
            if self.cancel.is_cancelled() {
                break;
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    tracing::warn!(
                        "Scheduler wait timed out with {} queued and {} active",
                        self.queued_count(),
                        self.active_count()
                    );
                    break;
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => {}
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
            }
        }

        drained
    }

    /// Stops dispatching
    ///
    /// Tasks still queued are reported as `Cancelled`. In-flight tasks are never
    /// interrupted; with `wait` this returns only after they have finished.
    pub async fn stop(&mut self, wait: bool) {
        self.shared.running.store(false, Ordering::SeqCst);
        self.stop_token.cancel();

        if wait {
            if let Some(handle) = self.dispatcher.take() {
                if let Err(e) = handle.await {
                    tracing::error!("Scheduler dispatch loop failed: {}", e);
                }
            }
            while self.shared.active.load(Ordering::SeqCst) > 0 {
                tokio::time::sleep(self.settings.poll_interval).await;
            }
        }

        let cancelled = self.shared.cancel_queued();
        if cancelled > 0 {
            tracing::debug!("Scheduler stopped with {} queued tasks cancelled", cancelled);
        }
    }

    /// Closes the slot pool; later launches run inline on the dispatch loop
    pub fn close_pool(&self) {
        self.slots.close();
    }
}

impl<T: Send + 'static> Drop for ProgressiveScheduler<T> {
    fn drop(&mut self) {
        self.stop_token.cancel();
    }
}

async fn dispatch_loop<T: Send + 'static>(
    shared: Arc<Shared<T>>,
    slots: Arc<Semaphore>,
    settings: SchedulerSettings,
    stop: CancellationToken,
) {
    let batch_size = settings.batch_size.max(1);

    while shared.running.load(Ordering::SeqCst) && !stop.is_cancelled() {
        let free = slots.available_permits();
        let batch = if free > 0 {
            shared.take_batch(batch_size.min(free))
        } else {
            Vec::new()
        };

        if batch.is_empty() {
            pause(&stop, settings.poll_interval).await;
            continue;
        }

        let full_batch = batch.len() == batch_size;
        let mut remaining: VecDeque<Task<T>> = batch.into();
        let mut launched = 0usize;

        while let Some(task) = remaining.pop_front() {
            if launched > 0 && !pause(&stop, settings.startup_delay).await {
                remaining.push_front(task);
                break;
            }
            if let Some(task) = launch(&shared, &slots, task).await {
                // No permit despite the free count; retry next round
                remaining.push_front(task);
                break;
            }
            launched += 1;
        }

        if !remaining.is_empty() {
            shared.put_back(remaining.into());
            continue;
        }

        if full_batch {
            tracing::trace!("Batch of {} launched, pausing {:?}", launched, settings.batch_delay);
            pause(&stop, settings.batch_delay).await;
        }
    }

    shared.cancel_queued();
}

/// Sleeps unless stopped first; returns false when stopped
async fn pause(stop: &CancellationToken, duration: Duration) -> bool {
    if duration.is_zero() {
        return !stop.is_cancelled();
    }
    tokio::select! {
        _ = stop.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// Launches a task into a slot, or inline when the pool is closed
///
/// Returns the task back when no permit is currently available.
async fn launch<T: Send + 'static>(
    shared: &Arc<Shared<T>>,
    slots: &Arc<Semaphore>,
    task: Task<T>,
) -> Option<Task<T>> {
    match Arc::clone(slots).try_acquire_owned() {
        Ok(permit) => {
            let shared = Arc::clone(shared);
            tokio::spawn(async move {
                let outcome = run_guarded(task).await;
                if let TaskOutcome::Panicked(message) = &outcome {
                    tracing::error!("Scheduled task panicked: {}", message);
                }
                shared.report(outcome);
                drop(permit);
            });
            None
        }
        Err(TryAcquireError::Closed) => {
            tracing::warn!("Slot pool closed, running task inline");
            let outcome = match run_guarded(task).await {
                TaskOutcome::Panicked(message) => {
                    tracing::error!("Task dropped after inline failure: {}", message);
                    TaskOutcome::Dropped(message)
                }
                other => other,
            };
            shared.report(outcome);
            None
        }
        Err(TryAcquireError::NoPermits) => Some(task),
    }
}

async fn run_guarded<T>(task: Task<T>) -> TaskOutcome<T> {
    let future = match std::panic::catch_unwind(AssertUnwindSafe(task)) {
        Ok(future) => future,
        Err(payload) => return TaskOutcome::Panicked(panic_message(payload)),
    };

    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(value) => TaskOutcome::Completed(value),
        Err(payload) => TaskOutcome::Panicked(panic_message(payload)),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_string()
    }
}

/// Boxes an async closure into a `Task`
pub fn task<T, F, Fut>(f: F) -> Task<T>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = T> + Send + 'static,
{
    Box::new(move || f().boxed())
}
