//! Crawler module for tiled place collection
//!
//! This module contains the core crawling logic, including:
//! - City orchestration over a persisted tile grid
//! - Per-tile discovery and paced extraction workers
//! - Asynchronous result writing
//! - Re-extraction of failed places

mod driver;
mod rerun;
mod retry;
mod scheduler;
mod tasks;
mod tile_runner;
mod worker_pool;
mod writer;

pub use driver::{CityCrawlDriver, CrawlRequest, CrawlSummary};
pub use rerun::{RerunSummary, Rerunner};
pub use retry::RetryPolicy;
pub use scheduler::{task, ProgressiveScheduler, SchedulerSettings, Task, TaskOutcome};
pub use tasks::{build_place_tasks, PlaceTask, TaskBuildStats, TileScope};
pub use tile_runner::{TileJob, TileOutcome, TileRunner};
pub use worker_pool::{run_worker, TabPool, WorkerContext, WorkerReport};
pub use writer::{ResultWriter, WriteRequest, WriterHandle, WriterSettings, WriterStats};
