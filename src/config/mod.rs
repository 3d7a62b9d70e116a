//! Configuration module for gmaps-grid
//!
//! This module handles loading, parsing, and validating TOML configuration files,
//! and applies `GMAPS_*` environment overrides on top of them.
//!
//! # Example
//!
//! ```no_run
//! use gmaps_grid::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("gmaps.toml")).unwrap();
//! println!("Tabs per tile: {}", config.crawl.workers);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, CrawlConfig, GeocodingConfig, ProxyConfig, ProxyStrategy, RerunConfig, RetryConfig,
    SchedulerConfig, StorageConfig, WriterConfig,
};

// Re-export parser functions
pub use parser::{
    apply_env_overrides, compute_config_hash, load_config, load_config_with_hash, parse_config,
};
pub use validation::validate;
