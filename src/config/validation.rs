use crate::config::types::{
    Config, CrawlConfig, RerunConfig, RetryConfig, SchedulerConfig, StorageConfig, WriterConfig,
};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawl_config(&config.crawl)?;
    validate_scheduler_config(&config.scheduler)?;
    validate_writer_config(&config.writer)?;
    validate_rerun_config(&config.rerun)?;
    validate_storage_config(&config.storage)?;
    validate_retry_config(&config.retry)?;
    validate_proxies(&config.proxy.proxies)?;
    validate_endpoints(&config.geocoding.endpoints)?;
    Ok(())
}

/// Validates crawl configuration
fn validate_crawl_config(config: &CrawlConfig) -> Result<(), ConfigError> {
    if config.language.trim().is_empty() {
        return Err(ConfigError::Validation(
            "language cannot be empty".to_string(),
        ));
    }

    if config.zoom > 21 {
        return Err(ConfigError::Validation(format!(
            "zoom must be between 0 and 21, got {}",
            config.zoom
        )));
    }

    if config.workers < 1 || config.workers > 32 {
        return Err(ConfigError::Validation(format!(
            "workers must be between 1 and 32, got {}",
            config.workers
        )));
    }

    if config.window_width == 0 || config.window_height == 0 {
        return Err(ConfigError::Validation(format!(
            "window size must be positive, got {}x{}",
            config.window_width, config.window_height
        )));
    }

    if !(0.0..1.0).contains(&config.overlap_ratio) {
        return Err(ConfigError::Validation(format!(
            "overlap_ratio must be in [0, 1), got {}",
            config.overlap_ratio
        )));
    }

    for (name, value) in [
        ("cell_width_km", config.cell_width_km),
        ("cell_height_km", config.cell_height_km),
    ] {
        if let Some(v) = value {
            if !(v.is_finite() && v > 0.0) {
                return Err(ConfigError::Validation(format!(
                    "{} must be > 0, got {}",
                    name, v
                )));
            }
        }
    }

    if config.cell_width_km.is_some() != config.cell_height_km.is_some() {
        return Err(ConfigError::Validation(
            "cell_width_km and cell_height_km must be set together".to_string(),
        ));
    }

    if !(config.cell_safety_factor > 0.0 && config.cell_safety_factor <= 1.0) {
        return Err(ConfigError::Validation(format!(
            "cell_safety_factor must be in (0, 1], got {}",
            config.cell_safety_factor
        )));
    }

    Ok(())
}

/// Validates scheduler pacing
fn validate_scheduler_config(config: &SchedulerConfig) -> Result<(), ConfigError> {
    if config.batch_size < 1 {
        return Err(ConfigError::Validation(format!(
            "batch_size must be >= 1, got {}",
            config.batch_size
        )));
    }

    if config.poll_interval_ms < 10 {
        return Err(ConfigError::Validation(format!(
            "poll_interval_ms must be >= 10ms, got {}ms",
            config.poll_interval_ms
        )));
    }

    Ok(())
}

fn validate_writer_config(config: &WriterConfig) -> Result<(), ConfigError> {
    if config.progress_every < 1 {
        return Err(ConfigError::Validation(
            "progress_every must be >= 1".to_string(),
        ));
    }

    if config.queue_capacity < 1 {
        return Err(ConfigError::Validation(
            "queue_capacity must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_rerun_config(config: &RerunConfig) -> Result<(), ConfigError> {
    if config.workers < 1 {
        return Err(ConfigError::Validation(format!(
            "rerun workers must be >= 1, got {}",
            config.workers
        )));
    }
    Ok(())
}

fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_retry_config(config: &RetryConfig) -> Result<(), ConfigError> {
    if config.attempts < 1 {
        return Err(ConfigError::Validation(
            "retry attempts must be >= 1".to_string(),
        ));
    }
    Ok(())
}

/// Proxies must be absolute URLs (scheme://host:port)
fn validate_proxies(proxies: &[String]) -> Result<(), ConfigError> {
    for proxy in proxies {
        Url::parse(proxy)
            .map_err(|e| ConfigError::Validation(format!("Invalid proxy '{}': {}", proxy, e)))?;
    }
    Ok(())
}

fn validate_endpoints(endpoints: &[String]) -> Result<(), ConfigError> {
    for endpoint in endpoints {
        let url = Url::parse(endpoint).map_err(|e| {
            ConfigError::Validation(format!("Invalid Overpass endpoint '{}': {}", endpoint, e))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Validation(format!(
                "Overpass endpoint must be http(s), got '{}'",
                endpoint
            )));
        }
    }
    Ok(())
}
