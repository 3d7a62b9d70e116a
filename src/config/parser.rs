use crate::config::types::{Config, ProxyStrategy};
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads and parses a configuration file from the given path
///
/// Environment overrides are applied after parsing, then the result is validated.
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use gmaps_grid::config::load_config;
///
/// let config = load_config(Path::new("gmaps.toml")).unwrap();
/// println!("Zoom: {}", config.crawl.zoom);
/// ```
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parses configuration text, applies environment overrides and validates
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let mut config: Config = toml::from_str(content)?;
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    validate(&config)?;
    Ok(config)
}

/// Computes a SHA-256 hash of the configuration file content
///
/// Stored with each run so a resumed crawl can tell whether its settings changed.
///
/// # Returns
///
/// * `Ok(String)` - Hex-encoded SHA-256 hash of the file content
/// * `Err(ConfigError)` - Failed to read the file
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Loads a configuration and returns both the config and its hash
///
/// Without a path the defaults (plus environment overrides) are used and there is no
/// hash.
pub fn load_config_with_hash(path: Option<&Path>) -> Result<(Config, Option<String>), ConfigError> {
    match path {
        Some(path) => {
            let config = load_config(path)?;
            let hash = compute_config_hash(path)?;
            Ok((config, Some(hash)))
        }
        None => Ok((parse_config("")?, None)),
    }
}

/// Applies `GMAPS_*` environment overrides on top of file values
///
/// Delays are given in (fractional) seconds.
///
/// # Arguments
///
/// * `config` - Configuration to modify
/// * `lookup` - Environment lookup, injectable for tests
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(list) = get("GMAPS_PROXY_LIST") {
        config.proxy.list = Some(list);
    }
    if let Some(file) = get("GMAPS_PROXY_FILE") {
        config.proxy.file = Some(file);
    }
    if let Some(strategy) = get("GMAPS_PROXY_STRATEGY") {
        config.proxy.strategy = strategy
            .parse::<ProxyStrategy>()
            .map_err(|message| invalid_env("GMAPS_PROXY_STRATEGY", message))?;
    }
    if let Some(delay) = get("GMAPS_THREAD_STARTUP_DELAY") {
        config.scheduler.startup_delay_ms = seconds_to_ms("GMAPS_THREAD_STARTUP_DELAY", &delay)?;
    }
    if let Some(size) = get("GMAPS_THREAD_BATCH_SIZE") {
        config.scheduler.batch_size = size
            .trim()
            .parse()
            .map_err(|e| invalid_env("GMAPS_THREAD_BATCH_SIZE", format!("{}", e)))?;
    }
    if let Some(delay) = get("GMAPS_THREAD_BATCH_DELAY") {
        config.scheduler.batch_delay_ms = seconds_to_ms("GMAPS_THREAD_BATCH_DELAY", &delay)?;
    }
    if let Some(every) = get("GMAPS_WRITER_PROGRESS_EVERY") {
        config.writer.progress_every = every
            .trim()
            .parse()
            .map_err(|e| invalid_env("GMAPS_WRITER_PROGRESS_EVERY", format!("{}", e)))?;
    }
    if let Some(endpoints) = get("GMAPS_CRAWLER_OVERPASS_ENDPOINTS") {
        let endpoints: Vec<String> = endpoints
            .split(',')
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(String::from)
            .collect();
        if !endpoints.is_empty() {
            tracing::debug!("Using custom Overpass endpoints: {:?}", endpoints);
            config.geocoding.endpoints = endpoints;
        }
    }

    Ok(())
}

fn seconds_to_ms(name: &str, value: &str) -> Result<u64, ConfigError> {
    let secs: f64 = value
        .trim()
        .parse()
        .map_err(|e| invalid_env(name, format!("{}", e)))?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(invalid_env(name, format!("expected seconds >= 0, got {}", value)));
    }
    Ok((secs * 1000.0).round() as u64)
}

fn invalid_env(name: &str, message: String) -> ConfigError {
    ConfigError::InvalidEnv {
        name: name.to_string(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_load_valid_config() {
        let config_content = r#"
[crawl]
language = "fr"
zoom = 15
workers = 3
overlap-ratio = 0.2
cell-width-km = 2.5
cell-height-km = 1.5

[scheduler]
startup-delay-ms = 500
batch-size = 3
batch-delay-ms = 2000

[proxy]
proxies = ["http://10.0.0.1:8080"]
strategy = "random"

[rerun]
workers = 4
only-errors = ["missing_address"]

[storage]
database-path = "./test.db"
"#;

        let file = create_temp_config(config_content);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.crawl.language, "fr");
        assert_eq!(config.crawl.zoom, 15);
        assert_eq!(config.crawl.workers, 3);
        assert_eq!(config.crawl.cell_width_km, Some(2.5));
        assert_eq!(config.scheduler.batch_size, 3);
        assert_eq!(config.proxy.strategy, ProxyStrategy::Random);
        assert_eq!(config.rerun.only_errors, vec!["missing_address"]);
        assert_eq!(config.storage.database_path, "./test.db");

        // Untouched sections keep their defaults
        assert_eq!(config.writer.progress_every, 10);
        assert_eq!(config.crawl.window_width, 1920);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.crawl.zoom, 16);
        assert_eq!(config.crawl.overlap_ratio, 0.25);
        assert_eq!(config.scheduler.startup_delay_ms, 1000);
        assert_eq!(config.scheduler.batch_delay_ms, 3000);
        assert!(config.rerun.enabled);
        assert_eq!(config.storage.database_path, "data/db/gmaps.sqlite");
    }

    #[test]
    fn test_load_config_with_invalid_path() {
        let result = load_config(Path::new("/nonexistent/gmaps.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_load_config_with_invalid_toml() {
        let file = create_temp_config("this is not valid TOML {{{");
        assert!(matches!(load_config(file.path()), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_config_with_validation_error() {
        let file = create_temp_config("[crawl]\noverlap-ratio = 1.5\n");
        let result = load_config(file.path());
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        apply_env_overrides(
            &mut config,
            env(&[
                ("GMAPS_PROXY_LIST", "http://a:1, http://b:2"),
                ("GMAPS_PROXY_STRATEGY", "random"),
                ("GMAPS_THREAD_STARTUP_DELAY", "0.25"),
                ("GMAPS_THREAD_BATCH_SIZE", "4"),
                ("GMAPS_THREAD_BATCH_DELAY", "1.5"),
                ("GMAPS_WRITER_PROGRESS_EVERY", "50"),
                ("GMAPS_CRAWLER_OVERPASS_ENDPOINTS", "https://one/api, ,https://two/api"),
            ]),
        )
        .unwrap();

        assert_eq!(config.proxy.list.as_deref(), Some("http://a:1, http://b:2"));
        assert_eq!(config.proxy.strategy, ProxyStrategy::Random);
        assert_eq!(config.scheduler.startup_delay_ms, 250);
        assert_eq!(config.scheduler.batch_size, 4);
        assert_eq!(config.scheduler.batch_delay_ms, 1500);
        assert_eq!(config.writer.progress_every, 50);
        assert_eq!(config.geocoding.endpoints, vec!["https://one/api", "https://two/api"]);
    }

    #[test]
    fn test_invalid_env_override() {
        let mut config = Config::default();
        let result = apply_env_overrides(&mut config, env(&[("GMAPS_THREAD_BATCH_SIZE", "two")]));
        assert!(matches!(result, Err(ConfigError::InvalidEnv { .. })));

        let result =
            apply_env_overrides(&mut config, env(&[("GMAPS_THREAD_BATCH_DELAY", "-1")]));
        assert!(matches!(result, Err(ConfigError::InvalidEnv { .. })));
    }

    #[test]
    fn test_compute_config_hash() {
        let file = create_temp_config("test content");

        let hash1 = compute_config_hash(file.path()).unwrap();
        let hash2 = compute_config_hash(file.path()).unwrap();

        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 64); // SHA-256 produces 64 hex characters
    }

    #[test]
    fn test_load_config_with_hash() {
        let file = create_temp_config("[crawl]\nzoom = 14\n");
        let (config, hash) = load_config_with_hash(Some(file.path())).unwrap();
        assert_eq!(config.crawl.zoom, 14);
        assert!(hash.is_some());

        let (_, no_hash) = load_config_with_hash(None).unwrap();
        assert!(no_hash.is_none());
    }
}
