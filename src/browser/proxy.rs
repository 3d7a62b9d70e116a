//! Proxy pool
//!
//! Sessions pick their proxy from a `ProxyPool`, either in rotation or at random.

use crate::config::ProxyStrategy;
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Rotating set of proxy URLs
#[derive(Debug)]
pub struct ProxyPool {
    proxies: Vec<String>,
    strategy: ProxyStrategy,
    cursor: AtomicUsize,
}

impl ProxyPool {
    /// Creates a pool; blank entries are dropped
    pub fn new(proxies: Vec<String>, strategy: ProxyStrategy) -> Self {
        let proxies = proxies
            .into_iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        Self {
            proxies,
            strategy,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    /// Returns the next proxy, or `None` when the pool is empty
    pub fn next_proxy(&self) -> Option<String> {
        if self.proxies.is_empty() {
            return None;
        }

        let index = match self.strategy {
            ProxyStrategy::Random => fastrand::usize(..self.proxies.len()),
            ProxyStrategy::RoundRobin => {
                self.cursor.fetch_add(1, Ordering::Relaxed) % self.proxies.len()
            }
        };
        Some(self.proxies[index].clone())
    }
}

/// Collects proxies from explicit entries, a comma-separated list and a file
///
/// File lines that are blank or start with `#` are skipped. The result keeps first-seen
/// order without duplicates.
///
/// # Arguments
///
/// * `explicit` - Proxies given one by one
/// * `list` - Comma-separated proxies
/// * `file` - Path to a file with one proxy per line
///
/// # Returns
///
/// * `Ok(Vec<String>)` - De-duplicated proxies
/// * `Err(std::io::Error)` - The proxy file could not be read
pub fn parse_proxy_sources(
    explicit: &[String],
    list: Option<&str>,
    file: Option<&Path>,
) -> std::io::Result<Vec<String>> {
    let mut candidates: Vec<String> = explicit.iter().map(|p| p.trim().to_string()).collect();

    if let Some(list) = list {
        candidates.extend(list.split(',').map(|p| p.trim().to_string()));
    }

    if let Some(path) = file {
        let content = std::fs::read_to_string(path)?;
        candidates.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|line| !line.starts_with('#'))
                .map(String::from),
        );
    }

    let mut seen = HashSet::new();
    Ok(candidates
        .into_iter()
        .filter(|p| !p.is_empty())
        .filter(|p| seen.insert(p.clone()))
        .collect())
}
