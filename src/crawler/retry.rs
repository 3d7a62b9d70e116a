//! Bounded retry with fixed backoff for transient collaborator errors

use crate::config::RetryConfig;
use crate::CrawlError;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Retry policy: `attempts` tries, `backoff` between them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            attempts: config.attempts.max(1),
            backoff: Duration::from_millis(config.backoff_ms),
        }
    }

    /// Runs `op` until it succeeds, attempts run out, or the crawl is cancelled
    ///
    /// # Arguments
    ///
    /// * `what` - Label used in log lines
    /// * `cancel` - Cancellation is checked before every attempt and during backoff
    /// * `op` - Produces a fresh attempt each time it is called
    ///
    /// # Returns
    ///
    /// * `Ok(T)` - The first successful attempt
    /// * `Err(CrawlError::Cancelled)` - Cancelled before an attempt succeeded
    /// * `Err(CrawlError)` - The error of the last attempt
    pub async fn run<T, E, F, Fut>(
        &self,
        what: &str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> crate::Result<T>
    where
        E: Into<CrawlError> + std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(CrawlError::Cancelled);
            }
            attempt += 1;

            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= attempts => {
                    tracing::error!("{} failed after {} attempts: {}", what, attempt, e);
                    return Err(e.into());
                }
                Err(e) => {
                    tracing::warn!(
                        "{} failed (attempt {}/{}): {}; retrying in {:?}",
                        what,
                        attempt,
                        attempts,
                        e,
                        self.backoff
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(CrawlError::Cancelled),
                        _ = tokio::time::sleep(self.backoff) => {}
                    }
                }
            }
        }
    }
}
