//! Browser seam
//!
//! The crawl core drives pages only through the traits in this module:
//! - `BrowserDriver` opens sessions (one per tile, optionally behind a proxy)
//! - `BrowserSession` opens tabs
//! - `Tab` navigates and exposes the current document
//! - `PlaceDiscoverer` turns a search tab into candidate places
//! - `PlaceExtractor` turns a place page into `PlaceFields`
//!
//! `HttpDriver` is a reqwest-backed reference implementation whose tabs fetch static HTML.

mod discover;
mod extract;
mod http;
mod proxy;
mod urls;

pub use discover::{parse_result_cards, AnchorDiscoverer};
pub use extract::{FieldError, FieldExtractor, HtmlPlaceExtractor};
pub use http::{HttpDriver, HttpSession, HttpTab};
pub use proxy::{parse_proxy_sources, ProxyPool};
pub use urls::{build_search_url, DEFAULT_MAPS_BASE};

use crate::geo::Coverage;
use crate::storage::{FieldWarning, PlaceFields};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors raised by browser collaborators
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("Failed to open session: {0}")]
    Session(String),

    #[error("Navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Tab has no document loaded")]
    NoDocument,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Errors raised while extracting one place
#[derive(Debug, Error)]
pub enum ExtractError {
    /// Carries the warnings from the optional fields read before giving up
    #[error("Place page has no address")]
    MissingAddress { warnings: Vec<FieldWarning> },

    #[error("Place link is empty")]
    EmptyHref,

    #[error("Browser error: {0}")]
    Driver(#[from] DriverError),

    #[error("Extraction failed: {0}")]
    Other(String),
}

impl ExtractError {
    /// Short code stored as the place's last error
    pub fn code(&self) -> &'static str {
        match self {
            ExtractError::MissingAddress { .. } => "missing_address",
            ExtractError::EmptyHref => "empty_href",
            ExtractError::Driver(DriverError::Cancelled) => "cancelled",
            ExtractError::Driver(DriverError::Status { .. }) => "http_status",
            ExtractError::Driver(_) => "navigation_error",
            ExtractError::Other(_) => "extract_error",
        }
    }

    /// Field warnings gathered before the failure
    pub fn warnings(&self) -> &[FieldWarning] {
        match self {
            ExtractError::MissingAddress { warnings } => warnings,
            _ => &[],
        }
    }
}

/// Session launch options
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    pub headless: bool,
    pub window_width: u32,
    pub window_height: u32,
    pub proxy: Option<String>,
    pub page_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            headless: false,
            window_width: 1920,
            window_height: 1080,
            proxy: None,
            page_timeout: Duration::from_secs(30),
        }
    }
}

/// A result card found on a search page
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredPlace {
    pub name: String,
    pub href: String,
}

/// Opens browser sessions
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn open_session(
        &self,
        options: &SessionOptions,
    ) -> Result<Arc<dyn BrowserSession>, DriverError>;
}

/// One browser instance; tabs opened from it share cookies and proxy
#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn open_tab(&self) -> Result<Box<dyn Tab>, DriverError>;

    /// Closes the session; must be safe to call more than once
    async fn close(&self);
}

/// A single page
#[async_trait]
pub trait Tab: Send + Sync {
    async fn navigate(&mut self, url: &str) -> Result<(), DriverError>;

    /// Document of the last successful navigation
    async fn html(&self) -> Result<String, DriverError>;

    fn current_url(&self) -> Option<String>;

    /// Measures what the viewport shows at the current zoom, when the driver can tell
    async fn measure_coverage(&mut self) -> Option<Coverage> {
        None
    }

    async fn close(&mut self);
}

/// Finds candidate places on a loaded search tab
#[async_trait]
pub trait PlaceDiscoverer: Send + Sync {
    async fn discover(
        &self,
        tab: &mut dyn Tab,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<DiscoveredPlace>, DriverError>;
}

/// Extracts place fields from a place page
///
/// Optional fields that cannot be read are reported as warnings in the returned
/// `PlaceFields`; only a missing address (or a navigation failure) is an error.
#[async_trait]
pub trait PlaceExtractor: Send + Sync {
    async fn extract(
        &self,
        tab: &mut dyn Tab,
        href: &str,
        city: &str,
    ) -> Result<PlaceFields, ExtractError>;
}

/// The browser-side collaborators of a crawl, bundled for passing around
#[derive(Clone)]
pub struct Collaborators {
    pub driver: Arc<dyn BrowserDriver>,
    pub discoverer: Arc<dyn PlaceDiscoverer>,
    pub extractor: Arc<dyn PlaceExtractor>,
}
