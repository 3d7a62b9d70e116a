//! HTTP-backed browser driver
//!
//! Each session is a `reqwest::Client` (with the session's proxy, if any) and each tab
//! holds the body of its last navigation. There is no script execution, so this driver
//! only sees what the server renders statically.

use super::{BrowserDriver, BrowserSession, DriverError, SessionOptions, Tab};
use async_trait::async_trait;
use reqwest::{Client, Proxy};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const USER_AGENT: &str = concat!("gmaps-grid/", env!("CARGO_PKG_VERSION"));

/// Opens reqwest-backed sessions
#[derive(Debug, Clone)]
pub struct HttpDriver {
    user_agent: String,
    connect_timeout: Duration,
}

impl Default for HttpDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpDriver {
    pub fn new() -> Self {
        Self {
            user_agent: USER_AGENT.to_string(),
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    fn build_client(&self, options: &SessionOptions) -> Result<Client, DriverError> {
        let mut builder = Client::builder()
            .user_agent(self.user_agent.clone())
            .timeout(options.page_timeout)
            .connect_timeout(self.connect_timeout)
            .gzip(true)
            .brotli(true);

        if let Some(proxy) = &options.proxy {
            let proxy = Proxy::all(proxy.as_str())
                .map_err(|e| DriverError::Session(format!("invalid proxy '{}': {}", proxy, e)))?;
            builder = builder.proxy(proxy);
        }

        builder
            .build()
            .map_err(|e| DriverError::Session(e.to_string()))
    }
}

#[async_trait]
impl BrowserDriver for HttpDriver {
    async fn open_session(
        &self,
        options: &SessionOptions,
    ) -> Result<Arc<dyn BrowserSession>, DriverError> {
        let client = self.build_client(options)?;
        tracing::debug!(
            "Opened HTTP session (proxy: {})",
            options.proxy.as_deref().unwrap_or("none")
        );
        Ok(Arc::new(HttpSession {
            client,
            closed: AtomicBool::new(false),
        }))
    }
}

/// A reqwest client shared by the tabs of one session
#[derive(Debug)]
pub struct HttpSession {
    client: Client,
    closed: AtomicBool,
}

#[async_trait]
impl BrowserSession for HttpSession {
    async fn open_tab(&self) -> Result<Box<dyn Tab>, DriverError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DriverError::Session("session is closed".to_string()));
        }
        Ok(Box::new(HttpTab {
            client: self.client.clone(),
            url: None,
            body: None,
        }))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// A tab holding the document of its last navigation
#[derive(Debug)]
pub struct HttpTab {
    client: Client,
    url: Option<String>,
    body: Option<String>,
}

#[async_trait]
impl Tab for HttpTab {
    async fn navigate(&mut self, url: &str) -> Result<(), DriverError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| DriverError::Navigation {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DriverError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let final_url = response.url().to_string();
        let body = response.text().await?;

        self.url = Some(final_url);
        self.body = Some(body);
        Ok(())
    }

    async fn html(&self) -> Result<String, DriverError> {
        self.body.clone().ok_or(DriverError::NoDocument)
    }

    fn current_url(&self) -> Option<String> {
        self.url.clone()
    }

    async fn close(&mut self) {
        self.url = None;
        self.body = None;
    }
}
