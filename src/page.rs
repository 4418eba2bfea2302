//! Rendered-page surface the extraction strategies script against.
//!
//! Strategies never see browser internals; they get a [`PageDriver`] with a
//! handful of generic operations (read the rendered HTML, fetch a sibling
//! URL, scroll, click). Site-specific extraction stays in the strategy, the
//! page mechanics stay here.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum PageError {
    #[error("page request failed: {0}")]
    Request(String),
    #[error("page is gone")]
    Gone,
}

#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Wait until `selector` matches something, up to `timeout`. Returns
    /// whether it matched; callers are expected to proceed either way.
    async fn wait_for(&self, selector: &str, timeout: Duration) -> bool;

    /// Current rendered HTML of the page.
    async fn content(&self) -> Result<String, PageError>;

    /// Fetch a URL in the page's context. `Ok(None)` means the server
    /// answered with a non-success status.
    async fn fetch(&self, url: &str) -> Result<Option<String>, PageError>;

    /// Scroll to the bottom of the page to trigger lazy loading.
    async fn scroll_to_bottom(&self);

    /// Click the first element matching `selector`. Returns whether an
    /// enabled element was found and clicked.
    async fn click(&self, selector: &str) -> bool;

    /// URL the page is currently on.
    fn current_url(&self) -> String;
}

/// [`PageDriver`] backed by plain HTTP requests.
///
/// Suits strategies that paginate by URL (MercadoLibre): `content()` is a
/// fetch of the current URL, and there is no DOM to scroll or click.
pub struct HttpPageDriver {
    client: reqwest::Client,
    url: String,
}

impl HttpPageDriver {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl PageDriver for HttpPageDriver {
    async fn wait_for(&self, _selector: &str, _timeout: Duration) -> bool {
        // nothing renders asynchronously over raw HTTP
        true
    }

    async fn content(&self) -> Result<String, PageError> {
        match self.fetch(&self.url).await? {
            Some(html) => Ok(html),
            None => Err(PageError::Request(format!("{} unavailable", self.url))),
        }
    }

    async fn fetch(&self, url: &str) -> Result<Option<String>, PageError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PageError::Request(e.to_string()))?;

        if !response.status().is_success() {
            warn!(url, status = %response.status(), "page fetch rejected");
            return Ok(None);
        }

        response
            .text()
            .await
            .map(Some)
            .map_err(|e| PageError::Request(e.to_string()))
    }

    async fn scroll_to_bottom(&self) {}

    async fn click(&self, _selector: &str) -> bool {
        false
    }

    fn current_url(&self) -> String {
        self.url.clone()
    }
}
