//! Extraction strategies, polymorphic over site identity.
//!
//! A strategy reads rendered page state through a [`PageDriver`], produces
//! [`Product`]s in batches, and reports interim progress. Cancellation is
//! cooperative: the token is checked between batches, never mid-extraction.

pub mod falabella;
pub mod mercadolibre;

pub use falabella::FalabellaScraper;
pub use mercadolibre::MercadoLibreScraper;

use std::time::Duration;

use async_trait::async_trait;
use scraper::{ElementRef, Selector};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::ScraperConfig;
use crate::domain::{Product, Site};
use crate::page::{PageDriver, PageError};

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("page error: {0}")]
    Page(#[from] PageError),
    #[error("invalid selector `{selector}`: {message}")]
    Selector { selector: String, message: String },
}

/// Receives interim item counts for forwarding to the controller.
pub trait ProgressSink: Send + Sync {
    fn report(&self, count: usize);
}

/// Site-specific extraction algorithm.
#[async_trait]
pub trait ScrapeStrategy: Send + Sync {
    fn site(&self) -> Site;

    /// Run extraction until the target is reached, the site is exhausted, an
    /// error occurs, or `cancel` is observed, whichever comes first.
    /// Items are deduplicated by URL within the run and carry rank positions
    /// continuing across batches.
    async fn run(
        &self,
        query: &str,
        target_count: usize,
        page: &dyn PageDriver,
        progress: &dyn ProgressSink,
        cancel: CancellationToken,
    ) -> Result<Vec<Product>, ScrapeError>;
}

/// Instantiate the strategy for a site.
pub fn for_site(
    site: Site,
    config: &ScraperConfig,
) -> Result<Box<dyn ScrapeStrategy>, ScrapeError> {
    match site {
        Site::Falabella => Ok(Box::new(FalabellaScraper::new(config)?)),
        Site::MercadoLibre => Ok(Box::new(MercadoLibreScraper::new(config)?)),
    }
}

pub(crate) fn compile(selector: &str) -> Result<Selector, ScrapeError> {
    Selector::parse(selector).map_err(|e| ScrapeError::Selector {
        selector: selector.to_string(),
        message: e.to_string(),
    })
}

/// Joined, trimmed text of the first match under `el`; `None` when empty.
pub(crate) fn text_of(el: ElementRef<'_>, selector: &Selector) -> Option<String> {
    let text = el
        .select(selector)
        .next()?
        .text()
        .collect::<String>()
        .trim()
        .to_string();
    (!text.is_empty()).then_some(text)
}

/// Attribute of the first match under `el`.
pub(crate) fn attr_of(el: ElementRef<'_>, selector: &Selector, attr: &str) -> Option<String> {
    el.select(selector)
        .next()?
        .value()
        .attr(attr)
        .map(str::to_string)
}

/// Pause between batches, returning early on cancellation.
pub(crate) async fn settle(cancel: &CancellationToken, pause: Duration) {
    tokio::select! {
        () = cancel.cancelled() => {}
        () = tokio::time::sleep(pause) => {}
    }
}
