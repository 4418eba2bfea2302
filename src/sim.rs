//! Simulated browser host.
//!
//! Backs each context with an in-memory page rendered from canned listings
//! and runs the real [`WorkerRuntime`] against it over an ordinary channel
//! pair. The demo binary and the integration tests drive the full
//! launch-to-done path through this host without a browser.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::browser::{
    channel_pair, BrowserHost, ContextId, ControllerChannel, HostError, ReadyReceiver,
    ReadySender,
};
use crate::config::ScraperConfig;
use crate::domain::Site;
use crate::page::{PageDriver, PageError};
use crate::worker::WorkerRuntime;

static OFFSET_SEGMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"_Desde_(\d+)").expect("static offset regex"));

/// One canned search listing served by the simulated site.
#[derive(Debug, Clone)]
pub struct SimListing {
    pub title: String,
    pub price_text: String,
    pub url: String,
    pub brand: Option<String>,
    pub seller: Option<String>,
}

impl SimListing {
    pub fn new(
        title: impl Into<String>,
        price_text: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            price_text: price_text.into(),
            url: url.into(),
            brand: None,
            seller: None,
        }
    }

    pub fn with_seller(mut self, seller: impl Into<String>) -> Self {
        self.seller = Some(seller.into());
        self
    }

    pub fn with_brand(mut self, brand: impl Into<String>) -> Self {
        self.brand = Some(brand.into());
        self
    }
}

/// Serves rendered pages for one simulated context.
struct SimPageDriver {
    site: Site,
    url: String,
    listings: Arc<Vec<SimListing>>,
    items_per_page: usize,
}

impl SimPageDriver {
    fn render_falabella(&self) -> String {
        let pods: String = self
            .listings
            .iter()
            .map(|l| {
                let brand = l
                    .brand
                    .as_deref()
                    .map(|b| format!(r#"<b class="pod-title title-rebrand">{b}</b>"#))
                    .unwrap_or_default();
                let seller = l
                    .seller
                    .as_deref()
                    .map(|s| {
                        format!(r#"<b class="pod-sellerText seller-text-rebrand">Por {s}</b>"#)
                    })
                    .unwrap_or_default();
                format!(
                    r#"<div class="grid-pod"><a href="{url}">{brand}
                         <b class="pod-subTitle subTitle-rebrand">{title}</b>{seller}
                         <span class="copy10">{price}</span>
                       </a></div>"#,
                    url = l.url,
                    title = l.title,
                    price = l.price_text,
                )
            })
            .collect();
        format!(r#"<div id="testId-searchResults-products">{pods}</div>"#)
    }

    fn render_mercadolibre(&self, start: usize) -> String {
        let end = (start + self.items_per_page).min(self.listings.len());
        let items: String = self.listings[start.min(end)..end]
            .iter()
            .map(|l| {
                let seller = l
                    .seller
                    .as_deref()
                    .map(|s| format!(r#"<span class="poly-component__seller">{s}</span>"#))
                    .unwrap_or_default();
                format!(
                    r#"<li class="ui-search-layout__item">
                         <a href="{url}"><h2 class="poly-component__title">{title}</h2></a>{seller}
                         <span class="andes-money-amount__fraction">{price}</span>
                       </li>"#,
                    url = l.url,
                    title = l.title,
                    price = l.price_text,
                )
            })
            .collect();
        let next = if end < self.listings.len() {
            r##"<a data-andes-pagination-control="next" href="#">Siguiente</a>"##
        } else {
            r#"<a data-andes-pagination-control="next" aria-disabled="true">Siguiente</a>"#
        };
        format!("<ol>{items}</ol>{next}")
    }
}

#[async_trait]
impl PageDriver for SimPageDriver {
    async fn wait_for(&self, _selector: &str, _timeout: Duration) -> bool {
        true
    }

    async fn content(&self) -> Result<String, PageError> {
        Ok(match self.site {
            Site::Falabella => self.render_falabella(),
            Site::MercadoLibre => self.render_mercadolibre(0),
        })
    }

    async fn fetch(&self, url: &str) -> Result<Option<String>, PageError> {
        // listing URLs are 1-based offsets
        let start = OFFSET_SEGMENT
            .captures(url)
            .and_then(|c| c[1].parse::<usize>().ok())
            .map_or(0, |offset| offset.saturating_sub(1));
        Ok(Some(match self.site {
            Site::Falabella => self.render_falabella(),
            Site::MercadoLibre => self.render_mercadolibre(start),
        }))
    }

    async fn scroll_to_bottom(&self) {}

    async fn click(&self, _selector: &str) -> bool {
        // single-batch grid: there is never a further page to request
        false
    }

    fn current_url(&self) -> String {
        self.url.clone()
    }
}

/// In-process [`BrowserHost`] serving canned listings per site.
pub struct SimBrowserHost {
    config: ScraperConfig,
    catalog: HashMap<Site, Arc<Vec<SimListing>>>,
    ready_tx: ReadySender,
    contexts: Mutex<HashMap<ContextId, Arc<SimPageDriver>>>,
}

impl SimBrowserHost {
    pub fn new(
        config: ScraperConfig,
        falabella: Vec<SimListing>,
        mercadolibre: Vec<SimListing>,
    ) -> (Arc<Self>, ReadyReceiver) {
        let (ready_tx, ready_rx) = mpsc::unbounded_channel();
        let catalog = HashMap::from([
            (Site::Falabella, Arc::new(falabella)),
            (Site::MercadoLibre, Arc::new(mercadolibre)),
        ]);
        (
            Arc::new(Self {
                config,
                catalog,
                ready_tx,
                contexts: Mutex::new(HashMap::new()),
            }),
            ready_rx,
        )
    }

    fn site_of(url: &str) -> Result<Site, HostError> {
        if url.contains("falabella.com") {
            Ok(Site::Falabella)
        } else if url.contains("mercadolibre.com") {
            Ok(Site::MercadoLibre)
        } else {
            Err(HostError::Create(format!("no simulated site serves {url}")))
        }
    }
}

#[async_trait]
impl BrowserHost for SimBrowserHost {
    async fn create(&self, url: &str) -> Result<ContextId, HostError> {
        let site = Self::site_of(url)?;
        let listings = self
            .catalog
            .get(&site)
            .cloned()
            .unwrap_or_else(|| Arc::new(Vec::new()));

        let id = ContextId::new();
        let driver = Arc::new(SimPageDriver {
            site,
            url: url.to_string(),
            listings,
            items_per_page: self.config.mercadolibre.items_per_page as usize,
        });
        self.contexts
            .lock()
            .map_err(|_| HostError::Create("host state poisoned".into()))?
            .insert(id, driver);

        debug!(%id, %site, "simulated context created");
        // the page is "loaded" immediately
        let _ = self.ready_tx.send(id);
        Ok(id)
    }

    async fn destroy(&self, id: ContextId) -> Result<(), HostError> {
        let removed = self
            .contexts
            .lock()
            .map_err(|_| HostError::UnknownContext(id))?
            .remove(&id);
        match removed {
            Some(_) => Ok(()),
            None => Err(HostError::UnknownContext(id)),
        }
    }

    async fn open_channel(
        &self,
        id: ContextId,
        _name: &str,
    ) -> Result<ControllerChannel, HostError> {
        let driver = self
            .contexts
            .lock()
            .map_err(|_| HostError::UnknownContext(id))?
            .get(&id)
            .cloned()
            .ok_or(HostError::UnknownContext(id))?;

        let (ctl, wrk) = channel_pair();
        let runtime = WorkerRuntime::new(driver, self.config.clone());
        tokio::spawn(runtime.run(wrk));
        Ok(ctl)
    }
}
