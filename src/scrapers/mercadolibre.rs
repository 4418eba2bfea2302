//! MercadoLibre search results: server-rendered pages paginated by a
//! `_Desde_<offset>` path segment, fetched directly rather than scrolled.

use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{attr_of, compile, settle, text_of, ProgressSink, ScrapeError, ScrapeStrategy};
use crate::config::{MercadoLibreTuning, ScraperConfig};
use crate::domain::{Product, Site};
use crate::page::PageDriver;
use crate::util::parse_price;

static DESDE_SEGMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"_Desde_\d+").expect("static offset regex"));

pub struct MercadoLibreScraper {
    tuning: MercadoLibreTuning,
    items: Selector,
    title: Selector,
    brand: Selector,
    seller: Selector,
    price: Selector,
    price_fallback: Selector,
    link: Selector,
    next_control: Selector,
}

impl MercadoLibreScraper {
    pub fn new(config: &ScraperConfig) -> Result<Self, ScrapeError> {
        Ok(Self {
            tuning: config.mercadolibre.clone(),
            items: compile(".ui-search-layout__item")?,
            title: compile(".poly-component__title")?,
            brand: compile(r#".ui-search-item__brand, [class*="brand"]"#)?,
            seller: compile(".poly-component__seller")?,
            price: compile(".andes-money-amount__fraction")?,
            price_fallback: compile(r#"[aria-label*="$"]"#)?,
            link: compile("a")?,
            next_control: compile(r#"[data-andes-pagination-control="next"]"#)?,
        })
    }

    /// Strip the fragment and any pagination segments off the listing URL.
    fn clean_base_url(url: &str) -> String {
        let no_fragment = url.split('#').next().unwrap_or(url);
        DESDE_SEGMENT
            .replace_all(no_fragment, "")
            .replace("_NoIndex_True", "")
    }

    fn page_url(base: &str, offset: Option<u32>) -> String {
        match offset {
            None => format!("{base}_NoIndex_True"),
            Some(offset) => format!("{base}_Desde_{offset}_NoIndex_True"),
        }
    }

    /// Extract one result page; also reports whether an enabled
    /// next-page control is present.
    fn extract_page(
        &self,
        html: &str,
        query: &str,
        start_position: u32,
    ) -> (Vec<Product>, bool) {
        let doc = Html::parse_document(html);

        let products = doc
            .select(&self.items)
            .enumerate()
            .filter_map(|(index, item)| {
                let title = text_of(item, &self.title)?;
                let url = attr_of(item, &self.link, "href")?;
                let price_text = text_of(item, &self.price)
                    .or_else(|| text_of(item, &self.price_fallback));
                Some(Product {
                    site: Site::MercadoLibre,
                    query: query.to_string(),
                    captured_at: Utc::now(),
                    position: start_position + index as u32,
                    title,
                    price: parse_price(price_text.as_deref()),
                    price_text,
                    url,
                    brand: text_of(item, &self.brand),
                    seller: text_of(item, &self.seller),
                })
            })
            .collect();

        let has_next = doc
            .select(&self.next_control)
            .any(|el| el.value().attr("aria-disabled") != Some("true"));

        (products, has_next)
    }
}

#[async_trait]
impl ScrapeStrategy for MercadoLibreScraper {
    fn site(&self) -> Site {
        Site::MercadoLibre
    }

    async fn run(
        &self,
        query: &str,
        target_count: usize,
        page: &dyn PageDriver,
        progress: &dyn ProgressSink,
        cancel: CancellationToken,
    ) -> Result<Vec<Product>, ScrapeError> {
        let base_url = Self::clean_base_url(&page.current_url());
        let mut products: Vec<Product> = Vec::new();
        let mut position = 1u32;
        let mut page_no = 1u32;

        while products.len() < target_count && !cancel.is_cancelled() {
            let offset =
                (page_no > 1).then(|| (page_no - 1) * self.tuning.items_per_page + 1);
            let url = Self::page_url(&base_url, offset);
            debug!(query, page_no, url, "fetching result page");

            let Some(html) = page.fetch(&url).await? else {
                break;
            };

            let (batch, has_next) = self.extract_page(&html, query, position);
            if batch.is_empty() {
                debug!(query, page_no, "no products on page");
                break;
            }

            let mut added = 0u32;
            for item in batch {
                if products.len() >= target_count {
                    break;
                }
                if products.iter().any(|p| p.url == item.url) {
                    continue;
                }
                products.push(item);
                added += 1;
            }
            position += added;

            progress.report(products.len());
            if products.len() >= target_count || !has_next {
                break;
            }

            settle(
                &cancel,
                std::time::Duration::from_millis(self.tuning.page_pause_ms),
            )
            .await;
            page_no += 1;
        }

        Ok(products)
    }
}
