//! Falabella search results: an infinite-scroll grid with pagination arrows.

use async_trait::async_trait;
use chrono::Utc;
use scraper::{Html, Selector};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{attr_of, compile, settle, text_of, ProgressSink, ScrapeError, ScrapeStrategy};
use crate::config::{FalabellaTuning, ScraperConfig};
use crate::domain::{Product, Site};
use crate::page::PageDriver;
use crate::util::parse_price;

const RESULTS_CONTAINER: &str = "#testId-searchResults-products";
const NEXT_PAGE_BUTTONS: [&str; 2] = [
    "#testId-pagination-top-arrow-right",
    "#testId-pagination-bottom-arrow-right",
];

pub struct FalabellaScraper {
    tuning: FalabellaTuning,
    content_wait: std::time::Duration,
    pods: Selector,
    title: Selector,
    price: Selector,
    link: Selector,
    brand: Selector,
    seller: Selector,
}

impl FalabellaScraper {
    pub fn new(config: &ScraperConfig) -> Result<Self, ScrapeError> {
        Ok(Self {
            tuning: config.falabella.clone(),
            content_wait: config.content_wait(),
            pods: compile(".grid-pod")?,
            title: compile(".pod-subTitle.subTitle-rebrand")?,
            price: compile(".copy10")?,
            link: compile("a")?,
            brand: compile(".pod-title.title-rebrand")?,
            seller: compile(".pod-sellerText.seller-text-rebrand")?,
        })
    }

    fn extract(&self, html: &str, query: &str, start_position: u32) -> Vec<Product> {
        let doc = Html::parse_document(html);
        doc.select(&self.pods)
            .enumerate()
            .filter_map(|(index, pod)| {
                let title = text_of(pod, &self.title)?;
                let url = attr_of(pod, &self.link, "href")?;
                let price_text = text_of(pod, &self.price);
                Some(Product {
                    site: Site::Falabella,
                    query: query.to_string(),
                    captured_at: Utc::now(),
                    position: start_position + index as u32,
                    title,
                    price: parse_price(price_text.as_deref()),
                    price_text,
                    url,
                    brand: text_of(pod, &self.brand),
                    seller: text_of(pod, &self.seller).and_then(strip_seller_prefix),
                })
            })
            .collect()
    }

    /// Scroll to the grid bottom and click a pagination arrow.
    /// Returns whether another batch was requested.
    async fn advance(&self, page: &dyn PageDriver) -> bool {
        page.scroll_to_bottom().await;
        for button in NEXT_PAGE_BUTTONS {
            if page.click(button).await {
                return true;
            }
        }
        false
    }
}

/// The seller label reads "Por <name>"; keep only the name.
fn strip_seller_prefix(text: String) -> Option<String> {
    let name = text
        .split_whitespace()
        .skip(1)
        .collect::<Vec<_>>()
        .join(" ");
    (!name.is_empty()).then_some(name)
}

#[async_trait]
impl ScrapeStrategy for FalabellaScraper {
    fn site(&self) -> Site {
        Site::Falabella
    }

    async fn run(
        &self,
        query: &str,
        target_count: usize,
        page: &dyn PageDriver,
        progress: &dyn ProgressSink,
        cancel: CancellationToken,
    ) -> Result<Vec<Product>, ScrapeError> {
        let mut products: Vec<Product> = Vec::new();
        let mut position = 1u32;
        let mut page_no = 1u32;

        // Partial or empty content is tolerated; extraction proceeds with
        // whatever rendered.
        if !page.wait_for(RESULTS_CONTAINER, self.content_wait).await {
            debug!(query, "result grid did not populate in time");
        }

        while products.len() < target_count
            && page_no <= self.tuning.max_pages
            && !cancel.is_cancelled()
        {
            let html = page.content().await?;
            for item in self.extract(&html, query, position) {
                if products.len() >= target_count {
                    break;
                }
                if products.iter().any(|p| p.url == item.url) {
                    continue;
                }
                products.push(item);
                position += 1;
            }

            progress.report(products.len());
            if products.len() >= target_count {
                break;
            }

            if !self.advance(page).await {
                debug!(query, page_no, "no further result pages");
                break;
            }
            page_no += 1;
            settle(&cancel, std::time::Duration::from_millis(self.tuning.batch_pause_ms)).await;
        }

        Ok(products)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pod(title: &str, price: &str, href: &str, seller: &str) -> String {
        format!(
            r#"<div class="grid-pod">
                 <a href="{href}">
                   <b class="pod-title title-rebrand">Acme</b>
                   <b class="pod-subTitle subTitle-rebrand">{title}</b>
                   <b class="pod-sellerText seller-text-rebrand">Por {seller}</b>
                   <span class="copy10">{price}</span>
                 </a>
               </div>"#
        )
    }

    #[test]
    fn extracts_products_from_grid() {
        let scraper = FalabellaScraper::new(&ScraperConfig::default()).unwrap();
        let html = format!(
            "<html><body>{}{}</body></html>",
            pod("Smart TV 55", "S/ 1,499.00", "https://f.pe/tv-55", "Falabella"),
            pod("Smart TV 65", "S/ 2.199,90", "https://f.pe/tv-65", "LG Oficial"),
        );

        let products = scraper.extract(&html, "smart tv", 1);
        assert_eq!(products.len(), 2);

        assert_eq!(products[0].title, "Smart TV 55");
        assert_eq!(products[0].position, 1);
        assert_eq!(products[0].url, "https://f.pe/tv-55");
        assert_eq!(products[0].brand.as_deref(), Some("Acme"));
        assert_eq!(products[0].seller.as_deref(), Some("Falabella"));
        assert!((products[0].price - 1499.0).abs() < f64::EPSILON);

        assert_eq!(products[1].position, 2);
        assert_eq!(products[1].seller.as_deref(), Some("LG Oficial"));
        assert!((products[1].price - 2199.90).abs() < f64::EPSILON);
    }

    #[test]
    fn pod_without_title_or_link_is_skipped() {
        let scraper = FalabellaScraper::new(&ScraperConfig::default()).unwrap();
        let html = r#"<div class="grid-pod"><a href="https://f.pe/x"></a></div>
                      <div class="grid-pod"><b class="pod-subTitle subTitle-rebrand">No link</b></div>"#;
        assert!(scraper.extract(html, "q", 1).is_empty());
    }
}
