//! Core value types shared by the orchestration engine and its collaborators.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::util::encode_component;

/// Supported e-commerce sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Site {
    Falabella,
    #[serde(rename = "mercadolibre")]
    MercadoLibre,
}

impl Site {
    pub const ALL: [Site; 2] = [Site::Falabella, Site::MercadoLibre];

    pub fn as_str(&self) -> &'static str {
        match self {
            Site::Falabella => "falabella",
            Site::MercadoLibre => "mercadolibre",
        }
    }

    /// Search-result URL for a query on this site.
    pub fn search_url(&self, query: &str) -> String {
        match self {
            Site::Falabella => format!(
                "https://www.falabella.com.pe/falabella-pe/search?Ntt={}",
                encode_component(query)
            ),
            Site::MercadoLibre => format!(
                "https://listado.mercadolibre.com.pe/{}",
                encode_component(query)
            ),
        }
    }
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Externally observable lifecycle of one scraping run.
///
/// `Idle` exists only in persisted records; an active job is always at least
/// `Running`. `Done`, `Error` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrapeStatus {
    Idle,
    Running,
    Done,
    Error,
    Cancelled,
}

impl ScrapeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScrapeStatus::Done | ScrapeStatus::Error | ScrapeStatus::Cancelled
        )
    }
}

/// One extracted product listing. Deduplication key is `url`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub site: Site,
    /// Query the listing was extracted for.
    pub query: String,
    /// Capture timestamp.
    pub captured_at: DateTime<Utc>,
    /// 1-based rank position within the search results.
    pub position: u32,
    pub title: String,
    /// Price text exactly as displayed, when present.
    pub price_text: Option<String>,
    /// Parsed numeric price; 0.0 when the displayed text is unparsable.
    pub price: f64,
    /// Canonical listing URL.
    pub url: String,
    pub brand: Option<String>,
    pub seller: Option<String>,
}

/// Per-site slice of a persisted task record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteState {
    pub status: ScrapeStatus,
    pub progress: usize,
    pub results: Vec<Product>,
}

impl Default for SiteState {
    fn default() -> Self {
        Self {
            status: ScrapeStatus::Idle,
            progress: 0,
            results: Vec::new(),
        }
    }
}

/// Persisted task state visible to the UI collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub query: String,
    pub created_at: DateTime<Utc>,
    pub sites: HashMap<Site, SiteState>,
}

impl TaskRecord {
    /// New record with every site seeded to `idle`, zero progress, no results.
    pub fn new(task_id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            query: query.into(),
            created_at: Utc::now(),
            sites: Site::ALL
                .iter()
                .map(|site| (*site, SiteState::default()))
                .collect(),
        }
    }

    pub fn site(&self, site: Site) -> Option<&SiteState> {
        self.sites.get(&site)
    }

    pub fn site_mut(&mut self, site: Site) -> &mut SiteState {
        self.sites.entry(site).or_default()
    }
}
