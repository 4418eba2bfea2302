//! Application configuration.
//!
//! Loaded from an optional `price-scout.toml` next to the working directory
//! plus `PRICE_SCOUT__*` environment overrides; every field has a default so
//! the crate runs unconfigured. Timeouts and per-site target counts live
//! here deliberately: they are tuning knobs, not derived values.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::Site;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub manager: ManagerConfig,
    pub scraper: ScraperConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load from `price-scout.toml` (optional) and environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("price-scout").required(false))
            .add_source(config::Environment::with_prefix("PRICE_SCOUT").separator("__"))
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}

/// Task Manager tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Forced-completion window after the last `result` message.
    pub safety_timeout_ms: u64,
    /// Stopping thresholds, fixed per site at job creation.
    pub target_counts: TargetCounts,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            safety_timeout_ms: 10_000,
            target_counts: TargetCounts::default(),
        }
    }
}

impl ManagerConfig {
    pub fn safety_timeout(&self) -> Duration {
        Duration::from_millis(self.safety_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetCounts {
    pub falabella: usize,
    pub mercadolibre: usize,
}

impl Default for TargetCounts {
    fn default() -> Self {
        Self {
            falabella: 60,
            mercadolibre: 100,
        }
    }
}

impl TargetCounts {
    pub fn for_site(&self, site: Site) -> usize {
        match site {
            Site::Falabella => self.falabella,
            Site::MercadoLibre => self.mercadolibre,
        }
    }
}

/// Extraction strategy tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScraperConfig {
    /// Bounded wait for the result area to populate before extracting.
    pub content_wait_ms: u64,
    pub falabella: FalabellaTuning,
    pub mercadolibre: MercadoLibreTuning,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            content_wait_ms: 8_000,
            falabella: FalabellaTuning::default(),
            mercadolibre: MercadoLibreTuning::default(),
        }
    }
}

impl ScraperConfig {
    pub fn content_wait(&self) -> Duration {
        Duration::from_millis(self.content_wait_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FalabellaTuning {
    /// Settle pause after advancing to the next batch.
    pub batch_pause_ms: u64,
    /// Hard page cap per run.
    pub max_pages: u32,
}

impl Default for FalabellaTuning {
    fn default() -> Self {
        Self {
            batch_pause_ms: 2_000,
            max_pages: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MercadoLibreTuning {
    /// Settle pause between page fetches.
    pub page_pause_ms: u64,
    /// Listing offset step between result pages.
    pub items_per_page: u32,
}

impl Default for MercadoLibreTuning {
    fn default() -> Self {
        Self {
            page_pause_ms: 1_000,
            items_per_page: 48,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path of the persisted task file.
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("tasks.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` overrides it.
    pub level: String,
    /// Also write daily-rolled log files.
    pub file_output: bool,
    pub dir: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_output: false,
            dir: PathBuf::from("logs"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_tuning() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.manager.safety_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.manager.target_counts.for_site(Site::Falabella), 60);
        assert_eq!(cfg.manager.target_counts.for_site(Site::MercadoLibre), 100);
        assert_eq!(cfg.scraper.content_wait(), Duration::from_secs(8));
        assert_eq!(cfg.scraper.falabella.max_pages, 5);
        assert_eq!(cfg.scraper.mercadolibre.items_per_page, 48);
    }
}
