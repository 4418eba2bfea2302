//! price-scout: a scraping orchestration engine for Peruvian e-commerce
//! price comparison.
//!
//! A [`manager::ScrapeManager`] runs concurrent per-site scraping jobs, each
//! inside an isolated browser context provided by a [`browser::BrowserHost`].
//! The manager talks to the worker runtime in each context over a Job Channel
//! ([`protocol`]), merges result batches deduplicated by URL, and persists
//! progress through a serialized [`storage::StoreHandle`]. Site-specific
//! extraction lives in [`scrapers`]; [`sim`] provides an in-process host so
//! the whole pipeline runs without a browser.

pub mod browser;
pub mod config;
pub mod domain;
pub mod logging;
pub mod manager;
pub mod page;
pub mod protocol;
pub mod scrapers;
pub mod sim;
pub mod stats;
pub mod storage;
pub mod util;
pub mod worker;
