//! End-to-end sessions through the simulated browser host: real manager,
//! real worker runtime, real extraction strategies, canned pages.

use std::sync::Arc;
use std::time::Duration;

use price_scout::config::{ManagerConfig, ScraperConfig, TargetCounts};
use price_scout::domain::{ScrapeStatus, Site, TaskRecord};
use price_scout::manager::ScrapeManager;
use price_scout::sim::{SimBrowserHost, SimListing};
use price_scout::stats::calculate_stats;
use price_scout::storage::{MemoryStore, StoreHandle};

fn scraper_config() -> ScraperConfig {
    let mut config = ScraperConfig::default();
    config.content_wait_ms = 10;
    config.falabella.batch_pause_ms = 5;
    config.mercadolibre.page_pause_ms = 5;
    config.mercadolibre.items_per_page = 2;
    config
}

fn manager_config(falabella: usize, mercadolibre: usize) -> ManagerConfig {
    ManagerConfig {
        safety_timeout_ms: 10_000,
        target_counts: TargetCounts {
            falabella,
            mercadolibre,
        },
    }
}

fn falabella_listings() -> Vec<SimListing> {
    vec![
        SimListing::new(
            "Televisor Samsung 55 Crystal UHD",
            "S/ 1,799.00",
            "https://f.pe/tv-samsung-55",
        )
        .with_seller("Falabella"),
        SimListing::new("Televisor LG OLED 55", "S/ 4,299.00", "https://f.pe/tv-lg-55"),
        SimListing::new("Licuadora Oster Xpert", "S/ 399.00", "https://f.pe/licuadora"),
    ]
}

fn mercadolibre_listings() -> Vec<SimListing> {
    vec![
        SimListing::new("Televisor Samsung 55 Crystal UHD", "1.599", "https://ml.pe/tv-samsung"),
        SimListing::new("Televisor LG OLED 55", "3.999", "https://ml.pe/tv-lg"),
        SimListing::new("Parlante JBL Flip 6", "449", "https://ml.pe/jbl-flip"),
        SimListing::new("Teclado Logitech MX Keys", "389", "https://ml.pe/mx-keys"),
    ]
}

async fn wait_terminal(store: &StoreHandle, site: Site) -> price_scout::domain::SiteState {
    for _ in 0..1000 {
        store.flush().await;
        let tasks = store.read_all().await.unwrap();
        if let Some(state) = tasks[0].site(site) {
            if state.status.is_terminal() {
                return state.clone();
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("{site} never reached a terminal status");
}

#[tokio::test]
async fn full_session_runs_both_sites_to_done() {
    let store = StoreHandle::spawn(Arc::new(MemoryStore::new()));
    store.upsert_task(TaskRecord::new("t1", "televisor"));

    let (host, ready_rx) = SimBrowserHost::new(
        scraper_config(),
        falabella_listings(),
        mercadolibre_listings(),
    );
    let handle = ScrapeManager::spawn(
        host,
        ready_rx,
        store.clone(),
        manager_config(3, 4),
    );

    for site in Site::ALL {
        handle.request_launch("t1", site, "televisor");
    }

    let falabella = wait_terminal(&store, Site::Falabella).await;
    let mercadolibre = wait_terminal(&store, Site::MercadoLibre).await;

    assert_eq!(falabella.status, ScrapeStatus::Done);
    assert_eq!(falabella.progress, 3);
    assert_eq!(falabella.results.len(), 3);
    assert_eq!(falabella.results[0].title, "Televisor Samsung 55 Crystal UHD");
    assert_eq!(falabella.results[0].position, 1);
    assert!((falabella.results[0].price - 1799.0).abs() < f64::EPSILON);
    assert_eq!(falabella.results[0].seller.as_deref(), Some("Falabella"));

    // the mercadolibre run paginates: 4 listings at 2 per page
    assert_eq!(mercadolibre.status, ScrapeStatus::Done);
    assert_eq!(mercadolibre.results.len(), 4);
    assert_eq!(mercadolibre.results[3].position, 4);
    assert!((mercadolibre.results[0].price - 1599.0).abs() < f64::EPSILON);

    // no two merged items share a URL
    let mut urls: Vec<&str> = falabella
        .results
        .iter()
        .chain(mercadolibre.results.iter())
        .map(|p| p.url.as_str())
        .collect();
    urls.sort_unstable();
    urls.dedup();
    assert_eq!(urls.len(), 7);

    // both jobs are gone from the active table
    assert!(handle.active_jobs().await.is_empty());
    handle.shutdown().await;
}

#[tokio::test]
async fn finished_results_feed_the_price_comparison() {
    let store = StoreHandle::spawn(Arc::new(MemoryStore::new()));
    store.upsert_task(TaskRecord::new("t1", "televisor"));

    let (host, ready_rx) = SimBrowserHost::new(
        scraper_config(),
        falabella_listings(),
        mercadolibre_listings(),
    );
    let handle = ScrapeManager::spawn(host, ready_rx, store.clone(), manager_config(3, 4));

    for site in Site::ALL {
        handle.request_launch("t1", site, "televisor");
    }
    let falabella = wait_terminal(&store, Site::Falabella).await;
    let mercadolibre = wait_terminal(&store, Site::MercadoLibre).await;
    handle.shutdown().await;

    let stats = calculate_stats(&falabella.results, &mercadolibre.results);
    // the two televisor models exist on both sites; the rest are unique
    assert_eq!(stats.len(), 2);
    for group in &stats {
        assert_eq!(group.count_falabella, 1);
        assert_eq!(group.count_mercadolibre, 1);
        assert_eq!(group.cheaper_site, Site::MercadoLibre);
        assert!(group.savings > 0.0);
    }
}

#[tokio::test]
async fn immediate_cancel_ends_the_job_cancelled() {
    let store = StoreHandle::spawn(Arc::new(MemoryStore::new()));
    store.upsert_task(TaskRecord::new("t1", "televisor"));

    let (host, ready_rx) = SimBrowserHost::new(
        scraper_config(),
        falabella_listings(),
        Vec::new(),
    );
    let handle = ScrapeManager::spawn(host, ready_rx, store.clone(), manager_config(3, 4));

    handle.request_launch("t1", Site::Falabella, "televisor");
    handle.request_cancel("t1", Site::Falabella);

    let state = wait_terminal(&store, Site::Falabella).await;
    assert_eq!(state.status, ScrapeStatus::Cancelled);
    assert!(handle.active_jobs().await.is_empty());
    handle.shutdown().await;
}

#[tokio::test]
async fn empty_catalog_reports_an_extraction_error() {
    let store = StoreHandle::spawn(Arc::new(MemoryStore::new()));
    store.upsert_task(TaskRecord::new("t1", "televisor"));

    let (host, ready_rx) = SimBrowserHost::new(scraper_config(), Vec::new(), Vec::new());
    let handle = ScrapeManager::spawn(host, ready_rx, store.clone(), manager_config(3, 4));

    handle.request_launch("t1", Site::MercadoLibre, "televisor");
    let state = wait_terminal(&store, Site::MercadoLibre).await;

    // an empty first page produces no items at all, which is an error,
    // not an empty success
    assert_eq!(state.status, ScrapeStatus::Error);
    assert!(state.results.is_empty());
    handle.shutdown().await;
}
