//! Demo session: run one query across both simulated sites, wait for the
//! jobs to finish, then print the persisted record and the cross-site price
//! comparison.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use tracing::info;

use price_scout::config::AppConfig;
use price_scout::domain::{Site, TaskRecord};
use price_scout::logging::init_logging;
use price_scout::manager::ScrapeManager;
use price_scout::sim::{SimBrowserHost, SimListing};
use price_scout::stats::calculate_stats;
use price_scout::storage::{JsonFileStore, StoreHandle};

fn falabella_listings() -> Vec<SimListing> {
    vec![
        SimListing::new(
            "Televisor Samsung 55 Crystal UHD 4K",
            "S/ 1,799.00",
            "https://www.falabella.com.pe/p/tv-samsung-55",
        )
        .with_brand("SAMSUNG"),
        SimListing::new(
            "Televisor LG OLED 55 evo",
            "S/ 4,299.00",
            "https://www.falabella.com.pe/p/tv-lg-oled-55",
        )
        .with_brand("LG"),
        SimListing::new(
            "Laptop Lenovo IdeaPad 3 15 Ryzen 5",
            "S/ 1,899.00",
            "https://www.falabella.com.pe/p/laptop-lenovo-ideapad-3",
        )
        .with_brand("LENOVO")
        .with_seller("Falabella"),
        SimListing::new(
            "Licuadora Oster Xpert Series",
            "S/ 399.00",
            "https://www.falabella.com.pe/p/licuadora-oster",
        ),
    ]
}

fn mercadolibre_listings() -> Vec<SimListing> {
    vec![
        SimListing::new(
            "Televisor Samsung 55 Crystal UHD 4K",
            "1.599",
            "https://articulo.mercadolibre.com.pe/tv-samsung-55",
        ),
        SimListing::new(
            "Laptop Lenovo IdeaPad 3 15 Ryzen 5",
            "1.749",
            "https://articulo.mercadolibre.com.pe/laptop-lenovo-ideapad-3",
        ),
        SimListing::new(
            "Audifonos Sony WH-1000XM4",
            "899",
            "https://articulo.mercadolibre.com.pe/sony-wh1000xm4",
        ),
        SimListing::new(
            "Televisor LG OLED 55 evo",
            "3.999",
            "https://articulo.mercadolibre.com.pe/tv-lg-oled-55",
        ),
    ]
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut config = AppConfig::load()?;
    init_logging(&config.logging)?;

    // the simulated catalog is small; stop when it is exhausted instead of
    // waiting out the safety window
    config.manager.target_counts.falabella = falabella_listings().len();
    config.manager.target_counts.mercadolibre = mercadolibre_listings().len();

    let query = std::env::args().nth(1).unwrap_or_else(|| "smart tv".into());
    let task_id = format!("task-{}", uuid::Uuid::new_v4());

    let store = StoreHandle::spawn(Arc::new(JsonFileStore::new(&config.storage.path)));
    store.upsert_task(TaskRecord::new(task_id.as_str(), query.as_str()));

    let (host, ready_rx) = SimBrowserHost::new(
        config.scraper.clone(),
        falabella_listings(),
        mercadolibre_listings(),
    );
    let handle = ScrapeManager::spawn(host, ready_rx, store.clone(), config.manager.clone());

    info!(task_id, query, "launching scraping session");
    for site in Site::ALL {
        handle.request_launch(task_id.as_str(), site, query.as_str());
    }

    let record = wait_for_completion(&store, &task_id).await?;
    handle.shutdown().await;

    println!("task {}, query {:?}", record.task_id, record.query);
    for site in Site::ALL {
        if let Some(state) = record.site(site) {
            println!(
                "  {site}: {:?}, {} items",
                state.status,
                state.results.len()
            );
            for product in &state.results {
                println!(
                    "    #{} {}: {} ({})",
                    product.position,
                    product.title,
                    product.price,
                    product.price_text.as_deref().unwrap_or("n/a"),
                );
            }
        }
    }

    let falabella = record
        .site(Site::Falabella)
        .map(|s| s.results.clone())
        .unwrap_or_default();
    let mercadolibre = record
        .site(Site::MercadoLibre)
        .map(|s| s.results.clone())
        .unwrap_or_default();
    let stats = calculate_stats(&falabella, &mercadolibre);

    println!("\ncomparable products: {}", stats.len());
    println!("{}", serde_json::to_string_pretty(&stats)?);

    Ok(())
}

/// Poll the store until every site of the task reaches a terminal status.
async fn wait_for_completion(store: &StoreHandle, task_id: &str) -> Result<TaskRecord> {
    for _ in 0..600 {
        store.flush().await;
        let tasks = store.read_all().await?;
        if let Some(record) = tasks.iter().find(|t| t.task_id == task_id) {
            let all_terminal = Site::ALL
                .iter()
                .all(|site| record.site(*site).is_some_and(|s| s.status.is_terminal()));
            if all_terminal {
                return Ok(record.clone());
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    bail!("scraping session did not finish in time");
}
