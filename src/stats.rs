//! Cross-site price comparison.
//!
//! Groups Falabella and MercadoLibre listings that look like the same
//! product and summarizes the price spread per group. Independent of the
//! orchestration engine; operates on whatever results a finished task holds.

use std::collections::HashSet;

use serde::Serialize;

use crate::domain::{Product, Site};

/// Titles must score at least this to be considered the same product.
const SIMILARITY_THRESHOLD: f64 = 0.55;
/// Listings whose prices differ by more than this fraction never match.
const MAX_PRICE_GAP: f64 = 0.4;

const TOKEN_WEIGHT: f64 = 0.7;
const BIGRAM_WEIGHT: f64 = 0.3;

const STOP_WORDS: [&str; 10] = ["de", "la", "el", "para", "con", "en", "y", "a", "un", "una"];

/// Price summary for one group of matched listings.
#[derive(Debug, Clone, Serialize)]
pub struct SimilarityStats {
    pub name: String,
    pub count_falabella: usize,
    pub count_mercadolibre: usize,
    pub avg_falabella: f64,
    pub avg_mercadolibre: f64,
    pub min_falabella: f64,
    pub min_mercadolibre: f64,
    pub max_falabella: f64,
    pub max_mercadolibre: f64,
    /// Absolute gap between the two site averages.
    pub savings: f64,
    /// Gap relative to the more expensive average, in percent.
    pub savings_percentage: f64,
    pub cheaper_site: Site,
}

/// Match listings across the two sites and summarize each group,
/// sorted by percentage savings, largest first.
pub fn calculate_stats(falabella: &[Product], mercadolibre: &[Product]) -> Vec<SimilarityStats> {
    let all: Vec<&Product> = falabella.iter().chain(mercadolibre.iter()).collect();
    let mut processed = vec![false; all.len()];
    let mut stats = Vec::new();

    for index in 0..all.len() {
        if processed[index] {
            continue;
        }
        processed[index] = true;

        let seed = all[index];
        let mut group = vec![seed];
        for other_index in index + 1..all.len() {
            if processed[other_index] {
                continue;
            }
            if are_similar(seed, all[other_index]) {
                group.push(all[other_index]);
                processed[other_index] = true;
            }
        }

        if group.len() > 1 {
            stats.push(summarize(group_name(&seed.title), &group));
        }
    }

    stats.sort_by(|a, b| {
        b.savings_percentage
            .partial_cmp(&a.savings_percentage)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    stats
}

fn summarize(name: String, group: &[&Product]) -> SimilarityStats {
    let prices = |site: Site| -> Vec<f64> {
        group
            .iter()
            .filter(|p| p.site == site && p.price > 0.0)
            .map(|p| p.price)
            .collect()
    };
    let falabella_prices = prices(Site::Falabella);
    let mercadolibre_prices = prices(Site::MercadoLibre);

    let avg_falabella = average(&falabella_prices);
    let avg_mercadolibre = average(&mercadolibre_prices);

    let (savings, savings_percentage) = if avg_falabella > 0.0 && avg_mercadolibre > 0.0 {
        let gap = (avg_falabella - avg_mercadolibre).abs();
        (gap, gap / avg_falabella.max(avg_mercadolibre) * 100.0)
    } else {
        (0.0, 0.0)
    };

    SimilarityStats {
        name,
        count_falabella: group.iter().filter(|p| p.site == Site::Falabella).count(),
        count_mercadolibre: group
            .iter()
            .filter(|p| p.site == Site::MercadoLibre)
            .count(),
        avg_falabella,
        avg_mercadolibre,
        min_falabella: fold_prices(&falabella_prices, f64::min),
        min_mercadolibre: fold_prices(&mercadolibre_prices, f64::min),
        max_falabella: fold_prices(&falabella_prices, f64::max),
        max_mercadolibre: fold_prices(&mercadolibre_prices, f64::max),
        savings,
        savings_percentage,
        cheaper_site: if avg_falabella < avg_mercadolibre {
            Site::Falabella
        } else {
            Site::MercadoLibre
        },
    }
}

/// Two listings match when their titles are similar enough, their sellers do
/// not contradict each other, and their prices (when both known) are within
/// the allowed gap.
fn are_similar(a: &Product, b: &Product) -> bool {
    if text_similarity(&a.title, &b.title) < SIMILARITY_THRESHOLD {
        return false;
    }

    let seller_compatible = match (&a.seller, &b.seller) {
        (Some(x), Some(y)) => x == y,
        _ => true,
    };
    if !seller_compatible {
        return false;
    }

    if a.price > 0.0 && b.price > 0.0 {
        let gap = (a.price - b.price).abs() / a.price.max(b.price);
        if gap > MAX_PRICE_GAP {
            return false;
        }
    }

    true
}

/// Weighted blend of token-set and character-bigram Jaccard similarity over
/// normalized titles.
fn text_similarity(a: &str, b: &str) -> f64 {
    let a = normalize(a);
    let b = normalize(b);

    let tokens_a: HashSet<&str> = a.split_whitespace().collect();
    let tokens_b: HashSet<&str> = b.split_whitespace().collect();
    let token_score = jaccard(&tokens_a, &tokens_b);

    let bigram_score = jaccard(&bigrams(&a), &bigrams(&b));

    token_score * TOKEN_WEIGHT + bigram_score * BIGRAM_WEIGHT
}

fn jaccard<T: std::hash::Hash + Eq>(a: &HashSet<T>, b: &HashSet<T>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

fn bigrams(text: &str) -> HashSet<[char; 2]> {
    let chars: Vec<char> = text.chars().collect();
    chars.windows(2).map(|w| [w[0], w[1]]).collect()
}

/// Lowercase, fold Spanish diacritics, keep only word characters.
fn normalize(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| match c {
            'á' => 'a',
            'é' => 'e',
            'í' => 'i',
            'ó' => 'o',
            'ú' | 'ü' => 'u',
            'ñ' => 'n',
            c if c.is_alphanumeric() || c == '_' || c.is_whitespace() => c,
            _ => ' ',
        })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Group label: up to five significant words of the seed title.
fn group_name(title: &str) -> String {
    normalize(title)
        .split_whitespace()
        .filter(|w| w.len() > 2 && !STOP_WORDS.contains(w))
        .take(5)
        .collect::<Vec<_>>()
        .join(" ")
}

fn average(prices: &[f64]) -> f64 {
    if prices.is_empty() {
        return 0.0;
    }
    prices.iter().sum::<f64>() / prices.len() as f64
}

fn fold_prices(prices: &[f64], f: fn(f64, f64) -> f64) -> f64 {
    prices.iter().copied().reduce(f).unwrap_or(0.0)
}
