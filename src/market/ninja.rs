//! poe.ninja market data.
//!
//! Each category is cached as `<data_dir>/<Category>.json`. Three document
//! shapes exist: currency overviews, item overviews (with kind-specific
//! columns for maps, gems and cluster jewels) and exchange overviews that
//! split metadata (`items`) from prices (`lines`).
//!
//! Base URLs:
//!   https://poe.ninja/api/data/{Currency,Item}Overview
//!   https://poe.ninja/poe1/api/economy/exchange/current/overview

use anyhow::{Context, Result};
use futures::future::join_all;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::PriceStore;
use crate::types::PriceEntry;

// ---------------------------------------------------------------------------
// Categories
// ---------------------------------------------------------------------------

const CURRENCY_OVERVIEW_URL: &str = "https://poe.ninja/api/data/CurrencyOverview";
const ITEM_OVERVIEW_URL: &str = "https://poe.ninja/api/data/ItemOverview";
const EXCHANGE_OVERVIEW_URL: &str = "https://poe.ninja/poe1/api/economy/exchange/current/overview";

/// Attempts per file before a download is reported as failed.
const DOWNLOAD_ATTEMPTS: u32 = 3;

/// Gems that are priced regardless of level and quality.
const SPECIAL_SUPPORTS: &[&str] = &["Enlighten Support", "Empower Support", "Enhance Support"];

/// Which document shape a category is downloaded as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Currency,
    Items,
    Exchange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Category {
    pub name: &'static str,
    pub kind: DocumentKind,
}

impl Category {
    const fn new(name: &'static str, kind: DocumentKind) -> Self {
        Self { name, kind }
    }

    /// Whether an exchange overview exists for this category.
    pub fn supports_exchange(&self) -> bool {
        EXCHANGE_CATEGORIES.contains(&self.name)
    }

    pub fn file_name(&self) -> String {
        format!("{}.json", self.name)
    }

    /// Download URL; `exchange_mode` switches exchange-capable categories
    /// over to the exchange overview.
    pub fn url(&self, league: &str, exchange_mode: bool) -> String {
        let league = urlencoding::encode(league);
        let use_exchange =
            self.kind == DocumentKind::Exchange || (exchange_mode && self.supports_exchange());
        if use_exchange {
            return format!("{EXCHANGE_OVERVIEW_URL}?league={league}&type={}", self.name);
        }
        let base = match self.kind {
            DocumentKind::Currency => CURRENCY_OVERVIEW_URL,
            _ => ITEM_OVERVIEW_URL,
        };
        format!("{base}?league={league}&type={}&language=en", self.name)
    }
}

/// Every file the price store expects, in parse order.
pub const CATEGORIES: &[Category] = &[
    Category::new("Currency", DocumentKind::Currency),
    Category::new("Fragment", DocumentKind::Currency),
    Category::new("Artifact", DocumentKind::Exchange),
    Category::new("Oil", DocumentKind::Items),
    Category::new("Incubator", DocumentKind::Items),
    Category::new("Map", DocumentKind::Items),
    Category::new("BlightedMap", DocumentKind::Items),
    Category::new("UniqueMap", DocumentKind::Items),
    Category::new("DeliriumOrb", DocumentKind::Items),
    Category::new("Scarab", DocumentKind::Items),
    Category::new("Fossil", DocumentKind::Items),
    Category::new("Resonator", DocumentKind::Items),
    Category::new("Essence", DocumentKind::Items),
    Category::new("SkillGem", DocumentKind::Items),
    Category::new("Tattoo", DocumentKind::Items),
    Category::new("DivinationCard", DocumentKind::Items),
    Category::new("ClusterJewel", DocumentKind::Items),
];

const EXCHANGE_CATEGORIES: &[&str] = &[
    "Currency", "Fragment", "Artifact", "Oil", "Scarab", "Fossil", "Essence",
];

// ---------------------------------------------------------------------------
// Document types (poe.ninja JSON -> Rust)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct LinesDocument<T> {
    lines: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CurrencyLine {
    currency_type_name: String,
    #[serde(default)]
    chaos_equivalent: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemLine {
    name: String,
    #[serde(default)]
    chaos_value: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MapLine {
    name: String,
    #[serde(default)]
    chaos_value: f64,
    #[serde(default)]
    map_tier: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GemLine {
    name: String,
    #[serde(default)]
    chaos_value: f64,
    #[serde(default)]
    gem_level: u32,
    #[serde(default)]
    gem_quality: u32,
    #[serde(default)]
    corrupted: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClusterJewelLine {
    name: String,
    #[serde(default)]
    chaos_value: f64,
    #[serde(default)]
    level_required: u32,
    /// e.g. "8 passives"
    #[serde(default)]
    variant: String,
    #[serde(default)]
    base_type: String,
}

#[derive(Debug, Deserialize)]
struct ExchangeDocument {
    items: Vec<ExchangeItem>,
    lines: Vec<ExchangeLine>,
}

#[derive(Debug, Deserialize)]
struct ExchangeItem {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExchangeLine {
    id: String,
    #[serde(default)]
    primary_value: f64,
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse one cached document into price entries, in document order.
///
/// Exchange-capable categories try the exchange shape first and fall back
/// to their standard shape.
pub fn parse_category(category: &Category, text: &str) -> Result<Vec<PriceEntry>> {
    if category.supports_exchange() {
        if let Some(entries) = parse_exchange(text) {
            debug!(category = category.name, count = entries.len(), "Parsed exchange document");
            return Ok(entries);
        }
    }

    let entries = match (category.kind, category.name) {
        (DocumentKind::Currency, _) => {
            let doc: LinesDocument<CurrencyLine> = serde_json::from_str(text)
                .with_context(|| format!("Invalid currency document for {}", category.name))?;
            doc.lines
                .into_iter()
                .map(|l| PriceEntry::plain(l.currency_type_name, l.chaos_equivalent))
                .collect()
        }
        (DocumentKind::Exchange, _) => {
            anyhow::bail!("{} is only published as an exchange document", category.name)
        }
        (DocumentKind::Items, "Map" | "UniqueMap") => {
            let is_unique = category.name == "UniqueMap";
            let doc: LinesDocument<MapLine> = serde_json::from_str(text)
                .with_context(|| format!("Invalid map document for {}", category.name))?;
            doc.lines
                .into_iter()
                .map(|l| PriceEntry::map(l.name, l.chaos_value, l.map_tier, is_unique))
                .collect()
        }
        (DocumentKind::Items, "SkillGem") => {
            let doc: LinesDocument<GemLine> =
                serde_json::from_str(text).context("Invalid gem document")?;
            doc.lines
                .into_iter()
                .map(|l| {
                    let special = SPECIAL_SUPPORTS.contains(&l.name.as_str());
                    PriceEntry::gem(l.name, l.chaos_value, l.gem_level, l.gem_quality, l.corrupted, special)
                })
                .collect()
        }
        (DocumentKind::Items, "ClusterJewel") => {
            let doc: LinesDocument<ClusterJewelLine> =
                serde_json::from_str(text).context("Invalid cluster jewel document")?;
            doc.lines
                .into_iter()
                .map(|l| {
                    let passives = variant_passives(&l.variant);
                    PriceEntry::cluster_jewel(l.name, l.chaos_value, l.level_required, passives, l.base_type)
                })
                .collect()
        }
        (DocumentKind::Items, _) => {
            let doc: LinesDocument<ItemLine> = serde_json::from_str(text)
                .with_context(|| format!("Invalid item document for {}", category.name))?;
            doc.lines
                .into_iter()
                .map(|l| PriceEntry::plain(l.name, l.chaos_value))
                .collect()
        }
    };
    Ok(entries)
}

/// Join exchange metadata with price lines on `id`, keeping positive prices.
///
/// Returns `None` when the text is not an exchange document.
pub fn parse_exchange(text: &str) -> Option<Vec<PriceEntry>> {
    let doc: ExchangeDocument = serde_json::from_str(text).ok()?;
    let names: HashMap<&str, &str> = doc
        .items
        .iter()
        .map(|i| (i.id.as_str(), i.name.as_str()))
        .collect();

    Some(
        doc.lines
            .iter()
            .filter(|l| l.primary_value > 0.0)
            .filter_map(|l| {
                names
                    .get(l.id.as_str())
                    .map(|name| PriceEntry::plain(*name, l.primary_value))
            })
            .collect(),
    )
}

/// Passive count from a variant label; "12 passives" -> 12.
fn variant_passives(variant: &str) -> u32 {
    let digits: String = variant.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Download client
// ---------------------------------------------------------------------------

/// Outcome of a full download pass.
#[derive(Debug, Default)]
pub struct DownloadReport {
    pub downloaded: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl DownloadReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Fetches every category document concurrently into the store's data folder.
pub struct NinjaClient {
    http: Client,
    league: String,
    exchange_mode: bool,
}

impl NinjaClient {
    pub fn new(league: impl Into<String>, exchange_mode: bool) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(120))
            .user_agent("haggler/0.1.0 (market-data-cache)")
            .build()
            .context("Failed to build HTTP client for poe.ninja")?;

        Ok(Self {
            http,
            league: league.into(),
            exchange_mode,
        })
    }

    /// Download all categories, then mark the store dirty and re-check integrity.
    pub async fn download_all(&self, store: &PriceStore) -> Result<DownloadReport> {
        tokio::fs::create_dir_all(store.data_dir())
            .await
            .with_context(|| format!("Failed to create {}", store.data_dir().display()))?;

        info!(
            league = %self.league,
            exchange_mode = self.exchange_mode,
            files = CATEGORIES.len(),
            "Downloading market data"
        );

        let tasks = CATEGORIES.iter().map(|category| async move {
            store.set_progress(category.name, 0.0);
            let path = store.file_path(category);
            let url = category.url(&self.league, self.exchange_mode);
            let result = self.download_with_retry(&url, &path).await;
            store.set_progress(category.name, if result.is_ok() { 1.0 } else { 0.0 });
            (category.name, result)
        });

        let mut report = DownloadReport::default();
        for (name, result) in join_all(tasks).await {
            match result {
                Ok(()) => report.downloaded.push(name.to_string()),
                Err(e) => {
                    warn!(category = name, error = %e, "Download failed");
                    report.failed.push((name.to_string(), format!("{e:#}")));
                }
            }
        }

        store.check_integrity();
        store.set_dirty();

        info!(
            downloaded = report.downloaded.len(),
            failed = report.failed.len(),
            valid = store.is_valid(),
            "Market data download finished"
        );
        Ok(report)
    }

    async fn download_with_retry(&self, url: &str, path: &Path) -> Result<()> {
        let mut last_err = None;
        for attempt in 1..=DOWNLOAD_ATTEMPTS {
            match self.download(url, path).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    debug!(url, attempt, error = %e, "Download attempt failed");
                    last_err = Some(e);
                    if attempt < DOWNLOAD_ATTEMPTS {
                        tokio::time::sleep(Duration::from_millis(500 * attempt as u64)).await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("no download attempts made")))
    }

    async fn download(&self, url: &str, path: &Path) -> Result<()> {
        debug!(url, "Fetching market document");

        let resp = self
            .http
            .get(url)
            .header("Accept", "application/json, text/plain, */*")
            .header("Referer", "https://poe.ninja/")
            .send()
            .await
            .context("poe.ninja request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("poe.ninja error {status}: {body}");
        }

        let body = resp
            .text()
            .await
            .context("Failed to read poe.ninja response body")?;

        tokio::fs::write(path, &body)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;

        debug!(path = %path.display(), bytes = body.len(), "Saved market document");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
