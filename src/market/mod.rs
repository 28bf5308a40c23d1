//! Market price store.
//!
//! Ingests cached provider documents into a name-keyed price table, applies
//! configured custom price overrides and serves lookups. Readers always see
//! a complete table: a rebuild parses everything into a fresh map and swaps
//! it in as a new immutable snapshot.

pub mod expr;
pub mod ninja;

use anyhow::{Context, Result};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, SystemTime};
use tracing::{debug, error, info, warn};

use crate::config::CustomPriceConfig;
use crate::types::PriceEntry;
use ninja::{Category, CATEGORIES};

/// Entries grouped by name, each group in source order.
pub type PriceTable = BTreeMap<String, Vec<PriceEntry>>;

/// Names tried, in order, when pricing one reroll.
const REROLL_CURRENCY_NAMES: &[&str] = &["Exotic Coinage", "Exotic Coin", "Exotic", "Coinage"];

/// Reroll price used when the market has no usable reference.
pub const DEFAULT_REROLL_PRICE: f64 = 0.5;

/// Integrity of one cached provider file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileIntegrity {
    #[default]
    Unknown,
    Valid,
    Invalid,
}

/// Status row for one expected provider file.
#[derive(Debug, Clone)]
pub struct FileStatus {
    pub category: &'static str,
    pub path: PathBuf,
    pub exists: bool,
    pub integrity: FileIntegrity,
    pub age: Option<Duration>,
    pub progress: f32,
}

pub struct PriceStore {
    data_dir: PathBuf,
    custom_prices: Vec<CustomPriceConfig>,
    snapshot: RwLock<Arc<PriceTable>>,
    dirty: AtomicBool,
    integrity: Mutex<HashMap<&'static str, FileIntegrity>>,
    progress: Mutex<HashMap<&'static str, f32>>,
}

impl PriceStore {
    /// A store reading `<data_dir>/<Category>.json`. Nothing is parsed until
    /// the first read or an explicit [`refresh`](Self::refresh).
    pub fn new(data_dir: impl Into<PathBuf>, custom_prices: Vec<CustomPriceConfig>) -> Self {
        Self {
            data_dir: data_dir.into(),
            custom_prices,
            snapshot: RwLock::new(Arc::new(PriceTable::new())),
            dirty: AtomicBool::new(true),
            integrity: Mutex::new(HashMap::new()),
            progress: Mutex::new(HashMap::new()),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn file_path(&self, category: &Category) -> PathBuf {
        self.data_dir.join(category.file_name())
    }

    // -- Snapshot access -------------------------------------------------

    /// Current table, rebuilding first if the store was marked dirty.
    ///
    /// Concurrent callers coalesce: only the caller that clears the dirty
    /// flag rebuilds, the others keep reading the previous snapshot.
    pub fn snapshot(&self) -> Arc<PriceTable> {
        if self.dirty.swap(false, Ordering::AcqRel) {
            self.rebuild();
        }
        self.current()
    }

    /// Entries for `name` in source order; empty if unknown.
    pub fn entries(&self, name: &str) -> Vec<PriceEntry> {
        self.snapshot().get(name).cloned().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Request a re-parse on the next read.
    pub fn set_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    /// Re-check file integrity and re-ingest every cached file now.
    pub fn refresh(&self) {
        self.check_integrity();
        self.dirty.store(false, Ordering::Release);
        self.rebuild();
    }

    fn current(&self) -> Arc<PriceTable> {
        let guard = self.snapshot.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    fn rebuild(&self) {
        let table = match self.build_table() {
            Ok(table) => table,
            Err(e) => {
                error!(error = %e, "Failed to build price table");
                PriceTable::new()
            }
        };
        info!(names = table.len(), "Price table rebuilt");
        let mut guard = self.snapshot.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(table);
    }

    fn build_table(&self) -> Result<PriceTable> {
        if !self.is_valid() {
            warn!("Market data invalid; serving an empty price table");
            return Ok(PriceTable::new());
        }

        let mut entries = Vec::new();
        for category in CATEGORIES {
            let path = self.file_path(category);
            let parsed = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))
                .and_then(|text| ninja::parse_category(category, &text));
            match parsed {
                Ok(mut list) => {
                    debug!(category = category.name, count = list.len(), "Parsed market file");
                    entries.append(&mut list);
                }
                Err(e) => {
                    self.set_integrity(category.name, FileIntegrity::Invalid);
                    return Err(e.context(format!("Market file {} unusable", category.name)));
                }
            }
        }

        let mut table = group_entries(entries);
        apply_custom_prices(&mut table, &self.custom_prices);
        Ok(table)
    }

    // -- Integrity & progress --------------------------------------------

    /// Mark each expected file Valid (exists and is JSON) or Invalid.
    pub fn check_integrity(&self) {
        for category in CATEGORIES {
            let path = self.file_path(category);
            let integrity = match std::fs::read_to_string(&path) {
                Ok(text) if serde_json::from_str::<serde_json::Value>(&text).is_ok() => {
                    FileIntegrity::Valid
                }
                _ => FileIntegrity::Invalid,
            };
            self.set_integrity(category.name, integrity);
        }
    }

    /// True only when every expected file has been checked and is Valid.
    pub fn is_valid(&self) -> bool {
        let integrity = self.integrity.lock().unwrap_or_else(|e| e.into_inner());
        CATEGORIES
            .iter()
            .all(|c| integrity.get(c.name) == Some(&FileIntegrity::Valid))
    }

    pub fn integrity(&self, category: &str) -> FileIntegrity {
        let integrity = self.integrity.lock().unwrap_or_else(|e| e.into_inner());
        integrity.get(category).copied().unwrap_or_default()
    }

    fn set_integrity(&self, category: &'static str, value: FileIntegrity) {
        let mut integrity = self.integrity.lock().unwrap_or_else(|e| e.into_inner());
        integrity.insert(category, value);
    }

    pub fn progress(&self, category: &str) -> f32 {
        let progress = self.progress.lock().unwrap_or_else(|e| e.into_inner());
        progress.get(category).copied().unwrap_or(0.0)
    }

    pub fn set_progress(&self, category: &'static str, value: f32) {
        let mut progress = self.progress.lock().unwrap_or_else(|e| e.into_inner());
        progress.insert(category, value.clamp(0.0, 1.0));
    }

    /// Per-file status for reporting.
    pub fn status(&self) -> Vec<FileStatus> {
        let now = SystemTime::now();
        CATEGORIES
            .iter()
            .map(|c| {
                let path = self.file_path(c);
                let modified = std::fs::metadata(&path).and_then(|m| m.modified()).ok();
                FileStatus {
                    category: c.name,
                    exists: path.exists(),
                    integrity: self.integrity(c.name),
                    age: modified.map(|m| now.duration_since(m).unwrap_or_default()),
                    progress: self.progress(c.name),
                    path,
                }
            })
            .collect()
    }

    /// Whether any file is missing or the oldest is older than `max_age`.
    pub fn should_fetch(&self, max_age: Duration) -> bool {
        self.status()
            .iter()
            .any(|s| !s.exists || s.age.map_or(true, |age| age > max_age))
    }

    /// Chaos price of one reroll.
    pub fn reference_reroll_price(&self) -> f64 {
        reference_reroll_price(&self.snapshot())
    }
}

// ---------------------------------------------------------------------------
// Table construction
// ---------------------------------------------------------------------------

/// Group entries by name, keeping source order within each group.
pub fn group_entries(entries: Vec<PriceEntry>) -> PriceTable {
    let mut table = PriceTable::new();
    for entry in entries {
        table.entry(entry.name.clone()).or_default().push(entry);
    }
    table
}

/// Replace the group of every overridden name with a single entry.
///
/// The entry starts from the first existing entry (or a zero-valued
/// placeholder). A fixed value is applied directly; an expression is
/// evaluated against the first entry of each referenced name. A failed
/// expression is logged and leaves the starting value in place.
pub fn apply_custom_prices(table: &mut PriceTable, overrides: &[CustomPriceConfig]) {
    for custom in overrides {
        let mut entry = table
            .get(&custom.name)
            .and_then(|group| group.first())
            .cloned()
            .unwrap_or_else(|| PriceEntry::plain(custom.name.clone(), 0.0));

        if let Some(value) = custom.value {
            entry.chaos_value = value.max(0.0);
        } else if let Some(expression) = &custom.expression {
            let evaluated = expr::substitute(expression, |name| {
                table
                    .get(name)
                    .and_then(|group| group.first())
                    .map(|e| e.chaos_value)
            })
            .and_then(|text| expr::evaluate(&text));
            match evaluated {
                Ok(value) => entry.chaos_value = value.max(0.0),
                Err(e) => {
                    error!(name = %custom.name, expression = %expression, error = %e,
                        "Custom price expression failed");
                }
            }
        }

        debug!(name = %custom.name, value = entry.chaos_value, "Custom price applied");
        table.insert(custom.name.clone(), vec![entry]);
    }
}

/// Price of one reroll: the first known reroll currency with a positive
/// price, else any name mentioning exotic/coin, else the default.
pub fn reference_reroll_price(table: &PriceTable) -> f64 {
    let first_positive = |group: &Vec<PriceEntry>| {
        group
            .first()
            .map(|e| e.chaos_value)
            .filter(|v| *v > 0.0)
    };

    if let Some(price) = REROLL_CURRENCY_NAMES
        .iter()
        .find_map(|name| table.get(*name).and_then(first_positive))
    {
        return price;
    }

    table
        .iter()
        .filter(|(name, _)| {
            let lower = name.to_lowercase();
            lower.contains("exotic") || lower.contains("coin")
        })
        .find_map(|(_, group)| first_positive(group))
        .unwrap_or(DEFAULT_REROLL_PRICE)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
