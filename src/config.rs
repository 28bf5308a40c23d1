//! Configuration loading from TOML.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs. Every
//! section has defaults so a partial file (or none of a section) still
//! yields a usable configuration.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

use crate::types::{ArtifactKind, HaggleError};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub general: GeneralConfig,
    pub market: MarketConfig,
    pub filter: FilterConfig,
    pub haggle: HaggleConfig,
    pub artifacts: ArtifactsConfig,
    pub timeouts: TimeoutsConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GeneralConfig {
    pub league: String,
    /// Where provider documents are cached (`<Category>.json`).
    pub data_dir: PathBuf,
    /// Where the session ledger tables are appended.
    pub history_dir: PathBuf,
    /// Settle time after hovering or clicking, in milliseconds.
    pub hover_delay_ms: u64,
    /// Price items but never negotiate.
    pub debug_only: bool,
    /// Upper bound on batches per session (0 = until the guard fails).
    pub max_batches: u32,
    /// Replay scenario driven by the binary in place of a live game client.
    pub scenario: Option<PathBuf>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            league: "Standard".to_string(),
            data_dir: PathBuf::from("NinjaData"),
            history_dir: PathBuf::from("HaggleHistory"),
            hover_delay_ms: 50,
            debug_only: false,
            max_batches: 0,
            scenario: None,
        }
    }
}

/// A configured price override for one market name.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct CustomPriceConfig {
    pub name: String,
    /// Fixed chaos value. Takes precedence over `expression`.
    #[serde(default)]
    pub value: Option<f64>,
    /// Arithmetic over other entries, e.g. `"{Divine Orb} / 10"`.
    #[serde(default)]
    pub expression: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MarketConfig {
    /// Download exchange documents for exchange-capable categories.
    pub exchange_mode: bool,
    /// Single lookup name shared by all influenced maps. Empty = disabled.
    pub custom_influenced_map_name: String,
    pub custom_prices: Vec<CustomPriceConfig>,
    /// Cached files older than this trigger a re-download.
    pub refresh_max_age_mins: u64,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            exchange_mode: false,
            custom_influenced_map_name: String::new(),
            custom_prices: Vec::new(),
            refresh_max_age_mins: 60,
        }
    }
}

impl MarketConfig {
    pub fn influenced_map_name(&self) -> Option<&str> {
        let name = self.custom_influenced_map_name.trim();
        (!name.is_empty()).then_some(name)
    }
}

/// Rename rule: every `contains` substring must occur in the item's name or type.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct NameMapping {
    pub contains: Vec<String>,
    pub name: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FilterConfig {
    pub blacklist: Vec<String>,
    pub whitelist: Vec<String>,
    pub case_sensitive: bool,
    pub maps_enabled: bool,
    pub min_map_tier: u32,
    pub mappings: Vec<NameMapping>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            blacklist: Vec::new(),
            whitelist: Vec::new(),
            case_sensitive: true,
            maps_enabled: true,
            min_map_tier: 1,
            mappings: Vec::new(),
        }
    }
}

/// How the per-attempt multiplier turns the offer range into a target.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum MultiplierMode {
    /// `min + ceil((max - min) * m)`
    #[default]
    #[serde(rename = "Min To Max", alias = "min_to_max")]
    MinToMax,
    /// `floor(max * m)`
    #[serde(rename = "Max", alias = "max")]
    MaxRelative,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HaggleConfig {
    pub multiplier_mode: MultiplierMode,
    pub try1: f64,
    pub try2: f64,
    pub try3: f64,
}

impl Default for HaggleConfig {
    fn default() -> Self {
        Self {
            multiplier_mode: MultiplierMode::MinToMax,
            try1: 0.4,
            try2: 0.6,
            try3: 0.8,
        }
    }
}

impl HaggleConfig {
    /// Aggressiveness multiplier for 1-based attempt `attempt`.
    pub fn multiplier(&self, attempt: u32) -> f64 {
        match attempt {
            0 | 1 => self.try1,
            2 => self.try2,
            _ => self.try3,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ArtifactsConfig {
    pub enable_lesser: bool,
    pub enable_greater: bool,
    pub enable_grand: bool,
    pub enable_exceptional: bool,

    /// Chaos value of one unit of each tier.
    pub lesser_value: f64,
    pub greater_value: f64,
    pub grand_value: f64,
    pub exceptional_value: f64,
    pub coin_value: f64,

    /// Highest acceptable unit value per tier.
    pub lesser_max_cost: f64,
    pub greater_max_cost: f64,
    pub grand_max_cost: f64,
    pub exceptional_max_cost: f64,

    /// Asking value is scaled by this before comparing against market value.
    pub item_price_multiplier: f64,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            enable_lesser: true,
            enable_greater: true,
            enable_grand: true,
            enable_exceptional: true,
            lesser_value: 0.01,
            greater_value: 0.05,
            grand_value: 0.1,
            exceptional_value: 0.5,
            coin_value: 0.5,
            lesser_max_cost: 0.8,
            greater_max_cost: 0.8,
            grand_max_cost: 0.8,
            exceptional_max_cost: 0.8,
            item_price_multiplier: 1.0,
        }
    }
}

impl ArtifactsConfig {
    pub fn unit_value(&self, kind: ArtifactKind) -> f64 {
        match kind {
            ArtifactKind::Lesser => self.lesser_value,
            ArtifactKind::Greater => self.greater_value,
            ArtifactKind::Grand => self.grand_value,
            ArtifactKind::Exceptional => self.exceptional_value,
            ArtifactKind::Coin => self.coin_value,
        }
    }

    /// Threshold for a tier; coins carry no threshold.
    pub fn max_cost(&self, kind: ArtifactKind) -> Option<f64> {
        match kind {
            ArtifactKind::Lesser => Some(self.lesser_max_cost),
            ArtifactKind::Greater => Some(self.greater_max_cost),
            ArtifactKind::Grand => Some(self.grand_max_cost),
            ArtifactKind::Exceptional => Some(self.exceptional_max_cost),
            ArtifactKind::Coin => None,
        }
    }

    pub fn is_enabled(&self, kind: ArtifactKind) -> bool {
        match kind {
            ArtifactKind::Lesser => self.enable_lesser,
            ArtifactKind::Greater => self.enable_greater,
            ArtifactKind::Grand => self.enable_grand,
            ArtifactKind::Exceptional => self.enable_exceptional,
            ArtifactKind::Coin => true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TimeoutsConfig {
    pub tooltip_ms: u64,
    pub negotiation_open_ms: u64,
    pub poll_interval_ms: u64,
    pub reroll_ms: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            tooltip_ms: 1000,
            negotiation_open_ms: 500,
            poll_interval_ms: 25,
            reroll_ms: 1000,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> Result<(), HaggleError> {
        for (label, m) in [
            ("try1", self.haggle.try1),
            ("try2", self.haggle.try2),
            ("try3", self.haggle.try3),
        ] {
            if !(0.0..=1.0).contains(&m) {
                return Err(HaggleError::Config(format!(
                    "haggle.{label} must be within [0, 1], got {m}"
                )));
            }
        }
        if self.artifacts.item_price_multiplier < 0.0 {
            return Err(HaggleError::Config(
                "artifacts.item_price_multiplier must not be negative".into(),
            ));
        }
        for price in &self.market.custom_prices {
            if price.value.is_none() && price.expression.is_none() {
                return Err(HaggleError::Config(format!(
                    "custom price '{}' needs a value or an expression",
                    price.name
                )));
            }
        }
        Ok(())
    }
}
