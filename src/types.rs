//! Shared types for the HAGGLER decision core.
//!
//! These types form the data model used across all modules: market price
//! entries, scanned item snapshots, artifact costs, valuation states and the
//! crate-wide error taxonomy. They are kept free of I/O so that the market,
//! engine and storage modules can depend on them without cycles.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::ArtifactsConfig;

// ---------------------------------------------------------------------------
// Market price entries
// ---------------------------------------------------------------------------

/// One priced record from the market data provider.
///
/// Names are not unique: the same name can appear with different
/// kind-specific attributes (map tiers, gem levels, ...). Entries sharing a
/// name are grouped in source order and matched first-wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceEntry {
    pub name: String,
    /// Price in chaos (always >= 0).
    pub chaos_value: f64,
    #[serde(default)]
    pub attributes: PriceAttributes,
}

/// Kind-specific attributes carried by a price entry.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum PriceAttributes {
    #[default]
    Plain,
    Map {
        tier: u32,
        is_unique: bool,
    },
    Gem {
        level: u32,
        quality: u32,
        corrupted: bool,
        is_special_support: bool,
    },
    ClusterJewel {
        item_level: u32,
        passive_skill_count: u32,
        base_type: String,
    },
}

impl PriceEntry {
    pub fn plain(name: impl Into<String>, chaos_value: f64) -> Self {
        Self {
            name: name.into(),
            chaos_value: chaos_value.max(0.0),
            attributes: PriceAttributes::Plain,
        }
    }

    pub fn map(name: impl Into<String>, chaos_value: f64, tier: u32, is_unique: bool) -> Self {
        Self {
            name: name.into(),
            chaos_value: chaos_value.max(0.0),
            attributes: PriceAttributes::Map { tier, is_unique },
        }
    }

    pub fn gem(
        name: impl Into<String>,
        chaos_value: f64,
        level: u32,
        quality: u32,
        corrupted: bool,
        is_special_support: bool,
    ) -> Self {
        Self {
            name: name.into(),
            chaos_value: chaos_value.max(0.0),
            attributes: PriceAttributes::Gem {
                level,
                quality,
                corrupted,
                is_special_support,
            },
        }
    }

    pub fn cluster_jewel(
        name: impl Into<String>,
        chaos_value: f64,
        item_level: u32,
        passive_skill_count: u32,
        base_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            chaos_value: chaos_value.max(0.0),
            attributes: PriceAttributes::ClusterJewel {
                item_level,
                passive_skill_count,
                base_type: base_type.into(),
            },
        }
    }

    /// Short kind label used in logs and status output.
    pub fn kind_label(&self) -> &'static str {
        match self.attributes {
            PriceAttributes::Plain => "Item",
            PriceAttributes::Map { .. } => "Map",
            PriceAttributes::Gem { .. } => "Gem",
            PriceAttributes::ClusterJewel { .. } => "ClusterJewel",
        }
    }
}

impl fmt::Display for PriceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] {:.1}c", self.name, self.kind_label(), self.chaos_value)
    }
}

// ---------------------------------------------------------------------------
// Scanned items
// ---------------------------------------------------------------------------

/// Kind tag of a scanned item plus its kind-specific attributes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ItemKind {
    #[default]
    Generic,
    Map {
        tier: u32,
        is_unique: bool,
        is_influenced: bool,
    },
    Gem {
        level: u32,
        quality: u32,
        corrupted: bool,
    },
    ClusterJewel {
        item_level: u32,
        passive_skill_count: u32,
        base_type: String,
    },
}

impl ItemKind {
    /// Free-text classification details recorded in the session ledger.
    pub fn details(&self) -> String {
        match self {
            ItemKind::Generic => String::new(),
            ItemKind::Map {
                tier,
                is_unique,
                is_influenced,
            } => format!(
                "T{tier}{}{}",
                if *is_unique { ", Unique" } else { "" },
                if *is_influenced { ", Influenced" } else { "" },
            ),
            ItemKind::Gem {
                level,
                quality,
                corrupted,
            } => format!(
                "Lvl {level}, Q{quality}%{}",
                if *corrupted { ", Corrupted" } else { "" }
            ),
            ItemKind::ClusterJewel {
                item_level,
                passive_skill_count,
                ..
            } => format!("iLvl {item_level}, {passive_skill_count} Passives"),
        }
    }
}

/// An offered item as reported by the UI surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemSnapshot {
    /// Identity of the physical item slot for the lifetime of a batch.
    pub address: u64,
    pub name: String,
    pub item_type: String,
    #[serde(default = "default_amount")]
    pub amount: u32,
    /// Slot index in the trade window.
    pub slot: usize,
    #[serde(flatten)]
    pub kind: ItemKind,
}

fn default_amount() -> u32 {
    1
}

impl fmt::Display for ItemSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.item_type)?;
        if self.amount > 1 {
            write!(f, " x{}", self.amount)?;
        }
        let details = self.kind.details();
        if !details.is_empty() {
            write!(f, " [{details}]")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Artifacts
// ---------------------------------------------------------------------------

/// Currency tiers tendered during a haggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArtifactKind {
    Lesser,
    Greater,
    Grand,
    Exceptional,
    Coin,
}

impl ArtifactKind {
    /// The four artifact tiers (coins excluded).
    pub const TIERS: &'static [ArtifactKind] = &[
        ArtifactKind::Lesser,
        ArtifactKind::Greater,
        ArtifactKind::Grand,
        ArtifactKind::Exceptional,
    ];
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::Lesser => write!(f, "Lesser"),
            ArtifactKind::Greater => write!(f, "Greater"),
            ArtifactKind::Grand => write!(f, "Grand"),
            ArtifactKind::Exceptional => write!(f, "Exceptional"),
            ArtifactKind::Coin => write!(f, "Coin"),
        }
    }
}

/// Parse tooltip currency text such as "Greater Broken Circle Artifact"
/// or "Exotic Coinage" (case-insensitive).
impl std::str::FromStr for ArtifactKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_lowercase();
        if lower.contains("exceptional") {
            Ok(ArtifactKind::Exceptional)
        } else if lower.contains("grand") {
            Ok(ArtifactKind::Grand)
        } else if lower.contains("greater") {
            Ok(ArtifactKind::Greater)
        } else if lower.contains("lesser") {
            Ok(ArtifactKind::Lesser)
        } else if lower.contains("coin") {
            Ok(ArtifactKind::Coin)
        } else {
            Err(anyhow::anyhow!("Unknown artifact currency: {s}"))
        }
    }
}

/// An asking (or paid) price: an artifact tier and an integer amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactCost {
    pub kind: ArtifactKind,
    pub amount: u32,
}

impl ArtifactCost {
    pub fn new(kind: ArtifactKind, amount: u32) -> Self {
        Self { kind, amount }
    }

    /// Chaos-normalised value used for profitability comparison.
    pub fn total_value(&self, artifacts: &ArtifactsConfig) -> f64 {
        self.amount as f64 * artifacts.unit_value(self.kind)
    }
}

impl fmt::Display for ArtifactCost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.kind)
    }
}

/// Current currency stock shown in the trade window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HaggleStock {
    pub coins: u32,
    pub lesser: u32,
    pub greater: u32,
    pub grand: u32,
    pub exceptional: u32,
}

impl HaggleStock {
    pub fn get(&self, kind: ArtifactKind) -> u32 {
        match kind {
            ArtifactKind::Lesser => self.lesser,
            ArtifactKind::Greater => self.greater,
            ArtifactKind::Grand => self.grand,
            ArtifactKind::Exceptional => self.exceptional,
            ArtifactKind::Coin => self.coins,
        }
    }

    pub fn get_mut(&mut self, kind: ArtifactKind) -> &mut u32 {
        match kind {
            ArtifactKind::Lesser => &mut self.lesser,
            ArtifactKind::Greater => &mut self.greater,
            ArtifactKind::Grand => &mut self.grand,
            ArtifactKind::Exceptional => &mut self.exceptional,
            ArtifactKind::Coin => &mut self.coins,
        }
    }
}

impl fmt::Display for HaggleStock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "coins={} lesser={} greater={} grand={} exceptional={}",
            self.coins, self.lesser, self.greater, self.grand, self.exceptional
        )
    }
}

// ---------------------------------------------------------------------------
// Valuation state machine
// ---------------------------------------------------------------------------

/// Monotonic valuation state of an offered item.
///
/// `Unpriced -> {Priced | TooExpensive | Rejected}`, `Priced -> Bought`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ValuationState {
    #[default]
    Unpriced,
    Priced,
    TooExpensive,
    Rejected,
    Bought,
}

impl ValuationState {
    /// Whether `next` is a legal direct transition from `self`.
    pub fn can_transition_to(self, next: ValuationState) -> bool {
        use ValuationState::*;
        matches!(
            (self, next),
            (Unpriced, Priced) | (Unpriced, TooExpensive) | (Unpriced, Rejected) | (Priced, Bought)
        )
    }

    /// Whether `next` can be observed after `self` along the legal chain
    /// (direct transitions plus skipped intermediate states).
    pub fn can_reach(self, next: ValuationState) -> bool {
        use ValuationState::*;
        match self {
            Unpriced => next != Unpriced,
            Priced => next == Bought,
            TooExpensive | Rejected | Bought => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ValuationState::TooExpensive | ValuationState::Rejected | ValuationState::Bought
        )
    }
}

impl fmt::Display for ValuationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValuationState::Unpriced => write!(f, "Unpriced"),
            ValuationState::Priced => write!(f, "Priced"),
            ValuationState::TooExpensive => write!(f, "TooExpensive"),
            ValuationState::Rejected => write!(f, "Rejected"),
            ValuationState::Bought => write!(f, "Bought"),
        }
    }
}

impl std::str::FromStr for ValuationState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Unpriced" => Ok(ValuationState::Unpriced),
            "Priced" => Ok(ValuationState::Priced),
            "TooExpensive" => Ok(ValuationState::TooExpensive),
            "Rejected" => Ok(ValuationState::Rejected),
            "Bought" => Ok(ValuationState::Bought),
            other => Err(anyhow::anyhow!("Unknown valuation state: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Working item
// ---------------------------------------------------------------------------

/// An item moving through the pipeline during a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct HaggleItem {
    pub snapshot: ItemSnapshot,
    pub state: ValuationState,
    /// Market value in chaos for the whole stack (0 until priced).
    pub value: f64,
    /// Asking price read from the tooltip.
    pub asking: Option<ArtifactCost>,
    /// Offer confirmed by the negotiation engine.
    pub paid: Option<ArtifactCost>,
}

impl HaggleItem {
    pub fn new(snapshot: ItemSnapshot) -> Self {
        Self {
            snapshot,
            state: ValuationState::Unpriced,
            value: 0.0,
            asking: None,
            paid: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.snapshot.name
    }

    /// Move to `next`, refusing anything outside the valuation state machine.
    pub fn transition(&mut self, next: ValuationState) -> Result<(), HaggleError> {
        if !self.state.can_transition_to(next) {
            return Err(HaggleError::IllegalTransition {
                item: self.snapshot.name.clone(),
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }
}

impl fmt::Display for HaggleItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}> value={:.1}c", self.snapshot, self.state, self.value)?;
        if let Some(asking) = self.asking {
            write!(f, " asking={asking}")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for HAGGLER.
#[derive(Debug, thiserror::Error)]
pub enum HaggleError {
    /// Tooltip/price structure not present yet; retried locally.
    #[error("Transient read error: {0}")]
    TransientRead(String),

    /// Retries exhausted or the negotiation surface misbehaved. Aborts the batch.
    #[error("Fatal interaction error ({item}): {message}")]
    FatalInteraction {
        item: String,
        message: String,
        /// Structural dump of what was read, for the operator.
        dump: String,
    },

    #[error("Pricing error ({item}): {reason}")]
    Pricing { item: String, reason: String },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Market data error: {0}")]
    MarketData(String),

    #[error("Illegal valuation transition for {item}: {from} -> {to}")]
    IllegalTransition {
        item: String,
        from: ValuationState,
        to: ValuationState,
    },

    #[error("Run cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl HaggleError {
    /// Whether this error must stop the current batch.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            HaggleError::FatalInteraction { .. } | HaggleError::Cancelled
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
