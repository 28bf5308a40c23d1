//! Scripted haggle surface.
//!
//! Replays a JSON scenario (stock plus a list of item batches) so the
//! decision core can run end to end without a game client. The merchant
//! accepts any confirmed offer at or above an item's `accept_at`; lower
//! offers are refused and the window stays open.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

use super::tooltip::{price_tooltip, TooltipNode};
use super::{HaggleSurface, OfferWindow};
use crate::types::{ArtifactCost, ArtifactKind, HaggleStock, ItemSnapshot};

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    pub stock: HaggleStock,
    #[serde(default)]
    pub batches: Vec<ScriptedBatch>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScriptedBatch {
    pub items: Vec<ScriptedItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScriptedItem {
    pub item: ItemSnapshot,
    pub asking: ArtifactCost,
    pub offer_min: u32,
    pub offer_max: u32,
    /// Lowest offer the merchant accepts.
    pub accept_at: u32,
    /// Tooltip reads that come back empty before the tooltip renders.
    #[serde(default)]
    pub tooltip_misses: u32,
    /// Replace the generated tooltip with a fixed tree.
    #[serde(default)]
    pub tooltip: Option<TooltipNode>,
    /// Clicking the slot never opens the negotiation surface.
    #[serde(default)]
    pub never_opens: bool,
}

#[derive(Debug)]
struct Negotiation {
    slot: usize,
    window: OfferWindow,
    accept_at: u32,
    kind: ArtifactKind,
}

#[derive(Debug)]
struct ScriptState {
    stock: HaggleStock,
    batch_index: usize,
    items: Vec<ScriptedItem>,
    hovered: Option<usize>,
    misses: HashMap<usize, u32>,
    negotiation: Option<Negotiation>,
    purchases: Vec<(String, ArtifactCost)>,
}

/// Replays a [`Scenario`] behind the [`HaggleSurface`] trait.
pub struct ScriptedSurface {
    batches: Vec<ScriptedBatch>,
    state: Mutex<ScriptState>,
}

impl ScriptedSurface {
    pub fn new(scenario: Scenario) -> Self {
        let items = scenario
            .batches
            .first()
            .map(|b| b.items.clone())
            .unwrap_or_default();
        let misses = Self::misses_for(&items);
        Self {
            state: Mutex::new(ScriptState {
                stock: scenario.stock,
                batch_index: 0,
                items,
                hovered: None,
                misses,
                negotiation: None,
                purchases: Vec::new(),
            }),
            batches: scenario.batches,
        }
    }

    /// Load a scenario from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario {}", path.display()))?;
        let scenario: Scenario = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse scenario {}", path.display()))?;
        Ok(Self::new(scenario))
    }

    /// Items bought so far with the offer that was accepted.
    pub fn purchases(&self) -> Vec<(String, ArtifactCost)> {
        self.lock().purchases.clone()
    }

    pub fn batch_index(&self) -> usize {
        self.lock().batch_index
    }

    fn misses_for(items: &[ScriptedItem]) -> HashMap<usize, u32> {
        items
            .iter()
            .map(|i| (i.item.slot, i.tooltip_misses))
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn currency_text(kind: ArtifactKind) -> &'static str {
    match kind {
        ArtifactKind::Lesser => "Lesser Broken Circle Artifact",
        ArtifactKind::Greater => "Greater Broken Circle Artifact",
        ArtifactKind::Grand => "Grand Broken Circle Artifact",
        ArtifactKind::Exceptional => "Exceptional Broken Circle Artifact",
        ArtifactKind::Coin => "Exotic Coinage",
    }
}

#[async_trait]
impl HaggleSurface for ScriptedSurface {
    async fn scan_items(&self) -> Result<Vec<ItemSnapshot>> {
        Ok(self.lock().items.iter().map(|i| i.item.clone()).collect())
    }

    async fn stock(&self) -> Result<HaggleStock> {
        Ok(self.lock().stock)
    }

    async fn hover_slot(&self, slot: usize) -> Result<()> {
        self.lock().hovered = Some(slot);
        Ok(())
    }

    async fn tooltip(&self, slot: usize) -> Result<Option<TooltipNode>> {
        let mut state = self.lock();
        if state.hovered != Some(slot) {
            return Ok(None);
        }
        if let Some(misses) = state.misses.get_mut(&slot) {
            if *misses > 0 {
                *misses -= 1;
                return Ok(None);
            }
        }
        let Some(scripted) = state.items.iter().find(|i| i.item.slot == slot) else {
            return Ok(None);
        };
        if let Some(fixed) = &scripted.tooltip {
            return Ok(Some(fixed.clone()));
        }
        Ok(Some(price_tooltip(
            &scripted.item.name,
            &format!("x{}", scripted.asking.amount),
            currency_text(scripted.asking.kind),
        )))
    }

    async fn click_slot(&self, slot: usize) -> Result<()> {
        let mut state = self.lock();
        let Some(scripted) = state.items.iter().find(|i| i.item.slot == slot) else {
            anyhow::bail!("No item in slot {slot}");
        };
        if scripted.never_opens {
            return Ok(());
        }
        let negotiation = Negotiation {
            slot,
            window: OfferWindow {
                min: scripted.offer_min,
                max: scripted.offer_max,
                current: scripted.offer_max,
            },
            accept_at: scripted.accept_at,
            kind: scripted.asking.kind,
        };
        state.negotiation = Some(negotiation);
        Ok(())
    }

    async fn is_negotiation_open(&self) -> Result<bool> {
        Ok(self.lock().negotiation.is_some())
    }

    async fn offer(&self) -> Result<Option<OfferWindow>> {
        Ok(self.lock().negotiation.as_ref().map(|n| n.window))
    }

    async fn scroll_down(&self, steps: u32) -> Result<()> {
        let mut state = self.lock();
        if let Some(n) = state.negotiation.as_mut() {
            n.window.current = n.window.current.saturating_sub(steps).max(n.window.min);
        }
        Ok(())
    }

    async fn confirm(&self) -> Result<()> {
        let mut state = self.lock();
        let Some(n) = state.negotiation.take() else {
            anyhow::bail!("Confirm without an open negotiation");
        };
        if n.window.current < n.accept_at {
            debug!(slot = n.slot, offer = n.window.current, "Offer refused");
            let window = OfferWindow {
                current: n.window.max,
                ..n.window
            };
            state.negotiation = Some(Negotiation { window, ..n });
            return Ok(());
        }

        let paid = ArtifactCost::new(n.kind, n.window.current);
        let stock = state.stock.get_mut(n.kind);
        *stock = stock.saturating_sub(paid.amount);
        if let Some(pos) = state.items.iter().position(|i| i.item.slot == n.slot) {
            let bought = state.items.remove(pos);
            state.purchases.push((bought.item.name, paid));
        }
        debug!(slot = n.slot, paid = %paid, "Offer accepted");
        Ok(())
    }

    async fn reroll(&self) -> Result<()> {
        let mut state = self.lock();
        if state.stock.coins == 0 {
            anyhow::bail!("No coins left to reroll");
        }
        state.stock.coins -= 1;
        state.batch_index += 1;
        let items = self
            .batches
            .get(state.batch_index)
            .map(|b| b.items.clone())
            .unwrap_or_default();
        state.misses = Self::misses_for(&items);
        state.items = items;
        state.hovered = None;
        state.negotiation = None;
        Ok(())
    }
}
