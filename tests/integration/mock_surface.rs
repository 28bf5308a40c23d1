//! Mock merchant for integration testing.
//!
//! Provides a deterministic `HaggleSurface` that offers fixed batches,
//! renders price tooltips, haggles against a per-item acceptance floor and
//! tracks stock and receipts in memory.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use haggler::surface::tooltip::{price_tooltip, TooltipNode};
use haggler::surface::{HaggleSurface, OfferWindow};
use haggler::types::{ArtifactCost, ArtifactKind, HaggleStock, ItemKind, ItemSnapshot};

/// One item on the merchant's table.
#[derive(Debug, Clone)]
pub struct MockOffer {
    pub name: String,
    pub item_type: String,
    pub amount: u32,
    pub kind: ItemKind,
    pub asking: ArtifactCost,
    /// Fraction of the asking amount the merchant settles for.
    pub floor_ratio: f64,
}

impl MockOffer {
    pub fn currency(name: &str, asking: ArtifactCost, floor_ratio: f64) -> Self {
        Self {
            name: name.to_string(),
            item_type: "Stackable Currency".to_string(),
            amount: 1,
            kind: ItemKind::Generic,
            asking,
            floor_ratio,
        }
    }

    pub fn map(name: &str, tier: u32, asking: ArtifactCost, floor_ratio: f64) -> Self {
        Self {
            name: name.to_string(),
            item_type: "Map".to_string(),
            amount: 1,
            kind: ItemKind::Map { tier, is_unique: false, is_influenced: false },
            asking,
            floor_ratio,
        }
    }

    fn floor(&self) -> u32 {
        (self.asking.amount as f64 * self.floor_ratio).ceil() as u32
    }

    fn window(&self) -> OfferWindow {
        OfferWindow {
            min: self.asking.amount / 2,
            max: self.asking.amount,
            current: self.asking.amount,
        }
    }
}

/// A purchase the merchant accepted.
#[derive(Debug, Clone, PartialEq)]
pub struct Receipt {
    pub name: String,
    pub address: u64,
    pub paid: ArtifactCost,
}

#[derive(Debug)]
struct OpenTrade {
    slot: usize,
    window: OfferWindow,
}

/// A merchant with fully scripted batches.
///
/// Addresses are `batch * 100 + slot`, so items never collide across rerolls.
pub struct MockMerchant {
    batches: Vec<Vec<MockOffer>>,
    batch: Arc<Mutex<usize>>,
    /// Slots still on the table for the current batch.
    remaining: Arc<Mutex<Vec<usize>>>,
    stock: Arc<Mutex<HaggleStock>>,
    trade: Arc<Mutex<Option<OpenTrade>>>,
    hovered: Arc<Mutex<Option<usize>>>,
    receipts: Arc<Mutex<Vec<Receipt>>>,
    refusals: Arc<Mutex<u32>>,
    /// If set, all operations will return this error.
    force_error: Arc<Mutex<Option<String>>>,
}

impl MockMerchant {
    pub fn new(stock: HaggleStock, batches: Vec<Vec<MockOffer>>) -> Self {
        let first = batches.first().map(|b| (0..b.len()).collect()).unwrap_or_default();
        Self {
            batches,
            batch: Arc::new(Mutex::new(0)),
            remaining: Arc::new(Mutex::new(first)),
            stock: Arc::new(Mutex::new(stock)),
            trade: Arc::new(Mutex::new(None)),
            hovered: Arc::new(Mutex::new(None)),
            receipts: Arc::new(Mutex::new(Vec::new())),
            refusals: Arc::new(Mutex::new(0)),
            force_error: Arc::new(Mutex::new(None)),
        }
    }

    /// Plenty of every tier and `coins` rerolls.
    pub fn well_stocked(coins: u32, batches: Vec<Vec<MockOffer>>) -> Self {
        Self::new(
            HaggleStock { coins, lesser: 5000, greater: 5000, grand: 5000, exceptional: 5000 },
            batches,
        )
    }

    /// Force all subsequent operations to return an error.
    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    /// Clear any forced error.
    pub fn clear_error(&self) {
        *self.force_error.lock().unwrap() = None;
    }

    pub fn receipts(&self) -> Vec<Receipt> {
        self.receipts.lock().unwrap().clone()
    }

    /// Confirmed offers the merchant turned down.
    pub fn refusals(&self) -> u32 {
        *self.refusals.lock().unwrap()
    }

    pub fn current_stock(&self) -> HaggleStock {
        *self.stock.lock().unwrap()
    }

    fn check_error(&self) -> Result<()> {
        if let Some(err) = self.force_error.lock().unwrap().as_ref() {
            return Err(anyhow!("{}", err));
        }
        Ok(())
    }

    fn offer_at(&self, slot: usize) -> Option<MockOffer> {
        let batch = *self.batch.lock().unwrap();
        if !self.remaining.lock().unwrap().contains(&slot) {
            return None;
        }
        self.batches.get(batch).and_then(|b| b.get(slot)).cloned()
    }

    fn address(&self, slot: usize) -> u64 {
        (*self.batch.lock().unwrap() * 100 + slot) as u64
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
impl HaggleSurface for MockMerchant {
    async fn scan_items(&self) -> Result<Vec<ItemSnapshot>> {
        self.check_error()?;
        let batch = *self.batch.lock().unwrap();
        let remaining = self.remaining.lock().unwrap().clone();
        let offers = self.batches.get(batch).cloned().unwrap_or_default();
        Ok(remaining
            .into_iter()
            .filter_map(|slot| {
                offers.get(slot).map(|o| ItemSnapshot {
                    address: (batch * 100 + slot) as u64,
                    name: o.name.clone(),
                    item_type: o.item_type.clone(),
                    amount: o.amount,
                    slot,
                    kind: o.kind.clone(),
                })
            })
            .collect())
    }

    async fn stock(&self) -> Result<HaggleStock> {
        self.check_error()?;
        Ok(*self.stock.lock().unwrap())
    }

    async fn hover_slot(&self, slot: usize) -> Result<()> {
        self.check_error()?;
        *self.hovered.lock().unwrap() = Some(slot);
        Ok(())
    }

    async fn tooltip(&self, slot: usize) -> Result<Option<TooltipNode>> {
        self.check_error()?;
        if *self.hovered.lock().unwrap() != Some(slot) {
            return Ok(None);
        }
        Ok(self.offer_at(slot).map(|o| {
            price_tooltip(&o.name, &format!("x{}", o.asking.amount), currency_text(o.asking.kind))
        }))
    }

    async fn click_slot(&self, slot: usize) -> Result<()> {
        self.check_error()?;
        let offer = self
            .offer_at(slot)
            .ok_or_else(|| anyhow!("Nothing on offer in slot {slot}"))?;
        *self.trade.lock().unwrap() = Some(OpenTrade { slot, window: offer.window() });
        Ok(())
    }

    async fn is_negotiation_open(&self) -> Result<bool> {
        self.check_error()?;
        Ok(self.trade.lock().unwrap().is_some())
    }

    async fn offer(&self) -> Result<Option<OfferWindow>> {
        self.check_error()?;
        Ok(self.trade.lock().unwrap().as_ref().map(|t| t.window))
    }

    async fn scroll_down(&self, steps: u32) -> Result<()> {
        self.check_error()?;
        if let Some(trade) = self.trade.lock().unwrap().as_mut() {
            let w = &mut trade.window;
            w.current = w.current.saturating_sub(steps).max(w.min);
        }
        Ok(())
    }

    async fn confirm(&self) -> Result<()> {
        self.check_error()?;
        let mut trade = self.trade.lock().unwrap();
        let Some(open) = trade.as_mut() else {
            bail!("Confirm without an open trade");
        };
        let offer = self
            .offer_at(open.slot)
            .ok_or_else(|| anyhow!("Trade slot {} is empty", open.slot))?;

        if open.window.current < offer.floor() {
            *self.refusals.lock().unwrap() += 1;
            open.window.current = open.window.max;
            return Ok(());
        }

        let paid = ArtifactCost::new(offer.asking.kind, open.window.current);
        let mut stock = self.stock.lock().unwrap();
        let held = stock.get_mut(paid.kind);
        if *held < paid.amount {
            bail!("Insufficient {}: need {}, have {}", paid.kind, paid.amount, *held);
        }
        *held -= paid.amount;

        let slot = open.slot;
        *trade = None;
        self.remaining.lock().unwrap().retain(|s| *s != slot);
        self.receipts.lock().unwrap().push(Receipt {
            name: offer.name,
            address: self.address(slot),
            paid,
        });
        Ok(())
    }

    async fn reroll(&self) -> Result<()> {
        self.check_error()?;
        let mut stock = self.stock.lock().unwrap();
        if stock.coins == 0 {
            bail!("No coins left");
        }
        stock.coins -= 1;
        let mut batch = self.batch.lock().unwrap();
        *batch += 1;
        let slots = self.batches.get(*batch).map(|b| b.len()).unwrap_or(0);
        *self.remaining.lock().unwrap() = (0..slots).collect();
        *self.trade.lock().unwrap() = None;
        *self.hovered.lock().unwrap() = None;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use haggler::surface::tooltip::{parse_price, ParseResult};

    fn merchant() -> MockMerchant {
        MockMerchant::well_stocked(
            2,
            vec![
                vec![
                    MockOffer::currency("Divine Orb", ArtifactCost::new(ArtifactKind::Greater, 40), 0.75),
                    MockOffer::map("Strand Map", 16, ArtifactCost::new(ArtifactKind::Lesser, 90), 0.5),
                ],
                vec![MockOffer::currency("Chaos Orb", ArtifactCost::new(ArtifactKind::Lesser, 10), 1.0)],
            ],
        )
    }

    #[tokio::test]
    async fn test_mock_scan_assigns_addresses() {
        let m = merchant();
        let items = m.scan_items().await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].address, 0);
        assert_eq!(items[1].address, 1);
        assert!(matches!(items[1].kind, ItemKind::Map { tier: 16, .. }));
    }

    #[tokio::test]
    async fn test_mock_tooltip_requires_hover() {
        let m = merchant();
        assert!(m.tooltip(0).await.unwrap().is_none());
        m.hover_slot(0).await.unwrap();
        let tooltip = m.tooltip(0).await.unwrap();
        assert_eq!(
            parse_price(tooltip.as_ref()),
            ParseResult::Ok(ArtifactCost::new(ArtifactKind::Greater, 40))
        );
    }

    #[tokio::test]
    async fn test_mock_refuses_below_floor() {
        let m = merchant();
        m.click_slot(0).await.unwrap();
        m.scroll_down(15).await.unwrap();
        m.confirm().await.unwrap();

        assert_eq!(m.refusals(), 1);
        assert!(m.is_negotiation_open().await.unwrap());
        assert_eq!(m.offer().await.unwrap().unwrap().current, 40);
        assert!(m.receipts().is_empty());
    }

    #[tokio::test]
    async fn test_mock_accepts_and_charges_stock() {
        let m = merchant();
        m.click_slot(0).await.unwrap();
        m.scroll_down(10).await.unwrap();
        m.confirm().await.unwrap();

        assert!(!m.is_negotiation_open().await.unwrap());
        let receipts = m.receipts();
        assert_eq!(receipts.len(), 1);
        assert_eq!(receipts[0].paid, ArtifactCost::new(ArtifactKind::Greater, 30));
        assert_eq!(m.current_stock().greater, 4970);
        assert_eq!(m.scan_items().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_mock_scroll_stops_at_min() {
        let m = merchant();
        m.click_slot(1).await.unwrap();
        m.scroll_down(500).await.unwrap();
        assert_eq!(m.offer().await.unwrap().unwrap().current, 45);
    }

    #[tokio::test]
    async fn test_mock_reroll_spends_coin() {
        let m = merchant();
        m.reroll().await.unwrap();
        assert_eq!(m.current_stock().coins, 1);
        let items = m.scan_items().await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "Chaos Orb");
        assert_eq!(items[0].address, 100);

        m.reroll().await.unwrap();
        assert!(m.scan_items().await.unwrap().is_empty());
        assert!(m.reroll().await.is_err());
    }

    #[tokio::test]
    async fn test_mock_forced_error() {
        let m = merchant();
        m.set_error("client window lost focus");

        assert!(m.scan_items().await.is_err());
        assert!(m.stock().await.is_err());
        assert!(m.click_slot(0).await.is_err());

        m.clear_error();
        assert!(m.scan_items().await.is_ok());
    }
}
