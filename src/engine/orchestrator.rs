//! Run orchestrator.
//!
//! Sequences each offered batch through the pipeline:
//!
//! 1. scan the window, apply name mappings and the eligibility filter
//! 2. for each surviving item: availability guard, asking-price read,
//!    market match, profitability decision, negotiation
//! 3. record every state the item reaches in the session ledger
//!
//! A session repeats batches, rerolling in between, until the guard fails,
//! a fatal interaction occurs, the batch limit is hit, or a stop is requested.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::filter::{EligibilityFilter, FilterVerdict};
use super::ledger::{SessionLedger, SessionRecord};
use super::matcher::{ItemMatcher, Pricer, PricingDecision};
use super::negotiator::{negotiate, Negotiation, NegotiationOutcome, NegotiationTiming};
use super::FatalFlag;
use crate::config::{AppConfig, ArtifactsConfig, HaggleConfig};
use crate::market::PriceStore;
use crate::surface::tooltip::{parse_price, ParseResult, TooltipNode};
use crate::surface::{poll_for, wait_until, HaggleSurface};
use crate::types::{ArtifactCost, ArtifactKind, HaggleError, HaggleItem, HaggleStock, ItemSnapshot, ValuationState};

/// Stock every enabled tier must keep above to start another item.
pub const STOCK_RESERVE: u32 = 300;
pub const PRICE_READ_ATTEMPTS: u32 = 3;
pub const REROLL_ATTEMPTS: u32 = 3;

// ---------------------------------------------------------------------------
// Guards
// ---------------------------------------------------------------------------

/// Availability guard: coins left and every enabled tier above the reserve.
pub fn can_run(stock: &HaggleStock, artifacts: &ArtifactsConfig) -> bool {
    stock.coins > 0
        && ArtifactKind::TIERS
            .iter()
            .filter(|k| artifacts.is_enabled(**k))
            .all(|k| stock.get(*k) > STOCK_RESERVE)
}

/// Reasons a session cannot start. Empty means ready.
pub fn startup_checks(store: &PriceStore, stock: &HaggleStock, artifacts: &ArtifactsConfig) -> Vec<String> {
    let mut problems = Vec::new();
    if !store.is_valid() {
        problems.push("market data files are missing or invalid".to_string());
    } else if store.is_empty() {
        problems.push("market price table is empty".to_string());
    }
    if stock.coins == 0 {
        problems.push("no coins to reroll with".to_string());
    }
    for kind in ArtifactKind::TIERS {
        if artifacts.is_enabled(*kind) && stock.get(*kind) == 0 {
            problems.push(format!("no {kind} artifacts"));
        }
    }
    problems
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum StopReason {
    /// Startup checks failed; nothing was run.
    NotReady(Vec<String>),
    GuardFailed,
    Fatal(String),
    Cancelled,
    DebugOnly,
    BatchLimit,
    RerollFailed,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub scanned: usize,
    pub rejected: usize,
    pub too_expensive: usize,
    pub priced: usize,
    pub bought: usize,
    /// Set when the batch ended before every item was processed.
    pub stop: Option<StopReason>,
}

#[derive(Debug, Clone)]
pub struct SessionReport {
    pub batches: u32,
    pub stop: StopReason,
    /// Closed session, if one was started.
    pub record: Option<SessionRecord>,
}

/// Requests a stop from outside a running session.
#[derive(Debug, Clone)]
pub struct StopHandle {
    fatal: FatalFlag,
    shutdown: FatalFlag,
}

impl StopHandle {
    pub fn stop(&self) {
        self.shutdown.raise();
        self.fatal.raise();
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    store: Arc<PriceStore>,
    filter: EligibilityFilter,
    matcher: ItemMatcher,
    pricer: Pricer,
    haggle: HaggleConfig,
    timing: NegotiationTiming,
    tooltip_timeout: Duration,
    reroll_timeout: Duration,
    hover_delay: Duration,
    debug_only: bool,
    max_batches: u32,
    ledger: SessionLedger,
    fatal: FatalFlag,
    shutdown: FatalFlag,
}

impl Orchestrator {
    pub fn new(config: &AppConfig, store: Arc<PriceStore>, ledger: SessionLedger) -> Self {
        let influenced = config.market.influenced_map_name().map(str::to_string);
        Self {
            store,
            filter: EligibilityFilter::new(config.filter.clone(), influenced.clone()),
            matcher: ItemMatcher::new(influenced),
            pricer: Pricer::new(config.artifacts.clone()),
            haggle: config.haggle.clone(),
            timing: NegotiationTiming::from_config(&config.timeouts, config.general.hover_delay_ms),
            tooltip_timeout: Duration::from_millis(config.timeouts.tooltip_ms),
            reroll_timeout: Duration::from_millis(config.timeouts.reroll_ms),
            hover_delay: Duration::from_millis(config.general.hover_delay_ms),
            debug_only: config.general.debug_only,
            max_batches: config.general.max_batches,
            ledger,
            fatal: FatalFlag::new(),
            shutdown: FatalFlag::new(),
        }
    }

    pub fn fatal(&self) -> &FatalFlag {
        &self.fatal
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            fatal: self.fatal.clone(),
            shutdown: self.shutdown.clone(),
        }
    }

    pub fn ledger(&self) -> &SessionLedger {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut SessionLedger {
        &mut self.ledger
    }

    fn poll_interval(&self) -> Duration {
        self.timing.poll_interval
    }

    // -- Price discovery -------------------------------------------------

    /// Hover the item and read its asking price from the tooltip.
    ///
    /// A tooltip that never shows the price structure is retried; running out
    /// of attempts, or a price section that cannot be read, is fatal.
    pub async fn read_asking_price(
        &self,
        surface: &dyn HaggleSurface,
        item: &ItemSnapshot,
    ) -> Result<ArtifactCost, HaggleError> {
        let mut last_seen: Option<TooltipNode> = None;
        for attempt in 1..=PRICE_READ_ATTEMPTS {
            if self.fatal.is_raised() {
                return Err(HaggleError::Cancelled);
            }
            match self.read_price_once(surface, item).await {
                Ok(cost) => return Ok(cost),
                Err((HaggleError::TransientRead(why), seen)) => {
                    debug!(item = %item.name, attempt, why = %why, "Price tooltip not ready");
                    last_seen = seen.or(last_seen);
                }
                Err((e, _)) => return Err(e),
            }
        }
        Err(HaggleError::FatalInteraction {
            item: item.name.clone(),
            message: format!(
                "price tooltip unreadable after {PRICE_READ_ATTEMPTS} attempts; hover delay may be too short"
            ),
            dump: last_seen
                .map(|t| t.visualize())
                .unwrap_or_else(|| "<no tooltip>".to_string()),
        })
    }

    async fn read_price_once(
        &self,
        surface: &dyn HaggleSurface,
        item: &ItemSnapshot,
    ) -> Result<ArtifactCost, (HaggleError, Option<TooltipNode>)> {
        let slot = item.slot;
        let interaction = |e: anyhow::Error| {
            (
                HaggleError::FatalInteraction {
                    item: item.name.clone(),
                    message: format!("{e:#}"),
                    dump: String::new(),
                },
                None,
            )
        };

        surface.hover_slot(slot).await.map_err(interaction)?;
        if !self.hover_delay.is_zero() {
            tokio::time::sleep(self.hover_delay).await;
        }
        let tooltip = poll_for(self.tooltip_timeout, self.poll_interval(), move || surface.tooltip(slot))
            .await
            .map_err(interaction)?;

        match parse_price(tooltip.as_ref()) {
            ParseResult::Ok(cost) => Ok(cost),
            ParseResult::NotReady => Err((
                HaggleError::TransientRead("price section missing".to_string()),
                tooltip,
            )),
            ParseResult::Malformed(detail) => {
                let dump = tooltip.as_ref().map(TooltipNode::visualize).unwrap_or_default();
                Err((
                    HaggleError::FatalInteraction {
                        item: item.name.clone(),
                        message: format!("malformed price tooltip: {detail}"),
                        dump,
                    },
                    None,
                ))
            }
        }
    }

    // -- Batch -----------------------------------------------------------

    /// Process the currently offered batch.
    pub async fn run_batch(&mut self, surface: &dyn HaggleSurface) -> BatchReport {
        let mut report = BatchReport::default();
        let table = self.store.snapshot();

        let snapshots = match surface.scan_items().await {
            Ok(items) => items,
            Err(e) => {
                self.fatal.raise();
                error!(error = %e, "Failed to scan offered items");
                report.stop = Some(StopReason::Fatal(format!("{e:#}")));
                return report;
            }
        };
        report.scanned = snapshots.len();

        // Filter the whole batch first; only survivors are priced.
        let mut candidates = Vec::new();
        for mut snapshot in snapshots {
            self.filter.apply_mappings(&mut snapshot);
            let mut item = HaggleItem::new(snapshot);
            let verdict = self.filter.verdict(&item.snapshot);
            if verdict == FilterVerdict::Accept {
                self.ledger.record_item(&item, None);
                candidates.push(item);
            } else {
                self.set_state(&mut item, ValuationState::Rejected);
                let reason = verdict.reason();
                debug!(item = %item.name(), reason = ?reason, "Item filtered");
                self.ledger.record_item(&item, reason.as_deref());
                report.rejected += 1;
            }
        }
        info!(scanned = report.scanned, candidates = candidates.len(), "Batch filtered");

        for mut item in candidates {
            if self.fatal.is_raised() {
                report.stop = Some(StopReason::Cancelled);
                break;
            }

            let stock = match surface.stock().await {
                Ok(stock) => stock,
                Err(e) => {
                    report.stop = Some(self.fail(&item, HaggleError::FatalInteraction {
                        item: item.name().to_string(),
                        message: format!("{e:#}"),
                        dump: String::new(),
                    }));
                    break;
                }
            };
            self.ledger.record_coin_stock(stock.coins);
            if !can_run(&stock, self.pricer.artifacts()) {
                warn!(stock = %stock, "Stock below reserve; stopping batch");
                report.stop = Some(StopReason::GuardFailed);
                break;
            }

            let asking = match self.read_asking_price(surface, &item.snapshot).await {
                Ok(asking) => asking,
                Err(e) => {
                    report.stop = Some(self.fail(&item, e));
                    break;
                }
            };
            item.asking = Some(asking);

            if let Err(reason) = self.price(&table, &mut item) {
                debug!(item = %item.name(), reason = %reason, "Item too expensive");
                self.set_state(&mut item, ValuationState::TooExpensive);
                self.ledger.record_item(&item, Some(&reason));
                report.too_expensive += 1;
                continue;
            }
            self.set_state(&mut item, ValuationState::Priced);
            self.ledger.record_item(&item, None);
            report.priced += 1;
            info!(item = %item, "Item priced");

            if self.debug_only {
                continue;
            }

            let mut negotiation = Negotiation::new(
                item.name(),
                item.snapshot.slot,
                asking.kind,
                self.haggle.clone(),
                self.timing,
            );
            match negotiate(&mut negotiation, surface, &self.fatal).await {
                Ok(NegotiationOutcome::Bought { paid, .. }) => {
                    item.paid = Some(paid);
                    self.set_state(&mut item, ValuationState::Bought);
                    self.ledger.record_purchase(&paid);
                    self.ledger.record_item(&item, None);
                    report.bought += 1;
                }
                Ok(NegotiationOutcome::Abandoned(reason)) => {
                    let e = HaggleError::FatalInteraction {
                        item: item.name().to_string(),
                        message: reason.to_string(),
                        dump: format!("{:?}", negotiation.phase()),
                    };
                    report.stop = Some(self.fail(&item, e));
                    break;
                }
                Err(e) => {
                    report.stop = Some(self.fail(&item, e));
                    break;
                }
            }
        }

        info!(
            rejected = report.rejected,
            too_expensive = report.too_expensive,
            priced = report.priced,
            bought = report.bought,
            stop = ?report.stop,
            "Batch finished"
        );
        report
    }

    /// Match and decide. `Err` carries the too-expensive reason.
    fn price(&self, table: &crate::market::PriceTable, item: &mut HaggleItem) -> Result<(), String> {
        if table.is_empty() {
            return Err("market data unavailable".to_string());
        }
        let outcome = self
            .matcher
            .match_item(table, &item.snapshot)
            .map_err(|e| e.to_string())?;
        item.value = outcome.value;

        let Some(asking) = item.asking else {
            return Err("no asking price".to_string());
        };
        match self.pricer.decide(&asking, item.value) {
            PricingDecision::Priced => Ok(()),
            PricingDecision::TooExpensive(reason) => Err(reason),
        }
    }

    fn set_state(&self, item: &mut HaggleItem, next: ValuationState) {
        if let Err(e) = item.transition(next) {
            error!(error = %e, "Valuation state not changed");
        }
    }

    /// Raise the fatal flag for a batch-ending error.
    fn fail(&self, item: &HaggleItem, e: HaggleError) -> StopReason {
        if matches!(e, HaggleError::Cancelled) {
            info!(item = %item.name(), "Stop requested");
            return StopReason::Cancelled;
        }
        self.fatal.raise();
        match &e {
            HaggleError::FatalInteraction { dump, .. } if !dump.is_empty() => {
                error!(error = %e, dump = %dump, "Fatal interaction; batch aborted");
            }
            _ => error!(error = %e, "Fatal interaction; batch aborted"),
        }
        StopReason::Fatal(e.to_string())
    }

    // -- Session ---------------------------------------------------------

    /// Spend a coin on a new batch. True once the coin count changes.
    pub async fn reroll(&mut self, surface: &dyn HaggleSurface) -> Result<bool, HaggleError> {
        let before = self.read_stock(surface).await?.coins;
        for attempt in 1..=REROLL_ATTEMPTS {
            if self.fatal.is_raised() {
                return Err(HaggleError::Cancelled);
            }
            if let Err(e) = surface.reroll().await {
                warn!(attempt, error = %e, "Reroll failed");
                continue;
            }
            let changed = wait_until(self.reroll_timeout, self.poll_interval(), move || async move {
                Ok::<_, anyhow::Error>(surface.stock().await?.coins != before)
            })
            .await
            .map_err(|e| HaggleError::TransientRead(format!("{e:#}")))?;
            if changed {
                let coins = self.read_stock(surface).await?.coins;
                self.ledger.record_roll();
                self.ledger.record_coin_stock(coins);
                info!(coins, "Rerolled");
                return Ok(true);
            }
            warn!(attempt, "Reroll not registered");
        }
        Ok(false)
    }

    async fn read_stock(&self, surface: &dyn HaggleSurface) -> Result<HaggleStock, HaggleError> {
        surface.stock().await.map_err(|e| HaggleError::FatalInteraction {
            item: "<stock>".to_string(),
            message: format!("{e:#}"),
            dump: String::new(),
        })
    }

    /// Run batches until a stop condition, recording everything in one session.
    pub async fn run_session(&mut self, surface: &dyn HaggleSurface) -> SessionReport {
        let stock = match self.read_stock(surface).await {
            Ok(stock) => stock,
            Err(e) => {
                return SessionReport {
                    batches: 0,
                    stop: StopReason::NotReady(vec![e.to_string()]),
                    record: None,
                }
            }
        };
        let problems = startup_checks(&self.store, &stock, self.pricer.artifacts());
        if !problems.is_empty() {
            for problem in &problems {
                warn!(problem = %problem, "Startup check failed");
            }
            return SessionReport {
                batches: 0,
                stop: StopReason::NotReady(problems),
                record: None,
            };
        }

        self.ledger.start_session(stock.coins, self.store.reference_reroll_price());

        let mut batches = 0;
        let stop = loop {
            if self.shutdown.is_raised() {
                break StopReason::Cancelled;
            }
            self.fatal.clear();

            let report = self.run_batch(surface).await;
            batches += 1;
            if let Some(stop) = report.stop {
                break stop;
            }
            if self.debug_only {
                break StopReason::DebugOnly;
            }
            if self.max_batches > 0 && batches >= self.max_batches {
                break StopReason::BatchLimit;
            }
            match self.read_stock(surface).await {
                Ok(stock) if can_run(&stock, self.pricer.artifacts()) => {}
                Ok(stock) => {
                    warn!(stock = %stock, "Stock below reserve; ending session");
                    break StopReason::GuardFailed;
                }
                Err(e) => break StopReason::Fatal(e.to_string()),
            }
            match self.reroll(surface).await {
                Ok(true) => {}
                Ok(false) => {
                    warn!("Reroll did not register; ending session");
                    break StopReason::RerollFailed;
                }
                Err(HaggleError::Cancelled) => break StopReason::Cancelled,
                Err(e) => break StopReason::Fatal(e.to_string()),
            }
        };

        let record = self.ledger.end_session();
        info!(batches, stop = ?stop, "Session finished");
        SessionReport { batches, stop, record }
    }
}
