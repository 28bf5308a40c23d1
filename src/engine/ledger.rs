//! Session ledger: per-item and per-session economic bookkeeping.
//!
//! The orchestrator owns one `SessionLedger` for the life of a run. Items are
//! upserted by address as they move through the pipeline; once an item is
//! recorded as `Rejected` it is frozen for the session. Profit metrics are
//! always derived from the item list, never stored.

use chrono::{Duration, Local, NaiveDateTime, Timelike};
use std::collections::HashSet;
use tracing::{error, info, warn};

use crate::config::ArtifactsConfig;
use crate::storage::HistoryStore;
use crate::types::{ArtifactCost, ArtifactKind, HaggleError, HaggleItem, ValuationState};

/// Format of the session identifier derived from the start time.
pub const SESSION_ID_FORMAT: &str = "%Y%m%d_%H%M%S";

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One offered item as seen during a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionItemRecord {
    /// Item identity within the session (not persisted).
    pub address: u64,
    pub name: String,
    pub item_type: String,
    pub details: String,
    /// Chaos value of a single unit of the stack.
    pub chaos_value: f64,
    /// Chaos-normalised artifact cost paid (0 unless bought).
    pub artifact_cost: f64,
    pub artifact_type: Option<ArtifactKind>,
    pub artifact_amount: u32,
    pub amount: u32,
    pub state: ValuationState,
    pub reject_reason: String,
}

impl SessionItemRecord {
    pub fn stack_value(&self) -> f64 {
        self.chaos_value * self.amount as f64
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub start: NaiveDateTime,
    pub end: Option<NaiveDateTime>,
    pub rolls: u32,
    pub coins_at_start: u32,
    pub coins_spent: u32,
    /// Reference reroll price at session start.
    pub coinage_value: f64,
    pub lesser_used: u32,
    pub greater_used: u32,
    pub grand_used: u32,
    pub exceptional_used: u32,
    pub items: Vec<SessionItemRecord>,
}

impl SessionRecord {
    pub fn new(start: NaiveDateTime, coins_at_start: u32, coinage_value: f64) -> Self {
        Self {
            start: start.with_nanosecond(0).unwrap_or(start),
            end: None,
            rolls: 0,
            coins_at_start,
            coins_spent: 0,
            coinage_value,
            lesser_used: 0,
            greater_used: 0,
            grand_used: 0,
            exceptional_used: 0,
            items: Vec::new(),
        }
    }

    pub fn id(&self) -> String {
        self.start.format(SESSION_ID_FORMAT).to_string()
    }

    fn bought(&self) -> impl Iterator<Item = &SessionItemRecord> {
        self.items.iter().filter(|i| i.state == ValuationState::Bought)
    }

    fn count(&self, state: ValuationState) -> usize {
        self.items.iter().filter(|i| i.state == state).count()
    }

    pub fn items_bought(&self) -> usize {
        self.count(ValuationState::Bought)
    }

    pub fn items_rejected(&self) -> usize {
        self.count(ValuationState::Rejected)
    }

    pub fn items_too_expensive(&self) -> usize {
        self.count(ValuationState::TooExpensive)
    }

    /// Σ chaos value × amount over bought items.
    pub fn total_chaos_value(&self) -> f64 {
        self.bought().map(SessionItemRecord::stack_value).sum()
    }

    /// Σ artifact cost over bought items.
    pub fn total_artifact_cost(&self) -> f64 {
        self.bought().map(|i| i.artifact_cost).sum()
    }

    pub fn reroll_cost(&self) -> f64 {
        self.rolls as f64 * self.coinage_value
    }

    pub fn total_cost(&self) -> f64 {
        self.total_artifact_cost() + self.reroll_cost()
    }

    pub fn profit(&self) -> f64 {
        self.total_chaos_value() - self.total_cost()
    }

    pub fn profit_percent(&self) -> f64 {
        let cost = self.total_cost();
        if cost > 0.0 {
            self.profit() / cost * 100.0
        } else {
            0.0
        }
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

pub struct SessionLedger {
    store: HistoryStore,
    artifacts: ArtifactsConfig,
    current: Option<SessionRecord>,
    /// Closed sessions whose save failed, kept for `save_pending`.
    unsaved: Vec<SessionRecord>,
    /// Ids already used on disk or in this process; loaded on first start.
    used_ids: Option<HashSet<String>>,
}

impl SessionLedger {
    pub fn new(store: HistoryStore, artifacts: ArtifactsConfig) -> Self {
        Self {
            store,
            artifacts,
            current: None,
            unsaved: Vec::new(),
            used_ids: None,
        }
    }

    pub fn store(&self) -> &HistoryStore {
        &self.store
    }

    pub fn current(&self) -> Option<&SessionRecord> {
        self.current.as_ref()
    }

    pub fn pending_saves(&self) -> usize {
        self.unsaved.len()
    }

    /// Open a new session. Replaces (and drops) any session left open.
    pub fn start_session(&mut self, coins: u32, coinage_value: f64) {
        self.start_session_at(Local::now().naive_local(), coins, coinage_value);
    }

    pub fn start_session_at(&mut self, start: NaiveDateTime, coins: u32, coinage_value: f64) {
        if let Some(open) = &self.current {
            warn!(session = %open.id(), "Discarding session that was never ended");
        }
        let mut record = SessionRecord::new(start, coins, coinage_value);

        let store = &self.store;
        let used = self.used_ids.get_or_insert_with(|| match store.session_ids() {
            Ok(ids) => ids.into_iter().collect(),
            Err(e) => {
                warn!(error = %e, "Could not read existing session ids");
                HashSet::new()
            }
        });
        // Ids have one-second resolution; a clash moves the start forward.
        while used.contains(&record.id()) {
            record.start += Duration::seconds(1);
        }
        used.insert(record.id());

        info!(session = %record.id(), coins, coinage_value, "Session started");
        self.current = Some(record);
    }

    pub fn record_roll(&mut self) {
        if let Some(s) = self.current.as_mut() {
            s.rolls += 1;
        }
    }

    pub fn record_artifact_usage(&mut self, lesser: u32, greater: u32, grand: u32, exceptional: u32) {
        if let Some(s) = self.current.as_mut() {
            s.lesser_used += lesser;
            s.greater_used += greater;
            s.grand_used += grand;
            s.exceptional_used += exceptional;
        }
    }

    /// Count a confirmed offer against its tier.
    pub fn record_purchase(&mut self, paid: &ArtifactCost) {
        let n = paid.amount;
        match paid.kind {
            ArtifactKind::Lesser => self.record_artifact_usage(n, 0, 0, 0),
            ArtifactKind::Greater => self.record_artifact_usage(0, n, 0, 0),
            ArtifactKind::Grand => self.record_artifact_usage(0, 0, n, 0),
            ArtifactKind::Exceptional => self.record_artifact_usage(0, 0, 0, n),
            ArtifactKind::Coin => {}
        }
    }

    /// Latest coin count seen in the window.
    pub fn record_coin_stock(&mut self, coins: u32) {
        if let Some(s) = self.current.as_mut() {
            s.coins_spent = s.coins_at_start.saturating_sub(coins);
        }
    }

    /// Upsert the record for `item`. Returns whether anything was written.
    ///
    /// A record already `Rejected` is never touched again, and writes that
    /// would move a record backwards along the valuation chain are dropped.
    pub fn record_item(&mut self, item: &HaggleItem, reason: Option<&str>) -> bool {
        let artifacts = &self.artifacts;
        let Some(session) = self.current.as_mut() else {
            return false;
        };

        let amount = item.snapshot.amount;
        let chaos_value = if amount > 0 { item.value / amount as f64 } else { item.value };
        let cost = item.paid.or(item.asking);
        let artifact_cost = match (item.state, cost) {
            (ValuationState::Bought, Some(c)) => c.total_value(artifacts),
            _ => 0.0,
        };

        if let Some(existing) = session
            .items
            .iter_mut()
            .find(|r| r.address == item.snapshot.address)
        {
            if existing.state == ValuationState::Rejected {
                return false;
            }
            if existing.state != item.state && !existing.state.can_reach(item.state) {
                warn!(
                    item = %item.name(),
                    from = %existing.state,
                    to = %item.state,
                    "Ignoring out-of-order ledger write"
                );
                return false;
            }
            existing.state = item.state;
            existing.chaos_value = chaos_value;
            existing.artifact_cost = artifact_cost;
            existing.artifact_type = cost.map(|c| c.kind);
            existing.artifact_amount = cost.map(|c| c.amount).unwrap_or(0);
            if let Some(reason) = reason.filter(|r| !r.is_empty()) {
                existing.reject_reason = reason.to_string();
            }
            return true;
        }

        session.items.push(SessionItemRecord {
            address: item.snapshot.address,
            name: item.snapshot.name.clone(),
            item_type: item.snapshot.item_type.clone(),
            details: item.snapshot.kind.details(),
            chaos_value,
            artifact_cost,
            artifact_type: cost.map(|c| c.kind),
            artifact_amount: cost.map(|c| c.amount).unwrap_or(0),
            amount,
            state: item.state,
            reject_reason: reason.unwrap_or_default().to_string(),
        });
        true
    }

    /// Close and persist the active session.
    ///
    /// A failed save is logged and the record kept for `save_pending`.
    pub fn end_session(&mut self) -> Option<SessionRecord> {
        let mut record = self.current.take()?;
        let now = Local::now().naive_local();
        record.end = Some(now.with_nanosecond(0).unwrap_or(now));

        info!(
            session = %record.id(),
            rolls = record.rolls,
            bought = record.items_bought(),
            value = record.total_chaos_value(),
            cost = record.total_cost(),
            profit_pct = record.profit_percent(),
            "Session ended"
        );

        if let Err(e) = self.store.append_session(&record) {
            error!(session = %record.id(), error = %e, "Failed to save session");
            self.unsaved.push(record.clone());
        }
        Some(record)
    }

    /// Retry saving sessions whose earlier save failed.
    pub fn save_pending(&mut self) -> Result<usize, HaggleError> {
        let mut saved = 0;
        while let Some(record) = self.unsaved.first() {
            self.store
                .append_session(record)
                .map_err(|e| HaggleError::Persistence(format!("{e:#}")))?;
            self.unsaved.remove(0);
            saved += 1;
        }
        Ok(saved)
    }
}
