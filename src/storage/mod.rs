//! Persistence layer.
//!
//! Finished sessions are appended to two semicolon-delimited tables under the
//! history directory: one row per session in `Sessions.csv` and one row per
//! recorded item in `Items.csv`, joined by session id. Numbers are written
//! with Rust's locale-independent float formatting. Loading tolerates rows
//! written by older layouts with fewer columns.

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::engine::ledger::{SessionItemRecord, SessionRecord};
use crate::types::ValuationState;

pub const SESSIONS_FILE: &str = "Sessions.csv";
pub const ITEMS_FILE: &str = "Items.csv";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const SESSIONS_HEADER: &str = "SessionId;StartTime;EndTime;TotalRolls;CoinsSpent;CoinageValue;\
RerollCost;LesserUsed;GreaterUsed;GrandUsed;ExceptionalUsed;ItemsBought;ItemsRejected;\
ItemsTooExpensive;TotalChaosValue;TotalCostInChaos;TotalCostWithRerolls;ProfitInChaos;ProfitPercent";

const ITEMS_HEADER: &str =
    "SessionId;ItemName;ItemType;Details;ChaosValue;ArtifactCost;ArtifactType;ArtifactAmount;Amount;State;RejectReason";

const SESSION_COLUMNS: usize = 19;
/// Oldest session layout: no coinage value or reroll cost columns.
const LEGACY_SESSION_COLUMNS: usize = 16;
const ITEM_COLUMNS: usize = 11;
/// Oldest item layout: no artifact amount column.
const LEGACY_ITEM_COLUMNS: usize = 10;

const LEGACY_COINAGE_VALUE: f64 = 0.5;

// ---------------------------------------------------------------------------
// History store
// ---------------------------------------------------------------------------

/// Append-only session history on disk.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    dir: PathBuf,
}

impl HistoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn sessions_path(&self) -> PathBuf {
        self.dir.join(SESSIONS_FILE)
    }

    pub fn items_path(&self) -> PathBuf {
        self.dir.join(ITEMS_FILE)
    }

    /// Append one session and its items, writing headers to new files.
    pub fn append_session(&self, session: &SessionRecord) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create history dir {}", self.dir.display()))?;

        let id = session.id();
        let items: Vec<String> = session.items.iter().map(|i| item_row(&id, i)).collect();
        let row = session_row(&id, session);

        // Items first: a session row only ever lands after its items, and a
        // failed session write takes the items back out.
        let items_path = self.items_path();
        let items_len = std::fs::metadata(&items_path).map(|m| m.len()).ok();
        append_rows(&items_path, ITEMS_HEADER, &items)?;
        if let Err(e) = append_rows(&self.sessions_path(), SESSIONS_HEADER, &[row]) {
            if let Err(undo) = truncate_to(&items_path, items_len) {
                warn!(session = %id, error = %undo, "Could not roll back item rows");
            }
            return Err(e);
        }

        debug!(session = %id, items = items.len(), "Session appended to history");
        Ok(())
    }

    /// Every session id already on disk.
    pub fn session_ids(&self) -> Result<Vec<String>> {
        let path = self.sessions_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(text
            .lines()
            .skip(1)
            .filter_map(|line| line.split(';').next())
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Every stored session, newest first. Missing files mean no history.
    pub fn load_sessions(&self) -> Result<Vec<SessionRecord>> {
        let path = self.sessions_path();
        if !path.exists() {
            return Ok(Vec::new());
        }

        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        let mut sessions: HashMap<String, SessionRecord> = HashMap::new();
        for (n, line) in text.lines().enumerate().skip(1) {
            if line.trim().is_empty() {
                continue;
            }
            match parse_session_row(line) {
                Ok(Some((id, session))) => {
                    sessions.insert(id, session);
                }
                Ok(None) => debug!(line = n + 1, "Skipping short session row"),
                Err(e) => warn!(line = n + 1, error = %e, "Skipping unreadable session row"),
            }
        }

        let items_path = self.items_path();
        if items_path.exists() {
            let text = std::fs::read_to_string(&items_path)
                .with_context(|| format!("Failed to read {}", items_path.display()))?;
            for (n, line) in text.lines().enumerate().skip(1) {
                if line.trim().is_empty() {
                    continue;
                }
                match parse_item_row(line) {
                    Ok(Some((id, item))) => {
                        if let Some(session) = sessions.get_mut(&id) {
                            session.items.push(item);
                        }
                    }
                    Ok(None) => debug!(line = n + 1, "Skipping short item row"),
                    Err(e) => warn!(line = n + 1, error = %e, "Skipping unreadable item row"),
                }
            }
        }

        let mut sessions: Vec<SessionRecord> = sessions.into_values().collect();
        sessions.sort_by(|a, b| b.start.cmp(&a.start));
        info!(count = sessions.len(), "Session history loaded");
        Ok(sessions)
    }

    /// Delete both tables.
    pub fn clear_history(&self) -> Result<()> {
        for path in [self.sessions_path(), self.items_path()] {
            if path.exists() {
                std::fs::remove_file(&path)
                    .with_context(|| format!("Failed to delete {}", path.display()))?;
            }
        }
        info!(dir = %self.dir.display(), "Session history cleared");
        Ok(())
    }

    pub fn summary(&self) -> Result<HistorySummary> {
        Ok(HistorySummary::from_sessions(&self.load_sessions()?))
    }
}

fn append_rows(path: &Path, header: &str, rows: &[String]) -> Result<()> {
    let is_new = std::fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let mut out = String::new();
    if is_new {
        out.push_str(header);
        out.push('\n');
    }
    for row in rows {
        out.push_str(row);
        out.push('\n');
    }
    file.write_all(out.as_bytes())
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Cut `path` back to `len` bytes, or remove it if it did not exist before.
fn truncate_to(path: &Path, len: Option<u64>) -> Result<()> {
    match len {
        Some(len) => OpenOptions::new()
            .write(true)
            .open(path)
            .and_then(|f| f.set_len(len))
            .with_context(|| format!("Failed to truncate {}", path.display())),
        None => std::fs::remove_file(path)
            .with_context(|| format!("Failed to delete {}", path.display())),
    }
}

// ---------------------------------------------------------------------------
// Row encoding
// ---------------------------------------------------------------------------

/// Keep free text from breaking the row layout.
fn clean(text: &str) -> String {
    text.replace(';', ",").replace(['\r', '\n'], " ")
}

fn session_row(id: &str, s: &SessionRecord) -> String {
    let end = s.end.unwrap_or(s.start);
    [
        id.to_string(),
        s.start.format(TIMESTAMP_FORMAT).to_string(),
        end.format(TIMESTAMP_FORMAT).to_string(),
        s.rolls.to_string(),
        s.coins_spent.to_string(),
        s.coinage_value.to_string(),
        s.reroll_cost().to_string(),
        s.lesser_used.to_string(),
        s.greater_used.to_string(),
        s.grand_used.to_string(),
        s.exceptional_used.to_string(),
        s.items_bought().to_string(),
        s.items_rejected().to_string(),
        s.items_too_expensive().to_string(),
        s.total_chaos_value().to_string(),
        s.total_artifact_cost().to_string(),
        s.total_cost().to_string(),
        s.profit().to_string(),
        s.profit_percent().to_string(),
    ]
    .join(";")
}

fn item_row(id: &str, i: &SessionItemRecord) -> String {
    [
        id.to_string(),
        clean(&i.name),
        clean(&i.item_type),
        clean(&i.details),
        i.chaos_value.to_string(),
        i.artifact_cost.to_string(),
        i.artifact_type.map(|k| k.to_string()).unwrap_or_default(),
        i.artifact_amount.to_string(),
        i.amount.to_string(),
        i.state.to_string(),
        clean(&i.reject_reason),
    ]
    .join(";")
}

fn parse_time(text: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text.trim(), TIMESTAMP_FORMAT)
        .with_context(|| format!("Bad timestamp '{text}'"))
}

fn num<T: std::str::FromStr>(text: &str, column: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    text.trim()
        .parse()
        .with_context(|| format!("Bad {column} '{text}'"))
}

/// `Ok(None)` for rows too short for any known layout.
fn parse_session_row(line: &str) -> Result<Option<(String, SessionRecord)>> {
    let p: Vec<&str> = line.split(';').collect();
    if p.len() < LEGACY_SESSION_COLUMNS {
        return Ok(None);
    }

    let (coinage_value, usage) = if p.len() >= SESSION_COLUMNS {
        (num(p[5], "CoinageValue")?, 7)
    } else {
        (LEGACY_COINAGE_VALUE, 5)
    };

    let coins_spent = num(p[4], "CoinsSpent")?;
    let mut session = SessionRecord::new(parse_time(p[1])?, coins_spent, coinage_value);
    session.end = Some(parse_time(p[2])?);
    session.rolls = num(p[3], "TotalRolls")?;
    session.coins_spent = coins_spent;
    session.lesser_used = num(p[usage], "LesserUsed")?;
    session.greater_used = num(p[usage + 1], "GreaterUsed")?;
    session.grand_used = num(p[usage + 2], "GrandUsed")?;
    session.exceptional_used = num(p[usage + 3], "ExceptionalUsed")?;

    Ok(Some((p[0].to_string(), session)))
}

fn parse_item_row(line: &str) -> Result<Option<(String, SessionItemRecord)>> {
    let p: Vec<&str> = line.split(';').collect();
    if p.len() < LEGACY_ITEM_COLUMNS {
        return Ok(None);
    }

    // Current layout inserts ArtifactAmount at 7.
    let (artifact_amount, rest) = if p.len() >= ITEM_COLUMNS {
        (num(p[7], "ArtifactAmount")?, 8)
    } else {
        (0, 7)
    };

    let artifact_type = match p[6].trim() {
        "" => None,
        text => text.parse().ok(),
    };

    let item = SessionItemRecord {
        address: 0,
        name: p[1].to_string(),
        item_type: p[2].to_string(),
        details: p[3].to_string(),
        chaos_value: num(p[4], "ChaosValue")?,
        artifact_cost: num(p[5], "ArtifactCost")?,
        artifact_type,
        artifact_amount,
        amount: num(p[rest], "Amount")?,
        state: p[rest + 1].parse::<ValuationState>()?,
        reject_reason: p.get(rest + 2).map(|s| s.to_string()).unwrap_or_default(),
    };
    Ok(Some((p[0].to_string(), item)))
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

/// Aggregate statistics over the whole history.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistorySummary {
    pub sessions: usize,
    pub rolls: u64,
    pub bought: usize,
    pub value: f64,
    /// Artifact cost of bought items.
    pub cost: f64,
    pub profit: f64,
    pub profit_percent: f64,
}

impl HistorySummary {
    pub fn from_sessions(sessions: &[SessionRecord]) -> Self {
        let value: f64 = sessions.iter().map(SessionRecord::total_chaos_value).sum();
        let cost: f64 = sessions.iter().map(SessionRecord::total_artifact_cost).sum();
        let profit = value - cost;
        Self {
            sessions: sessions.len(),
            rolls: sessions.iter().map(|s| s.rolls as u64).sum(),
            bought: sessions.iter().map(SessionRecord::items_bought).sum(),
            value,
            cost,
            profit,
            profit_percent: if cost > 0.0 { profit / cost * 100.0 } else { 0.0 },
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ArtifactKind;
    use chrono::NaiveDate;

    fn temp_store() -> HistoryStore {
        let mut p = std::env::temp_dir();
        p.push(format!("haggler_history_{}", uuid::Uuid::new_v4()));
        HistoryStore::new(p)
    }

    fn at(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 5, day)
            .and_then(|d| d.and_hms_opt(hour, 30, 15))
            .unwrap()
    }

    fn record(name: &str, state: ValuationState, chaos: f64, cost: f64) -> SessionItemRecord {
        SessionItemRecord {
            address: 0,
            name: name.into(),
            item_type: "Stackable Currency".into(),
            details: String::new(),
            chaos_value: chaos,
            artifact_cost: cost,
            artifact_type: Some(ArtifactKind::Greater),
            artifact_amount: 12,
            amount: 3,
            state,
            reject_reason: String::new(),
        }
    }

    fn session(day: u32) -> SessionRecord {
        let mut s = SessionRecord::new(at(day, 9), 10, 0.7);
        s.end = Some(at(day, 10));
        s.rolls = 4;
        s.coins_spent = 4;
        s.greater_used = 12;
        s.items.push(record("Divine Orb", ValuationState::Bought, 120.25, 6.5));
        s.items.push(record("Chaos Orb", ValuationState::TooExpensive, 1.0, 0.0));
        s
    }

    #[test]
    fn test_round_trip_preserves_metrics() {
        let store = temp_store();
        let original = session(1);
        store.append_session(&original).unwrap();

        let loaded = store.load_sessions().unwrap();
        assert_eq!(loaded.len(), 1);
        let s = &loaded[0];
        assert_eq!(s.id(), original.id());
        assert_eq!(s.items.len(), 2);
        assert!((s.total_chaos_value() - original.total_chaos_value()).abs() < 1e-9);
        assert!((s.total_cost() - original.total_cost()).abs() < 1e-9);
        assert!((s.profit_percent() - original.profit_percent()).abs() < 1e-9);
        assert_eq!(s.greater_used, 12);
        assert_eq!(s.items[0].artifact_type, Some(ArtifactKind::Greater));

        store.clear_history().unwrap();
    }

    #[test]
    fn test_newest_first_and_single_header() {
        let store = temp_store();
        store.append_session(&session(1)).unwrap();
        store.append_session(&session(3)).unwrap();
        store.append_session(&session(2)).unwrap();

        let ids: Vec<String> = store.load_sessions().unwrap().iter().map(|s| s.id()).collect();
        assert_eq!(ids, vec!["20260503_093015", "20260502_093015", "20260501_093015"]);

        let text = std::fs::read_to_string(store.sessions_path()).unwrap();
        assert_eq!(text.matches("SessionId;").count(), 1);

        store.clear_history().unwrap();
    }

    #[test]
    fn test_free_text_is_sanitised() {
        let store = temp_store();
        let mut s = session(4);
        s.items[1].reject_reason = "Blacklisted: a;b\nc".into();
        store.append_session(&s).unwrap();

        let loaded = store.load_sessions().unwrap();
        assert_eq!(loaded[0].items[1].reject_reason, "Blacklisted: a,b c");
        store.clear_history().unwrap();
    }

    #[test]
    fn test_legacy_rows() {
        let store = temp_store();
        std::fs::create_dir_all(store.dir()).unwrap();
        std::fs::write(
            store.sessions_path(),
            "header\n\
             20260101_080000;2026-01-01 08:00:00;2026-01-01 08:30:00;5;5;1;2;3;4;0;0;0;0;0;0;0\n\
             short;row\n",
        )
        .unwrap();
        std::fs::write(
            store.items_path(),
            "header\n\
             20260101_080000;Exalted Orb;Currency;;15;2.5;Grand;2;Bought;\n\
             20260101_080000;Too;Short\n",
        )
        .unwrap();

        let loaded = store.load_sessions().unwrap();
        assert_eq!(loaded.len(), 1);
        let s = &loaded[0];
        assert_eq!(s.coinage_value, LEGACY_COINAGE_VALUE);
        assert_eq!((s.lesser_used, s.greater_used, s.grand_used, s.exceptional_used), (1, 2, 3, 4));
        assert_eq!(s.items.len(), 1);
        assert_eq!(s.items[0].amount, 2);
        assert_eq!(s.items[0].artifact_amount, 0);
        assert_eq!(s.items[0].state, ValuationState::Bought);
        assert_eq!(s.total_chaos_value(), 30.0);

        store.clear_history().unwrap();
    }

    #[test]
    fn test_orphan_items_ignored() {
        let store = temp_store();
        store.append_session(&session(5)).unwrap();
        let mut f = OpenOptions::new().append(true).open(store.items_path()).unwrap();
        writeln!(f, "19990101_000000;Ghost;X;;1;0;;0;1;Bought;").unwrap();

        let loaded = store.load_sessions().unwrap();
        assert_eq!(loaded[0].items.len(), 2);
        store.clear_history().unwrap();
    }

    #[test]
    fn test_missing_history_is_empty() {
        let store = temp_store();
        assert!(store.load_sessions().unwrap().is_empty());
        assert_eq!(store.summary().unwrap(), HistorySummary::default());
        store.clear_history().unwrap();
    }

    #[test]
    fn test_summary() {
        let sessions = vec![session(1), session(2)];
        let summary = HistorySummary::from_sessions(&sessions);
        assert_eq!(summary.sessions, 2);
        assert_eq!(summary.rolls, 8);
        assert_eq!(summary.bought, 2);
        assert!((summary.value - 721.5).abs() < 1e-9);
        assert!((summary.cost - 13.0).abs() < 1e-9);
        assert!((summary.profit - 708.5).abs() < 1e-9);
    }

    #[test]
    fn test_failed_item_write_leaves_no_session_row() {
        let store = temp_store();
        // A directory in place of the items table makes that write fail.
        std::fs::create_dir_all(store.items_path()).unwrap();
        assert!(store.append_session(&session(2)).is_err());
        assert!(!store.sessions_path().exists());

        std::fs::remove_dir(store.items_path()).unwrap();
        store.append_session(&session(2)).unwrap();
        let loaded = store.load_sessions().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].items.len(), 2);
        assert_eq!(store.session_ids().unwrap().len(), 1);
    }

    #[test]
    fn test_failed_session_write_rolls_back_items() {
        let store = temp_store();
        store.append_session(&session(1)).unwrap();
        let items_before = std::fs::read_to_string(store.items_path()).unwrap();

        // Swap the sessions table for a directory so only that write fails.
        let sessions = std::fs::read_to_string(store.sessions_path()).unwrap();
        std::fs::remove_file(store.sessions_path()).unwrap();
        std::fs::create_dir_all(store.sessions_path()).unwrap();
        assert!(store.append_session(&session(2)).is_err());
        assert_eq!(std::fs::read_to_string(store.items_path()).unwrap(), items_before);

        std::fs::remove_dir(store.sessions_path()).unwrap();
        std::fs::write(store.sessions_path(), sessions).unwrap();
        store.append_session(&session(2)).unwrap();

        let loaded = store.load_sessions().unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(loaded.iter().all(|s| s.items.len() == 2));
        let _ = store.clear_history();
    }
}
