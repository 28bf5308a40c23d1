//! End-to-end haggle sessions.
//!
//! Runs the full filter, price, negotiate and record pipeline against the
//! mock merchant with market documents written to a temp directory, then
//! reloads the persisted history and checks the derived metrics.

use std::path::PathBuf;
use std::sync::Arc;

use haggler::config::{AppConfig, HaggleConfig, MultiplierMode};
use haggler::engine::ledger::SessionLedger;
use haggler::engine::orchestrator::{Orchestrator, StopReason};
use haggler::market::ninja::CATEGORIES;
use haggler::market::PriceStore;
use haggler::storage::{HistoryStore, HistorySummary};
use haggler::types::{ArtifactCost, ArtifactKind, HaggleStock, ValuationState};

use crate::mock_surface::{MockMerchant, MockOffer};

fn temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("haggler_sim_{tag}_{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn market_dir() -> PathBuf {
    let dir = temp_dir("market");
    for category in CATEGORIES {
        let body = match category.name {
            "Currency" => r#"{"lines":[
                {"currencyTypeName":"Divine Orb","chaosEquivalent":200},
                {"currencyTypeName":"Chaos Orb","chaosEquivalent":1}]}"#,
            "Artifact" => r#"{"items":[{"id":"ex","name":"Exotic Coinage"}],
                "lines":[{"id":"ex","primaryValue":0.8}]}"#,
            "Map" => r#"{"lines":[
                {"name":"Strand Map","chaosValue":2,"mapTier":15},
                {"name":"Strand Map","chaosValue":5,"mapTier":16}]}"#,
            _ => r#"{"lines":[]}"#,
        };
        std::fs::write(dir.join(category.file_name()), body).unwrap();
    }
    dir
}

fn config(history_dir: PathBuf) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.general.history_dir = history_dir;
    cfg.general.hover_delay_ms = 0;
    cfg.general.max_batches = 3;
    cfg.timeouts.tooltip_ms = 20;
    cfg.timeouts.negotiation_open_ms = 20;
    cfg.timeouts.poll_interval_ms = 1;
    cfg.timeouts.reroll_ms = 20;
    cfg.filter.blacklist = vec!["Scarab".into()];
    cfg.haggle = HaggleConfig {
        multiplier_mode: MultiplierMode::MinToMax,
        try1: 0.5,
        try2: 0.75,
        try3: 0.875,
    };
    cfg
}

fn orchestrator(cfg: &AppConfig) -> Orchestrator {
    let store = PriceStore::new(market_dir(), Vec::new());
    store.refresh();
    let ledger = SessionLedger::new(HistoryStore::new(cfg.general.history_dir.clone()), cfg.artifacts.clone());
    Orchestrator::new(cfg, Arc::new(store), ledger)
}

fn greater(amount: u32) -> ArtifactCost {
    ArtifactCost::new(ArtifactKind::Greater, amount)
}

fn merchant() -> MockMerchant {
    MockMerchant::well_stocked(
        5,
        vec![
            vec![
                // Refused twice, accepted at 38 on the third round.
                MockOffer::currency("Divine Orb", greater(40), 0.9),
                // Accepted on the first round at 60.
                MockOffer::map("Strand Map", 16, ArtifactCost::new(ArtifactKind::Lesser, 90), 0.5),
                MockOffer::currency("Gilded Scarab", greater(4), 0.5),
                // 10 exceptional is worth more than one chaos.
                MockOffer::currency("Chaos Orb", ArtifactCost::new(ArtifactKind::Exceptional, 10), 0.5),
            ],
            vec![MockOffer::currency("Divine Orb", greater(20), 0.5)],
            vec![],
        ],
    )
}

#[tokio::test]
async fn test_full_session_records_and_persists() {
    let history_dir = temp_dir("history");
    let cfg = config(history_dir.clone());
    let mut orch = orchestrator(&cfg);
    let m = merchant();

    let report = orch.run_session(&m).await;
    assert_eq!(report.stop, StopReason::BatchLimit);
    assert_eq!(report.batches, 3);
    assert_eq!(m.refusals(), 2);

    let receipts = m.receipts();
    assert_eq!(receipts.len(), 3);
    assert_eq!(receipts[0].paid, greater(38));
    assert_eq!(receipts[1].paid, ArtifactCost::new(ArtifactKind::Lesser, 60));
    assert_eq!(receipts[2].paid, greater(10));
    assert_eq!(receipts[2].address, 100);
    assert_eq!(m.current_stock().coins, 3);

    let record = report.record.unwrap();
    assert_eq!(record.items.len(), 5);
    assert_eq!(record.items_bought(), 3);
    assert_eq!(record.items_rejected(), 1);
    assert_eq!(record.items_too_expensive(), 1);
    assert_eq!(record.rolls, 2);
    assert_eq!(record.coins_spent, 2);
    assert_eq!(record.greater_used, 48);
    assert_eq!(record.lesser_used, 60);

    // 200 + 5 + 200 against 38 * 0.05 + 60 * 0.01 + 10 * 0.05 and two rolls at 0.8
    assert!((record.total_chaos_value() - 405.0).abs() < 1e-9);
    assert!((record.total_artifact_cost() - 3.0).abs() < 1e-9);
    assert!((record.reroll_cost() - 1.6).abs() < 1e-9);
    assert!((record.profit() - 400.4).abs() < 1e-9);
    assert_eq!(orch.ledger().pending_saves(), 0);

    // -- Reload from disk --
    let store = HistoryStore::new(history_dir);
    let sessions = store.load_sessions().unwrap();
    assert_eq!(sessions.len(), 1);
    let loaded = &sessions[0];
    assert_eq!(loaded.id(), record.id());
    assert_eq!(loaded.items.len(), 5);
    assert_eq!(loaded.items_bought(), 3);
    assert_eq!(loaded.rolls, 2);
    assert!((loaded.total_chaos_value() - record.total_chaos_value()).abs() < 1e-6);
    assert!((loaded.total_cost() - record.total_cost()).abs() < 1e-6);

    let scarab = loaded.items.iter().find(|i| i.name == "Gilded Scarab").unwrap();
    assert_eq!(scarab.state, ValuationState::Rejected);
    assert!(scarab.reject_reason.contains("Scarab"));

    let summary: HistorySummary = store.summary().unwrap();
    assert_eq!(summary.sessions, 1);
    assert_eq!(summary.bought, 3);
    assert!((summary.cost - 3.0).abs() < 1e-6);
    assert!((summary.profit - 402.0).abs() < 1e-6);
}

#[tokio::test]
async fn test_dry_run_prices_without_buying() {
    let history_dir = temp_dir("dry_history");
    let mut cfg = config(history_dir.clone());
    cfg.general.debug_only = true;
    let mut orch = orchestrator(&cfg);
    let m = merchant();

    let report = orch.run_session(&m).await;
    assert_eq!(report.stop, StopReason::DebugOnly);
    assert_eq!(report.batches, 1);
    assert!(m.receipts().is_empty());
    assert_eq!(m.current_stock().greater, 5000);
    assert_eq!(m.current_stock().coins, 5);

    let record = report.record.unwrap();
    let priced = record
        .items
        .iter()
        .filter(|i| i.state == ValuationState::Priced)
        .count();
    assert_eq!(priced, 2);
    assert_eq!(record.items_bought(), 0);
    assert_eq!(record.rolls, 0);
    assert_eq!(HistoryStore::new(history_dir).load_sessions().unwrap().len(), 1);
}

#[tokio::test]
async fn test_surface_failure_ends_session_and_keeps_record() {
    let history_dir = temp_dir("fail_history");
    let cfg = config(history_dir.clone());
    let mut orch = orchestrator(&cfg);
    let m = MockMerchant::new(
        HaggleStock { coins: 3, lesser: 5000, greater: 5000, grand: 5000, exceptional: 5000 },
        vec![vec![MockOffer::currency("Divine Orb", greater(40), 0.5)]],
    );

    orch.ledger_mut().start_session(3, 0.8);
    m.set_error("client window lost focus");
    let batch = orch.run_batch(&m).await;
    assert!(matches!(batch.stop, Some(StopReason::Fatal(ref msg)) if msg.contains("lost focus")));
    assert!(orch.fatal().is_raised());

    m.clear_error();
    let saved = orch.ledger_mut().end_session().unwrap();
    assert_eq!(saved.items.len(), 0);
    assert_eq!(HistoryStore::new(history_dir).load_sessions().unwrap().len(), 1);
}

#[tokio::test]
async fn test_missing_market_data_blocks_session() {
    let history_dir = temp_dir("blocked_history");
    let cfg = config(history_dir.clone());
    let store = PriceStore::new(temp_dir("empty_market"), Vec::new());
    store.refresh();
    let ledger = SessionLedger::new(HistoryStore::new(history_dir.clone()), cfg.artifacts.clone());
    let mut orch = Orchestrator::new(&cfg, Arc::new(store), ledger);
    let m = merchant();

    let report = orch.run_session(&m).await;
    assert!(matches!(report.stop, StopReason::NotReady(ref p) if p[0].contains("market data")));
    assert!(report.record.is_none());
    assert!(m.receipts().is_empty());
    assert!(HistoryStore::new(history_dir).load_sessions().unwrap().is_empty());
}
