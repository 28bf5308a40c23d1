//! HAGGLER: market-priced haggling assistant
//!
//! Entry point. Loads configuration, initialises structured logging,
//! refreshes the cached market data, and runs one haggle session against
//! the configured surface with graceful shutdown.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use haggler::config::AppConfig;
use haggler::engine::ledger::SessionLedger;
use haggler::engine::orchestrator::{Orchestrator, SessionReport, StopReason};
use haggler::market::ninja::NinjaClient;
use haggler::market::PriceStore;
use haggler::storage::HistoryStore;
use haggler::surface::scripted::ScriptedSurface;

const BANNER: &str = r#"
 _   _    _    ____  ____ _     _____ ____
| | | |  / \  / ___|/ ___| |   | ____|  _ \
| |_| | / _ \| |  _| |  _| |   |  _| | |_) |
|  _  |/ ___ \ |_| | |_| | |___| |___|  _ <
|_| |_/_/   \_\____|\____|_____|_____|_| \_\

  Market-priced haggling assistant
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = std::env::var("HAGGLER_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = AppConfig::load(&config_path)?;

    init_logging();

    println!("{BANNER}");
    info!(
        league = %cfg.general.league,
        data_dir = %cfg.general.data_dir.display(),
        debug_only = cfg.general.debug_only,
        max_batches = cfg.general.max_batches,
        "HAGGLER starting up"
    );

    // -- Market data -----------------------------------------------------

    let store = Arc::new(PriceStore::new(
        cfg.general.data_dir.clone(),
        cfg.market.custom_prices.clone(),
    ));
    let max_age = Duration::from_secs(cfg.market.refresh_max_age_mins * 60);
    if store.should_fetch(max_age) {
        let client = NinjaClient::new(cfg.general.league.clone(), cfg.market.exchange_mode)?;
        match client.download_all(&store).await {
            Ok(report) if report.is_complete() => {
                info!(files = report.downloaded.len(), "Market data up to date");
            }
            Ok(report) => {
                for (category, reason) in &report.failed {
                    warn!(category = %category, reason = %reason, "Market file not refreshed");
                }
            }
            Err(e) => error!(error = %e, "Market data download failed; using cached files"),
        }
    } else {
        info!("Cached market data is fresh");
    }
    store.refresh();
    info!(
        names = store.len(),
        valid = store.is_valid(),
        reroll_price = store.reference_reroll_price(),
        "Price table ready"
    );

    // -- History ---------------------------------------------------------

    let history = HistoryStore::new(cfg.general.history_dir.clone());
    match history.summary() {
        Ok(summary) => info!(
            sessions = summary.sessions,
            rolls = summary.rolls,
            bought = summary.bought,
            value = format!("{:.2}c", summary.value),
            profit = format!("{:.2}c", summary.profit),
            profit_pct = format!("{:.1}%", summary.profit_percent),
            "Haggle history"
        ),
        Err(e) => warn!(error = %e, "Could not read haggle history"),
    }

    // -- Surface ---------------------------------------------------------

    let Some(scenario) = cfg.general.scenario.as_ref() else {
        warn!("No [general].scenario configured; nothing to haggle with");
        return Ok(());
    };
    let surface = ScriptedSurface::from_file(scenario)
        .with_context(|| format!("Failed to load surface scenario {}", scenario.display()))?;

    // -- Session ---------------------------------------------------------

    let ledger = SessionLedger::new(history, cfg.artifacts.clone());
    let mut orchestrator = Orchestrator::new(&cfg, Arc::clone(&store), ledger);
    let stop = orchestrator.stop_handle();

    info!("Starting haggle session. Press Ctrl+C to stop.");
    let report = {
        let session = orchestrator.run_session(&surface);
        tokio::pin!(session);

        let finished = tokio::select! {
            report = &mut session => Some(report),
            _ = tokio::signal::ctrl_c() => None,
        };
        match finished {
            Some(report) => report,
            None => {
                info!("Shutdown signal received; stopping after the current step.");
                stop.stop();
                session.await
            }
        }
    };

    log_session_report(&report);

    if orchestrator.ledger().pending_saves() > 0 {
        match orchestrator.ledger_mut().save_pending() {
            Ok(saved) => info!(saved, "Saved pending sessions"),
            Err(e) => error!(error = %e, "Session history not saved"),
        }
    }

    info!("HAGGLER shut down cleanly.");
    Ok(())
}

fn log_session_report(report: &SessionReport) {
    match &report.stop {
        StopReason::NotReady(problems) => {
            warn!(problems = ?problems, "Session not started");
            return;
        }
        StopReason::Fatal(message) => error!(message = %message, "Session stopped by a fatal error"),
        other => info!(reason = ?other, "Session stopped"),
    }

    if let Some(record) = &report.record {
        info!(
            session = %record.id(),
            batches = report.batches,
            rolls = record.rolls,
            bought = record.items_bought(),
            rejected = record.items_rejected(),
            too_expensive = record.items_too_expensive(),
            value = format!("{:.2}c", record.total_chaos_value()),
            cost = format!("{:.2}c", record.total_cost()),
            profit = format!("{:.2}c", record.profit()),
            profit_pct = format!("{:.1}%", record.profit_percent()),
            "Session summary"
        );
    }
}

/// Initialise tracing with env-filter and optional JSON output.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("haggler=info"));

    let json_logging = std::env::var("HAGGLER_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
