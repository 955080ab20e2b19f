// =============================================================================
// Scalp Core — Main Entry Point
// =============================================================================
//
// The engine starts in Demo + Paused mode for safety. An operator must
// explicitly flip trading_mode to Live in the runtime config to go live.
// =============================================================================

mod adapter;
mod app_state;
mod control_loop;
mod cooldown;
mod entry;
mod errors;
mod execution;
mod exit_manager;
mod exposure_store;
mod indicators;
mod journal;
mod market_data;
mod position;
mod risk_gate;
mod runtime_config;
mod scoring;
mod sizing;
mod types;

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::adapter::paper::PaperAdapter;
use crate::app_state::EngineState;
use crate::control_loop::TickPaths;
use crate::runtime_config::RuntimeConfig;
use crate::types::AccountMode;

const CONFIG_PATH: &str = "runtime_config.json";
const BOT_SNAPSHOTS_DIR: &str = "state/bots";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("scalp-core starting up");

    let mut config = RuntimeConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load runtime config, using defaults");
        RuntimeConfig::default()
    });

    // Force safe startup mode regardless of what was persisted: an operator
    // must explicitly re-arm trading after every restart.
    config.trading_mode = types::TradingMode::Paused;
    config.account_mode = AccountMode::Demo;

    if let Ok(syms) = std::env::var("SCALP_SYMBOLS") {
        config.symbols = syms.split(',').map(|s| s.trim().to_uppercase()).filter(|s| !s.is_empty()).collect();
    }
    if config.symbols.is_empty() {
        config.symbols = vec!["BTCUSDT".into(), "ETHUSDT".into(), "SOLUSDT".into()];
    }

    info!(symbols = ?config.symbols, trading_mode = %config.trading_mode, account_mode = %config.account_mode, "engine starting in safe mode");

    let symbols = config.symbols.clone();
    let poll_sec = config.poll_sec;
    let starting_equity = std::env::var("SCALP_STARTING_EQUITY")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(10_000.0);

    // A real deployment swaps this for a venue-specific BrokerAdapter; the
    // paper adapter keeps the whole pipeline runnable without credentials.
    let adapter = Arc::new(PaperAdapter::new("paper", starting_equity));
    for symbol in &symbols {
        adapter.set_price(symbol, 0.0);
    }

    let state = Arc::new(EngineState::new(config, adapter));

    let mut tick_interval = tokio::time::interval(Duration::from_secs(poll_sec));
    let tick_state = Arc::clone(&state);
    let tick_symbols = symbols.clone();
    let tick_task = tokio::spawn(async move {
        loop {
            tick_interval.tick().await;
            let now_ms = chrono::Utc::now().timestamp_millis();
            for symbol in &tick_symbols {
                let paths = TickPaths { bot_snapshots_dir: BOT_SNAPSHOTS_DIR };
                if let Err(e) = control_loop::tick(&tick_state, symbol, "paper", now_ms, &paths).await {
                    error!(symbol, error = %e, "control loop tick failed");
                    tick_state.push_error(format!("{symbol}: {e}"));
                }
            }
        }
    });

    info!("engine running — waiting for shutdown signal");
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, saving state");

    tick_task.abort();
    if let Err(e) = state.config.read().save(CONFIG_PATH) {
        error!(error = %e, "failed to save runtime config on shutdown");
    }
    if let Err(e) = state.positions.save(app_state::POSITIONS_PATH) {
        error!(error = %e, "failed to save positions on shutdown");
    }

    info!("scalp-core shut down cleanly");
    Ok(())
}
