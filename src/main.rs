// ===============================
// src/main.rs
// ===============================
/*
 # backtest + shadow run dengan data historis
 DATA_FILE=data/btc.csv STRATEGY=ma_crossover cargo run --release

 # metrics
 curl -s localhost:9898/metrics | grep '^trades_total'
 curl -s localhost:9898/metrics | grep '^risk_breaches_total'
*/
/*
=============================================================================
Project : shadow_trader - backtest & live shadow-trading engine in Rust
Module  : main.rs
Version : 0.1.0
Author  : Kukuh Tripamungkas Wicaksono (Kukuh TW)
Email   : kukuhtw@gmail.com
WhatsApp: https://wa.me/628129893706
LinkedIn: https://id.linkedin.com/in/kukuhtw
License : MIT (see LICENSE)

Summary : Replays historical quotes through a pluggable strategy, simulates
          matching with slippage/latency, runs the same pipeline on a live
          shadow feed, and reports risk (exposure, VaR, limits) plus
          performance (Sharpe, Sortino, MaxDD, live-vs-backtest divergence).

(c) 2025 Kukuh TW. All rights reserved where applicable.
=============================================================================
*/
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use shadow_trader::analytics::{calculate_metrics, compare_live_vs_backtest};
use shadow_trader::domain::AlternativeRecord;
use shadow_trader::engine::{BacktestEngine, LiveEngine, Pipeline, RiskGuard, TradeTap};
use shadow_trader::execution::ExecutionSimulator;
use shadow_trader::risk::RiskManager;
use shadow_trader::store::{MarketDataStore, StaticSource};
use shadow_trader::{config, feed, metrics, recorder, strategy};

fn log_json<T: Serialize>(label: &str, value: &T) {
    match serde_json::to_string(value) {
        Ok(s) => info!(report = %s, "{label}"),
        Err(e) => warn!(?e, "{label}: serialize failed"),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // ---- Logging ----
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ---- Load config & limits ----
    let cfg = config::load();
    info!(
        asset = %cfg.args.asset,
        strategy = cfg.strategy.mode.as_str(),
        data_file = ?cfg.args.data_file,
        latency_ms = cfg.exec.latency_ms,
        "startup config"
    );

    // ---- Metrics ----
    metrics::init();
    metrics::serve_metrics(cfg.args.metrics_port);

    // ---- Strategy (invalid parameters are fatal here, nowhere else) ----
    let strat = match strategy::build(&cfg.strategy) {
        Ok(s) => strategy::shared(s),
        Err(e) => {
            error!(error = %e, "invalid strategy configuration");
            return ExitCode::from(2);
        }
    };
    let executor = Arc::new(ExecutionSimulator::from_cfg(&cfg.exec));
    let pipeline = Pipeline::new(strat.clone(), executor.clone());
    info!(slippage = executor.model_name(), "execution model");

    // ---- Market data ----
    let store = Arc::new(MarketDataStore::new());
    if let Some(path) = &cfg.args.data_file {
        if let Err(e) = store.load_file(path) {
            error!(error = %e, %path, "cannot read historical data");
            return ExitCode::from(1);
        }
    }
    // contoh alternative data (diteruskan apa adanya, tidak ditafsirkan)
    let mut news = StaticSource::new(
        "news",
        vec![AlternativeRecord {
            timestamp: Utc::now().naive_utc(),
            source: "news".into(),
            payload: json!({ "event": "Market news update", "sentiment": "positive" }),
        }],
    );
    store.ingest_alternative(&mut news);

    // ---- Observers ----
    let tap = TradeTap::new(4096);
    let rec_task = cfg.args.record_file.clone().map(|path| tokio::spawn(recorder::run(tap.subscribe(), path)));

    // ---- Backtest ----
    let risk = Arc::new(RiskManager::new());
    let mut backtest = BacktestEngine::new(store.clone(), pipeline.clone())
        .with_risk(RiskGuard::new(risk.clone(), cfg.limits.clone()))
        .with_observers(tap.clone());
    match backtest.run(&cfg.args.asset) {
        Ok(summary) => log_json("backtest summary", &summary),
        Err(e) => warn!(error = %e, "backtest not run"),
    }
    let backtest_trades = backtest.trades();
    drop(backtest);

    if let Some(path) = &cfg.args.snapshot_file {
        if let Err(e) = store.save_file(&cfg.args.asset, path) {
            warn!(error = %e, %path, "snapshot not saved");
        }
    }

    // ---- Live shadow run ----
    // Sumber live: replay data historis kalau ada, selain itu mock random walk
    strat.lock().reset();
    let live_store = Arc::new(MarketDataStore::new());
    let live = LiveEngine::new(live_store, pipeline)
        .with_risk(RiskGuard::new(risk.clone(), cfg.limits.clone()))
        .with_observers(tap.clone());

    let (feed_tx, feed_rx) = mpsc::channel(1024);
    let (stop_tx, stop_rx) = watch::channel(false);
    let history = store.query(&cfg.args.asset);
    let producer = if history.is_empty() {
        let (asset, ticks) = (cfg.args.asset.clone(), cfg.args.live_ticks);
        let start = Utc::now().naive_utc();
        let pace = Duration::from_millis(cfg.args.live_tick_ms);
        tokio::spawn(async move {
            feed::run_mock(feed_tx, asset, start, ticks, pace).await;
        })
    } else {
        tokio::spawn(async move {
            feed::replay(feed_tx, history).await;
        })
    };
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received");
            let _ = stop_tx.send(true);
        }
    });

    match live.run(feed_rx, stop_rx).await {
        Ok(summary) => log_json("live summary", &summary),
        Err(e) => warn!(error = %e, "live run not started"),
    }
    producer.abort();

    // ---- Reports ----
    let live_trades = live.trades();
    match calculate_metrics(&live_trades) {
        Ok(m) => log_json("live performance", &m),
        Err(e) => info!(error = %e, "live performance not computable"),
    }
    match calculate_metrics(&backtest_trades) {
        Ok(m) => log_json("backtest performance", &m),
        Err(e) => info!(error = %e, "backtest performance not computable"),
    }
    log_json("live vs backtest", &compare_live_vs_backtest(&live_trades, &backtest_trades));
    log_json("risk", &risk.snapshot());
    info!(pnl = live.pnl(), "live pnl");

    // ---- Shutdown: close the tap so the recorder flushes and exits ----
    drop(live);
    drop(tap);
    if let Some(task) = rec_task {
        let _ = task.await;
    }
    ExitCode::SUCCESS
}
