//! End-to-end: backtest, live shadow run over a channel feed, persistence.

use std::sync::Arc;

use chrono::{Duration, NaiveDateTime};
use shadow_trader::analytics::compare_live_vs_backtest;
use shadow_trader::codec::parse_timestamp;
use shadow_trader::domain::{MarketSample, Order};
use shadow_trader::engine::{BacktestEngine, LiveEngine, Pipeline, RunState, RunStatus, StepOutcome, TradeTap};
use shadow_trader::execution::{ExecutionSimulator, FixedPercent};
use shadow_trader::feed;
use shadow_trader::store::MarketDataStore;
use shadow_trader::strategy::{shared, MovingAverage, Strategy};
use tokio::sync::{mpsc, watch};

const ASSET: &str = "BTC/USD";

fn t0() -> NaiveDateTime {
    parse_timestamp("2025-07-13 13:00:00").unwrap()
}

fn tick(i: i64, mid: f64) -> MarketSample {
    MarketSample { timestamp: t0() + Duration::seconds(i), asset: ASSET.into(), bid: mid - 0.5, ask: mid + 0.5, volume: 5.0 }
}

fn zigzag(n: i64) -> Vec<MarketSample> {
    (0..n).map(|i| tick(i, 100.0 + ((i % 7) as f64 - 3.0) * (1.0 + (i % 3) as f64))).collect()
}

fn executor() -> Arc<ExecutionSimulator> {
    Arc::new(ExecutionSimulator::new(0.0, Duration::milliseconds(100), Box::new(FixedPercent { pct: 0.001 })))
}

/// Buys every sample it sees.
struct AlwaysBuy;

impl Strategy for AlwaysBuy {
    fn name(&self) -> &'static str { "always_buy" }
    fn decide(&mut self, sample: &MarketSample) -> Order { Order::buy(sample, 1.0) }
    fn reset(&mut self) {}
    fn fresh(&self) -> Box<dyn Strategy> { Box::new(AlwaysBuy) }
}

#[test]
fn same_strategy_after_reset_gives_identical_histories() {
    let samples = zigzag(60);
    let store = Arc::new(MarketDataStore::new());
    store.ingest(ASSET, samples.clone());

    let strategy = shared(Box::new(MovingAverage::new(3, 8, 1.0).unwrap()));
    let pipeline = Pipeline::new(strategy.clone(), executor());

    let mut backtest = BacktestEngine::new(store, pipeline.clone());
    backtest.run(ASSET).unwrap();
    assert!(!backtest.trades().is_empty());

    strategy.lock().reset();
    let live = LiveEngine::new(Arc::new(MarketDataStore::new()), pipeline);
    for s in samples {
        live.on_sample(s).unwrap();
    }

    let report = compare_live_vs_backtest(&live.trades(), &backtest.trades());
    assert!(report.is_identical());
    assert_eq!(report.trade_count_mismatch, 0);
}

#[test]
fn one_sample_gives_one_identical_trade() {
    let s = tick(0, 50_005.0);
    let store = Arc::new(MarketDataStore::new());
    store.ingest(ASSET, vec![s.clone()]);

    let mut backtest = BacktestEngine::new(store, Pipeline::new(shared(Box::new(AlwaysBuy)), executor()));
    let live = LiveEngine::new(Arc::new(MarketDataStore::new()), Pipeline::new(shared(Box::new(AlwaysBuy)), executor()));

    backtest.run(ASSET).unwrap();
    let StepOutcome::Filled(trade) = live.on_sample(s.clone()).unwrap() else {
        panic!("expected a fill");
    };
    assert_eq!(backtest.trades(), vec![trade.clone()]);
    assert_eq!(trade.timestamp, s.timestamp + Duration::milliseconds(100));
    assert!((trade.price - s.ask * 1.001).abs() < 1e-9);
}

#[tokio::test]
async fn shutdown_drains_buffered_samples_then_completes() {
    let live = Arc::new(LiveEngine::new(
        Arc::new(MarketDataStore::new()),
        Pipeline::new(shared(Box::new(AlwaysBuy)), executor()),
    ));
    let (tx, rx) = mpsc::channel(64);
    let (stop_tx, stop_rx) = watch::channel(false);

    // everything is already buffered before the stop request arrives
    for s in zigzag(20) {
        tx.send(s).await.unwrap();
    }
    stop_tx.send(true).unwrap();

    let summary = live.run(rx, stop_rx).await.unwrap();
    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(summary.samples, 20);
    assert_eq!(summary.trades, 20);
    assert_eq!(live.state(), RunState::Completed);

    // the feed was closed on shutdown
    assert!(tx.send(tick(99, 100.0)).await.is_err());
    // and the engine does not start twice
    let (_tx2, rx2) = mpsc::channel(1);
    let (_stop2, stop_rx2) = watch::channel(false);
    assert!(live.run(rx2, stop_rx2).await.is_err());
}

#[tokio::test]
async fn live_run_ends_with_the_feed_and_publishes_trades() {
    let tap = TradeTap::new(256);
    let mut observer = tap.subscribe();
    let live = LiveEngine::new(
        Arc::new(MarketDataStore::new()),
        Pipeline::new(shared(Box::new(AlwaysBuy)), executor()),
    )
    .with_observers(tap);

    let (tx, rx) = mpsc::channel(8);
    let (stop_tx, stop_rx) = watch::channel(false);
    // dropped sender: nobody can stop us, so the feed decides
    drop(stop_tx);
    let producer = tokio::spawn(feed::replay(tx, zigzag(30)));

    let summary = live.run(rx, stop_rx).await.unwrap();
    assert_eq!(producer.await.unwrap(), 30);
    assert_eq!(summary.trades, 30);

    let mut seen = 0;
    while observer.try_recv().is_ok() {
        seen += 1;
    }
    assert_eq!(seen, 30);
    assert!((live.pnl() - live.trades().iter().map(|t| t.price * t.volume).sum::<f64>()).abs() < 1e-6);
}

#[test]
fn snapshot_file_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snap").join("btc.csv");

    let store = MarketDataStore::new();
    store.ingest(ASSET, zigzag(25));
    assert_eq!(store.save_file(ASSET, &path).unwrap(), 25);

    let restored = MarketDataStore::new();
    let report = restored.load_file(&path).unwrap();
    assert_eq!(report.accepted, 25);
    assert_eq!(restored.query(ASSET), store.query(ASSET));

    // loading the same file again only produces ordering rejections
    let again = restored.load_file(&path).unwrap();
    assert_eq!(again.accepted, 0);
    assert_eq!(again.rejected.len(), 25);
}
