// ===============================
// src/engine.rs (orchestrators)
// ===============================
//
// Backtest and live share one routine, Pipeline::step:
//   sample -> strategy.decide -> (HOLD stops here) -> execution.execute -> Trade
// The only differences between the modes are who supplies the samples
// (store snapshot vs. push feed) and when the run ends.
//
// Alur live:
//   feed (mpsc) -> LiveEngine::run -> on_sample -> store write -> step -> tap
//
use std::collections::BTreeSet;
use std::sync::Arc;

use ahash::AHashMap as HashMap;
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use crate::domain::{MarketSample, Side, Trade};
use crate::execution::{ExecutionError, ExecutionSimulator};
use crate::metrics::{LIVE_PNL, SIGNALS, TRADES, UNMATCHED};
use crate::risk::{Breach, RiskLimits, RiskManager};
use crate::store::{DataError, MarketDataStore};
use crate::strategy::{shared, SharedStrategy};

/// Runs are one-shot: Idle -> Running -> Completed, never backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    Idle,
    Running,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunStatus {
    Completed,
    NoData,
    StoppedByRisk,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub asset: String,
    pub status: RunStatus,
    pub samples: usize,
    pub rejected: usize,
    pub holds: usize,
    pub unmatched: usize,
    pub trades: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Hold,
    Unmatched(ExecutionError),
    Filled(Trade),
    /// Live engine after a hard risk breach: sample stored, no decision made.
    Halted,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("engine is {0:?}; a run cannot be started again")]
    InvalidState(RunState),
    #[error(transparent)]
    Data(#[from] DataError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Backtest,
    Live,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self { Mode::Backtest => "backtest", Mode::Live => "live" }
    }
}

/// Risk manager plus the limits it enforces after every fill.
#[derive(Clone)]
pub struct RiskGuard {
    pub manager: Arc<RiskManager>,
    pub limits: RiskLimits,
}

impl RiskGuard {
    pub fn new(manager: Arc<RiskManager>, limits: RiskLimits) -> Self { Self { manager, limits } }

    fn check(&self, trades: &[Trade]) -> Breach { self.manager.enforce_risk_limits(trades, &self.limits) }
}

/// Read-only trade stream for observers. Publishing never blocks; a receiver
/// that falls behind loses the oldest trades (broadcast `Lagged`).
#[derive(Clone)]
pub struct TradeTap {
    tx: broadcast::Sender<Trade>,
}

impl TradeTap {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Trade> { self.tx.subscribe() }

    fn publish(&self, trade: &Trade) {
        // Err only means nobody is listening
        let _ = self.tx.send(trade.clone());
    }
}

/// decide -> match -> slippage/latency. Identical for both modes.
#[derive(Clone)]
pub struct Pipeline {
    strategy: SharedStrategy,
    executor: Arc<ExecutionSimulator>,
}

impl Pipeline {
    pub fn new(strategy: SharedStrategy, executor: Arc<ExecutionSimulator>) -> Self { Self { strategy, executor } }

    pub fn strategy(&self) -> &SharedStrategy { &self.strategy }

    /// Same executor, a fresh strategy with the same parameters.
    pub fn fork(&self) -> Pipeline {
        let strategy = shared(self.strategy.lock().fresh());
        Pipeline { strategy, executor: self.executor.clone() }
    }

    pub fn step(&self, sample: &MarketSample, mode: Mode) -> StepOutcome {
        let (name, order) = {
            let mut s = self.strategy.lock();
            (s.name(), s.decide(sample))
        };
        if order.side == Side::Hold {
            return StepOutcome::Hold;
        }
        SIGNALS.with_label_values(&[name, order.side.as_str()]).inc();

        match self.executor.execute(&order, sample) {
            Ok(trade) => {
                TRADES.with_label_values(&[mode.as_str()]).inc();
                debug!(mode = mode.as_str(), asset = %trade.asset, side = ?trade.side, px = trade.price, vol = trade.volume, "filled");
                StepOutcome::Filled(trade)
            }
            Err(e) => {
                UNMATCHED.with_label_values(&[mode.as_str()]).inc();
                debug!(mode = mode.as_str(), error = %e, "order not matched");
                StepOutcome::Unmatched(e)
            }
        }
    }
}

#[derive(Debug, Default)]
struct Tally {
    samples: usize,
    rejected: usize,
    holds: usize,
    unmatched: usize,
}

impl Tally {
    fn count(&mut self, outcome: &StepOutcome) {
        match outcome {
            StepOutcome::Hold => self.holds += 1,
            StepOutcome::Unmatched(_) => self.unmatched += 1,
            StepOutcome::Filled(_) | StepOutcome::Halted => {}
        }
    }
}

// -----------------------------------------------------------------------------
// BACKTEST
// -----------------------------------------------------------------------------
pub struct BacktestEngine {
    store: Arc<MarketDataStore>,
    pipeline: Pipeline,
    risk: Option<RiskGuard>,
    tap: Option<TradeTap>,
    state: RunState,
    trades: Vec<Trade>,
}

impl BacktestEngine {
    pub fn new(store: Arc<MarketDataStore>, pipeline: Pipeline) -> Self {
        Self { store, pipeline, risk: None, tap: None, state: RunState::Idle, trades: Vec::new() }
    }

    pub fn with_risk(mut self, guard: RiskGuard) -> Self {
        self.risk = Some(guard);
        self
    }

    pub fn with_observers(mut self, tap: TradeTap) -> Self {
        self.tap = Some(tap);
        self
    }

    pub fn state(&self) -> RunState { self.state }

    pub fn trades(&self) -> Vec<Trade> { self.trades.clone() }

    /// Replay `asset`'s stored series once, in timestamp order.
    pub fn run(&mut self, asset: &str) -> Result<RunSummary, EngineError> {
        if self.state != RunState::Idle {
            return Err(EngineError::InvalidState(self.state));
        }
        self.state = RunState::Running;

        let samples = self.store.query(asset);
        let mut tally = Tally::default();
        if samples.is_empty() {
            warn!(%asset, "backtest: no stored samples");
            self.state = RunState::Completed;
            return Ok(self.summary(asset, RunStatus::NoData, &tally));
        }
        info!(%asset, samples = samples.len(), "backtest: started");

        let mut status = RunStatus::Completed;
        for sample in &samples {
            tally.samples += 1;
            let outcome = self.pipeline.step(sample, Mode::Backtest);
            tally.count(&outcome);
            let StepOutcome::Filled(trade) = outcome else { continue };

            if let Some(tap) = &self.tap {
                tap.publish(&trade);
            }
            self.trades.push(trade);
            if let Some(guard) = &self.risk {
                if guard.check(&self.trades) == Breach::HardBreach {
                    warn!(%asset, at = %sample.timestamp, trades = self.trades.len(), "backtest: hard risk breach, stopping");
                    status = RunStatus::StoppedByRisk;
                    break;
                }
            }
        }

        self.state = RunState::Completed;
        let summary = self.summary(asset, status, &tally);
        info!(?summary, "backtest: finished");
        Ok(summary)
    }

    fn summary(&self, asset: &str, status: RunStatus, t: &Tally) -> RunSummary {
        RunSummary {
            asset: asset.to_string(),
            status,
            samples: t.samples,
            rejected: t.rejected,
            holds: t.holds,
            unmatched: t.unmatched,
            trades: self.trades.len(),
        }
    }
}

// -----------------------------------------------------------------------------
// LIVE (shadow)
// -----------------------------------------------------------------------------
#[derive(Default)]
struct LiveSession {
    trades: Vec<Trade>,
    pnl: f64,
    tally: Tally,
    assets: BTreeSet<String>,
    halted: bool,
}

/// Per-asset sequencing: one turn lock and one strategy instance per asset,
/// so windows never mix prices of different assets.
struct Lane {
    turn: Mutex<()>,
    pipeline: Pipeline,
}

pub struct LiveEngine {
    store: Arc<MarketDataStore>,
    pipeline: Pipeline,
    risk: Option<RiskGuard>,
    tap: Option<TradeTap>,
    state: Mutex<RunState>,
    lanes: Mutex<HashMap<String, Arc<Lane>>>,
    session: Mutex<LiveSession>,
}

impl LiveEngine {
    pub fn new(store: Arc<MarketDataStore>, pipeline: Pipeline) -> Self {
        Self {
            store,
            pipeline,
            risk: None,
            tap: None,
            state: Mutex::new(RunState::Idle),
            lanes: Mutex::new(HashMap::new()),
            session: Mutex::new(LiveSession::default()),
        }
    }

    pub fn with_risk(mut self, guard: RiskGuard) -> Self {
        self.risk = Some(guard);
        self
    }

    pub fn with_observers(mut self, tap: TradeTap) -> Self {
        self.tap = Some(tap);
        self
    }

    pub fn state(&self) -> RunState { *self.state.lock() }

    pub fn trades(&self) -> Vec<Trade> { self.session.lock().trades.clone() }

    /// Running sum of price * volume over accepted trades.
    pub fn pnl(&self) -> f64 { self.session.lock().pnl }

    pub fn is_halted(&self) -> bool { self.session.lock().halted }

    fn enter_running(&self) -> Result<(), EngineError> {
        let mut st = self.state.lock();
        match *st {
            RunState::Completed => Err(EngineError::InvalidState(RunState::Completed)),
            _ => {
                *st = RunState::Running;
                Ok(())
            }
        }
    }

    /// The first asset seen runs on the injected pipeline; every other asset
    /// gets a fork of it.
    fn lane(&self, asset: &str) -> Arc<Lane> {
        let mut lanes = self.lanes.lock();
        if let Some(lane) = lanes.get(asset) {
            return lane.clone();
        }
        let pipeline = if lanes.is_empty() { self.pipeline.clone() } else { self.pipeline.fork() };
        let lane = Arc::new(Lane { turn: Mutex::new(()), pipeline });
        lanes.insert(asset.to_string(), lane.clone());
        lane
    }

    /// Push one live sample. It is stored first; a sample the store refuses
    /// gets no decision.
    pub fn on_sample(&self, sample: MarketSample) -> Result<StepOutcome, EngineError> {
        self.enter_running()?;
        let lane = self.lane(&sample.asset);
        let _turn = lane.turn.lock();

        if let Err(e) = self.store.ingest_one(sample.clone()) {
            self.session.lock().tally.rejected += 1;
            return Err(e.into());
        }

        {
            let mut session = self.session.lock();
            session.tally.samples += 1;
            session.assets.insert(sample.asset.clone());
            if session.halted {
                return Ok(StepOutcome::Halted);
            }
        }

        let outcome = lane.pipeline.step(&sample, Mode::Live);
        let mut session = self.session.lock();
        session.tally.count(&outcome);
        if let StepOutcome::Filled(trade) = &outcome {
            session.pnl += trade.notional();
            session.trades.push(trade.clone());
            LIVE_PNL.set(session.pnl);
            if let Some(tap) = &self.tap {
                tap.publish(trade);
            }
            if let Some(guard) = &self.risk {
                if guard.check(&session.trades) == Breach::HardBreach {
                    warn!(asset = %trade.asset, trades = session.trades.len(), "live: hard risk breach, halting decisions");
                    session.halted = true;
                }
            }
        }
        Ok(outcome)
    }

    /// Consume `feed` until it ends or `shutdown` flips to true. On shutdown
    /// the feed is closed and whatever is already buffered is still processed.
    pub async fn run(
        &self,
        mut feed: mpsc::Receiver<MarketSample>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<RunSummary, EngineError> {
        self.enter_running()?;
        info!("live: started");

        let mut watching = true;
        if *shutdown.borrow() {
            feed.close();
        }
        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed(), if watching => match changed {
                    Ok(()) if *shutdown.borrow() => {
                        info!("live: shutdown requested, draining feed");
                        feed.close();
                        watching = false;
                    }
                    Ok(()) => {}
                    // sender gone: no one can ask us to stop, run until the feed ends
                    Err(_) => watching = false,
                },
                next = feed.recv() => match next {
                    Some(sample) => {
                        if let Err(e) = self.on_sample(sample) {
                            warn!(error = %e, "live: sample rejected");
                        }
                    }
                    None => break,
                },
            }
        }
        Ok(self.finish())
    }

    /// Mark the session completed and summarise it.
    pub fn finish(&self) -> RunSummary {
        *self.state.lock() = RunState::Completed;
        let session = self.session.lock();
        let status = if session.halted {
            RunStatus::StoppedByRisk
        } else if session.tally.samples == 0 {
            RunStatus::NoData
        } else {
            RunStatus::Completed
        };
        let summary = RunSummary {
            asset: session.assets.iter().cloned().collect::<Vec<_>>().join(","),
            status,
            samples: session.tally.samples,
            rejected: session.tally.rejected,
            holds: session.tally.holds,
            unmatched: session.tally.unmatched,
            trades: session.trades.len(),
        };
        info!(?summary, pnl = session.pnl, "live: finished");
        summary
    }
}
