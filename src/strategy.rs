// ===============================
// src/strategy.rs
// ===============================
//
// Tiga strategi, satu kontrak (`Strategy::decide`):
// 1) MovingAverage  (crossover, default)   -> trend following
// 2) MeanReversion  (fair value +/- edge)   -> sideways market
// 3) VolBreakout    (rolling range + edge)  -> volatility expansion
//
// Rules shared by every strategy:
// - decide() only sees the sample and the strategy's own window; it never
//   touches the store, the clock, or any global. Same input -> same output,
//   so backtest and live can be compared one tick at a time.
// - Warm-up always yields HOLD. No average is computed on a partial window.
// - BUY is priced at the ask, SELL at the bid.
//
use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::config::{StrategyCfg, StrategyMode};
use crate::domain::{MarketSample, Order};

pub trait Strategy: Send {
    fn name(&self) -> &'static str;
    /// One decision per sample. Never blocks; O(window).
    fn decide(&mut self, sample: &MarketSample) -> Order;
    /// Forget retained history (parameters are kept).
    fn reset(&mut self);
    /// A new instance with the same parameters and no history.
    fn fresh(&self) -> Box<dyn Strategy>;
}

/// Handle injected into orchestrators. The mutex confines `decide` to one
/// caller at a time.
pub type SharedStrategy = Arc<Mutex<Box<dyn Strategy>>>;

pub fn shared(strategy: Box<dyn Strategy>) -> SharedStrategy {
    Arc::new(Mutex::new(strategy))
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StrategyError {
    #[error("{param} must be > 0, got {value}")]
    InvalidWindow { param: &'static str, value: usize },
    #[error("short window ({short}) must be smaller than long window ({long})")]
    WindowOrder { short: usize, long: usize },
    #[error("unit volume must be finite and > 0, got {0}")]
    InvalidVolume(f64),
    #[error("edge must be finite and >= 0, got {0}")]
    InvalidEdge(f64),
}

fn check_window(param: &'static str, value: usize) -> Result<usize, StrategyError> {
    if value == 0 { Err(StrategyError::InvalidWindow { param, value }) } else { Ok(value) }
}

fn check_volume(v: f64) -> Result<f64, StrategyError> {
    if v.is_finite() && v > 0.0 { Ok(v) } else { Err(StrategyError::InvalidVolume(v)) }
}

fn check_edge(e: f64) -> Result<f64, StrategyError> {
    if e.is_finite() && e >= 0.0 { Ok(e) } else { Err(StrategyError::InvalidEdge(e)) }
}

fn push_window(win: &mut VecDeque<f64>, cap: usize, v: f64) {
    if win.len() == cap {
        win.pop_front();
    }
    win.push_back(v);
}

/// Mean of the newest `n` values. Caller guarantees `win.len() >= n > 0`.
fn tail_mean(win: &VecDeque<f64>, n: usize) -> f64 {
    win.iter().rev().take(n).sum::<f64>() / n as f64
}

// -----------------------------------------------------------------------------
// 1) MOVING AVERAGE CROSSOVER
//    BUY  : prev short <= prev long, now short > long (golden cross)
//    SELL : prev short >= prev long, now short < long (dead cross)
//    The first tick with a full long window only seeds `prev`.
// -----------------------------------------------------------------------------
pub struct MovingAverage {
    short_w: usize,
    long_w: usize,
    unit_volume: f64,
    window: VecDeque<f64>,
    prev: Option<(f64, f64)>,
}

impl MovingAverage {
    pub fn new(short_w: usize, long_w: usize, unit_volume: f64) -> Result<Self, StrategyError> {
        check_window("short window", short_w)?;
        check_window("long window", long_w)?;
        if short_w >= long_w {
            return Err(StrategyError::WindowOrder { short: short_w, long: long_w });
        }
        let unit_volume = check_volume(unit_volume)?;
        Ok(Self { short_w, long_w, unit_volume, window: VecDeque::with_capacity(long_w), prev: None })
    }

    /// (short, long) averages once the long window is full.
    pub fn averages(&self) -> Option<(f64, f64)> {
        if self.window.len() < self.long_w {
            return None;
        }
        Some((tail_mean(&self.window, self.short_w), tail_mean(&self.window, self.long_w)))
    }
}

impl Strategy for MovingAverage {
    fn name(&self) -> &'static str { "ma_crossover" }

    fn decide(&mut self, sample: &MarketSample) -> Order {
        // window holds max(short, long) == long mids
        push_window(&mut self.window, self.long_w, sample.mid());

        let Some((short, long)) = self.averages() else {
            return Order::hold(sample);
        };
        match self.prev.replace((short, long)) {
            Some((ps, pl)) if ps <= pl && short > long => Order::buy(sample, self.unit_volume),
            Some((ps, pl)) if ps >= pl && short < long => Order::sell(sample, self.unit_volume),
            _ => Order::hold(sample),
        }
    }

    fn reset(&mut self) {
        self.window.clear();
        self.prev = None;
    }

    fn fresh(&self) -> Box<dyn Strategy> {
        Box::new(Self {
            window: VecDeque::with_capacity(self.long_w),
            prev: None,
            ..*self
        })
    }
}

// -----------------------------------------------------------------------------
// 2) MEAN-REVERSION
//    Ide: ask < fair - edge -> BUY ; bid > fair + edge -> SELL
//    fair = rata-rata mid N-bar (termasuk tick sekarang).
//    Risiko: saat trending kuat, melawan arus.
// -----------------------------------------------------------------------------
pub struct MeanReversion {
    w: usize,
    edge: f64,
    unit_volume: f64,
    window: VecDeque<f64>,
}

impl MeanReversion {
    pub fn new(w: usize, edge: f64, unit_volume: f64) -> Result<Self, StrategyError> {
        let w = check_window("window", w)?;
        let edge = check_edge(edge)?;
        let unit_volume = check_volume(unit_volume)?;
        Ok(Self { w, edge, unit_volume, window: VecDeque::with_capacity(w) })
    }

    fn fair(&self) -> Option<f64> {
        if self.window.len() >= self.w { Some(tail_mean(&self.window, self.w)) } else { None }
    }
}

impl Strategy for MeanReversion {
    fn name(&self) -> &'static str { "mean_reversion" }

    fn decide(&mut self, sample: &MarketSample) -> Order {
        push_window(&mut self.window, self.w, sample.mid());
        match self.fair() {
            Some(fair) if sample.ask < fair - self.edge => Order::buy(sample, self.unit_volume),
            Some(fair) if sample.bid > fair + self.edge => Order::sell(sample, self.unit_volume),
            _ => Order::hold(sample),
        }
    }

    fn reset(&mut self) { self.window.clear(); }

    fn fresh(&self) -> Box<dyn Strategy> {
        Box::new(Self { window: VecDeque::with_capacity(self.w), ..*self })
    }
}

// -----------------------------------------------------------------------------
// 3) VOLATILITY BREAKOUT
//    BUY  when mid > high of the previous `w` mids + edge
//    SELL when mid < low  of the previous `w` mids - edge
//    The current tick is compared before it joins the window; otherwise it
//    could never exceed its own high.
//    Cooldown: after a signal, wait `cooldown_ticks` ticks before the next one.
// -----------------------------------------------------------------------------
pub struct VolBreakout {
    w: usize,
    edge: f64,
    cooldown_ticks: u32,
    since_last: u32,
    unit_volume: f64,
    window: VecDeque<f64>,
}

impl VolBreakout {
    pub fn new(w: usize, edge: f64, cooldown_ticks: u32, unit_volume: f64) -> Result<Self, StrategyError> {
        let w = check_window("window", w)?;
        let edge = check_edge(edge)?;
        let unit_volume = check_volume(unit_volume)?;
        Ok(Self {
            w,
            edge,
            cooldown_ticks,
            since_last: cooldown_ticks, // mulai bisa sinyal
            unit_volume,
            window: VecDeque::with_capacity(w),
        })
    }

    fn range(&self) -> Option<(f64, f64)> {
        if self.window.len() < self.w {
            return None;
        }
        let hi = self.window.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let lo = self.window.iter().copied().fold(f64::INFINITY, f64::min);
        Some((hi, lo))
    }
}

impl Strategy for VolBreakout {
    fn name(&self) -> &'static str { "vol_breakout" }

    fn decide(&mut self, sample: &MarketSample) -> Order {
        self.since_last = self.since_last.saturating_add(1);
        let m = sample.mid();
        let range = self.range();
        push_window(&mut self.window, self.w, m);

        let Some((hi, lo)) = range else {
            return Order::hold(sample);
        };
        if self.since_last < self.cooldown_ticks {
            return Order::hold(sample);
        }
        if m > hi + self.edge {
            self.since_last = 0;
            return Order::buy(sample, self.unit_volume);
        }
        if m < lo - self.edge {
            self.since_last = 0;
            return Order::sell(sample, self.unit_volume);
        }
        Order::hold(sample)
    }

    fn reset(&mut self) {
        self.window.clear();
        self.since_last = self.cooldown_ticks;
    }

    fn fresh(&self) -> Box<dyn Strategy> {
        Box::new(Self {
            since_last: self.cooldown_ticks,
            window: VecDeque::with_capacity(self.w),
            ..*self
        })
    }
}

/// Build the configured strategy. Invalid parameters fail here, at startup,
/// and nowhere else.
pub fn build(cfg: &StrategyCfg) -> Result<Box<dyn Strategy>, StrategyError> {
    Ok(match cfg.mode {
        StrategyMode::MACrossover => Box::new(MovingAverage::new(cfg.short_window, cfg.long_window, cfg.unit_volume)?),
        StrategyMode::MeanReversion => Box::new(MeanReversion::new(cfg.mr_window, cfg.mr_edge, cfg.unit_volume)?),
        StrategyMode::VolBreakout => {
            Box::new(VolBreakout::new(cfg.vb_window, cfg.vb_edge, cfg.vb_cooldown, cfg.unit_volume)?)
        }
    })
}
