// ===============================
// src/execution.rs (matching + slippage/latency)
// ===============================
//
// Order -> Trade in two steps, identical for backtest and live:
// 1) match_order: is the order executable against the quote it was made on?
//      BUY  needs price + tolerance >= ask
//      SELL needs price - tolerance <= bid
//    HOLD never gets this far; if one does, it is refused.
// 2) apply_slippage_and_latency: adverse, deterministic price shift
//    (BUY pays more, SELL receives less) plus a fixed timestamp delay.
//
use chrono::Duration;
use thiserror::Error;

use crate::config::{ExecCfg, SlippageMode};
use crate::domain::{MarketSample, Order, Side, Trade};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutionError {
    #[error("hold orders are never matched")]
    HoldOrder,
    #[error("order for {order} offered against quote for {quote}")]
    AssetMismatch { order: String, quote: String },
    #[error("{side:?} @ {price} not executable against bid {bid} / ask {ask}")]
    NotExecutable { side: Side, price: f64, bid: f64, ask: f64 },
}

/// Price impact as a fraction of the order price (0.001 = 0.1%).
/// Must be a pure function of the order so both modes see the same cost.
pub trait SlippageModel: Send + Sync {
    fn slippage(&self, order: &Order) -> f64;
    fn name(&self) -> &str;
}

/// Constant fraction regardless of size.
#[derive(Debug, Clone, Copy)]
pub struct FixedPercent {
    pub pct: f64,
}

impl SlippageModel for FixedPercent {
    fn slippage(&self, _order: &Order) -> f64 { self.pct }
    fn name(&self) -> &str { "fixed_percent" }
}

/// Grows linearly with order volume, capped.
#[derive(Debug, Clone, Copy)]
pub struct VolumeImpact {
    pub base: f64,
    pub per_unit: f64,
    pub cap: f64,
}

impl SlippageModel for VolumeImpact {
    fn slippage(&self, order: &Order) -> f64 {
        (self.base + self.per_unit * order.volume.abs()).min(self.cap)
    }
    fn name(&self) -> &str { "volume_impact" }
}

pub struct ExecutionSimulator {
    tolerance: f64,
    latency: Duration,
    model: Box<dyn SlippageModel>,
}

impl Default for ExecutionSimulator {
    fn default() -> Self {
        Self::new(0.0, Duration::zero(), Box::new(FixedPercent { pct: 0.001 }))
    }
}

impl ExecutionSimulator {
    pub fn new(tolerance: f64, latency: Duration, model: Box<dyn SlippageModel>) -> Self {
        Self { tolerance: tolerance.abs(), latency, model }
    }

    pub fn from_cfg(cfg: &ExecCfg) -> Self {
        let model: Box<dyn SlippageModel> = match cfg.slippage {
            SlippageMode::Fixed => Box::new(FixedPercent { pct: cfg.slippage_pct }),
            SlippageMode::Volume => Box::new(VolumeImpact {
                base: cfg.slippage_pct,
                per_unit: cfg.slippage_per_unit,
                cap: cfg.slippage_cap,
            }),
        };
        Self::new(cfg.tolerance, Duration::milliseconds(cfg.latency_ms.max(0)), model)
    }

    pub fn model_name(&self) -> &str { self.model.name() }

    pub fn match_order(&self, order: &Order, quote: &MarketSample) -> Result<(), ExecutionError> {
        if order.asset != quote.asset {
            return Err(ExecutionError::AssetMismatch { order: order.asset.clone(), quote: quote.asset.clone() });
        }
        let executable = match order.side {
            Side::Hold => return Err(ExecutionError::HoldOrder),
            Side::Buy => order.price + self.tolerance >= quote.ask,
            Side::Sell => order.price - self.tolerance <= quote.bid,
        };
        if executable {
            Ok(())
        } else {
            Err(ExecutionError::NotExecutable { side: order.side, price: order.price, bid: quote.bid, ask: quote.ask })
        }
    }

    pub fn apply_slippage_and_latency(&self, order: &Order) -> Order {
        // negative slippage would be price improvement; not modelled
        let slip = self.model.slippage(order).max(0.0);
        let price = match order.side {
            Side::Buy => order.price * (1.0 + slip),
            Side::Sell => order.price * (1.0 - slip),
            Side::Hold => order.price,
        };
        Order { price, timestamp: order.timestamp + self.latency, ..order.clone() }
    }

    /// match -> slippage/latency -> Trade. The only way a Trade is made.
    pub fn execute(&self, order: &Order, quote: &MarketSample) -> Result<Trade, ExecutionError> {
        self.match_order(order, quote)?;
        let filled = self.apply_slippage_and_latency(order);
        let side = filled.side.trade_side().ok_or(ExecutionError::HoldOrder)?;
        Ok(Trade { asset: filled.asset, price: filled.price, volume: filled.volume, side, timestamp: filled.timestamp })
    }
}
