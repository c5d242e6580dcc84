// ===============================
// src/risk.rs
// ===============================
//
// Risk is always recomputed from the full trade history the caller passes in
// (no incremental state), so calling twice with the same trades gives the
// same answer. RiskState is only touched under the manager's own lock.
//
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::analytics::{self, AnalyticsError};
use crate::domain::Trade;
use crate::metrics::{RISK_BREACHES, RISK_EXPOSURE};

/// Outcome of a limit check. `HardBreach` means: stop sending new orders.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Breach {
    #[default]
    None,
    SoftBreach,
    HardBreach,
}

impl Breach {
    pub fn as_str(&self) -> &'static str {
        match self { Breach::None => "none", Breach::SoftBreach => "soft", Breach::HardBreach => "hard" }
    }

    fn classify(value: f64, soft: f64, hard: f64) -> Breach {
        if value > hard {
            Breach::HardBreach
        } else if value > soft {
            Breach::SoftBreach
        } else {
            Breach::None
        }
    }
}

/// Thresholds. VaR and drawdown are fractions (0.05 = 5%).
#[derive(Debug, Clone, PartialEq)]
pub struct RiskLimits {
    pub soft_exposure: f64,
    pub hard_exposure: f64,
    pub soft_var: f64,
    pub hard_var: f64,
    pub soft_drawdown: f64,
    pub hard_drawdown: f64,
    pub var_confidence: f64,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            soft_exposure: 1_000_000.0,
            hard_exposure: 2_000_000.0,
            soft_var: 0.05,
            hard_var: 0.10,
            soft_drawdown: 0.10,
            hard_drawdown: 0.20,
            var_confidence: 0.95,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RiskState {
    pub exposure: f64,
    pub var: Option<f64>,
    pub drawdown: Option<f64>,
    pub breach: Breach,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RiskError {
    #[error("insufficient data: need at least {need} trades, got {have}")]
    InsufficientData { have: usize, need: usize },
    #[error("confidence {0} outside (0, 1)")]
    InvalidConfidence(f64),
    #[error("trade {index}: price {price} cannot form a return")]
    InvalidPrice { index: usize, price: f64 },
    #[error("non-finite return {0}")]
    NonFiniteReturn(f64),
}

impl From<AnalyticsError> for RiskError {
    fn from(e: AnalyticsError) -> Self {
        match e {
            AnalyticsError::InsufficientData { have, need } => RiskError::InsufficientData { have, need },
            AnalyticsError::InvalidPrice { index, price } => RiskError::InvalidPrice { index, price },
        }
    }
}

/// Historical VaR: loss at the (1 - confidence) quantile of `returns`,
/// linearly interpolated, as a non-negative fraction.
pub fn historical_var(returns: &[f64], confidence: f64) -> Result<f64, RiskError> {
    if !(confidence > 0.0 && confidence < 1.0) {
        return Err(RiskError::InvalidConfidence(confidence));
    }
    if returns.is_empty() {
        return Err(RiskError::InsufficientData { have: 0, need: 1 });
    }
    if let Some(r) = returns.iter().find(|r| !r.is_finite()) {
        return Err(RiskError::NonFiniteReturn(*r));
    }
    let mut sorted = returns.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let pos = (1.0 - confidence) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let q = sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64);
    Ok(if q < 0.0 { -q } else { 0.0 })
}

fn exposure_of(trades: &[Trade]) -> f64 {
    trades.iter().map(Trade::notional).sum()
}

fn var_of(trades: &[Trade], confidence: f64) -> Result<f64, RiskError> {
    if trades.len() < 2 {
        return Err(RiskError::InsufficientData { have: trades.len(), need: 2 });
    }
    let returns = analytics::returns(trades)?;
    historical_var(&returns, confidence)
}

#[derive(Debug, Default)]
pub struct RiskManager {
    state: Mutex<RiskState>,
}

impl RiskManager {
    pub fn new() -> Self { Self::default() }

    pub fn snapshot(&self) -> RiskState { self.state.lock().clone() }

    /// Exposure = sum(price * volume) over `trades`. Pass the full history.
    pub fn monitor_realtime_risk(&self, trades: &[Trade]) -> f64 {
        let exposure = exposure_of(trades);
        self.state.lock().exposure = exposure;
        RISK_EXPOSURE.set(exposure);
        exposure
    }

    pub fn calculate_var(&self, trades: &[Trade], confidence: f64) -> Result<f64, RiskError> {
        let var = var_of(trades, confidence)?;
        self.state.lock().var = Some(var);
        Ok(var)
    }

    /// Compare exposure, VaR and drawdown against `limits`; the worst level
    /// wins. VaR and drawdown are skipped (not guessed) below two trades.
    /// A history whose returns cannot be formed is a hard breach: the loss
    /// is unknown, so no new orders.
    pub fn enforce_risk_limits(&self, trades: &[Trade], limits: &RiskLimits) -> Breach {
        let exposure = exposure_of(trades);
        let mut level = Breach::classify(exposure, limits.soft_exposure, limits.hard_exposure);

        let var = match var_of(trades, limits.var_confidence) {
            Ok(v) => {
                level = level.max(Breach::classify(v, limits.soft_var, limits.hard_var));
                Some(v)
            }
            Err(RiskError::InsufficientData { .. }) => None,
            Err(e @ RiskError::InvalidConfidence(_)) => {
                warn!(error = %e, "VaR limit skipped");
                None
            }
            Err(e) => {
                warn!(error = %e, "VaR not computable from trade prices");
                level = Breach::HardBreach;
                None
            }
        };
        let drawdown = if trades.len() >= 2 {
            let prices: Vec<f64> = trades.iter().map(|t| t.price).collect();
            let dd = analytics::max_drawdown(&prices);
            level = level.max(Breach::classify(dd, limits.soft_drawdown, limits.hard_drawdown));
            Some(dd)
        } else {
            None
        };

        // one write: readers never see exposure from one history and VaR from another
        *self.state.lock() = RiskState { exposure, var, drawdown, breach: level };
        RISK_EXPOSURE.set(exposure);

        if level != Breach::None {
            warn!(level = level.as_str(), exposure, ?var, ?drawdown, trades = trades.len(), "risk limit breached");
            RISK_BREACHES.with_label_values(&[level.as_str()]).inc();
        }
        level
    }
}
