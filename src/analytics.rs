// ===============================
// src/analytics.rs (performance)
// ===============================
//
// Everything here is derived on demand from a trade slice; nothing is cached.
// A ratio whose denominator is zero or undefined is reported as None rather
// than as a made-up number. A price that cannot start a return (zero,
// negative, non-finite) is an error, never an infinite return.
//
use serde::Serialize;
use thiserror::Error;

use crate::domain::Trade;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalyticsError {
    #[error("insufficient data: need at least {need} trades, got {have}")]
    InsufficientData { have: usize, need: usize },
    #[error("trade {index}: price {price} cannot form a return")]
    InvalidPrice { index: usize, price: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub trades: usize,
    pub mean_return: f64,
    /// Sample standard deviation of all returns (Sharpe denominator).
    pub volatility: Option<f64>,
    /// sqrt(mean(r^2)) over negative returns only (Sortino denominator).
    pub downside_deviation: Option<f64>,
    pub sharpe: Option<f64>,
    pub sortino: Option<f64>,
    pub max_drawdown: f64,
}

/// r_i = (p_i - p_{i-1}) / p_{i-1} over consecutive trade prices.
/// Every price must be finite and > 0, and every return finite.
pub fn returns(trades: &[Trade]) -> Result<Vec<f64>, AnalyticsError> {
    if let Some((index, t)) = trades.iter().enumerate().find(|(_, t)| !(t.price.is_finite() && t.price > 0.0)) {
        return Err(AnalyticsError::InvalidPrice { index, price: t.price });
    }
    trades
        .windows(2)
        .enumerate()
        .map(|(i, w)| {
            let r = (w[1].price - w[0].price) / w[0].price;
            if r.is_finite() { Ok(r) } else { Err(AnalyticsError::InvalidPrice { index: i, price: w[0].price }) }
        })
        .collect()
}

pub fn mean(xs: &[f64]) -> Option<f64> {
    if xs.is_empty() { None } else { Some(xs.iter().sum::<f64>() / xs.len() as f64) }
}

pub fn sample_std_dev(xs: &[f64]) -> Option<f64> {
    if xs.len() < 2 {
        return None;
    }
    let m = mean(xs)?;
    let var = xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (xs.len() - 1) as f64;
    Some(var.sqrt())
}

pub fn downside_deviation(xs: &[f64]) -> Option<f64> {
    let squares: Vec<f64> = xs.iter().filter(|r| **r < 0.0).map(|r| r * r).collect();
    mean(&squares).map(f64::sqrt)
}

/// Largest (peak - trough) / peak with the peak taken before the trough.
pub fn max_drawdown(prices: &[f64]) -> f64 {
    let Some(&first) = prices.first() else { return 0.0 };
    let mut peak = first;
    let mut max_dd: f64 = 0.0;
    for &p in prices {
        if p > peak {
            peak = p;
        }
        if peak > 0.0 {
            max_dd = max_dd.max((peak - p) / peak);
        }
    }
    max_dd
}

fn ratio(num: f64, den: Option<f64>) -> Option<f64> {
    den.filter(|d| d.is_finite() && *d > 0.0).map(|d| num / d).filter(|r| r.is_finite())
}

pub fn calculate_metrics(trades: &[Trade]) -> Result<MetricsSnapshot, AnalyticsError> {
    if trades.len() < 2 {
        return Err(AnalyticsError::InsufficientData { have: trades.len(), need: 2 });
    }
    let r = returns(trades)?;
    let mean_return = mean(&r).ok_or(AnalyticsError::InsufficientData { have: trades.len(), need: 2 })?;
    let volatility = sample_std_dev(&r);
    let downside = downside_deviation(&r);
    let prices: Vec<f64> = trades.iter().map(|t| t.price).collect();

    Ok(MetricsSnapshot {
        trades: trades.len(),
        mean_return,
        volatility,
        downside_deviation: downside,
        sharpe: ratio(mean_return, volatility),
        sortino: ratio(mean_return, downside),
        max_drawdown: max_drawdown(&prices),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricDelta {
    pub live: Option<f64>,
    pub backtest: Option<f64>,
    /// live - backtest, when both sides are computable.
    pub delta: Option<f64>,
}

impl MetricDelta {
    fn new(live: Option<f64>, backtest: Option<f64>) -> Self {
        let delta = match (live, backtest) {
            (Some(l), Some(b)) => Some(l - b),
            _ => None,
        };
        Self { live, backtest, delta }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DivergenceReport {
    pub live_trades: usize,
    pub backtest_trades: usize,
    /// live count - backtest count.
    pub trade_count_mismatch: i64,
    /// First index where the two trade sequences differ.
    pub first_divergence: Option<usize>,
    pub mean_return: MetricDelta,
    pub sharpe: MetricDelta,
    pub sortino: MetricDelta,
    pub max_drawdown: MetricDelta,
}

impl DivergenceReport {
    pub fn is_identical(&self) -> bool {
        self.first_divergence.is_none()
    }
}

fn pick(m: &Option<MetricsSnapshot>, f: impl Fn(&MetricsSnapshot) -> Option<f64>) -> Option<f64> {
    m.as_ref().and_then(f)
}

pub fn compare_live_vs_backtest(live: &[Trade], backtest: &[Trade]) -> DivergenceReport {
    let l = calculate_metrics(live).ok();
    let b = calculate_metrics(backtest).ok();

    let first_divergence = live
        .iter()
        .zip(backtest)
        .position(|(x, y)| x != y)
        .or_else(|| (live.len() != backtest.len()).then(|| live.len().min(backtest.len())));

    DivergenceReport {
        live_trades: live.len(),
        backtest_trades: backtest.len(),
        trade_count_mismatch: live.len() as i64 - backtest.len() as i64,
        first_divergence,
        mean_return: MetricDelta::new(pick(&l, |m| Some(m.mean_return)), pick(&b, |m| Some(m.mean_return))),
        sharpe: MetricDelta::new(pick(&l, |m| m.sharpe), pick(&b, |m| m.sharpe)),
        sortino: MetricDelta::new(pick(&l, |m| m.sortino), pick(&b, |m| m.sortino)),
        max_drawdown: MetricDelta::new(pick(&l, |m| Some(m.max_drawdown)), pick(&b, |m| Some(m.max_drawdown))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::parse_timestamp;
    use crate::domain::TradeSide;

    fn trades(prices: &[f64]) -> Vec<Trade> {
        let t0 = parse_timestamp("2025-07-13 13:00:00").unwrap();
        prices
            .iter()
            .enumerate()
            .map(|(i, p)| Trade {
                asset: "BTC/USD".into(),
                price: *p,
                volume: 1.0,
                side: TradeSide::Buy,
                timestamp: t0 + chrono::Duration::seconds(i as i64),
            })
            .collect()
    }

    #[test]
    fn sharpe_and_sortino_use_different_denominators() {
        let m = calculate_metrics(&trades(&[100.0, 110.0, 99.0])).unwrap();
        let sharpe = m.sharpe.unwrap();
        let sortino = m.sortino.unwrap();
        assert!(sharpe.is_finite() && sortino.is_finite());

        let vol = m.volatility.unwrap();
        let down = m.downside_deviation.unwrap();
        // returns are +0.1 and -0.1: sample stdev = 0.1 * sqrt(2), downside = 0.1
        assert!((vol - 0.1 * 2f64.sqrt()).abs() < 1e-12);
        assert!((down - 0.1).abs() < 1e-12);
        assert!((vol - down).abs() > 1e-3);
    }

    #[test]
    fn max_drawdown_tracks_running_peak() {
        // 120 -> 100 is the deepest fall from a prior peak
        let dd = max_drawdown(&[100.0, 110.0, 105.0, 120.0, 100.0, 115.0]);
        assert!((dd - 20.0 / 120.0).abs() < 1e-12);
        assert_eq!(max_drawdown(&[100.0, 110.0, 120.0]), 0.0);
        assert_eq!(max_drawdown(&[]), 0.0);
    }

    #[test]
    fn fewer_than_two_trades_is_not_computable() {
        assert_eq!(calculate_metrics(&[]), Err(AnalyticsError::InsufficientData { have: 0, need: 2 }));
        assert_eq!(
            calculate_metrics(&trades(&[100.0])),
            Err(AnalyticsError::InsufficientData { have: 1, need: 2 })
        );
    }

    #[test]
    fn ratios_are_none_when_denominator_is_missing() {
        // two trades -> one return -> no sample stdev
        let m = calculate_metrics(&trades(&[100.0, 101.0])).unwrap();
        assert_eq!(m.volatility, None);
        assert_eq!(m.sharpe, None);
        // no losing step -> no downside deviation
        assert_eq!(m.sortino, None);

        let flat = calculate_metrics(&trades(&[100.0, 100.0, 100.0])).unwrap();
        assert_eq!(flat.volatility, Some(0.0));
        assert_eq!(flat.sharpe, None);
    }

    #[test]
    fn identical_histories_do_not_diverge() {
        let t = trades(&[100.0, 105.0, 95.0, 101.0]);
        let report = compare_live_vs_backtest(&t, &t);
        assert!(report.is_identical());
        assert_eq!(report.trade_count_mismatch, 0);
        assert_eq!(report.sharpe.delta, Some(0.0));
        assert_eq!(report.max_drawdown.delta, Some(0.0));
    }

    #[test]
    fn divergence_reports_count_and_position() {
        let backtest = trades(&[100.0, 105.0, 95.0, 101.0]);
        let live = trades(&[100.0, 105.0, 96.0]);
        let report = compare_live_vs_backtest(&live, &backtest);
        assert_eq!(report.trade_count_mismatch, -1);
        assert_eq!(report.first_divergence, Some(2));
        assert!(report.mean_return.delta.is_some());

        // prefix: diverges where the shorter one ends
        let report = compare_live_vs_backtest(&backtest[..2], &backtest);
        assert_eq!(report.first_divergence, Some(2));
        // one side not computable -> no delta
        let report = compare_live_vs_backtest(&backtest[..1], &backtest);
        assert_eq!(report.sharpe.live, None);
        assert_eq!(report.sharpe.delta, None);
    }

    #[test]
    fn zero_or_broken_prices_are_refused() {
        assert_eq!(
            calculate_metrics(&trades(&[100.0, 0.0, 50.0])),
            Err(AnalyticsError::InvalidPrice { index: 1, price: 0.0 })
        );
        assert_eq!(
            returns(&trades(&[100.0, -5.0])),
            Err(AnalyticsError::InvalidPrice { index: 1, price: -5.0 })
        );
        assert!(matches!(
            returns(&trades(&[100.0, f64::NAN])),
            Err(AnalyticsError::InvalidPrice { index: 1, .. })
        ));
        // both prices valid, the return itself overflows
        assert_eq!(
            returns(&trades(&[1e-300, 1e300])),
            Err(AnalyticsError::InvalidPrice { index: 0, price: 1e-300 })
        );
    }

    #[test]
    fn ratio_never_reports_an_infinite_value() {
        assert_eq!(ratio(1.0, Some(1e-320)), None);
        assert_eq!(ratio(1.0, Some(f64::NAN)), None);
        assert_eq!(ratio(1.0, Some(0.5)), Some(2.0));
    }
}
