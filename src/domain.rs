// ===============================
// src/domain.rs
// ===============================
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Decision side. `Hold` is a valid strategy output but never becomes a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side { Buy, Sell, Hold }

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self { Side::Buy => "buy", Side::Sell => "sell", Side::Hold => "hold" }
    }
    /// `None` for `Hold`: there is no trade side for a non-decision.
    pub fn trade_side(&self) -> Option<TradeSide> {
        match self { Side::Buy => Some(TradeSide::Buy), Side::Sell => Some(TradeSide::Sell), Side::Hold => None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeSide { Buy, Sell }
impl TradeSide { pub fn sign(&self) -> f64 { match self { TradeSide::Buy => 1.0, TradeSide::Sell => -1.0 } } }

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSample { pub timestamp: NaiveDateTime, pub asset: String, pub bid: f64, pub ask: f64, pub volume: f64 }

impl MarketSample {
    pub fn mid(&self) -> f64 { (self.bid + self.ask) / 2.0 }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order { pub asset: String, pub price: f64, pub volume: f64, pub side: Side, pub timestamp: NaiveDateTime }

impl Order {
    pub fn hold(sample: &MarketSample) -> Self {
        Order { asset: sample.asset.clone(), price: sample.mid(), volume: 0.0, side: Side::Hold, timestamp: sample.timestamp }
    }
    pub fn buy(sample: &MarketSample, volume: f64) -> Self {
        Order { asset: sample.asset.clone(), price: sample.ask, volume, side: Side::Buy, timestamp: sample.timestamp }
    }
    pub fn sell(sample: &MarketSample, volume: f64) -> Self {
        Order { asset: sample.asset.clone(), price: sample.bid, volume, side: Side::Sell, timestamp: sample.timestamp }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade { pub asset: String, pub price: f64, pub volume: f64, pub side: TradeSide, pub timestamp: NaiveDateTime }

impl Trade {
    pub fn notional(&self) -> f64 { self.price * self.volume }
}

/// Opaque record from an alternative source (news, sentiment, events).
/// Strategies may read it as advice; the core never interprets `payload`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlternativeRecord { pub timestamp: NaiveDateTime, pub source: String, pub payload: serde_json::Value }
