// ===============================
// src/config.rs
// ===============================
/*
=============================================================================
Project : shadow_trader - backtest & live shadow-trading engine in Rust
Module  : config.rs
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
use std::env;
use std::str::FromStr;

use dotenvy::dotenv;

use crate::risk::RiskLimits;

// ===== Strategi =====
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StrategyMode {
    MACrossover,
    MeanReversion,
    VolBreakout,
}

impl StrategyMode {
    pub fn parse_one(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ma_crossover" | "macrossover" | "ma" => Some(StrategyMode::MACrossover),
            "mean_reversion" | "meanreversion" | "mr" => Some(StrategyMode::MeanReversion),
            "vol_breakout" | "volbreakout" | "vb" => Some(StrategyMode::VolBreakout),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyMode::MACrossover => "ma_crossover",
            StrategyMode::MeanReversion => "mean_reversion",
            StrategyMode::VolBreakout => "vol_breakout",
        }
    }
}

/// Raw strategy parameters. Validation happens in `strategy::build`.
#[derive(Clone, Debug)]
pub struct StrategyCfg {
    pub mode: StrategyMode,
    pub short_window: usize,
    pub long_window: usize,
    pub mr_window: usize,
    pub mr_edge: f64,
    pub vb_window: usize,
    pub vb_edge: f64,
    pub vb_cooldown: u32,
    pub unit_volume: f64,
}

impl Default for StrategyCfg {
    fn default() -> Self {
        Self {
            mode: StrategyMode::MACrossover,
            short_window: 10,
            long_window: 20,
            mr_window: 64,
            mr_edge: 3.0,
            vb_window: 100,
            vb_edge: 5.0,
            vb_cooldown: 20,
            unit_volume: 1.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlippageMode {
    Fixed,
    Volume,
}

#[derive(Clone, Debug)]
pub struct ExecCfg {
    pub tolerance: f64,
    pub slippage: SlippageMode,
    /// Fixed fraction (0.001 = 0.1%), also the base of the volume model.
    pub slippage_pct: f64,
    pub slippage_per_unit: f64,
    pub slippage_cap: f64,
    pub latency_ms: i64,
}

impl Default for ExecCfg {
    fn default() -> Self {
        Self {
            tolerance: 0.0,
            slippage: SlippageMode::Fixed,
            slippage_pct: 0.001,
            slippage_per_unit: 0.0001,
            slippage_cap: 0.01,
            latency_ms: 0,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Args {
    pub asset: String,
    pub data_file: Option<String>,
    pub snapshot_file: Option<String>,
    pub record_file: Option<String>,
    pub metrics_port: u16,
    pub live_ticks: u64,
    pub live_tick_ms: u64,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub args: Args,
    pub strategy: StrategyCfg,
    pub exec: ExecCfg,
    pub limits: RiskLimits,
}

fn parse_or<T, F>(get: &F, key: &str, default: T) -> T
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    get(key).and_then(|s| s.trim().parse().ok()).unwrap_or(default)
}

fn non_empty<F: Fn(&str) -> Option<String>>(get: &F, key: &str) -> Option<String> {
    get(key).map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Read `.env` (if any) then the process environment.
pub fn load() -> Config {
    // Pastikan .env dibaca (agar DATA_FILE, RECORD_FILE, dll ter-load)
    let _ = dotenv();
    from_lookup(|k| env::var(k).ok())
}

/// Build a config from any key lookup; unknown or unparsable values fall back
/// to defaults.
pub fn from_lookup<F: Fn(&str) -> Option<String>>(get: F) -> Config {
    // ===== Basic =====
    let args = Args {
        asset: non_empty(&get, "ASSET").unwrap_or_else(|| "BTC/USD".to_string()),
        data_file: non_empty(&get, "DATA_FILE"),
        snapshot_file: non_empty(&get, "SNAPSHOT_FILE"),
        record_file: non_empty(&get, "RECORD_FILE"),
        metrics_port: parse_or(&get, "METRICS_PORT", 9898),
        live_ticks: parse_or(&get, "LIVE_TICKS", 500),
        live_tick_ms: parse_or(&get, "LIVE_TICK_MS", 5),
    };

    // ===== Strategy selection =====
    // Contoh:
    //   STRATEGY=ma_crossover SHORT_WINDOW=10 LONG_WINDOW=20
    //   STRATEGY=vol_breakout VB_WINDOW=100 VB_EDGE=5 VB_COOLDOWN=20
    let d = StrategyCfg::default();
    let strategy = StrategyCfg {
        mode: get("STRATEGY").and_then(|s| StrategyMode::parse_one(&s)).unwrap_or(d.mode),
        short_window: parse_or(&get, "SHORT_WINDOW", d.short_window),
        long_window: parse_or(&get, "LONG_WINDOW", d.long_window),
        mr_window: parse_or(&get, "MR_WINDOW", d.mr_window),
        mr_edge: parse_or(&get, "MR_EDGE", d.mr_edge),
        vb_window: parse_or(&get, "VB_WINDOW", d.vb_window),
        vb_edge: parse_or(&get, "VB_EDGE", d.vb_edge),
        vb_cooldown: parse_or(&get, "VB_COOLDOWN", d.vb_cooldown),
        unit_volume: parse_or(&get, "UNIT_VOLUME", d.unit_volume),
    };

    // ===== Execution realism =====
    let d = ExecCfg::default();
    let exec = ExecCfg {
        tolerance: parse_or(&get, "MATCH_TOLERANCE", d.tolerance),
        slippage: match get("SLIPPAGE_MODEL").unwrap_or_default().to_ascii_lowercase().as_str() {
            "volume" | "volume_impact" => SlippageMode::Volume,
            _ => SlippageMode::Fixed,
        },
        slippage_pct: parse_or(&get, "SLIPPAGE_PCT", d.slippage_pct),
        slippage_per_unit: parse_or(&get, "SLIPPAGE_PER_UNIT", d.slippage_per_unit),
        slippage_cap: parse_or(&get, "SLIPPAGE_CAP", d.slippage_cap),
        latency_ms: parse_or(&get, "LATENCY_MS", d.latency_ms),
    };

    // ===== Limits =====
    let d = RiskLimits::default();
    let limits = RiskLimits {
        soft_exposure: parse_or(&get, "MAX_EXPOSURE_SOFT", d.soft_exposure),
        hard_exposure: parse_or(&get, "MAX_EXPOSURE_HARD", d.hard_exposure),
        soft_var: parse_or(&get, "MAX_VAR_SOFT", d.soft_var),
        hard_var: parse_or(&get, "MAX_VAR_HARD", d.hard_var),
        soft_drawdown: parse_or(&get, "MAX_DRAWDOWN_SOFT", d.soft_drawdown),
        hard_drawdown: parse_or(&get, "MAX_DRAWDOWN_HARD", d.hard_drawdown),
        var_confidence: parse_or(&get, "VAR_CONFIDENCE", d.var_confidence),
    };

    Config { args, strategy, exec, limits }
}
