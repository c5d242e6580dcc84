// ===============================
// src/metrics.rs
// ===============================
use once_cell::sync::Lazy;
use prometheus::{Encoder, Gauge, IntCounterVec, Opts, Registry, TextEncoder};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use tracing::{error, info};

// Single custom registry (we register everything here)
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

fn counter_vec(name: &str, help: &str, labels: &[&str]) -> IntCounterVec {
    IntCounterVec::new(Opts::new(name, help), labels).expect("static metric definition")
}

// -------- Market data --------
pub static SAMPLES: Lazy<IntCounterVec> =
    Lazy::new(|| counter_vec("samples_ingested_total", "market samples stored per asset", &["asset"]));

pub static SAMPLES_REJECTED: Lazy<IntCounterVec> = Lazy::new(|| {
    counter_vec("samples_rejected_total", "market samples rejected by validation", &["reason"])
});

pub static ALT_RECORDS: Lazy<IntCounterVec> = Lazy::new(|| {
    counter_vec("alternative_records_total", "alternative data records per source", &["source"])
});

// -------- Decisions & executions --------
pub static SIGNALS: Lazy<IntCounterVec> = Lazy::new(|| {
    counter_vec(
        "signals_total_by",
        "non-hold strategy decisions (labels: strategy, side)",
        &["strategy", "side"],
    )
});

pub static TRADES: Lazy<IntCounterVec> =
    Lazy::new(|| counter_vec("trades_total", "simulated trades (label: mode)", &["mode"]));

pub static UNMATCHED: Lazy<IntCounterVec> = Lazy::new(|| {
    counter_vec("orders_unmatched_total", "orders that failed matching (label: mode)", &["mode"])
});

// -------- Risk & PnL --------
pub static RISK_BREACHES: Lazy<IntCounterVec> =
    Lazy::new(|| counter_vec("risk_breaches_total", "risk limit breaches", &["level"]));

pub static RISK_EXPOSURE: Lazy<Gauge> = Lazy::new(|| {
    Gauge::new("risk_exposure", "last computed exposure (sum of price * volume)")
        .expect("static metric definition")
});

pub static LIVE_PNL: Lazy<Gauge> = Lazy::new(|| {
    Gauge::new("live_pnl", "running live P&L over accepted shadow trades")
        .expect("static metric definition")
});

pub fn init() {
    // Register all metrics to the custom registry
    for m in [
        REGISTRY.register(Box::new(SAMPLES.clone())),
        REGISTRY.register(Box::new(SAMPLES_REJECTED.clone())),
        REGISTRY.register(Box::new(ALT_RECORDS.clone())),
        REGISTRY.register(Box::new(SIGNALS.clone())),
        REGISTRY.register(Box::new(TRADES.clone())),
        REGISTRY.register(Box::new(UNMATCHED.clone())),
        REGISTRY.register(Box::new(RISK_BREACHES.clone())),
        REGISTRY.register(Box::new(RISK_EXPOSURE.clone())),
        REGISTRY.register(Box::new(LIVE_PNL.clone())),
    ] {
        // double registration only happens if init() is called twice
        let _ = m;
    }
}

// Encode all metrics in Prometheus text format
pub fn encode_metrics() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() || buf.is_empty() {
        buf.extend_from_slice(b"# no metrics\n");
    }
    buf
}

// Serve one HTTP request (GET / or /metrics): tiny HTTP 1.1 responder
fn handle_client(mut stream: TcpStream) {
    // Read a bit to consume headers (no full parse)
    let mut _req_buf = [0u8; 1024];
    let _ = stream.read(&mut _req_buf);

    let body = encode_metrics();
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );

    let _ = stream.write_all(header.as_bytes());
    let _ = stream.write_all(&body);
    let _ = stream.flush();
}

// Run the metrics server in a dedicated OS thread (keeps Tokio runtime clean)
pub fn serve_metrics(port: u16) {
    thread::spawn(move || {
        let addr = format!("0.0.0.0:{port}");
        let listener = match TcpListener::bind(&addr) {
            Ok(l) => l,
            Err(e) => {
                error!(?e, %addr, "metrics bind failed, endpoint disabled");
                return;
            }
        };
        info!("metrics listening on http://{addr}/ (and /metrics)");

        for conn in listener.incoming() {
            match conn {
                Ok(stream) => handle_client(stream),
                Err(e) => error!(?e, "metrics accept error"),
            }
        }
    });
}
