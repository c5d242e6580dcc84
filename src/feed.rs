// ===============================
// src/feed.rs
// ===============================
//
// Live feed producers. Both push into the mpsc channel the LiveEngine reads:
// - replay   : re-send a recorded series (shadow run over known data)
// - run_mock : random-walk generator at a fixed pace
//
// A producer stops on its own when the receiver is gone (engine finished).
//
use chrono::NaiveDateTime;
use rand::Rng;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::domain::MarketSample;

/// Send `samples` in order. Returns how many were delivered.
pub async fn replay(tx: mpsc::Sender<MarketSample>, samples: Vec<MarketSample>) -> usize {
    let total = samples.len();
    let mut sent = 0;
    for s in samples {
        if tx.send(s).await.is_err() {
            debug!(sent, total, "replay: receiver closed");
            break;
        }
        sent += 1;
    }
    info!(sent, total, "replay: done");
    sent
}

/// Random walk around 100.00 with a one-cent spread, `ticks` samples spaced
/// one second apart in sample time, `pace` apart in wall time.
pub async fn run_mock(
    tx: mpsc::Sender<MarketSample>,
    asset: String,
    start: NaiveDateTime,
    ticks: u64,
    pace: Duration,
) -> u64 {
    // harga dalam sen (2 desimal) supaya langkahnya bulat
    let mut px_bid: i64 = 100_00;
    let mut sent = 0;
    for i in 0..ticks {
        // jangan simpan ThreadRng melewati .await
        let (step, volume) = {
            let mut rng = rand::thread_rng();
            (rng.gen_range(-3..=3), rng.gen_range(1..=50) as f64)
        };
        px_bid = (px_bid + step).max(50_00);
        let sample = MarketSample {
            timestamp: start + chrono::Duration::seconds(i as i64),
            asset: asset.clone(),
            bid: px_bid as f64 / 100.0,
            ask: (px_bid + 1) as f64 / 100.0,
            volume,
        };
        if tx.send(sample).await.is_err() {
            debug!(%asset, sent, "mock feed: receiver closed");
            break;
        }
        sent += 1;
        if !pace.is_zero() {
            sleep(pace).await;
        }
    }
    info!(%asset, sent, "mock feed: done");
    sent
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::parse_timestamp;

    #[tokio::test]
    async fn mock_feed_is_ordered_and_never_crossed() {
        let (tx, mut rx) = mpsc::channel(256);
        let start = parse_timestamp("2025-07-13 13:00:00").unwrap();
        let sent = run_mock(tx, "BTC/USD".into(), start, 100, Duration::ZERO).await;
        assert_eq!(sent, 100);

        let mut got = Vec::new();
        while let Some(s) = rx.recv().await {
            got.push(s);
        }
        assert_eq!(got.len(), 100);
        assert_eq!(got[0].timestamp, start);
        assert!(got.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        assert!(got.iter().all(|s| s.bid < s.ask && s.bid >= 50.0));
    }

    #[tokio::test]
    async fn replay_stops_when_receiver_is_dropped() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let start = parse_timestamp("2025-07-13 13:00:00").unwrap();
        let s = MarketSample { timestamp: start, asset: "BTC/USD".into(), bid: 1.0, ask: 2.0, volume: 1.0 };
        assert_eq!(replay(tx, vec![s.clone(), s]).await, 0);
    }
}
