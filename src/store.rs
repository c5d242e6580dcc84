// ===============================
// src/store.rs (market data + alternative data)
// ===============================
//
// - One shard per asset: Arc<Mutex<Vec<MarketSample>>>. The asset index itself
//   sits behind an RwLock that is only written when a new asset appears.
// - Every read hands out a copy; callers never see a series mid-append.
// - Validation is per record: a bad sample is logged, counted and skipped.
//
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;

use ahash::AHashMap as HashMap;
use chrono::NaiveDateTime;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::codec;
use crate::domain::{AlternativeRecord, MarketSample};
use crate::metrics::{ALT_RECORDS, SAMPLES, SAMPLES_REJECTED};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DataError {
    #[error("line {line}: malformed record ({reason})")]
    Malformed { line: u64, reason: String },
    #[error("{asset}: timestamp {timestamp} is not after last stored {last}")]
    OutOfOrder { asset: String, timestamp: NaiveDateTime, last: NaiveDateTime },
    #[error("{asset} @ {timestamp}: crossed quote (bid {bid} > ask {ask})")]
    CrossedQuote { asset: String, timestamp: NaiveDateTime, bid: f64, ask: f64 },
    #[error("{asset} @ {timestamp}: negative volume {volume}")]
    NegativeVolume { asset: String, timestamp: NaiveDateTime, volume: f64 },
    #[error("{asset} @ {timestamp}: non-finite price or volume")]
    NonFinite { asset: String, timestamp: NaiveDateTime },
    #[error("{asset} @ {timestamp}: non-positive quote (bid {bid}, ask {ask})")]
    NonPositivePrice { asset: String, timestamp: NaiveDateTime, bid: f64, ask: f64 },
    #[error("asset name {0:?} is empty or has surrounding whitespace")]
    InvalidAsset(String),
    #[error("sample for {found} offered to series {expected}")]
    AssetMismatch { expected: String, found: String },
    #[error("io: {0}")]
    Io(String),
}

impl DataError {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            DataError::Malformed { .. } => "malformed",
            DataError::OutOfOrder { .. } => "out_of_order",
            DataError::CrossedQuote { .. } => "crossed_quote",
            DataError::NegativeVolume { .. } => "negative_volume",
            DataError::NonFinite { .. } => "non_finite",
            DataError::NonPositivePrice { .. } => "non_positive_price",
            DataError::InvalidAsset(_) => "invalid_asset",
            DataError::AssetMismatch { .. } => "asset_mismatch",
            DataError::Io(_) => "io",
        }
    }
}

impl From<std::io::Error> for DataError {
    fn from(e: std::io::Error) -> Self { DataError::Io(e.to_string()) }
}

impl From<csv::Error> for DataError {
    fn from(e: csv::Error) -> Self { DataError::Io(e.to_string()) }
}

/// Outcome of one ingest call. Rejections never abort the batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestReport {
    pub accepted: usize,
    pub rejected: Vec<DataError>,
}

impl IngestReport {
    fn merge(&mut self, other: IngestReport) {
        self.accepted += other.accepted;
        self.rejected.extend(other.rejected);
    }
}

/// Producer of opaque alternative records (news, sentiment, on-chain events).
pub trait AlternativeDataSource: Send {
    fn name(&self) -> &str;
    /// Records available since the previous call.
    fn fetch(&mut self) -> Vec<AlternativeRecord>;
}

/// Fixed batch of records, handed out once.
pub struct StaticSource {
    name: String,
    pending: Vec<AlternativeRecord>,
}

impl StaticSource {
    pub fn new(name: impl Into<String>, records: Vec<AlternativeRecord>) -> Self {
        Self { name: name.into(), pending: records }
    }
}

impl AlternativeDataSource for StaticSource {
    fn name(&self) -> &str { &self.name }
    fn fetch(&mut self) -> Vec<AlternativeRecord> { std::mem::take(&mut self.pending) }
}

type Series = Arc<Mutex<Vec<MarketSample>>>;

#[derive(Default)]
pub struct MarketDataStore {
    series: RwLock<HashMap<String, Series>>,
    alternative: Mutex<HashMap<String, Vec<AlternativeRecord>>>,
}

fn validate(asset: &str, last: Option<&MarketSample>, s: &MarketSample) -> Result<(), DataError> {
    if s.asset != asset {
        return Err(DataError::AssetMismatch { expected: asset.to_string(), found: s.asset.clone() });
    }
    // the wire format trims fields, so a padded name would not survive a reload
    if s.asset.is_empty() || s.asset.trim() != s.asset {
        return Err(DataError::InvalidAsset(s.asset.clone()));
    }
    if !(s.bid.is_finite() && s.ask.is_finite() && s.volume.is_finite()) {
        return Err(DataError::NonFinite { asset: s.asset.clone(), timestamp: s.timestamp });
    }
    if s.bid <= 0.0 || s.ask <= 0.0 {
        return Err(DataError::NonPositivePrice { asset: s.asset.clone(), timestamp: s.timestamp, bid: s.bid, ask: s.ask });
    }
    if s.bid > s.ask {
        return Err(DataError::CrossedQuote { asset: s.asset.clone(), timestamp: s.timestamp, bid: s.bid, ask: s.ask });
    }
    if s.volume < 0.0 {
        return Err(DataError::NegativeVolume { asset: s.asset.clone(), timestamp: s.timestamp, volume: s.volume });
    }
    if let Some(prev) = last {
        if s.timestamp <= prev.timestamp {
            return Err(DataError::OutOfOrder { asset: s.asset.clone(), timestamp: s.timestamp, last: prev.timestamp });
        }
    }
    Ok(())
}

fn reject(err: DataError, report: &mut IngestReport) {
    warn!(error = %err, "market sample rejected");
    SAMPLES_REJECTED.with_label_values(&[err.kind()]).inc();
    report.rejected.push(err);
}

impl MarketDataStore {
    pub fn new() -> Self { Self::default() }

    fn existing(&self, asset: &str) -> Option<Series> {
        self.series.read().get(asset).cloned()
    }

    fn shard(&self, asset: &str) -> Series {
        if let Some(s) = self.existing(asset) {
            return s;
        }
        self.series.write().entry(asset.to_string()).or_default().clone()
    }

    /// Validate and append `samples` to `asset`'s series, in order.
    pub fn ingest<I>(&self, asset: &str, samples: I) -> IngestReport
    where
        I: IntoIterator<Item = MarketSample>,
    {
        let shard = self.shard(asset);
        let mut report = IngestReport::default();
        let mut series = shard.lock();
        for sample in samples {
            match validate(asset, series.last(), &sample) {
                Ok(()) => {
                    series.push(sample);
                    report.accepted += 1;
                }
                Err(e) => reject(e, &mut report),
            }
        }
        drop(series);
        SAMPLES.with_label_values(&[asset]).inc_by(report.accepted as u64);
        debug!(%asset, accepted = report.accepted, rejected = report.rejected.len(), "ingest");
        report
    }

    /// Single-sample ingest used by the live path.
    pub fn ingest_one(&self, sample: MarketSample) -> Result<(), DataError> {
        let asset = sample.asset.clone();
        let mut report = self.ingest(&asset, std::iter::once(sample));
        match report.rejected.pop() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Snapshot copy of `asset`'s ordered series (empty when unknown).
    pub fn query(&self, asset: &str) -> Vec<MarketSample> {
        self.existing(asset).map(|s| s.lock().clone()).unwrap_or_default()
    }

    pub fn len(&self, asset: &str) -> usize {
        self.existing(asset).map(|s| s.lock().len()).unwrap_or(0)
    }

    pub fn last_timestamp(&self, asset: &str) -> Option<NaiveDateTime> {
        self.existing(asset).and_then(|s| s.lock().last().map(|x| x.timestamp))
    }

    /// Assets with at least one stored sample, sorted.
    pub fn assets(&self) -> Vec<String> {
        let shards: Vec<(String, Series)> =
            self.series.read().iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        let mut out: Vec<String> = shards
            .into_iter()
            .filter(|(_, s)| !s.lock().is_empty())
            .map(|(k, _)| k)
            .collect();
        out.sort();
        out
    }

    /// Pull everything the source has and append it under the source's name.
    /// No ordering constraint applies to alternative data.
    pub fn ingest_alternative(&self, source: &mut dyn AlternativeDataSource) -> usize {
        let name = source.name().to_string();
        let records = source.fetch();
        let n = records.len();
        self.alternative.lock().entry(name.clone()).or_default().extend(records);
        ALT_RECORDS.with_label_values(&[name.as_str()]).inc_by(n as u64);
        info!(source = %name, records = n, "alternative data ingested");
        n
    }

    pub fn alternative(&self, source: &str) -> Vec<AlternativeRecord> {
        self.alternative.lock().get(source).cloned().unwrap_or_default()
    }

    /// Ingest the delimited wire format. Each record goes to the series named
    /// in its own asset column.
    pub fn load<R: Read>(&self, reader: R) -> IngestReport {
        let (samples, malformed) = codec::read_samples(reader);
        let mut report = IngestReport::default();
        for e in malformed {
            reject(e, &mut report);
        }
        for sample in samples {
            let asset = sample.asset.clone();
            report.merge(self.ingest(&asset, std::iter::once(sample)));
        }
        report
    }

    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<IngestReport, DataError> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let report = self.load(BufReader::new(file));
        info!(path = %path.display(), accepted = report.accepted, rejected = report.rejected.len(), "historical data loaded");
        Ok(report)
    }

    /// Write `asset`'s current series in the wire format. Returns the number
    /// of records written. The copy is taken first; no lock is held during I/O.
    pub fn save<W: Write>(&self, asset: &str, writer: W) -> Result<usize, DataError> {
        let snapshot = self.query(asset);
        codec::write_samples(writer, &snapshot)?;
        Ok(snapshot.len())
    }

    pub fn save_file(&self, asset: &str, path: impl AsRef<Path>) -> Result<usize, DataError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let n = self.save(asset, BufWriter::new(File::create(path)?))?;
        info!(%asset, path = %path.display(), records = n, "snapshot saved");
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::parse_timestamp;
    use serde_json::json;

    fn sample(ts: &str, bid: f64, ask: f64) -> MarketSample {
        MarketSample { timestamp: parse_timestamp(ts).unwrap(), asset: "BTC/USD".into(), bid, ask, volume: 1.0 }
    }

    #[test]
    fn rejects_out_of_order_and_crossed_but_keeps_going() {
        let store = MarketDataStore::new();
        let report = store.ingest(
            "BTC/USD",
            vec![
                sample("2025-07-13 13:00:01", 100.0, 101.0),
                sample("2025-07-13 13:00:01", 100.0, 101.0), // duplicate timestamp
                sample("2025-07-13 13:00:00", 100.0, 101.0), // older
                sample("2025-07-13 13:00:02", 102.0, 101.0), // crossed
                sample("2025-07-13 13:00:03", 101.0, 101.0), // bid == ask is fine
            ],
        );
        assert_eq!(report.accepted, 2);
        let kinds: Vec<_> = report.rejected.iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, vec!["out_of_order", "out_of_order", "crossed_quote"]);
        assert_eq!(store.len("BTC/USD"), 2);
    }

    #[test]
    fn ordering_is_checked_across_batches() {
        let store = MarketDataStore::new();
        store.ingest("BTC/USD", vec![sample("2025-07-13 13:00:05", 1.0, 2.0)]);
        let err = store.ingest_one(sample("2025-07-13 13:00:04", 1.0, 2.0)).unwrap_err();
        assert!(matches!(err, DataError::OutOfOrder { .. }));
    }

    #[test]
    fn negative_volume_and_nan_are_rejected() {
        let store = MarketDataStore::new();
        let mut neg = sample("2025-07-13 13:00:00", 1.0, 2.0);
        neg.volume = -1.0;
        let nan = sample("2025-07-13 13:00:01", f64::NAN, 2.0);
        let report = store.ingest("BTC/USD", vec![neg, nan]);
        assert_eq!(report.accepted, 0);
        assert_eq!(report.rejected.len(), 2);
    }

    #[test]
    fn zero_and_negative_quotes_are_rejected() {
        let store = MarketDataStore::new();
        let report = store.ingest(
            "BTC/USD",
            vec![
                sample("2025-07-13 13:00:00", 0.0, 0.01),
                sample("2025-07-13 13:00:01", -1.0, 2.0),
                sample("2025-07-13 13:00:02", 0.01, 0.02),
            ],
        );
        assert_eq!(report.accepted, 1);
        let kinds: Vec<_> = report.rejected.iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, vec!["non_positive_price", "non_positive_price"]);
    }

    #[test]
    fn padded_asset_names_are_rejected() {
        let store = MarketDataStore::new();
        let mut padded = sample("2025-07-13 13:00:00", 1.0, 2.0);
        padded.asset = " BTC/USD".into();
        assert_eq!(store.ingest_one(padded), Err(DataError::InvalidAsset(" BTC/USD".into())));
        assert!(store.assets().is_empty());
    }

    #[test]
    fn wrong_asset_is_rejected() {
        let store = MarketDataStore::new();
        let report = store.ingest("ETH/USD", vec![sample("2025-07-13 13:00:00", 1.0, 2.0)]);
        assert!(matches!(report.rejected[0], DataError::AssetMismatch { .. }));
    }

    #[test]
    fn query_returns_a_detached_copy() {
        let store = MarketDataStore::new();
        store.ingest("BTC/USD", vec![sample("2025-07-13 13:00:00", 1.0, 2.0)]);
        let snap = store.query("BTC/USD");
        store.ingest("BTC/USD", vec![sample("2025-07-13 13:00:01", 1.0, 2.0)]);
        assert_eq!(snap.len(), 1);
        assert_eq!(store.query("BTC/USD").len(), 2);
        assert!(store.query("DOGE/USD").is_empty());
    }

    #[test]
    fn load_routes_records_by_asset_column() {
        let raw = "timestamp,asset,bid,ask,volume\n\
                   2025-07-13 13:00:00,BTC/USD,50000,50010,1\n\
                   2025-07-13 13:00:00,ETH/USD,3000,3001,2\n\
                   garbage\n\
                   2025-07-13 13:00:01,BTC/USD,50001,50011,1\n";
        let store = MarketDataStore::new();
        let report = store.load(raw.as_bytes());
        assert_eq!(report.accepted, 3);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(store.assets(), vec!["BTC/USD".to_string(), "ETH/USD".to_string()]);
        assert_eq!(store.len("BTC/USD"), 2);
    }

    #[test]
    fn alternative_records_accumulate_per_source() {
        let store = MarketDataStore::new();
        let rec = AlternativeRecord {
            timestamp: parse_timestamp("2025-07-13 13:00:00").unwrap(),
            source: "news".into(),
            payload: json!({"sentiment": "positive", "event": "Market news update"}),
        };
        let mut src = StaticSource::new("news", vec![rec.clone(), rec.clone()]);
        assert_eq!(store.ingest_alternative(&mut src), 2);
        // a drained source contributes nothing more
        assert_eq!(store.ingest_alternative(&mut src), 0);
        assert_eq!(store.alternative("news"), vec![rec.clone(), rec]);
        assert!(store.alternative("twitter").is_empty());
    }

    #[test]
    fn concurrent_ingest_keeps_each_series_ordered() {
        let store = Arc::new(MarketDataStore::new());
        let handles: Vec<_> = ["A", "B", "C"]
            .into_iter()
            .map(|asset| {
                let store = store.clone();
                std::thread::spawn(move || {
                    let base = parse_timestamp("2025-07-13 13:00:00").unwrap();
                    for i in 0..200 {
                        let s = MarketSample {
                            timestamp: base + chrono::Duration::seconds(i),
                            asset: asset.into(),
                            bid: 1.0,
                            ask: 1.5,
                            volume: 1.0,
                        };
                        store.ingest_one(s).unwrap();
                        let _ = store.query(asset);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        for asset in ["A", "B", "C"] {
            let series = store.query(asset);
            assert_eq!(series.len(), 200);
            assert!(series.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        }
    }
}
