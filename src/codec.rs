// ===============================
// src/codec.rs
// ===============================
//
// Historical data wire format:
//
//   timestamp,asset,bid,ask,volume
//   2025-07-13 13:00:00,BTC/USD,50000,50010,1000
//
// - First line is always a header and is never parsed as data.
// - A malformed line is reported and skipped; the rest of the file still loads.
// - Floats are written with Rust's shortest round-trip formatting, so
//   read_samples(write_samples(x)) gives back x bit for bit.
//
use std::io::{Read, Write};

use chrono::NaiveDateTime;
use csv::{ReaderBuilder, StringRecord, Trim, WriterBuilder};

use crate::domain::MarketSample;
use crate::store::DataError;

pub const HEADER: [&str; 5] = ["timestamp", "asset", "bid", "ask", "volume"];

/// Seconds resolution, fraction optional on read and omitted on write when zero.
pub const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

pub fn parse_timestamp(raw: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    NaiveDateTime::parse_from_str(raw, TS_FORMAT)
}

pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TS_FORMAT).to_string()
}

fn parse_number(rec: &StringRecord, idx: usize) -> Result<f64, String> {
    let raw = &rec[idx];
    raw.parse::<f64>().map_err(|e| format!("{} {:?}: {}", HEADER[idx], raw, e))
}

fn parse_record(rec: &StringRecord) -> Result<MarketSample, String> {
    if rec.len() != HEADER.len() {
        return Err(format!("expected {} fields, got {}", HEADER.len(), rec.len()));
    }
    let timestamp = parse_timestamp(&rec[0]).map_err(|e| format!("timestamp {:?}: {}", &rec[0], e))?;
    let asset = rec[1].to_string();
    if asset.is_empty() {
        return Err("empty asset".into());
    }
    Ok(MarketSample {
        timestamp,
        asset,
        bid: parse_number(rec, 2)?,
        ask: parse_number(rec, 3)?,
        volume: parse_number(rec, 4)?,
    })
}

/// Parse every data line. Returns well-formed samples in file order plus one
/// `DataError::Malformed` per skipped line. Domain validation (ordering,
/// crossed quotes) is left to the store.
pub fn read_samples<R: Read>(reader: R) -> (Vec<MarketSample>, Vec<DataError>) {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(reader);

    let mut samples = Vec::new();
    let mut errors = Vec::new();
    for (idx, rec) in rdr.records().enumerate() {
        // header is line 1
        let fallback_line = idx as u64 + 2;
        match rec {
            Ok(rec) => {
                let line = rec.position().map(|p| p.line()).unwrap_or(fallback_line);
                match parse_record(&rec) {
                    Ok(sample) => samples.push(sample),
                    Err(reason) => errors.push(DataError::Malformed { line, reason }),
                }
            }
            Err(e) => {
                let line = e.position().map(|p| p.line()).unwrap_or(fallback_line);
                errors.push(DataError::Malformed { line, reason: e.to_string() });
            }
        }
    }
    (samples, errors)
}

pub fn write_samples<W: Write>(writer: W, samples: &[MarketSample]) -> Result<(), DataError> {
    let mut w = WriterBuilder::new().from_writer(writer);
    w.write_record(HEADER)?;
    for s in samples {
        w.write_record([
            format_timestamp(&s.timestamp),
            s.asset.clone(),
            s.bid.to_string(),
            s.ask.to_string(),
            s.volume.to_string(),
        ])?;
    }
    w.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_lines_are_skipped_individually() {
        let raw = "timestamp,asset,bid,ask,volume\n\
                   2025-07-13 13:00:00,BTC/USD,50000,50010,1000\n\
                   2025-07-13 13:00:01,BTC/USD,oops,50010,1000\n\
                   2025-07-13 13:00:02,BTC/USD,50001\n\
                   not-a-time,BTC/USD,50001,50011,3\n\
                   2025-07-13 13:00:03,BTC/USD,50002,50012,2.5\n";
        let (samples, errors) = read_samples(raw.as_bytes());

        assert_eq!(samples.len(), 2);
        assert_eq!(samples[1].volume, 2.5);
        assert_eq!(errors.len(), 3);
        let lines: Vec<u64> = errors
            .iter()
            .map(|e| match e {
                DataError::Malformed { line, .. } => *line,
                other => panic!("unexpected error {other:?}"),
            })
            .collect();
        assert_eq!(lines, vec![3, 4, 5]);
    }

    #[test]
    fn header_only_input_yields_nothing() {
        let (samples, errors) = read_samples("timestamp,asset,bid,ask,volume\n".as_bytes());
        assert!(samples.is_empty());
        assert!(errors.is_empty());
    }

    #[test]
    fn fractional_seconds_survive_formatting() {
        let ts = parse_timestamp("2025-07-13 13:00:00.250").unwrap();
        assert_eq!(parse_timestamp(&format_timestamp(&ts)).unwrap(), ts);

        let whole = parse_timestamp("2025-07-13 13:00:00").unwrap();
        assert_eq!(format_timestamp(&whole), "2025-07-13 13:00:00");
    }

    #[test]
    fn written_output_starts_with_header() {
        let sample = MarketSample {
            timestamp: parse_timestamp("2025-07-13 13:00:00").unwrap(),
            asset: "BTC/USD".into(),
            bid: 50000.0,
            ask: 50010.5,
            volume: 1000.0,
        };
        let mut buf = Vec::new();
        write_samples(&mut buf, &[sample]).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(
            text,
            "timestamp,asset,bid,ask,volume\n2025-07-13 13:00:00,BTC/USD,50000,50010.5,1000\n"
        );
    }
}
