// ===============================
// src/recorder.rs
// ===============================
//
// JSONL trade recorder (observer of the engine's trade tap):
// - Tulis setiap Trade ke file .jsonl (append), satu baris per trade.
// - Bufer dengan BufWriter agar hemat syscall.
// - Flush periodik tiap 1s dan/atau tiap 1000 trade.
// - Otomatis membuat parent directory jika belum ada.
// - Jika tulis gagal, coba reopen file dan lanjut.
// - Tertinggal (Lagged)? dicatat, lalu lanjut dari trade terbaru.
//
// ENV: set `RECORD_FILE=/path/to/trades.jsonl` agar aktif (lihat main.rs).
//
use std::path::Path;
use tokio::{
    fs::{self, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
    sync::broadcast::{self, error::RecvError},
    time::{interval, Duration, MissedTickBehavior},
};
use tracing::{error, info, warn};

use crate::domain::Trade;

const FLUSH_EVERY_N_TRADES: u32 = 1000;

async fn open_writer(path: &str) -> std::io::Result<BufWriter<fs::File>> {
    // Pastikan parent directory ada (kalau ada)
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }
    let file = OpenOptions::new().create(true).append(true).open(path).await?;
    Ok(BufWriter::new(file))
}

async fn write_line(writer: &mut BufWriter<fs::File>, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await
}

/// Runs until every sender of the tap is dropped. Returns trades written.
pub async fn run(mut rx: broadcast::Receiver<Trade>, path: String) -> u64 {
    let mut writer = match open_writer(&path).await {
        Ok(w) => w,
        Err(e) => {
            error!(?e, %path, "recorder: open failed, recording disabled");
            return 0;
        }
    };
    info!(%path, "recorder: started");

    // Flush periodik (tiap 1 detik) + flush berbasis jumlah trade
    let mut tick = interval(Duration::from_secs(1));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut since_last_flush: u32 = 0;
    let mut written: u64 = 0;

    loop {
        tokio::select! {
            next = rx.recv() => {
                let trade = match next {
                    Ok(t) => t,
                    Err(RecvError::Lagged(n)) => {
                        warn!(skipped = n, "recorder: lagging behind, trades dropped");
                        continue;
                    }
                    Err(RecvError::Closed) => {
                        // Semua sender sudah drop: flush dan keluar
                        let _ = writer.flush().await;
                        info!(written, "recorder: tap closed, stopped");
                        break;
                    }
                };

                let line = match serde_json::to_string(&trade) {
                    Ok(s) => s,
                    Err(e) => {
                        error!(?e, "recorder: serialize error, skip trade");
                        continue;
                    }
                };

                if let Err(e) = write_line(&mut writer, &line).await {
                    error!(?e, "recorder: write failed, attempting reopen");
                    // coba lagi sekali setelah reopen
                    match open_writer(&path).await {
                        Ok(w) => writer = w,
                        Err(e2) => {
                            error!(?e2, "recorder: reopen failed, drop trade");
                            continue;
                        }
                    }
                    if let Err(e2) = write_line(&mut writer, &line).await {
                        error!(?e2, "recorder: write failed again after reopen, drop trade");
                        continue;
                    }
                }

                written += 1;
                since_last_flush += 1;
                if since_last_flush >= FLUSH_EVERY_N_TRADES {
                    let _ = writer.flush().await;
                    since_last_flush = 0;
                }
            }

            _ = tick.tick() => {
                // Flush periodik
                let _ = writer.flush().await;
                since_last_flush = 0;
            }
        }
    }
    written
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::parse_timestamp;
    use crate::domain::TradeSide;

    #[tokio::test]
    async fn writes_one_json_line_per_trade() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("trades.jsonl");
        let (tx, rx) = broadcast::channel(16);
        let task = tokio::spawn(run(rx, path.to_string_lossy().into_owned()));

        let t = Trade {
            asset: "BTC/USD".into(),
            price: 50010.0,
            volume: 1.0,
            side: TradeSide::Buy,
            timestamp: parse_timestamp("2025-07-13 13:00:00").unwrap(),
        };
        tx.send(t.clone()).unwrap();
        tx.send(t.clone()).unwrap();
        drop(tx);

        assert_eq!(task.await.unwrap(), 2);
        let body = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<Trade> = body.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines, vec![t.clone(), t]);
    }
}
