/// Replay captured statistics through the metrics pipeline.
///
/// Input is one statistics JSON document per line, as dumped from a real
/// producer's statistics callback. Blank lines are skipped; lines that fail to
/// decode are reported by the listener and otherwise ignored.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info};

use bench_stats::listener;
use bench_stats::report::FinalReport;
use bench_stats::STATS_CHANNEL_CAPACITY;

/// Just the timestamp of a payload, to measure the replayed span.
#[derive(Deserialize)]
struct Stamp {
    #[serde(default)]
    ts: i64,
}

pub async fn run(file: &Path, pace: Option<Duration>) -> anyhow::Result<FinalReport> {
    let raw = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("failed to read statistics capture {}", file.display()))?;

    let (tx, rx) = mpsc::channel(STATS_CHANNEL_CAPACITY);
    let listener = listener::spawn(rx, None);

    let mut first_ts = None;
    let mut last_ts = 0i64;
    let mut lines = 0usize;

    for line in raw.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Ok(stamp) = serde_json::from_str::<Stamp>(line) {
            first_ts.get_or_insert(stamp.ts);
            last_ts = stamp.ts;
        }
        if tx.send(line.to_string()).await.is_err() {
            break;
        }
        lines += 1;
        if let Some(pace) = pace {
            tokio::time::sleep(pace).await;
        }
    }
    drop(tx);

    let summary = listener.await?;
    info!(
        lines,
        computed = summary.computed,
        skipped = summary.skipped,
        undecodable = summary.undecodable,
        "Replay finished"
    );

    let span_us = (last_ts - first_ts.unwrap_or(last_ts)).max(0);
    debug!(span_us, "Replayed client time span");

    let report = FinalReport::new(&summary.state, Duration::from_micros(span_us as u64));
    info!("{report}");
    Ok(report)
}
