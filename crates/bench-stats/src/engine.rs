/// Metrics engine: turns consecutive statistics snapshots into rate metrics.
///
/// The engine keeps the counters of the last usable snapshot (`DerivedMetrics`)
/// and differences each new snapshot against them:
///   - averages are taken across topics (batch size) and brokers (latencies)
///   - rates are counter deltas divided by the elapsed whole seconds
///   - when no seconds elapsed, rates fall back to the raw cumulative counters
///
/// The first usable snapshot is differenced against the all-zero initial state,
/// so its window spans the whole client timestamp and its rates come out low.

use tracing::debug;

use crate::snapshot::Snapshot;
use crate::{MICROS_PER_MILLI, MICROS_PER_SECOND};

/// Counters of the last usable snapshot. All zero until the first one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DerivedMetrics {
    pub last_request_count: i64,
    pub last_total_messages: i64,
    pub last_timestamp_secs: i64,
}

/// The six reportable indicators for one statistics tick.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RateMetrics {
    /// Messages transmitted per second
    pub send_rate: f64,
    /// Mean client queue time across brokers, truncated to ms
    pub queue_time_avg_ms: i64,
    /// Mean batch size across topics, in bytes
    pub batch_size_avg: f64,
    /// Produce requests per second
    pub request_rate: f64,
    /// Mean request round-trip across brokers, truncated to ms
    pub request_latency_avg_ms: i64,
    pub records_per_request: f64,
}

/// Why a snapshot could not produce metrics yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoTopics,
    EmptyBatches,
    NoBrokers,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoTopics => "no topics in statistics",
            Self::EmptyBatches => "batch size average is 0",
            Self::NoBrokers => "no brokers in statistics",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Evaluation {
    Ready {
        metrics: RateMetrics,
        state: DerivedMetrics,
    },
    Skipped(SkipReason),
}

/// Compute the metrics of `snapshot` against the `previous` state.
///
/// Pure: on `Skipped` the caller keeps `previous` as-is.
pub fn compute(snapshot: &Snapshot, previous: &DerivedMetrics) -> Evaluation {
    let topic_count = snapshot.topics.len();
    if topic_count == 0 {
        return Evaluation::Skipped(SkipReason::NoTopics);
    }
    let batch_size_avg = snapshot
        .topics
        .values()
        .map(|t| t.batchsize.avg)
        .sum::<f64>()
        / topic_count as f64;
    if batch_size_avg == 0.0 {
        return Evaluation::Skipped(SkipReason::EmptyBatches);
    }

    let broker_count = snapshot.brokers.len() as i64;
    if broker_count == 0 {
        return Evaluation::Skipped(SkipReason::NoBrokers);
    }
    let queue_latency_avg_us = snapshot
        .brokers
        .values()
        .map(|b| b.queue_latency_avg_us())
        .fold(0i64, i64::saturating_add)
        / broker_count;
    let request_latency_avg_us = snapshot
        .brokers
        .values()
        .map(|b| b.rtt_avg_us())
        .fold(0i64, i64::saturating_add)
        / broker_count;
    let request_count = snapshot
        .brokers
        .values()
        .map(|b| b.produce_requests())
        .fold(0i64, i64::saturating_add);

    let current_ts = snapshot.timestamp_us / MICROS_PER_SECOND;
    let elapsed = current_ts.saturating_sub(previous.last_timestamp_secs).max(0);

    let request_rate = if elapsed > 0 {
        request_count.saturating_sub(previous.last_request_count) as f64 / elapsed as f64
    } else {
        request_count as f64
    };

    let total_messages = snapshot.tx_messages;
    let messages_sent = total_messages.saturating_sub(previous.last_total_messages);
    let send_rate = if elapsed > 0 {
        messages_sent as f64 / elapsed as f64
    } else {
        total_messages as f64
    };

    // Idle windows with keep-alive requests still report 0 records per request
    let records_per_request = if send_rate > 0.0 && request_rate != 0.0 {
        send_rate / request_rate
    } else {
        0.0
    };

    Evaluation::Ready {
        metrics: RateMetrics {
            send_rate,
            queue_time_avg_ms: queue_latency_avg_us / MICROS_PER_MILLI,
            batch_size_avg,
            request_rate,
            request_latency_avg_ms: request_latency_avg_us / MICROS_PER_MILLI,
            records_per_request,
        },
        state: DerivedMetrics {
            last_request_count: request_count,
            last_total_messages: total_messages,
            last_timestamp_secs: current_ts,
        },
    }
}

/// Owns the derived state and applies `compute` to each incoming snapshot.
///
/// One engine per producer process. It is not shared: whoever owns it is the
/// only writer of `DerivedMetrics`.
#[derive(Debug, Default)]
pub struct MetricsEngine {
    state: DerivedMetrics,
    computed: u64,
    skipped: u64,
    undecodable: u64,
}

impl MetricsEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume from a previously derived state.
    pub fn with_state(state: DerivedMetrics) -> Self {
        Self {
            state,
            ..Self::default()
        }
    }

    pub fn ingest(&mut self, snapshot: &Snapshot) -> Option<RateMetrics> {
        match compute(snapshot, &self.state) {
            Evaluation::Ready { metrics, state } => {
                self.state = state;
                self.computed += 1;
                Some(metrics)
            }
            Evaluation::Skipped(reason) => {
                debug!(reason = reason.as_str(), ts = snapshot.timestamp_us, "Skipping statistics");
                self.skipped += 1;
                None
            }
        }
    }

    /// Decode and ingest a raw payload. Undecodable payloads leave the state untouched.
    pub fn ingest_payload(&mut self, payload: &str) -> Option<RateMetrics> {
        match Snapshot::from_json(payload) {
            Ok(snapshot) => self.ingest(&snapshot),
            Err(e) => {
                debug!(error = %e, "Dropping statistics payload");
                self.mark_undecodable();
                None
            }
        }
    }

    pub fn mark_undecodable(&mut self) {
        self.undecodable += 1;
    }

    pub fn state(&self) -> DerivedMetrics {
        self.state
    }

    pub fn computed(&self) -> u64 {
        self.computed
    }

    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    pub fn undecodable(&self) -> u64 {
        self.undecodable
    }
}
