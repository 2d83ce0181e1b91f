/// Human-readable output of the benchmark.
///
/// Both line formats are scraped by the results extraction scripts, so the
/// wording and the `name = value` layout must stay stable.

use std::fmt;
use std::time::Duration;

use crate::engine::{DerivedMetrics, RateMetrics};

impl fmt::Display for RateMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Sent rate = {:.2}/sec, duration spent in queue = {}ms, batch size = {:.2}, request rate = {:.2}/sec, request latency avg = {}ms, records per ProduceRequest = {:.2}",
            self.send_rate,
            self.queue_time_avg_ms,
            self.batch_size_avg,
            self.request_rate,
            self.request_latency_avg_ms,
            self.records_per_request,
        )
    }
}

/// End-of-run summary, built from the listener's final state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FinalReport {
    pub messages: i64,
    pub requests: i64,
    pub elapsed: Duration,
}

impl FinalReport {
    pub fn new(state: &DerivedMetrics, elapsed: Duration) -> Self {
        Self {
            messages: state.last_total_messages,
            requests: state.last_request_count,
            elapsed,
        }
    }
}

impl fmt::Display for FinalReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "REPORT: Produced {} with {} ProduceRequests in {}ms",
            self.messages,
            self.requests,
            self.elapsed.as_millis()
        )
    }
}
