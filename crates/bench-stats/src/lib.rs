pub mod engine;
pub mod listener;
pub mod report;
pub mod snapshot;

/// Request-type key of Produce requests in a broker's `req` map
pub const PRODUCE_REQUEST: &str = "Produce";

/// Unit conversions applied to client statistics
pub const MICROS_PER_SECOND: i64 = 1_000_000;
pub const MICROS_PER_MILLI: i64 = 1_000;

/// Default statistics emission interval requested from the client
pub const DEFAULT_REPORTING_INTERVAL_MS: u64 = 1_000;

/// Capacity of the statistics channel between the client and the listener task
pub const STATS_CHANNEL_CAPACITY: usize = 64;
