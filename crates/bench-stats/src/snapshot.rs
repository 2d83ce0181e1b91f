/// Typed view of the statistics document the broker client emits every
/// `statistics.interval.ms`.
///
/// Only the fields the metrics engine reads (plus a few used for debug logging)
/// are decoded. Everything else in the payload is ignored, so newer client
/// versions with extra fields decode fine.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::PRODUCE_REQUEST;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed statistics payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// One statistics event. Counters are cumulative over the client's lifetime;
/// histogram windows are recomputed by the client for every event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Snapshot {
    /// Client instance name, e.g. `rdkafka#producer-1`
    pub name: String,
    #[serde(rename = "type")]
    pub client_type: String,
    /// Snapshot time in microseconds
    #[serde(rename = "ts")]
    pub timestamp_us: i64,
    /// Messages currently waiting in the client's queues
    pub msg_cnt: i64,
    /// Total messages transmitted to brokers
    #[serde(rename = "txmsgs")]
    pub tx_messages: i64,
    /// Total message bytes transmitted to brokers
    #[serde(rename = "txmsg_bytes")]
    pub tx_message_bytes: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub brokers: HashMap<String, BrokerStats>,
    #[serde(deserialize_with = "null_as_default")]
    pub topics: HashMap<String, TopicStats>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerStats {
    pub name: String,
    pub nodeid: i32,
    pub state: String,
    /// Time messages spent in the client queue before transmission (us)
    pub int_latency: Option<Window>,
    /// Request round-trip time (us)
    pub rtt: Option<Window>,
    /// Requests sent, keyed by request type (`Produce`, `Metadata`, …)
    #[serde(deserialize_with = "null_as_default")]
    pub req: HashMap<String, i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicStats {
    pub topic: String,
    /// Produced batch sizes in bytes
    pub batchsize: Window<f64>,
}

/// Histogram summary of a rolling window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Window<T = i64> {
    pub min: T,
    pub max: T,
    pub avg: T,
    pub sum: T,
    pub cnt: i64,
}

/// `null` decodes like an absent field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl Snapshot {
    pub fn from_json(payload: &str) -> Result<Self, DecodeError> {
        Ok(serde_json::from_str(payload)?)
    }

    pub fn from_slice(payload: &[u8]) -> Result<Self, DecodeError> {
        Ok(serde_json::from_slice(payload)?)
    }

    pub fn to_json(&self) -> String {
        // Maps with string keys and plain numbers cannot fail to serialize
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl BrokerStats {
    pub fn queue_latency_avg_us(&self) -> i64 {
        self.int_latency.map(|w| w.avg).unwrap_or(0)
    }

    pub fn rtt_avg_us(&self) -> i64 {
        self.rtt.map(|w| w.avg).unwrap_or(0)
    }

    pub fn produce_requests(&self) -> i64 {
        self.req.get(PRODUCE_REQUEST).copied().unwrap_or(0)
    }
}
