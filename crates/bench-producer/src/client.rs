/// In-process stand-in for a Kafka producer client.
///
/// Messages are queued per topic partition and packed into batches the way a
/// real client does it: a partition is transmitted once it holds
/// `batch.num.messages` records or `batch.size` bytes, or once its oldest
/// record has waited `linger.ms`. Each transmitted batch counts as one Produce
/// request to the partition's leader broker.
///
/// `statistics()` renders the same JSON document a librdkafka client emits on
/// its statistics callback, so the metrics pipeline runs unchanged against it.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};

use thiserror::Error;

use bench_stats::snapshot::{BrokerStats, Snapshot, TopicStats, Window};
use bench_stats::{DEFAULT_REPORTING_INTERVAL_MS, PRODUCE_REQUEST};

use crate::config::{ClientProperties, STATISTICS_INTERVAL_PROPERTY};

/// RecordBatch v2 header size
const BATCH_OVERHEAD_BYTES: usize = 61;
/// Approximate per-record framing (length, attributes, deltas, header count)
const RECORD_OVERHEAD_BYTES: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub batch_num_messages: usize,
    pub batch_size: usize,
    pub linger: Duration,
    pub queue_max_messages: usize,
    pub statistics_interval: Duration,
    pub brokers: usize,
    /// Partitions per topic
    pub partitions: usize,
    pub rtt: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            batch_num_messages: 10_000,
            batch_size: 1_000_000,
            linger: Duration::from_millis(5),
            queue_max_messages: 100_000,
            statistics_interval: Duration::from_millis(DEFAULT_REPORTING_INTERVAL_MS),
            brokers: 3,
            partitions: 3,
            rtt: Duration::from_micros(2000),
        }
    }
}

impl ClientSettings {
    pub fn from_properties(props: &ClientProperties) -> anyhow::Result<Self> {
        let d = Self::default();
        let settings = Self {
            batch_num_messages: props.parse_or("batch.num.messages", d.batch_num_messages)?.max(1),
            batch_size: props.parse_or("batch.size", d.batch_size)?.max(1),
            linger: Duration::from_millis(props.parse_or("linger.ms", d.linger.as_millis() as u64)?),
            queue_max_messages: props
                .parse_or("queue.buffering.max.messages", d.queue_max_messages)?
                .max(1),
            statistics_interval: Duration::from_millis(props.parse_or(
                STATISTICS_INTERVAL_PROPERTY,
                d.statistics_interval.as_millis() as u64,
            )?),
            brokers: props.parse_or("sim.brokers", d.brokers)?.max(1),
            partitions: props.parse_or("sim.partitions", d.partitions)?.max(1),
            rtt: Duration::from_micros(props.parse_or("sim.rtt.us", d.rtt.as_micros() as u64)?),
        };
        Ok(settings)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("local queue full ({queued} messages)")]
pub struct QueueFull {
    pub queued: usize,
}

// ── Histogram windows ────────────────────────────────────────

/// Running min/max/sum over one statistics interval.
#[derive(Debug, Default)]
struct Histogram {
    min: i64,
    max: i64,
    sum: i64,
    cnt: i64,
}

impl Histogram {
    fn record(&mut self, value: i64) {
        if self.cnt == 0 || value < self.min {
            self.min = value;
        }
        self.max = self.max.max(value);
        self.sum += value;
        self.cnt += 1;
    }

    fn window(&self) -> Window {
        Window {
            min: self.min,
            max: self.max,
            avg: if self.cnt > 0 { self.sum / self.cnt } else { 0 },
            sum: self.sum,
            cnt: self.cnt,
        }
    }

    fn window_f64(&self) -> Window<f64> {
        let w = self.window();
        Window {
            min: w.min as f64,
            max: w.max as f64,
            avg: w.avg as f64,
            sum: w.sum as f64,
            cnt: w.cnt,
        }
    }
}

// ── Client ───────────────────────────────────────────────────

struct Queued {
    enqueued: Instant,
    bytes: usize,
}

#[derive(Default)]
struct PartitionQueue {
    records: VecDeque<Queued>,
    bytes: usize,
}

struct TopicQueue {
    partitions: Vec<PartitionQueue>,
    /// Partition keyless records stick to until its batch goes out
    sticky: usize,
    batchsize: Histogram,
}

#[derive(Default)]
struct BrokerCounters {
    produce_requests: i64,
    int_latency: Histogram,
    rtt: Histogram,
}

pub struct SimulatedClient {
    settings: ClientSettings,
    started: Instant,
    topics: BTreeMap<String, TopicQueue>,
    brokers: Vec<BrokerCounters>,
    queued: usize,
    tx_messages: i64,
    tx_message_bytes: i64,
}

impl SimulatedClient {
    pub fn new(settings: ClientSettings, started: Instant) -> Self {
        let brokers = (0..settings.brokers).map(|_| BrokerCounters::default()).collect();
        Self {
            settings,
            started,
            topics: BTreeMap::new(),
            brokers,
            queued: 0,
            tx_messages: 0,
            tx_message_bytes: 0,
        }
    }

    /// Enqueue one record. Full batches are transmitted right away.
    pub fn produce(
        &mut self,
        topic: &str,
        key: Option<&str>,
        payload: &str,
        now: Instant,
    ) -> Result<(), QueueFull> {
        if self.queued >= self.settings.queue_max_messages {
            return Err(QueueFull { queued: self.queued });
        }

        let partitions = self.settings.partitions;
        let queue = self
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| TopicQueue {
                partitions: (0..partitions).map(|_| PartitionQueue::default()).collect(),
                sticky: 0,
                batchsize: Histogram::default(),
            });
        let partition = match key {
            Some(key) => partition_for_key(key, partitions),
            None => queue.sticky,
        };

        let bytes = payload.len() + key.map_or(0, str::len) + RECORD_OVERHEAD_BYTES;
        let pq = &mut queue.partitions[partition];
        pq.records.push_back(Queued { enqueued: now, bytes });
        pq.bytes += bytes;
        self.queued += 1;

        if pq.records.len() >= self.settings.batch_num_messages || pq.bytes >= self.settings.batch_size {
            self.transmit(topic, partition, now);
        }
        Ok(())
    }

    /// Transmit every partition whose oldest record has lingered long enough.
    /// Returns the number of records sent.
    pub fn poll(&mut self, now: Instant) -> usize {
        let linger = self.settings.linger;
        let due: Vec<(String, usize)> = self
            .topics
            .iter()
            .flat_map(|(name, queue)| {
                queue.partitions.iter().enumerate().filter_map(move |(p, pq)| {
                    pq.records
                        .front()
                        .filter(|oldest| now.saturating_duration_since(oldest.enqueued) >= linger)
                        .map(|_| (name.clone(), p))
                })
            })
            .collect();

        due.iter()
            .map(|(topic, partition)| self.transmit(topic, *partition, now))
            .sum()
    }

    /// Transmit everything still queued, regardless of linger.
    pub fn flush(&mut self, now: Instant) -> usize {
        let all: Vec<(String, usize)> = self
            .topics
            .iter()
            .flat_map(|(name, queue)| {
                queue
                    .partitions
                    .iter()
                    .enumerate()
                    .filter(|(_, pq)| !pq.records.is_empty())
                    .map(move |(p, _)| (name.clone(), p))
            })
            .collect();

        all.iter()
            .map(|(topic, partition)| self.transmit(topic, *partition, now))
            .sum()
    }

    /// Records accepted but not yet transmitted.
    pub fn in_flight(&self) -> usize {
        self.queued
    }

    /// Render a statistics document and start new histogram windows.
    pub fn statistics(&mut self, now: Instant) -> String {
        let ts = now.saturating_duration_since(self.started).as_micros() as i64;

        let brokers = self
            .brokers
            .iter_mut()
            .enumerate()
            .map(|(id, counters)| {
                let name = format!("sim-broker-{id}:9092/{id}");
                let stats = BrokerStats {
                    name: name.clone(),
                    nodeid: id as i32,
                    state: "UP".to_string(),
                    int_latency: Some(counters.int_latency.window()),
                    rtt: Some(counters.rtt.window()),
                    req: HashMap::from([
                        (PRODUCE_REQUEST.to_string(), counters.produce_requests),
                        ("Metadata".to_string(), 1),
                    ]),
                };
                counters.int_latency = Histogram::default();
                counters.rtt = Histogram::default();
                (name, stats)
            })
            .collect();

        let topics = self
            .topics
            .iter_mut()
            .map(|(name, queue)| {
                let stats = TopicStats {
                    topic: name.clone(),
                    batchsize: queue.batchsize.window_f64(),
                };
                queue.batchsize = Histogram::default();
                (name.clone(), stats)
            })
            .collect();

        Snapshot {
            name: "rdkafka#producer-1".to_string(),
            client_type: "producer".to_string(),
            timestamp_us: ts,
            msg_cnt: self.queued as i64,
            tx_messages: self.tx_messages,
            tx_message_bytes: self.tx_message_bytes,
            brokers,
            topics,
        }
        .to_json()
    }

    /// Drain `topic`/`partition`, one Produce request per batch.
    fn transmit(&mut self, topic: &str, partition: usize, now: Instant) -> usize {
        let Some(queue) = self.topics.get_mut(topic) else {
            return 0;
        };
        let broker = &mut self.brokers[partition % self.settings.brokers];
        let pq = &mut queue.partitions[partition];
        let mut sent = 0;

        while !pq.records.is_empty() {
            let mut count = 0usize;
            let mut bytes = BATCH_OVERHEAD_BYTES;
            while count < self.settings.batch_num_messages {
                let Some(record) = pq.records.front() else {
                    break;
                };
                // Always take at least one record, even if it alone exceeds batch.size
                if count > 0 && bytes + record.bytes > self.settings.batch_size {
                    break;
                }
                let latency = now.saturating_duration_since(record.enqueued).as_micros() as i64;
                broker.int_latency.record(latency);
                bytes += record.bytes;
                pq.bytes -= record.bytes;
                pq.records.pop_front();
                count += 1;
            }

            queue.batchsize.record(bytes as i64);
            broker.produce_requests += 1;
            // Round trip grows with the batch: 1us per KB on top of the base
            broker
                .rtt
                .record(self.settings.rtt.as_micros() as i64 + (bytes / 1024) as i64);

            self.tx_messages += count as i64;
            self.tx_message_bytes += bytes as i64;
            sent += count;
        }

        if queue.sticky == partition {
            queue.sticky = (partition + 1) % self.settings.partitions;
        }
        self.queued -= sent;
        sent
    }
}

fn partition_for_key(key: &str, partitions: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % partitions as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> ClientSettings {
        ClientSettings {
            batch_num_messages: 4,
            batch_size: 1_000_000,
            linger: Duration::from_millis(5),
            queue_max_messages: 10,
            brokers: 2,
            partitions: 2,
            ..ClientSettings::default()
        }
    }

    fn decode(payload: &str) -> Snapshot {
        Snapshot::from_json(payload).unwrap()
    }

    fn produce_requests(snapshot: &Snapshot) -> i64 {
        snapshot.brokers.values().map(|b| b.produce_requests()).sum()
    }

    #[test]
    fn test_settings_from_properties() {
        let mut props = ClientProperties::default();
        props.set("linger.ms", "20");
        props.set("batch.num.messages", "0");
        props.set("sim.brokers", "5");
        props.set(STATISTICS_INTERVAL_PROPERTY, "250");

        let s = ClientSettings::from_properties(&props).unwrap();
        assert_eq!(s.linger, Duration::from_millis(20));
        assert_eq!(s.batch_num_messages, 1);
        assert_eq!(s.brokers, 5);
        assert_eq!(s.statistics_interval, Duration::from_millis(250));
        assert_eq!(s.batch_size, 1_000_000);

        props.set("linger.ms", "soon");
        assert!(ClientSettings::from_properties(&props).is_err());
    }

    #[test]
    fn test_full_batch_transmits_immediately() {
        let t0 = Instant::now();
        let mut client = SimulatedClient::new(settings(), t0);
        for _ in 0..4 {
            client.produce("t", None, "hello", t0).unwrap();
        }
        assert_eq!(client.in_flight(), 0);

        let snap = decode(&client.statistics(t0));
        assert_eq!(snap.tx_messages, 4);
        assert_eq!(produce_requests(&snap), 1);
        let batch = snap.topics["t"].batchsize;
        assert_eq!(batch.cnt, 1);
        assert_eq!(batch.avg, (BATCH_OVERHEAD_BYTES + 4 * (5 + RECORD_OVERHEAD_BYTES)) as f64);
    }

    #[test]
    fn test_linger_holds_partial_batch() {
        let t0 = Instant::now();
        let mut client = SimulatedClient::new(settings(), t0);
        client.produce("t", None, "a", t0).unwrap();
        client.produce("t", None, "b", t0).unwrap();

        assert_eq!(client.poll(t0 + Duration::from_millis(1)), 0);
        assert_eq!(client.in_flight(), 2);

        let later = t0 + Duration::from_millis(6);
        assert_eq!(client.poll(later), 2);
        assert_eq!(client.in_flight(), 0);

        let snap = decode(&client.statistics(later));
        // Both records waited 6ms in the queue
        let latency = snap.brokers.values().find_map(|b| b.int_latency.filter(|w| w.cnt > 0)).unwrap();
        assert_eq!(latency.avg, 6000);
    }

    #[test]
    fn test_queue_full() {
        let t0 = Instant::now();
        let mut client = SimulatedClient::new(
            ClientSettings { batch_num_messages: 100, ..settings() },
            t0,
        );
        for _ in 0..10 {
            client.produce("t", Some("k"), "v", t0).unwrap();
        }
        assert_eq!(client.produce("t", Some("k"), "v", t0), Err(QueueFull { queued: 10 }));

        assert_eq!(client.flush(t0), 10);
        assert!(client.produce("t", Some("k"), "v", t0).is_ok());
    }

    #[test]
    fn test_same_key_same_partition() {
        let t0 = Instant::now();
        let mut client = SimulatedClient::new(
            ClientSettings { batch_num_messages: 100, partitions: 8, brokers: 8, ..settings() },
            t0,
        );
        for _ in 0..5 {
            client.produce("t", Some("user-42"), "v", t0).unwrap();
        }
        client.flush(t0);

        let snap = decode(&client.statistics(t0));
        // One partition, so one batch and one request
        assert_eq!(produce_requests(&snap), 1);
        assert_eq!(snap.tx_messages, 5);
    }

    #[test]
    fn test_oversized_batch_splits() {
        let t0 = Instant::now();
        let mut client = SimulatedClient::new(
            ClientSettings { batch_num_messages: 100, batch_size: 100, ..settings() },
            t0,
        );
        let payload = "x".repeat(40);
        client.produce("t", None, &payload, t0).unwrap();
        client.produce("t", None, &payload, t0).unwrap();
        assert_eq!(client.in_flight(), 0);

        let snap = decode(&client.statistics(t0));
        assert_eq!(snap.tx_messages, 2);
        assert_eq!(produce_requests(&snap), 2);
    }

    #[test]
    fn test_statistics_reset_windows_keep_counters() {
        let t0 = Instant::now();
        let mut client = SimulatedClient::new(settings(), t0);
        for _ in 0..8 {
            client.produce("t", None, "v", t0).unwrap();
        }

        let first = decode(&client.statistics(t0 + Duration::from_secs(1)));
        assert_eq!(first.timestamp_us, 1_000_000);
        assert_eq!(first.topics["t"].batchsize.cnt, 2);

        let second = decode(&client.statistics(t0 + Duration::from_secs(2)));
        assert_eq!(second.tx_messages, 8);
        assert_eq!(produce_requests(&second), 2);
        assert_eq!(second.topics["t"].batchsize.avg, 0.0);
        assert!(second.brokers.values().all(|b| b.rtt_avg_us() == 0));
    }
}
