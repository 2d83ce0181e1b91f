/// Simulated produce run.
///
/// Three pieces run side by side:
///   - the produce loop, pacing sends through the configured traffic generator
///   - a statistics task, emitting a client statistics payload every interval
///   - the bench-stats listener, turning those payloads into rate metrics
///
/// The run ends after every message is flushed: one last statistics payload
/// is emitted, the channel closes and the listener's final state becomes the
/// REPORT line.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use bench_stats::listener;
use bench_stats::report::FinalReport;
use bench_stats::STATS_CHANNEL_CAPACITY;

use crate::client::{ClientSettings, SimulatedClient};
use crate::config::BenchConfig;
use crate::gen::{FakeData, FAKE_DATA_PER_TOPIC};
use crate::traffic;

/// How long the produce loop backs off when the client queue stays full
const QUEUE_FULL_BACKOFF: Duration = Duration::from_millis(500);
const PROGRESS_EVERY: u64 = 100_000;
/// Let the statistics task run on single-threaded runtimes
const YIELD_EVERY: u64 = 1_000;

type SharedClient = Arc<Mutex<SimulatedClient>>;

fn lock(client: &SharedClient) -> std::sync::MutexGuard<'_, SimulatedClient> {
    client.lock().unwrap_or_else(PoisonError::into_inner)
}

pub async fn run(config: &BenchConfig) -> anyhow::Result<FinalReport> {
    let bench = &config.benchmark;
    let settings = ClientSettings::from_properties(&config.client_properties())?;
    let interval = settings.statistics_interval;
    let topics = config.topic_names();

    info!(
        topics = bench.nb_topics,
        messages = bench.nb_messages,
        message_size = bench.message_size,
        random_keys = bench.use_random_keys,
        traffic = ?bench.traffic,
        "Running benchmark"
    );
    if bench.agg_per_topic_nb_messages > 1 {
        info!(
            every = bench.agg_per_topic_nb_messages,
            "Grouping per topic, bulk send"
        );
    }

    let data = FakeData::generate(
        &mut StdRng::from_entropy(),
        bench.nb_topics * FAKE_DATA_PER_TOPIC,
        bench.message_size,
    );
    debug!(pool = data.len(), "Fake data generated");
    let mut pacing = traffic::for_kind(bench.traffic, bench.messages_per_sec);

    let (stats_tx, stats_rx) = mpsc::channel(STATS_CHANNEL_CAPACITY);
    let listener = listener::spawn(stats_rx, None);

    let client: SharedClient = Arc::new(Mutex::new(SimulatedClient::new(settings, Instant::now())));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let ticker = spawn_statistics(Arc::clone(&client), stats_tx.clone(), interval, shutdown_rx);

    let start = Instant::now();
    let agg = bench.agg_per_topic_nb_messages;
    let mut pending: Vec<Vec<u64>> = vec![Vec::new(); topics.len()];
    let mut sent = 0u64;

    for i in 0..bench.nb_messages {
        let wait = pacing.next_wait();
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }

        let topic_idx = (i % topics.len() as u64) as usize;
        if agg > 1 {
            pending[topic_idx].push(i);
            if (i + 1) % agg == 0 {
                for (idx, batch) in pending.iter_mut().enumerate() {
                    for msg in batch.drain(..) {
                        send(&client, &topics[idx], &data, msg, bench.use_random_keys, &mut sent).await;
                    }
                }
            }
        } else {
            send(&client, &topics[topic_idx], &data, i, bench.use_random_keys, &mut sent).await;
        }

        if (i + 1) % YIELD_EVERY == 0 {
            tokio::task::yield_now().await;
        }
    }

    // Groups still short of a full bulk at the end of the run
    for (idx, batch) in pending.iter_mut().enumerate() {
        for msg in batch.drain(..) {
            send(&client, &topics[idx], &data, msg, bench.use_random_keys, &mut sent).await;
        }
    }

    loop {
        let mut c = lock(&client);
        if c.in_flight() == 0 {
            break;
        }
        info!(in_flight = c.in_flight(), "Flushing outstanding messages");
        c.flush(Instant::now());
    }
    let elapsed = start.elapsed();

    let _ = shutdown_tx.send(true);
    if let Err(e) = ticker.await {
        warn!(error = %e, "Statistics task failed");
    }

    // Last payload so the report covers every flushed message
    let last = lock(&client).statistics(Instant::now());
    if stats_tx.send(last).await.is_err() {
        warn!("Statistics listener stopped early");
    }
    drop(stats_tx);

    let summary = listener.await?;
    debug!(
        sent,
        computed = summary.computed,
        skipped = summary.skipped,
        "Benchmark finished"
    );

    let report = FinalReport::new(&summary.state, elapsed);
    info!("{report}");
    Ok(report)
}

/// Hand one message to the client, retrying while its queue is full.
async fn send(
    client: &SharedClient,
    topic: &str,
    data: &FakeData,
    index: u64,
    use_random_keys: bool,
    sent: &mut u64,
) {
    let key = use_random_keys.then(|| data.key(index));
    let payload = data.payload(index);

    loop {
        let freed = {
            let mut c = lock(client);
            let now = Instant::now();
            c.poll(now);
            match c.produce(topic, key, payload, now) {
                Ok(()) => break,
                Err(e) => {
                    warn!(queued = e.queued, "Queue is full, flushing");
                    c.poll(now)
                }
            }
        };
        if freed == 0 {
            tokio::time::sleep(QUEUE_FULL_BACKOFF).await;
        }
    }

    *sent += 1;
    if *sent % PROGRESS_EVERY == 0 {
        info!("Sent {} records", sent);
    }
}

/// Emit a statistics payload every `interval` until shutdown.
fn spawn_statistics(
    client: SharedClient,
    tx: mpsc::Sender<String>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            let payload = {
                let mut c = lock(&client);
                let now = Instant::now();
                c.poll(now);
                c.statistics(now)
            };
            if tx.send(payload).await.is_err() {
                break;
            }
        }
        debug!("Statistics task stopped");
    })
}
