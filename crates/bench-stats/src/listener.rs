/// Statistics listener task.
///
/// The broker client pushes raw statistics payloads into an mpsc channel. A
/// single task drains that channel in order and is the only owner of the
/// `MetricsEngine`, so derived state never sees two concurrent updates.
/// When every sender is dropped the task ends and hands back the final state.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::engine::{DerivedMetrics, MetricsEngine, RateMetrics};
use crate::snapshot::Snapshot;

/// What the listener leaves behind once the statistics channel closes.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ListenerSummary {
    pub state: DerivedMetrics,
    /// Snapshots that produced metrics
    pub computed: u64,
    /// Snapshots skipped during warm-up
    pub skipped: u64,
    /// Payloads that failed to decode
    pub undecodable: u64,
}

/// Spawn the listener on the current runtime.
pub fn spawn(
    rx: mpsc::Receiver<String>,
    sink: Option<mpsc::UnboundedSender<RateMetrics>>,
) -> JoinHandle<ListenerSummary> {
    tokio::spawn(run(MetricsEngine::new(), rx, sink))
}

/// Drain `rx` until closed, feeding every payload through `engine`.
pub async fn run(
    mut engine: MetricsEngine,
    mut rx: mpsc::Receiver<String>,
    sink: Option<mpsc::UnboundedSender<RateMetrics>>,
) -> ListenerSummary {
    debug!("Statistics listener started");

    while let Some(payload) = rx.recv().await {
        let snapshot = match Snapshot::from_json(&payload) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, bytes = payload.len(), "Ignoring undecodable statistics");
                engine.mark_undecodable();
                continue;
            }
        };

        debug!(
            client = %snapshot.name,
            queued = snapshot.msg_cnt,
            brokers = snapshot.brokers.len(),
            topics = snapshot.topics.len(),
            "Statistics received"
        );

        if let Some(metrics) = engine.ingest(&snapshot) {
            info!("{}", metrics);
            if let Some(sink) = &sink {
                // Reporting is best-effort; a dropped receiver must not stop the listener
                let _ = sink.send(metrics);
            }
        }
    }

    let summary = ListenerSummary {
        state: engine.state(),
        computed: engine.computed(),
        skipped: engine.skipped(),
        undecodable: engine.undecodable(),
    };
    debug!(
        computed = summary.computed,
        skipped = summary.skipped,
        undecodable = summary.undecodable,
        "Statistics listener stopped"
    );
    summary
}
