mod client;
mod config;
mod gen;
mod produce;
mod replay;
mod traffic;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::info;

use crate::config::{BenchConfig, TrafficKind};

#[derive(Parser, Debug)]
#[command(name = "bench-producer", about = "Kafka producer throughput benchmark")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path to configuration file (missing file = defaults)
    #[arg(short, long, default_value = "config/bench.toml", global = true)]
    config: PathBuf,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Produce against the in-process simulated client and report its metrics
    Simulate {
        /// Number of messages to produce (overrides config and NB_MESSAGES)
        #[arg(short, long)]
        messages: Option<u64>,
        /// Throttle to this many messages per second
        #[arg(short, long)]
        rate: Option<u32>,
    },
    /// Feed a capture of statistics payloads (one JSON per line) through the metrics engine
    Replay {
        file: PathBuf,
        /// Delay between payloads in milliseconds
        #[arg(long)]
        pace_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    match args.command {
        Command::Simulate { messages, rate } => {
            let mut config = BenchConfig::load(&args.config).await?;
            if let Some(messages) = messages {
                config.benchmark.nb_messages = messages;
            }
            if let Some(rate) = rate {
                config.benchmark.messages_per_sec = rate;
                if config.benchmark.traffic == TrafficKind::Unbounded {
                    config.benchmark.traffic = TrafficKind::Throttled;
                }
            }
            config.validate()?;

            info!(
                prefix = %config.benchmark.topic_prefix,
                topics = config.benchmark.nb_topics,
                interval_ms = config.benchmark.reporting_interval_ms,
                "Producer benchmark starting"
            );
            for (key, value) in config.client_properties().iter() {
                info!(%key, %value, "Client property");
            }

            produce::run(&config).await?;
        }
        Command::Replay { file, pace_ms } => {
            info!(file = %file.display(), "Replaying statistics capture");
            replay::run(&file, pace_ms.map(Duration::from_millis)).await?;
        }
    }

    Ok(())
}
