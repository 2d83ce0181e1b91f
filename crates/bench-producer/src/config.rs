/// Benchmark configuration.
///
/// Layers, later wins:
///   1. built-in defaults
///   2. TOML file (`[benchmark]` and `[client]` tables)
///   3. environment (`NB_MESSAGES`, `MESSAGE_SIZE`, … and `KAFKA_*` client properties)

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use anyhow::{anyhow, bail, Context};
use serde::Deserialize;
use tracing::{error, info};

use bench_stats::DEFAULT_REPORTING_INTERVAL_MS;

/// Env vars with this prefix become client properties
const CLIENT_ENV_PREFIX: &str = "KAFKA_";

/// Client property carrying the statistics emission interval
pub const STATISTICS_INTERVAL_PROPERTY: &str = "statistics.interval.ms";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BenchConfig {
    #[serde(default)]
    pub benchmark: BenchmarkSection,
    /// Raw client properties, e.g. `"linger.ms" = 5`
    #[serde(default)]
    pub client: BTreeMap<String, toml::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BenchmarkSection {
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    #[serde(default = "default_message_size")]
    pub message_size: usize,
    #[serde(default = "default_reporting_interval")]
    pub reporting_interval_ms: u64,
    #[serde(default = "default_nb_messages")]
    pub nb_messages: u64,
    #[serde(default = "default_true")]
    pub use_random_keys: bool,
    #[serde(default = "default_nb_topics")]
    pub nb_topics: usize,
    /// Buffer this many messages per topic before sending (1 = send immediately)
    #[serde(default = "default_agg_per_topic")]
    pub agg_per_topic_nb_messages: u64,
    /// Target send rate for throttled/poisson traffic
    #[serde(default = "default_messages_per_sec")]
    pub messages_per_sec: u32,
    #[serde(default)]
    pub traffic: TrafficKind,
}

impl Default for BenchmarkSection {
    fn default() -> Self {
        Self {
            topic_prefix: default_topic_prefix(),
            message_size: default_message_size(),
            reporting_interval_ms: default_reporting_interval(),
            nb_messages: default_nb_messages(),
            use_random_keys: true,
            nb_topics: default_nb_topics(),
            agg_per_topic_nb_messages: default_agg_per_topic(),
            messages_per_sec: default_messages_per_sec(),
            traffic: TrafficKind::default(),
        }
    }
}

/// How the produce loop paces its sends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrafficKind {
    /// As fast as the client accepts
    #[default]
    Unbounded,
    /// At most `messages_per_sec` in any one-second window
    Throttled,
    /// Exponentially distributed waits averaging `messages_per_sec`
    Poisson,
}

impl FromStr for TrafficKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "unbounded" => Ok(Self::Unbounded),
            "throttled" => Ok(Self::Throttled),
            "poisson" => Ok(Self::Poisson),
            other => Err(anyhow!("unknown traffic kind '{other}'")),
        }
    }
}

fn default_topic_prefix() -> String { "sample".to_string() }
fn default_message_size() -> usize { 200 }
fn default_reporting_interval() -> u64 { DEFAULT_REPORTING_INTERVAL_MS }
fn default_nb_messages() -> u64 { 1_000_000 }
fn default_true() -> bool { true }
fn default_nb_topics() -> usize { 1 }
fn default_agg_per_topic() -> u64 { 1 }
fn default_messages_per_sec() -> u32 { 10_000 }

/// Flat string view of the client properties.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientProperties(BTreeMap<String, String>);

impl ClientProperties {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Parse `key` as `T`, or `default` when unset.
    pub fn parse_or<T>(&self, key: &str, default: T) -> anyhow::Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|e| anyhow!("client property {key}={raw}: {e}")),
            None => Ok(default),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }
}

impl BenchConfig {
    /// Load from `path` if it exists, then apply the process environment.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
                error!("Failed to read config file {:?}: {}", path, e);
                e
            })?;
            Self::from_toml(&raw).map_err(|e| {
                error!("Failed to parse config: {}", e);
                e
            })?
        } else {
            info!(path = %path.display(), "No config file, using defaults");
            Self::default()
        };
        config.apply_env(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> anyhow::Result<Self> {
        toml::from_str(raw).context("invalid benchmark config")
    }

    /// Apply overrides from `(name, value)` pairs, typically `std::env::vars()`.
    pub fn apply_env<I>(&mut self, vars: I) -> anyhow::Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let bench = &mut self.benchmark;
        for (name, value) in vars {
            match name.as_str() {
                "TOPIC_PREFIX" => bench.topic_prefix = value,
                "MESSAGE_SIZE" => bench.message_size = parse_env(&name, &value)?,
                "REPORTING_INTERVAL" => bench.reporting_interval_ms = parse_env(&name, &value)?,
                "NB_MESSAGES" => bench.nb_messages = parse_env(&name, &value)?,
                "USE_RANDOM_KEYS" => bench.use_random_keys = parse_env(&name, &value)?,
                "NB_TOPICS" => bench.nb_topics = parse_env(&name, &value)?,
                "AGG_PER_TOPIC_NB_MESSAGES" => {
                    bench.agg_per_topic_nb_messages = parse_env(&name, &value)?
                }
                "MESSAGES_PER_SEC" => bench.messages_per_sec = parse_env(&name, &value)?,
                "TRAFFIC" => bench.traffic = parse_env(&name, &value)?,
                _ => {
                    if let Some(key) = name.strip_prefix(CLIENT_ENV_PREFIX) {
                        let key = key.replace('_', ".").to_lowercase();
                        self.client.insert(key, toml::Value::String(value));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let bench = &self.benchmark;
        if bench.nb_topics == 0 {
            bail!("nb_topics must be at least 1");
        }
        if bench.reporting_interval_ms == 0 {
            bail!("reporting_interval_ms must be positive");
        }
        if bench.agg_per_topic_nb_messages == 0 {
            bail!("agg_per_topic_nb_messages must be at least 1");
        }
        if bench.traffic != TrafficKind::Unbounded && bench.messages_per_sec == 0 {
            bail!("messages_per_sec must be positive for {:?} traffic", bench.traffic);
        }
        Ok(())
    }

    /// Client properties as strings, with the statistics interval forced to
    /// the reporting interval.
    pub fn client_properties(&self) -> ClientProperties {
        let mut props = ClientProperties::default();
        for (key, value) in &self.client {
            let value = match value {
                toml::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            props.set(key.clone(), value);
        }
        props.set(
            STATISTICS_INTERVAL_PROPERTY,
            self.benchmark.reporting_interval_ms.to_string(),
        );
        props
    }

    pub fn topic_names(&self) -> Vec<String> {
        let prefix = &self.benchmark.topic_prefix;
        (0..self.benchmark.nb_topics)
            .map(|i| format!("{prefix}_{i}"))
            .collect()
    }
}

fn parse_env<T>(name: &str, value: &str) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| anyhow!("{name} env. variable '{value}' is not valid: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = BenchConfig::default();
        assert_eq!(config.benchmark.topic_prefix, "sample");
        assert_eq!(config.benchmark.message_size, 200);
        assert_eq!(config.benchmark.reporting_interval_ms, 1000);
        assert_eq!(config.benchmark.nb_messages, 1_000_000);
        assert!(config.benchmark.use_random_keys);
        assert_eq!(config.benchmark.traffic, TrafficKind::Unbounded);
        assert_eq!(config.topic_names(), vec!["sample_0"]);
    }

    #[test]
    fn test_partial_toml() {
        let config = BenchConfig::from_toml(
            r#"
            [benchmark]
            nb_topics = 3
            traffic = "poisson"

            [client]
            "linger.ms" = 20
            "batch.num.messages" = "500"
            "#,
        )
        .unwrap();
        assert_eq!(config.benchmark.nb_topics, 3);
        assert_eq!(config.benchmark.message_size, 200);
        assert_eq!(config.benchmark.traffic, TrafficKind::Poisson);
        assert_eq!(config.topic_names(), vec!["sample_0", "sample_1", "sample_2"]);

        let props = config.client_properties();
        assert_eq!(props.get("linger.ms"), Some("20"));
        assert_eq!(props.get("batch.num.messages"), Some("500"));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = BenchConfig::default();
        config
            .apply_env(vars(&[
                ("TOPIC_PREFIX", "bench"),
                ("NB_MESSAGES", "5000"),
                ("USE_RANDOM_KEYS", "false"),
                ("AGG_PER_TOPIC_NB_MESSAGES", "10"),
                ("TRAFFIC", "Throttled"),
                ("KAFKA_LINGER_MS", "50"),
                ("KAFKA_BOOTSTRAP_SERVERS", "localhost:9092"),
                ("HOME", "/root"),
            ]))
            .unwrap();

        assert_eq!(config.benchmark.topic_prefix, "bench");
        assert_eq!(config.benchmark.nb_messages, 5000);
        assert!(!config.benchmark.use_random_keys);
        assert_eq!(config.benchmark.agg_per_topic_nb_messages, 10);
        assert_eq!(config.benchmark.traffic, TrafficKind::Throttled);

        let props = config.client_properties();
        assert_eq!(props.get("linger.ms"), Some("50"));
        assert_eq!(props.get("bootstrap.servers"), Some("localhost:9092"));
        assert_eq!(props.get("home"), None);
    }

    #[test]
    fn test_invalid_env_value() {
        let mut config = BenchConfig::default();
        let err = config
            .apply_env(vars(&[("MESSAGE_SIZE", "big")]))
            .unwrap_err();
        assert!(err.to_string().contains("MESSAGE_SIZE"));
    }

    #[test]
    fn test_statistics_interval_forced() {
        let mut config = BenchConfig::from_toml(
            r#"
            [benchmark]
            reporting_interval_ms = 250
            [client]
            "statistics.interval.ms" = 60000
            "#,
        )
        .unwrap();
        assert_eq!(
            config.client_properties().get(STATISTICS_INTERVAL_PROPERTY),
            Some("250")
        );

        config.apply_env(vars(&[("REPORTING_INTERVAL", "2000")])).unwrap();
        assert_eq!(
            config.client_properties().get(STATISTICS_INTERVAL_PROPERTY),
            Some("2000")
        );
    }

    #[test]
    fn test_validate() {
        let mut config = BenchConfig::default();
        assert!(config.validate().is_ok());

        config.benchmark.nb_topics = 0;
        assert!(config.validate().is_err());

        config.benchmark.nb_topics = 1;
        config.benchmark.traffic = TrafficKind::Poisson;
        config.benchmark.messages_per_sec = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_or() {
        let mut props = ClientProperties::default();
        props.set("linger.ms", "7");
        props.set("batch.size", "lots");
        assert_eq!(props.parse_or("linger.ms", 5u64).unwrap(), 7);
        assert_eq!(props.parse_or("queue.buffering.max.messages", 100usize).unwrap(), 100);
        assert!(props.parse_or("batch.size", 1usize).is_err());
    }
}
