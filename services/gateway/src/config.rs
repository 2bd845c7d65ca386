use anyhow::{Context, Result};
use hermod_broker::{BreakerConfig, RepositorySettings};
use serde::Deserialize;
use std::fs;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;

// Gateway configuration sourced from environment variables, with an optional
// YAML override file for ops-managed deployments.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    // HTTP listener bind address.
    pub listen_bind: SocketAddr,
    // Metrics HTTP listener bind address.
    pub metrics_bind: SocketAddr,
    // Replication factor for created topics.
    pub replication_factor: u32,
    // Segment rotation period for created topics.
    pub topic_rotation_ms: i64,
    // Retention applied when an event type does not specify one.
    pub default_retention_ms: i64,
    // Budget for handing a publish batch to the producer.
    pub send_timeout_ms: u64,
    // Per-request budget of the log store; added to the send budget.
    pub request_timeout_ms: u64,
    // Poll budget for streaming consumers.
    pub poll_timeout_ms: u64,
    // Circuit breaker: failures within the window that trip the circuit.
    pub breaker_failure_threshold: u32,
    // Circuit breaker: sliding window length.
    pub breaker_window_ms: u64,
    // Circuit breaker: time an open circuit blocks before probing.
    pub breaker_cooldown_ms: u64,
    // Default events per streamed batch.
    pub default_batch_limit: usize,
    // Default flush deadline per batch, in seconds.
    pub default_batch_flush_timeout_s: u64,
    // Max concurrent streams per client, event type and partition.
    pub max_streams_per_partition: usize,
    // Feature names enabled at startup.
    pub features_enabled: Vec<String>,
}

const DEFAULT_GATEWAY_CONFIG_PATH: &str = "/usr/local/hermod/gateway.yml";
const DEFAULT_REPLICATION_FACTOR: u32 = 1;
const DEFAULT_TOPIC_ROTATION_MS: i64 = 50_000_000;
const DEFAULT_RETENTION_MS: i64 = 172_800_000;
const DEFAULT_SEND_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_POLL_TIMEOUT_MS: u64 = 100;
const DEFAULT_BREAKER_FAILURE_THRESHOLD: u32 = 5;
const DEFAULT_BREAKER_WINDOW_MS: u64 = 10_000;
const DEFAULT_BREAKER_COOLDOWN_MS: u64 = 5_000;
const DEFAULT_BATCH_LIMIT: usize = 1;
const DEFAULT_BATCH_FLUSH_TIMEOUT_S: u64 = 30;
const DEFAULT_MAX_STREAMS_PER_PARTITION: usize = 5;

#[derive(Debug, Deserialize)]
struct GatewayConfigOverride {
    listen_bind: Option<String>,
    metrics_bind: Option<String>,
    replication_factor: Option<u32>,
    topic_rotation_ms: Option<i64>,
    default_retention_ms: Option<i64>,
    send_timeout_ms: Option<u64>,
    request_timeout_ms: Option<u64>,
    poll_timeout_ms: Option<u64>,
    breaker_failure_threshold: Option<u32>,
    breaker_window_ms: Option<u64>,
    breaker_cooldown_ms: Option<u64>,
    default_batch_limit: Option<usize>,
    default_batch_flush_timeout_s: Option<u64>,
    max_streams_per_partition: Option<usize>,
    features_enabled: Option<Vec<String>>,
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

fn env_u32(name: &str, default: u32) -> u32 {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self> {
        // Environment variables provide defaults for local development.
        let listen_bind = std::env::var("HERMOD_GATEWAY_BIND")
            .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
            .parse()
            .with_context(|| "parse HERMOD_GATEWAY_BIND")?;
        let metrics_bind = std::env::var("HERMOD_METRICS_BIND")
            .unwrap_or_else(|_| "0.0.0.0:9100".to_string())
            .parse()
            .with_context(|| "parse HERMOD_METRICS_BIND")?;
        let default_retention_ms = std::env::var("HERMOD_DEFAULT_RETENTION_MS")
            .ok()
            .and_then(|value| value.parse::<i64>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_RETENTION_MS);
        let topic_rotation_ms = std::env::var("HERMOD_TOPIC_ROTATION_MS")
            .ok()
            .and_then(|value| value.parse::<i64>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_TOPIC_ROTATION_MS);
        let features_enabled = std::env::var("HERMOD_FEATURES")
            .ok()
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Ok(Self {
            listen_bind,
            metrics_bind,
            replication_factor: env_u32("HERMOD_REPLICATION_FACTOR", DEFAULT_REPLICATION_FACTOR),
            topic_rotation_ms,
            default_retention_ms,
            send_timeout_ms: env_u64("HERMOD_SEND_TIMEOUT_MS", DEFAULT_SEND_TIMEOUT_MS),
            request_timeout_ms: env_u64("HERMOD_REQUEST_TIMEOUT_MS", DEFAULT_REQUEST_TIMEOUT_MS),
            poll_timeout_ms: env_u64("HERMOD_POLL_TIMEOUT_MS", DEFAULT_POLL_TIMEOUT_MS),
            breaker_failure_threshold: env_u32(
                "HERMOD_BREAKER_FAILURE_THRESHOLD",
                DEFAULT_BREAKER_FAILURE_THRESHOLD,
            ),
            breaker_window_ms: env_u64("HERMOD_BREAKER_WINDOW_MS", DEFAULT_BREAKER_WINDOW_MS),
            breaker_cooldown_ms: env_u64("HERMOD_BREAKER_COOLDOWN_MS", DEFAULT_BREAKER_COOLDOWN_MS),
            default_batch_limit: env_usize("HERMOD_BATCH_LIMIT", DEFAULT_BATCH_LIMIT),
            default_batch_flush_timeout_s: env_u64(
                "HERMOD_BATCH_FLUSH_TIMEOUT_S",
                DEFAULT_BATCH_FLUSH_TIMEOUT_S,
            ),
            max_streams_per_partition: env_usize(
                "HERMOD_MAX_STREAMS_PER_PARTITION",
                DEFAULT_MAX_STREAMS_PER_PARTITION,
            ),
            features_enabled,
        })
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        let override_path = std::env::var("HERMOD_GATEWAY_CONFIG").ok();
        let config_path = override_path
            .clone()
            .unwrap_or_else(|| DEFAULT_GATEWAY_CONFIG_PATH.to_string());
        let contents = match fs::read_to_string(&config_path) {
            Ok(contents) => Some(contents),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                if override_path.is_some() {
                    return Err(err)
                        .with_context(|| format!("read HERMOD_GATEWAY_CONFIG: {config_path}"));
                }
                None
            }
            Err(err) => {
                return Err(err).with_context(|| format!("read gateway config: {config_path}"));
            }
        };
        if let Some(contents) = contents {
            // YAML overrides allow ops-friendly config files.
            let override_cfg: GatewayConfigOverride =
                serde_yaml::from_str(&contents).with_context(|| "parse gateway config yaml")?;
            if let Some(value) = override_cfg.listen_bind {
                config.listen_bind = value.parse().with_context(|| "parse listen_bind")?;
            }
            if let Some(value) = override_cfg.metrics_bind {
                config.metrics_bind = value.parse().with_context(|| "parse metrics_bind")?;
            }
            if let Some(value) = override_cfg.replication_factor {
                config.replication_factor = value;
            }
            if let Some(value) = override_cfg.topic_rotation_ms {
                config.topic_rotation_ms = value;
            }
            if let Some(value) = override_cfg.default_retention_ms {
                config.default_retention_ms = value;
            }
            if let Some(value) = override_cfg.send_timeout_ms {
                config.send_timeout_ms = value;
            }
            if let Some(value) = override_cfg.request_timeout_ms {
                config.request_timeout_ms = value;
            }
            if let Some(value) = override_cfg.poll_timeout_ms {
                config.poll_timeout_ms = value;
            }
            if let Some(value) = override_cfg.breaker_failure_threshold {
                config.breaker_failure_threshold = value;
            }
            if let Some(value) = override_cfg.breaker_window_ms {
                config.breaker_window_ms = value;
            }
            if let Some(value) = override_cfg.breaker_cooldown_ms {
                config.breaker_cooldown_ms = value;
            }
            if let Some(value) = override_cfg.default_batch_limit {
                config.default_batch_limit = value;
            }
            if let Some(value) = override_cfg.default_batch_flush_timeout_s {
                config.default_batch_flush_timeout_s = value;
            }
            if let Some(value) = override_cfg.max_streams_per_partition {
                config.max_streams_per_partition = value;
            }
            if let Some(value) = override_cfg.features_enabled {
                config.features_enabled = value;
            }
        }
        Ok(config)
    }

    /// Repository tuning derived from this configuration.
    pub fn repository_settings(&self) -> RepositorySettings {
        RepositorySettings {
            replication_factor: self.replication_factor,
            rotation_ms: self.topic_rotation_ms,
            send_timeout: Duration::from_millis(self.send_timeout_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            poll_timeout: Duration::from_millis(self.poll_timeout_ms),
            breaker: BreakerConfig {
                failure_threshold: self.breaker_failure_threshold,
                window: Duration::from_millis(self.breaker_window_ms),
                cooldown: Duration::from_millis(self.breaker_cooldown_ms),
            },
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_bind: "127.0.0.1:8080".parse().expect("bind addr"),
            metrics_bind: "127.0.0.1:9100".parse().expect("bind addr"),
            replication_factor: DEFAULT_REPLICATION_FACTOR,
            topic_rotation_ms: DEFAULT_TOPIC_ROTATION_MS,
            default_retention_ms: DEFAULT_RETENTION_MS,
            send_timeout_ms: DEFAULT_SEND_TIMEOUT_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            poll_timeout_ms: DEFAULT_POLL_TIMEOUT_MS,
            breaker_failure_threshold: DEFAULT_BREAKER_FAILURE_THRESHOLD,
            breaker_window_ms: DEFAULT_BREAKER_WINDOW_MS,
            breaker_cooldown_ms: DEFAULT_BREAKER_COOLDOWN_MS,
            default_batch_limit: DEFAULT_BATCH_LIMIT,
            default_batch_flush_timeout_s: DEFAULT_BATCH_FLUSH_TIMEOUT_S,
            max_streams_per_partition: DEFAULT_MAX_STREAMS_PER_PARTITION,
            features_enabled: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_produce_sane_repository_settings() {
        let config = GatewayConfig::default();
        let settings = config.repository_settings();
        assert_eq!(settings.send_timeout, Duration::from_secs(5));
        assert_eq!(settings.request_timeout, Duration::from_secs(30));
        assert_eq!(settings.breaker.failure_threshold, 5);
    }

    #[test]
    fn yaml_override_parses() {
        let yaml = "listen_bind: \"127.0.0.1:9999\"\nmax_streams_per_partition: 2\n";
        let parsed: GatewayConfigOverride = serde_yaml::from_str(yaml).expect("yaml");
        assert_eq!(parsed.listen_bind.as_deref(), Some("127.0.0.1:9999"));
        assert_eq!(parsed.max_streams_per_partition, Some(2));
    }
}
