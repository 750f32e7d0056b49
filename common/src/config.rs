// Configuration management with layered configuration (defaults, file, env)

use crate::errors::ConfigurationError;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Region used when `AWS_REGION` is not set
pub const DEFAULT_AWS_REGION: &str = "us-east-1";

/// Plain environment variables honoured on top of the `APP__*` layer,
/// mapped to their configuration keys
const PLAIN_ENV_OVERRIDES: &[(&str, &str)] = &[
    ("DATABASE_URL", "database.url"),
    ("QUEUE_URL", "queue.sqs.queue_url"),
    ("AWS_REGION", "queue.sqs.region"),
    ("AWS_ACCESS_KEY_ID", "queue.sqs.access_key_id"),
    ("AWS_SECRET_ACCESS_KEY", "queue.sqs.secret_access_key"),
    ("AWS_SESSION_TOKEN", "queue.sqs.session_token"),
    ("AWS_ENDPOINT_URL", "queue.sqs.endpoint_url"),
];

/// Largest accepted staleness threshold (100 years)
pub const MAX_STALENESS_THRESHOLD_HOURS: i64 = 24 * 365 * 100;

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub database: DatabaseConfig,
    pub queue: QueueConfig,
    pub scheduler: SchedulerConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    Sqs,
    Nats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub backend: QueueBackend,
    pub publish_timeout_seconds: u64,
    pub sqs: SqsConfig,
    pub nats: NatsConfig,
}

/// SQS destination. The queue URL stays optional here: its absence is reported
/// by the transport on the first publish attempt. When no static key pair is
/// configured, credentials come from the AWS default provider chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqsConfig {
    #[serde(default)]
    pub queue_url: Option<String>,
    pub region: String,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
    #[serde(default)]
    pub session_token: Option<String>,
    /// Override for the SQS endpoint (local stacks, tests)
    #[serde(default)]
    pub endpoint_url: Option<String>,
    /// SDK attempts per publish, including the first
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NatsConfig {
    pub url: String,
    pub stream_name: String,
    /// Messages go to `{subject_prefix}.{org_id}`
    pub subject_prefix: String,
    pub max_age_seconds: u64,
}

/// How the pause between cycles is computed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CadenceMode {
    /// Sleep the full interval after a cycle finishes; cadence drifts by cycle duration
    FixedDelay,
    /// Sleep the interval minus the time the cycle took, never below zero
    FixedRate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub poll_interval_seconds: u64,
    pub staleness_threshold_hours: i64,
    #[serde(default)]
    pub max_candidates_per_cycle: Option<i64>,
    pub dispatch_concurrency: usize,
    pub cadence: CadenceMode,
    #[serde(default)]
    pub max_cycles: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    #[serde(default)]
    pub metrics_port: Option<u16>,
    #[serde(default)]
    pub tracing_endpoint: Option<String>,
}

impl Settings {
    /// Load configuration with layered precedence: defaults → file → env
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config", None)
    }

    /// Load configuration from a specific directory.
    ///
    /// `env` replaces the process environment when given, which keeps tests
    /// independent of the variables set on the machine running them.
    pub fn load_from_path<P: AsRef<Path>>(
        config_dir: P,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let mut builder = Config::builder()
            .add_source(Config::try_from(&Settings::default())?)
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Local overrides, not committed
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
                    .source(env.clone()),
            );

        for (var, key) in PLAIN_ENV_OVERRIDES {
            let value = match &env {
                Some(map) => map.get(*var).cloned(),
                None => std::env::var(var).ok(),
            };
            if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
                builder = builder.set_override(*key, value)?;
            }
        }

        builder.build()?.try_deserialize()
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.database.url.is_empty() {
            return Err(ConfigurationError::Missing("DATABASE_URL".to_string()));
        }
        if self.database.max_connections == 0 {
            return Err(invalid("database.max_connections", "must be greater than 0"));
        }
        if self.scheduler.poll_interval_seconds == 0 {
            return Err(invalid("scheduler.poll_interval_seconds", "must be greater than 0"));
        }
        if self.scheduler.staleness_threshold_hours <= 0 {
            return Err(invalid("scheduler.staleness_threshold_hours", "must be greater than 0"));
        }
        if self.scheduler.staleness_threshold_hours > MAX_STALENESS_THRESHOLD_HOURS {
            return Err(invalid(
                "scheduler.staleness_threshold_hours",
                "must not exceed 876000 (100 years)",
            ));
        }
        if self.scheduler.dispatch_concurrency == 0 {
            return Err(invalid("scheduler.dispatch_concurrency", "must be greater than 0"));
        }
        if matches!(self.scheduler.max_candidates_per_cycle, Some(n) if n <= 0) {
            return Err(invalid("scheduler.max_candidates_per_cycle", "must be greater than 0"));
        }
        if self.queue.publish_timeout_seconds == 0 {
            return Err(invalid("queue.publish_timeout_seconds", "must be greater than 0"));
        }
        if self.queue.sqs.max_attempts == 0 {
            return Err(invalid("queue.sqs.max_attempts", "must be greater than 0"));
        }
        if self.queue.backend == QueueBackend::Nats && self.queue.nats.url.is_empty() {
            return Err(ConfigurationError::Missing("queue.nats.url".to_string()));
        }
        // QUEUE_URL is deliberately not checked here; see SqsTransport::publish
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> ConfigurationError {
    ConfigurationError::Invalid {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "postgresql://localhost:5432/postgres".to_string(),
                max_connections: 5,
                min_connections: 1,
                connect_timeout_seconds: 30,
            },
            queue: QueueConfig {
                backend: QueueBackend::Sqs,
                publish_timeout_seconds: 10,
                sqs: SqsConfig {
                    queue_url: None,
                    region: DEFAULT_AWS_REGION.to_string(),
                    access_key_id: None,
                    secret_access_key: None,
                    session_token: None,
                    endpoint_url: None,
                    max_attempts: 3,
                },
                nats: NatsConfig {
                    url: "nats://localhost:4222".to_string(),
                    stream_name: "SCAN_JOBS".to_string(),
                    subject_prefix: "scans".to_string(),
                    max_age_seconds: 86400,
                },
            },
            scheduler: SchedulerConfig {
                poll_interval_seconds: 120,
                staleness_threshold_hours: 24,
                max_candidates_per_cycle: None,
                dispatch_concurrency: 1,
                cadence: CadenceMode::FixedDelay,
                max_cycles: None,
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                metrics_port: None,
                tracing_endpoint: None,
            },
        }
    }
}
