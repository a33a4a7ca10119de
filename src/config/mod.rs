//! Configuration: one YAML file describing the server, the GitHub App, the
//! durable queue, the polling windows, and the routing table.
//!
//! Secrets stay out of the file and out of this struct. The file names an
//! environment variable for the webhook secret and a path for the App's
//! private key; both values are read on demand at startup and handed
//! straight to their consumers.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::dispatch::{CorrelationConfig, MonitorConfig};
use crate::queue::QueueConfig;
use crate::rules::{validate_mappings, EventMapping, MappingError};
use crate::worker::{PoolConfig, ProcessorConfig};

/// Error type for configuration loading failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error(transparent)]
    Mapping(#[from] MappingError),

    #[error("environment variable {var} is not set")]
    MissingSecret { var: String },

    #[error("cannot read private key {path}: {source}")]
    PrivateKey {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The whole configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub server: ServerSettings,
    pub github: GitHubSettings,
    #[serde(default)]
    pub queue: QueueSettings,
    #[serde(default)]
    pub poll: PollSettings,
    #[serde(default)]
    pub worker: WorkerSettings,
    /// The routing table. May be empty, in which case every delivery is
    /// accepted and dropped.
    pub mappings: Vec<EventMapping>,
}

impl Config {
    /// Loads and validates a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        validate_mappings(&config.mappings)?;
        Ok(config)
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            visibility_timeout: Duration::from_secs(self.queue.visibility_timeout_secs),
            max_receive_count: self.queue.max_receive_count,
            ..QueueConfig::default()
        }
    }

    pub fn processor_config(&self) -> ProcessorConfig {
        ProcessorConfig {
            correlation: CorrelationConfig {
                poll_interval: Duration::from_secs(self.poll.correlation_interval_secs),
                timeout: Duration::from_secs(self.poll.correlation_timeout_secs),
                ..CorrelationConfig::default()
            },
            monitor: MonitorConfig {
                poll_interval: Duration::from_secs(self.poll.monitor_interval_secs),
                timeout: Duration::from_secs(self.poll.monitor_timeout_secs),
                ..MonitorConfig::default()
            },
            max_concurrent_jobs: self.worker.max_concurrent_jobs,
            ..ProcessorConfig::default()
        }
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            workers: self.worker.workers,
            ..PoolConfig::default()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSettings {
    /// Address the HTTP server binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GitHubSettings {
    /// GitHub App id, from the App's settings page.
    pub app_id: u64,
    /// Installation id of the App on the account hosting the workflows.
    pub installation_id: u64,
    /// Path to the App's RSA private key in PEM form.
    pub private_key_path: PathBuf,
    /// Name of the environment variable holding the webhook secret.
    #[serde(default = "default_webhook_secret_env")]
    pub webhook_secret_env: String,
}

impl GitHubSettings {
    /// Reads the webhook secret from the configured environment variable.
    pub fn webhook_secret(&self) -> Result<Vec<u8>, ConfigError> {
        std::env::var(&self.webhook_secret_env)
            .map(String::into_bytes)
            .map_err(|_| ConfigError::MissingSecret {
                var: self.webhook_secret_env.clone(),
            })
    }

    /// Reads the App's private key PEM from disk.
    pub fn private_key(&self) -> Result<String, ConfigError> {
        std::fs::read_to_string(&self.private_key_path).map_err(|source| {
            ConfigError::PrivateKey {
                path: self.private_key_path.clone(),
                source,
            }
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueueSettings {
    /// Directory the durable queue lives in.
    #[serde(default = "default_queue_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,
    #[serde(default = "default_max_receive_count")]
    pub max_receive_count: u32,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            dir: default_queue_dir(),
            visibility_timeout_secs: default_visibility_timeout_secs(),
            max_receive_count: default_max_receive_count(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PollSettings {
    #[serde(default = "default_correlation_interval_secs")]
    pub correlation_interval_secs: u64,
    #[serde(default = "default_correlation_timeout_secs")]
    pub correlation_timeout_secs: u64,
    #[serde(default = "default_monitor_interval_secs")]
    pub monitor_interval_secs: u64,
    #[serde(default = "default_monitor_timeout_secs")]
    pub monitor_timeout_secs: u64,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            correlation_interval_secs: default_correlation_interval_secs(),
            correlation_timeout_secs: default_correlation_timeout_secs(),
            monitor_interval_secs: default_monitor_interval_secs(),
            monitor_timeout_secs: default_monitor_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerSettings {
    /// Number of concurrent queue consumers.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Upper bound on jobs of one delivery running at the same time.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 3000))
}

fn default_webhook_secret_env() -> String {
    "ROUTER_WEBHOOK_SECRET".to_string()
}

fn default_queue_dir() -> PathBuf {
    PathBuf::from("queue")
}

fn default_visibility_timeout_secs() -> u64 {
    300
}

fn default_max_receive_count() -> u32 {
    3
}

fn default_correlation_interval_secs() -> u64 {
    3
}

fn default_correlation_timeout_secs() -> u64 {
    300
}

fn default_monitor_interval_secs() -> u64 {
    15
}

fn default_monitor_timeout_secs() -> u64 {
    1800
}

fn default_workers() -> usize {
    4
}

fn default_max_concurrent_jobs() -> usize {
    4
}
