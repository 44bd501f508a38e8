use crate::cluster::registry::NodeEndpoint;
use crate::cluster::types::NodeId;
use crate::error::Result;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    pub cluster: ClusterConfig,
    pub polling: PollingConfig,
    pub stream: StreamConfig,
    pub events: EventsConfig,
    pub observability: ObservabilityConfig,
}

/// Static cluster membership
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterConfig {
    pub nodes: Vec<NodeEndpoint>,
    /// Node writes go to before any redirect has been seen
    pub default_leader: NodeId,
}

/// Refresh cadences and the per-request timeout
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PollingConfig {
    pub status_interval_ms: u64,
    pub log_interval_ms: u64,
    pub events_interval_ms: u64,
    pub task_interval_ms: u64,
    pub request_timeout_ms: u64,
}

/// Push channel configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamConfig {
    pub enabled: bool,
    pub node_id: NodeId,
    pub reconnect_delay_ms: u64,
    /// Silence before an open channel is dropped and reopened; 0 disables
    pub idle_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventsConfig {
    pub capacity: usize,
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub json_logs: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cluster: ClusterConfig {
                nodes: (1..=3)
                    .map(|id| NodeEndpoint::new(id, format!("127.0.0.1:{}", 8000 + id)))
                    .collect(),
                default_leader: 1,
            },
            polling: PollingConfig {
                status_interval_ms: 3000,
                log_interval_ms: 5000,
                events_interval_ms: 5000,
                task_interval_ms: 3000,
                request_timeout_ms: 2000,
            },
            stream: StreamConfig {
                enabled: true,
                node_id: 1,
                reconnect_delay_ms: 2000,
                idle_timeout_ms: 5000,
            },
            events: EventsConfig { capacity: 100 },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                json_logs: false,
            },
        }
    }
}

const CONFIG_FILES: [&str; 3] = [
    "config/default.toml",
    "config/local.toml",
    "/etc/raftview/config.toml",
];

impl AppConfig {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self> {
        let files: Vec<PathBuf> = CONFIG_FILES.iter().map(PathBuf::from).collect();
        Self::load_from(&files)
    }

    /// Load defaults overlaid with a single file, then the environment
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::Message(format!(
                "Configuration file {} not found",
                path.display()
            ))
            .into());
        }
        Self::load_from(&[path.to_path_buf()])
    }

    fn load_from(files: &[PathBuf]) -> Result<Self> {
        let mut config_builder = Config::builder()
            // Start with default values
            .add_source(Config::try_from(&AppConfig::default())?);

        for config_file in files {
            if config_file.exists() {
                config_builder = config_builder.add_source(File::from(config_file.as_path()));
            }
        }

        // RAFTVIEW_POLLING__STATUS_INTERVAL_MS=1000 and friends
        config_builder = config_builder.add_source(
            Environment::with_prefix("RAFTVIEW")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let app_config: AppConfig = config_builder.build()?.try_deserialize()?;
        app_config.validate()?;

        Ok(app_config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.cluster.nodes.is_empty() {
            return Err(ConfigError::Message(
                "Cluster membership cannot be empty".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for node in &self.cluster.nodes {
            if node.id == 0 {
                return Err(ConfigError::Message("Node id cannot be 0".to_string()));
            }
            if node.address.trim().is_empty() {
                return Err(ConfigError::Message(format!(
                    "Node {} has an empty address",
                    node.id
                )));
            }
            if !seen.insert(node.id) {
                return Err(ConfigError::Message(format!(
                    "Duplicate node id {} in cluster membership",
                    node.id
                )));
            }
        }

        if !seen.contains(&self.cluster.default_leader) {
            return Err(ConfigError::Message(format!(
                "Default leader {} is not a cluster member",
                self.cluster.default_leader
            )));
        }

        if self.stream.enabled && !seen.contains(&self.stream.node_id) {
            return Err(ConfigError::Message(format!(
                "Stream node {} is not a cluster member",
                self.stream.node_id
            )));
        }

        let durations = [
            ("polling.status_interval_ms", self.polling.status_interval_ms),
            ("polling.log_interval_ms", self.polling.log_interval_ms),
            ("polling.events_interval_ms", self.polling.events_interval_ms),
            ("polling.task_interval_ms", self.polling.task_interval_ms),
            ("polling.request_timeout_ms", self.polling.request_timeout_ms),
        ];
        for (name, value) in durations {
            if value == 0 {
                return Err(ConfigError::Message(format!("{} cannot be 0", name)));
            }
        }

        if self.events.capacity == 0 {
            return Err(ConfigError::Message(
                "events.capacity cannot be 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl PollingConfig {
    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms)
    }

    pub fn log_interval(&self) -> Duration {
        Duration::from_millis(self.log_interval_ms)
    }

    pub fn events_interval(&self) -> Duration {
        Duration::from_millis(self.events_interval_ms)
    }

    pub fn task_interval(&self) -> Duration {
        Duration::from_millis(self.task_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl StreamConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}
