use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use trellis_command::executor::ExecutorConfig;
use trellis_paranet::config::ParanetSyncConfig;
use trellis_protocol::strategy::ProtocolConfig;
use trellis_types::constants::{
    COMMAND_POLL_INTERVAL, COMMAND_QUEUE_PARALLELISM, FINALIZED_COMMAND_TTL,
};

use crate::error::NodeError;

/// Name of the file written by `trellis init`.
pub const CONFIG_FILE_NAME: &str = "trellis.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub executor: ExecutorSection,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub paranet: ParanetSyncConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: String,
    /// Storage backend: "memory" or "sqlite"
    pub db_type: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            db_type: "memory".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorSection {
    pub max_workers: usize,
    pub poll_interval_ms: u64,
    /// Age after which finished one-shot commands are purged.
    pub command_ttl_ms: u64,
}

impl ExecutorSection {
    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            max_workers: self.max_workers,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }

    pub fn command_ttl(&self) -> Duration {
        Duration::from_millis(self.command_ttl_ms)
    }
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            max_workers: COMMAND_QUEUE_PARALLELISM,
            poll_interval_ms: COMMAND_POLL_INTERVAL.as_millis() as u64,
            command_ttl_ms: FINALIZED_COMMAND_TTL.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// How often counters are refreshed from the running components.
    pub refresh_interval_ms: u64,
    /// If set, the text exposition is written here on every refresh
    /// (node_exporter textfile collector format).
    #[serde(default)]
    pub textfile_path: Option<String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            refresh_interval_ms: 15_000,
            textfile_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

fn default_data_dir() -> String {
    dirs::home_dir()
        .map(|h| h.join(".trellis").join("data").to_string_lossy().into_owned())
        .unwrap_or_else(|| "./trellis-data".to_string())
}

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, NodeError> {
        let contents = std::fs::read_to_string(path).map_err(|e| NodeError::ConfigError {
            reason: format!("failed to read config file '{}': {}", path, e),
        })?;
        let config: NodeConfig = toml::from_str(&contents).map_err(|e| NodeError::ConfigError {
            reason: format!("failed to parse config file '{}': {}", path, e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Initialize a default configuration file in the given directory.
    pub fn init(dir: &str) -> Result<(), NodeError> {
        let dir_path = Path::new(dir);
        if !dir_path.exists() {
            std::fs::create_dir_all(dir_path)?;
        }

        let config = NodeConfig::default();
        let toml_str = toml::to_string_pretty(&config).map_err(|e| NodeError::ConfigError {
            reason: format!("failed to serialize default config: {}", e),
        })?;

        let config_path = dir_path.join(CONFIG_FILE_NAME);
        std::fs::write(&config_path, toml_str)?;

        Ok(())
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), NodeError> {
        match self.storage.db_type.as_str() {
            "memory" | "sqlite" => {}
            other => {
                return Err(NodeError::ConfigError {
                    reason: format!(
                        "unknown storage backend '{}', expected 'memory' or 'sqlite'",
                        other
                    ),
                })
            }
        }
        if self.executor.max_workers < 2 {
            return Err(NodeError::ConfigError {
                reason: "executor.max_workers must be at least 2".to_string(),
            });
        }
        // Each paranet sync run holds a worker while the GETs it waits on
        // need another one.
        let paranets = self.paranet.paranets.len();
        if self.executor.max_workers <= paranets {
            return Err(NodeError::ConfigError {
                reason: format!(
                    "executor.max_workers ({}) must exceed the number of synced paranets ({})",
                    self.executor.max_workers, paranets
                ),
            });
        }
        if self.paranet.sync_frequency_ms == 0 {
            return Err(NodeError::ConfigError {
                reason: "paranet.sync_frequency_ms must be positive".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_types::paranet::{AccessPolicy, Paranet};
    use trellis_types::ual::Ual;

    #[test]
    fn test_default_config() {
        let config = NodeConfig::default();
        assert_eq!(config.storage.db_type, "memory");
        assert_eq!(config.executor.max_workers, 100);
        assert_eq!(config.protocol.get_batch_size, 5);
        assert_eq!(config.paranet.batch_size, 50);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let mut config = NodeConfig::default();
        config.paranet.paranets.push(Paranet {
            ual: Ual::derive("otp:2043", "0xparanet", 7),
            id: "0xpid".to_string(),
            blockchain: "otp:2043".to_string(),
            access_policy: AccessPolicy::Curated,
        });
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let deserialized: NodeConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(deserialized.storage.data_dir, config.storage.data_dir);
        assert_eq!(deserialized.protocol, config.protocol);
        assert_eq!(deserialized.paranet, config.paranet);
    }

    #[test]
    fn test_init_creates_config_file() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().to_str().unwrap();
        NodeConfig::init(dir).unwrap();

        let config_path = tmp.path().join(CONFIG_FILE_NAME);
        assert!(config_path.exists());

        let config = NodeConfig::load(config_path.to_str().unwrap()).unwrap();
        assert_eq!(config.storage.db_type, "memory");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(CONFIG_FILE_NAME);
        std::fs::write(
            &path,
            r#"
[storage]
data_dir = "/var/lib/trellis"
db_type = "sqlite"

[paranet]
batch_size = 10

[[paranet.paranets]]
ual = "did:dkg:otp:2043/0xparanet/1"
id = "0xpid"
blockchain = "otp:2043"
access_policy = "OPEN"
"#,
        )
        .unwrap();

        let config = NodeConfig::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.storage.db_type, "sqlite");
        assert_eq!(config.paranet.batch_size, 10);
        assert_eq!(config.paranet.retries_limit, 3);
        assert_eq!(config.paranet.paranets.len(), 1);
        assert_eq!(config.paranet.paranets[0].access_policy, AccessPolicy::Open);
        assert_eq!(config.executor.max_workers, 100);
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let mut config = NodeConfig::default();
        config.storage.db_type = "rocksdb".to_string();
        assert!(matches!(
            config.validate(),
            Err(NodeError::ConfigError { .. })
        ));
    }

    #[test]
    fn test_single_worker_rejected() {
        let mut config = NodeConfig::default();
        config.executor.max_workers = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_workers_must_exceed_paranet_count() {
        let mut config = NodeConfig::default();
        for token in 1..=2 {
            config.paranet.paranets.push(Paranet {
                ual: Ual::derive("otp:2043", "0xparanet", token),
                id: format!("0xpid{}", token),
                blockchain: "otp:2043".to_string(),
                access_policy: AccessPolicy::Open,
            });
        }

        config.executor.max_workers = 2;
        assert!(matches!(
            config.validate(),
            Err(NodeError::ConfigError { ref reason }) if reason.contains("synced paranets")
        ));

        config.executor.max_workers = 3;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = NodeConfig::load("/nonexistent/path/trellis.toml");
        assert!(result.is_err());
    }
}
