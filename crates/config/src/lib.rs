//! Configuration schema and loader for vclocked stores.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Identifier used to tag this store's vector-clock increments.
    pub node_id: String,

    /// Storage settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Read-repair settings.
    #[serde(default)]
    pub repair: RepairConfig,

    /// Streaming scan settings.
    #[serde(default)]
    pub scan: ScanConfig,

    /// Bulk ingest settings.
    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for the WAL.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Fsync policy: "always", "batch", "none".
    #[serde(default = "default_fsync")]
    pub fsync: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            fsync: default_fsync(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairConfig {
    /// Whether discarded versions are physically deleted.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Physical entries fetched per store round trip.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Depth of the bulk-write channel.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

// --- Defaults ---

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}
fn default_fsync() -> String {
    "batch".to_string()
}
fn default_true() -> bool {
    true
}
fn default_page_size() -> usize {
    256
}
fn default_channel_capacity() -> usize {
    1024
}

// --- Loading ---

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl StoreConfig {
    /// A config with defaults for everything but the node id.
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            storage: StorageConfig::default(),
            repair: RepairConfig::default(),
            scan: ScanConfig::default(),
            ingest: IngestConfig::default(),
        }
    }

    /// Validate that configuration values are consistent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node_id.is_empty() {
            return Err(ConfigError::Invalid("node_id must not be empty".into()));
        }
        if self.node_id.contains(['\0', '\u{1}']) {
            return Err(ConfigError::Invalid(
                "node_id must not contain reserved separator bytes".into(),
            ));
        }
        if self.scan.page_size == 0 {
            return Err(ConfigError::Invalid("scan.page_size must be > 0".into()));
        }
        if self.ingest.channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "ingest.channel_capacity must be > 0".into(),
            ));
        }
        match self.storage.fsync.to_lowercase().as_str() {
            "always" | "batch" | "none" => {}
            other => {
                return Err(ConfigError::Invalid(format!(
                    "storage.fsync ({}) must be one of always, batch, none",
                    other
                )))
            }
        }
        Ok(())
    }
}

/// Load a `StoreConfig` from a YAML file path.
pub fn load_from_file(path: &std::path::Path) -> Result<StoreConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    load_from_str(&contents)
}

/// Load a `StoreConfig` from a YAML string.
pub fn load_from_str(yaml: &str) -> Result<StoreConfig, ConfigError> {
    let config: StoreConfig = serde_yaml::from_str(yaml)?;
    config.validate()?;
    Ok(config)
}
