//! Configuration management for a TrinityChain node home directory

use crate::error::{NodeError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_DIR: &str = "config";
pub const DATA_DIR: &str = "data";
pub const CONFIG_FILE: &str = "config.toml";
pub const NODE_KEY_FILE: &str = "node_key.json";
pub const PRIV_VALIDATOR_KEY_FILE: &str = "priv_validator_key.json";
pub const PRIV_VALIDATOR_STATE_FILE: &str = "priv_validator_state.json";
pub const LEGACY_PRIV_VALIDATOR_FILE: &str = "priv_validator.json";
pub const ADDR_BOOK_FILE: &str = "addrbook.json";

/// Paths of every artifact a node keeps under its home directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeLayout {
    root: PathBuf,
}

impl NodeLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_dir(&self) -> PathBuf {
        self.root.join(CONFIG_DIR)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join(DATA_DIR)
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir().join(CONFIG_FILE)
    }

    pub fn node_key_file(&self) -> PathBuf {
        self.config_dir().join(NODE_KEY_FILE)
    }

    pub fn priv_validator_key_file(&self) -> PathBuf {
        self.config_dir().join(PRIV_VALIDATOR_KEY_FILE)
    }

    pub fn priv_validator_state_file(&self) -> PathBuf {
        self.data_dir().join(PRIV_VALIDATOR_STATE_FILE)
    }

    /// Single-file validator layout written by older node releases.
    pub fn legacy_priv_validator_file(&self) -> PathBuf {
        self.config_dir().join(LEGACY_PRIV_VALIDATOR_FILE)
    }

    pub fn addr_book_file(&self) -> PathBuf {
        self.config_dir().join(ADDR_BOOK_FILE)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeConfig {
    #[serde(default = "default_chain_id")]
    pub chain_id: String,
    #[serde(default = "default_moniker")]
    pub moniker: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// File receiving the application trace. Empty disables tracing.
    #[serde(default)]
    pub trace_store: String,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StorageConfig {
    /// Number of recent heights kept exportable. 0 keeps everything.
    #[serde(default)]
    pub pruning_keep_recent: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            chain_id: default_chain_id(),
            moniker: default_moniker(),
            log_level: default_log_level(),
            trace_store: String::new(),
            storage: StorageConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chain_id.trim().is_empty() {
            return Err(NodeError::Configuration(
                "chain_id must not be empty".to_string(),
            ));
        }
        if self.moniker.trim().is_empty() {
            return Err(NodeError::Configuration(
                "moniker must not be empty".to_string(),
            ));
        }
        if !["trace", "debug", "info", "warn", "error"].contains(&self.log_level.as_str()) {
            return Err(NodeError::Configuration(format!(
                "unknown log_level '{}'",
                self.log_level
            )));
        }
        Ok(())
    }
}

/// Loads `config/config.toml` under the home directory, falling back to
/// defaults when the file is absent.
pub fn load_config(layout: &NodeLayout) -> Result<NodeConfig> {
    let path = layout.config_file();
    let config = match fs::read_to_string(&path) {
        Ok(raw) => toml::from_str::<NodeConfig>(&raw).map_err(|e| {
            NodeError::Configuration(format!("invalid {}: {}", path.display(), e))
        })?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => NodeConfig::default(),
        Err(e) => return Err(NodeError::io(&path, e)),
    };

    config.validate()?;
    Ok(config)
}

/// Default home directory: `~/.trinityd`.
pub fn default_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".trinityd")
}

fn default_chain_id() -> String {
    "trinity-devnet".to_string()
}

fn default_moniker() -> String {
    "trinity-node".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}
