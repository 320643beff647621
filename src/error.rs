//! Error types for the TrinityChain node bootstrap

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    /// Invalid home directory, config file or flag value. Nothing was mutated.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A key or state file exists but cannot be parsed. Never regenerated.
    #[error("corrupt state in {}: {reason}", path.display())]
    CorruptState { path: PathBuf, reason: String },

    #[error("IO error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("incompatible store at {}: {reason}", path.display())]
    IncompatibleStore { path: PathBuf, reason: String },

    #[error("store at {} is already opened by another handle", path.display())]
    StoreLocked { path: PathBuf },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Requested export height is not available in the store.
    #[error("height {requested} is not available for export: {reason}")]
    ExportRange { requested: u64, reason: String },

    /// A reset step failed after earlier steps had already removed artifacts.
    #[error(
        "reset stopped after removing [{}]; still present: [{}]: {source}",
        display_paths(removed),
        display_paths(remaining)
    )]
    PartialReset {
        removed: Vec<PathBuf>,
        remaining: Vec<PathBuf>,
        #[source]
        source: io::Error,
    },

    #[error("invalid validator set: {0}")]
    InvalidValidatorSet(String),

    #[error("cryptographic error: {0}")]
    Crypto(String),

    /// Signing would regress or conflict with the persisted last-signed state.
    #[error("refusing to sign: {0}")]
    DoubleSign(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("application error: {0}")]
    Application(String),
}

impl NodeError {
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        NodeError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn corrupt(path: impl AsRef<Path>, reason: impl ToString) -> Self {
        NodeError::CorruptState {
            path: path.as_ref().to_path_buf(),
            reason: reason.to_string(),
        }
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, NodeError>;
