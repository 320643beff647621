//! Static engine and protocol versions

use crate::error::{NodeError, Result};
use serde::Serialize;

pub const ABCI_VERSION: &str = "0.17.0";
pub const BLOCK_PROTOCOL: u64 = 11;
pub const P2P_PROTOCOL: u64 = 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionInfo {
    pub trinityd: String,
    pub abci: String,
    pub block_protocol: u64,
    pub p2p_protocol: u64,
}

impl VersionInfo {
    pub fn current() -> Self {
        Self {
            trinityd: env!("CARGO_PKG_VERSION").to_string(),
            abci: ABCI_VERSION.to_string(),
            block_protocol: BLOCK_PROTOCOL,
            p2p_protocol: P2P_PROTOCOL,
        }
    }

    /// `key = value` lines, one per field.
    pub fn render(&self) -> Result<String> {
        toml::to_string(self)
            .map_err(|e| NodeError::Application(format!("cannot render version info: {}", e)))
    }
}
