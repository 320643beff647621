//! Operator identity commands. Each returns the text to print.

use crate::config::NodeLayout;
use crate::error::Result;
use crate::keys::{
    load_or_generate_node_key, load_or_generate_validator_key, upgrade_legacy_validator,
    ValidatorKey,
};
use crate::reset::{reset_all, ResetReport};
use crate::version::VersionInfo;
use clap::ValueEnum;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Prints the node identifier, creating the node key on first use.
pub fn show_node_id(layout: &NodeLayout) -> Result<String> {
    Ok(load_or_generate_node_key(&layout.node_key_file())?.id())
}

pub fn show_validator(layout: &NodeLayout, format: OutputFormat) -> Result<String> {
    let key = load_validator(layout)?;
    match format {
        OutputFormat::Text => Ok(key.bech32_pubkey()),
        OutputFormat::Json => Ok(serde_json::to_string(&key.encoded_public_key())?),
    }
}

pub fn show_address(layout: &NodeLayout, format: OutputFormat) -> Result<String> {
    let key = load_validator(layout)?;
    let address = key.bech32_address();
    match format {
        OutputFormat::Text => Ok(address),
        OutputFormat::Json => Ok(serde_json::to_string(&address)?),
    }
}

pub fn version() -> Result<String> {
    VersionInfo::current().render()
}

pub fn unsafe_reset_all(layout: &NodeLayout) -> Result<ResetReport> {
    reset_all(layout)
}

fn load_validator(layout: &NodeLayout) -> Result<ValidatorKey> {
    upgrade_legacy_validator(layout)?;
    load_or_generate_validator_key(
        &layout.priv_validator_key_file(),
        &layout.priv_validator_state_file(),
    )
}
