//! Validator set entries as committed by the application and exported in genesis documents

use crate::crypto::{self, EncodedKey};
use crate::error::{NodeError, Result};
use secp256k1::PublicKey;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisValidator {
    /// Upper-case hex consensus address.
    pub address: String,
    pub pub_key: EncodedKey,
    pub power: i64,
    #[serde(default)]
    pub name: String,
}

impl GenesisValidator {
    pub fn new(public_key: &PublicKey, power: i64, name: impl Into<String>) -> Self {
        Self {
            address: crypto::address_to_hex(&crypto::consensus_address(public_key)),
            pub_key: EncodedKey::public(public_key),
            power,
            name: name.into(),
        }
    }
}

/// Checks that every entry has a decodable key, an address derived from
/// that key, positive power, and that no address repeats.
pub fn validate_validator_set(validators: &[GenesisValidator]) -> Result<()> {
    let mut seen = HashSet::new();
    for validator in validators {
        let public_key = validator.pub_key.decode_public().map_err(|e| {
            NodeError::InvalidValidatorSet(format!("{}: {}", validator.address, e))
        })?;
        let derived = crypto::address_to_hex(&crypto::consensus_address(&public_key));
        if !validator.address.eq_ignore_ascii_case(&derived) {
            return Err(NodeError::InvalidValidatorSet(format!(
                "address {} does not match its public key ({})",
                validator.address, derived
            )));
        }
        if validator.power <= 0 {
            return Err(NodeError::InvalidValidatorSet(format!(
                "validator {} has non-positive power {}",
                validator.address, validator.power
            )));
        }
        if !seen.insert(derived) {
            return Err(NodeError::InvalidValidatorSet(format!(
                "duplicate validator {}",
                validator.address
            )));
        }
    }
    Ok(())
}

/// Orders a set by descending power, then address.
pub fn sort_validators(validators: &mut [GenesisValidator]) {
    validators.sort_by(|a, b| b.power.cmp(&a.power).then_with(|| a.address.cmp(&b.address)));
}
