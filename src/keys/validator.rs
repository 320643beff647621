use crate::crypto::{self, Address, EncodedKey, KeyPair};
use crate::error::{NodeError, Result};
use crate::fsutil;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use secp256k1::PublicKey;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Consensus step a signature was produced for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum SignStep {
    #[default]
    None = 0,
    Propose = 1,
    Prevote = 2,
    Precommit = 3,
}

impl TryFrom<u8> for SignStep {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(SignStep::None),
            1 => Ok(SignStep::Propose),
            2 => Ok(SignStep::Prevote),
            3 => Ok(SignStep::Precommit),
            other => Err(format!("unknown sign step {}", other)),
        }
    }
}

impl From<SignStep> for u8 {
    fn from(step: SignStep) -> u8 {
        step as u8
    }
}

/// Highest height/round/step this validator has signed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastSignState {
    pub height: u64,
    pub round: u32,
    pub step: SignStep,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sign_bytes: Option<String>,
}

impl LastSignState {
    pub(crate) fn position(&self) -> (u64, u32, SignStep) {
        (self.height, self.round, self.step)
    }

    pub fn load(path: &Path) -> Result<Option<Self>> {
        let Some(raw) = fsutil::read_optional(path)? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| NodeError::corrupt(path, e))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fsutil::write_json_atomic(path, self)
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub(crate) struct ValidatorKeyFile {
    pub address: String,
    pub pub_key: EncodedKey,
    pub priv_key: EncodedKey,
}

impl ValidatorKeyFile {
    pub(crate) fn from_keypair(keypair: &KeyPair) -> Self {
        Self {
            address: crypto::address_to_hex(&keypair.address()),
            pub_key: EncodedKey::public(&keypair.public_key),
            priv_key: EncodedKey::private(keypair),
        }
    }

    /// Decodes the key pair and checks the stored public key and address
    /// against it.
    pub(crate) fn into_keypair(self) -> std::result::Result<KeyPair, String> {
        let keypair = self.priv_key.decode_private().map_err(|e| e.to_string())?;
        let public = self.pub_key.decode_public().map_err(|e| e.to_string())?;
        if public != keypair.public_key {
            return Err("pub_key does not match priv_key".to_string());
        }
        if !self
            .address
            .eq_ignore_ascii_case(&crypto::address_to_hex(&keypair.address()))
        {
            return Err(format!(
                "address {} does not match pub_key",
                self.address
            ));
        }
        Ok(keypair)
    }
}

/// Validator signing key bound to its persisted last-signed state.
#[derive(Debug)]
pub struct ValidatorKey {
    keypair: KeyPair,
    key_path: PathBuf,
    state_path: PathBuf,
    state: LastSignState,
}

impl ValidatorKey {
    pub fn public_key(&self) -> &PublicKey {
        &self.keypair.public_key
    }

    pub fn address(&self) -> Address {
        self.keypair.address()
    }

    pub fn bech32_address(&self) -> String {
        crypto::bech32_consensus_address(&self.keypair.public_key)
    }

    pub fn bech32_pubkey(&self) -> String {
        crypto::bech32_consensus_pubkey(&self.keypair.public_key)
    }

    pub fn encoded_public_key(&self) -> EncodedKey {
        EncodedKey::public(&self.keypair.public_key)
    }

    pub fn last_sign_state(&self) -> &LastSignState {
        &self.state
    }

    pub fn key_path(&self) -> &Path {
        &self.key_path
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    /// Signs `sign_bytes` for the given height/round/step.
    ///
    /// The new last-signed state is on disk before the signature is
    /// returned. Re-signing identical bytes at the last position returns
    /// the stored signature; anything below the last position, or
    /// different bytes at the same position, is refused.
    pub fn sign(
        &mut self,
        height: u64,
        round: u32,
        step: SignStep,
        sign_bytes: &[u8],
    ) -> Result<Vec<u8>> {
        let requested = (height, round, step);
        match requested.cmp(&self.state.position()) {
            Ordering::Less => {
                return Err(NodeError::DoubleSign(format!(
                    "{}/{}/{:?} is below last signed {}/{}/{:?}",
                    height,
                    round,
                    step,
                    self.state.height,
                    self.state.round,
                    self.state.step
                )));
            }
            Ordering::Equal => return self.resign(sign_bytes),
            Ordering::Greater => {}
        }

        let signature = self.keypair.sign(sign_bytes)?;
        let next = LastSignState {
            height,
            round,
            step,
            signature: Some(BASE64.encode(signature)),
            sign_bytes: Some(hex::encode(sign_bytes)),
        };
        next.save(&self.state_path)?;
        self.state = next;
        debug!(height, round, ?step, "signed and persisted sign state");
        Ok(signature.to_vec())
    }

    fn resign(&self, sign_bytes: &[u8]) -> Result<Vec<u8>> {
        let same_bytes = self.state.sign_bytes.as_deref() == Some(hex::encode(sign_bytes).as_str());
        match (&self.state.signature, same_bytes) {
            (Some(signature), true) => BASE64
                .decode(signature)
                .map_err(|e| NodeError::corrupt(&self.state_path, e)),
            _ => Err(NodeError::DoubleSign(format!(
                "conflicting payload at already signed {}/{}/{:?}",
                self.state.height, self.state.round, self.state.step
            ))),
        }
    }

    fn load_key(key_path: &Path) -> Result<Option<KeyPair>> {
        let Some(raw) = fsutil::read_optional(key_path)? else {
            return Ok(None);
        };
        let file: ValidatorKeyFile =
            serde_json::from_str(&raw).map_err(|e| NodeError::corrupt(key_path, e))?;
        file.into_keypair()
            .map(Some)
            .map_err(|reason| NodeError::corrupt(key_path, reason))
    }
}

pub fn load_or_generate_validator_key(key_path: &Path, state_path: &Path) -> Result<ValidatorKey> {
    if let Some(keypair) = ValidatorKey::load_key(key_path)? {
        let state = LastSignState::load(state_path)?.ok_or_else(|| {
            NodeError::corrupt(
                state_path,
                "sign state is missing while the validator key exists",
            )
        })?;
        return Ok(ValidatorKey {
            keypair,
            key_path: key_path.to_path_buf(),
            state_path: state_path.to_path_buf(),
            state,
        });
    }

    let keypair = KeyPair::generate();
    let state = match LastSignState::load(state_path)? {
        Some(existing) => {
            warn!(
                height = existing.height,
                path = %state_path.display(),
                "keeping existing sign state for newly generated validator key"
            );
            existing
        }
        None => {
            let fresh = LastSignState::default();
            fresh.save(state_path)?;
            fresh
        }
    };
    fsutil::write_json_atomic(key_path, &ValidatorKeyFile::from_keypair(&keypair))?;
    info!(
        address = %crypto::address_to_hex(&keypair.address()),
        path = %key_path.display(),
        "generated validator key"
    );

    Ok(ValidatorKey {
        keypair,
        key_path: key_path.to_path_buf(),
        state_path: state_path.to_path_buf(),
        state,
    })
}
