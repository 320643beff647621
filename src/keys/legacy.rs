//! Upgrade of the single-file validator layout
//!
//! Older releases kept key material and sign state together in
//! `config/priv_validator.json`. The upgrade splits it into the current
//! key and state files and moves the old file aside as `.bak`.

use super::validator::{LastSignState, SignStep, ValidatorKeyFile};
use crate::config::NodeLayout;
use crate::crypto::EncodedKey;
use crate::error::{NodeError, Result};
use crate::fsutil;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LegacyUpgrade {
    /// No legacy file present.
    NotNeeded,
    /// Legacy file present, but the current key file already exists.
    AlreadyCurrent,
    /// Legacy file converted; the original now lives at `backup`.
    Upgraded { backup: PathBuf },
}

#[derive(Deserialize)]
struct LegacyPrivValidator {
    address: String,
    pub_key: EncodedKey,
    priv_key: EncodedKey,
    #[serde(default)]
    last_height: u64,
    #[serde(default)]
    last_round: u32,
    #[serde(default)]
    last_step: u8,
    #[serde(default)]
    last_signature: Option<String>,
    #[serde(default)]
    last_signbytes: Option<String>,
}

impl LegacyPrivValidator {
    fn split(self) -> std::result::Result<(ValidatorKeyFile, LastSignState), String> {
        let step = SignStep::try_from(self.last_step)?;
        let key = ValidatorKeyFile {
            address: self.address,
            pub_key: self.pub_key,
            priv_key: self.priv_key,
        };
        let state = LastSignState {
            height: self.last_height,
            round: self.last_round,
            step,
            signature: self.last_signature,
            sign_bytes: self.last_signbytes,
        };
        Ok((key, state))
    }
}

/// Converts a legacy validator file in place. Safe to call on every start.
pub fn upgrade_legacy_validator(layout: &NodeLayout) -> Result<LegacyUpgrade> {
    let legacy_path = layout.legacy_priv_validator_file();
    let Some(raw) = fsutil::read_optional(&legacy_path)? else {
        return Ok(LegacyUpgrade::NotNeeded);
    };

    let key_path = layout.priv_validator_key_file();
    if key_path.exists() {
        warn!(
            legacy = %legacy_path.display(),
            "legacy validator file ignored, current key file already present"
        );
        return Ok(LegacyUpgrade::AlreadyCurrent);
    }

    let legacy: LegacyPrivValidator =
        serde_json::from_str(&raw).map_err(|e| NodeError::corrupt(&legacy_path, e))?;
    let (key_file, state) = legacy
        .split()
        .map_err(|reason| NodeError::corrupt(&legacy_path, reason))?;

    // Validate before writing anything so a bad legacy file stays the only copy.
    key_file
        .clone()
        .into_keypair()
        .map_err(|reason| NodeError::corrupt(&legacy_path, reason))?;

    let state_path = layout.priv_validator_state_file();
    let keep_state = match LastSignState::load(&state_path)? {
        Some(existing) if existing.position() >= state.position() => existing,
        _ => state,
    };
    keep_state.save(&state_path)?;
    fsutil::write_json_atomic(&key_path, &key_file)?;

    let backup = legacy_path.with_extension("json.bak");
    fs::rename(&legacy_path, &backup).map_err(|e| NodeError::io(&legacy_path, e))?;

    info!(
        legacy = %legacy_path.display(),
        key = %key_path.display(),
        state = %state_path.display(),
        "upgraded legacy validator file"
    );
    Ok(LegacyUpgrade::Upgraded { backup })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{self, KeyPair};
    use crate::keys::load_or_generate_validator_key;
    use tempfile::TempDir;

    fn write_legacy(layout: &NodeLayout, keypair: &KeyPair, last_height: u64) {
        let doc = serde_json::json!({
            "address": crypto::address_to_hex(&keypair.address()),
            "pub_key": EncodedKey::public(&keypair.public_key),
            "priv_key": EncodedKey::private(keypair),
            "last_height": last_height,
            "last_round": 0,
            "last_step": 3,
        });
        fs::create_dir_all(layout.config_dir()).unwrap();
        fs::write(
            layout.legacy_priv_validator_file(),
            serde_json::to_string_pretty(&doc).unwrap(),
        )
        .unwrap();
    }

    #[test]
    fn test_no_legacy_file_is_noop() {
        let dir = TempDir::new().unwrap();
        let layout = NodeLayout::new(dir.path());
        assert_eq!(
            upgrade_legacy_validator(&layout).unwrap(),
            LegacyUpgrade::NotNeeded
        );
        assert!(!layout.priv_validator_key_file().exists());
    }

    #[test]
    fn test_upgrade_splits_and_preserves_identity() {
        let dir = TempDir::new().unwrap();
        let layout = NodeLayout::new(dir.path());
        let keypair = KeyPair::generate();
        write_legacy(&layout, &keypair, 77);

        let outcome = upgrade_legacy_validator(&layout).unwrap();
        let backup = match outcome {
            LegacyUpgrade::Upgraded { backup } => backup,
            other => panic!("expected upgrade, got {:?}", other),
        };
        assert!(backup.exists());
        assert!(!layout.legacy_priv_validator_file().exists());

        let key = load_or_generate_validator_key(
            &layout.priv_validator_key_file(),
            &layout.priv_validator_state_file(),
        )
        .unwrap();
        assert_eq!(key.public_key(), &keypair.public_key);
        assert_eq!(key.last_sign_state().height, 77);
        assert_eq!(key.last_sign_state().step, SignStep::Precommit);

        // second run finds nothing left to do
        assert_eq!(
            upgrade_legacy_validator(&layout).unwrap(),
            LegacyUpgrade::NotNeeded
        );
    }

    #[test]
    fn test_upgrade_keeps_later_round_at_same_height() {
        let dir = TempDir::new().unwrap();
        let layout = NodeLayout::new(dir.path());
        let keypair = KeyPair::generate();
        let doc = serde_json::json!({
            "address": crypto::address_to_hex(&keypair.address()),
            "pub_key": EncodedKey::public(&keypair.public_key),
            "priv_key": EncodedKey::private(&keypair),
            "last_height": 77,
            "last_round": 0,
            "last_step": 1,
        });
        fs::create_dir_all(layout.config_dir()).unwrap();
        fs::write(
            layout.legacy_priv_validator_file(),
            serde_json::to_string_pretty(&doc).unwrap(),
        )
        .unwrap();
        let persisted = LastSignState {
            height: 77,
            round: 5,
            step: SignStep::Precommit,
            signature: None,
            sign_bytes: None,
        };
        persisted.save(&layout.priv_validator_state_file()).unwrap();

        upgrade_legacy_validator(&layout).unwrap();

        let after = LastSignState::load(&layout.priv_validator_state_file())
            .unwrap()
            .unwrap();
        assert_eq!(after.position(), (77, 5, SignStep::Precommit));
    }

    #[test]
    fn test_current_layout_wins() {
        let dir = TempDir::new().unwrap();
        let layout = NodeLayout::new(dir.path());
        let current = load_or_generate_validator_key(
            &layout.priv_validator_key_file(),
            &layout.priv_validator_state_file(),
        )
        .unwrap();
        write_legacy(&layout, &KeyPair::generate(), 5);

        assert_eq!(
            upgrade_legacy_validator(&layout).unwrap(),
            LegacyUpgrade::AlreadyCurrent
        );
        let reloaded = load_or_generate_validator_key(
            &layout.priv_validator_key_file(),
            &layout.priv_validator_state_file(),
        )
        .unwrap();
        assert_eq!(reloaded.public_key(), current.public_key());
    }

    #[test]
    fn test_corrupt_legacy_file_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let layout = NodeLayout::new(dir.path());
        fs::create_dir_all(layout.config_dir()).unwrap();
        fs::write(layout.legacy_priv_validator_file(), "garbage").unwrap();

        assert!(matches!(
            upgrade_legacy_validator(&layout),
            Err(NodeError::CorruptState { .. })
        ));
        assert!(!layout.priv_validator_key_file().exists());
        assert!(!layout.priv_validator_state_file().exists());
        assert!(layout.legacy_priv_validator_file().exists());
    }
}
