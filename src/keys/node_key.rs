use crate::crypto::{self, EncodedKey, KeyPair};
use crate::error::{NodeError, Result};
use crate::fsutil;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Long-lived peer-to-peer identity of the node.
#[derive(Debug, Clone)]
pub struct NodeKey {
    keypair: KeyPair,
}

#[derive(Serialize, Deserialize)]
struct NodeKeyFile {
    priv_key: EncodedKey,
}

impl NodeKey {
    pub fn generate() -> Self {
        Self {
            keypair: KeyPair::generate(),
        }
    }

    pub fn id(&self) -> String {
        crypto::node_id(&self.keypair.public_key)
    }

    pub fn public_key(&self) -> &secp256k1::PublicKey {
        &self.keypair.public_key
    }

    pub fn peer_address(&self, host: &str, port: u16) -> String {
        crypto::peer_address(&self.keypair.public_key, host, port)
    }

    pub fn secret_bytes(&self) -> [u8; 32] {
        self.keypair.secret_bytes()
    }

    pub fn load(path: &Path) -> Result<Option<Self>> {
        let Some(raw) = fsutil::read_optional(path)? else {
            return Ok(None);
        };
        let file: NodeKeyFile =
            serde_json::from_str(&raw).map_err(|e| NodeError::corrupt(path, e))?;
        let keypair = file
            .priv_key
            .decode_private()
            .map_err(|e| NodeError::corrupt(path, e))?;
        Ok(Some(Self { keypair }))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fsutil::write_json_atomic(
            path,
            &NodeKeyFile {
                priv_key: EncodedKey::private(&self.keypair),
            },
        )
    }
}

pub fn load_or_generate_node_key(path: &Path) -> Result<NodeKey> {
    if let Some(key) = NodeKey::load(path)? {
        return Ok(key);
    }

    let key = NodeKey::generate();
    key.save(path)?;
    info!(node_id = %key.id(), path = %path.display(), "generated node key");
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_generate_then_reload_is_identical() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config").join("node_key.json");

        let first = load_or_generate_node_key(&path).unwrap();
        let bytes_on_disk = fs::read(&path).unwrap();
        let second = load_or_generate_node_key(&path).unwrap();

        assert_eq!(first.id(), second.id());
        assert_eq!(first.secret_bytes(), second.secret_bytes());
        assert_eq!(fs::read(&path).unwrap(), bytes_on_disk);
    }

    #[test]
    fn test_corrupt_file_is_not_overwritten() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("node_key.json");
        fs::write(&path, "{ not json").unwrap();

        let err = load_or_generate_node_key(&path).unwrap_err();
        assert!(matches!(err, NodeError::CorruptState { .. }));
        assert_eq!(fs::read_to_string(&path).unwrap(), "{ not json");
    }

    #[test]
    fn test_binary_file_is_corrupt_and_kept() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("node_key.json");
        fs::write(&path, [0xff, 0xfe, 0x00]).unwrap();

        let err = load_or_generate_node_key(&path).unwrap_err();
        assert!(matches!(err, NodeError::CorruptState { .. }));
        assert_eq!(fs::read(&path).unwrap(), vec![0xff, 0xfe, 0x00]);
    }

    #[test]
    fn test_wrong_key_type_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("node_key.json");
        fs::write(
            &path,
            r#"{"priv_key":{"type":"ed25519","value":"AAAA"}}"#,
        )
        .unwrap();

        assert!(matches!(
            load_or_generate_node_key(&path),
            Err(NodeError::CorruptState { .. })
        ));
    }
}
