//! Cryptographic primitives and address derivation for node identities

use crate::error::NodeError;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bech32::{Bech32, ByteIterExt, Fe32IterExt, Hrp};
use once_cell::sync::Lazy;
use rand::rngs::OsRng;
use secp256k1::{
    constants::{COMPACT_SIGNATURE_SIZE, PUBLIC_KEY_SIZE, SECRET_KEY_SIZE},
    ecdsa::Signature,
    All, Message, PublicKey, Secp256k1, SecretKey,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A thread-safe, lazily initialized Secp256k1 context.
static SECP256K1_CONTEXT: Lazy<Secp256k1<All>> = Lazy::new(Secp256k1::new);

/// Length in bytes of node identifiers and consensus addresses.
pub const ADDRESS_SIZE: usize = 20;

pub const PUB_KEY_TYPE: &str = "trinity/PubKeySecp256k1";
pub const PRIV_KEY_TYPE: &str = "trinity/PrivKeySecp256k1";

const CONS_ADDR_HRP: Hrp = Hrp::parse_unchecked("trinityvalcons");
const CONS_PUB_HRP: Hrp = Hrp::parse_unchecked("trinityvalconspub");

/// Truncated SHA-256 of a compressed public key.
pub type Address = [u8; ADDRESS_SIZE];

#[derive(Debug, Clone)]
pub struct KeyPair {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
}

impl KeyPair {
    /// Generates a new random KeyPair using the OS random number generator.
    pub fn generate() -> Self {
        let secret_key = SecretKey::new(&mut OsRng);
        Self::from_secret_key(secret_key)
    }

    pub fn from_secret_key(secret_key: SecretKey) -> Self {
        let public_key = PublicKey::from_secret_key(&SECP256K1_CONTEXT, &secret_key);
        KeyPair {
            secret_key,
            public_key,
        }
    }

    /// Creates a KeyPair from raw secret key bytes.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, NodeError> {
        let secret_key = SecretKey::from_slice(bytes).map_err(|e| {
            if bytes.len() != SECRET_KEY_SIZE {
                NodeError::Crypto(format!(
                    "Secret key must be {} bytes, got {}",
                    SECRET_KEY_SIZE,
                    bytes.len()
                ))
            } else {
                NodeError::Crypto(format!("Invalid secret key bytes: {}", e))
            }
        })?;

        Ok(Self::from_secret_key(secret_key))
    }

    pub fn secret_bytes(&self) -> [u8; SECRET_KEY_SIZE] {
        self.secret_key.secret_bytes()
    }

    pub fn public_key_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.public_key.serialize()
    }

    pub fn address(&self) -> Address {
        consensus_address(&self.public_key)
    }

    /// Signs a message (which is first hashed using SHA-256) and returns the compact signature bytes.
    pub fn sign(&self, message: &[u8]) -> Result<[u8; COMPACT_SIGNATURE_SIZE], NodeError> {
        let digest = Sha256::digest(message);
        let message = Message::from_digest_slice(&digest)
            .map_err(|e| NodeError::Crypto(format!("Failed to create message: {}", e)))?;
        let signature = SECP256K1_CONTEXT.sign_ecdsa(&message, &self.secret_key);
        Ok(signature.serialize_compact())
    }
}

/// Verifies an ECDSA signature given the raw public key bytes, message, and signature bytes.
pub fn verify_signature(
    public_key_bytes: &[u8],
    message: &[u8],
    signature_bytes: &[u8],
) -> Result<(), NodeError> {
    if signature_bytes.len() != COMPACT_SIGNATURE_SIZE {
        return Err(NodeError::Crypto(format!(
            "Signature must be exactly {} bytes (compact), got {}",
            COMPACT_SIGNATURE_SIZE,
            signature_bytes.len()
        )));
    }
    let public_key = public_key_from_bytes(public_key_bytes)?;
    let digest = Sha256::digest(message);
    let message = Message::from_digest_slice(&digest)
        .map_err(|e| NodeError::Crypto(format!("Failed to create message: {}", e)))?;
    let signature = Signature::from_compact(signature_bytes)
        .map_err(|e| NodeError::Crypto(format!("Invalid signature: {}", e)))?;

    SECP256K1_CONTEXT
        .verify_ecdsa(&message, &signature, &public_key)
        .map_err(|_| NodeError::Crypto("Signature verification failed".to_string()))
}

pub fn public_key_from_bytes(bytes: &[u8]) -> Result<PublicKey, NodeError> {
    if bytes.len() != PUBLIC_KEY_SIZE {
        return Err(NodeError::Crypto(format!(
            "Public key must be exactly {} bytes (compressed), got {}",
            PUBLIC_KEY_SIZE,
            bytes.len()
        )));
    }
    PublicKey::from_slice(bytes).map_err(|e| NodeError::Crypto(format!("Invalid public key: {}", e)))
}

/// Consensus address: the first 20 bytes of SHA-256 of the compressed key.
pub fn consensus_address(public_key: &PublicKey) -> Address {
    let digest = Sha256::digest(public_key.serialize());
    let mut address = [0u8; ADDRESS_SIZE];
    address.copy_from_slice(&digest[..ADDRESS_SIZE]);
    address
}

/// Peer-to-peer identifier of a node, lowercase hex of its address.
pub fn node_id(public_key: &PublicKey) -> String {
    hex::encode(consensus_address(public_key))
}

/// `id@host:port` string other nodes use to dial this node.
pub fn peer_address(public_key: &PublicKey, host: &str, port: u16) -> String {
    format!("{}@{}:{}", node_id(public_key), host, port)
}

/// Upper-case hex form stored in key files and genesis documents.
pub fn address_to_hex(address: &Address) -> String {
    hex::encode_upper(address)
}

pub fn address_from_hex(hex_str: &str) -> Result<Address, NodeError> {
    let bytes = hex::decode(hex_str)
        .map_err(|e| NodeError::Crypto(format!("Invalid hex address: {}", e)))?;
    bytes.try_into().map_err(|b: Vec<u8>| {
        NodeError::Crypto(format!(
            "Address must be {} bytes, got {}",
            ADDRESS_SIZE,
            b.len()
        ))
    })
}

pub fn bech32_consensus_address(public_key: &PublicKey) -> String {
    bech32_encode(CONS_ADDR_HRP, &consensus_address(public_key))
}

pub fn bech32_consensus_pubkey(public_key: &PublicKey) -> String {
    bech32_encode(CONS_PUB_HRP, &public_key.serialize())
}

fn bech32_encode(hrp: Hrp, data: &[u8]) -> String {
    data.iter()
        .copied()
        .bytes_to_fes()
        .with_checksum::<Bech32>(&hrp)
        .chars()
        .collect()
}

/// Typed, base64-encoded key as it appears in JSON documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedKey {
    #[serde(rename = "type")]
    pub key_type: String,
    pub value: String,
}

impl EncodedKey {
    pub fn public(public_key: &PublicKey) -> Self {
        Self {
            key_type: PUB_KEY_TYPE.to_string(),
            value: BASE64.encode(public_key.serialize()),
        }
    }

    pub fn private(keypair: &KeyPair) -> Self {
        Self {
            key_type: PRIV_KEY_TYPE.to_string(),
            value: BASE64.encode(keypair.secret_bytes()),
        }
    }

    pub fn decode_public(&self) -> Result<PublicKey, NodeError> {
        self.expect_type(PUB_KEY_TYPE)?;
        public_key_from_bytes(&self.decode_bytes()?)
    }

    pub fn decode_private(&self) -> Result<KeyPair, NodeError> {
        self.expect_type(PRIV_KEY_TYPE)?;
        KeyPair::from_secret_bytes(&self.decode_bytes()?)
    }

    fn expect_type(&self, expected: &str) -> Result<(), NodeError> {
        if self.key_type != expected {
            return Err(NodeError::Crypto(format!(
                "expected key type {}, got {}",
                expected, self.key_type
            )));
        }
        Ok(())
    }

    fn decode_bytes(&self) -> Result<Vec<u8>, NodeError> {
        BASE64
            .decode(&self.value)
            .map_err(|e| NodeError::Crypto(format!("Invalid base64 key: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_generation() {
        let keypair = KeyPair::generate();
        assert_eq!(keypair.public_key_bytes().len(), PUBLIC_KEY_SIZE);
        assert_eq!(keypair.secret_bytes().len(), SECRET_KEY_SIZE);
    }

    #[test]
    fn test_signing_and_verification() {
        let keypair = KeyPair::generate();
        let message = b"vote/12/0/prevote";

        let signature = keypair.sign(message).unwrap();
        assert!(verify_signature(&keypair.public_key_bytes(), message, &signature).is_ok());

        let other = KeyPair::generate();
        let result = verify_signature(&other.public_key_bytes(), message, &signature);
        assert_eq!(
            result.unwrap_err().to_string(),
            "cryptographic error: Signature verification failed"
        );
    }

    #[test]
    fn test_addresses_are_pure() {
        let keypair = KeyPair::from_secret_bytes(&[7u8; 32]).unwrap();
        let again = KeyPair::from_secret_bytes(&[7u8; 32]).unwrap();

        assert_eq!(node_id(&keypair.public_key), node_id(&again.public_key));
        assert_eq!(node_id(&keypair.public_key).len(), ADDRESS_SIZE * 2);
        assert_eq!(
            bech32_consensus_address(&keypair.public_key),
            bech32_consensus_address(&again.public_key)
        );
    }

    #[test]
    fn test_bech32_round_trip_and_prefixes() {
        let keypair = KeyPair::generate();
        let addr = bech32_consensus_address(&keypair.public_key);
        assert!(addr.starts_with("trinityvalcons1"));

        let (hrp, data) = bech32::decode(&addr).unwrap();
        assert_eq!(hrp.as_str(), "trinityvalcons");
        assert_eq!(data, keypair.address().to_vec());

        let pubkey = bech32_consensus_pubkey(&keypair.public_key);
        assert!(pubkey.starts_with("trinityvalconspub1"));
        let (_, data) = bech32::decode(&pubkey).unwrap();
        assert_eq!(data, keypair.public_key_bytes().to_vec());
    }

    #[test]
    fn test_hex_address_parsing() {
        let keypair = KeyPair::generate();
        let hex_addr = address_to_hex(&keypair.address());
        assert_eq!(address_from_hex(&hex_addr).unwrap(), keypair.address());
        assert!(address_from_hex("ABCD")
            .unwrap_err()
            .to_string()
            .contains("Address must be 20 bytes"));
    }

    #[test]
    fn test_encoded_key_rejects_wrong_type() {
        let keypair = KeyPair::generate();
        let public = EncodedKey::public(&keypair.public_key);
        assert_eq!(public.decode_public().unwrap(), keypair.public_key);
        assert!(public.decode_private().is_err());

        let private = EncodedKey::private(&keypair);
        assert_eq!(
            private.decode_private().unwrap().public_key,
            keypair.public_key
        );
    }

    #[test]
    fn test_peer_address_format() {
        let keypair = KeyPair::generate();
        let peer = peer_address(&keypair.public_key, "10.0.0.1", 26656);
        assert!(peer.ends_with("@10.0.0.1:26656"));
        assert!(peer.starts_with(&node_id(&keypair.public_key)));
    }

    #[test]
    fn test_from_secret_bytes_invalid_length() {
        let short_bytes = [1u8; SECRET_KEY_SIZE - 1];
        let result = KeyPair::from_secret_bytes(&short_bytes);
        assert!(result.unwrap_err().to_string().contains("Secret key must be"));
    }
}
