//! Integration tests for node identity, legacy upgrade and reset

use std::fs;
use tempfile::TempDir;
use trinity_bootstrap::app::kvstore::KvStoreFactory;
use trinity_bootstrap::commands::{self, OutputFormat};
use trinity_bootstrap::config::{NodeConfig, NodeLayout};
use trinity_bootstrap::crypto::{self, EncodedKey, KeyPair};
use trinity_bootstrap::keys::{load_or_generate_node_key, load_or_generate_validator_key, SignStep};
use trinity_bootstrap::node::{Node, NodeContext};
use trinity_bootstrap::storage::StorageHandle;
use trinity_bootstrap::NodeError;

type TestResult = Result<(), Box<dyn std::error::Error>>;

/// Helper to start and stop a node once so every artifact exists
fn bootstrapped_home() -> Result<(TempDir, NodeLayout), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let layout = NodeLayout::new(dir.path());
    let context = NodeContext::load(layout.clone(), NodeConfig::default())?;
    let node = Node::bootstrap(context, &KvStoreFactory::default())?;
    node.shutdown();
    fs::write(layout.addr_book_file(), "{\"addrs\":[]}")?;
    Ok((dir, layout))
}

#[test]
fn test_keys_are_created_once() -> TestResult {
    let dir = TempDir::new()?;
    let layout = NodeLayout::new(dir.path());

    let node_a = load_or_generate_node_key(&layout.node_key_file())?;
    let node_bytes = fs::read(layout.node_key_file())?;
    let validator_a = load_or_generate_validator_key(
        &layout.priv_validator_key_file(),
        &layout.priv_validator_state_file(),
    )?;
    let validator_bytes = fs::read(layout.priv_validator_key_file())?;

    let node_b = load_or_generate_node_key(&layout.node_key_file())?;
    let validator_b = load_or_generate_validator_key(
        &layout.priv_validator_key_file(),
        &layout.priv_validator_state_file(),
    )?;

    assert_eq!(node_a.secret_bytes(), node_b.secret_bytes());
    assert_eq!(validator_a.public_key(), validator_b.public_key());
    assert_eq!(fs::read(layout.node_key_file())?, node_bytes);
    assert_eq!(fs::read(layout.priv_validator_key_file())?, validator_bytes);
    Ok(())
}

#[test]
fn test_sign_state_never_regresses_after_restart() -> TestResult {
    let dir = TempDir::new()?;
    let layout = NodeLayout::new(dir.path());
    let key_path = layout.priv_validator_key_file();
    let state_path = layout.priv_validator_state_file();

    {
        let mut key = load_or_generate_validator_key(&key_path, &state_path)?;
        key.sign(42, 0, SignStep::Precommit, b"block-42")?;
    }

    let mut key = load_or_generate_validator_key(&key_path, &state_path)?;
    assert_eq!(key.last_sign_state().height, 42);
    assert!(matches!(
        key.sign(41, 0, SignStep::Precommit, b"block-41"),
        Err(NodeError::DoubleSign(_))
    ));
    Ok(())
}

#[test]
fn test_show_commands_are_pure() -> TestResult {
    let (_dir, layout) = bootstrapped_home()?;

    let id = commands::show_node_id(&layout)?;
    assert_eq!(id, commands::show_node_id(&layout)?);
    assert_eq!(id.len(), 40);

    let address = commands::show_address(&layout, OutputFormat::Text)?;
    assert_eq!(address, commands::show_address(&layout, OutputFormat::Text)?);

    let pubkey: EncodedKey =
        serde_json::from_str(&commands::show_validator(&layout, OutputFormat::Json)?)?;
    let public_key = pubkey.decode_public()?;
    assert_eq!(address, crypto::bech32_consensus_address(&public_key));
    assert_eq!(
        commands::show_validator(&layout, OutputFormat::Text)?,
        crypto::bech32_consensus_pubkey(&public_key)
    );
    Ok(())
}

#[test]
fn test_legacy_validator_is_upgraded_by_show_validator() -> TestResult {
    let dir = TempDir::new()?;
    let layout = NodeLayout::new(dir.path());
    let keypair = KeyPair::generate();
    fs::create_dir_all(layout.config_dir())?;
    fs::write(
        layout.legacy_priv_validator_file(),
        serde_json::to_string_pretty(&serde_json::json!({
            "address": crypto::address_to_hex(&keypair.address()),
            "pub_key": EncodedKey::public(&keypair.public_key),
            "priv_key": EncodedKey::private(&keypair),
            "last_height": 77,
            "last_round": 1,
            "last_step": 3,
        }))?,
    )?;

    let shown = commands::show_validator(&layout, OutputFormat::Text)?;
    assert_eq!(shown, crypto::bech32_consensus_pubkey(&keypair.public_key));
    assert!(!layout.legacy_priv_validator_file().exists());
    assert!(layout.priv_validator_key_file().exists());

    let key = load_or_generate_validator_key(
        &layout.priv_validator_key_file(),
        &layout.priv_validator_state_file(),
    )?;
    assert_eq!(key.last_sign_state().height, 77);

    // second run is a no-op
    assert_eq!(commands::show_validator(&layout, OutputFormat::Text)?, shown);
    Ok(())
}

#[test]
fn test_reset_gives_a_fresh_identity() -> TestResult {
    let (_dir, layout) = bootstrapped_home()?;
    let before = commands::show_node_id(&layout)?;
    let address_before = commands::show_address(&layout, OutputFormat::Text)?;

    let report = commands::unsafe_reset_all(&layout)?;
    assert_eq!(report.removed.len(), 5);
    assert!(!layout.addr_book_file().exists());
    assert!(!layout.priv_validator_state_file().exists());
    assert!(fs::read_dir(layout.data_dir())?.next().is_none());

    let after = load_or_generate_node_key(&layout.node_key_file())?;
    assert_ne!(after.id(), before);
    assert_ne!(commands::show_address(&layout, OutputFormat::Text)?, address_before);

    let store = StorageHandle::open(layout.root())?;
    assert_eq!(store.latest_height()?, 0);
    Ok(())
}

#[test]
fn test_reset_refused_while_node_runs() -> TestResult {
    let (_dir, layout) = bootstrapped_home()?;
    let context = NodeContext::load(layout.clone(), NodeConfig::default())?;
    let node = Node::bootstrap(context, &KvStoreFactory::default())?;

    let result = commands::unsafe_reset_all(&layout);
    assert!(matches!(result, Err(NodeError::StoreLocked { .. })));
    assert!(layout.node_key_file().exists());

    node.shutdown();
    commands::unsafe_reset_all(&layout)?;
    Ok(())
}

#[test]
fn test_corrupt_node_key_is_not_replaced() -> TestResult {
    let dir = TempDir::new()?;
    let layout = NodeLayout::new(dir.path());
    fs::create_dir_all(layout.config_dir())?;
    fs::write(layout.node_key_file(), "{ not json")?;

    let result = NodeContext::load(layout.clone(), NodeConfig::default());
    assert!(matches!(result, Err(NodeError::CorruptState { .. })));
    assert_eq!(fs::read_to_string(layout.node_key_file())?, "{ not json");
    Ok(())
}
