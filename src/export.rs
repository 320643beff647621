//! Genesis export: runs a [`StateExporter`] over a cold store and checks
//! the snapshot before anything is written.

use crate::app::{ExportRequest, ExportedState, StateExporter};
use crate::config::{NodeConfig, NodeLayout};
use crate::error::{NodeError, Result};
use crate::fsutil;
use crate::storage::StorageHandle;
use crate::trace::TraceSink;
use crate::validator_set::{validate_validator_set, GenesisValidator};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, info_span};

/// Genesis document handed to migration tooling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedGenesis {
    pub genesis_time: String,
    pub chain_id: String,
    pub initial_height: u64,
    /// Hex app hash of the exported height.
    pub app_hash: String,
    pub app_state: serde_json::Value,
    pub validators: Vec<GenesisValidator>,
}

/// Opens the store and trace sink of `layout`, exports the requested height
/// and validates the result.
pub fn export_state<E: StateExporter + ?Sized>(
    layout: &NodeLayout,
    config: &NodeConfig,
    exporter: &E,
    request: &ExportRequest,
) -> Result<ExportedGenesis> {
    let span = info_span!("export", chain_id = %config.chain_id);
    let store = StorageHandle::open(layout.root())?;
    let trace = TraceSink::open(&config.trace_store)?;

    let state = exporter.export(span.clone(), store, trace, request)?;
    check_snapshot(&state, request)?;

    let _enter = span.enter();
    info!(
        height = state.height,
        validators = state.validators.len(),
        "snapshot ready"
    );
    Ok(ExportedGenesis {
        genesis_time: chrono::Utc::now().to_rfc3339(),
        chain_id: config.chain_id.clone(),
        initial_height: if request.for_zero_height {
            1
        } else {
            state.height + 1
        },
        app_hash: hex::encode(state.app_hash),
        app_state: state.app_state,
        validators: state.validators,
    })
}

fn check_snapshot(state: &ExportedState, request: &ExportRequest) -> Result<()> {
    validate_validator_set(&state.validators)?;

    let modules = state.app_state.as_object().ok_or_else(|| {
        NodeError::Application("exported app_state is not a JSON object".to_string())
    })?;
    if let Some(leaked) = request
        .excluded_modules
        .iter()
        .find(|m| modules.contains_key(m.as_str()))
    {
        return Err(NodeError::Application(format!(
            "excluded module '{}' is present in the exported state",
            leaked
        )));
    }
    Ok(())
}

/// Serialises in memory and writes atomically; on error no file appears.
pub fn write_genesis(path: &Path, genesis: &ExportedGenesis) -> Result<()> {
    let mut bytes = serde_json::to_vec_pretty(genesis)?;
    bytes.push(b'\n');
    fsutil::write_atomic(path, &bytes)?;
    info!(path = %path.display(), "wrote genesis");
    Ok(())
}

pub fn genesis_to_string(genesis: &ExportedGenesis) -> Result<String> {
    Ok(serde_json::to_string_pretty(genesis)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::kvstore::KvStoreExporter;
    use crate::app::ExportHeight;
    use crate::crypto::KeyPair;
    use crate::storage::{CommitBatch, StateChange};
    use serde_json::json;
    use tempfile::TempDir;
    use tracing::Span;

    fn seeded_home() -> (TempDir, NodeLayout, GenesisValidator) {
        let dir = TempDir::new().unwrap();
        let layout = NodeLayout::new(dir.path());
        let validator = GenesisValidator::new(&KeyPair::generate().public_key, 7, "v0");
        let mut store = StorageHandle::open(layout.root()).unwrap();
        store
            .commit(&CommitBatch {
                height: 1,
                changes: vec![StateChange {
                    module: "bank".to_string(),
                    key: b"alice".to_vec(),
                    value: Some(b"5".to_vec()),
                }],
                validators: vec![validator.clone()],
            })
            .unwrap();
        (dir, layout, validator)
    }

    #[test]
    fn test_export_wraps_snapshot() {
        let (_dir, layout, validator) = seeded_home();
        let genesis = export_state(
            &layout,
            &NodeConfig::default(),
            &KvStoreExporter,
            &ExportRequest::latest(),
        )
        .unwrap();

        assert_eq!(genesis.chain_id, "trinity-devnet");
        assert_eq!(genesis.initial_height, 2);
        assert_eq!(genesis.validators, vec![validator]);
        assert!(genesis.app_state.get("bank").is_some());
        assert_eq!(genesis.app_hash.len(), 64);
    }

    #[test]
    fn test_rejects_leaked_excluded_module() {
        let (_dir, layout, _) = seeded_home();
        let leaky = |_span: Span,
                     store: StorageHandle,
                     _trace: TraceSink,
                     _request: &ExportRequest|
         -> Result<ExportedState> {
            let commit = store.commit_at(1)?;
            Ok(ExportedState {
                height: 1,
                app_hash: commit.app_hash,
                app_state: json!({ "gov": {} }),
                validators: commit.validators,
            })
        };
        let request = ExportRequest {
            excluded_modules: vec!["gov".to_string()],
            ..Default::default()
        };
        let err = export_state(&layout, &NodeConfig::default(), &leaky, &request).unwrap_err();
        assert!(err.to_string().contains("gov"));
    }

    #[test]
    fn test_unavailable_height_writes_nothing() {
        let (dir, layout, _) = seeded_home();
        let output = dir.path().join("genesis.json");
        let request = ExportRequest {
            height: ExportHeight::At(9),
            ..Default::default()
        };

        let result = export_state(&layout, &NodeConfig::default(), &KvStoreExporter, &request)
            .and_then(|genesis| write_genesis(&output, &genesis));
        assert!(matches!(result, Err(NodeError::ExportRange { requested: 9, .. })));
        assert!(!output.exists());
    }

    #[test]
    fn test_write_genesis_round_trips() {
        let (dir, layout, _) = seeded_home();
        let genesis = export_state(
            &layout,
            &NodeConfig::default(),
            &KvStoreExporter,
            &ExportRequest {
                for_zero_height: true,
                ..Default::default()
            },
        )
        .unwrap();
        let output = dir.path().join("out").join("genesis.json");
        write_genesis(&output, &genesis).unwrap();

        let read: ExportedGenesis =
            serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(read, genesis);
        assert_eq!(read.initial_height, 1);
    }
}
