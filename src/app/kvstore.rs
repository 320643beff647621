//! Reference key/value application and its exporter
//!
//! Transactions are UTF-8 strings:
//! - `module/key=value` writes a key (an empty value deletes it)
//! - `val:<hex compressed pubkey>!<power>` sets a validator's power (0 removes it)

use super::{
    AppInfo, Application, ApplicationFactory, CommitInfo, ExportRequest, ExportedState,
    StateExporter,
};
use crate::crypto;
use crate::error::{NodeError, Result};
use crate::storage::{AppHash, CommitBatch, StateChange, StorageHandle};
use crate::trace::{TraceEvent, TraceSink};
use crate::validator_set::{sort_validators, validate_validator_set, GenesisValidator};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, info, Span};

pub const APP_NAME: &str = "trinity-kvstore";
const VALIDATOR_TX_PREFIX: &str = "val:";

#[derive(Debug, Clone, Copy, Default)]
pub struct KvStoreFactory {
    /// Heights kept exportable behind the tip. 0 keeps all history.
    pub pruning_keep_recent: u64,
}

impl ApplicationFactory for KvStoreFactory {
    type App = KvStoreApp;

    fn create(&self, span: Span, store: StorageHandle, trace: TraceSink) -> Result<KvStoreApp> {
        KvStoreApp::new(span, store, trace, self.pruning_keep_recent)
    }
}

pub struct KvStoreApp {
    span: Span,
    store: StorageHandle,
    trace: TraceSink,
    pruning_keep_recent: u64,
    height: u64,
    app_hash: AppHash,
    validators: BTreeMap<String, GenesisValidator>,
    pending: BTreeMap<(String, Vec<u8>), Option<Vec<u8>>>,
    /// Validator updates for the next block. `None` removes the validator.
    pending_validators: BTreeMap<String, Option<GenesisValidator>>,
}

impl KvStoreApp {
    pub fn new(
        span: Span,
        store: StorageHandle,
        trace: TraceSink,
        pruning_keep_recent: u64,
    ) -> Result<Self> {
        let height = store.latest_height()?;
        let (app_hash, validators) = if height == 0 {
            ([0u8; 32], BTreeMap::new())
        } else {
            let last = store.commit_at(height)?;
            let validators = last
                .validators
                .into_iter()
                .map(|v| (v.address.clone(), v))
                .collect();
            (last.app_hash, validators)
        };

        {
            let _enter = span.enter();
            info!(height, traced = trace.is_enabled(), "loaded {}", APP_NAME);
        }

        Ok(Self {
            span,
            store,
            trace,
            pruning_keep_recent,
            height,
            app_hash,
            validators,
            pending: BTreeMap::new(),
            pending_validators: BTreeMap::new(),
        })
    }

    pub fn store(&self) -> &StorageHandle {
        &self.store
    }

    fn apply_validator_tx(&mut self, body: &str) -> Result<()> {
        let (key_hex, power) = body.split_once('!').ok_or_else(|| {
            NodeError::Application(format!("validator tx '{}' must be <pubkey>!<power>", body))
        })?;
        let key_bytes = hex::decode(key_hex)
            .map_err(|e| NodeError::Application(format!("invalid validator pubkey hex: {}", e)))?;
        let public_key = crypto::public_key_from_bytes(&key_bytes)?;
        let power: i64 = power
            .parse()
            .ok()
            .filter(|p| *p >= 0)
            .ok_or_else(|| NodeError::Application(format!("invalid validator power '{}'", power)))?;

        let address = crypto::address_to_hex(&crypto::consensus_address(&public_key));
        let update = if power == 0 {
            None
        } else {
            let name = match self.pending_validators.get(&address) {
                Some(staged) => staged.as_ref().map(|v| v.name.clone()),
                None => self.validators.get(&address).map(|v| v.name.clone()),
            }
            .unwrap_or_default();
            Some(GenesisValidator::new(&public_key, power, name))
        };
        self.pending_validators.insert(address.clone(), update);
        debug!(%address, power, "validator update");
        self.trace
            .record(&TraceEvent::new("validator_update", self.height + 1))
    }

    fn apply_write_tx(&mut self, text: &str) -> Result<()> {
        let (path, value) = text.split_once('=').ok_or_else(|| {
            NodeError::Application(format!("tx '{}' must be module/key=value", text))
        })?;
        let (module, key) = path.split_once('/').ok_or_else(|| {
            NodeError::Application(format!("tx key '{}' must be module/key", path))
        })?;
        if module.is_empty()
            || !module
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            return Err(NodeError::Application(format!(
                "invalid module name '{}'",
                module
            )));
        }
        if key.is_empty() {
            return Err(NodeError::Application("empty key".to_string()));
        }

        let value = (!value.is_empty()).then(|| value.as_bytes().to_vec());
        self.pending
            .insert((module.to_string(), key.as_bytes().to_vec()), value);
        self.trace.record(
            &TraceEvent::new("deliver_tx", self.height + 1).with_key(module, key.as_bytes()),
        )
    }

    /// Committed set with the staged updates applied.
    fn next_validators(&self) -> BTreeMap<String, GenesisValidator> {
        let mut next = self.validators.clone();
        for (address, update) in &self.pending_validators {
            match update {
                Some(validator) => next.insert(address.clone(), validator.clone()),
                None => next.remove(address),
            };
        }
        next
    }

    fn sorted(validators: &BTreeMap<String, GenesisValidator>) -> Vec<GenesisValidator> {
        let mut validators: Vec<_> = validators.values().cloned().collect();
        sort_validators(&mut validators);
        validators
    }
}

impl Application for KvStoreApp {
    fn info(&self) -> Result<AppInfo> {
        Ok(AppInfo {
            name: APP_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            last_height: self.height,
            last_app_hash: self.app_hash,
        })
    }

    fn init_chain(&mut self, validators: Vec<GenesisValidator>) -> Result<()> {
        let _enter = self.span.enter();
        if self.height != 0 {
            return Err(NodeError::Application(format!(
                "init_chain called at height {}",
                self.height
            )));
        }
        validate_validator_set(&validators)?;
        self.validators = validators
            .into_iter()
            .map(|v| (v.address.clone(), v))
            .collect();
        info!(validators = self.validators.len(), "initialised chain");
        self.trace.record(&TraceEvent::new("init_chain", 0))
    }

    fn deliver_tx(&mut self, tx: &[u8]) -> Result<()> {
        let span = self.span.clone();
        let _enter = span.enter();
        let text = std::str::from_utf8(tx)
            .map_err(|e| NodeError::Application(format!("tx is not UTF-8: {}", e)))?;
        match text.strip_prefix(VALIDATOR_TX_PREFIX) {
            Some(body) => self.apply_validator_tx(body),
            None => self.apply_write_tx(text),
        }
    }

    fn commit(&mut self) -> Result<CommitInfo> {
        let span = self.span.clone();
        let _enter = span.enter();
        let next_validators = self.next_validators();
        let batch = CommitBatch {
            height: self.height + 1,
            changes: self
                .pending
                .iter()
                .map(|((module, key), value)| StateChange {
                    module: module.clone(),
                    key: key.clone(),
                    value: value.clone(),
                })
                .collect(),
            validators: Self::sorted(&next_validators),
        };
        let record = self.store.commit(&batch)?;
        self.pending.clear();
        self.pending_validators.clear();
        self.validators = next_validators;
        self.height = record.height;
        self.app_hash = record.app_hash;
        self.trace.record(&TraceEvent::new("commit", record.height))?;

        if self.pruning_keep_recent > 0 && self.height > self.pruning_keep_recent {
            self.store.prune(self.height - self.pruning_keep_recent + 1)?;
        }

        info!(
            height = record.height,
            app_hash = %hex::encode(record.app_hash),
            "committed block"
        );
        Ok(CommitInfo {
            height: record.height,
            app_hash: record.app_hash,
        })
    }
}

/// Exports every module as `{ "entries": [ {key, value, height} ] }` with
/// hex keys and base64 values.
#[derive(Debug, Clone, Copy, Default)]
pub struct KvStoreExporter;

impl StateExporter for KvStoreExporter {
    fn export(
        &self,
        span: Span,
        store: StorageHandle,
        mut trace: TraceSink,
        request: &ExportRequest,
    ) -> Result<ExportedState> {
        let _enter = span.enter();
        let height = request.resolve_height(&store)?;
        let commit = store.commit_at(height)?;
        let modules = request.select_modules(&store.modules_at(height)?)?;

        let mut app_state = Map::new();
        for module in modules {
            let entries: Vec<Value> = store
                .module_state_at(height, &module)?
                .into_iter()
                .map(|entry| {
                    json!({
                        "key": hex::encode(&entry.key),
                        "value": BASE64.encode(&entry.value),
                        "height": if request.for_zero_height { 0 } else { entry.height },
                    })
                })
                .collect();
            app_state.insert(module, json!({ "entries": entries }));
        }

        trace.record(&TraceEvent::new("export", height))?;
        info!(
            height,
            modules = app_state.len(),
            validators = commit.validators.len(),
            for_zero_height = request.for_zero_height,
            "exported application state"
        );
        Ok(ExportedState {
            height,
            app_hash: commit.app_hash,
            app_state: Value::Object(app_state),
            validators: commit.validators,
        })
    }
}
