//! Node bootstrap: identity, store, trace sink and application, in that order

use crate::app::{Application, ApplicationFactory};
use crate::config::{NodeConfig, NodeLayout};
use crate::error::{NodeError, Result};
use crate::keys::{
    load_or_generate_node_key, load_or_generate_validator_key, upgrade_legacy_validator,
    LegacyUpgrade, NodeKey, ValidatorKey,
};
use crate::storage::StorageHandle;
use crate::trace::TraceSink;
use crate::validator_set::GenesisValidator;
use std::io::BufRead;
use tracing::{info, info_span, warn};
use tracing_subscriber::EnvFilter;

/// Voting power given to the local validator when a fresh chain is initialised.
pub const DEFAULT_VALIDATOR_POWER: i64 = 10;

/// Installs the global stderr subscriber. `RUST_LOG` wins over `level`.
pub fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| NodeError::Configuration(format!("invalid log level '{}': {}", level, e)))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| NodeError::Configuration(format!("logging already initialised: {}", e)))
}

/// Process-wide identity, owned explicitly rather than held in globals.
#[derive(Debug)]
pub struct NodeContext {
    pub layout: NodeLayout,
    pub config: NodeConfig,
    pub node_key: NodeKey,
    pub validator_key: ValidatorKey,
}

impl NodeContext {
    /// Loads (or creates) both keys, upgrading a legacy validator file first.
    pub fn load(layout: NodeLayout, config: NodeConfig) -> Result<Self> {
        if let LegacyUpgrade::Upgraded { backup } = upgrade_legacy_validator(&layout)? {
            info!(backup = %backup.display(), "legacy validator file upgraded");
        }
        let node_key = load_or_generate_node_key(&layout.node_key_file())?;
        let validator_key = load_or_generate_validator_key(
            &layout.priv_validator_key_file(),
            &layout.priv_validator_state_file(),
        )?;
        Ok(Self {
            layout,
            config,
            node_key,
            validator_key,
        })
    }
}

pub struct Node<A: Application> {
    context: NodeContext,
    app: A,
}

impl<A: Application> Node<A> {
    /// Opens the store, then the trace sink, then hands both to `factory`.
    /// Any failure aborts startup; no partially built node is returned.
    pub fn bootstrap<F>(context: NodeContext, factory: &F) -> Result<Self>
    where
        F: ApplicationFactory<App = A> + ?Sized,
    {
        let span = info_span!(
            "app",
            chain_id = %context.config.chain_id,
            node_id = %context.node_key.id()
        );

        let store = StorageHandle::open(context.layout.root())?;
        let trace = TraceSink::open(&context.config.trace_store)?;
        if let Some(path) = trace.path() {
            info!(path = %path.display(), "tracing application calls");
        }

        let mut app = factory.create(span, store, trace)?;
        let app_info = app.info()?;
        if app_info.last_height == 0 {
            let genesis = vec![GenesisValidator::new(
                context.validator_key.public_key(),
                DEFAULT_VALIDATOR_POWER,
                context.config.moniker.clone(),
            )];
            app.init_chain(genesis)?;
        }

        info!(
            app = %app_info.name,
            height = app_info.last_height,
            app_hash = %hex::encode(app_info.last_app_hash),
            node_id = %context.node_key.id(),
            validator = %context.validator_key.bech32_address(),
            "node ready"
        );
        Ok(Self { context, app })
    }

    pub fn context(&self) -> &NodeContext {
        &self.context
    }

    pub fn app(&self) -> &A {
        &self.app
    }

    pub fn app_mut(&mut self) -> &mut A {
        &mut self.app
    }

    /// Replays blocks from JSON lines, each an array of transaction
    /// strings, committing after every line. Returns the blocks applied.
    pub fn replay_blocks<R: BufRead>(&mut self, reader: R) -> Result<u64> {
        let mut applied = 0;
        for (index, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| NodeError::Application(format!("reading block {}: {}", index + 1, e)))?;
            if line.trim().is_empty() {
                continue;
            }
            let txs: Vec<String> = serde_json::from_str(&line).map_err(|e| {
                NodeError::Application(format!("block {} is not a JSON array of txs: {}", index + 1, e))
            })?;
            for tx in &txs {
                self.app.deliver_tx(tx.as_bytes())?;
            }
            let commit = self.app.commit()?;
            applied += 1;
            if txs.is_empty() {
                warn!(height = commit.height, "replayed empty block");
            }
        }
        Ok(applied)
    }

    /// Releases the application together with its store and trace sink.
    pub fn shutdown(self) -> NodeContext {
        info!(node_id = %self.context.node_key.id(), "node stopped");
        self.context
    }
}
