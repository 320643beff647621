//! Pluggable application construction and state export
//!
//! The bootstrap core never names a concrete application type. Deployments
//! hand in an [`ApplicationFactory`] and a [`StateExporter`]; the core
//! supplies a freshly opened [`StorageHandle`] and [`TraceSink`] and treats
//! any construction or export failure as fatal.

pub mod kvstore;

use crate::error::{NodeError, Result};
use crate::storage::{AppHash, StorageHandle};
use crate::trace::TraceSink;
use crate::validator_set::GenesisValidator;
use std::collections::BTreeSet;
use tracing::{warn, Span};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppInfo {
    pub name: String,
    pub version: String,
    pub last_height: u64,
    pub last_app_hash: AppHash,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub height: u64,
    pub app_hash: AppHash,
}

/// State machine the consensus engine executes blocks against.
pub trait Application {
    fn info(&self) -> Result<AppInfo>;

    /// Seeds the validator set before the first block.
    fn init_chain(&mut self, validators: Vec<GenesisValidator>) -> Result<()>;

    fn deliver_tx(&mut self, tx: &[u8]) -> Result<()>;

    fn commit(&mut self) -> Result<CommitInfo>;
}

/// Builds the application for this process. Called exactly once at startup.
pub trait ApplicationFactory {
    type App: Application;

    fn create(&self, span: Span, store: StorageHandle, trace: TraceSink) -> Result<Self::App>;
}

impl<F, A> ApplicationFactory for F
where
    F: Fn(Span, StorageHandle, TraceSink) -> Result<A>,
    A: Application,
{
    type App = A;

    fn create(&self, span: Span, store: StorageHandle, trace: TraceSink) -> Result<A> {
        self(span, store, trace)
    }
}

/// Which committed height to export.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExportHeight {
    #[default]
    Latest,
    At(u64),
}

/// What to do with excluded module names the store does not know.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnknownModulePolicy {
    #[default]
    Reject,
    Ignore,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportRequest {
    pub height: ExportHeight,
    /// Normalise the snapshot for a chain restarting at genesis height.
    pub for_zero_height: bool,
    pub excluded_modules: Vec<String>,
    pub unknown_modules: UnknownModulePolicy,
}

impl ExportRequest {
    pub fn latest() -> Self {
        Self::default()
    }

    pub fn resolve_height(&self, store: &StorageHandle) -> Result<u64> {
        let height = match self.height {
            ExportHeight::Latest => store.latest_height()?,
            ExportHeight::At(height) => height,
        };
        store.check_height(height)?;
        Ok(height)
    }

    /// Returns the modules to export out of `available`, applying the
    /// exclusion list and the unknown-name policy.
    pub fn select_modules(&self, available: &[String]) -> Result<Vec<String>> {
        let known: BTreeSet<&str> = available.iter().map(String::as_str).collect();
        let unknown: Vec<&str> = self
            .excluded_modules
            .iter()
            .map(String::as_str)
            .filter(|m| !known.contains(m))
            .collect();

        if !unknown.is_empty() {
            match self.unknown_modules {
                UnknownModulePolicy::Reject => {
                    return Err(NodeError::Configuration(format!(
                        "cannot exclude unknown modules: {}",
                        unknown.join(", ")
                    )));
                }
                UnknownModulePolicy::Ignore => {
                    warn!(modules = %unknown.join(", "), "ignoring unknown excluded modules");
                }
            }
        }

        Ok(available
            .iter()
            .filter(|m| !self.excluded_modules.contains(m))
            .cloned()
            .collect())
    }
}

/// Snapshot produced by a [`StateExporter`].
#[derive(Debug, Clone, PartialEq)]
pub struct ExportedState {
    pub height: u64,
    pub app_hash: AppHash,
    /// Module name -> module data.
    pub app_state: serde_json::Value,
    /// Validator set exactly as committed at `height`.
    pub validators: Vec<GenesisValidator>,
}

pub trait StateExporter {
    fn export(
        &self,
        span: Span,
        store: StorageHandle,
        trace: TraceSink,
        request: &ExportRequest,
    ) -> Result<ExportedState>;
}

impl<F> StateExporter for F
where
    F: Fn(Span, StorageHandle, TraceSink, &ExportRequest) -> Result<ExportedState>,
{
    fn export(
        &self,
        span: Span,
        store: StorageHandle,
        trace: TraceSink,
        request: &ExportRequest,
    ) -> Result<ExportedState> {
        self(span, store, trace, request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn modules(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_select_modules_excludes() {
        let request = ExportRequest {
            excluded_modules: modules(&["gov"]),
            ..Default::default()
        };
        assert_eq!(
            request.select_modules(&modules(&["bank", "gov", "staking"])).unwrap(),
            modules(&["bank", "staking"])
        );
    }

    #[test]
    fn test_unknown_module_policy() {
        let mut request = ExportRequest {
            excluded_modules: modules(&["gov", "nope"]),
            ..Default::default()
        };
        let available = modules(&["bank", "gov"]);

        let err = request.select_modules(&available).unwrap_err();
        assert!(err.to_string().contains("nope"));

        request.unknown_modules = UnknownModulePolicy::Ignore;
        assert_eq!(
            request.select_modules(&available).unwrap(),
            modules(&["bank"])
        );
    }
}
