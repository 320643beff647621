//! Destructive reset of a node home back to its pre-genesis state

use crate::config::NodeLayout;
use crate::error::{NodeError, Result};
use crate::storage;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Artifact {
    File,
    Dir,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResetReport {
    pub removed: Vec<PathBuf>,
    /// Artifacts that were already missing.
    pub absent: Vec<PathBuf>,
}

/// Removes, in order, the address book, the validator key, the node key,
/// the validator sign state and the data store, then recreates an empty
/// `data/`. Refuses while another process holds the store.
///
/// Stops at the first failing removal with [`NodeError::PartialReset`];
/// nothing after that step is touched.
pub fn reset_all(layout: &NodeLayout) -> Result<ResetReport> {
    storage::ensure_not_in_use(layout.root())?;

    let steps = [
        (layout.addr_book_file(), Artifact::File),
        (layout.priv_validator_key_file(), Artifact::File),
        (layout.node_key_file(), Artifact::File),
        (layout.priv_validator_state_file(), Artifact::File),
        (layout.data_dir(), Artifact::Dir),
    ];

    let mut report = ResetReport::default();
    for (index, (path, kind)) in steps.iter().enumerate() {
        match remove(path, *kind) {
            Ok(true) => {
                info!(path = %path.display(), "removed");
                report.removed.push(path.clone());
            }
            Ok(false) => report.absent.push(path.clone()),
            Err(source) => {
                let remaining: Vec<PathBuf> = steps[index..]
                    .iter()
                    .map(|(p, _)| p.clone())
                    .filter(|p| p.symlink_metadata().is_ok())
                    .collect();
                warn!(path = %path.display(), error = %source, "reset stopped");
                return Err(NodeError::PartialReset {
                    removed: report.removed,
                    remaining,
                    source,
                });
            }
        }
    }

    let data_dir = layout.data_dir();
    fs::create_dir_all(&data_dir).map_err(|e| NodeError::io(&data_dir, e))?;
    info!(
        home = %layout.root().display(),
        removed = report.removed.len(),
        "reset node to genesis state"
    );
    Ok(report)
}

/// Ok(false) when the artifact did not exist.
fn remove(path: &Path, kind: Artifact) -> io::Result<bool> {
    let result = match kind {
        Artifact::File => fs::remove_file(path),
        Artifact::Dir => fs::remove_dir_all(path),
    };
    match result {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
