//! Durable versioned key/value store backing the application state
//!
//! The store lives in `<root>/data/application.db` (SQLite). Every write
//! is kept at the height it was committed so state can be read back at
//! any retained height. The connection runs in exclusive locking mode and
//! takes the write lock while opening, so a second handle on the same
//! root fails immediately instead of sharing the file.

use crate::config::DATA_DIR;
use crate::error::{NodeError, Result};
use crate::validator_set::{validate_validator_set, GenesisValidator};
use rusqlite::{params, Connection, ErrorCode, OpenFlags, OptionalExtension, TransactionBehavior};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

pub const DB_FILE: &str = "application.db";
pub const SCHEMA_VERSION: u32 = 1;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS state (
        module TEXT NOT NULL,
        key BLOB NOT NULL,
        height INTEGER NOT NULL,
        value BLOB,
        PRIMARY KEY (module, key, height)
    );
    CREATE TABLE IF NOT EXISTS commits (
        height INTEGER PRIMARY KEY,
        app_hash BLOB NOT NULL,
        validators TEXT NOT NULL,
        committed_at TEXT NOT NULL
    );
";

pub type AppHash = [u8; 32];

/// One write in a commit. `value: None` deletes the key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub module: String,
    pub key: Vec<u8>,
    pub value: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Default)]
pub struct CommitBatch {
    pub height: u64,
    pub changes: Vec<StateChange>,
    /// Full validator set in effect after this height.
    pub validators: Vec<GenesisValidator>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommitRecord {
    pub height: u64,
    pub app_hash: AppHash,
    pub validators: Vec<GenesisValidator>,
    pub committed_at: String,
}

/// Live key/value pair at some height, with the height it was last written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateEntry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub height: u64,
}

/// Exclusive handle to the store of one node home directory.
pub struct StorageHandle {
    conn: Connection,
    path: PathBuf,
}

impl std::fmt::Debug for StorageHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageHandle").field("path", &self.path).finish()
    }
}

impl StorageHandle {
    /// Opens (creating if needed) the store under `<root>/data`.
    pub fn open(root: &Path) -> Result<Self> {
        let data_dir = root.join(DATA_DIR);
        fs::create_dir_all(&data_dir).map_err(|e| NodeError::io(&data_dir, e))?;
        let path = data_dir.join(DB_FILE);

        let mut conn = Connection::open(&path).map_err(|e| classify(&path, e))?;
        conn.busy_timeout(Duration::ZERO)?;
        let _mode: String = conn
            .query_row("PRAGMA locking_mode = EXCLUSIVE", [], |row| row.get(0))
            .map_err(|e| classify(&path, e))?;

        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Exclusive)
            .map_err(|e| classify(&path, e))?;
        tx.execute(
            "CREATE TABLE IF NOT EXISTS metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )
        .map_err(|e| classify(&path, e))?;

        let version: Option<String> = tx
            .query_row(
                "SELECT value FROM metadata WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| classify(&path, e))?;
        match version {
            None => {
                tx.execute(
                    "INSERT INTO metadata (key, value) VALUES ('schema_version', ?1)",
                    params![SCHEMA_VERSION.to_string()],
                )?;
            }
            Some(v) if v == SCHEMA_VERSION.to_string() => {}
            Some(v) => {
                return Err(NodeError::IncompatibleStore {
                    path,
                    reason: format!("schema version {} (expected {})", v, SCHEMA_VERSION),
                });
            }
        }
        tx.execute_batch(SCHEMA).map_err(|e| classify(&path, e))?;
        tx.commit()?;

        debug!(path = %path.display(), "opened application store");
        Ok(Self { conn, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Highest committed height, 0 when nothing was committed yet.
    pub fn latest_height(&self) -> Result<u64> {
        let height: Option<i64> = self
            .conn
            .query_row("SELECT MAX(height) FROM commits", [], |row| row.get(0))?;
        Ok(height.unwrap_or(0) as u64)
    }

    /// Lowest height still readable, 0 when nothing was committed yet.
    pub fn earliest_height(&self) -> Result<u64> {
        let height: Option<i64> = self
            .conn
            .query_row("SELECT MIN(height) FROM commits", [], |row| row.get(0))?;
        Ok(height.unwrap_or(0) as u64)
    }

    /// Fails with `ExportRange` unless `height` is committed and retained.
    pub fn check_height(&self, height: u64) -> Result<()> {
        let latest = self.latest_height()?;
        if latest == 0 {
            return Err(NodeError::ExportRange {
                requested: height,
                reason: "no height has been committed".to_string(),
            });
        }
        if height > latest {
            return Err(NodeError::ExportRange {
                requested: height,
                reason: format!("latest committed height is {}", latest),
            });
        }
        let earliest = self.earliest_height()?;
        if height < earliest {
            return Err(NodeError::ExportRange {
                requested: height,
                reason: format!("pruned, earliest retained height is {}", earliest),
            });
        }
        Ok(())
    }

    /// Latest value of a key.
    pub fn get(&self, module: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let value: Option<Option<Vec<u8>>> = self
            .conn
            .query_row(
                "SELECT value FROM state WHERE module = ?1 AND key = ?2
                 ORDER BY height DESC LIMIT 1",
                params![module, key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.flatten())
    }

    /// Atomically records the changes, validator set and chained app hash
    /// of `batch.height`, which must directly follow the latest height.
    pub fn commit(&mut self, batch: &CommitBatch) -> Result<CommitRecord> {
        let latest = self.latest_height()?;
        if batch.height != latest + 1 {
            return Err(NodeError::Application(format!(
                "commit height {} does not follow latest height {}",
                batch.height, latest
            )));
        }
        validate_validator_set(&batch.validators)?;

        let previous = if latest == 0 {
            [0u8; 32]
        } else {
            self.commit_at(latest)?.app_hash
        };
        let app_hash = chain_app_hash(&previous, batch.height, &batch.changes);
        let validators_json = serde_json::to_string(&batch.validators)?;
        let committed_at = chrono::Utc::now().to_rfc3339();

        let tx = self.conn.transaction()?;
        {
            let mut insert = tx.prepare(
                "INSERT OR REPLACE INTO state (module, key, height, value) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for change in &batch.changes {
                insert.execute(params![
                    change.module,
                    change.key,
                    batch.height as i64,
                    change.value
                ])?;
            }
        }
        tx.execute(
            "INSERT INTO commits (height, app_hash, validators, committed_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                batch.height as i64,
                app_hash.to_vec(),
                validators_json,
                committed_at
            ],
        )?;
        tx.commit()?;

        debug!(
            height = batch.height,
            changes = batch.changes.len(),
            app_hash = %hex::encode(app_hash),
            "committed state"
        );
        Ok(CommitRecord {
            height: batch.height,
            app_hash,
            validators: batch.validators.clone(),
            committed_at,
        })
    }

    pub fn commit_at(&self, height: u64) -> Result<CommitRecord> {
        self.check_height(height)?;
        let (hash, validators_json, committed_at): (Vec<u8>, String, String) = self.conn.query_row(
            "SELECT app_hash, validators, committed_at FROM commits WHERE height = ?1",
            params![height as i64],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        let app_hash: AppHash = hash
            .try_into()
            .map_err(|_| NodeError::corrupt(&self.path, format!("app hash at height {} is not 32 bytes", height)))?;
        let validators = serde_json::from_str(&validators_json)
            .map_err(|e| NodeError::corrupt(&self.path, format!("validators at height {}: {}", height, e)))?;
        Ok(CommitRecord {
            height,
            app_hash,
            validators,
            committed_at,
        })
    }

    /// Modules that have written anything at or below `height`.
    pub fn modules_at(&self, height: u64) -> Result<Vec<String>> {
        self.check_height(height)?;
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT module FROM state WHERE height <= ?1 ORDER BY module")?;
        let modules = stmt
            .query_map(params![height as i64], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(modules)
    }

    /// Live entries of one module as of `height`, ordered by key.
    pub fn module_state_at(&self, height: u64, module: &str) -> Result<Vec<StateEntry>> {
        self.check_height(height)?;
        let mut stmt = self.conn.prepare(
            "SELECT s.key, s.value, s.height FROM state s
             WHERE s.module = ?1
               AND s.height = (SELECT MAX(h.height) FROM state h
                               WHERE h.module = s.module AND h.key = s.key AND h.height <= ?2)
             ORDER BY s.key",
        )?;
        let rows = stmt.query_map(params![module, height as i64], |row| {
            let key: Vec<u8> = row.get(0)?;
            let value: Option<Vec<u8>> = row.get(1)?;
            let written: i64 = row.get(2)?;
            Ok((key, value, written as u64))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (key, value, written) = row?;
            if let Some(value) = value {
                entries.push(StateEntry {
                    key,
                    value,
                    height: written,
                });
            }
        }
        Ok(entries)
    }

    /// Drops history so that `retain_from` becomes the earliest readable
    /// height. Returns the number of superseded versions removed.
    pub fn prune(&mut self, retain_from: u64) -> Result<usize> {
        let latest = self.latest_height()?;
        let earliest = self.earliest_height()?;
        let retain_from = retain_from.min(latest);
        if latest == 0 || retain_from <= earliest {
            return Ok(0);
        }

        let tx = self.conn.transaction()?;
        let removed = tx.execute(
            "DELETE FROM state
             WHERE height < ?1
               AND height < (SELECT MAX(h.height) FROM state h
                             WHERE h.module = state.module AND h.key = state.key AND h.height <= ?1)",
            params![retain_from as i64],
        )?;
        tx.execute(
            "DELETE FROM commits WHERE height < ?1",
            params![retain_from as i64],
        )?;
        tx.commit()?;

        info!(retain_from, removed, "pruned application store");
        Ok(removed)
    }
}

/// Refuses when another handle holds the store under `root`. A missing or
/// unreadable store is not in use.
pub fn ensure_not_in_use(root: &Path) -> Result<()> {
    let path = root.join(DATA_DIR).join(DB_FILE);
    if !path.exists() {
        return Ok(());
    }
    let conn = Connection::open_with_flags(&path, OpenFlags::SQLITE_OPEN_READ_WRITE)
        .map_err(|e| classify(&path, e))?;
    conn.busy_timeout(Duration::ZERO)?;
    match conn.execute_batch("BEGIN EXCLUSIVE; ROLLBACK;") {
        Ok(()) => Ok(()),
        Err(e) => match classify(&path, e) {
            NodeError::IncompatibleStore { .. } => Ok(()),
            other => Err(other),
        },
    }
}

/// SHA-256 over the previous hash, the height and the changes in
/// (module, key) order.
pub fn chain_app_hash(previous: &AppHash, height: u64, changes: &[StateChange]) -> AppHash {
    let mut ordered: Vec<&StateChange> = changes.iter().collect();
    ordered.sort_by(|a, b| (&a.module, &a.key).cmp(&(&b.module, &b.key)));

    let mut hasher = Sha256::new();
    hasher.update(previous);
    hasher.update(height.to_be_bytes());
    for change in ordered {
        hasher.update((change.module.len() as u64).to_be_bytes());
        hasher.update(change.module.as_bytes());
        hasher.update((change.key.len() as u64).to_be_bytes());
        hasher.update(&change.key);
        match &change.value {
            Some(value) => {
                hasher.update([1u8]);
                hasher.update((value.len() as u64).to_be_bytes());
                hasher.update(value);
            }
            None => hasher.update([0u8]),
        }
    }
    hasher.finalize().into()
}

fn classify(path: &Path, err: rusqlite::Error) -> NodeError {
    match err.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => NodeError::StoreLocked {
            path: path.to_path_buf(),
        },
        Some(ErrorCode::NotADatabase) => NodeError::IncompatibleStore {
            path: path.to_path_buf(),
            reason: err.to_string(),
        },
        Some(ErrorCode::CannotOpen) | Some(ErrorCode::ReadOnly) | Some(ErrorCode::PermissionDenied) => {
            NodeError::io(path, std::io::Error::new(std::io::ErrorKind::PermissionDenied, err.to_string()))
        }
        _ => NodeError::Database(err),
    }
}
