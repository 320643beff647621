//! Crash-safe file helpers shared by key files, sign state and exports

use crate::error::{NodeError, Result};
use serde::Serialize;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

/// Writes `bytes` to `path` through a temporary sibling file, fsync and
/// rename. Readers see either the previous content or the new one.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| NodeError::io(parent, e))?;
        }
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = path.with_file_name(format!(".{}.tmp", file_name));

    let mut file = File::create(&temp_path).map_err(|e| NodeError::io(&temp_path, e))?;
    file.write_all(bytes)
        .map_err(|e| NodeError::io(&temp_path, e))?;
    file.sync_all().map_err(|e| NodeError::io(&temp_path, e))?;
    drop(file);

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(NodeError::io(path, e));
    }
    Ok(())
}

pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut json = serde_json::to_vec_pretty(value)?;
    json.push(b'\n');
    write_atomic(path, &json)
}

/// Reads a text file, mapping "not found" to `None`. Content that is not
/// UTF-8 is corrupt state, not an I/O failure.
pub fn read_optional(path: &Path) -> Result<Option<String>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(NodeError::io(path, e)),
    };
    String::from_utf8(bytes)
        .map(Some)
        .map_err(|e| NodeError::corrupt(path, e))
}
