//! Append-only trace of application/store interactions

use crate::error::{NodeError, Result};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// One traced operation, written as a single JSON line.
#[derive(Debug, Clone, Serialize)]
pub struct TraceEvent {
    pub operation: String,
    pub height: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    /// Hex encoded key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub timestamp: String,
}

impl TraceEvent {
    pub fn new(operation: impl Into<String>, height: u64) -> Self {
        Self {
            operation: operation.into(),
            height,
            module: None,
            key: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn with_key(mut self, module: &str, key: &[u8]) -> Self {
        self.module = Some(module.to_string());
        self.key = Some(hex::encode(key));
        self
    }
}

/// Destination of trace output. An empty path disables tracing.
#[derive(Debug)]
pub enum TraceSink {
    Disabled,
    File { path: PathBuf, file: File },
}

impl TraceSink {
    /// Opens `path` for appending, creating it when absent. Existing
    /// traces are never truncated.
    pub fn open(path: &str) -> Result<Self> {
        if path.is_empty() {
            return Ok(TraceSink::Disabled);
        }
        let path = PathBuf::from(path);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| NodeError::io(&path, e))?;
        Ok(TraceSink::File { path, file })
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, TraceSink::File { .. })
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            TraceSink::Disabled => None,
            TraceSink::File { path, .. } => Some(path),
        }
    }

    pub fn record(&mut self, event: &TraceEvent) -> Result<()> {
        let TraceSink::File { path, file } = self else {
            return Ok(());
        };
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        file.write_all(&line).map_err(|e| NodeError::io(&*path, e))
    }
}

impl Write for TraceSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            TraceSink::Disabled => Ok(buf.len()),
            TraceSink::File { file, .. } => file.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            TraceSink::Disabled => Ok(()),
            TraceSink::File { file, .. } => file.flush(),
        }
    }
}
