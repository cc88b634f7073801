//! Error types for the process registry

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while reading or writing the process registry
#[derive(Error, Debug)]
pub enum RegistryError {
    /// A record with this pid is already registered. This indicates a
    /// bookkeeping bug; pids are unique among live processes.
    #[error("Process with pid {pid} already exists in the registry")]
    DuplicateProcess { pid: u32 },

    /// File I/O error
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A registry line could not be parsed
    #[error("JSON parse error in {path} at line {line}: {source}")]
    Json {
        path: PathBuf,
        line: usize,
        source: serde_json::Error,
    },

    /// Failed to acquire the registry file lock after multiple retries
    #[error("Failed to acquire lock on {path} after {retries} retries")]
    LockTimeout { path: PathBuf, retries: u32 },
}

impl RegistryError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
