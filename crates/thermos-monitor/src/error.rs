//! Error types for checkpoint monitoring

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for monitor operations
pub type Result<T> = std::result::Result<T, MonitorError>;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("No checkpoint for task {task_id} at {}", path.display())]
    NotFound { task_id: String, path: PathBuf },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Corrupt checkpoint record at line {line}: {source}")]
    Corrupt {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Process monitoring error: {0}")]
    ProcessMonitoring(String),
}
