//! Error types for supervisor, sandbox and task-spec operations

use std::io;
use thiserror::Error;

/// Result type for supervisor operations
pub type Result<T> = std::result::Result<T, SupervisorError>;

/// Boxed cause carried by configuration failures
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by the task supervisor to its caller
#[derive(Error, Debug)]
pub enum SupervisorError {
    /// Fatal to the task attempt: missing runner, bad task spec, sandbox failure.
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// An operation was invoked out of order.
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// The runner process could not be created.
    #[error("Failed to launch runner: {0}")]
    Launch(#[source] io::Error),

    /// Non-blocking reap failed for a reason other than "no such child".
    #[error("Failed to reap runner: {0}")]
    Reap(#[source] nix::Error),
}

impl SupervisorError {
    pub fn configuration(message: impl Into<String>) -> Self {
        SupervisorError::Configuration {
            message: message.into(),
            source: None,
        }
    }

    pub fn configuration_with(
        message: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        SupervisorError::Configuration {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, SupervisorError::Configuration { .. })
    }

    pub fn is_illegal_state(&self) -> bool {
        matches!(self, SupervisorError::IllegalState(_))
    }

    pub fn is_launch(&self) -> bool {
        matches!(self, SupervisorError::Launch(_))
    }
}

/// Errors raised while preparing or tearing down a sandbox
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Syscall error: {0}")]
    Syscall(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown user: {0}")]
    UnknownUser(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),
}

impl SandboxError {
    /// Classify an io error into the closest sandbox error kind
    pub fn from_io(context: &str, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::PermissionDenied => {
                SandboxError::PermissionDenied(format!("{}: {}", context, err))
            }
            io::ErrorKind::StorageFull | io::ErrorKind::QuotaExceeded => {
                SandboxError::ResourceExhausted(format!("{}: {}", context, err))
            }
            _ => SandboxError::Io(io::Error::new(err.kind(), format!("{}: {}", context, err))),
        }
    }
}

/// Errors raised when a task specification is structurally invalid or
/// cannot be written to / read from its task file
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Invalid task: {0}")]
    Invalid(String),

    #[error("Task file IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Task file encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}
