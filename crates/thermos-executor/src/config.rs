//! Executor configuration

use std::path::{Path, PathBuf};

use thermos_core::{PrivilegeMode, Result, SupervisorError};

/// Default root under which runners persist checkpoints
pub const DEFAULT_CHECKPOINT_ROOT: &str = "/var/run/thermos";

/// Default directory for runner logs
pub const DEFAULT_LOG_DIR: &str = "executor_logs";

/// Verbosity accepted by the runner's `--log_to_disk`
pub const LOG_LEVELS: &[&str] = &["DEBUG", "INFO", "WARNING", "ERROR", "FATAL", "NONE"];

/// Settings shared by every task this executor supervises
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Used when a task supervisor is built without an explicit checkpoint root
    pub checkpoint_root: PathBuf,
    /// Passed to the runner as `--log_dir`
    pub log_dir: PathBuf,
    /// Passed to the runner as `--log_to_disk`
    pub log_level: String,
    /// Whether the runner is asked to drop to the task role
    pub privilege_mode: PrivilegeMode,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            checkpoint_root: PathBuf::from(DEFAULT_CHECKPOINT_ROOT),
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            log_level: "DEBUG".to_string(),
            privilege_mode: PrivilegeMode::Auto,
        }
    }
}

impl ExecutorConfig {
    pub fn checkpoint_root(mut self, path: impl AsRef<Path>) -> Self {
        self.checkpoint_root = path.as_ref().to_path_buf();
        self
    }

    pub fn log_dir(mut self, path: impl AsRef<Path>) -> Self {
        self.log_dir = path.as_ref().to_path_buf();
        self
    }

    pub fn log_level(mut self, level: &str) -> Self {
        self.log_level = level.to_ascii_uppercase();
        self
    }

    pub fn privilege_mode(mut self, mode: PrivilegeMode) -> Self {
        self.privilege_mode = mode;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.checkpoint_root.as_os_str().is_empty() {
            return Err(SupervisorError::configuration(
                "Checkpoint root cannot be empty",
            ));
        }
        if self.log_dir.as_os_str().is_empty() {
            return Err(SupervisorError::configuration("Log directory cannot be empty"));
        }
        if !LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(SupervisorError::configuration(format!(
                "Unknown runner log level '{}', expected one of {}",
                self.log_level,
                LOG_LEVELS.join(", ")
            )));
        }
        Ok(())
    }
}
