//! thermos-sandbox: filesystem roots prepared for a single task attempt
//!
//! The supervisor only depends on the [`Sandbox`] trait. Two implementations
//! are provided:
//! - [`DirectorySandbox`]: a plain per-task directory
//! - [`IsolatedSandbox`]: a root materialized from the task's layout, suitable
//!   for the runner to chroot into

pub mod directory;
pub mod isolated;

use std::fmt;
use std::path::Path;

use nix::unistd::{User, chown};

use thermos_core::{ResolvedMode, SandboxError, TaskInstance};

pub use directory::DirectorySandbox;
pub use isolated::IsolatedSandbox;

/// Result type for sandbox operations
pub type Result<T> = std::result::Result<T, SandboxError>;

/// Capability set every sandbox variant provides
pub trait Sandbox: fmt::Debug + Send + Sync {
    /// Short name used in logs
    fn kind(&self) -> &'static str;

    /// Root directory the runner executes in
    fn root(&self) -> &Path;

    /// Whether `create` has completed
    fn exists(&self) -> bool;

    /// Prepare the sandbox for `task`
    fn create(&mut self, task: &TaskInstance) -> Result<()>;

    /// Remove everything `create` produced
    fn destroy(&mut self) -> Result<()>;
}

/// Hand ownership of `path` to the task role when running privileged
pub(crate) fn chown_to_role(path: &Path, role: &str, mode: ResolvedMode) -> Result<()> {
    if !mode.is_privileged() {
        return Ok(());
    }

    let user = User::from_name(role)
        .map_err(|e| SandboxError::Syscall(format!("getpwnam({}): {}", role, e)))?
        .ok_or_else(|| SandboxError::UnknownUser(role.to_string()))?;

    chown(path, Some(user.uid), Some(user.gid)).map_err(|e| {
        SandboxError::Syscall(format!("chown {} to {}: {}", path.display(), role, e))
    })
}
