//! Privilege mode configuration for launching the runner
//!
//! When the executor itself runs as root, the runner is told to drop to the
//! task's role before executing any process. Otherwise the runner keeps the
//! executor's identity.

use nix::unistd::{Uid, User};

/// Identity of the executor process, probed at runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessIdentity {
    /// Effective uid of the executor
    pub euid: u32,
    /// Login name for `euid`, if it resolves
    pub user: Option<String>,
}

impl ProcessIdentity {
    /// Detect the identity of the current process
    pub fn detect() -> Self {
        let euid = Uid::effective();
        let user = User::from_uid(euid).ok().flatten().map(|u| u.name);
        Self {
            euid: euid.as_raw(),
            user,
        }
    }

    /// Running as root (euid == 0)
    pub fn is_root(&self) -> bool {
        self.euid == 0
    }
}

/// Determines whether the runner is asked to setuid to the task role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrivilegeMode {
    /// Never pass `--setuid`, even if running as root.
    Unprivileged,

    /// Always pass `--setuid`.
    Privileged,

    /// Pass `--setuid` only when the executor runs as root.
    #[default]
    Auto,
}

impl PrivilegeMode {
    /// Resolve Auto mode to a concrete mode based on the detected identity
    pub fn resolve(&self, identity: &ProcessIdentity) -> ResolvedMode {
        match self {
            PrivilegeMode::Privileged => ResolvedMode::Privileged,
            PrivilegeMode::Unprivileged => ResolvedMode::Unprivileged,
            PrivilegeMode::Auto => {
                if identity.is_root() {
                    ResolvedMode::Privileged
                } else {
                    ResolvedMode::Unprivileged
                }
            }
        }
    }
}

/// A resolved (non-Auto) privilege mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedMode {
    Unprivileged,
    Privileged,
}

impl ResolvedMode {
    pub fn is_privileged(&self) -> bool {
        matches!(self, ResolvedMode::Privileged)
    }
}
