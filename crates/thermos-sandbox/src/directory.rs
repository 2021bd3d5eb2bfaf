//! Plain directory sandbox

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};

use thermos_core::{PrivilegeMode, ProcessIdentity, ResolvedMode, SandboxError, TaskInstance};

use crate::{Result, Sandbox, chown_to_role};

/// A per-task directory under a shared sandbox root
#[derive(Debug, Clone)]
pub struct DirectorySandbox {
    task_id: String,
    root: PathBuf,
    mode: ResolvedMode,
}

impl DirectorySandbox {
    /// Sandbox rooted at `<sandbox_root>/<task_id>`
    pub fn new(task_id: &str, sandbox_root: impl AsRef<Path>) -> Self {
        Self {
            task_id: task_id.to_string(),
            root: sandbox_root.as_ref().join(task_id),
            mode: PrivilegeMode::Auto.resolve(&ProcessIdentity::detect()),
        }
    }

    /// Override whether the directory is handed to the task role
    pub fn privilege_mode(mut self, mode: PrivilegeMode) -> Self {
        self.mode = mode.resolve(&ProcessIdentity::detect());
        self
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }
}

impl Sandbox for DirectorySandbox {
    fn kind(&self) -> &'static str {
        "directory"
    }

    fn root(&self) -> &Path {
        &self.root
    }

    fn exists(&self) -> bool {
        self.root.is_dir()
    }

    fn create(&mut self, task: &TaskInstance) -> Result<()> {
        info!(
            "Creating directory sandbox for {} at {}",
            self.task_id,
            self.root.display()
        );
        let fresh = !self.root.exists();
        fs::create_dir_all(&self.root)
            .map_err(|e| SandboxError::from_io("Failed to create sandbox root", e))?;
        if let Err(e) = chown_to_role(&self.root, &task.role, self.mode) {
            if fresh {
                let _ = fs::remove_dir_all(&self.root);
            }
            return Err(e);
        }
        Ok(())
    }

    fn destroy(&mut self) -> Result<()> {
        if self.root.exists() {
            debug!("Removing directory sandbox {}", self.root.display());
            fs::remove_dir_all(&self.root)
                .map_err(|e| SandboxError::from_io("Failed to remove sandbox root", e))?;
        }
        Ok(())
    }
}
