//! Isolated sandbox materialized from a task layout
//!
//! The sandbox root gets a minimal skeleton plus every directory the layout
//! declares. The runner is then started with `--enable_chroot` and confines
//! the task to this root. A marker file records that `create` finished, so a
//! half-built root never reports as existing.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};

use log::{debug, info};

use thermos_core::{
    Layout, LayoutDir, PrivilegeMode, ProcessIdentity, ResolvedMode, SandboxError, TaskInstance,
};

use crate::{Result, Sandbox, chown_to_role};

/// Default parent directory for isolated roots
pub const DEFAULT_ISOLATED_BASE: &str = "/var/lib/thermos/isolated";

/// Written into the root once `create` completes
pub const LAYOUT_MARKER: &str = ".thermos_layout";

/// Directories every isolated root gets regardless of layout
const SKELETON: &[(&str, u32)] = &[
    ("dev", 0o755),
    ("etc", 0o755),
    ("proc", 0o555),
    ("tmp", 0o1777),
    ("var", 0o755),
];

#[derive(Debug, Clone)]
pub struct IsolatedSandbox {
    task_id: String,
    root: PathBuf,
    mode: ResolvedMode,
}

impl IsolatedSandbox {
    /// Isolated root at `<DEFAULT_ISOLATED_BASE>/<task_id>`
    pub fn new(task_id: &str) -> Self {
        Self::with_base(task_id, DEFAULT_ISOLATED_BASE)
    }

    /// Isolated root at `<base>/<task_id>`
    pub fn with_base(task_id: &str, base: impl AsRef<Path>) -> Self {
        Self {
            task_id: task_id.to_string(),
            root: base.as_ref().join(task_id),
            mode: PrivilegeMode::Auto.resolve(&ProcessIdentity::detect()),
        }
    }

    pub fn privilege_mode(mut self, mode: PrivilegeMode) -> Self {
        self.mode = mode.resolve(&ProcessIdentity::detect());
        self
    }

    fn marker(&self) -> PathBuf {
        self.root.join(LAYOUT_MARKER)
    }

    fn make_dir(&self, relative: &str, mode: u32) -> Result<()> {
        let path = self.root.join(validate_relative(relative)?);
        fs::create_dir_all(&path).map_err(|e| {
            SandboxError::from_io(&format!("Failed to create {}", path.display()), e)
        })?;
        fs::set_permissions(&path, fs::Permissions::from_mode(mode)).map_err(|e| {
            SandboxError::from_io(&format!("Failed to chmod {}", path.display()), e)
        })?;
        Ok(())
    }

    fn materialize(&self, layout: &Layout) -> Result<()> {
        for (dir, mode) in SKELETON {
            self.make_dir(dir, *mode)?;
        }
        for LayoutDir { path, mode } in &layout.directories {
            debug!("Layout directory {} ({:o})", path, mode);
            self.make_dir(path, *mode)?;
        }
        Ok(())
    }

    fn write_marker(&self, layout: &Layout) -> Result<()> {
        let listing: String = layout
            .directories
            .iter()
            .map(|d| format!("{}\n", d.path))
            .collect();
        fs::write(self.marker(), listing)
            .map_err(|e| SandboxError::from_io("Failed to write layout marker", e))?;
        Ok(())
    }
}

/// Layout paths must stay inside the root
fn validate_relative(path: &str) -> Result<&Path> {
    let candidate = Path::new(path);
    let escapes = candidate
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if path.is_empty() || escapes {
        return Err(SandboxError::InvalidConfig(format!(
            "Layout path must be relative and stay inside the sandbox: {:?}",
            path
        )));
    }
    Ok(candidate)
}

impl Sandbox for IsolatedSandbox {
    fn kind(&self) -> &'static str {
        "isolated"
    }

    fn root(&self) -> &Path {
        &self.root
    }

    fn exists(&self) -> bool {
        self.marker().is_file()
    }

    fn create(&mut self, task: &TaskInstance) -> Result<()> {
        let layout = task.layout.as_ref().ok_or_else(|| {
            SandboxError::InvalidConfig(format!(
                "Task {} declares no layout; cannot build an isolated root",
                self.task_id
            ))
        })?;

        info!(
            "Creating isolated sandbox for {} at {}",
            self.task_id,
            self.root.display()
        );
        fs::create_dir_all(&self.root)
            .map_err(|e| SandboxError::from_io("Failed to create isolated root", e))?;

        // the marker is what `exists` checks, so it goes in last
        let built = self
            .materialize(layout)
            .and_then(|()| chown_to_role(&self.root, &task.role, self.mode))
            .and_then(|()| self.write_marker(layout));
        if let Err(e) = built {
            let _ = fs::remove_dir_all(&self.root);
            return Err(e);
        }
        Ok(())
    }

    fn destroy(&mut self) -> Result<()> {
        if self.root.exists() {
            debug!("Removing isolated sandbox {}", self.root.display());
            fs::remove_dir_all(&self.root)
                .map_err(|e| SandboxError::from_io("Failed to remove isolated root", e))?;
        }
        Ok(())
    }
}
