//! Standard production deployment

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};

use thermos_core::{Result, SupervisorError, TaskInstance};
use thermos_sandbox::{DirectorySandbox, IsolatedSandbox, Sandbox, isolated::DEFAULT_ISOLATED_BASE};

use crate::config::ExecutorConfig;
use crate::deployment::{Deployment, DeploymentEnv, RUNNER_NAME};
use crate::runner::{TaskRunner, TaskRunnerBuilder};

/// Overrides the checkpoint root with `<value>/checkpoints`
pub const META_THERMOS_ROOT: &str = "META_THERMOS_ROOT";

/// Runs tasks out of the executor's working directory.
///
/// The runner binary is copied into the working directory, which also serves
/// as the artifact directory. Tasks declaring a layout get an isolated root
/// and a chrooted runner; all others get `<workdir>/sandbox/<task_id>`.
#[derive(Debug, Clone)]
pub struct StandardDeployment {
    workdir: PathBuf,
    runner_source: Option<PathBuf>,
    isolated_base: PathBuf,
    env: DeploymentEnv,
    config: ExecutorConfig,
}

impl StandardDeployment {
    pub fn new(workdir: impl AsRef<Path>, env: DeploymentEnv) -> Self {
        Self {
            workdir: workdir.as_ref().to_path_buf(),
            runner_source: None,
            isolated_base: PathBuf::from(DEFAULT_ISOLATED_BASE),
            env,
            config: ExecutorConfig::default(),
        }
    }

    /// Runner binary to materialize; defaults to `thermos_runner` next to the
    /// current executable
    pub fn runner_source(mut self, path: impl AsRef<Path>) -> Self {
        self.runner_source = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn isolated_base(mut self, path: impl AsRef<Path>) -> Self {
        self.isolated_base = path.as_ref().to_path_buf();
        self
    }

    pub fn config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    fn resolve_runner_source(&self) -> Result<PathBuf> {
        if let Some(source) = &self.runner_source {
            return Ok(source.clone());
        }
        let exe = std::env::current_exe().map_err(|e| {
            SupervisorError::configuration_with("Could not locate current executable", e)
        })?;
        let dir = exe.parent().ok_or_else(|| {
            SupervisorError::configuration("Current executable has no parent directory")
        })?;
        Ok(dir.join(RUNNER_NAME))
    }

    /// Copy the runner into `directory` and return its new path
    fn dump_runner(&self, directory: &Path) -> Result<PathBuf> {
        let source = self.resolve_runner_source()?;
        let target = directory.join(RUNNER_NAME);
        if source == target {
            return Ok(target);
        }
        debug!("Copying runner {} to {}", source.display(), target.display());
        fs::copy(&source, &target).map_err(|e| {
            SupervisorError::configuration_with(
                format!("Could not materialize runner from {}", source.display()),
                e,
            )
        })?;
        Ok(target)
    }

    fn checkpoint_root(&self) -> Option<PathBuf> {
        self.env
            .get(META_THERMOS_ROOT)
            .map(|root| Path::new(root).join("checkpoints"))
    }
}

impl Deployment for StandardDeployment {
    fn name(&self) -> &'static str {
        "standard"
    }

    fn configure(&self, task_id: &str, task: TaskInstance) -> Result<TaskRunnerBuilder> {
        let workdir = fs::canonicalize(&self.workdir).map_err(|e| {
            SupervisorError::configuration_with(
                format!("Invalid working directory {}", self.workdir.display()),
                e,
            )
        })?;
        let runner = self.dump_runner(&workdir)?;

        let isolated = task.has_layout();
        let mode = self.config.privilege_mode;
        let sandbox: Box<dyn Sandbox> = if isolated {
            Box::new(IsolatedSandbox::with_base(task_id, &self.isolated_base).privilege_mode(mode))
        } else {
            Box::new(DirectorySandbox::new(task_id, workdir.join("sandbox")).privilege_mode(mode))
        };
        info!(
            "Standard deployment for {}: {} sandbox at {}",
            task_id,
            sandbox.kind(),
            sandbox.root().display()
        );

        let mut builder = TaskRunner::builder(task_id)
            .task(task)
            .runner(runner)
            .boxed_sandbox(sandbox)
            .artifact_dir(&workdir)
            .enable_chroot(isolated)
            .config(self.config.clone());
        if let Some(root) = self.checkpoint_root() {
            builder = builder.checkpoint_root(root);
        }
        Ok(builder)
    }
}
