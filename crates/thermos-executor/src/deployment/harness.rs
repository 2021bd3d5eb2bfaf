//! Local test harness deployment

use std::path::{Path, PathBuf};

use log::info;

use thermos_core::{Result, TaskInstance};
use thermos_sandbox::DirectorySandbox;

use crate::config::ExecutorConfig;
use crate::deployment::{Deployment, DeploymentEnv, RUNNER_NAME};
use crate::runner::{TaskRunner, TaskRunnerBuilder};

/// Harness checkout containing `science/dist/thermos_runner`
pub const HARNESS_HOME: &str = "ANGRYBIRD_HOME";

/// Harness log directory holding sandboxes and checkpoints
pub const HARNESS_LOGDIR: &str = "ANGRYBIRD_THERMOS";

/// Paths resolved from the harness environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessPaths {
    pub runner: PathBuf,
    pub sandbox_root: PathBuf,
    pub checkpoint_root: PathBuf,
}

impl HarnessPaths {
    pub fn resolve(env: &DeploymentEnv) -> Result<Self> {
        let home = Path::new(env.require(HARNESS_HOME)?);
        let logdir = Path::new(env.require(HARNESS_LOGDIR)?);
        Ok(Self {
            runner: home.join("science").join("dist").join(RUNNER_NAME),
            sandbox_root: logdir.join("thermos").join("lib"),
            checkpoint_root: logdir.join("thermos").join("run"),
        })
    }
}

/// Directory sandboxes and checkpoints under the harness log directory
#[derive(Debug, Clone)]
pub struct HarnessDeployment {
    env: DeploymentEnv,
    config: ExecutorConfig,
}

impl HarnessDeployment {
    pub fn new(env: DeploymentEnv) -> Self {
        Self {
            env,
            config: ExecutorConfig::default(),
        }
    }

    pub fn config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }
}

impl Deployment for HarnessDeployment {
    fn name(&self) -> &'static str {
        "harness"
    }

    fn configure(&self, task_id: &str, task: TaskInstance) -> Result<TaskRunnerBuilder> {
        let paths = HarnessPaths::resolve(&self.env)?;
        info!(
            "Harness deployment for {}: runner {}, checkpoints {}",
            task_id,
            paths.runner.display(),
            paths.checkpoint_root.display()
        );
        let sandbox = DirectorySandbox::new(task_id, &paths.sandbox_root)
            .privilege_mode(self.config.privilege_mode);

        Ok(TaskRunner::builder(task_id)
            .task(task)
            .runner(paths.runner)
            .sandbox(sandbox)
            .checkpoint_root(paths.checkpoint_root)
            .config(self.config.clone()))
    }
}
