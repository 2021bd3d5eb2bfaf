//! Deployment variants
//!
//! A variant decides where the runner binary lives, which sandbox a task
//! gets and where checkpoints go. It only pre-populates a
//! [`TaskRunnerBuilder`]; the supervisor itself is identical everywhere.

pub mod harness;
pub mod standard;

use std::collections::HashMap;

use thermos_core::{Result, SupervisorError, TaskInstance};

use crate::runner::TaskRunnerBuilder;

pub use harness::HarnessDeployment;
pub use standard::StandardDeployment;

/// File name of the runner binary
pub const RUNNER_NAME: &str = "thermos_runner";

/// Strategy producing supervisor construction arguments for a deployment
pub trait Deployment {
    fn name(&self) -> &'static str;

    /// Builder with runner, sandbox, checkpoint root and artifact dir resolved
    fn configure(&self, task_id: &str, task: TaskInstance) -> Result<TaskRunnerBuilder>;
}

/// Snapshot of the environment variables a deployment reads
#[derive(Debug, Clone, Default)]
pub struct DeploymentEnv {
    vars: HashMap<String, String>,
}

impl DeploymentEnv {
    pub fn from_process() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn require(&self, key: &str) -> Result<&str> {
        self.get(key).ok_or_else(|| {
            SupervisorError::configuration(format!("Environment variable {} is not set", key))
        })
    }
}
