//! Task specification model and the task file handed to the runner
//!
//! The scheduler assigns a [`TaskInstance`]; the runner consumes only the
//! inner [`Task`], serialized as JSON into `task.json` under the artifact
//! directory.

use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::TaskError;

/// File name of the serialized task inside the artifact directory
pub const TASK_FILE_NAME: &str = "task.json";

/// A single process within a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Process {
    pub name: String,
    pub cmdline: String,
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,
    #[serde(default)]
    pub daemon: bool,
    #[serde(default)]
    pub ephemeral: bool,
    #[serde(default = "default_min_duration")]
    pub min_duration_secs: u64,
    #[serde(default, rename = "final")]
    pub is_final: bool,
}

impl Process {
    pub fn new(name: impl Into<String>, cmdline: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cmdline: cmdline.into(),
            max_failures: default_max_failures(),
            daemon: false,
            ephemeral: false,
            min_duration_secs: default_min_duration(),
            is_final: false,
        }
    }
}

/// Ordering constraint: processes in `order` run one after another
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraint {
    pub order: Vec<String>,
}

/// Resources requested by the task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resources {
    pub cpu: f64,
    pub ram_bytes: u64,
    pub disk_bytes: u64,
}

/// The task the runner executes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub name: String,
    pub processes: Vec<Process>,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
    #[serde(default)]
    pub resources: Resources,
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,
    /// 0 means unbounded
    #[serde(default)]
    pub max_concurrency: u32,
    #[serde(default = "default_finalization_wait")]
    pub finalization_wait_secs: u64,
}

impl Task {
    pub fn new(name: impl Into<String>, processes: Vec<Process>) -> Self {
        Self {
            name: name.into(),
            processes,
            constraints: Vec::new(),
            resources: Resources::default(),
            max_failures: default_max_failures(),
            max_concurrency: 0,
            finalization_wait_secs: default_finalization_wait(),
        }
    }

    /// Reject structurally invalid tasks before they reach the runner
    pub fn validate(&self) -> Result<(), TaskError> {
        if self.name.trim().is_empty() {
            return Err(TaskError::Invalid("task name cannot be empty".to_string()));
        }
        if self.processes.is_empty() {
            return Err(TaskError::Invalid(format!(
                "task '{}' has no processes",
                self.name
            )));
        }

        let mut names = HashSet::new();
        for process in &self.processes {
            if process.name.trim().is_empty() {
                return Err(TaskError::Invalid("process name cannot be empty".to_string()));
            }
            if process.cmdline.trim().is_empty() {
                return Err(TaskError::Invalid(format!(
                    "process '{}' has an empty cmdline",
                    process.name
                )));
            }
            if !names.insert(process.name.as_str()) {
                return Err(TaskError::Invalid(format!(
                    "duplicate process name '{}'",
                    process.name
                )));
            }
        }

        for constraint in &self.constraints {
            if let Some(unknown) = constraint
                .order
                .iter()
                .find(|name| !names.contains(name.as_str()))
            {
                return Err(TaskError::Invalid(format!(
                    "constraint references unknown process '{}'",
                    unknown
                )));
            }
        }

        Ok(())
    }

    /// Validate and write the task as JSON to `path`
    pub fn to_file(&self, path: &Path) -> Result<(), TaskError> {
        self.validate()?;
        let encoded = serde_json::to_vec_pretty(self)?;
        let mut file = fs::File::create(path)?;
        file.write_all(&encoded)?;
        file.sync_all()?;
        Ok(())
    }

    /// Read a task file and validate its contents
    pub fn from_file(path: &Path) -> Result<Self, TaskError> {
        let content = fs::read(path)?;
        let task: Task = serde_json::from_slice(&content)?;
        task.validate()?;
        Ok(task)
    }
}

/// Directory to materialize inside an isolated sandbox root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutDir {
    /// Path relative to the sandbox root
    pub path: String,
    #[serde(default = "default_dir_mode")]
    pub mode: u32,
}

/// Filesystem layout a task requires; its presence implies isolation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layout {
    #[serde(default)]
    pub directories: Vec<LayoutDir>,
}

/// A task as assigned by the scheduler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInstance {
    pub task: Task,
    #[serde(default)]
    pub instance: u32,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout: Option<Layout>,
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_secs: u64,
}

impl TaskInstance {
    pub fn new(task: Task, role: impl Into<String>) -> Self {
        Self {
            task,
            instance: 0,
            role: role.into(),
            layout: None,
            health_check_interval_secs: default_health_check_interval(),
        }
    }

    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = Some(layout);
        self
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn has_layout(&self) -> bool {
        self.layout.is_some()
    }
}

fn default_max_failures() -> u32 {
    1
}

fn default_min_duration() -> u64 {
    5
}

fn default_finalization_wait() -> u64 {
    30
}

fn default_health_check_interval() -> u64 {
    30
}

fn default_dir_mode() -> u32 {
    0o755
}
