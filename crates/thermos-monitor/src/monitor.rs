//! State monitors bound to a task's checkpoint stream

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::{debug, warn};
use nix::unistd::Pid;

use crate::checkpoint::{RunnerState, TaskState};
use crate::error::{MonitorError, Result};
use crate::proc_tree;

/// Read-only view of a task's externally persisted state
pub trait StateMonitor: Send + Sync {
    fn task_id(&self) -> &str;

    /// Best-known snapshot, or `None` if nothing has been checkpointed yet
    fn get_state(&self) -> Option<RunnerState>;

    fn task_state(&self) -> Option<TaskState> {
        self.get_state().and_then(|state| state.task_state())
    }

    /// Live OS processes belonging to the task, resolved from checkpoint data
    fn process_tree(&self) -> Result<ProcessTree>;
}

/// Binds monitors to `(checkpoint_root, task_id)`
pub trait MonitorFactory: Send + Sync {
    fn bind(&self, checkpoint_root: &Path, task_id: &str) -> Box<dyn StateMonitor>;
}

/// Processes to terminate for a task
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessTree {
    /// The runner itself, if it has not reached a terminal state
    pub runner: Option<Pid>,
    /// Process coordinators, processes and all their descendants
    pub processes: Vec<Pid>,
}

impl ProcessTree {
    pub fn is_empty(&self) -> bool {
        self.runner.is_none() && self.processes.is_empty()
    }

    /// Runner first, then processes; no duplicates
    pub fn pids(&self) -> Vec<Pid> {
        let mut pids: Vec<Pid> = self.runner.into_iter().collect();
        for pid in &self.processes {
            if !pids.contains(pid) {
                pids.push(*pid);
            }
        }
        pids
    }
}

/// Monitor reading the runner's checkpoint stream from disk
pub struct CheckpointMonitor {
    task_id: String,
    path: PathBuf,
    last_good: Mutex<Option<RunnerState>>,
}

impl CheckpointMonitor {
    pub fn new(checkpoint_root: impl AsRef<Path>, task_id: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            path: Self::checkpoint_path(checkpoint_root.as_ref(), task_id),
            last_good: Mutex::new(None),
        }
    }

    /// `<checkpoint_root>/checkpoints/<task_id>/runner`
    pub fn checkpoint_path(checkpoint_root: &Path, task_id: &str) -> PathBuf {
        checkpoint_root
            .join("checkpoints")
            .join(task_id)
            .join("runner")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and replay the checkpoint stream
    pub fn read(&self) -> Result<RunnerState> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(MonitorError::NotFound {
                    task_id: self.task_id.clone(),
                    path: self.path.clone(),
                });
            }
            Err(e) => return Err(e.into()),
        };
        RunnerState::replay(&content)
    }

    fn remember(&self, state: &RunnerState) {
        let mut last = self
            .last_good
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        *last = Some(state.clone());
    }

    fn last_good(&self) -> Option<RunnerState> {
        self.last_good
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .clone()
    }
}

impl StateMonitor for CheckpointMonitor {
    fn task_id(&self) -> &str {
        &self.task_id
    }

    fn get_state(&self) -> Option<RunnerState> {
        match self.read() {
            Ok(state) => {
                self.remember(&state);
                Some(state)
            }
            Err(MonitorError::NotFound { .. }) => None,
            Err(e) => {
                warn!("Could not read checkpoint for {}: {}", self.task_id, e);
                self.last_good()
            }
        }
    }

    fn process_tree(&self) -> Result<ProcessTree> {
        let state = self.read()?;
        let me = std::process::id() as i32;
        let killable = |pid: &i32| *pid > 1 && *pid != me;

        let runner = match state.task_state() {
            Some(task_state) if task_state.is_terminal() => None,
            _ => state.runner_pid().filter(killable),
        };

        let mut roots: Vec<i32> = Vec::new();
        for status in state.active_processes() {
            roots.extend(status.coordinator_pid.into_iter().chain(status.pid));
        }
        let mut seen = HashSet::new();
        roots.retain(|pid| killable(pid) && seen.insert(*pid));

        let mut processes = roots.clone();
        match proc_tree::descendants(&roots) {
            Ok(found) => processes.extend(found.into_iter().filter(killable)),
            Err(e) => warn!("Could not expand process tree for {}: {}", self.task_id, e),
        }

        debug!(
            "Resolved process tree for {}: runner={:?} processes={:?}",
            self.task_id, runner, processes
        );
        Ok(ProcessTree {
            runner: runner.map(Pid::from_raw),
            processes: processes.into_iter().map(Pid::from_raw).collect(),
        })
    }
}

/// Factory for [`CheckpointMonitor`]
#[derive(Debug, Clone, Copy, Default)]
pub struct CheckpointMonitorFactory;

impl MonitorFactory for CheckpointMonitorFactory {
    fn bind(&self, checkpoint_root: &Path, task_id: &str) -> Box<dyn StateMonitor> {
        Box::new(CheckpointMonitor::new(checkpoint_root, task_id))
    }
}
