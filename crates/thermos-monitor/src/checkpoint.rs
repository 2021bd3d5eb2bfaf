//! Runner checkpoint records and replay into a state snapshot
//!
//! The runner appends one JSON record per line to its checkpoint stream.
//! Records are tagged by `type`. Replaying the stream in order yields the
//! current [`RunnerState`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{MonitorError, Result};

/// Lifecycle state of the task as a whole
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Active,
    Cleaning,
    Finalizing,
    Success,
    Failed,
    Killed,
    Lost,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Success | TaskState::Failed | TaskState::Killed | TaskState::Lost
        )
    }
}

/// Lifecycle state of one process run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessState {
    Waiting,
    Forked,
    Running,
    Success,
    Killed,
    Failed,
    Lost,
}

impl ProcessState {
    /// A process in this state may own live OS processes
    pub fn is_active(&self) -> bool {
        matches!(self, ProcessState::Forked | ProcessState::Running)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerHeader {
    pub task_id: String,
    pub launch_time_ms: u64,
    pub sandbox: String,
    pub hostname: String,
    pub user: String,
    #[serde(default)]
    pub ports: BTreeMap<String, u16>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub state: TaskState,
    pub timestamp_ms: u64,
    #[serde(default)]
    pub runner_pid: Option<i32>,
    #[serde(default)]
    pub runner_uid: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessStatus {
    pub process: String,
    pub seq: u64,
    pub state: ProcessState,
    #[serde(default)]
    pub pid: Option<i32>,
    #[serde(default)]
    pub coordinator_pid: Option<i32>,
    #[serde(default)]
    pub return_code: Option<i32>,
    #[serde(default)]
    pub start_time_ms: Option<u64>,
    #[serde(default)]
    pub stop_time_ms: Option<u64>,
}

/// One line of the checkpoint stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunnerCkpt {
    RunnerHeader(RunnerHeader),
    TaskStatus(TaskStatus),
    ProcessStatus(ProcessStatus),
}

/// Snapshot reconstructed from the checkpoint stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunnerState {
    pub header: Option<RunnerHeader>,
    pub statuses: Vec<TaskStatus>,
    pub processes: BTreeMap<String, Vec<ProcessStatus>>,
}

impl RunnerState {
    /// Replay a checkpoint stream.
    ///
    /// A final line without a trailing newline that fails to parse is a write
    /// in progress and is skipped. Any other undecodable line is corruption.
    pub fn replay(content: &str) -> Result<Self> {
        let mut state = RunnerState::default();

        for (index, raw) in content.split_inclusive('\n').enumerate() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<RunnerCkpt>(line) {
                Ok(record) => state.apply(record),
                Err(_) if !raw.ends_with('\n') => break,
                Err(source) => {
                    return Err(MonitorError::Corrupt {
                        line: index + 1,
                        source,
                    });
                }
            }
        }

        Ok(state)
    }

    /// Fold one record into the snapshot. Process updates that do not advance
    /// the per-process sequence number are stale and dropped.
    pub fn apply(&mut self, record: RunnerCkpt) {
        match record {
            RunnerCkpt::RunnerHeader(header) => self.header = Some(header),
            RunnerCkpt::TaskStatus(status) => self.statuses.push(status),
            RunnerCkpt::ProcessStatus(status) => {
                let history = self.processes.entry(status.process.clone()).or_default();
                if history.last().is_none_or(|last| status.seq > last.seq) {
                    history.push(status);
                }
            }
        }
    }

    /// Latest task-level state
    pub fn task_state(&self) -> Option<TaskState> {
        self.statuses.last().map(|s| s.state)
    }

    /// Pid of the runner as last recorded
    pub fn runner_pid(&self) -> Option<i32> {
        self.statuses.iter().rev().find_map(|s| s.runner_pid)
    }

    pub fn latest_process(&self, name: &str) -> Option<&ProcessStatus> {
        self.processes.get(name).and_then(|history| history.last())
    }

    /// Latest status of every process that may still own OS processes
    pub fn active_processes(&self) -> impl Iterator<Item = &ProcessStatus> {
        self.processes
            .values()
            .filter_map(|history| history.last())
            .filter(|status| status.state.is_active())
    }
}
