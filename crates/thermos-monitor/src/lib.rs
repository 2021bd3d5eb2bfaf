//! thermos-monitor: read-only view of a running task
//!
//! The runner persists its progress as a checkpoint stream under
//! `<checkpoint_root>/checkpoints/<task_id>/runner`. This crate replays that
//! stream into a [`RunnerState`] and resolves the set of live processes that
//! belong to the task.

pub mod checkpoint;
pub mod error;
pub mod monitor;
pub mod proc_tree;

pub use checkpoint::{
    ProcessState, ProcessStatus, RunnerCkpt, RunnerHeader, RunnerState, TaskState, TaskStatus,
};
pub use error::{MonitorError, Result};
pub use monitor::{
    CheckpointMonitor, CheckpointMonitorFactory, MonitorFactory, ProcessTree, StateMonitor,
};
