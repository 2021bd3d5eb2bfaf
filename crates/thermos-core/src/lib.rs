//! thermos-core: shared types for the Thermos task supervisor
//!
//! This crate provides the foundational types used by the other crates:
//! - Error types and Result alias
//! - Task specification model and the runner's task file
//! - Executor identity and privilege mode
//! - Clock abstraction

pub mod clock;
pub mod error;
pub mod privilege;
pub mod task;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{BoxError, Result, SandboxError, SupervisorError, TaskError};
pub use privilege::{PrivilegeMode, ProcessIdentity, ResolvedMode};
pub use task::{Layout, LayoutDir, Process, Task, TaskInstance, TASK_FILE_NAME};
