//! Runner process execution

pub mod command;
pub mod process;

pub use command::{RunnerCommand, RunnerInvocation};
pub use process::{NixProcessControl, ProcessControl, ReapStatus, RunnerExit};
