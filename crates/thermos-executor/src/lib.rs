//! thermos-executor: supervision of a single Thermos task attempt
//!
//! A [`TaskRunner`] prepares the task's sandbox, forks the external runner
//! with the right arguments, tracks whether it is still alive, reads its
//! checkpointed state and stops it gracefully or by force.
//!
//! # Example
//!
//! ```ignore
//! use thermos_executor::{Deployment, DeploymentEnv, StandardDeployment};
//!
//! let deployment = StandardDeployment::new(".", DeploymentEnv::from_process());
//! let mut runner = deployment
//!     .configure("hello-1", task)?
//!     .port("http", 8080)
//!     .build()?;
//! runner.initialize()?;
//! runner.start()?;
//! while runner.is_alive()? {
//!     std::thread::sleep(thermos_executor::POLL_INTERVAL);
//! }
//! runner.cleanup();
//! ```

pub mod config;
pub mod deployment;
pub mod execution;
pub mod runner;

use std::time::Duration;

pub use config::ExecutorConfig;
pub use deployment::{Deployment, DeploymentEnv, HarnessDeployment, StandardDeployment};
pub use execution::{NixProcessControl, ProcessControl, ReapStatus, RunnerCommand, RunnerExit};
pub use runner::{TaskRunner, TaskRunnerBuilder, quitquitquit};

/// Interval callers use between liveness polls
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);
