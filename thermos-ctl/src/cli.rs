use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use thermos_core::PrivilegeMode;

#[derive(Parser)]
#[command(name = "thermos-ctl")]
#[command(version, about = "Launch and supervise Thermos task runners", long_about = None)]
#[command(after_help = "EXAMPLES:
    # Launch a task from a task file and wait for it
    thermos-ctl run --task hello.json --port http:8080

    # Ask the runner to stop after 60s, force-kill 10s later
    thermos-ctl run --task hello.json --kill-after 60 --grace 10

    # Inspect or force-kill a task from another shell
    thermos-ctl state --task-id hello-1234
    thermos-ctl quitquitquit --task-id hello-1234

    thermos-ctl check
")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Show verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Launch a task and supervise its runner until it exits
    Run {
        /// Task instance JSON file
        #[arg(short, long, value_name = "FILE")]
        task: PathBuf,

        /// Task id (defaults to <task name>-<pid>)
        #[arg(long, value_name = "ID")]
        task_id: Option<String>,

        /// Override the role from the task file
        #[arg(long, value_name = "ROLE")]
        role: Option<String>,

        /// Allocated port, repeatable
        #[arg(short, long = "port", value_name = "NAME:PORT", value_parser = parse_port)]
        ports: Vec<(String, u16)>,

        /// Deployment variant
        #[arg(short, long, value_enum, default_value_t = DeploymentKind::Standard)]
        deployment: DeploymentKind,

        /// Working directory for the standard deployment
        #[arg(short, long, value_name = "PATH", default_value = ".")]
        workdir: PathBuf,

        /// Runner binary to materialize (standard deployment)
        #[arg(long, value_name = "PATH")]
        runner: Option<PathBuf>,

        /// Checkpoint root used when the deployment does not set one
        #[arg(long, value_name = "PATH")]
        checkpoint_root: Option<PathBuf>,

        /// Runner log directory
        #[arg(long, value_name = "PATH")]
        log_dir: Option<PathBuf>,

        /// Whether the runner drops to the task role
        #[arg(long, value_enum, default_value_t = PrivilegeArg::Auto)]
        privilege: PrivilegeArg,

        /// Send a graceful kill after this many seconds
        #[arg(long, value_name = "SECONDS")]
        kill_after: Option<u64>,

        /// Seconds between graceful kill and quitquitquit
        #[arg(long, value_name = "SECONDS", default_value_t = 5)]
        grace: u64,
    },

    /// Print a task's checkpointed state as JSON
    State {
        #[arg(long, value_name = "ID")]
        task_id: String,

        #[arg(long, value_name = "PATH", default_value = thermos_executor::config::DEFAULT_CHECKPOINT_ROOT)]
        checkpoint_root: PathBuf,
    },

    /// Force-kill every process recorded for a task
    Quitquitquit {
        #[arg(long, value_name = "ID")]
        task_id: String,

        #[arg(long, value_name = "PATH", default_value = thermos_executor::config::DEFAULT_CHECKPOINT_ROOT)]
        checkpoint_root: PathBuf,
    },

    /// Show executor identity and environment
    Check,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DeploymentKind {
    Standard,
    Harness,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PrivilegeArg {
    Auto,
    Privileged,
    Unprivileged,
}

impl From<PrivilegeArg> for PrivilegeMode {
    fn from(arg: PrivilegeArg) -> Self {
        match arg {
            PrivilegeArg::Auto => PrivilegeMode::Auto,
            PrivilegeArg::Privileged => PrivilegeMode::Privileged,
            PrivilegeArg::Unprivileged => PrivilegeMode::Unprivileged,
        }
    }
}

/// Parse `name:port`
pub fn parse_port(s: &str) -> Result<(String, u16), String> {
    let (name, port) = s
        .rsplit_once(':')
        .ok_or_else(|| format!("expected NAME:PORT, got '{}'", s))?;
    if name.is_empty() {
        return Err(format!("port name missing in '{}'", s));
    }
    let port = port
        .parse::<u16>()
        .map_err(|e| format!("invalid port in '{}': {}", s, e))?;
    Ok((name.to_string(), port))
}
