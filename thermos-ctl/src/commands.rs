use console::style;
use log::info;
use serde_json::json;
use std::path::{Path, PathBuf};

use thermos_core::{PrivilegeMode, ProcessIdentity, ResolvedMode};
use thermos_executor::config::DEFAULT_CHECKPOINT_ROOT;
use thermos_executor::deployment::RUNNER_NAME;
use thermos_monitor::{CheckpointMonitor, RunnerState};

/// JSON summary of a replayed checkpoint stream
pub fn state_summary(task_id: &str, state: &RunnerState) -> serde_json::Value {
    let processes: serde_json::Map<String, serde_json::Value> = state
        .processes
        .keys()
        .filter_map(|name| {
            let latest = state.latest_process(name)?;
            Some((
                name.clone(),
                json!({
                    "state": latest.state,
                    "pid": latest.pid,
                    "return_code": latest.return_code,
                }),
            ))
        })
        .collect();

    json!({
        "task_id": task_id,
        "state": state.task_state(),
        "runner_pid": state.runner_pid(),
        "header": state.header,
        "processes": processes,
    })
}

pub fn show_state(task_id: &str, checkpoint_root: &Path) -> Result<(), Box<dyn std::error::Error>> {
    info!("Reading checkpoint for {}", task_id);
    let state = CheckpointMonitor::new(checkpoint_root, task_id).read()?;
    println!(
        "{}",
        serde_json::to_string_pretty(&state_summary(task_id, &state))?
    );
    Ok(())
}

pub fn force_kill(task_id: &str, checkpoint_root: &Path) {
    let killed = thermos_executor::quitquitquit(task_id, checkpoint_root);
    if killed == 0 {
        println!("{} nothing to kill for {}", style("quitquitquit:").yellow(), task_id);
    } else {
        println!(
            "{} killed {} process(es) of {}",
            style("quitquitquit:").red().bold(),
            killed,
            task_id
        );
    }
}

/// Snapshot of what the executor would run with on this host
pub struct EnvironmentReport {
    pub identity: ProcessIdentity,
    pub mode: ResolvedMode,
    pub checkpoint_root: PathBuf,
    pub checkpoint_root_exists: bool,
    pub runner: Option<PathBuf>,
}

impl EnvironmentReport {
    pub fn inspect(checkpoint_root: &Path) -> Self {
        let identity = ProcessIdentity::detect();
        let mode = PrivilegeMode::Auto.resolve(&identity);
        let runner = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join(RUNNER_NAME)));
        Self {
            identity,
            mode,
            checkpoint_root: checkpoint_root.to_path_buf(),
            checkpoint_root_exists: checkpoint_root.is_dir(),
            runner,
        }
    }

    pub fn runner_found(&self) -> bool {
        self.runner.as_deref().is_some_and(Path::exists)
    }

    /// Pass/fail lines in display order
    pub fn checks(&self) -> Vec<(bool, String)> {
        let root = if self.identity.is_root() {
            "Running as root (runner will setuid to the task role)".to_string()
        } else {
            "NOT running as root (runner keeps the executor identity)".to_string()
        };
        let checkpoint = if self.checkpoint_root_exists {
            format!("Checkpoint root {} exists", self.checkpoint_root.display())
        } else {
            format!("Checkpoint root {} missing", self.checkpoint_root.display())
        };
        let runner = match &self.runner {
            Some(path) if self.runner_found() => format!("Runner found at {}", path.display()),
            Some(path) => format!("Runner not found at {}", path.display()),
            None => "Could not locate the runner".to_string(),
        };
        vec![
            (self.identity.is_root(), root),
            (self.checkpoint_root_exists, checkpoint),
            (self.runner_found(), runner),
        ]
    }
}

pub fn check_environment() {
    info!("Checking executor environment");
    println!("Checking executor environment...\n");

    let report = EnvironmentReport::inspect(Path::new(DEFAULT_CHECKPOINT_ROOT));
    for (ok, line) in report.checks() {
        let mark = if ok { style("[✓]").green() } else { style("[✗]").red() };
        println!("{} {}", mark, line);
    }

    let mode = match report.mode {
        ResolvedMode::Privileged => "privileged",
        ResolvedMode::Unprivileged => "unprivileged",
    };
    println!("\nSystem info:");
    println!("  EUID: {}", report.identity.euid);
    println!(
        "  User: {}",
        report.identity.user.as_deref().unwrap_or("<unknown>")
    );
    println!("  Privilege mode (auto): {}", mode);
}
