use console::style;
use log::{debug, info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use thermos_core::{PrivilegeMode, TaskInstance};
use thermos_executor::{
    Deployment, DeploymentEnv, ExecutorConfig, HarnessDeployment, POLL_INTERVAL,
    StandardDeployment, TaskRunner,
};

use crate::cli::DeploymentKind;

/// Options for `thermos-ctl run`
pub struct RunConfig {
    pub task: PathBuf,
    pub task_id: Option<String>,
    pub role: Option<String>,
    pub ports: Vec<(String, u16)>,
    pub deployment: DeploymentKind,
    pub workdir: PathBuf,
    pub runner: Option<PathBuf>,
    pub checkpoint_root: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
    pub privilege: PrivilegeMode,
    pub kill_after: Option<u64>,
    pub grace: u64,
}

pub fn load_task(path: &Path) -> Result<TaskInstance, Box<dyn std::error::Error>> {
    let content = fs::read_to_string(path)
        .map_err(|e| format!("Could not read task file {}: {}", path.display(), e))?;
    let task: TaskInstance = serde_json::from_str(&content)
        .map_err(|e| format!("Could not parse task file {}: {}", path.display(), e))?;
    Ok(task)
}

fn build_deployment(config: &RunConfig, executor: ExecutorConfig) -> Box<dyn Deployment> {
    let env = DeploymentEnv::from_process();
    match config.deployment {
        DeploymentKind::Standard => {
            let mut deployment = StandardDeployment::new(&config.workdir, env).config(executor);
            if let Some(runner) = &config.runner {
                deployment = deployment.runner_source(runner);
            }
            Box::new(deployment)
        }
        DeploymentKind::Harness => Box::new(HarnessDeployment::new(env).config(executor)),
    }
}

pub fn run_task(config: RunConfig) -> Result<(), Box<dyn std::error::Error>> {
    let task = load_task(&config.task)?;
    let task_id = config
        .task_id
        .clone()
        .unwrap_or_else(|| format!("{}-{}", task.task.name, std::process::id()));

    let mut executor = ExecutorConfig::default().privilege_mode(config.privilege);
    if let Some(root) = &config.checkpoint_root {
        executor = executor.checkpoint_root(root);
    }
    if let Some(dir) = &config.log_dir {
        executor = executor.log_dir(dir);
    }
    executor.validate()?;

    let deployment = build_deployment(&config, executor);
    debug!("Using {} deployment", deployment.name());

    let mut builder = deployment
        .configure(&task_id, task)?
        .ports(config.ports.iter().cloned());
    if let Some(role) = &config.role {
        builder = builder.role(role);
    }
    let mut runner = builder.build()?;

    runner.initialize()?;
    runner.start()?;
    println!(
        "{} {} (pid {})",
        style("started").green().bold(),
        style(&task_id).bold(),
        runner.pid().map(|p| p.to_string()).unwrap_or_default()
    );

    supervise(&runner, config.kill_after, config.grace)?;
    runner.cleanup();
    report(&runner);
    Ok(())
}

/// Poll until the runner exits, escalating from kill to quitquitquit
fn supervise(
    runner: &TaskRunner,
    kill_after: Option<u64>,
    grace: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let started = Instant::now();
    let kill_at = kill_after.map(Duration::from_secs);
    let mut escalate_at: Option<Duration> = None;
    let mut escalated = false;

    while runner.is_alive()? {
        let elapsed = started.elapsed();
        if let Some(at) = kill_at
            && elapsed >= at
            && !runner.is_kill_requested()
        {
            info!("Kill deadline reached for {}", runner.task_id());
            runner.kill()?;
            escalate_at = Some(elapsed + Duration::from_secs(grace));
        }
        if let Some(at) = escalate_at
            && elapsed >= at
            && !escalated
        {
            warn!(
                "Runner for {} still alive after {}s, escalating",
                runner.task_id(),
                grace
            );
            runner.quitquitquit();
            escalated = true;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
    Ok(())
}

fn report(runner: &TaskRunner) {
    let exit = match runner.exit_status() {
        Some(exit) if exit.success() => style(exit.to_string()).green().bold(),
        Some(exit) => style(exit.to_string()).red().bold(),
        None => style("unknown".to_string()).dim(),
    };
    let state = runner
        .task_state()
        .map(|s| format!("{:?}", s).to_uppercase())
        .unwrap_or_else(|| "UNKNOWN".to_string());
    let uptime = runner.uptime().map(|d| d.as_millis()).unwrap_or_default();

    println!(
        "{}={} | {}={} | {}={} | {}={}",
        style("task_id").dim(),
        style(runner.task_id()).bold(),
        style("runner").dim(),
        exit,
        style("task_state").dim(),
        style(state).bold(),
        style("wall_time_ms").dim(),
        style(uptime).bold(),
    );
}
