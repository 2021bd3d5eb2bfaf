//! Lifecycle tests against real runner processes
//!
//! The runner is a small shell script standing in for `thermos_runner`.
//! Tests fork children, so they hold a shared lock.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use nix::sys::signal::Signal;
use tempfile::{TempDir, tempdir};
use thermos_core::{PrivilegeMode, Process, Task, TaskInstance};
use thermos_executor::{ExecutorConfig, RunnerExit, TaskRunner, quitquitquit};
use thermos_monitor::{CheckpointMonitor, RunnerCkpt, TaskState, TaskStatus};
use thermos_sandbox::DirectorySandbox;

static LIFECYCLE_TEST_LOCK: Mutex<()> = Mutex::new(());

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        Self {
            dir: tempdir().unwrap(),
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn runner(&self, script: &str, task_id: &str) -> TaskRunner {
        let runner = self.path("thermos_runner");
        fs::write(&runner, format!("#!/bin/sh\n{}\n", script)).unwrap();

        let task = TaskInstance::new(
            Task::new("hello", vec![Process::new("hello", "echo hello")]),
            "nobody",
        );
        let mut runner = TaskRunner::builder(task_id)
            .task(task)
            .runner(runner)
            .sandbox(
                DirectorySandbox::new(task_id, self.path("sandbox"))
                    .privilege_mode(PrivilegeMode::Unprivileged),
            )
            .checkpoint_root(self.path("checkpoints"))
            .artifact_dir(self.path("artifacts"))
            .port("http", 8080)
            .config(
                ExecutorConfig::default()
                    .log_dir(self.path("logs"))
                    .privilege_mode(PrivilegeMode::Unprivileged),
            )
            .build()
            .unwrap();
        runner.initialize().unwrap();
        runner
    }
}

fn wait_until_dead(runner: &TaskRunner) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if !runner.is_alive().unwrap() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    false
}

#[test]
fn test_exit_is_observed_and_sticky() {
    let _lock = LIFECYCLE_TEST_LOCK.lock();
    let ws = Workspace::new();
    let runner = ws.runner("exit 0", "exit-task");

    runner.start().unwrap();
    assert!(runner.is_started());
    assert!(wait_until_dead(&runner));
    assert_eq!(runner.exit_status(), Some(RunnerExit::Code(0)));

    // later polls stay false without error
    assert!(!runner.is_alive().unwrap());
    assert!(!runner.is_alive().unwrap());

    runner.kill().unwrap();
    runner.cleanup();
}

#[test]
fn test_kill_interrupts_running_runner() {
    let _lock = LIFECYCLE_TEST_LOCK.lock();
    let ws = Workspace::new();
    let runner = ws.runner("exec sleep 30", "kill-task");

    runner.start().unwrap();
    assert!(runner.is_alive().unwrap());

    runner.kill().unwrap();
    assert!(wait_until_dead(&runner));
    assert_eq!(
        runner.exit_status(),
        Some(RunnerExit::Signaled(Signal::SIGINT))
    );

    // duplicate kill is a no-op
    runner.kill().unwrap();
}

#[test]
fn test_runner_receives_expected_arguments() {
    let _lock = LIFECYCLE_TEST_LOCK.lock();
    let ws = Workspace::new();
    let args_file = ws.path("args");
    let script = format!("printf '%s\\n' \"$@\" > '{}'", args_file.display());
    let runner = ws.runner(&script, "args-task");

    runner.start().unwrap();
    assert!(wait_until_dead(&runner));

    let args = fs::read_to_string(&args_file).unwrap();
    let lines: Vec<&str> = args.lines().collect();
    assert_eq!(lines.iter().filter(|l| l.starts_with("--port=")).count(), 1);
    assert!(lines.contains(&"--port=http:8080"));
    assert!(lines.contains(&"--task_id=args-task"));
    assert!(lines.contains(&"--log_to_disk=DEBUG"));
    let expected_json = format!(
        "--thermos_json={}",
        ws.path("artifacts").join("task.json").display()
    );
    assert!(lines.contains(&expected_json.as_str()));
    assert!(!lines.iter().any(|l| l.starts_with("--setuid")));
    assert!(!lines.contains(&"--enable_chroot"));
}

#[test]
fn test_quitquitquit_kills_runner_recorded_in_checkpoint() {
    let _lock = LIFECYCLE_TEST_LOCK.lock();
    let ws = Workspace::new();
    let runner = ws.runner("exec sleep 30", "qqq-task");
    runner.start().unwrap();
    assert!(runner.is_alive().unwrap());

    write_checkpoint(
        runner.checkpoint_root(),
        "qqq-task",
        RunnerCkpt::TaskStatus(TaskStatus {
            state: TaskState::Active,
            timestamp_ms: 0,
            runner_pid: runner.pid().map(|pid| pid.as_raw()),
            runner_uid: None,
        }),
    );
    assert_eq!(runner.task_state(), Some(TaskState::Active));

    assert_eq!(quitquitquit("qqq-task", runner.checkpoint_root()), 1);
    assert!(wait_until_dead(&runner));
    assert_eq!(
        runner.exit_status(),
        Some(RunnerExit::Signaled(Signal::SIGKILL))
    );
}

fn write_checkpoint(root: &Path, task_id: &str, record: RunnerCkpt) {
    let path = CheckpointMonitor::checkpoint_path(root, task_id);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, format!("{}\n", serde_json::to_string(&record).unwrap())).unwrap();
}
