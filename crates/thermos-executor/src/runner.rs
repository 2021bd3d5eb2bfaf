//! Task supervisor: owns one task attempt's runner process
//!
//! Lifecycle: build, [`TaskRunner::initialize`], [`TaskRunner::start`], poll
//! [`TaskRunner::is_alive`] and [`TaskRunner::state`], then stop with
//! [`TaskRunner::kill`] and, if that is not enough,
//! [`TaskRunner::quitquitquit`]. [`TaskRunner::cleanup`] runs once the caller
//! has observed termination.
//!
//! The runner is reaped by pid with `WNOHANG`. Nothing else in the same
//! process may collect children with a blanket `wait()`/`waitpid(-1)`, or the
//! runner's exit status is lost and liveness falls back to `ECHILD`.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, SystemTime};

use log::{debug, error, info, warn};
use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::unistd::Pid;

use thermos_core::{
    Clock, ProcessIdentity, ResolvedMode, Result, SupervisorError, SystemClock, TASK_FILE_NAME,
    Task, TaskInstance,
};
use thermos_monitor::{
    CheckpointMonitorFactory, MonitorFactory, RunnerState, StateMonitor, TaskState,
};
use thermos_sandbox::Sandbox;

use crate::config::ExecutorConfig;
use crate::execution::{
    NixProcessControl, ProcessControl, ReapStatus, RunnerCommand, RunnerExit, RunnerInvocation,
};

/// Supervisor for a single task attempt
pub struct TaskRunner {
    task_id: String,
    instance: TaskInstance,
    role: String,
    ports: BTreeMap<String, u16>,
    runner: PathBuf,
    sandbox: Box<dyn Sandbox>,
    checkpoint_root: PathBuf,
    artifact_dir: PathBuf,
    task_file: PathBuf,
    enable_chroot: bool,
    config: ExecutorConfig,
    mode: ResolvedMode,
    clock: Arc<dyn Clock>,
    monitor_factory: Arc<dyn MonitorFactory>,
    control: Arc<dyn ProcessControl>,

    initialized: AtomicBool,
    launched: AtomicBool,
    pid: OnceLock<Pid>,
    command: OnceLock<RunnerCommand>,
    started_at: OnceLock<SystemTime>,
    monitor: OnceLock<Box<dyn StateMonitor>>,

    dead: AtomicBool,
    reap_lock: Mutex<()>,
    exit: OnceLock<RunnerExit>,
    kill_requested: AtomicBool,
    cleaned_up: AtomicBool,
}

impl TaskRunner {
    pub fn builder(task_id: &str) -> TaskRunnerBuilder {
        TaskRunnerBuilder::new(task_id)
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn task(&self) -> &TaskInstance {
        &self.instance
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn ports(&self) -> &BTreeMap<String, u16> {
        &self.ports
    }

    pub fn runner_path(&self) -> &Path {
        &self.runner
    }

    pub fn sandbox(&self) -> &dyn Sandbox {
        self.sandbox.as_ref()
    }

    pub fn checkpoint_root(&self) -> &Path {
        &self.checkpoint_root
    }

    pub fn artifact_dir(&self) -> &Path {
        &self.artifact_dir
    }

    /// Serialized task handed to the runner
    pub fn task_file(&self) -> &Path {
        &self.task_file
    }

    pub fn enable_chroot(&self) -> bool {
        self.enable_chroot
    }

    /// Whether the runner is asked to setuid to the task role
    pub fn is_privileged(&self) -> bool {
        self.mode.is_privileged()
    }

    /// Prepare the sandbox. Any failure is fatal for this attempt.
    pub fn initialize(&mut self) -> Result<()> {
        info!(
            "Creating {} sandbox for {} at {}",
            self.sandbox.kind(),
            self.task_id,
            self.sandbox.root().display()
        );
        self.sandbox.create(&self.instance).map_err(|e| {
            error!("Could not construct sandbox for {}: {}", self.task_id, e);
            SupervisorError::configuration_with("Could not construct sandbox", e)
        })?;
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    /// `initialize` succeeded on this instance and the sandbox is still there
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire) && self.sandbox.exists()
    }

    /// Fork the runner. Only one launch is ever attempted per instance.
    pub fn start(&self) -> Result<()> {
        if !self.is_initialized() {
            return Err(SupervisorError::IllegalState(
                "Cannot start task runner before initialization".to_string(),
            ));
        }
        if self
            .launched
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SupervisorError::IllegalState(format!(
                "Runner for {} has already been launched",
                self.task_id
            )));
        }

        ensure_executable(&self.runner).map_err(SupervisorError::Launch)?;
        self.monitor
            .get_or_init(|| self.monitor_factory.bind(&self.checkpoint_root, &self.task_id));

        let command = RunnerInvocation {
            runner: &self.runner,
            log_dir: &self.config.log_dir,
            log_level: &self.config.log_level,
            checkpoint_root: &self.checkpoint_root,
            sandbox: self.sandbox.root(),
            task_id: &self.task_id,
            task_file: &self.task_file,
            setuid: self.mode.is_privileged().then_some(self.role.as_str()),
            enable_chroot: self.enable_chroot,
            ports: &self.ports,
        }
        .command();

        info!("Forking off runner with cmdline: {}", command);
        let pid = self
            .control
            .spawn(&command.program, &command.args)
            .map_err(|e| {
                error!("Failed to fork runner for {}: {}", self.task_id, e);
                SupervisorError::Launch(e)
            })?;

        let _ = self.pid.set(pid);
        let _ = self.started_at.set(self.clock.now());
        let _ = self.command.set(command);
        info!("Runner for {} started with pid {}", self.task_id, pid);
        Ok(())
    }

    /// Whether `start` produced a process
    pub fn is_started(&self) -> bool {
        self.pid.get().is_some()
    }

    pub fn pid(&self) -> Option<Pid> {
        self.pid.get().copied()
    }

    /// Command line the runner was launched with
    pub fn command(&self) -> Option<&RunnerCommand> {
        self.command.get()
    }

    pub fn started_at(&self) -> Option<SystemTime> {
        self.started_at.get().copied()
    }

    pub fn uptime(&self) -> Option<Duration> {
        let started = self.started_at()?;
        self.clock.now().duration_since(started).ok()
    }

    /// How the runner ended, once a reap has observed it
    pub fn exit_status(&self) -> Option<RunnerExit> {
        self.exit.get().copied()
    }

    /// Non-blocking liveness check.
    ///
    /// Once the runner is seen dead the answer is cached and no further reap
    /// is attempted.
    pub fn is_alive(&self) -> Result<bool> {
        let Some(pid) = self.pid() else {
            return Ok(false);
        };
        if self.dead.load(Ordering::Acquire) {
            return Ok(false);
        }

        let _guard = self
            .reap_lock
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        if self.dead.load(Ordering::Acquire) {
            return Ok(false);
        }

        match self.control.try_reap(pid).map_err(SupervisorError::Reap)? {
            ReapStatus::Alive => Ok(true),
            ReapStatus::Exited(exit) => {
                let _ = self.exit.set(exit);
                self.mark_dead(pid);
                Ok(false)
            }
            ReapStatus::NoSuchChild => {
                self.mark_dead(pid);
                Ok(false)
            }
        }
    }

    fn mark_dead(&self, pid: Pid) {
        if self
            .dead
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            match self.exit_status() {
                Some(exit) => info!("Runner {} for {} exited: {}", pid, self.task_id, exit),
                None => info!("Runner {} for {} is gone", pid, self.task_id),
            }
        }
    }

    /// Latest checkpointed state, once the runner has been started
    pub fn state(&self) -> Option<RunnerState> {
        self.monitor.get().and_then(|monitor| monitor.get_state())
    }

    pub fn task_state(&self) -> Option<TaskState> {
        self.monitor.get().and_then(|monitor| monitor.task_state())
    }

    /// Ask the runner to stop gracefully with SIGINT.
    ///
    /// Only the first call has any effect.
    pub fn kill(&self) -> Result<()> {
        if self
            .kill_requested
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("Duplicate kill signal received, ignoring.");
            return Ok(());
        }

        match self.pid() {
            Some(pid) if self.is_alive()? => {
                info!("Runner is alive, sending SIGINT");
                if let Err(e) = self.control.signal(pid, Signal::SIGINT) {
                    error!("Failed to send SIGINT to runner {}: {}", pid, e);
                }
            }
            _ => info!("Runner is dead, skipping kill."),
        }
        Ok(())
    }

    pub fn is_kill_requested(&self) -> bool {
        self.kill_requested.load(Ordering::Acquire)
    }

    /// SIGKILL every process the checkpoint stream attributes to this task.
    ///
    /// Resolution goes through a freshly bound monitor, not the in-memory
    /// process handle, so it also works when the handle is stale. Returns the
    /// number of processes signalled.
    pub fn quitquitquit(&self) -> usize {
        let monitor = self.monitor_factory.bind(&self.checkpoint_root, &self.task_id);
        force_kill(monitor.as_ref(), self.control.as_ref())
    }

    /// Hook invoked once termination has been observed
    pub fn cleanup(&self) {
        if self
            .cleaned_up
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            info!("Cleaning up after runner for {}", self.task_id);
        } else {
            debug!("Cleanup for {} already ran", self.task_id);
        }
    }
}

/// Force-kill a task's processes from another process, using only its
/// checkpoint data.
pub fn quitquitquit(task_id: &str, checkpoint_root: impl AsRef<Path>) -> usize {
    let monitor = CheckpointMonitorFactory.bind(checkpoint_root.as_ref(), task_id);
    force_kill(monitor.as_ref(), &NixProcessControl)
}

fn force_kill(monitor: &dyn StateMonitor, control: &dyn ProcessControl) -> usize {
    let tree = match monitor.process_tree() {
        Ok(tree) => tree,
        Err(e) => {
            error!("Could not quitquitquit runner for {}: {}", monitor.task_id(), e);
            return 0;
        }
    };
    if tree.is_empty() {
        info!("No live processes recorded for {}", monitor.task_id());
        return 0;
    }

    info!(
        "quitquitquit {}: killing {} process(es)",
        monitor.task_id(),
        tree.pids().len()
    );
    let mut killed = 0;
    for pid in tree.pids() {
        match control.signal(pid, Signal::SIGKILL) {
            Ok(()) => killed += 1,
            Err(Errno::ESRCH) => debug!("Process {} already exited", pid),
            Err(e) => error!("Failed to SIGKILL {}: {}", pid, e),
        }
    }
    killed
}

fn ensure_executable(path: &Path) -> io::Result<()> {
    let mut permissions = fs::metadata(path)?.permissions();
    let mode = permissions.mode();
    if mode & 0o111 != 0o111 {
        permissions.set_mode(mode | 0o111);
        fs::set_permissions(path, permissions)?;
    }
    Ok(())
}

/// Builder for [`TaskRunner`]
pub struct TaskRunnerBuilder {
    task_id: String,
    task: Option<TaskInstance>,
    role: Option<String>,
    runner: Option<PathBuf>,
    sandbox: Option<Box<dyn Sandbox>>,
    ports: BTreeMap<String, u16>,
    checkpoint_root: Option<PathBuf>,
    artifact_dir: Option<PathBuf>,
    clock: Option<Arc<dyn Clock>>,
    monitor_factory: Option<Arc<dyn MonitorFactory>>,
    control: Option<Arc<dyn ProcessControl>>,
    enable_chroot: bool,
    config: ExecutorConfig,
}

impl TaskRunnerBuilder {
    pub fn new(task_id: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            task: None,
            role: None,
            runner: None,
            sandbox: None,
            ports: BTreeMap::new(),
            checkpoint_root: None,
            artifact_dir: None,
            clock: None,
            monitor_factory: None,
            control: None,
            enable_chroot: false,
            config: ExecutorConfig::default(),
        }
    }

    /// Task assigned by the scheduler; its role is used unless overridden
    pub fn task(mut self, task: TaskInstance) -> Self {
        self.task = Some(task);
        self
    }

    pub fn role(mut self, role: &str) -> Self {
        self.role = Some(role.to_string());
        self
    }

    pub fn runner(mut self, path: impl AsRef<Path>) -> Self {
        self.runner = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn sandbox<S: Sandbox + 'static>(self, sandbox: S) -> Self {
        self.boxed_sandbox(Box::new(sandbox))
    }

    pub fn boxed_sandbox(mut self, sandbox: Box<dyn Sandbox>) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    pub fn port(mut self, name: &str, port: u16) -> Self {
        self.ports.insert(name.to_string(), port);
        self
    }

    pub fn ports<I, K>(mut self, ports: I) -> Self
    where
        I: IntoIterator<Item = (K, u16)>,
        K: Into<String>,
    {
        self.ports
            .extend(ports.into_iter().map(|(name, port)| (name.into(), port)));
        self
    }

    /// Overrides the configured checkpoint root
    pub fn checkpoint_root(mut self, path: impl AsRef<Path>) -> Self {
        self.checkpoint_root = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn artifact_dir(mut self, path: impl AsRef<Path>) -> Self {
        self.artifact_dir = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn monitor_factory(mut self, factory: Arc<dyn MonitorFactory>) -> Self {
        self.monitor_factory = Some(factory);
        self
    }

    pub fn process_control(mut self, control: Arc<dyn ProcessControl>) -> Self {
        self.control = Some(control);
        self
    }

    /// Ask the runner to chroot into the sandbox
    pub fn enable_chroot(mut self, enable: bool) -> Self {
        self.enable_chroot = enable;
        self
    }

    pub fn config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Validate inputs, then write the task file into the artifact directory
    pub fn build(self) -> Result<TaskRunner> {
        let runner = self
            .runner
            .ok_or_else(|| SupervisorError::configuration("No runner specified"))?;
        if !runner.exists() {
            return Err(SupervisorError::configuration(format!(
                "Specified runner does not exist: {}",
                runner.display()
            )));
        }
        if self.task_id.trim().is_empty() {
            return Err(SupervisorError::configuration("Task id cannot be empty"));
        }
        let instance = self
            .task
            .ok_or_else(|| SupervisorError::configuration("No task specified"))?;
        let role = self.role.unwrap_or_else(|| instance.role.clone());
        if role.trim().is_empty() {
            return Err(SupervisorError::configuration("Role cannot be empty"));
        }
        let sandbox = self
            .sandbox
            .ok_or_else(|| SupervisorError::configuration("No sandbox specified"))?;
        self.config.validate()?;
        instance
            .task
            .validate()
            .map_err(|e| SupervisorError::configuration_with("Failed to load task", e))?;

        let (artifact_dir, task_file) =
            stage_task(&instance.task, self.artifact_dir, &std::env::temp_dir())?;
        debug!("Wrote task for {} to {}", self.task_id, task_file.display());

        let checkpoint_root = self
            .checkpoint_root
            .unwrap_or_else(|| self.config.checkpoint_root.clone());
        let mode = self.config.privilege_mode.resolve(&ProcessIdentity::detect());

        Ok(TaskRunner {
            task_id: self.task_id,
            instance,
            role,
            ports: self.ports,
            runner,
            sandbox,
            checkpoint_root,
            artifact_dir,
            task_file,
            enable_chroot: self.enable_chroot,
            config: self.config,
            mode,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            monitor_factory: self
                .monitor_factory
                .unwrap_or_else(|| Arc::new(CheckpointMonitorFactory)),
            control: self.control.unwrap_or_else(|| Arc::new(NixProcessControl)),
            initialized: AtomicBool::new(false),
            launched: AtomicBool::new(false),
            pid: OnceLock::new(),
            command: OnceLock::new(),
            started_at: OnceLock::new(),
            monitor: OnceLock::new(),
            dead: AtomicBool::new(false),
            reap_lock: Mutex::new(()),
            exit: OnceLock::new(),
            kill_requested: AtomicBool::new(false),
            cleaned_up: AtomicBool::new(false),
        })
    }
}

/// Write the task into `artifact_dir`, or into a fresh `thermos-*` dir under
/// `scratch_parent`. A scratch dir is removed again if the write fails.
fn stage_task(
    task: &Task,
    artifact_dir: Option<PathBuf>,
    scratch_parent: &Path,
) -> Result<(PathBuf, PathBuf)> {
    let (dir, scratch) = match artifact_dir {
        Some(dir) => {
            fs::create_dir_all(&dir).map_err(|e| {
                SupervisorError::configuration_with(
                    format!("Could not create artifact dir {}", dir.display()),
                    e,
                )
            })?;
            (dir, None)
        }
        None => {
            let scratch = tempfile::Builder::new()
                .prefix("thermos-")
                .tempdir_in(scratch_parent)
                .map_err(|e| {
                    SupervisorError::configuration_with("Could not create artifact dir", e)
                })?;
            (scratch.path().to_path_buf(), Some(scratch))
        }
    };

    let task_file = dir.join(TASK_FILE_NAME);
    task.to_file(&task_file)
        .map_err(|e| SupervisorError::configuration_with("Failed to write task", e))?;
    if let Some(scratch) = scratch {
        let _ = scratch.keep();
    }
    Ok((dir, task_file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tempfile::{TempDir, tempdir};
    use thermos_core::{ManualClock, PrivilegeMode, Process, Task};
    use thermos_monitor::{CheckpointMonitor, ProcessState, ProcessStatus, RunnerCkpt, TaskStatus};
    use thermos_sandbox::DirectorySandbox;

    const FAKE_PID: i32 = 424_242;

    #[derive(Default)]
    struct FakeControl {
        spawned: Mutex<Vec<Vec<String>>>,
        reaps: AtomicUsize,
        signals: Mutex<Vec<(Pid, Signal)>>,
        exited: AtomicBool,
        fail_spawn: bool,
        fail_signal: bool,
    }

    impl FakeControl {
        fn exit(&self) {
            self.exited.store(true, Ordering::SeqCst);
        }

        fn reaps(&self) -> usize {
            self.reaps.load(Ordering::SeqCst)
        }

        fn signals(&self) -> Vec<(Pid, Signal)> {
            self.signals.lock().unwrap().clone()
        }

        fn spawned(&self) -> Vec<Vec<String>> {
            self.spawned.lock().unwrap().clone()
        }
    }

    impl ProcessControl for FakeControl {
        fn spawn(&self, _program: &Path, args: &[String]) -> io::Result<Pid> {
            if self.fail_spawn {
                return Err(io::Error::from(io::ErrorKind::PermissionDenied));
            }
            self.spawned.lock().unwrap().push(args.to_vec());
            Ok(Pid::from_raw(FAKE_PID))
        }

        fn try_reap(&self, _pid: Pid) -> nix::Result<ReapStatus> {
            self.reaps.fetch_add(1, Ordering::SeqCst);
            if self.exited.load(Ordering::SeqCst) {
                Ok(ReapStatus::Exited(RunnerExit::Code(0)))
            } else {
                Ok(ReapStatus::Alive)
            }
        }

        fn signal(&self, pid: Pid, signal: Signal) -> nix::Result<()> {
            self.signals.lock().unwrap().push((pid, signal));
            if self.fail_signal {
                Err(Errno::EPERM)
            } else {
                Ok(())
            }
        }
    }

    struct Fixture {
        dir: TempDir,
        runner: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempdir().unwrap();
            let runner = dir.path().join("thermos_runner");
            fs::write(&runner, "#!/bin/sh\n").unwrap();
            Self { dir, runner }
        }

        fn path(&self, name: &str) -> PathBuf {
            self.dir.path().join(name)
        }

        fn builder(&self, control: Arc<dyn ProcessControl>) -> TaskRunnerBuilder {
            TaskRunner::builder("task-1")
                .task(instance())
                .runner(&self.runner)
                .sandbox(
                    DirectorySandbox::new("task-1", self.path("sandbox"))
                        .privilege_mode(PrivilegeMode::Unprivileged),
                )
                .checkpoint_root(self.path("checkpoints"))
                .artifact_dir(self.path("artifacts"))
                .process_control(control)
                .config(ExecutorConfig::default().privilege_mode(PrivilegeMode::Unprivileged))
        }
    }

    fn instance() -> TaskInstance {
        TaskInstance::new(
            Task::new("hello", vec![Process::new("hello", "echo hello")]),
            "www-data",
        )
    }

    fn started(fixture: &Fixture, control: Arc<FakeControl>) -> TaskRunner {
        let mut runner = fixture.builder(control).build().unwrap();
        runner.initialize().unwrap();
        runner.start().unwrap();
        runner
    }

    #[test]
    fn build_writes_task_file() {
        let fixture = Fixture::new();
        let runner = fixture
            .builder(Arc::new(FakeControl::default()))
            .build()
            .unwrap();
        assert_eq!(runner.task_file(), fixture.path("artifacts").join("task.json"));
        assert_eq!(Task::from_file(runner.task_file()).unwrap(), instance().task);
        assert_eq!(runner.role(), "www-data");
        assert!(!runner.is_started());
        assert!(!runner.is_alive().unwrap());
        assert!(runner.state().is_none());
    }

    #[test]
    fn missing_runner_is_configuration_error_without_side_effects() {
        let fixture = Fixture::new();
        let control = Arc::new(FakeControl::default());
        let err = fixture
            .builder(control.clone())
            .runner(fixture.path("missing_runner"))
            .build()
            .err()
            .unwrap();
        assert!(err.is_configuration());
        assert!(!fixture.path("artifacts").exists());
        assert!(control.spawned().is_empty());
    }

    #[test]
    fn invalid_task_is_configuration_error() {
        let fixture = Fixture::new();
        let task = TaskInstance::new(Task::new("empty", Vec::new()), "www-data");
        let err = fixture
            .builder(Arc::new(FakeControl::default()))
            .task(task)
            .build()
            .err()
            .unwrap();
        assert!(err.is_configuration());
        assert!(!fixture.path("artifacts").join(TASK_FILE_NAME).exists());
    }

    #[test]
    fn empty_role_is_rejected() {
        let fixture = Fixture::new();
        let err = fixture
            .builder(Arc::new(FakeControl::default()))
            .role(" ")
            .build()
            .err()
            .unwrap();
        assert!(err.is_configuration());
    }

    #[test]
    fn default_artifact_dir_is_fresh_scratch_dir() {
        let fixture = Fixture::new();
        let runner = TaskRunner::builder("task-2")
            .task(instance())
            .runner(&fixture.runner)
            .sandbox(DirectorySandbox::new("task-2", fixture.path("sandbox")))
            .build()
            .unwrap();
        let name = runner.artifact_dir().file_name().unwrap().to_string_lossy();
        assert!(name.starts_with("thermos-"));
        assert!(runner.task_file().exists());
        assert_eq!(
            runner.checkpoint_root(),
            Path::new(crate::config::DEFAULT_CHECKPOINT_ROOT)
        );
        fs::remove_dir_all(runner.artifact_dir()).unwrap();
    }

    #[test]
    fn start_before_initialize_is_illegal() {
        let fixture = Fixture::new();
        let control = Arc::new(FakeControl::default());
        let runner = fixture.builder(control.clone()).build().unwrap();
        let err = runner.start().unwrap_err();
        assert!(err.is_illegal_state());
        assert!(control.spawned().is_empty());
        assert!(!runner.is_started());
    }

    #[test]
    fn leftover_sandbox_does_not_count_as_initialized() {
        let fixture = Fixture::new();
        fs::create_dir_all(fixture.path("sandbox").join("task-1")).unwrap();
        let control = Arc::new(FakeControl::default());
        let runner = fixture.builder(control.clone()).build().unwrap();

        assert!(runner.sandbox().exists());
        assert!(!runner.is_initialized());
        assert!(runner.start().unwrap_err().is_illegal_state());
        assert!(control.spawned().is_empty());
    }

    #[test]
    fn start_after_failed_initialize_is_illegal() {
        let fixture = Fixture::new();
        let control = Arc::new(FakeControl::default());
        let mut runner = fixture
            .builder(control.clone())
            .task(TaskInstance::new(
                Task::new("hello", vec![Process::new("hello", "echo hello")]),
                "no-such-role-anywhere",
            ))
            .sandbox(
                DirectorySandbox::new("task-1", fixture.path("sandbox"))
                    .privilege_mode(PrivilegeMode::Privileged),
            )
            .build()
            .unwrap();

        assert!(runner.initialize().unwrap_err().is_configuration());
        assert!(runner.start().unwrap_err().is_illegal_state());
        assert!(control.spawned().is_empty());
    }

    #[test]
    fn sandbox_failure_is_configuration_error() {
        let fixture = Fixture::new();
        let blocker = fixture.path("blocker");
        fs::write(&blocker, b"file").unwrap();

        let mut runner = fixture
            .builder(Arc::new(FakeControl::default()))
            .sandbox(
                DirectorySandbox::new("task-1", &blocker)
                    .privilege_mode(PrivilegeMode::Unprivileged),
            )
            .build()
            .unwrap();
        let err = runner.initialize().unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("Could not construct sandbox"));
        assert!(!runner.is_initialized());
    }

    #[test]
    fn start_launches_once_with_single_port_flag() {
        let fixture = Fixture::new();
        let control = Arc::new(FakeControl::default());
        let mut runner = fixture
            .builder(control.clone())
            .port("http", 8080)
            .build()
            .unwrap();
        runner.initialize().unwrap();
        runner.start().unwrap();

        let spawned = control.spawned();
        assert_eq!(spawned.len(), 1);
        let ports: Vec<&String> = spawned[0]
            .iter()
            .filter(|a| a.starts_with("--port="))
            .collect();
        assert_eq!(ports, vec!["--port=http:8080"]);
        assert_eq!(runner.pid(), Some(Pid::from_raw(FAKE_PID)));
        assert!(runner.is_started());

        let mode = fs::metadata(&fixture.runner).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);

        let err = runner.start().unwrap_err();
        assert!(err.is_illegal_state());
        assert_eq!(control.spawned().len(), 1);
    }

    #[test]
    fn setuid_only_when_privileged() {
        let fixture = Fixture::new();
        let runner = started(&fixture, Arc::new(FakeControl::default()));
        let command = runner.command().unwrap();
        assert!(command.flag_value("setuid").is_none());
        assert!(!command.has_arg("--enable_chroot"));

        let fixture = Fixture::new();
        let mut runner = fixture
            .builder(Arc::new(FakeControl::default()))
            .config(ExecutorConfig::default().privilege_mode(PrivilegeMode::Privileged))
            .enable_chroot(true)
            .build()
            .unwrap();
        runner.initialize().unwrap();
        runner.start().unwrap();
        let command = runner.command().unwrap();
        assert_eq!(command.flag_value("setuid"), Some("www-data"));
        assert!(command.has_arg("--enable_chroot"));
        assert!(runner.is_privileged());
    }

    #[test]
    fn failed_spawn_is_launch_error_and_not_retried() {
        let fixture = Fixture::new();
        let control = Arc::new(FakeControl {
            fail_spawn: true,
            ..FakeControl::default()
        });
        let mut runner = fixture.builder(control).build().unwrap();
        runner.initialize().unwrap();
        assert!(runner.start().unwrap_err().is_launch());
        assert!(!runner.is_started());
        assert!(runner.start().unwrap_err().is_illegal_state());
    }

    #[test]
    fn exit_is_observed_once_without_second_reap() {
        let fixture = Fixture::new();
        let control = Arc::new(FakeControl::default());
        let runner = started(&fixture, control.clone());

        assert!(runner.is_alive().unwrap());
        control.exit();
        assert!(!runner.is_alive().unwrap());
        assert_eq!(runner.exit_status(), Some(RunnerExit::Code(0)));
        let reaps = control.reaps();

        assert!(!runner.is_alive().unwrap());
        assert!(!runner.is_alive().unwrap());
        assert_eq!(control.reaps(), reaps);
    }

    #[test]
    fn kill_twice_sends_one_signal() {
        let fixture = Fixture::new();
        let control = Arc::new(FakeControl::default());
        let runner = started(&fixture, control.clone());

        runner.kill().unwrap();
        runner.kill().unwrap();
        assert!(runner.is_kill_requested());
        assert_eq!(
            control.signals(),
            vec![(Pid::from_raw(FAKE_PID), Signal::SIGINT)]
        );
    }

    #[test]
    fn kill_after_exit_sends_nothing() {
        let fixture = Fixture::new();
        let control = Arc::new(FakeControl::default());
        let runner = started(&fixture, control.clone());
        control.exit();

        runner.kill().unwrap();
        assert!(control.signals().is_empty());
    }

    #[test]
    fn signal_delivery_failure_is_swallowed() {
        let fixture = Fixture::new();
        let control = Arc::new(FakeControl {
            fail_signal: true,
            ..FakeControl::default()
        });
        let runner = started(&fixture, control.clone());
        runner.kill().unwrap();
        assert_eq!(control.signals().len(), 1);
    }

    #[test]
    fn uptime_follows_injected_clock() {
        let fixture = Fixture::new();
        let clock = Arc::new(ManualClock::default());
        let mut runner = fixture
            .builder(Arc::new(FakeControl::default()))
            .clock(clock.clone())
            .build()
            .unwrap();
        assert!(runner.uptime().is_none());
        runner.initialize().unwrap();
        runner.start().unwrap();

        clock.advance(Duration::from_secs(90));
        assert_eq!(runner.started_at(), Some(SystemTime::UNIX_EPOCH));
        assert_eq!(runner.uptime(), Some(Duration::from_secs(90)));
    }

    fn write_checkpoint(root: &Path, task_id: &str, records: &[RunnerCkpt]) {
        let path = CheckpointMonitor::checkpoint_path(root, task_id);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let body: String = records
            .iter()
            .map(|r| format!("{}\n", serde_json::to_string(r).unwrap()))
            .collect();
        fs::write(path, body).unwrap();
    }

    #[test]
    fn state_comes_from_checkpoint_after_start() {
        let fixture = Fixture::new();
        let runner = started(&fixture, Arc::new(FakeControl::default()));
        assert!(runner.task_state().is_none());

        write_checkpoint(
            runner.checkpoint_root(),
            "task-1",
            &[RunnerCkpt::TaskStatus(TaskStatus {
                state: TaskState::Active,
                timestamp_ms: 1,
                runner_pid: Some(FAKE_PID),
                runner_uid: None,
            })],
        );
        assert_eq!(runner.task_state(), Some(TaskState::Active));
        assert!(runner.state().unwrap().header.is_none());
    }

    #[test]
    fn quitquitquit_kills_tree_from_checkpoint() {
        let fixture = Fixture::new();
        let control = Arc::new(FakeControl::default());
        let runner = started(&fixture, control.clone());
        write_checkpoint(
            runner.checkpoint_root(),
            "task-1",
            &[
                RunnerCkpt::TaskStatus(TaskStatus {
                    state: TaskState::Active,
                    timestamp_ms: 1,
                    runner_pid: Some(999_990),
                    runner_uid: None,
                }),
                RunnerCkpt::ProcessStatus(ProcessStatus {
                    process: "hello".to_string(),
                    seq: 1,
                    state: ProcessState::Running,
                    pid: Some(999_992),
                    coordinator_pid: Some(999_991),
                    return_code: None,
                    start_time_ms: Some(1),
                    stop_time_ms: None,
                }),
            ],
        );

        assert_eq!(runner.quitquitquit(), 3);
        let killed: Vec<Pid> = control
            .signals()
            .into_iter()
            .filter(|(_, signal)| *signal == Signal::SIGKILL)
            .map(|(pid, _)| pid)
            .collect();
        assert_eq!(killed[0], Pid::from_raw(999_990));
        assert_eq!(killed.len(), 3);
    }

    #[test]
    fn quitquitquit_without_checkpoint_is_logged_not_raised() {
        let fixture = Fixture::new();
        let control = Arc::new(FakeControl::default());
        let runner = started(&fixture, control.clone());
        assert_eq!(runner.quitquitquit(), 0);
        assert!(control.signals().is_empty());

        assert_eq!(quitquitquit("nobody-home", fixture.path("checkpoints")), 0);
    }

    #[test]
    fn cleanup_is_idempotent() {
        let fixture = Fixture::new();
        let runner = fixture
            .builder(Arc::new(FakeControl::default()))
            .build()
            .unwrap();
        runner.cleanup();
        runner.cleanup();
    }

    #[test]
    fn runner_is_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TaskRunner>();
    }

    #[test]
    fn concurrent_kill_and_poll_signal_and_reap_once() {
        let fixture = Fixture::new();
        let control = Arc::new(FakeControl::default());
        let runner = Arc::new(started(&fixture, control.clone()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let runner = Arc::clone(&runner);
                std::thread::spawn(move || {
                    runner.is_alive().unwrap();
                    runner.kill().unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(
            control.signals(),
            vec![(Pid::from_raw(FAKE_PID), Signal::SIGINT)]
        );

        control.exit();
        let before = control.reaps();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let runner = Arc::clone(&runner);
                std::thread::spawn(move || {
                    assert!(!runner.is_alive().unwrap());
                    runner.kill().unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(control.reaps(), before + 1);
        assert_eq!(control.signals().len(), 1);
        assert_eq!(runner.exit_status(), Some(RunnerExit::Code(0)));
    }

    #[test]
    fn failed_task_write_removes_scratch_dir() {
        let parent = tempdir().unwrap();
        let task = Task::new("empty", Vec::new());

        let err = stage_task(&task, None, parent.path()).unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(fs::read_dir(parent.path()).unwrap().count(), 0);
    }

    #[test]
    fn staged_scratch_dir_outlives_the_builder() {
        let parent = tempdir().unwrap();
        let (dir, task_file) = stage_task(&instance().task, None, parent.path()).unwrap();
        assert!(dir.starts_with(parent.path()));
        assert_eq!(task_file, dir.join(TASK_FILE_NAME));
        assert_eq!(Task::from_file(&task_file).unwrap(), instance().task);
    }
}
