//! Forking, reaping and signalling the runner process

use std::fmt;
use std::io;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Command, Stdio};

use log::debug;
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;

/// How the runner process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerExit {
    /// Exited normally with this status code
    Code(i32),
    /// Terminated by this signal
    Signaled(Signal),
}

impl RunnerExit {
    pub fn success(&self) -> bool {
        matches!(self, RunnerExit::Code(0))
    }
}

impl fmt::Display for RunnerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunnerExit::Code(code) => write!(f, "exit code {}", code),
            RunnerExit::Signaled(signal) => write!(f, "killed by {}", signal),
        }
    }
}

/// Outcome of a non-blocking reap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReapStatus {
    /// Child has not exited (stopped and continued children count as alive)
    Alive,
    /// Child exited and has now been collected
    Exited(RunnerExit),
    /// No such child; it was already collected elsewhere
    NoSuchChild,
}

/// OS operations the supervisor performs on the runner.
///
/// Implementations must only ever wait on the specific pid they are given.
pub trait ProcessControl: Send + Sync {
    /// Fork `program` with `args` as a detached child and return its pid
    fn spawn(&self, program: &Path, args: &[String]) -> io::Result<Pid>;

    /// Non-blocking reap of `pid`
    fn try_reap(&self, pid: Pid) -> nix::Result<ReapStatus>;

    fn signal(&self, pid: Pid, signal: Signal) -> nix::Result<()>;
}

/// [`ProcessControl`] backed by fork/exec, `waitpid(WNOHANG)` and `kill(2)`
#[derive(Debug, Clone, Copy, Default)]
pub struct NixProcessControl;

impl ProcessControl for NixProcessControl {
    fn spawn(&self, program: &Path, args: &[String]) -> io::Result<Pid> {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .process_group(0)
            .spawn()?;
        let pid = Pid::from_raw(child.id() as i32);
        debug!("Forked {} as pid {}", program.display(), pid);
        // The handle is dropped without waiting; the child is reaped by pid.
        drop(child);
        Ok(pid)
    }

    fn try_reap(&self, pid: Pid) -> nix::Result<ReapStatus> {
        match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(_, code)) => Ok(ReapStatus::Exited(RunnerExit::Code(code))),
            Ok(WaitStatus::Signaled(_, signal, _)) => {
                Ok(ReapStatus::Exited(RunnerExit::Signaled(signal)))
            }
            Ok(_) => Ok(ReapStatus::Alive),
            Err(Errno::ECHILD) => Ok(ReapStatus::NoSuchChild),
            Err(e) => Err(e),
        }
    }

    fn signal(&self, pid: Pid, signal: Signal) -> nix::Result<()> {
        kill(pid, signal)
    }
}
