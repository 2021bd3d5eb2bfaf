//! Runner command line assembly

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Inputs to a runner invocation
#[derive(Debug, Clone)]
pub struct RunnerInvocation<'a> {
    pub runner: &'a Path,
    pub log_dir: &'a Path,
    pub log_level: &'a str,
    pub checkpoint_root: &'a Path,
    pub sandbox: &'a Path,
    pub task_id: &'a str,
    pub task_file: &'a Path,
    /// Role to drop to; only set when the executor runs privileged
    pub setuid: Option<&'a str>,
    pub enable_chroot: bool,
    pub ports: &'a BTreeMap<String, u16>,
}

impl RunnerInvocation<'_> {
    pub fn command(&self) -> RunnerCommand {
        let mut args = vec![
            flag("log_dir", self.log_dir.display()),
            flag("log_to_disk", self.log_level),
            flag("checkpoint_root", self.checkpoint_root.display()),
            flag("sandbox", self.sandbox.display()),
            flag("task_id", self.task_id),
            flag("thermos_json", self.task_file.display()),
        ];
        if let Some(role) = self.setuid {
            args.push(flag("setuid", role));
        }
        if self.enable_chroot {
            args.push("--enable_chroot".to_string());
        }
        for (name, port) in self.ports {
            args.push(format!("--port={}:{}", name, port));
        }

        RunnerCommand {
            program: self.runner.to_path_buf(),
            args,
        }
    }
}

fn flag(name: &str, value: impl fmt::Display) -> String {
    format!("--{}={}", name, value)
}

/// Fully assembled runner command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl RunnerCommand {
    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }

    /// Value of `--<name>=<value>`, if present
    pub fn flag_value(&self, name: &str) -> Option<&str> {
        let prefix = format!("--{}=", name);
        self.args.iter().find_map(|a| a.strip_prefix(prefix.as_str()))
    }
}

impl fmt::Display for RunnerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}
