//! Subprocess execution
//!
//! Commands are configured as argument vectors with `{placeholder}`
//! substitution. Short-lived commands are run to completion with captured
//! output; long-running servers are wrapped in [`ManagedProcess`], which
//! owns its own process group so the whole tree can be signalled.

use crate::error::{ShipcheckError, ShipcheckResult};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

#[cfg(unix)]
use nix::sys::signal::{kill, killpg, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

/// Max number of output lines kept in error messages.
const ERROR_TAIL_LINES: usize = 50;

/// Keep the last `ERROR_TAIL_LINES` lines of combined stdout and stderr.
pub fn output_tail(stdout: &str, stderr: &str) -> String {
    let lines: Vec<&str> = stdout.lines().chain(stderr.lines()).collect();
    let start = lines.len().saturating_sub(ERROR_TAIL_LINES);
    lines[start..].join("\n")
}

/// A command line with placeholders, e.g. `["yarn", "dev", "--port", "{port}"]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    /// Values masked in `display()`
    secrets: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            cwd: None,
            env: Vec::new(),
            secrets: Vec::new(),
        }
    }

    /// Build a command from a configured argument vector
    pub fn from_argv(argv: &[String]) -> ShipcheckResult<Self> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| ShipcheckError::User("empty command".to_string()))?;
        Ok(Self::new(program.clone(), args.to_vec()))
    }

    /// Substitute `{key}` placeholders in the program and arguments
    pub fn render(mut self, vars: &HashMap<&str, String>) -> Self {
        self.program = substitute(&self.program, vars);
        self.args = self.args.iter().map(|a| substitute(a, vars)).collect();
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Mask `value` wherever it appears in logs and errors
    pub fn redact(mut self, value: &str) -> Self {
        if !value.is_empty() {
            self.secrets.push(value.to_string());
        }
        self
    }

    /// Human-readable command line for logs and errors
    pub fn display(&self) -> String {
        let line = std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");
        self.secrets
            .iter()
            .fold(line, |line, secret| line.replace(secret.as_str(), "***"))
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(ref cwd) = self.cwd {
            cmd.current_dir(cwd);
        }
        for (k, v) in &self.env {
            cmd.env(k, v);
        }
        cmd
    }

    /// Run to completion with stdout and stderr captured
    pub async fn output(&self) -> ShipcheckResult<CommandOutput> {
        debug!("Executing: {}", self.display());

        let output = self
            .command()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ShipcheckError::command_failed(self.display(), e))?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Run to completion with output streamed to the terminal
    pub async fn status(&self) -> ShipcheckResult<Option<i32>> {
        debug!("Executing interactively: {}", self.display());

        let status = self
            .command()
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| ShipcheckError::command_failed(self.display(), e))?;

        Ok(status.code())
    }

    /// Synchronous variant of [`CommandSpec::output`] for use in `Drop`
    pub fn output_blocking(&self) -> ShipcheckResult<CommandOutput> {
        let mut cmd = std::process::Command::new(&self.program);
        cmd.args(&self.args).stdin(Stdio::null());
        if let Some(ref cwd) = self.cwd {
            cmd.current_dir(cwd);
        }
        for (k, v) in &self.env {
            cmd.env(k, v);
        }
        let output = cmd
            .output()
            .map_err(|e| ShipcheckError::command_failed(self.display(), e))?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Spawn as a long-running process in its own process group
    pub fn spawn(&self, label: &str, quiet: bool) -> ShipcheckResult<ManagedProcess> {
        debug!("Spawning {}: {}", label, self.display());

        let mut cmd = self.command();
        cmd.stdin(Stdio::null()).kill_on_drop(true);
        if quiet {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        } else {
            cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        }
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd
            .spawn()
            .map_err(|e| ShipcheckError::command_failed(self.display(), e))?;

        Ok(ManagedProcess {
            label: label.to_string(),
            pid: child.id(),
            child: Some(child),
        })
    }
}

fn substitute(template: &str, vars: &HashMap<&str, String>) -> String {
    let mut out = template.to_string();
    for (key, value) in vars {
        out = out.replace(&format!("{{{key}}}"), value);
    }
    out
}

/// Captured result of a finished command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code; `None` when terminated by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Tail of the combined output for error reports
    pub fn tail(&self) -> String {
        output_tail(&self.stdout, &self.stderr)
    }
}

/// A long-running child process (registry, dev server).
///
/// Dropping a `ManagedProcess` that was not terminated kills its process
/// group.
#[derive(Debug)]
pub struct ManagedProcess {
    label: String,
    pid: Option<u32>,
    child: Option<Child>,
}

impl ManagedProcess {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Whether the child has exited; `Some(code)` once it has
    pub fn try_exit_code(&mut self) -> Option<Option<i32>> {
        let child = self.child.as_mut()?;
        match child.try_wait() {
            Ok(Some(status)) => Some(status.code()),
            _ => None,
        }
    }

    /// Graceful shutdown: SIGTERM to the group, then SIGKILL after `grace`
    pub async fn terminate(mut self, grace: Duration) -> ShipcheckResult<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        #[cfg(unix)]
        {
            if let Some(pid) = self.pid {
                debug!("Sending SIGTERM to {} (pgid {})", self.label, pid);
                signal_group(pid, Signal::SIGTERM);
            }
        }

        #[cfg(not(unix))]
        {
            let _ = child.start_kill();
        }

        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                debug!("{} exited with {:?}", self.label, status);
            }
            Ok(Err(e)) => {
                warn!("Error waiting for {}: {}", self.label, e);
            }
            Err(_) => {
                warn!("{} did not stop gracefully, force killing", self.label);
                #[cfg(unix)]
                {
                    if let Some(pid) = self.pid {
                        signal_group(pid, Signal::SIGKILL);
                    }
                }
                child
                    .kill()
                    .await
                    .map_err(|e| ShipcheckError::io(format!("killing {}", self.label), e))?;
            }
        }

        // Stragglers that ignored SIGTERM but left the leader
        #[cfg(unix)]
        {
            if let Some(pid) = self.pid {
                signal_group(pid, Signal::SIGKILL);
            }
        }

        Ok(())
    }
}

impl Drop for ManagedProcess {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            #[cfg(unix)]
            {
                if let Some(pid) = self.pid {
                    signal_group(pid, Signal::SIGKILL);
                }
            }
            let _ = child.start_kill();
        }
    }
}

/// Send `signal` to the process group led by `pid`
#[cfg(unix)]
fn signal_group(pid: u32, signal: Signal) {
    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    if let Err(e) = killpg(Pid::from_raw(raw), signal) {
        debug!("{:?} to process group {} failed: {}", signal, pid, e);
    }
}

/// Whether a process with this pid still exists
#[cfg(unix)]
pub fn pid_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    kill(Pid::from_raw(raw), None).is_ok()
}
