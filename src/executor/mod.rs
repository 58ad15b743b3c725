//! Root-command execution environment
//!
//! Spawns the root command with the interception environment applied
//! (wrapper directory first on PATH, socket path exported) and owns
//! process-group termination for session aborts.

use anyhow::{Context, Result};
use log::warn;
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::process::Command;

use crate::constants::{
    DEFAULT_PATH_FALLBACK, SIGKILL_GRACE_PERIOD, SIGTERM_GRACE_PERIOD, SOCKET_ENV_VAR,
    VERBOSE_ENV_VAR,
};

/// Failure modes of a supervised execution
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    /// The root command ran to completion with a non-zero status
    #[error("execution exited with code {code}")]
    ExitStatus { code: i32 },
    /// A policy demanded termination and the process group was killed
    #[error("execution terminated by request")]
    TerminatedByRequest,
    /// The process group survived SIGKILL past the grace period
    #[error("process group {pgid} failed to terminate after SIGKILL")]
    TerminationTimeout { pgid: i32 },
}

/// Manages one root-command execution with command interception
pub struct Executor {
    command: Vec<String>,
    socket_path: PathBuf,
    wrapper_dir: Option<PathBuf>,
    verbose: bool,
    /// Pid of the running child; read by both the waiting task and
    /// the abort task, cleared once the child is reaped
    child_pid: Arc<Mutex<Option<u32>>>,
}

impl Executor {
    pub fn new(command: Vec<String>, socket_path: PathBuf) -> Self {
        Self {
            command,
            socket_path,
            wrapper_dir: None,
            verbose: false,
            child_pid: Arc::new(Mutex::new(None)),
        }
    }

    /// Set the directory containing the wrapper scripts
    pub fn set_wrapper_dir(&mut self, dir: PathBuf) {
        self.wrapper_dir = Some(dir);
    }

    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    /// Run the root command to completion in the interception
    /// environment. The child leads a new process group so an abort
    /// can signal every descendant at once.
    pub async fn execute(&self) -> Result<()> {
        let wrapper_dir = self.wrapper_dir.as_ref().context("wrapper directory not set")?;
        if self.command.is_empty() {
            anyhow::bail!("no command specified");
        }

        let mut command = Command::new(&self.command[0]);
        command.args(&self.command[1..]);
        command.env("PATH", prepend_wrapper_dir(wrapper_dir));
        command.env(SOCKET_ENV_VAR, &self.socket_path);
        if self.verbose {
            command.env(VERBOSE_ENV_VAR, "true");
        }
        command.process_group(0);

        let mut child = command
            .spawn()
            .with_context(|| format!("failed to execute {}", self.command[0]))?;
        self.store_child_pid(child.id());

        let status = child.wait().await;
        self.store_child_pid(None);

        let status = status.context("failed to await root command")?;
        if status.success() {
            return Ok(());
        }

        let code = status.code().unwrap_or_else(|| {
            use std::os::unix::process::ExitStatusExt;
            status.signal().map_or(1, |signal| 128 + signal)
        });
        Err(ExecutionError::ExitStatus { code }.into())
    }

    /// Terminate the root command's process group: SIGTERM first, then
    /// SIGKILL after the grace period. A no-op when nothing is running.
    pub async fn kill_process_tree(&self) -> Result<()> {
        let Some(pid) = self.child_pid() else {
            return Ok(());
        };
        let pgid = Pid::from_raw(pid as i32);

        if let Err(err) = killpg(pgid, Signal::SIGTERM) {
            // Group signalling failed; fall back to the child alone
            if self.verbose {
                warn!("SIGTERM to process group {pid} failed: {err}");
            }
            return kill(pgid, Signal::SIGKILL)
                .with_context(|| format!("failed to kill process {pid}"));
        }

        if self.wait_for_reap(SIGTERM_GRACE_PERIOD).await {
            return Ok(());
        }

        let _ = killpg(pgid, Signal::SIGKILL);
        if self.wait_for_reap(SIGKILL_GRACE_PERIOD).await {
            return Ok(());
        }
        Err(ExecutionError::TerminationTimeout { pgid: pid as i32 }.into())
    }

    /// Whether the root command is currently running
    pub fn is_running(&self) -> bool {
        self.child_pid()
            .is_some_and(|pid| kill(Pid::from_raw(pid as i32), None).is_ok())
    }

    /// Wait until the execute task has reaped the child, up to `grace`
    async fn wait_for_reap(&self, grace: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + grace;
        while tokio::time::Instant::now() < deadline {
            if self.child_pid().is_none() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        self.child_pid().is_none()
    }

    fn child_pid(&self) -> Option<u32> {
        *self.child_pid.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn store_child_pid(&self, pid: Option<u32>) {
        *self.child_pid.lock().unwrap_or_else(PoisonError::into_inner) = pid;
    }
}

/// Prefix PATH with the wrapper directory so monitored commands
/// resolve to their wrappers inside the child's process tree
fn prepend_wrapper_dir(wrapper_dir: &Path) -> String {
    match std::env::var("PATH") {
        Ok(path) if !path.is_empty() => format!("{}:{}", wrapper_dir.display(), path),
        _ => format!("{}:{}", wrapper_dir.display(), DEFAULT_PATH_FALLBACK),
    }
}
