//! Session assembly and root-command supervision
//!
//! The embedding entry point: builds the interception environment
//! (IPC endpoint, wrapper directory, child environment), runs the
//! root command once, and guarantees teardown.

pub(crate) mod wrappers;

use anyhow::{bail, Context, Result};
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use crate::constants::{DEFAULT_EVALUATE_TIMEOUT, SIGTERM_GRACE_PERIOD};
use crate::executor::{ExecutionError, Executor};
use crate::hook::Hook;
use crate::interceptor::Interceptor;
use crate::wrapper;

/// Builder for a [`CmdHooks`] session. A hook is required; everything
/// else has a default.
pub struct CmdHooksBuilder {
    hook: Option<Arc<dyn Hook>>,
    socket_path: Option<PathBuf>,
    wrapper_command: Option<Vec<String>>,
    verbose: bool,
    evaluate_timeout: Option<Duration>,
}

impl CmdHooksBuilder {
    fn new() -> Self {
        Self {
            hook: None,
            socket_path: None,
            wrapper_command: None,
            verbose: false,
            evaluate_timeout: Some(DEFAULT_EVALUATE_TIMEOUT),
        }
    }

    /// Set the policy hook (required)
    pub fn hook(self, hook: impl Hook + 'static) -> Self {
        self.hook_arc(Arc::new(hook))
    }

    /// Set the policy hook from a shared reference
    pub fn hook_arc(mut self, hook: Arc<dyn Hook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Use a fixed IPC endpoint path instead of an auto-generated one
    pub fn socket_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.socket_path = Some(path.into());
        self
    }

    /// Set the command wrapper scripts exec, as binary plus fixed
    /// leading arguments, e.g. `["cmdhooks", "run"]` or
    /// `["/path/to/my-wrapper", "run"]`
    pub fn wrapper_command(mut self, parts: Vec<String>) -> Self {
        self.wrapper_command = Some(parts);
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Bound one remote evaluation inside the interceptor. `None` (or
    /// a zero duration) disables the bound; the default is 10 minutes.
    pub fn evaluate_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.evaluate_timeout = timeout;
        self
    }

    /// Validate the configuration and assemble the session
    pub fn build(self) -> Result<CmdHooks> {
        let hook = self.hook.context("must provide hook")?;

        if let Some(parts) = &self.wrapper_command {
            if parts.is_empty() {
                bail!(
                    "wrapper command cannot be empty; provide binary and subcommand \
                     (e.g. [\"cmdhooks\", \"run\"])"
                );
            }
            for (index, part) in parts.iter().enumerate() {
                if part.trim().is_empty() {
                    bail!("wrapper command element {index} is empty");
                }
            }
        }

        let socket_path = match self.socket_path {
            Some(path) => path,
            None => generate_socket_path()?,
        };

        let mut interceptor = Interceptor::new(&socket_path, self.verbose, Arc::clone(&hook));
        interceptor.set_evaluate_timeout(self.evaluate_timeout);

        Ok(CmdHooks {
            hook: RwLock::new(hook),
            socket_path,
            wrapper_command: self.wrapper_command,
            verbose: self.verbose,
            interceptor,
        })
    }
}

/// Generate a unique private endpoint path. The placeholder file is
/// created then removed so the listener can bind the path later.
fn generate_socket_path() -> Result<PathBuf> {
    let placeholder = tempfile::Builder::new()
        .prefix("cmdhooks-")
        .suffix(".sock")
        .tempfile()
        .context("failed to create temp socket path")?;
    let path = placeholder.path().to_path_buf();
    placeholder
        .close()
        .context("failed to remove temp socket placeholder")?;
    Ok(path)
}

/// A command-interception session: runs a root command with wrappers
/// standing in for the hook's monitored commands
pub struct CmdHooks {
    hook: RwLock<Arc<dyn Hook>>,
    socket_path: PathBuf,
    wrapper_command: Option<Vec<String>>,
    verbose: bool,
    interceptor: Interceptor,
}

impl std::fmt::Debug for CmdHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CmdHooks")
            .field("socket_path", &self.socket_path)
            .field("wrapper_command", &self.wrapper_command)
            .field("verbose", &self.verbose)
            .finish_non_exhaustive()
    }
}

impl CmdHooks {
    pub fn builder() -> CmdHooksBuilder {
        CmdHooksBuilder::new()
    }

    /// Current hook
    pub fn hook(&self) -> Arc<dyn Hook> {
        Arc::clone(&self.hook.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Atomically replace the hook used by subsequent requests
    pub fn set_hook(&self, hook: Arc<dyn Hook>) {
        *self.hook.write().unwrap_or_else(PoisonError::into_inner) = Arc::clone(&hook);
        self.interceptor.set_hook(hook);
    }

    /// The IPC endpoint path wrappers connect to
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Run the root command under interception. Returns Ok only when
    /// the child exited zero and no policy demanded termination; a
    /// non-zero exit or an abort surfaces as [`ExecutionError`].
    pub async fn execute(&self, command: &[String]) -> Result<()> {
        if command.is_empty() {
            bail!("command cannot be empty");
        }

        self.interceptor
            .start()
            .await
            .context("failed to start interceptor")?;
        let result = self.run_supervised(command).await;
        self.interceptor.stop().await;
        result
    }

    /// Stop the interceptor and remove the IPC endpoint. Safe to call
    /// more than once; cleanup failures are swallowed.
    pub async fn close(&self) {
        self.interceptor.stop().await;
        if self.socket_path.exists() {
            let _ = std::fs::remove_file(&self.socket_path);
        }
    }

    async fn run_supervised(&self, command: &[String]) -> Result<()> {
        let wrapper_command = self.resolve_wrapper_command()?;
        let wrapper_dir = wrappers::materialize(self.hook().as_ref(), &wrapper_command)
            .context("failed to create wrappers")?;

        let mut executor = Executor::new(command.to_vec(), self.socket_path.clone());
        executor.set_wrapper_dir(wrapper_dir.path().to_path_buf());
        executor.set_verbose(self.verbose);
        let executor = Arc::new(executor);

        if self.verbose {
            info!("starting execution: {}", command[0]);
        }

        let mut run = tokio::spawn({
            let executor = Arc::clone(&executor);
            async move { executor.execute().await }
        });

        let mut exit_signal = self.interceptor.exit_signal();
        let abort = async {
            // An Err here means the interceptor went away without
            // raising; no abort can come anymore
            if exit_signal.wait_for(|raised| *raised).await.is_err() {
                std::future::pending::<()>().await;
            }
        };

        // The wrapper directory lives for exactly this execution; its
        // TempDir guard removes it when this function returns
        tokio::select! {
            finished = &mut run => finished.context("execution task failed")?,
            _ = abort => {
                info!("exit signal received - terminating process tree");
                if let Err(err) = executor.kill_process_tree().await {
                    if matches!(
                        err.downcast_ref::<ExecutionError>(),
                        Some(ExecutionError::TerminationTimeout { .. })
                    ) {
                        run.abort();
                        return Err(err);
                    }
                    warn!("failed to kill process tree: {err:#}");
                }
                if tokio::time::timeout(SIGTERM_GRACE_PERIOD, &mut run).await.is_err() {
                    warn!("timeout waiting for process termination");
                    run.abort();
                }
                Err(ExecutionError::TerminatedByRequest.into())
            }
        }
    }

    /// Wrapper invocation vector: the configured one, or the installed
    /// cmdhooks binary with its `run` subcommand
    fn resolve_wrapper_command(&self) -> Result<Vec<String>> {
        if let Some(parts) = &self.wrapper_command {
            return Ok(parts.clone());
        }
        let binary = wrapper::find_executable("cmdhooks").context(
            "cmdhooks binary not found in PATH; install it or configure wrapper_command",
        )?;
        Ok(vec![binary.display().to_string(), "run".to_string()])
    }
}

/// Run a single command under interception with the given hook,
/// tearing the session down afterwards
pub async fn execute_with_hook(command: &[String], hook: impl Hook + 'static) -> Result<()> {
    let cmdhooks = CmdHooks::builder().hook(hook).build()?;
    let result = cmdhooks.execute(command).await;
    cmdhooks.close().await;
    result
}
