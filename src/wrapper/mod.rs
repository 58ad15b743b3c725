//! Wrapper process standing in for one monitored command
//!
//! Runs the two-stage policy evaluation (local, then remote over IPC)
//! around a single real invocation, with stdout/stderr captured to
//! temp files so post-run policy can inspect the complete output
//! before it is relayed to the shell.

use anyhow::{anyhow, bail, Context, Result};
use log::{debug, info, warn};
use std::env;
use std::ffi::{OsStr, OsString};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tokio::process::Command;

use crate::constants::{
    LOCAL_EVALUATE_TIMEOUT, SOCKET_ENV_VAR, VERBOSE_ENV_VAR, WRAPPER_DIR_MARKER,
};
use crate::hook::wire;
use crate::hook::{Hook, Metadata, Request, Response};

/// Serializes PATH mutation during real-command lookup. The mutation
/// is process-wide, so concurrent wrapper evaluations in one process
/// must take turns.
static PATH_LOCK: Mutex<()> = Mutex::new(());

/// Run one wrapped invocation with configuration taken from the
/// environment; returns the exit status to relay to the shell
pub async fn run(command: &[String], verbose: bool) -> Result<i32> {
    let mut wrapper = WrapperCommand::new(None);
    if let Some(path) = env::var_os(SOCKET_ENV_VAR) {
        if !path.is_empty() {
            wrapper.set_socket_path(PathBuf::from(path));
        }
    }
    wrapper.set_verbose(verbose || verbose_from_env());
    wrapper.run(command).await
}

/// CMDHOOKS_VERBOSE truthiness: any value other than empty, "false",
/// or "0" enables verbose logging
pub fn verbose_from_env() -> bool {
    match env::var(VERBOSE_ENV_VAR) {
        Ok(value) => {
            let value = value.trim();
            !value.is_empty() && !value.eq_ignore_ascii_case("false") && value != "0"
        }
        Err(_) => false,
    }
}

/// Impersonates one monitored command for exactly one invocation.
///
/// The stock `cmdhooks run` binary constructs this without a hook and
/// relies entirely on the remote stage; embedders may compile their
/// own wrapper binary carrying a local hook.
pub struct WrapperCommand {
    hook: Option<Arc<dyn Hook>>,
    socket_path: Option<PathBuf>,
    verbose: bool,
}

impl WrapperCommand {
    pub fn new(hook: Option<Arc<dyn Hook>>) -> Self {
        Self {
            hook,
            socket_path: None,
            verbose: false,
        }
    }

    /// Set the IPC endpoint used for remote evaluation
    pub fn set_socket_path(&mut self, path: impl Into<PathBuf>) {
        self.socket_path = Some(path.into());
    }

    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    /// Run `command` with pre- and post-run policy evaluation and
    /// return the real program's exit status. A termination verdict
    /// from either phase is an error; the caller decides the process
    /// exit status.
    pub async fn run(&self, command: &[String]) -> Result<i32> {
        if command.is_empty() {
            bail!("command cannot be empty");
        }
        let pid = std::process::id();
        if self.verbose {
            debug!("wrapper: {:?}", command);
        }

        let request = Request::pre_run(command.to_vec(), pid);
        let response = self
            .evaluate_hooks(&request)
            .await
            .context("pre-run hook evaluation error")?;
        if response.exit {
            if self.verbose {
                info!("pre-run termination requested for {}", command[0]);
            }
            bail!("process termination requested");
        }

        let started = Instant::now();
        let execution = self.execute_command(&command[0], &command[1..]).await?;
        let duration = started.elapsed();

        let mut metadata = Metadata::new();
        if let Some(path) = &execution.stdout_path {
            metadata.insert(
                "stdout_file".to_string(),
                serde_json::json!(path.display().to_string()),
            );
        }
        if let Some(path) = &execution.stderr_path {
            metadata.insert(
                "stderr_file".to_string(),
                serde_json::json!(path.display().to_string()),
            );
        }
        metadata.insert(
            "execution_duration".to_string(),
            serde_json::json!(duration.as_nanos() as u64),
        );

        let request = Request::post_run(command.to_vec(), pid, execution.exit_code, duration)
            .with_metadata(metadata);
        let response = match self.evaluate_hooks(&request).await {
            Ok(response) => response,
            Err(err) => {
                execution.remove_captures();
                return Err(err.context("post-run hook evaluation error"));
            }
        };
        if response.exit {
            execution.remove_captures();
            if self.verbose {
                info!("post-run termination requested for {}", command[0]);
            }
            bail!("process termination requested");
        }

        execution.relay().await;
        Ok(execution.exit_code)
    }

    /// Pass one request through the local stage and then the remote
    /// stage. A local termination verdict short-circuits the remote
    /// stage; when neither stage runs, the implicit response allows.
    async fn evaluate_hooks(&self, request: &Request) -> Result<Response> {
        let local_response = self.evaluate_local(request).await?;
        if let Some(response) = &local_response {
            if response.exit {
                return Ok(response.clone());
            }
        }

        if let Some(response) = self.evaluate_remote(request, local_response.as_ref()).await? {
            return Ok(response);
        }

        Ok(local_response.unwrap_or_default())
    }

    /// Local stage: runs only when a hook with local capability is
    /// compiled in and its command list covers the invoked name
    async fn evaluate_local(&self, request: &Request) -> Result<Option<Response>> {
        let Some(hook) = &self.hook else {
            return Ok(None);
        };
        let Some(local) = hook.as_local() else {
            return Ok(None);
        };
        let Some(program) = request.command.first() else {
            return Ok(None);
        };
        if !hook.handles_command(program) {
            return Ok(None);
        }

        let response = tokio::time::timeout(LOCAL_EVALUATE_TIMEOUT, local.evaluate_local(request))
            .await
            .map_err(|_| anyhow!("local hook {} timed out", hook.name()))?
            .with_context(|| format!("local hook {} error", hook.name()))?;
        if self.verbose {
            debug!("local hook {} evaluated", hook.name());
        }
        Ok(Some(response))
    }

    /// Remote stage: forwards the request over the IPC endpoint with
    /// the local stage's metadata merged in (local values override on
    /// key conflicts)
    async fn evaluate_remote(
        &self,
        request: &Request,
        local_response: Option<&Response>,
    ) -> Result<Option<Response>> {
        let Some(socket_path) = &self.socket_path else {
            return Ok(None);
        };
        if self.verbose {
            debug!("using remote evaluation");
        }

        let mut merged = request.metadata.clone();
        if let Some(local) = local_response {
            merged.extend(
                local
                    .metadata
                    .iter()
                    .map(|(key, value)| (key.clone(), value.clone())),
            );
        }

        let remote_request = Request {
            metadata: merged,
            ..request.clone()
        };
        let response = send_request(socket_path, &remote_request)
            .await
            .context("remote hook evaluation failed")?;
        Ok(Some(response))
    }

    /// Resolve and run the real program with stdin inherited and
    /// stdout/stderr captured to temp files. A failed lookup reports
    /// exit code 1 with no captures, matching how shells report a
    /// missing program.
    async fn execute_command(&self, program: &str, args: &[String]) -> Result<Execution> {
        let resolved = match resolve_real_command(program) {
            Some(path) => path,
            None => {
                if self.verbose {
                    warn!("command not found: {program}");
                }
                return Ok(Execution {
                    exit_code: 1,
                    stdout_path: None,
                    stderr_path: None,
                });
            }
        };

        let (stdout_file, stdout_path) = create_capture_file("cmdhooks-stdout-")?;
        let (stderr_file, stderr_path) = match create_capture_file("cmdhooks-stderr-") {
            Ok(capture) => capture,
            Err(err) => {
                let _ = fs::remove_file(&stdout_path);
                return Err(err);
            }
        };

        // The child inherits this process's environment; PATH still
        // contains the wrapper directory, so nested invocations remain
        // interceptable
        let status = Command::new(&resolved)
            .args(args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::from(stdout_file))
            .stderr(Stdio::from(stderr_file))
            .status()
            .await;

        let exit_code = match status {
            Ok(status) => status.code().unwrap_or(1),
            Err(err) => {
                if self.verbose {
                    warn!("failed to run {}: {err}", resolved.display());
                }
                1
            }
        };

        Ok(Execution {
            exit_code,
            stdout_path: Some(stdout_path),
            stderr_path: Some(stderr_path),
        })
    }
}

/// One finished (or failed) real invocation
struct Execution {
    exit_code: i32,
    stdout_path: Option<PathBuf>,
    stderr_path: Option<PathBuf>,
}

impl Execution {
    /// Copy captured output to the wrapper's own streams, then delete
    /// the capture files
    async fn relay(&self) {
        if let Some(path) = &self.stdout_path {
            if let Ok(mut file) = tokio::fs::File::open(path).await {
                let mut stdout = tokio::io::stdout();
                let _ = tokio::io::copy(&mut file, &mut stdout).await;
                let _ = stdout.flush().await;
            }
        }
        if let Some(path) = &self.stderr_path {
            if let Ok(mut file) = tokio::fs::File::open(path).await {
                let mut stderr = tokio::io::stderr();
                let _ = tokio::io::copy(&mut file, &mut stderr).await;
                let _ = stderr.flush().await;
            }
        }
        self.remove_captures();
    }

    fn remove_captures(&self) {
        for path in [&self.stdout_path, &self.stderr_path].into_iter().flatten() {
            let _ = fs::remove_file(path);
        }
    }
}

/// Send one request over the interceptor socket and read the single
/// response line
pub async fn send_request(socket_path: &Path, request: &Request) -> Result<Response> {
    let stream = UnixStream::connect(socket_path)
        .await
        .with_context(|| format!("failed to connect to socket {}", socket_path.display()))?;
    let (reader, mut writer) = stream.into_split();
    wire::write_message(&mut writer, request).await?;
    wire::read_message(reader).await.context("failed to read response")
}

/// Locate the real program with wrapper directories stripped from
/// PATH. The temporary mutation is process-wide, hence the lock; the
/// original PATH is restored before the lock is released so spawned
/// children still see the wrapper-inclusive search path.
fn resolve_real_command(program: &str) -> Option<PathBuf> {
    let _guard = PATH_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let original = env::var_os("PATH").unwrap_or_default();
    env::set_var("PATH", strip_wrapper_entries(&original));
    let resolved = find_executable(program);
    env::set_var("PATH", &original);
    resolved
}

/// Drop PATH entries whose path contains the wrapper-directory marker
fn strip_wrapper_entries(path: &OsStr) -> OsString {
    let kept: Vec<PathBuf> = env::split_paths(path)
        .filter(|entry| !entry.to_string_lossy().contains(WRAPPER_DIR_MARKER))
        .collect();
    env::join_paths(kept).unwrap_or_default()
}

/// Search the current PATH for an executable; names containing a
/// separator are checked directly
pub fn find_executable(program: &str) -> Option<PathBuf> {
    if program.contains('/') {
        let candidate = PathBuf::from(program);
        return is_executable(&candidate).then_some(candidate);
    }

    let path = env::var_os("PATH")?;
    env::split_paths(&path)
        .map(|dir| {
            if dir.as_os_str().is_empty() {
                PathBuf::from(".")
            } else {
                dir
            }
            .join(program)
        })
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Create a 0600 capture file that outlives the temp-file guard so
/// policy can read it by path
fn create_capture_file(prefix: &str) -> Result<(fs::File, PathBuf)> {
    let file = tempfile::Builder::new()
        .prefix(prefix)
        .tempfile()
        .with_context(|| format!("failed to create {prefix} capture file"))?;
    let (file, path) = file
        .keep()
        .with_context(|| format!("failed to persist {prefix} capture file"))?;
    Ok((file, path))
}
