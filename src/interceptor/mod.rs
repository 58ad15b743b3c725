//! Request interception over a Unix domain socket
//!
//! Serves one policy decision per inbound wrapper connection and
//! exposes the session abort signal raised by exit verdicts. The
//! server never crashes the controller: every handler failure is
//! converted into an `exit=true` response.

use anyhow::{anyhow, Context, Result};
use log::{info, warn};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};

use crate::constants::DEFAULT_EVALUATE_TIMEOUT;
use crate::hook::wire;
use crate::hook::{Hook, Request, Response};

/// Interceptor serving remote policy decisions for wrapper requests
pub struct Interceptor {
    socket_path: PathBuf,
    verbose: bool,
    hook: Arc<RwLock<Arc<dyn Hook>>>,
    evaluate_timeout: Option<Duration>,
    exit_tx: watch::Sender<bool>,
    stop_tx: Mutex<Option<watch::Sender<bool>>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl Interceptor {
    pub fn new(socket_path: impl Into<PathBuf>, verbose: bool, hook: Arc<dyn Hook>) -> Self {
        let (exit_tx, _) = watch::channel(false);
        Self {
            socket_path: socket_path.into(),
            verbose,
            hook: Arc::new(RwLock::new(hook)),
            evaluate_timeout: Some(DEFAULT_EVALUATE_TIMEOUT),
            exit_tx,
            stop_tx: Mutex::new(None),
            accept_task: Mutex::new(None),
        }
    }

    /// Override the remote evaluation bound. `None` or a zero duration
    /// disables it entirely.
    pub fn set_evaluate_timeout(&mut self, timeout: Option<Duration>) {
        self.evaluate_timeout = timeout.filter(|bound| !bound.is_zero());
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Receiver for the one-shot abort signal. Once raised, the value
    /// stays true for the rest of the session; observers should use
    /// `wait_for(|raised| *raised)` so a signal raised before they
    /// subscribed is still seen.
    pub fn exit_signal(&self) -> watch::Receiver<bool> {
        self.exit_tx.subscribe()
    }

    /// Atomically replace the hook consulted by subsequent requests
    pub fn set_hook(&self, hook: Arc<dyn Hook>) {
        let mut current = self.hook.write().unwrap_or_else(PoisonError::into_inner);
        *current = hook;
    }

    /// Current hook
    pub fn hook(&self) -> Arc<dyn Hook> {
        Arc::clone(&self.hook.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Bind the endpoint, restrict it to the launching user, and spawn
    /// the accept loop. Any stale file at the endpoint path is removed
    /// first so the listener can bind.
    pub async fn start(&self) -> Result<()> {
        if self.socket_path.exists() {
            fs::remove_file(&self.socket_path).with_context(|| {
                format!("failed to remove stale socket {}", self.socket_path.display())
            })?;
        }

        let listener = UnixListener::bind(&self.socket_path).with_context(|| {
            format!("failed to create socket listener at {}", self.socket_path.display())
        })?;
        fs::set_permissions(&self.socket_path, fs::Permissions::from_mode(0o600))
            .context("failed to set socket permissions")?;

        let (stop_tx, stop_rx) = watch::channel(false);
        *self.stop_tx.lock().await = Some(stop_tx);

        let task = tokio::spawn(accept_loop(
            listener,
            stop_rx,
            Arc::clone(&self.hook),
            self.evaluate_timeout,
            self.verbose,
            self.exit_tx.clone(),
        ));
        *self.accept_task.lock().await = Some(task);

        Ok(())
    }

    /// Stop the accept loop, wait for in-flight handlers to finish,
    /// and remove the endpoint file. Safe to call more than once.
    pub async fn stop(&self) {
        if let Some(stop_tx) = self.stop_tx.lock().await.take() {
            let _ = stop_tx.send(true);
        }
        let task = self.accept_task.lock().await.take();
        if let Some(task) = task {
            let _ = task.await;
        }
        let _ = fs::remove_file(&self.socket_path);
    }
}

impl Drop for Interceptor {
    fn drop(&mut self) {
        // Best-effort endpoint cleanup when the server is dropped
        if self.socket_path.exists() {
            let _ = fs::remove_file(&self.socket_path);
        }
    }
}

/// Accept connections until stopped, handling each concurrently.
/// Accept errors while a stop is pending are silent; other errors are
/// logged in verbose mode and the loop continues.
async fn accept_loop(
    listener: UnixListener,
    mut stop_rx: watch::Receiver<bool>,
    hook: Arc<RwLock<Arc<dyn Hook>>>,
    evaluate_timeout: Option<Duration>,
    verbose: bool,
    exit_tx: watch::Sender<bool>,
) {
    let mut handlers = JoinSet::new();

    loop {
        tokio::select! {
            _ = stop_rx.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _addr)) => {
                    let hook = Arc::clone(&hook.read().unwrap_or_else(PoisonError::into_inner));
                    handlers.spawn(handle_connection(
                        stream,
                        hook,
                        evaluate_timeout,
                        verbose,
                        exit_tx.clone(),
                    ));
                }
                Err(err) => {
                    if *stop_rx.borrow() {
                        break;
                    }
                    if verbose {
                        warn!("failed to accept connection: {err}");
                    }
                }
            },
        }
    }

    // A pending stop still lets in-flight handlers run to completion
    while handlers.join_next().await.is_some() {}
}

/// Process a single connection: read one request line, evaluate it,
/// write one response line, close. Framing and parse failures answer
/// `exit=true` without raising the abort signal.
async fn handle_connection(
    stream: UnixStream,
    hook: Arc<dyn Hook>,
    evaluate_timeout: Option<Duration>,
    verbose: bool,
    exit_tx: watch::Sender<bool>,
) {
    let (reader, mut writer) = stream.into_split();

    let response = match wire::read_message::<_, Request>(reader).await {
        Ok(request) => {
            evaluate_request(hook.as_ref(), &request, evaluate_timeout, verbose, &exit_tx).await
        }
        Err(err) => {
            if verbose {
                warn!("request read error: {err:#}");
            }
            Response::terminate()
        }
    };

    if let Err(err) = wire::write_message(&mut writer, &response).await {
        if verbose {
            warn!("failed to write response: {err:#}");
        }
    }
}

/// Run the remote evaluation stage for one parsed request. Hooks
/// without a remote capability are allowed through so local-only
/// setups are not blocked by the IPC stage. Any exit verdict raises
/// the session abort signal before the response is returned.
async fn evaluate_request(
    hook: &dyn Hook,
    request: &Request,
    evaluate_timeout: Option<Duration>,
    verbose: bool,
    exit_tx: &watch::Sender<bool>,
) -> Response {
    let response = match hook.as_remote() {
        Some(remote) => {
            let outcome = match evaluate_timeout {
                Some(bound) => tokio::time::timeout(bound, remote.evaluate_remote(request))
                    .await
                    .unwrap_or_else(|_| {
                        Err(anyhow!("evaluation exceeded {}s bound", bound.as_secs()))
                    }),
                None => remote.evaluate_remote(request).await,
            };
            match outcome {
                Ok(response) => response,
                Err(err) => {
                    if verbose {
                        warn!("hook {} evaluation error: {err:#}", hook.name());
                    }
                    Response::terminate()
                }
            }
        }
        None => {
            if verbose {
                info!("no remote evaluator; allowing {:?}", request.command);
            }
            Response::default()
        }
    };

    if response.exit {
        exit_tx.send_replace(true);
        if verbose {
            info!("request EXIT: {:?}", request.command);
        }
    } else if verbose {
        info!("request continuing: {:?}", request.command);
    }

    response
}
