//! Shared test fixtures
//!
//! `TestHook` is a scriptable hook whose capabilities can be toggled,
//! so tests can model local-only, remote-only, and dual hooks, and
//! inspect every request the remote stage observed.

#![allow(dead_code)]

use async_trait::async_trait;
use cmdhooks::hook::{Hook, LocalHook, Metadata, RemoteHook, Request, Response};
use std::collections::HashSet;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub struct TestHook {
    name: String,
    commands: Vec<String>,
    blocked: HashSet<String>,
    local_enabled: bool,
    remote_enabled: bool,
    local_metadata: Metadata,
    remote_delay: Option<Duration>,
    remote_error: bool,
    /// Every request the remote stage evaluated, in arrival order
    pub seen: Arc<Mutex<Vec<Request>>>,
}

impl TestHook {
    pub fn new(name: &str, commands: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            commands: commands.iter().map(|c| c.to_string()).collect(),
            blocked: HashSet::new(),
            local_enabled: false,
            remote_enabled: false,
            local_metadata: Metadata::new(),
            remote_delay: None,
            remote_error: false,
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_local(mut self) -> Self {
        self.local_enabled = true;
        self
    }

    pub fn with_remote(mut self) -> Self {
        self.remote_enabled = true;
        self
    }

    /// Return an exit verdict whenever `command` is the invoked name
    pub fn block(mut self, command: &str) -> Self {
        self.blocked.insert(command.to_string());
        self
    }

    /// Metadata the local stage attaches to its responses
    pub fn with_local_metadata(mut self, key: &str, value: &str) -> Self {
        self.local_metadata
            .insert(key.to_string(), serde_json::json!(value));
        self
    }

    /// Sleep this long before every remote evaluation
    pub fn with_remote_delay(mut self, delay: Duration) -> Self {
        self.remote_delay = Some(delay);
        self
    }

    /// Fail every remote evaluation with a synthetic error
    pub fn with_remote_error(mut self) -> Self {
        self.remote_error = true;
        self
    }

    fn verdict(&self, request: &Request) -> Response {
        let exit = request
            .command
            .first()
            .is_some_and(|program| self.blocked.contains(program));
        Response {
            exit,
            metadata: Metadata::new(),
        }
    }
}

impl Hook for TestHook {
    fn name(&self) -> &str {
        &self.name
    }

    fn commands(&self) -> &[String] {
        &self.commands
    }

    fn as_local(&self) -> Option<&dyn LocalHook> {
        self.local_enabled.then_some(self as &dyn LocalHook)
    }

    fn as_remote(&self) -> Option<&dyn RemoteHook> {
        self.remote_enabled.then_some(self as &dyn RemoteHook)
    }
}

#[async_trait]
impl LocalHook for TestHook {
    async fn evaluate_local(&self, request: &Request) -> anyhow::Result<Response> {
        let mut response = self.verdict(request);
        response.metadata = self.local_metadata.clone();
        Ok(response)
    }
}

#[async_trait]
impl RemoteHook for TestHook {
    async fn evaluate_remote(&self, request: &Request) -> anyhow::Result<Response> {
        if let Some(delay) = self.remote_delay {
            tokio::time::sleep(delay).await;
        }
        self.seen.lock().unwrap().push(request.clone());
        if self.remote_error {
            anyhow::bail!("synthetic evaluation failure");
        }
        Ok(self.verdict(request))
    }
}

/// Wrapper invocation vector pointing at the freshly built binary
pub fn wrapper_command() -> Vec<String> {
    vec![
        env!("CARGO_BIN_EXE_cmdhooks").to_string(),
        "run".to_string(),
    ]
}

/// Write an executable bash script into `dir`
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/usr/bin/env bash\n{body}")).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

/// Convenience for building owned command vectors
pub fn command(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}
