//! Hook abstraction and wire types
//!
//! Defines the policy surface shared by all three roles:
//! - Request/Response: the values exchanged with policy evaluations
//! - Hook: the base identity (name + monitored commands)
//! - LocalHook/RemoteHook: orthogonal evaluation capabilities

pub(crate) mod wire;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Wildcard entry matching any command at the local dispatch stage
pub const MATCH_ANY_COMMAND: &str = "*";

/// Opaque context carried alongside requests and responses
pub type Metadata = HashMap<String, serde_json::Value>;

/// Evaluation phase of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookPhase {
    /// Before the real program runs
    PreRun,
    /// After the real program returned
    PostRun,
}

/// A single policy evaluation request.
///
/// `exit_code` and `duration` are populated for `post_run` requests
/// only; no other field combination is produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Invoked command: element 0 is the executable name as written
    /// in the script, the rest are its arguments
    pub command: Vec<String>,
    /// Process id of the wrapper issuing the request
    pub pid: u32,
    /// Evaluation phase
    #[serde(rename = "hook")]
    pub phase: HookPhase,
    /// Exit status of the real program (post-run only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Elapsed wall-clock time in nanoseconds (post-run only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    /// Opaque context forwarded between evaluation stages
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

impl Request {
    /// Build a pre-run request for a command about to execute
    pub fn pre_run(command: Vec<String>, pid: u32) -> Self {
        Self {
            command,
            pid,
            phase: HookPhase::PreRun,
            exit_code: None,
            duration: None,
            metadata: Metadata::new(),
        }
    }

    /// Build a post-run request for a command that has returned
    pub fn post_run(command: Vec<String>, pid: u32, exit_code: i32, duration: Duration) -> Self {
        Self {
            command,
            pid,
            phase: HookPhase::PostRun,
            exit_code: Some(exit_code),
            duration: Some(duration.as_nanos() as u64),
            metadata: Metadata::new(),
        }
    }

    /// Replace the request metadata
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// The verdict of a policy evaluation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Response {
    /// When true, demands termination of the whole run
    #[serde(default, skip_serializing_if = "is_false")]
    pub exit: bool,
    /// Context merged into the remote request (local stage) or
    /// surfaced to the wrapper (remote stage)
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl Response {
    /// A response demanding termination of the run
    pub fn terminate() -> Self {
        Self {
            exit: true,
            metadata: Metadata::new(),
        }
    }
}

/// Base hook identity: a name plus the list of monitored commands.
///
/// Evaluation capabilities are discovered at runtime through
/// `as_local`/`as_remote`; implementations override the accessor for
/// each capability they provide. A hook may provide either, both, or
/// neither.
pub trait Hook: Send + Sync {
    /// Human-readable hook name used in diagnostics
    fn name(&self) -> &str;

    /// Command names this hook monitors. `*` matches any command at
    /// the local dispatch stage.
    fn commands(&self) -> &[String];

    /// Local (in-wrapper) evaluation capability, if implemented
    fn as_local(&self) -> Option<&dyn LocalHook> {
        None
    }

    /// Remote (interceptor-side) evaluation capability, if implemented
    fn as_remote(&self) -> Option<&dyn RemoteHook> {
        None
    }

    /// Whether this hook handles the given invoked command name.
    /// Matching is case-sensitive exact equality on the name only,
    /// with `*` as the sole wildcard.
    fn handles_command(&self, command: &str) -> bool {
        self.commands()
            .iter()
            .any(|entry| entry == command || entry == MATCH_ANY_COMMAND)
    }
}

/// Evaluation capability that runs inside the wrapper process
#[async_trait]
pub trait LocalHook: Hook {
    async fn evaluate_local(&self, request: &Request) -> Result<Response>;
}

/// Evaluation capability that runs inside the controller process,
/// reached over the IPC endpoint
#[async_trait]
pub trait RemoteHook: Hook {
    async fn evaluate_remote(&self, request: &Request) -> Result<Response>;
}
