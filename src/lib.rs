//! cmdhooks library - command interception with pluggable hook policies
//!
//! This library transparently inserts a policy checkpoint in front of
//! selected executables invoked by a script. The controller prepares
//! the interception environment and runs the root command; wrapper
//! processes stand in for monitored commands and consult policy before
//! and after each real invocation, locally and/or over a private Unix
//! socket served by the interceptor.

#![forbid(unsafe_code)]

pub mod hook;
pub mod interceptor;
pub mod executor;
pub mod controller;
pub mod wrapper;
pub mod cli;
pub mod constants;

pub use controller::{execute_with_hook, CmdHooks, CmdHooksBuilder};
pub use executor::ExecutionError;
pub use hook::{Hook, HookPhase, LocalHook, Metadata, RemoteHook, Request, Response};
