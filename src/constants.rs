//! Global constants for cmdhooks
//!
//! Centralized location for application-wide constants

use std::time::Duration;

/// Environment variable carrying the interceptor socket path into wrapper processes
pub const SOCKET_ENV_VAR: &str = "CMDHOOKS_SOCKET";

/// Environment variable enabling verbose wrapper logging
pub const VERBOSE_ENV_VAR: &str = "CMDHOOKS_VERBOSE";

/// Marker substring identifying wrapper directories on PATH.
/// Wrappers strip any PATH entry containing it before resolving the
/// real program, so the generated directory name must carry it.
pub const WRAPPER_DIR_MARKER: &str = "cmdhooks-wrappers";

/// Maximum size of a single IPC message line, request or response
pub const MAX_IPC_MESSAGE_BYTES: usize = 64 * 1024;

/// Default bound on one remote hook evaluation inside the interceptor
pub const DEFAULT_EVALUATE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Fixed bound on one local hook evaluation inside a wrapper
pub const LOCAL_EVALUATE_TIMEOUT: Duration = Duration::from_secs(30);

/// Grace period after SIGTERM before escalating to SIGKILL
pub const SIGTERM_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Additional grace period after SIGKILL before giving up
pub const SIGKILL_GRACE_PERIOD: Duration = Duration::from_secs(2);

/// Search path used when the parent environment carries no PATH
pub const DEFAULT_PATH_FALLBACK: &str = "/usr/bin:/bin:/usr/local/bin";
