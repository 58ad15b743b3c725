//! Wrapper-directory materialization
//!
//! Emits one executable shell shim per monitored command, each
//! exec-ing the wrapper entry point with the command name prepended
//! and the script's own arguments forwarded verbatim.

use anyhow::{Context, Result};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use tempfile::TempDir;

use crate::constants::WRAPPER_DIR_MARKER;
use crate::hook::Hook;

/// Create the wrapper directory with one script per command the hook
/// monitors. An empty command list yields an empty directory. The
/// directory name carries the marker substring wrappers strip from
/// their own PATH during real-program lookup.
pub(crate) fn materialize(hook: &dyn Hook, wrapper_command: &[String]) -> Result<TempDir> {
    let dir = tempfile::Builder::new()
        .prefix(&format!("{WRAPPER_DIR_MARKER}-"))
        .tempdir()
        .context("failed to create wrapper directory")?;

    for name in hook.commands() {
        let path = dir.path().join(name);
        fs::write(&path, wrapper_script(wrapper_command, name))
            .with_context(|| format!("failed to write wrapper for {name}"))?;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o700))
            .with_context(|| format!("failed to set wrapper mode for {name}"))?;
    }

    Ok(dir)
}

fn wrapper_script(wrapper_command: &[String], name: &str) -> String {
    let exec_line: Vec<String> = wrapper_command
        .iter()
        .map(|part| shell_quote(part))
        .chain([shell_quote(name)])
        .collect();
    format!(
        "#!/usr/bin/env bash\nexec {} \"$@\"\n",
        exec_line.join(" ")
    )
}

/// Single-quote `value` for the shell. Embedded single quotes close
/// the quoted span, emit an escaped quote, and reopen it (`'\''`).
pub(crate) fn shell_quote(value: &str) -> String {
    if value.is_empty() {
        return "''".to_string();
    }
    format!("'{}'", value.replace('\'', "'\\''"))
}
