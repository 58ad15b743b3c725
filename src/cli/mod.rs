//! CLI argument parsing for the cmdhooks binary
//!
//! The binary's one job is the `run` subcommand that wrapper scripts
//! exec in place of a monitored command.

use clap::{Parser, Subcommand};

/// Command hook system for intercepting and controlling command execution
#[derive(Parser)]
#[command(author, version = env!("CMDHOOKS_VERSION"), about)]
#[command(
    long_about = "Intercepts commands invoked inside a script's process tree and \
                  consults hook policies before and after each run."
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute a command with hook evaluation (used internally by wrapper scripts)
    Run {
        /// Enable verbose output
        #[arg(short, long)]
        verbose: bool,

        /// Command and arguments to execute
        #[arg(
            required = true,
            trailing_var_arg = true,
            allow_hyphen_values = true,
            value_name = "COMMAND"
        )]
        command: Vec<String>,
    },
}
