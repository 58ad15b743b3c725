#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use clap::Parser;
use cmdhooks::cli::{Args, Commands};
use cmdhooks::wrapper;

fn main() {
    let args = Args::parse();
    match args.command {
        Commands::Run { verbose, command } => run_wrapper(verbose, &command),
    }
}

/// Run the wrapper entry point and relay the real program's exit
/// status to the invoking shell
fn run_wrapper(verbose: bool, command: &[String]) -> ! {
    init_logging(verbose);

    let exit_code = match block_on_wrapper(command, verbose) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("cmdhooks: {err:#}");
            1
        }
    };
    std::process::exit(exit_code);
}

fn block_on_wrapper(command: &[String], verbose: bool) -> Result<i32> {
    let runtime = tokio::runtime::Runtime::new().context("failed to create tokio runtime")?;
    runtime.block_on(wrapper::run(command, verbose))
}

/// Route library logging to stderr; verbose mode (flag or
/// CMDHOOKS_VERBOSE) lowers the filter to debug
fn init_logging(verbose: bool) {
    let level = if verbose || wrapper::verbose_from_env() {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Warn
    };
    let _ = env_logger::Builder::new()
        .filter_level(level)
        .format_timestamp(None)
        .try_init();
}
