//! nboot
//!
//! Runs boot tasks on an already running nREPL server. Every argument is
//! passed through to boot unchanged; with no arguments boot prints its help.
//!
//! Start a server with `boot repl -s -p 7888`, then run e.g. `nboot build`.

use std::io;
use std::process::ExitCode;

use anyhow::{Context, Result};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use nboot_core::relay::{self, Console};
use nboot_core::ClientConfig;

fn main() -> Result<ExitCode> {
    // Logs go to stderr, stdout carries the relayed output
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args: Vec<String> = std::env::args_os()
        .skip(1)
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect();
    let config = ClientConfig::default();
    debug!("Relaying {:?} to {}", args, config.endpoint);

    let outcome = relay::run(&config, &args, Console::stdio())
        .with_context(|| format!("boot failed on {}", config.endpoint))?;

    info!("nboot exiting with code {}", outcome.exit_code);
    Ok(ExitCode::from(outcome.exit_code))
}
