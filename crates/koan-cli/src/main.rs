#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

mod commands;
mod config;
mod signal;
mod telemetry;

use std::process;

use koan_vector::VectorContext;
use tokio_util::sync::CancellationToken;

use crate::config::Cli;

// Tracing target constants
pub const TRACING_TARGET_STARTUP: &str = "koan_cli::startup";
pub const TRACING_TARGET_CONFIG: &str = "koan_cli::config";
pub const TRACING_TARGET_COMMAND: &str = "koan_cli::command";

#[tokio::main]
async fn main() {
    let Err(error) = run().await else {
        process::exit(0);
    };

    if tracing::enabled!(tracing::Level::ERROR) {
        tracing::error!(
            target: TRACING_TARGET_COMMAND,
            error = %format!("{error:#}"),
            "command failed"
        );
    } else {
        eprintln!("Error: {error:#}");
    }

    process::exit(1);
}

/// Main application entry point.
async fn run() -> anyhow::Result<()> {
    let cli = Cli::init();

    telemetry::init_tracing()?;
    cli.log();

    let cancellation = CancellationToken::new();
    signal::cancel_on_signal(cancellation.clone());
    let ctx = VectorContext::with_cancellation(cancellation);

    let command = cli.command.name();
    commands::execute(cli, &ctx).await?;

    tracing::info!(target: TRACING_TARGET_COMMAND, command, "command completed");
    Ok(())
}
