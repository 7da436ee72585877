#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

mod command;
mod config;
mod telemetry;

use std::process;

use anyhow::Context;

use crate::config::Cli;

// Tracing target constants
pub const TRACING_TARGET_STARTUP: &str = "taskwire_cli::startup";
pub const TRACING_TARGET_SHUTDOWN: &str = "taskwire_cli::shutdown";
pub const TRACING_TARGET_CONFIG: &str = "taskwire_cli::config";
pub const TRACING_TARGET_COMMAND: &str = "taskwire_cli::command";

#[tokio::main]
async fn main() {
    let Err(error) = run().await else {
        tracing::debug!(
            target: TRACING_TARGET_SHUTDOWN,
            "taskwire terminated successfully"
        );
        process::exit(0);
    };

    if tracing::enabled!(tracing::Level::ERROR) {
        tracing::error!(
            target: TRACING_TARGET_SHUTDOWN,
            error = format!("{error:#}"),
            "taskwire terminated with error"
        );
    } else {
        eprintln!("Error: {error:#}");
    }

    process::exit(1);
}

/// Main application entry point.
async fn run() -> anyhow::Result<()> {
    let cli = Cli::init();

    telemetry::init_tracing(&cli.telemetry)?;
    cli.log();

    let connector = cli
        .postgres
        .clone()
        .build()
        .context("invalid database configuration")?;

    connector
        .open()
        .await
        .context("failed to open database connector")?;

    let result = command::run(&connector, cli.command).await;

    connector
        .close()
        .await
        .context("failed to close database connector")?;

    result
}
