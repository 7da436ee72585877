//! CLI configuration management.
//!
//! ```text
//! Cli
//! ├── postgres: PgConfig          # Connection target and pool sizing
//! ├── telemetry: TelemetryConfig  # Log output format
//! └── command: Command            # listen | query | ping
//! ```
//!
//! All configuration can be provided via CLI arguments or environment variables.
//!
//! # Example
//!
//! ```bash
//! taskwire --postgres-url "postgresql://..." listen --channel jobs
//!
//! # Or via environment variables
//! POSTGRES_URL="postgresql://..." taskwire ping
//! ```

mod command;
mod telemetry;

use std::process;

use clap::Parser;
pub use command::{Command, FetchMode, ListenCommand, QueryCommand};
use taskwire_postgres::PgConfig;
pub use telemetry::{LogFormat, TelemetryConfig};

use crate::{TRACING_TARGET_CONFIG, TRACING_TARGET_STARTUP};

/// Complete CLI configuration.
#[derive(Debug, Clone, Parser)]
#[command(name = "taskwire")]
#[command(about = "Job queue connector for PostgreSQL")]
#[command(version)]
pub struct Cli {
    /// Database connection and pool configuration.
    #[clap(flatten)]
    pub postgres: PgConfig,

    /// Logging configuration.
    #[clap(flatten)]
    pub telemetry: TelemetryConfig,

    /// Command to run.
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Loads environment variables from .env file (if enabled) and parses CLI arguments.
    ///
    /// The .env file is loaded first so that clap's `env` fallbacks can see it.
    pub fn init() -> Self {
        Self::load_dotenv();
        Self::parse()
    }

    #[cfg(feature = "dotenv")]
    fn load_dotenv() {
        if let Err(err) = dotenvy::dotenv()
            && !err.not_found()
        {
            eprintln!("Warning: failed to load .env file: {err}");
        }
    }

    #[cfg(not(feature = "dotenv"))]
    fn load_dotenv() {}

    /// Logs configuration (no sensitive information).
    pub fn log(&self) {
        tracing::debug!(
            target: TRACING_TARGET_STARTUP,
            version = env!("CARGO_PKG_VERSION"),
            pid = process::id(),
            arch = std::env::consts::ARCH,
            os = std::env::consts::OS,
            features = ?Self::enabled_features(),
            "Build information"
        );

        tracing::info!(
            target: TRACING_TARGET_CONFIG,
            postgres_url = %self.postgres.database_url_masked(),
            postgres_min_connections = self.postgres.postgres_min_connections,
            postgres_max_connections = self.postgres.postgres_max_connections,
            postgres_connection_timeout_secs = ?self.postgres.postgres_connection_timeout_secs,
            postgres_listen_timeout_secs = self.postgres.postgres_listen_timeout_secs,
            "Database configuration"
        );
    }

    /// Returns a list of enabled compile-time features.
    fn enabled_features() -> Vec<&'static str> {
        [cfg!(feature = "dotenv").then_some("dotenv")]
            .into_iter()
            .flatten()
            .collect()
    }
}
