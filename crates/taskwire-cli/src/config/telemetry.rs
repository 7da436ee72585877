//! Logging configuration.

use clap::{Args, ValueEnum};
use serde::{Deserialize, Serialize};

/// Output format of log records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable, colored when writing to a terminal.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Logging options.
///
/// Log levels come from `RUST_LOG` (default `info`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, Args)]
pub struct TelemetryConfig {
    /// Log output format
    #[arg(long, env = "TASKWIRE_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    #[serde(default)]
    pub log_format: LogFormat,
}
