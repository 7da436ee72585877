use anyhow::Context;
use taskwire_postgres::{PgConnector, QueryArgs, QueryExecutor};

use crate::TRACING_TARGET_COMMAND;

/// Runs a trivial query and reports the server version and pool status.
pub async fn run(connector: &PgConnector) -> anyhow::Result<()> {
    let row = connector
        .execute_query_one("SELECT version() AS version", &QueryArgs::new())
        .await
        .context("database is not reachable")?;

    let version = row
        .as_ref()
        .and_then(|row| row.get("version"))
        .and_then(|version| version.as_str())
        .unwrap_or("unknown");
    let status = connector.pool_status()?;

    tracing::info!(
        target: TRACING_TARGET_COMMAND,
        version,
        pool_size = status.size,
        pool_max_size = status.max_size,
        pool_available = status.available,
        "Database is reachable"
    );
    println!("ok: {version}");

    Ok(())
}
