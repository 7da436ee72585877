use anyhow::Context;
use serde_json::Value;
use taskwire_postgres::{PgConnector, QueryExecutor};

use crate::TRACING_TARGET_COMMAND;
use crate::config::{FetchMode, QueryCommand};

/// Runs one query and prints its result as JSON on stdout.
pub async fn run(connector: &PgConnector, command: QueryCommand) -> anyhow::Result<()> {
    let args = command.query_args();
    tracing::debug!(
        target: TRACING_TARGET_COMMAND,
        mode = ?command.mode,
        args = args.len(),
        "Running query"
    );

    let output = match command.mode {
        FetchMode::Execute => {
            connector
                .execute_query(&command.sql, &args)
                .await
                .context("query failed")?;
            return Ok(());
        }
        FetchMode::One => connector
            .execute_query_one(&command.sql, &args)
            .await
            .context("query failed")?
            .map_or(Value::Null, Value::Object),
        FetchMode::All => Value::Array(
            connector
                .execute_query_all(&command.sql, &args)
                .await
                .context("query failed")?
                .into_iter()
                .map(Value::Object)
                .collect(),
        ),
    };

    let rendered = serde_json::to_string_pretty(&output).context("failed to render rows")?;
    println!("{rendered}");

    Ok(())
}
