//! Command implementations.

mod listen;
mod ping;
mod query;
mod shutdown;

use taskwire_postgres::PgConnector;

use crate::config::Command;

/// Runs `command` against an open connector.
pub async fn run(connector: &PgConnector, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Listen(listen) => listen::run(connector, listen).await,
        Command::Query(query) => query::run(connector, query).await,
        Command::Ping => ping::run(connector).await,
    }
}
