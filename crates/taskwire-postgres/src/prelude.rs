//! Prelude module for taskwire-postgres.
//!
//! This module re-exports the most commonly used types and traits,
//! making it easy to import everything you need with a single `use` statement.
//!
//! # Example
//!
//! ```rust,no_run
//! use taskwire_postgres::prelude::*;
//!
//! # async fn example() -> PgResult<()> {
//! let connector = PgConfig::new("postgresql://localhost/jobs").build()?;
//! connector.open().await?;
//!
//! let args = QueryArgs::new().with("queue", "default");
//! let row = connector
//!     .execute_query_one("SELECT count(*) AS jobs FROM jobs WHERE queue = :queue", &args)
//!     .await?;
//! # Ok(())
//! # }
//! ```

// Connector
pub use crate::{ConnectionPool, JsonCodec, PgConfig, PgConnector, PgPoolStatus};
// Queries
pub use crate::query::{PgRow, QueryArgs, QueryExecutor, QueryTemplate, QueryValue};
// Listen/notify
pub use crate::listen::{BridgeState, NotificationBridge, NotificationSignal};
// Error types
pub use crate::{PgError, PgResult};
