#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

// Tracing target constants for consistent logging.

/// Tracing target for client-related operations.
///
/// Use this target for logging connector initialization, configuration, and lifecycle events.
pub const TRACING_TARGET_CLIENT: &str = "taskwire_postgres::client";

/// Tracing target for database query operations.
///
/// Use this target for logging query execution, retries, and query-related errors.
pub const TRACING_TARGET_QUERY: &str = "taskwire_postgres::queries";

/// Tracing target for database connection operations.
///
/// Use this target for logging connection establishment, pool management, and connection errors.
pub const TRACING_TARGET_CONNECTION: &str = "taskwire_postgres::connection";

/// Tracing target for the listen/notify bridge.
pub const TRACING_TARGET_LISTEN: &str = "taskwire_postgres::listen";

mod client;
pub mod error;
pub mod listen;
pub mod prelude;
pub mod query;

pub use diesel_async::AsyncPgConnection as PgConnection;

pub use crate::client::{
    ConnectionPool, JsonCodec, PgConfig, PgConnector, PgConnectorBuilder, PgPoolStatus,
    PooledConnection, PostConnectHook,
};
pub use crate::error::{PgError, PgResult};
pub use crate::listen::{BridgeState, NotificationBridge, NotificationSignal};
pub use crate::query::{PgRow, QueryArgs, QueryExecutor, QueryTemplate, QueryValue};
