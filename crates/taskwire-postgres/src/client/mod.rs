//! PostgreSQL connector with connection pooling.
//!
//! This module owns the pool lifecycle: configuration, construction (or adoption
//! of a caller-provided pool), per-connection hooks and shutdown. Queries and
//! the listen/notify bridge borrow connections from the pool managed here.

pub(crate) mod custom_hooks;
mod json_codec;
mod pg_config;
mod pg_connector;
mod pool_status;

use deadpool::managed::{Object, Pool};
use diesel_async::AsyncPgConnection;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
pub use json_codec::JsonCodec;
pub use pg_config::PgConfig;
pub(crate) use pg_connector::acquire;
pub use pg_connector::{PgConnector, PgConnectorBuilder, PostConnectHook};
pub use pool_status::PgPoolStatus;

/// Type alias for the connection pool used throughout the crate.
pub type ConnectionPool = Pool<AsyncDieselConnectionManager<AsyncPgConnection>>;

/// Type alias for a connection object from the pool.
pub type PooledConnection = Object<AsyncDieselConnectionManager<AsyncPgConnection>>;
