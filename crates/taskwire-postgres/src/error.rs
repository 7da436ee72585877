//! Error types and the driver-failure classifier.
//!
//! Every public entry point of this crate reports failures as [`PgError`].
//! Raw driver failures travel as [`DriverError`] until they cross the
//! classification boundary ([`classify`] or `PgError::from`), so callers never
//! see a diesel or deadpool type.

use std::borrow::Cow;
use std::future::Future;

pub use deadpool::managed::{HookError, TimeoutType};
pub use diesel::result::{
    ConnectionError as DieselConnectionError, DatabaseErrorKind, Error as DieselError,
};
pub use diesel_async::pooled_connection::PoolError as DieselPoolError;
pub use diesel_async::pooled_connection::deadpool::PoolError as DeadpoolError;

use crate::TRACING_TARGET_QUERY;

/// Type-erased error type for dynamic error handling.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Messages reported when the server dropped a connection that was still
/// sitting in the pool.
const STALE_CONNECTION_MESSAGES: &[&str] = &[
    "server closed the connection unexpectedly",
    "terminating connection due to administrator command",
];

/// Provides contextual hints for error types to aid in debugging and user messaging.
pub trait ErrorHint {
    /// Returns an additional hint for an error type.
    fn hint(&self) -> Cow<'static, str>;
}

impl ErrorHint for TimeoutType {
    fn hint(&self) -> Cow<'static, str> {
        match self {
            TimeoutType::Wait => Cow::Borrowed(
                "Connection pool is exhausted, consider increasing pool size or optimizing query performance",
            ),
            TimeoutType::Create => Cow::Borrowed(
                "Unable to establish new database connection, check connection string and database availability",
            ),
            TimeoutType::Recycle => Cow::Borrowed(
                "Failed to recycle database connection, connection may be in invalid state",
            ),
        }
    }
}

/// Error type for all connector operations.
///
/// The set of variants is closed: driver failures always end up as either
/// [`PgError::UniqueViolation`] or [`PgError::Connector`].
#[derive(Debug, thiserror::Error)]
#[must_use = "database errors should be handled appropriately"]
pub enum PgError {
    /// A uniqueness constraint rejected the statement.
    ///
    /// Carries the constraint name reported by the server so callers can tell
    /// an expected conflict (e.g. a duplicate job) from a real failure.
    #[error(
        "Unique constraint violation: {}",
        constraint_name.as_deref().unwrap_or("<unnamed>")
    )]
    UniqueViolation {
        /// Name of the violated constraint, verbatim.
        constraint_name: Option<String>,
    },

    /// Any other database failure. The original cause is kept as `source`.
    #[error("Database connector error: {message}")]
    Connector {
        /// Human readable description.
        message: Cow<'static, str>,
        /// The raw failure, if any.
        #[source]
        source: Option<BoxError>,
    },

    /// The pool was accessed before [`PgConnector::open`] was called.
    ///
    /// [`PgConnector::open`]: crate::PgConnector::open
    #[error("Connector is not open, call `open` first")]
    NotOpen,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The query template and its arguments do not fit together.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
}

impl PgError {
    /// Creates a generic connector error wrapping `source`.
    pub fn connector(source: impl Into<BoxError>) -> Self {
        let source = source.into();
        Self::Connector {
            message: source.to_string().into(),
            source: Some(source),
        }
    }

    /// Creates a generic connector error with a message and an optional cause.
    pub fn connector_with_message(
        message: impl Into<Cow<'static, str>>,
        source: Option<BoxError>,
    ) -> Self {
        Self::Connector {
            message: message.into(),
            source,
        }
    }

    /// Returns the violated constraint name for unique violations.
    pub fn constraint(&self) -> Option<&str> {
        match self {
            Self::UniqueViolation { constraint_name } => constraint_name.as_deref(),
            _ => None,
        }
    }

    /// Returns whether this error is a unique constraint violation.
    #[inline]
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Self::UniqueViolation { .. })
    }
}

/// A driver failure before classification.
///
/// Only the query retrier and the listen loop look inside this type; everything
/// else converts it into [`PgError`] straight away.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// Query execution failed.
    #[error(transparent)]
    Query(#[from] DieselError),

    /// Establishing a connection failed.
    #[error(transparent)]
    Connection(#[from] DieselConnectionError),

    /// The pool could not hand out a connection.
    #[error(transparent)]
    Pool(#[from] DeadpoolError),
}

impl DriverError {
    /// Returns the query error, looking through pool wrappers.
    pub fn query_error(&self) -> Option<&DieselError> {
        match self {
            Self::Query(error)
            | Self::Pool(DeadpoolError::Backend(DieselPoolError::QueryError(error)))
            | Self::Pool(DeadpoolError::PostCreateHook(HookError::Backend(
                DieselPoolError::QueryError(error),
            ))) => Some(error),
            _ => None,
        }
    }

    /// Returns the connection error, looking through pool wrappers.
    pub fn connection_error(&self) -> Option<&DieselConnectionError> {
        match self {
            Self::Connection(error)
            | Self::Pool(DeadpoolError::Backend(DieselPoolError::ConnectionError(error)))
            | Self::Pool(DeadpoolError::PostCreateHook(HookError::Backend(
                DieselPoolError::ConnectionError(error),
            ))) => Some(error),
            _ => None,
        }
    }

    /// Returns whether the server closed a pooled connection under us.
    ///
    /// This is the only condition the query retrier recovers from. Besides the
    /// libpq text "server closed the connection unexpectedly", it accepts
    /// `ClosedConnection` and the "terminating connection due to administrator
    /// command" message: `tokio-postgres` never produces the libpq text, and
    /// reports the same event (a backend killed while the connection sat idle
    /// in the pool) in one of those two forms.
    pub fn is_stale_connection(&self) -> bool {
        if let Some(DieselError::DatabaseError(kind, info)) = self.query_error() {
            return matches!(kind, DatabaseErrorKind::ClosedConnection)
                || mentions_stale_connection(info.message());
        }

        match self.connection_error() {
            Some(DieselConnectionError::BadConnection(message)) => {
                mentions_stale_connection(message)
            }
            _ => false,
        }
    }

    /// Returns whether this is a connection-level (operational) failure rather
    /// than a problem with the statement itself.
    pub fn is_operational(&self) -> bool {
        if self.is_stale_connection() || self.connection_error().is_some() {
            return true;
        }

        matches!(
            self.query_error(),
            Some(DieselError::DatabaseError(
                DatabaseErrorKind::ClosedConnection | DatabaseErrorKind::UnableToSendCommand,
                _
            ))
        )
    }
}

fn mentions_stale_connection(message: &str) -> bool {
    STALE_CONNECTION_MESSAGES
        .iter()
        .any(|needle| message.contains(needle))
}

impl From<DriverError> for PgError {
    fn from(error: DriverError) -> Self {
        if let Some(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info)) =
            error.query_error()
        {
            return Self::UniqueViolation {
                constraint_name: info.constraint_name().map(str::to_owned),
            };
        }

        if let DriverError::Pool(DeadpoolError::Timeout(timeout)) = &error {
            tracing::warn!(
                target: TRACING_TARGET_QUERY,
                hint = %timeout.hint(),
                "Connection pool timed out"
            );
        }

        Self::connector(error)
    }
}

impl From<DieselError> for PgError {
    fn from(error: DieselError) -> Self {
        DriverError::from(error).into()
    }
}

impl From<DieselConnectionError> for PgError {
    fn from(error: DieselConnectionError) -> Self {
        DriverError::from(error).into()
    }
}

impl From<DeadpoolError> for PgError {
    fn from(error: DeadpoolError) -> Self {
        DriverError::from(error).into()
    }
}

/// Awaits `operation` and classifies whatever failure it produces.
///
/// This is the outermost layer of every public operation: retries run inside
/// it so they still see the raw driver failure.
pub async fn classify<T, E>(operation: impl Future<Output = Result<T, E>>) -> PgResult<T>
where
    E: Into<PgError>,
{
    operation.await.map_err(|error| {
        let error = error.into();
        tracing::debug!(target: TRACING_TARGET_QUERY, error = %error, "Database operation failed");
        error
    })
}

/// Specialized [`Result`] type for connector operations.
pub type PgResult<T, E = PgError> = Result<T, E>;
