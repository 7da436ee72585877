//! Query execution: named parameters, SQL templates and stale-connection retries.
//!
//! Every operation of [`QueryExecutor`] is composed the same way, outermost
//! first: error classification, then [`StaleConnectionRetry`], then a single
//! round trip on a borrowed connection.

mod executor;
mod params;
mod retry;
mod template;

pub use executor::{PgRow, QueryExecutor};
pub use params::{QueryArgs, QueryValue};
pub use retry::{RetryError, StaleConnectionRetry};
pub use template::{LISTEN_QUEUE, QueryTemplate, quote_identifier};
