//! Retry policy for pooled connections the server closed while they were idle.

use std::future::Future;

use crate::error::DriverError;
use crate::{PgError, TRACING_TARGET_QUERY};

/// Retries an operation while it keeps failing on a stale pooled connection.
///
/// The budget is the pool's maximum size plus one: if every pooled connection
/// went stale at once, each attempt discards one of them and the last attempt
/// runs on a freshly created connection. This is a heuristic; it assumes no
/// other task is draining the pool concurrently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaleConnectionRetry {
    max_tries: usize,
}

/// Why a retried operation gave up.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// The operation failed with an error that is not retried.
    #[error(transparent)]
    Aborted(E),

    /// Every attempt failed on a stale connection.
    #[error("could not get a valid connection after {tries} tries")]
    Exhausted {
        /// Number of attempts made.
        tries: usize,
        /// Failure observed on the last attempt.
        #[source]
        last: E,
    },
}

impl StaleConnectionRetry {
    /// Creates the policy for a pool with the given maximum size.
    pub fn for_pool_size(max_size: usize) -> Self {
        Self {
            max_tries: max_size.saturating_add(1),
        }
    }

    /// Returns the total number of attempts, including the first one.
    #[inline]
    pub fn max_tries(&self) -> usize {
        self.max_tries
    }

    /// Runs `operation` until it succeeds, fails with a non-stale error, or the
    /// budget is spent.
    pub async fn run<F, Fut, T>(&self, mut operation: F) -> Result<T, RetryError<DriverError>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DriverError>>,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;

            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if !error.is_stale_connection() {
                return Err(RetryError::Aborted(error));
            }

            if attempt >= self.max_tries {
                tracing::error!(
                    target: TRACING_TARGET_QUERY,
                    tries = attempt,
                    error = %error,
                    "Giving up on stale connections"
                );
                return Err(RetryError::Exhausted {
                    tries: attempt,
                    last: error,
                });
            }

            tracing::warn!(
                target: TRACING_TARGET_QUERY,
                attempt,
                max_tries = self.max_tries,
                error = %error,
                "Connection was closed by the server, retrying on another one"
            );
        }
    }
}

impl From<RetryError<DriverError>> for PgError {
    fn from(error: RetryError<DriverError>) -> Self {
        match error {
            RetryError::Aborted(error) => error.into(),
            exhausted @ RetryError::Exhausted { .. } => {
                PgError::connector_with_message(exhausted.to_string(), Some(Box::new(exhausted)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::error::tests::{database_error, stale_connection_error};
    use crate::error::{DatabaseErrorKind, classify};

    #[test]
    fn test_budget_is_pool_size_plus_one() {
        assert_eq!(StaleConnectionRetry::for_pool_size(10).max_tries(), 11);
        assert_eq!(StaleConnectionRetry::for_pool_size(1).max_tries(), 2);
    }

    #[tokio::test]
    async fn test_recovers_after_stale_connections() {
        let policy = StaleConnectionRetry::for_pool_size(3);
        let calls = Arc::new(AtomicUsize::new(0));

        let result = policy
            .run(|| {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 3 {
                        Err(stale_connection_error())
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_exhausts_after_pool_size_plus_one_tries() {
        let policy = StaleConnectionRetry::for_pool_size(4);
        let calls = Arc::new(AtomicUsize::new(0));

        let result: Result<(), _> = policy
            .run(|| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(stale_connection_error())
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 5);

        let error = PgError::from(result.unwrap_err());
        assert!(error.to_string().contains("after 5 tries"));

        let cause = error.source().expect("retry error should be chained");
        let last = cause.source().expect("last failure should be chained");
        assert!(last.to_string().contains("server closed the connection"));
    }

    #[tokio::test]
    async fn test_other_failures_are_not_retried() {
        let policy = StaleConnectionRetry::for_pool_size(10);
        let calls = Arc::new(AtomicUsize::new(0));

        let result: Result<(), _> = policy
            .run(|| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(DriverError::Query(database_error(
                        DatabaseErrorKind::Unknown,
                        "could not serialize access due to concurrent update",
                    )))
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(RetryError::Aborted(_))));
    }

    #[tokio::test]
    async fn test_classification_wraps_retry() {
        let policy = StaleConnectionRetry::for_pool_size(0);
        let result: crate::PgResult<()> =
            classify(policy.run(|| async { Err(stale_connection_error()) })).await;

        assert!(matches!(result, Err(PgError::Connector { .. })));
    }
}
