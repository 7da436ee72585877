use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use deadpool::managed::{Hook, Pool};
use diesel::QueryResult;
use diesel_async::{AsyncPgConnection, SimpleAsyncConnection};
use diesel_async::pooled_connection::{
    AsyncDieselConnectionManager, ManagerConfig, RecyclingMethod,
};
use futures::FutureExt;
use futures::future::{BoxFuture, try_join_all};
use tokio::sync::Mutex;

use super::custom_hooks;
use crate::error::{DriverError, classify};
use crate::{
    ConnectionPool, JsonCodec, PgConfig, PgError, PgPoolStatus, PgResult, PooledConnection,
    TRACING_TARGET_CLIENT, TRACING_TARGET_CONNECTION,
};

const SLOW_ACQUIRE_THRESHOLD: Duration = Duration::from_millis(100);

/// Run on every connection going back into service. Ends a transaction a
/// caller left open and drops subscriptions left by a listener.
const RECYCLE_STATEMENTS: &str = "ROLLBACK; UNLISTEN *";

/// Resets a connection before the pool hands it out again.
///
/// Uses the simple query protocol so both statements go in one round trip,
/// which also verifies the connection.
fn reset_connection(conn: &mut AsyncPgConnection) -> BoxFuture<'_, QueryResult<()>> {
    conn.batch_execute(RECYCLE_STATEMENTS).boxed()
}

/// Async hook run on every newly created connection.
///
/// Register one with [`PgConnectorBuilder::with_post_connect`].
pub type PostConnectHook = Arc<
    dyn for<'a> Fn(&'a mut AsyncPgConnection) -> BoxFuture<'a, QueryResult<()>> + Send + Sync,
>;

/// Owns the connection pool lifecycle.
///
/// The connector starts closed. [`open`] either builds a pool from the
/// configuration or adopts one supplied by the caller; an adopted pool is
/// never closed by the connector. Cloning is cheap and all clones share the
/// same pool.
///
/// [`open`]: PgConnector::open
#[derive(Clone)]
pub struct PgConnector {
    inner: Arc<PgConnectorInner>,
}

struct PgConnectorInner {
    config: PgConfig,
    codec: JsonCodec,
    post_connect: Option<PostConnectHook>,
    /// Serializes `open` and `close`.
    lifecycle: Mutex<()>,
    state: RwLock<PoolState>,
}

#[derive(Default)]
struct PoolState {
    pool: Option<ConnectionPool>,
    externally_owned: bool,
}

impl PgConnector {
    /// Creates a closed connector with the default JSON codec and no post-connect hook.
    pub fn new(config: PgConfig) -> Self {
        Self::builder(config).build()
    }

    /// Starts building a connector with custom JSON handling or a post-connect hook.
    pub fn builder(config: PgConfig) -> PgConnectorBuilder {
        PgConnectorBuilder {
            config,
            codec: JsonCodec::default(),
            post_connect: None,
        }
    }

    /// Opens the connector by creating a pool from the configuration.
    ///
    /// Does nothing if the connector is already open. The first
    /// `postgres_min_connections` connections are established before
    /// returning, so a bad target fails here rather than on first use.
    #[tracing::instrument(skip(self), target = TRACING_TARGET_CLIENT)]
    pub async fn open(&self) -> PgResult<()> {
        self.open_inner(None).await
    }

    /// Opens the connector with a pool built and owned by the caller.
    ///
    /// Connection parameters from the configuration are ignored, and
    /// [`close`](PgConnector::close) will leave the pool untouched.
    #[tracing::instrument(skip_all, target = TRACING_TARGET_CLIENT)]
    pub async fn open_with_pool(&self, pool: ConnectionPool) -> PgResult<()> {
        self.open_inner(Some(pool)).await
    }

    async fn open_inner(&self, external: Option<ConnectionPool>) -> PgResult<()> {
        let _lifecycle = self.inner.lifecycle.lock().await;

        if self.is_open() {
            tracing::debug!(target: TRACING_TARGET_CLIENT, "Connector already open");
            return Ok(());
        }

        let externally_owned = external.is_some();
        let pool = match external {
            Some(pool) => pool,
            None => self.create_pool()?,
        };

        if pool.is_closed() {
            return Err(PgError::connector_with_message(
                "cannot open connector on a closed pool",
                None,
            ));
        }

        if !externally_owned && let Err(error) = self.warm_up(&pool).await {
            pool.close();
            return Err(error);
        }

        tracing::info!(
            target: TRACING_TARGET_CLIENT,
            externally_owned,
            max_size = pool.status().max_size,
            "Connector opened"
        );

        *self.state_mut() = PoolState {
            pool: Some(pool),
            externally_owned,
        };

        Ok(())
    }

    /// Builds a new pool from the configuration.
    fn create_pool(&self) -> PgResult<ConnectionPool> {
        let config = &self.inner.config;
        config.validate()?;

        tracing::debug!(
            target: TRACING_TARGET_CONNECTION,
            database_url = %config.database_url_masked(),
            min_connections = config.postgres_min_connections,
            max_connections = config.postgres_max_connections,
            "Creating connection pool"
        );

        let mut manager_config = ManagerConfig::default();
        manager_config.custom_setup = Box::new(custom_hooks::setup_callback);
        manager_config.recycling_method =
            RecyclingMethod::CustomFunction(Box::new(reset_connection));
        let manager =
            AsyncDieselConnectionManager::new_with_config(config.database_url(), manager_config);

        Pool::builder(manager)
            .max_size(config.postgres_max_connections as usize)
            .wait_timeout(config.connection_timeout())
            .create_timeout(config.connection_timeout())
            .runtime(deadpool::Runtime::Tokio1)
            .post_create(custom_hooks::post_create(self.inner.post_connect.clone()))
            .pre_recycle(Hook::sync_fn(custom_hooks::pre_recycle))
            .post_recycle(Hook::sync_fn(custom_hooks::post_recycle))
            .build()
            .map_err(|e| {
                tracing::error!(target: TRACING_TARGET_CONNECTION, error = %e, "Failed to create connection pool");
                PgError::connector_with_message(
                    format!("failed to build connection pool: {e}"),
                    Some(Box::new(e)),
                )
            })
    }

    /// Establishes the minimum number of connections up front.
    async fn warm_up(&self, pool: &ConnectionPool) -> PgResult<()> {
        let min_connections = self.inner.config.postgres_min_connections as usize;
        let connections = try_join_all((0..min_connections).map(|_| pool.get()))
            .await
            .map_err(|e| {
                tracing::error!(
                    target: TRACING_TARGET_CONNECTION,
                    error = %e,
                    "Failed to establish initial connections"
                );
                PgError::from(e)
            })?;

        tracing::debug!(
            target: TRACING_TARGET_CONNECTION,
            established = connections.len(),
            "Initial connections established"
        );

        Ok(())
    }

    /// Closes the pool and forgets it, so a later [`open`](PgConnector::open)
    /// creates a fresh one.
    ///
    /// Does nothing if the connector is not open or the pool is owned by the
    /// caller. Connections currently borrowed are dropped when returned.
    #[tracing::instrument(skip(self), target = TRACING_TARGET_CLIENT)]
    pub async fn close(&self) -> PgResult<()> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        let mut state = self.state_mut();

        if state.externally_owned {
            tracing::debug!(target: TRACING_TARGET_CLIENT, "Leaving externally owned pool open");
            return Ok(());
        }

        let Some(pool) = state.pool.take() else {
            return Ok(());
        };

        pool.close();
        tracing::info!(target: TRACING_TARGET_CLIENT, "Connector closed");

        Ok(())
    }

    /// Returns the live pool handle.
    ///
    /// # Errors
    ///
    /// Returns [`PgError::NotOpen`] if called before [`open`](PgConnector::open).
    pub fn pool(&self) -> PgResult<ConnectionPool> {
        self.state().pool.clone().ok_or(PgError::NotOpen)
    }

    /// Borrows a connection from the pool.
    ///
    /// The connection goes back to the pool when dropped.
    pub async fn get_connection(&self) -> PgResult<PooledConnection> {
        let pool = self.pool()?;
        classify(acquire(&pool)).await
    }

    /// Returns whether the connector currently holds a pool.
    #[inline]
    pub fn is_open(&self) -> bool {
        self.state().pool.is_some()
    }

    /// Returns whether the current pool was supplied by the caller.
    #[inline]
    pub fn is_externally_owned(&self) -> bool {
        self.state().externally_owned
    }

    /// Returns the configured maximum size of the live pool.
    pub fn max_size(&self) -> PgResult<usize> {
        Ok(self.pool()?.status().max_size)
    }

    /// Gets the current pool status and statistics.
    pub fn pool_status(&self) -> PgResult<PgPoolStatus> {
        Ok(PgPoolStatus::of(&self.pool()?))
    }

    /// Gets the configuration used by this connector.
    #[inline]
    pub fn config(&self) -> &PgConfig {
        &self.inner.config
    }

    /// Gets the JSON codec used for parameters and rows.
    #[inline]
    pub fn json_codec(&self) -> &JsonCodec {
        &self.inner.codec
    }

    fn state(&self) -> RwLockReadGuard<'_, PoolState> {
        self.inner
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn state_mut(&self) -> RwLockWriteGuard<'_, PoolState> {
        self.inner
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Borrows a connection, reporting the raw pool failure.
pub(crate) async fn acquire(pool: &ConnectionPool) -> Result<PooledConnection, DriverError> {
    tracing::trace!(target: TRACING_TARGET_CONNECTION, "Acquiring connection from pool");

    let start = Instant::now();
    let conn = pool.get().await.map_err(|e| {
        tracing::error!(
            target: TRACING_TARGET_CONNECTION,
            error = %e,
            elapsed = ?start.elapsed(),
            "Failed to acquire connection from pool"
        );
        DriverError::from(e)
    })?;

    let elapsed = start.elapsed();
    if elapsed > SLOW_ACQUIRE_THRESHOLD {
        tracing::warn!(
            target: TRACING_TARGET_CONNECTION,
            elapsed = ?elapsed,
            "Connection acquisition took longer than expected"
        );
    }

    Ok(conn)
}

impl fmt::Debug for PgConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("PgConnector")
            .field("database_url", &self.inner.config.database_url_masked())
            .field("open", &state.pool.is_some())
            .field("externally_owned", &state.externally_owned)
            .field(
                "pool_status",
                &state.pool.as_ref().map(PgPoolStatus::of),
            )
            .finish()
    }
}

/// Builder for [`PgConnector`].
#[must_use = "builders do nothing unless built"]
pub struct PgConnectorBuilder {
    config: PgConfig,
    codec: JsonCodec,
    post_connect: Option<PostConnectHook>,
}

impl PgConnectorBuilder {
    /// Sets the JSON codec used for structured parameters and fetched rows.
    pub fn with_json_codec(mut self, codec: JsonCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Registers a hook run on every newly created connection.
    ///
    /// Ignored when the connector adopts a caller-provided pool.
    pub fn with_post_connect<F>(mut self, hook: F) -> Self
    where
        F: for<'a> Fn(&'a mut AsyncPgConnection) -> BoxFuture<'a, QueryResult<()>>
            + Send
            + Sync
            + 'static,
    {
        self.post_connect = Some(Arc::new(hook));
        self
    }

    /// Builds the connector. It is not open yet.
    pub fn build(self) -> PgConnector {
        PgConnector {
            inner: Arc::new(PgConnectorInner {
                config: self.config,
                codec: self.codec,
                post_connect: self.post_connect,
                lifecycle: Mutex::new(()),
                state: RwLock::new(PoolState::default()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a pool that never connects until a connection is requested.
    fn lazy_pool(max_size: usize) -> ConnectionPool {
        let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(
            "postgresql://taskwire@127.0.0.1:1/unreachable",
        );
        Pool::builder(manager)
            .max_size(max_size)
            .build()
            .expect("pool should build without connecting")
    }

    #[test]
    fn test_pool_before_open_fails() {
        let connector = PgConnector::new(PgConfig::default());
        assert!(!connector.is_open());
        assert!(matches!(connector.pool(), Err(PgError::NotOpen)));
        assert!(matches!(connector.max_size(), Err(PgError::NotOpen)));
    }

    #[tokio::test]
    async fn test_open_with_empty_target_fails_fast() {
        let connector = PgConnector::new(PgConfig::default());
        let error = connector.open().await.unwrap_err();
        assert!(matches!(error, PgError::Config(_)));
        assert!(!connector.is_open());
    }

    #[tokio::test]
    async fn test_open_twice_keeps_pool() {
        let connector = PgConnector::new(PgConfig::default());
        connector.open_with_pool(lazy_pool(4)).await.unwrap();
        let first = connector.pool().unwrap();

        // A second open, even with another pool, is a no-op.
        connector.open_with_pool(lazy_pool(7)).await.unwrap();
        connector.open().await.unwrap();

        let second = connector.pool().unwrap();
        assert_eq!(second.status().max_size, 4);

        // Both handles point at the same pool: closing one closes the other.
        first.close();
        assert!(second.is_closed());
        assert!(connector.pool().unwrap().is_closed());
    }

    #[tokio::test]
    async fn test_close_leaves_external_pool_open() {
        let pool = lazy_pool(3);
        let connector = PgConnector::new(PgConfig::default());
        connector.open_with_pool(pool.clone()).await.unwrap();
        assert!(connector.is_externally_owned());

        connector.close().await.unwrap();

        assert!(!pool.is_closed());
        assert!(connector.is_open());
        assert_eq!(connector.max_size().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_open_rejects_closed_pool() {
        let pool = lazy_pool(2);
        pool.close();

        let connector = PgConnector::new(PgConfig::default());
        let error = connector.open_with_pool(pool).await.unwrap_err();
        assert!(matches!(error, PgError::Connector { .. }));
        assert!(!connector.is_open());
    }

    #[tokio::test]
    async fn test_close_when_not_open_is_noop() {
        let connector = PgConnector::new(PgConfig::default());
        connector.close().await.unwrap();
        assert!(!connector.is_open());
    }

    #[test]
    fn test_debug_masks_url() {
        let connector = PgConnector::new(PgConfig::new("postgresql://u:hunter2@db/jobs"));
        let debug = format!("{connector:?}");
        assert!(debug.contains("***"));
        assert!(!debug.contains("hunter2"));
    }
}
