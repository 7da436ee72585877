//! Includes all callbacks and hooks for [`diesel_async`] and [`deadpool`].

use std::time::Instant;

use deadpool::managed::{Hook, HookError, HookResult, Metrics};
use diesel::ConnectionResult;
use diesel_async::pooled_connection::{
    AsyncDieselConnectionManager, PoolError, PoolableConnection,
};
use diesel_async::{AsyncConnection, AsyncPgConnection};
use futures::FutureExt;
use futures::future::BoxFuture;

use super::pg_config::mask_url;
use super::pg_connector::PostConnectHook;
use crate::TRACING_TARGET_CONNECTION;

/// Custom setup procedure used to establish a new connection.
///
/// See [`ManagerConfig`] and [`SetupCallback`] for more details.
///
/// [`ManagerConfig`]: diesel_async::pooled_connection::ManagerConfig
/// [`SetupCallback`]: diesel_async::pooled_connection::SetupCallback
pub fn setup_callback<C>(addr: &str) -> BoxFuture<'_, ConnectionResult<C>>
where
    C: AsyncConnection + 'static,
{
    let start = Instant::now();
    let masked_addr = mask_url(addr);

    tracing::debug!(
        target: TRACING_TARGET_CONNECTION,
        hook = "setup_callback",
        addr = %masked_addr,
        "Establishing new database connection"
    );

    async move {
        let result = C::establish(addr).await;
        let elapsed = start.elapsed();

        match &result {
            Ok(_) => {
                tracing::info!(
                    target: TRACING_TARGET_CONNECTION,
                    hook = "setup_callback",
                    addr = %masked_addr,
                    elapsed_ms = elapsed.as_millis(),
                    "Database connection established"
                );
            }
            Err(err) => {
                tracing::error!(
                    target: TRACING_TARGET_CONNECTION,
                    hook = "setup_callback",
                    addr = %masked_addr,
                    elapsed_ms = elapsed.as_millis(),
                    error = %err,
                    "Failed to establish database connection"
                );
            }
        }

        result
    }
    .boxed()
}

/// Builds the hook run after a new connection has been established.
///
/// The caller's post-connect hook, if any, runs after the built-in checks.
/// Its failures are handed back to deadpool as backend errors so that
/// acquiring a connection reports them through the regular classifier.
pub fn post_create(
    custom: Option<PostConnectHook>,
) -> Hook<AsyncDieselConnectionManager<AsyncPgConnection>> {
    Hook::async_fn(move |conn: &mut AsyncPgConnection, metrics: &Metrics| {
        let custom = custom.clone();

        async move {
            let is_broken = conn.is_broken();

            tracing::debug!(
                target: TRACING_TARGET_CONNECTION,
                hook = "post_create",
                is_broken = is_broken,
                created_at = ?metrics.created,
                "Connection created and added to pool"
            );

            if is_broken {
                return Err(HookError::<PoolError>::Message(
                    "connection is broken right after creation".into(),
                ));
            }

            if let Some(custom) = custom {
                custom(conn).await.map_err(|error| {
                    tracing::error!(
                        target: TRACING_TARGET_CONNECTION,
                        hook = "post_create",
                        error = %error,
                        "Post-connect hook failed"
                    );
                    HookError::Backend(PoolError::QueryError(error))
                })?;
            }

            Ok::<_, HookError<PoolError>>(())
        }
        .boxed()
    })
}

/// Custom hook called before a connection has been recycled.
///
/// See [`PoolBuilder`] for more details.
///
/// [`PoolBuilder`]: deadpool::managed::PoolBuilder
pub fn pre_recycle(conn: &mut AsyncPgConnection, metrics: &Metrics) -> HookResult<PoolError> {
    let is_broken = conn.is_broken();

    tracing::trace!(
        target: TRACING_TARGET_CONNECTION,
        hook = "pre_recycle",
        is_broken = is_broken,
        last_recycled = ?metrics.recycled,
        recycle_count = metrics.recycle_count,
        "Preparing to recycle connection"
    );

    if is_broken {
        tracing::warn!(
            target: TRACING_TARGET_CONNECTION,
            hook = "pre_recycle",
            recycle_count = metrics.recycle_count,
            "Connection is broken before recycling"
        );
    }

    Ok(())
}

/// Custom hook called after a connection has been recycled.
pub fn post_recycle(conn: &mut AsyncPgConnection, metrics: &Metrics) -> HookResult<PoolError> {
    if conn.is_broken() {
        tracing::error!(
            target: TRACING_TARGET_CONNECTION,
            hook = "post_recycle",
            recycle_count = metrics.recycle_count,
            "Connection is broken after recycling, should be removed from pool"
        );
    }

    Ok(())
}
