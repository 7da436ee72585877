use std::convert::Infallible;
use std::future::Future;
use std::time::Duration;

use derive_more::{Deref, DerefMut};
use diesel::result::Error as DieselError;
use diesel_async::SimpleAsyncConnection;
use diesel_async::pooled_connection::PoolableConnection;
use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::NotificationSignal;
use crate::client::acquire;
use crate::error::DriverError;
use crate::query::LISTEN_QUEUE;
use crate::{PgConnector, PgResult, PooledConnection, TRACING_TARGET_LISTEN};

/// Query used to check an idle listening connection.
const LIVENESS_PROBE: &str = "SELECT 1";

/// Ends any transaction the connection is still in, so `LISTEN` takes
/// effect immediately.
const END_TRANSACTION: &str = "ROLLBACK";

/// Where the bridge is in its subscribe/listen cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BridgeState {
    /// Not running, or stopped.
    Idle,
    /// Acquiring a dedicated connection and issuing `LISTEN` statements.
    Subscribing,
    /// Subscribed to every channel and waiting for notifications.
    Listening,
}

/// A notification delivered on one of the subscribed channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Backend process that sent the notification.
    pub process_id: i32,
    /// Channel it was sent on.
    pub channel: String,
    /// Payload, possibly empty.
    pub payload: String,
}

/// Outcome of waiting on a listening connection.
#[derive(Debug)]
pub enum NotificationPoll {
    /// A notification arrived.
    Notification(Notification),
    /// Nothing arrived before the wait elapsed.
    Idle,
    /// The connection reported a failure.
    Failed(DriverError),
    /// The connection will not deliver anything else.
    Ended,
}

/// Hands out dedicated connections to the bridge.
pub trait NotificationSource: Send + Sync {
    /// Connection type used for listening.
    type Connection: NotificationConnection;

    /// Returns the maximum size of the pool connections are taken from.
    fn pool_max_size(&self) -> PgResult<usize>;

    /// Returns how long to wait for a notification before re-checking the connection.
    fn listen_timeout(&self) -> Duration;

    /// Acquires a connection that stays with the bridge until it closes.
    fn acquire(&self) -> impl Future<Output = PgResult<Self::Connection>> + Send;
}

/// A connection able to subscribe to channels and deliver notifications.
pub trait NotificationConnection: Send {
    /// Makes sure statements are committed as they run, so notifications are
    /// delivered rather than held back by an open transaction.
    fn set_autocommit(&mut self) -> impl Future<Output = Result<(), DriverError>> + Send;

    /// Runs a statement without parameters.
    fn execute(&mut self, statement: &str) -> impl Future<Output = Result<(), DriverError>> + Send;

    /// Waits up to `wait` for the next notification.
    fn next_notification(&mut self, wait: Duration) -> impl Future<Output = NotificationPoll> + Send;

    /// Checks that the connection still works, marking it closed if not.
    fn ping(&mut self) -> impl Future<Output = Result<(), DriverError>> + Send;

    /// Returns whether the connection is known to be unusable.
    fn is_closed(&mut self) -> bool;
}

/// Pooled connection dedicated to listening.
#[derive(Deref, DerefMut)]
pub struct ListenConnection {
    #[deref]
    #[deref_mut]
    conn: PooledConnection,
    closed: bool,
}

impl ListenConnection {
    fn new(conn: PooledConnection) -> Self {
        Self {
            conn,
            closed: false,
        }
    }
}

impl NotificationConnection for ListenConnection {
    async fn set_autocommit(&mut self) -> Result<(), DriverError> {
        if self.conn.is_broken() {
            return Err(DriverError::Query(DieselError::BrokenTransactionManager));
        }
        // Outside a transaction every statement commits on its own; a
        // server-side transaction left open by an earlier borrower is ended here.
        self.conn.batch_execute(END_TRANSACTION).await?;
        Ok(())
    }

    async fn execute(&mut self, statement: &str) -> Result<(), DriverError> {
        self.conn.batch_execute(statement).await?;
        Ok(())
    }

    async fn next_notification(&mut self, wait: Duration) -> NotificationPoll {
        let received = {
            let stream = self.conn.notifications_stream();
            futures::pin_mut!(stream);
            tokio::time::timeout(wait, stream.next()).await
        };

        match received {
            Ok(Some(Ok(notification))) => NotificationPoll::Notification(Notification {
                process_id: notification.process_id,
                channel: notification.channel,
                payload: notification.payload,
            }),
            Ok(Some(Err(error))) => NotificationPoll::Failed(error.into()),
            Ok(None) => {
                self.closed = true;
                NotificationPoll::Ended
            }
            Err(_elapsed) => match self.ping().await {
                Ok(()) => NotificationPoll::Idle,
                Err(error) => NotificationPoll::Failed(error),
            },
        }
    }

    async fn ping(&mut self) -> Result<(), DriverError> {
        if let Err(error) = self.conn.batch_execute(LIVENESS_PROBE).await {
            self.closed = true;
            return Err(error.into());
        }
        Ok(())
    }

    fn is_closed(&mut self) -> bool {
        self.closed || self.conn.is_broken()
    }
}

impl NotificationSource for PgConnector {
    type Connection = ListenConnection;

    fn pool_max_size(&self) -> PgResult<usize> {
        self.max_size()
    }

    fn listen_timeout(&self) -> Duration {
        self.config().listen_timeout()
    }

    async fn acquire(&self) -> PgResult<ListenConnection> {
        let pool = self.pool()?;
        let conn = acquire(&pool).await?;
        Ok(ListenConnection::new(conn))
    }
}

/// Keeps a dedicated connection subscribed to a set of channels and turns
/// every notification into a [`NotificationSignal`] wake-up.
///
/// When the connection is lost the bridge acquires a new one and subscribes
/// again; notifications sent in between are lost, which is fine because the
/// signal only tells consumers to look at the database again. Any other
/// failure stops the bridge and is returned to the caller.
///
/// The bridge refuses to run on a pool with a single connection, since
/// holding it would starve every other query.
pub struct NotificationBridge<S = PgConnector> {
    source: S,
    signal: NotificationSignal,
    channels: Vec<String>,
    state: watch::Sender<BridgeState>,
}

impl<S: NotificationSource> NotificationBridge<S> {
    /// Creates a bridge for the given channels. Nothing runs until [`run`] or [`spawn`].
    ///
    /// [`run`]: NotificationBridge::run
    /// [`spawn`]: NotificationBridge::spawn
    pub fn new<I>(source: S, signal: NotificationSignal, channels: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let (state, _) = watch::channel(BridgeState::Idle);
        Self {
            source,
            signal,
            channels: channels.into_iter().map(Into::into).collect(),
            state,
        }
    }

    /// Subscribes to state changes.
    pub fn state(&self) -> watch::Receiver<BridgeState> {
        self.state.subscribe()
    }

    /// Returns the signal set by this bridge.
    pub fn signal(&self) -> &NotificationSignal {
        &self.signal
    }

    /// Returns the channels this bridge subscribes to, in order.
    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    /// Runs the bridge until it fails.
    ///
    /// Returns `Ok(())` straight away if the pool's maximum size is 1.
    pub async fn run(&self) -> PgResult<()> {
        let max_size = self.source.pool_max_size()?;
        if max_size == 1 {
            tracing::warn!(
                target: TRACING_TARGET_LISTEN,
                action = "listen_notify_disabled",
                max_size,
                "Listen/notify disabled because the pool maximum size is 1"
            );
            return Ok(());
        }

        let statements = self
            .channels
            .iter()
            .map(|channel| LISTEN_QUEUE.format_identifiers(&[("channel_name", channel)]))
            .collect::<PgResult<Vec<_>>>()?;

        let result = self.listen(&statements).await;
        self.state.send_replace(BridgeState::Idle);

        match result {
            Ok(never) => match never {},
            Err(error) => {
                tracing::error!(target: TRACING_TARGET_LISTEN, error = %error, "Notification bridge stopped");
                Err(error)
            }
        }
    }

    /// Runs the bridge on a new task until it fails or `cancel` fires.
    ///
    /// Cancellation drops the dedicated connection and resolves to `Ok(())`.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<PgResult<()>>
    where
        S: 'static,
    {
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!(target: TRACING_TARGET_LISTEN, "Notification bridge cancelled");
                    self.state.send_replace(BridgeState::Idle);
                    Ok(())
                }
                result = self.run() => result,
            }
        })
    }

    async fn listen(&self, statements: &[String]) -> PgResult<Infallible> {
        let wait = self.source.listen_timeout();

        loop {
            self.state.send_replace(BridgeState::Subscribing);
            tracing::debug!(target: TRACING_TARGET_LISTEN, channels = ?self.channels, "Subscribing");

            let mut conn = self.source.acquire().await?;
            conn.set_autocommit().await?;
            for statement in statements {
                conn.execute(statement).await?;
            }

            self.signal.set();
            self.state.send_replace(BridgeState::Listening);
            tracing::info!(target: TRACING_TARGET_LISTEN, channels = ?self.channels, "Listening for notifications");

            self.consume(&mut conn, wait).await?;

            tracing::warn!(target: TRACING_TARGET_LISTEN, "Listening connection closed, subscribing again");
        }
    }

    /// Forwards notifications until the connection closes.
    async fn consume(&self, conn: &mut S::Connection, wait: Duration) -> Result<(), DriverError> {
        while !conn.is_closed() {
            match conn.next_notification(wait).await {
                NotificationPoll::Notification(notification) => {
                    tracing::trace!(
                        target: TRACING_TARGET_LISTEN,
                        channel = %notification.channel,
                        process_id = notification.process_id,
                        "Notification received"
                    );
                    self.signal.set();
                }
                NotificationPoll::Idle => {}
                NotificationPoll::Failed(error) if error.is_operational() => {
                    tracing::debug!(target: TRACING_TARGET_LISTEN, error = %error, "Listening connection failed");
                    if let Err(error) = conn.ping().await {
                        tracing::debug!(target: TRACING_TARGET_LISTEN, error = %error, "Listening connection is gone");
                    }
                }
                NotificationPoll::Failed(error) => return Err(error),
                NotificationPoll::Ended => break,
            }
        }

        Ok(())
    }
}

impl PgConnector {
    /// Runs a [`NotificationBridge`] for `channels` on this connector until it fails.
    pub async fn listen_notify<I>(&self, signal: NotificationSignal, channels: I) -> PgResult<()>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        NotificationBridge::new(self.clone(), signal, channels)
            .run()
            .await
    }
}
