//! Listen/notify bridge.
//!
//! A [`NotificationBridge`] holds one dedicated connection subscribed to a set
//! of channels and sets a shared [`NotificationSignal`] whenever something is
//! published on them. Consumers wait on the signal, clear it, and look at the
//! database again.
//!
//! ```rust,no_run
//! use taskwire_postgres::{NotificationBridge, NotificationSignal, PgConfig, PgConnector};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> taskwire_postgres::PgResult<()> {
//! let connector = PgConnector::new(PgConfig::new("postgresql://localhost/jobs"));
//! connector.open().await?;
//!
//! let signal = NotificationSignal::new();
//! let bridge = NotificationBridge::new(connector.clone(), signal.clone(), ["jobs"]);
//! let handle = bridge.spawn(CancellationToken::new());
//!
//! loop {
//!     signal.wait().await;
//!     signal.clear();
//!     // fetch new jobs
//! #   break;
//! }
//! # handle.abort();
//! # Ok(())
//! # }
//! ```

mod bridge;
mod signal;

pub use bridge::{
    BridgeState, ListenConnection, Notification, NotificationBridge, NotificationConnection,
    NotificationPoll, NotificationSource,
};
pub use signal::NotificationSignal;
