use anyhow::Context;
use taskwire_postgres::{NotificationBridge, NotificationSignal, PgConnector};
use tokio_util::sync::CancellationToken;

use super::shutdown::shutdown_signal;
use crate::TRACING_TARGET_COMMAND;
use crate::config::ListenCommand;

/// Runs the notification bridge until interrupted or until it fails.
pub async fn run(connector: &PgConnector, command: ListenCommand) -> anyhow::Result<()> {
    let signal = NotificationSignal::new();
    let bridge = NotificationBridge::new(connector.clone(), signal.clone(), command.channels);
    let mut state = bridge.state();

    let cancel = CancellationToken::new();
    let mut bridge = bridge.spawn(cancel.clone());

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let mut wakeups: u64 = 0;

    loop {
        tokio::select! {
            () = &mut shutdown => break,
            joined = &mut bridge => {
                joined
                    .context("notification bridge panicked")?
                    .context("notification bridge failed")?;
                tracing::info!(target: TRACING_TARGET_COMMAND, "Notification bridge stopped");
                return Ok(());
            }
            () = signal.wait() => {
                signal.clear();
                wakeups += 1;
                tracing::info!(target: TRACING_TARGET_COMMAND, wakeups, "Woken up");
            }
            Ok(()) = state.changed() => {
                let current = *state.borrow_and_update();
                tracing::debug!(target: TRACING_TARGET_COMMAND, state = ?current, "Bridge state changed");
            }
        }
    }

    cancel.cancel();
    bridge
        .await
        .context("notification bridge panicked")?
        .context("notification bridge failed")?;

    tracing::info!(target: TRACING_TARGET_COMMAND, wakeups, "Stopped listening");
    Ok(())
}
