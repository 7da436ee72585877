use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// Level-triggered flag shared between the notification bridge and its consumers.
///
/// The bridge only ever sets it. Consumers clear it before going back to
/// sleep, so a notification that arrives between a wake-up and the next wait
/// is never lost.
#[derive(Debug, Clone)]
pub struct NotificationSignal {
    flag: Arc<watch::Sender<bool>>,
}

impl NotificationSignal {
    /// Creates a cleared signal.
    pub fn new() -> Self {
        let (flag, _) = watch::channel(false);
        Self {
            flag: Arc::new(flag),
        }
    }

    /// Sets the flag and wakes every waiter.
    pub fn set(&self) {
        self.flag.send_replace(true);
    }

    /// Clears the flag.
    pub fn clear(&self) {
        self.flag.send_replace(false);
    }

    /// Returns whether the flag is set.
    pub fn is_set(&self) -> bool {
        *self.flag.borrow()
    }

    /// Waits until the flag is set. Returns immediately if it already is.
    pub async fn wait(&self) {
        let mut receiver = self.flag.subscribe();
        // The sender lives in `self`, so the channel cannot close while waiting.
        let _ = receiver.wait_for(|set| *set).await;
    }

    /// Waits until the flag is set or `timeout` elapses.
    ///
    /// Returns whether the flag was set.
    pub async fn wait_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait()).await.is_ok()
    }
}

impl Default for NotificationSignal {
    fn default() -> Self {
        Self::new()
    }
}
