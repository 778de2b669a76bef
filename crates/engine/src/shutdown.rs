use std::time::Duration;

use tokio::sync::watch;

/// Create a shutdown signal pair. The sender side lives in main; every
/// component holds a cloned [`Shutdown`] handle.
pub fn channel() -> (watch::Sender<bool>, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (tx, Shutdown { rx })
}

/// Cancellation handle passed to every task and into processor invocations.
///
/// Wraps the pool-style watch channel so no component ever does a bare
/// unconditional sleep on a request path: all waiting goes through
/// [`Shutdown::sleep`], which wakes promptly when shutdown is signaled.
#[derive(Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until shutdown is signaled. Returns immediately if it already was.
    /// A dropped sender counts as shutdown.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Sleep for `duration` or until shutdown, whichever comes first.
    /// Returns `true` if the full duration elapsed.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.cancelled() => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sleep_completes_without_signal() {
        let (_tx, shutdown) = channel();
        assert!(shutdown.sleep(Duration::from_millis(5)).await);
    }

    #[tokio::test]
    async fn test_sleep_wakes_on_signal() {
        let (tx, shutdown) = channel();
        let handle = tokio::spawn(async move { shutdown.sleep(Duration::from_secs(30)).await });
        tx.send(true).unwrap();
        let completed = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(!completed);
    }

    #[tokio::test]
    async fn test_dropped_sender_counts_as_shutdown() {
        let (tx, shutdown) = channel();
        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), shutdown.cancelled())
            .await
            .unwrap();
    }
}
