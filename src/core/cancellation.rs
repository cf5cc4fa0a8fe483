//! Cooperative cancellation shared by deliveries, fan-outs and polling loops.
//!
//! A signal is a one-way latch: once fired it stays fired. Every clone observes
//! the same latch.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

#[derive(Clone, Debug)]
pub struct CancellationSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl CancellationSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// A signal nobody holds a handle to fire. Only useful where a signal is
    /// required but the caller never cancels.
    pub fn never() -> Self {
        Self::new()
    }

    /// Fire the signal. Calling more than once is harmless.
    pub fn cancel(&self) {
        let was_cancelled = self.tx.send_replace(true);
        if !was_cancelled {
            debug!("cancellation signal fired");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the signal has fired. Resolves immediately if it already has.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives inside self, so the channel cannot close while we wait.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Fire the signal once `delay` elapses. Timeouts are built this way rather
    /// than inside the operations that observe the signal.
    pub fn cancel_after(&self, delay: Duration) -> tokio::task::JoinHandle<()> {
        let signal = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => signal.cancel(),
                _ = signal.cancelled() => {}
            }
        })
    }

    /// A new signal that fires when this one fires, but can also be fired on its
    /// own without affecting this one.
    pub fn child(&self) -> CancellationSignal {
        let child = CancellationSignal::new();
        if self.is_cancelled() {
            child.cancel();
            return child;
        }

        let parent = self.clone();
        let linked = child.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = parent.cancelled() => linked.cancel(),
                _ = linked.cancelled() => {}
            }
        });
        child
    }
}

impl Default for CancellationSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancel_is_permanent_and_shared() {
        let signal = CancellationSignal::new();
        let observer = signal.clone();
        assert!(!observer.is_cancelled());

        signal.cancel();
        signal.cancel();

        assert!(observer.is_cancelled());
        observer.cancelled().await;
        assert!(signal.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_after_fires() {
        let signal = CancellationSignal::new();
        signal.cancel_after(Duration::from_millis(20));

        tokio::time::timeout(Duration::from_secs(2), signal.cancelled())
            .await
            .expect("signal should fire after the delay");
        assert!(signal.is_cancelled());
    }

    #[tokio::test]
    async fn test_child_follows_parent_but_not_reverse() {
        let parent = CancellationSignal::new();
        let child = parent.child();
        child.cancel();
        assert!(!parent.is_cancelled());

        let second = parent.child();
        parent.cancel();
        tokio::time::timeout(Duration::from_secs(2), second.cancelled())
            .await
            .expect("child should follow parent");
    }
}
