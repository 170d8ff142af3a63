//! Debounced "jobs available" pings.
//!
//! Connected runner sessions subscribe and re-poll when pinged; this only
//! shaves poll latency and is never required for correctness, so sends are
//! best-effort and dropped receivers are ignored.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::debug;

/// Coalescing notifier: one pending timer per channel. Signals arriving
/// while a timer is armed are absorbed by it rather than stacking further
/// timers, so a burst of new jobs produces a single ping per window.
pub struct AvailabilityNotifier {
    tx: broadcast::Sender<()>,
    window: Duration,
    armed: AtomicBool,
}

impl AvailabilityNotifier {
    pub fn new(window: Duration) -> Arc<Self> {
        let (tx, _) = broadcast::channel(16);
        Arc::new(Self {
            tx,
            window,
            armed: AtomicBool::new(false),
        })
    }

    /// Subscribe a runner session to availability pings.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Note that new claimable work exists. Coalesced within the window.
    pub fn signal(self: &Arc<Self>) {
        if self.armed.swap(true, Ordering::SeqCst) {
            return;
        }
        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(this.window).await;
            this.armed.store(false, Ordering::SeqCst);
            let receivers = this.tx.receiver_count();
            if this.tx.send(()).is_ok() {
                debug!(receivers, "Pinged runner sessions about available jobs");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_burst_coalesces_into_one_ping() {
        let notifier = AvailabilityNotifier::new(Duration::from_millis(20));
        let mut rx = notifier.subscribe();

        for _ in 0..10 {
            notifier.signal();
        }

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_signal_after_window_pings_again() {
        let notifier = AvailabilityNotifier::new(Duration::from_millis(10));
        let mut rx = notifier.subscribe();

        notifier.signal();
        tokio::time::sleep(Duration::from_millis(40)).await;
        notifier.signal();
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_signal_without_subscribers_is_harmless() {
        let notifier = AvailabilityNotifier::new(Duration::from_millis(5));
        notifier.signal();
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
