//! Shutdown coordination for the relay.
//!
//! Stopping happens in two steps: `trigger` tells the server to stop
//! accepting requests, then `drain` waits for in-flight relays to release
//! their upstream connections.

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{sleep, Instant};

use crate::relay::UpstreamTracker;

const DRAIN_POLL: Duration = Duration::from_millis(50);

/// Broadcasts a single stop signal to every subscribed task.
#[derive(Debug, Clone)]
pub struct Shutdown {
    notify: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (notify, _) = broadcast::channel(1);
        Self { notify }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.notify.subscribe()
    }

    /// Signal every subscriber. Safe to call more than once.
    pub fn trigger(&self) {
        if self.notify.send(()).is_ok() {
            tracing::info!(subscribers = self.notify.receiver_count(), "Shutdown triggered");
        }
    }

    /// Tasks still listening for the signal.
    pub fn receiver_count(&self) -> usize {
        self.notify.receiver_count()
    }

    /// Wait up to `grace` for every upstream attempt to be released.
    ///
    /// Returns false if some were still open when the grace period ran out.
    pub async fn drain(&self, tracker: &UpstreamTracker, grace: Duration) -> bool {
        let deadline = Instant::now() + grace;
        loop {
            let active = tracker.active();
            if active == 0 {
                return true;
            }
            if Instant::now() >= deadline {
                tracing::warn!(active, "Upstream connections still open after grace period");
                return false;
            }
            sleep(DRAIN_POLL).await;
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    #[tokio::test]
    async fn trigger_reaches_subscribers() {
        let shutdown = Shutdown::new();
        let mut rx1 = shutdown.subscribe();
        let mut rx2 = shutdown.subscribe();
        assert_eq!(shutdown.receiver_count(), 2);

        shutdown.trigger();
        assert!(rx1.recv().await.is_ok());
        assert!(rx2.recv().await.is_ok());
    }

    #[test]
    fn trigger_without_subscribers_is_harmless() {
        Shutdown::default().trigger();
    }

    #[tokio::test]
    async fn drain_waits_for_release() {
        let tracker = UpstreamTracker::new();
        let guard = tracker.open(&Url::parse("http://img.example.com/").unwrap());

        tokio::spawn(async move {
            sleep(Duration::from_millis(100)).await;
            drop(guard);
        });

        assert!(Shutdown::new().drain(&tracker, Duration::from_secs(5)).await);
        assert_eq!(tracker.active(), 0);
    }

    #[tokio::test]
    async fn drain_gives_up_after_grace() {
        let tracker = UpstreamTracker::new();
        let _guard = tracker.open(&Url::parse("http://img.example.com/").unwrap());

        assert!(!Shutdown::new().drain(&tracker, Duration::from_millis(100)).await);
    }
}
