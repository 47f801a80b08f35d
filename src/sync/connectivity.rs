//! Online/offline signal.
//!
//! The coordinator flips it on every classified response; the health
//! monitor flips it while the app is idle. Observers react to the
//! offline→online edge only.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info};

use super::client::MealApi;

#[derive(Debug, Clone)]
pub struct Connectivity {
    tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
    /// Starts in the given state.
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Publishes a change. Repeating the current value notifies nobody.
    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            info!(online, "Connectivity changed");
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Waits until the receiver observes an offline→online transition.
///
/// Changes published since the receiver last looked are not lost: the
/// sender only notifies on a real change, so a notification that finds
/// the signal online means it came back from offline, even when the
/// intermediate offline value was overwritten before we woke up.
///
/// Returns `false` when the sender is gone.
pub async fn wait_for_reconnect(rx: &mut watch::Receiver<bool>) -> bool {
    loop {
        if rx.changed().await.is_err() {
            return false;
        }
        if *rx.borrow_and_update() {
            return true;
        }
    }
}

/// Probes `GET /health` every `interval` and publishes the result.
pub async fn monitor<A: MealApi>(api: Arc<A>, connectivity: Connectivity, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let online = match api.health().await {
            Ok(()) => true,
            Err(e) if e.is_network_unavailable() => false,
            // The server answered, so the network is up.
            Err(e) => {
                debug!(error = %e, "Health probe returned an error status");
                true
            }
        };
        connectivity.set_online(online);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_online_only_notifies_on_change() {
        let connectivity = Connectivity::new(true);
        let mut rx = connectivity.subscribe();

        connectivity.set_online(true);
        assert!(!rx.has_changed().unwrap());

        connectivity.set_online(false);
        assert!(rx.has_changed().unwrap());
        assert!(!*rx.borrow_and_update());
        assert!(!connectivity.is_online());
    }

    #[tokio::test]
    async fn test_wait_for_reconnect_ignores_online_to_offline() {
        let connectivity = Connectivity::new(true);
        let mut rx = connectivity.subscribe();

        let waiter = tokio::spawn(async move { wait_for_reconnect(&mut rx).await });

        tokio::task::yield_now().await;
        connectivity.set_online(false);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        connectivity.set_online(true);
        assert!(tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap());
    }

    #[tokio::test]
    async fn test_wait_for_reconnect_ends_when_sender_dropped() {
        let connectivity = Connectivity::new(false);
        let mut rx = connectivity.subscribe();
        drop(connectivity);

        assert!(!wait_for_reconnect(&mut rx).await);
    }

    #[tokio::test]
    async fn test_wait_for_reconnect_sees_flip_made_before_waiting() {
        let connectivity = Connectivity::new(true);
        let mut rx = connectivity.subscribe();

        // Both changes land while nobody is waiting, e.g. during a replay.
        connectivity.set_online(false);
        connectivity.set_online(true);

        assert!(tokio::time::timeout(Duration::from_secs(1), wait_for_reconnect(&mut rx))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_wait_for_reconnect_consumes_each_edge_once() {
        let connectivity = Connectivity::new(false);
        let mut rx = connectivity.subscribe();

        connectivity.set_online(true);
        assert!(wait_for_reconnect(&mut rx).await);

        let second = tokio::time::timeout(Duration::from_millis(50), wait_for_reconnect(&mut rx)).await;
        assert!(second.is_err());
    }
}
