//! Network reachability monitoring.

use std::sync::Mutex;
use std::time::Duration;

use reqwest::Client;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkStatus {
    Connected,
    Disconnected,
}

pub trait ConnectivityMonitor: Send + Sync {
    fn start(&self);

    fn stop(&self);

    /// Reachability events. `None` until the first observation.
    fn subscribe(&self) -> watch::Receiver<Option<NetworkStatus>>;
}

/// Polls a URL with `HEAD` requests. Any HTTP response means the network is
/// reachable; a transport error means it is not. Only changes are published.
pub struct ProbeMonitor {
    client: Client,
    url: String,
    interval: Duration,
    tx: watch::Sender<Option<NetworkStatus>>,
    running: Mutex<Option<CancellationToken>>,
}

impl ProbeMonitor {
    pub fn new(client: Client, url: String, interval: Duration) -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            client,
            url,
            interval,
            tx,
            running: Mutex::new(None),
        }
    }

    async fn probe(client: &Client, url: &str) -> NetworkStatus {
        match client.head(url).send().await {
            Ok(_) => NetworkStatus::Connected,
            Err(e) => {
                tracing::debug!(url, error = %e, "reachability probe failed");
                NetworkStatus::Disconnected
            }
        }
    }
}

impl ConnectivityMonitor for ProbeMonitor {
    fn start(&self) {
        let mut running = match self.running.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if running.is_some() {
            return;
        }
        let token = CancellationToken::new();
        *running = Some(token.clone());

        let client = self.client.clone();
        let url = self.url.clone();
        let interval = self.interval;
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let status = tokio::select! {
                    _ = token.cancelled() => break,
                    status = Self::probe(&client, &url) => status,
                };
                let changed = tx.send_if_modified(|current| {
                    if *current == Some(status) {
                        return false;
                    }
                    *current = Some(status);
                    true
                });
                if changed {
                    tracing::info!(?status, "network reachability changed");
                }
            }
            tracing::debug!("reachability probe stopped");
        });
    }

    fn stop(&self) {
        let mut running = match self.running.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(token) = running.take() {
            token.cancel();
        }
    }

    fn subscribe(&self) -> watch::Receiver<Option<NetworkStatus>> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_probe_reports_disconnected() {
        let monitor = ProbeMonitor::new(
            Client::new(),
            "http://127.0.0.1:1".to_string(),
            Duration::from_millis(10),
        );
        let mut rx = monitor.subscribe();
        assert!(rx.borrow().is_none());

        monitor.start();
        let seen = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| s.is_some()))
            .await
            .expect("probe should report within timeout")
            .unwrap()
            .clone();
        monitor.stop();
        assert_eq!(seen, Some(NetworkStatus::Disconnected));
    }

    #[tokio::test]
    async fn test_stop_without_start_is_noop() {
        let monitor = ProbeMonitor::new(
            Client::new(),
            "http://127.0.0.1:1".to_string(),
            Duration::from_secs(60),
        );
        monitor.stop();
        monitor.start();
        monitor.start();
        monitor.stop();
        assert!(monitor.running.lock().unwrap().is_none());
    }
}
