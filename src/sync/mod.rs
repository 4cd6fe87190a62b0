//! Sync coordinator: reconciles replication engine status with network
//! reachability into one observable [`SyncState`], and drives the engine's
//! connect / disconnect lifecycle from connectivity changes.
//!
//! `startup()` spawns two independent tasks: a supervisor that owns the
//! connection flag and reacts to connectivity, and a combiner that re-derives
//! the state on every update from either source. A panic or closed stream in
//! one does not stop the other.

pub mod engine;
pub mod state;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::connectivity::{ConnectivityMonitor, NetworkStatus};
use crate::status::SyncState;

pub use engine::{ConnectOptions, ReplicationEngine, ReplicationStatus};
pub use state::derive_sync_state;

/// Owner of the `connected` flag. Exactly one holder at a time: the
/// supervisor task while running, the coordinator while idle.
struct Lifecycle {
    engine: Arc<dyn ReplicationEngine>,
    options: ConnectOptions,
    connected: bool,
    mirror: Arc<AtomicBool>,
}

impl Lifecycle {
    fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
        self.mirror.store(connected, Ordering::Release);
    }

    async fn connect(&mut self) {
        if self.connected {
            return;
        }
        match self.engine.connect(&self.options).await {
            Ok(()) => {
                self.set_connected(true);
                tracing::info!("Replication connected");
            }
            Err(e) => tracing::warn!(error = %e, "Replication connect failed"),
        }
    }

    async fn disconnect(&mut self) {
        if !self.connected {
            return;
        }
        match self.engine.disconnect().await {
            Ok(()) => {
                self.set_connected(false);
                tracing::info!("Replication disconnected");
            }
            Err(e) => tracing::warn!(error = %e, "Replication disconnect failed"),
        }
    }

    async fn reconnect(&mut self) {
        self.disconnect().await;
        self.connect().await;
    }
}

struct Running {
    token: CancellationToken,
    supervisor: JoinHandle<Lifecycle>,
    combiner: JoinHandle<()>,
}

pub struct SyncCoordinator {
    engine: Arc<dyn ReplicationEngine>,
    monitor: Arc<dyn ConnectivityMonitor>,
    options: ConnectOptions,
    state_tx: watch::Sender<SyncState>,
    connected: Arc<AtomicBool>,
    idle: Option<Lifecycle>,
    running: Option<Running>,
}

impl SyncCoordinator {
    pub fn new(
        engine: Arc<dyn ReplicationEngine>,
        monitor: Arc<dyn ConnectivityMonitor>,
        options: ConnectOptions,
    ) -> Self {
        let (state_tx, _rx) = watch::channel(SyncState::Connecting);
        let connected = Arc::new(AtomicBool::new(false));
        let idle = Lifecycle {
            engine: engine.clone(),
            options: options.clone(),
            connected: false,
            mirror: connected.clone(),
        };
        Self {
            engine,
            monitor,
            options,
            state_tx,
            connected,
            idle: Some(idle),
            running: None,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> SyncState {
        self.state_tx.borrow().clone()
    }

    /// Mirrors the outcome of the last successful connect or disconnect.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Start the monitor, the initial connect, the connectivity subscription
    /// and the state combiner.
    pub fn startup(&mut self) {
        if self.running.is_some() {
            tracing::warn!("Sync coordinator already started");
            return;
        }
        let lifecycle = self.idle.take().unwrap_or_else(|| self.fresh_lifecycle());

        self.monitor.start();
        let token = CancellationToken::new();

        let supervisor = tokio::spawn(supervise(
            lifecycle,
            self.monitor.subscribe(),
            token.clone(),
        ));
        let combiner = tokio::spawn(combine(
            self.engine.status(),
            self.monitor.subscribe(),
            self.state_tx.clone(),
            token.clone(),
        ));

        self.running = Some(Running {
            token,
            supervisor,
            combiner,
        });
        tracing::debug!("Sync coordinator started");
    }

    /// Stop monitoring and disconnect, purging local replicated data when
    /// `clear_local` is set. Further engine calls only happen after another
    /// `startup()`.
    pub async fn cleanup(&mut self, clear_local: bool) {
        self.monitor.stop();

        let mut lifecycle = match self.running.take() {
            Some(running) => {
                running.token.cancel();
                if let Err(e) = running.combiner.await {
                    tracing::error!(error = %e, "Sync state combiner ended abnormally");
                }
                match running.supervisor.await {
                    Ok(lifecycle) => lifecycle,
                    Err(e) => {
                        tracing::error!(error = %e, "Sync supervisor ended abnormally");
                        self.fresh_lifecycle()
                    }
                }
            }
            None => self.idle.take().unwrap_or_else(|| self.fresh_lifecycle()),
        };

        if let Err(e) = self.engine.disconnect_and_clear(clear_local, false).await {
            tracing::warn!(error = %e, clear_local, "Replication disconnect-and-clear failed");
        }
        lifecycle.set_connected(false);
        self.idle = Some(lifecycle);
        tracing::info!(clear_local, "Sync coordinator cleaned up");
    }

    fn fresh_lifecycle(&self) -> Lifecycle {
        Lifecycle {
            engine: self.engine.clone(),
            options: self.options.clone(),
            connected: self.connected.load(Ordering::Acquire),
            mirror: self.connected.clone(),
        }
    }
}

/// Initial connect, then reconnect on every transition to connected and
/// disconnect on every transition away from it. Hands the lifecycle back
/// when cancelled.
async fn supervise(
    mut lifecycle: Lifecycle,
    mut network_rx: watch::Receiver<Option<NetworkStatus>>,
    token: CancellationToken,
) -> Lifecycle {
    // Taken before connecting so a change during the connect is still seen.
    let mut last = *network_rx.borrow_and_update();
    let cancelled = tokio::select! {
        _ = token.cancelled() => true,
        _ = lifecycle.connect() => false,
    };
    if cancelled {
        return lifecycle;
    }

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            changed = network_rx.changed() => {
                if changed.is_err() {
                    tracing::warn!("Connectivity stream closed, lifecycle no longer follows network");
                    token.cancelled().await;
                    break;
                }
                let current = *network_rx.borrow_and_update();
                if current == last {
                    continue;
                }
                last = current;
                match current {
                    Some(NetworkStatus::Connected) => lifecycle.reconnect().await,
                    Some(NetworkStatus::Disconnected) => lifecycle.disconnect().await,
                    None => {}
                }
            }
        }
    }
    lifecycle
}

async fn combine(
    mut engine_rx: watch::Receiver<Option<ReplicationStatus>>,
    mut network_rx: watch::Receiver<Option<NetworkStatus>>,
    state_tx: watch::Sender<SyncState>,
    token: CancellationToken,
) {
    let mut engine_open = true;
    let mut network_open = true;
    loop {
        let state = {
            let status = engine_rx.borrow_and_update();
            let network = *network_rx.borrow_and_update();
            derive_sync_state(status.as_ref(), network)
        };
        state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            tracing::debug!(%state, "Sync state changed");
            *current = state;
            true
        });

        tokio::select! {
            _ = token.cancelled() => break,
            changed = engine_rx.changed(), if engine_open => {
                if changed.is_err() {
                    tracing::warn!("Replication status stream closed");
                    engine_open = false;
                }
            }
            changed = network_rx.changed(), if network_open => {
                if changed.is_err() {
                    tracing::warn!("Connectivity stream closed");
                    network_open = false;
                }
            }
        }
    }
}
