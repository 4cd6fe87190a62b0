//! Replication engine seam.
//!
//! The engine owns the bidirectional sync connection; this crate only drives
//! its lifecycle and reads its status snapshots.

use std::collections::HashMap;
use std::io;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;

/// Failure categories reported by a replication engine.
///
/// All variants except [`EngineErrorKind::Other`] describe the network being
/// unusable rather than the sync itself being broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineErrorKind {
    ConnectionRefused,
    NoRouteToHost,
    PortUnreachable,
    Protocol,
    TlsHandshake,
    Socket,
    SocketTimeout,
    UnresolvedHost,
    UnexpectedEof,
    Other,
}

impl EngineErrorKind {
    pub fn is_network(&self) -> bool {
        !matches!(self, EngineErrorKind::Other)
    }

    /// Map a transport-level I/O error onto an engine error category.
    pub fn from_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => Self::ConnectionRefused,
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe => Self::Socket,
            io::ErrorKind::AddrNotAvailable => Self::NoRouteToHost,
            io::ErrorKind::TimedOut => Self::SocketTimeout,
            io::ErrorKind::UnexpectedEof => Self::UnexpectedEof,
            io::ErrorKind::InvalidData => Self::Protocol,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct EngineError {
    pub kind: EngineErrorKind,
    pub message: String,
}

impl EngineError {
    pub fn new(kind: EngineErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_network(&self) -> bool {
        self.kind.is_network()
    }
}

impl From<io::Error> for EngineError {
    fn from(err: io::Error) -> Self {
        Self::new(EngineErrorKind::from_io(&err), err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DownloadProgress {
    pub downloaded_operations: u64,
    pub total_operations: u64,
}

impl DownloadProgress {
    /// Fraction of operations downloaded, clamped to `0.0..=1.0`.
    /// Zero when the total is unknown.
    pub fn fraction(&self) -> f64 {
        if self.total_operations == 0 {
            return 0.0;
        }
        (self.downloaded_operations as f64 / self.total_operations as f64).clamp(0.0, 1.0)
    }
}

/// One status snapshot emitted by the replication engine.
#[derive(Debug, Clone, Default)]
pub struct ReplicationStatus {
    pub connected: bool,
    pub connecting: bool,
    pub downloading: bool,
    pub uploading: bool,
    pub download_progress: Option<DownloadProgress>,
    pub any_error: Option<EngineError>,
}

/// Connection parameters handed to [`ReplicationEngine::connect`].
#[derive(Clone, Default)]
pub struct ConnectOptions {
    pub endpoint: Option<String>,
    pub token: Option<String>,
    pub params: HashMap<String, serde_json::Value>,
}

impl std::fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("endpoint", &self.endpoint)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("params", &self.params)
            .finish()
    }
}

#[async_trait]
pub trait ReplicationEngine: Send + Sync {
    async fn connect(&self, options: &ConnectOptions) -> Result<(), EngineError>;

    async fn disconnect(&self) -> Result<(), EngineError>;

    /// Disconnect and, when `clear_local` is set, purge local replicated data.
    /// A `soft` clear keeps the local schema so a later connect resyncs in place.
    async fn disconnect_and_clear(&self, clear_local: bool, soft: bool)
        -> Result<(), EngineError>;

    /// Status snapshots. `None` until the engine has reported anything.
    fn status(&self) -> watch::Receiver<Option<ReplicationStatus>>;
}

/// Engine without a remote peer. Connect reports `connected`, disconnect
/// reports idle; used when no sync service is configured.
pub struct LocalOnlyEngine {
    tx: watch::Sender<Option<ReplicationStatus>>,
}

impl Default for LocalOnlyEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalOnlyEngine {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    fn set_connected(&self, connected: bool) {
        self.tx.send_replace(Some(ReplicationStatus {
            connected,
            ..Default::default()
        }));
    }
}

#[async_trait]
impl ReplicationEngine for LocalOnlyEngine {
    async fn connect(&self, options: &ConnectOptions) -> Result<(), EngineError> {
        tracing::debug!(endpoint = ?options.endpoint, "local-only engine connect");
        self.set_connected(true);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), EngineError> {
        self.set_connected(false);
        Ok(())
    }

    async fn disconnect_and_clear(
        &self,
        clear_local: bool,
        _soft: bool,
    ) -> Result<(), EngineError> {
        if clear_local {
            tracing::debug!("local-only engine has no replicated data to clear");
        }
        self.set_connected(false);
        Ok(())
    }

    fn status(&self) -> watch::Receiver<Option<ReplicationStatus>> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_fraction() {
        let p = DownloadProgress {
            downloaded_operations: 50,
            total_operations: 200,
        };
        assert_eq!(p.fraction(), 0.25);
    }

    #[test]
    fn test_progress_zero_total() {
        let p = DownloadProgress {
            downloaded_operations: 10,
            total_operations: 0,
        };
        assert_eq!(p.fraction(), 0.0);
    }

    #[test]
    fn test_progress_clamped_when_overshooting() {
        let p = DownloadProgress {
            downloaded_operations: 300,
            total_operations: 200,
        };
        assert_eq!(p.fraction(), 1.0);
    }

    #[test]
    fn test_io_error_classification() {
        let refused = io::Error::from(io::ErrorKind::ConnectionRefused);
        assert_eq!(
            EngineErrorKind::from_io(&refused),
            EngineErrorKind::ConnectionRefused
        );
        let eof = io::Error::from(io::ErrorKind::UnexpectedEof);
        assert!(EngineError::from(eof).is_network());
        let denied = io::Error::from(io::ErrorKind::PermissionDenied);
        assert!(!EngineError::from(denied).is_network());
    }

    #[test]
    fn test_connect_options_debug_redacts_token() {
        let options = ConnectOptions {
            token: Some("secret".into()),
            ..Default::default()
        };
        let debug = format!("{:?}", options);
        assert!(!debug.contains("secret"));
        assert!(debug.contains("<redacted>"));
    }

    #[tokio::test]
    async fn test_local_only_engine_reports_connection() {
        let engine = LocalOnlyEngine::new();
        let rx = engine.status();
        assert!(rx.borrow().is_none());

        engine.connect(&ConnectOptions::default()).await.unwrap();
        assert!(rx.borrow().as_ref().unwrap().connected);

        engine.disconnect_and_clear(true, false).await.unwrap();
        assert!(!rx.borrow().as_ref().unwrap().connected);
    }
}
