//! Published observable state: the derived [`SyncState`] and the per-bookmark
//! download status map.
//!
//! Both are backed by `tokio::sync::watch` so a late subscriber immediately
//! sees the latest value without re-triggering whoever produces it.

use std::collections::HashMap;
use std::fmt;

use tokio::sync::watch;

/// Single user-facing answer to "are we synced, and if not, why".
#[derive(Debug, Clone, PartialEq)]
pub enum SyncState {
    NoNetwork,
    Connecting,
    /// Replication is pulling changes; `progress` is within `0.0..=1.0`.
    Downloading { progress: f64 },
    Uploading,
    Connected,
    Error { message: String },
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncState::NoNetwork => write!(f, "no network"),
            SyncState::Connecting => write!(f, "connecting"),
            SyncState::Downloading { progress } => {
                write!(f, "downloading ({:.0}%)", progress * 100.0)
            }
            SyncState::Uploading => write!(f, "uploading"),
            SyncState::Connected => write!(f, "connected"),
            SyncState::Error { message } => write!(f, "error: {}", message),
        }
    }
}

/// Last known outcome of a content download for one bookmark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DownloadStatus {
    Downloading,
    Completed,
    Failed,
}

impl DownloadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Downloading => "downloading",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

pub type StatusMap = HashMap<String, DownloadStatus>;

/// Observable bookmark id -> [`DownloadStatus`] map.
///
/// Entries are overwritten by later attempts and never pruned. Cloning the
/// board shares the same underlying channel.
#[derive(Clone)]
pub struct StatusBoard {
    tx: watch::Sender<StatusMap>,
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusBoard {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(StatusMap::new());
        Self { tx }
    }

    /// Record `status` for `bookmark_id`, notifying subscribers only when the
    /// stored value actually changes.
    pub fn publish(&self, bookmark_id: &str, status: DownloadStatus) {
        self.tx.send_if_modified(|map| {
            if map.get(bookmark_id) == Some(&status) {
                return false;
            }
            map.insert(bookmark_id.to_string(), status);
            true
        });
    }

    pub fn get(&self, bookmark_id: &str) -> Option<DownloadStatus> {
        self.tx.borrow().get(bookmark_id).copied()
    }

    pub fn snapshot(&self) -> StatusMap {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusMap> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_state_display() {
        assert_eq!(SyncState::NoNetwork.to_string(), "no network");
        assert_eq!(
            SyncState::Downloading { progress: 0.25 }.to_string(),
            "downloading (25%)"
        );
        assert_eq!(
            SyncState::Error {
                message: "bad token".into()
            }
            .to_string(),
            "error: bad token"
        );
    }

    #[test]
    fn test_board_overwrites_previous_status() {
        let board = StatusBoard::new();
        board.publish("a", DownloadStatus::Downloading);
        board.publish("a", DownloadStatus::Failed);
        assert_eq!(board.get("a"), Some(DownloadStatus::Failed));
        assert_eq!(board.snapshot().len(), 1);
    }

    #[test]
    fn test_board_keeps_every_id_ever_published() {
        let board = StatusBoard::new();
        board.publish("a", DownloadStatus::Completed);
        board.publish("b", DownloadStatus::Failed);
        board.publish("c", DownloadStatus::Downloading);
        let snapshot = board.snapshot();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot["a"], DownloadStatus::Completed);
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_current_map() {
        let board = StatusBoard::new();
        board.publish("a", DownloadStatus::Completed);
        let rx = board.subscribe();
        assert_eq!(rx.borrow().get("a"), Some(&DownloadStatus::Completed));
    }

    #[tokio::test]
    async fn test_repeated_status_does_not_notify() {
        let board = StatusBoard::new();
        let mut rx = board.subscribe();
        board.publish("a", DownloadStatus::Completed);
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();
        board.publish("a", DownloadStatus::Completed);
        assert!(!rx.has_changed().unwrap());
    }
}
