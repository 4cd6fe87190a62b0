//! Bookmark records and the change watcher that feeds the download scheduler.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer};
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// State of the bookmark's metadata extraction on the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataStatus {
    Pending,
    Success,
    Error,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkRecord {
    pub id: String,
    pub metadata_status: MetadataStatus,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub updated_at: DateTime<Utc>,
}

/// Accepts RFC 3339 strings or epoch milliseconds.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Millis(i64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Millis(ms) => Utc
            .timestamp_millis_opt(ms)
            .single()
            .ok_or_else(|| serde::de::Error::custom(format!("timestamp out of range: {}", ms))),
        Raw::Text(s) => DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom),
    }
}

/// Emits the full bookmark list whenever any record changes.
pub trait BookmarkWatcher: Send + Sync {
    fn subscribe(&self) -> watch::Receiver<Vec<BookmarkRecord>>;
}

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Malformed bookmark list in {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Polls a JSON array of bookmark records and republishes it whenever the
/// file's modification time changes.
pub struct JsonFileWatcher {
    path: PathBuf,
    interval: Duration,
    tx: watch::Sender<Vec<BookmarkRecord>>,
}

impl JsonFileWatcher {
    pub fn new(path: PathBuf, interval: Duration) -> Self {
        let (tx, _rx) = watch::channel(Vec::new());
        Self { path, interval, tx }
    }

    /// Read and parse the file once.
    pub async fn load(path: &Path) -> Result<Vec<BookmarkRecord>, WatchError> {
        let bytes = tokio::fs::read(path).await.map_err(|e| WatchError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_json::from_slice(&bytes).map_err(|e| WatchError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    async fn modified(path: &Path) -> Option<SystemTime> {
        tokio::fs::metadata(path).await.ok()?.modified().ok()
    }

    /// Poll until `token` is cancelled.
    pub async fn run(&self, token: CancellationToken) {
        let mut last_seen: Option<SystemTime> = None;
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let Some(modified) = Self::modified(&self.path).await else {
                tracing::debug!(path = %self.path.display(), "bookmark list not present");
                continue;
            };
            if last_seen == Some(modified) {
                continue;
            }

            match Self::load(&self.path).await {
                Ok(records) => {
                    last_seen = Some(modified);
                    tracing::debug!(count = records.len(), "bookmark list changed");
                    self.tx.send_replace(records);
                }
                Err(e) => {
                    // Remember the mtime so a broken file is not re-parsed every tick.
                    last_seen = Some(modified);
                    tracing::warn!("{}", e);
                }
            }
        }
    }
}

impl BookmarkWatcher for JsonFileWatcher {
    fn subscribe(&self) -> watch::Receiver<Vec<BookmarkRecord>> {
        self.tx.subscribe()
    }
}
