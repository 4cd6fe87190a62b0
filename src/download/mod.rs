//! Download scheduler: keeps cached article content current for recently
//! changed bookmarks without duplicate or unbounded work.
//!
//! One subscriber loop turns bookmark snapshots into [`DownloadTask`]s and
//! offers them to a bounded queue without blocking; when the queue is full
//! the task is dropped and its in-flight marker released. One consumer loop
//! drains the queue with `max_concurrency` concurrent workers. Per-bookmark
//! progress is published on a [`StatusBoard`].

pub mod error;
pub mod evict;
pub mod inflight;
pub mod paths;

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use futures_util::stream::{self, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bookmarks::{BookmarkRecord, MetadataStatus};
use crate::content::store::ContentStore;
use crate::content::ContentApi;
use crate::status::{DownloadStatus, StatusBoard};

use self::error::DownloadError;
use self::evict::{EvictionPolicy, EvictionReport};
use self::inflight::{InFlightGuard, InFlightSet};

pub const DEFAULT_MAX_CONCURRENCY: usize = 3;
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;
pub const DEFAULT_RECENT_DAYS: i64 = 3;

/// Subset of application config consumed by the scheduler.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub max_concurrency: usize,
    pub queue_capacity: usize,
    pub recent_window: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            recent_window: Duration::days(DEFAULT_RECENT_DAYS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    DownloadContent,
}

/// A unit of work produced by the subscriber loop and consumed exactly once
/// by a worker. Owns the bookmark's in-flight marker; dropping the task
/// releases it.
#[derive(Debug)]
pub struct DownloadTask {
    pub bookmark_id: String,
    pub updated_at: DateTime<Utc>,
    pub kind: TaskKind,
    _claim: InFlightGuard,
}

/// Counts from offering one bookmark snapshot to the queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnqueueReport {
    pub enqueued: usize,
    pub already_in_flight: usize,
    pub dropped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskOutcome {
    Completed,
    /// The cached copy is at least as new as the bookmark.
    Current,
    /// Shutdown began before any work started.
    Abandoned,
}

/// Metadata is ready and the bookmark changed within `window` of `now`.
pub fn is_recent(record: &BookmarkRecord, now: DateTime<Utc>, window: Duration) -> bool {
    record.metadata_status == MetadataStatus::Success
        && now.signed_duration_since(record.updated_at) <= window
}

struct Shared {
    api: Arc<dyn ContentApi>,
    store: Arc<dyn ContentStore>,
    in_flight: InFlightSet,
    statuses: StatusBoard,
    config: SchedulerConfig,
    queue: mpsc::Sender<DownloadTask>,
}

impl Shared {
    fn offer(&self, records: &[BookmarkRecord], now: DateTime<Utc>) -> EnqueueReport {
        let mut report = EnqueueReport::default();
        for record in records {
            if !is_recent(record, now, self.config.recent_window) {
                continue;
            }
            let Some(claim) = self.in_flight.try_claim(&record.id) else {
                report.already_in_flight += 1;
                continue;
            };
            let task = DownloadTask {
                bookmark_id: record.id.clone(),
                updated_at: record.updated_at,
                kind: TaskKind::DownloadContent,
                _claim: claim,
            };
            match self.queue.try_send(task) {
                Ok(()) => report.enqueued += 1,
                Err(mpsc::error::TrySendError::Full(task)) => {
                    tracing::warn!(
                        bookmark_id = %task.bookmark_id,
                        capacity = self.config.queue_capacity,
                        "Download queue full, dropping task"
                    );
                    report.dropped += 1;
                }
                Err(mpsc::error::TrySendError::Closed(task)) => {
                    tracing::debug!(bookmark_id = %task.bookmark_id, "Download queue closed");
                    report.dropped += 1;
                }
            }
        }
        if report.enqueued > 0 || report.dropped > 0 {
            tracing::debug!(
                enqueued = report.enqueued,
                already_in_flight = report.already_in_flight,
                dropped = report.dropped,
                "Offered bookmark snapshot"
            );
        }
        report
    }

    async fn run_task(&self, task: DownloadTask, token: &CancellationToken) {
        let id = task.bookmark_id.as_str();
        match self.download_bookmark_item(&task, token).await {
            Ok(TaskOutcome::Completed) => tracing::debug!(bookmark_id = %id, "Content downloaded"),
            Ok(TaskOutcome::Current) => {
                tracing::debug!(bookmark_id = %id, "Cached content is current")
            }
            Ok(TaskOutcome::Abandoned) => {
                tracing::debug!(bookmark_id = %id, "Shutdown before download started")
            }
            Err(e) => {
                self.statuses.publish(id, DownloadStatus::Failed);
                tracing::error!(bookmark_id = %id, "Download failed: {}", e);
            }
        }
        // `task` drops here, releasing the in-flight marker on every path.
    }

    async fn download_bookmark_item(
        &self,
        task: &DownloadTask,
        token: &CancellationToken,
    ) -> Result<TaskOutcome, DownloadError> {
        if token.is_cancelled() {
            return Ok(TaskOutcome::Abandoned);
        }
        let id = task.bookmark_id.as_str();
        let path = paths::content_path(id);
        self.store.ensure_directory(&paths::content_dir(id)).await?;

        let need_download = match self.store.stat(&path).await? {
            None => true,
            Some(meta) => task.updated_at.timestamp_millis() > meta.last_modified_at_millis,
        };
        if !need_download {
            return Ok(TaskOutcome::Current);
        }

        self.statuses.publish(id, DownloadStatus::Downloading);
        let bytes = tokio::select! {
            _ = token.cancelled() => return Err(DownloadError::Cancelled(id.to_string())),
            fetched = self.api.fetch_content(id) => fetched?,
        };
        if token.is_cancelled() {
            return Err(DownloadError::Cancelled(id.to_string()));
        }
        self.store.write(&path, &bytes).await?;
        self.statuses.publish(id, DownloadStatus::Completed);

        tracing::debug!(bookmark_id = %id, kind = ?task.kind, size_bytes = bytes.len(), "stored content");
        Ok(TaskOutcome::Completed)
    }

    async fn fetch_and_store(&self, bookmark_id: &str) -> Result<Vec<u8>, DownloadError> {
        self.store
            .ensure_directory(&paths::content_dir(bookmark_id))
            .await?;
        self.statuses.publish(bookmark_id, DownloadStatus::Downloading);
        let bytes = self.api.fetch_content(bookmark_id).await?;
        self.store
            .write(&paths::content_path(bookmark_id), &bytes)
            .await?;
        self.statuses.publish(bookmark_id, DownloadStatus::Completed);
        Ok(bytes)
    }
}

pub struct DownloadScheduler {
    shared: Arc<Shared>,
    receiver: Mutex<Option<mpsc::Receiver<DownloadTask>>>,
    token: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl DownloadScheduler {
    pub fn new(
        api: Arc<dyn ContentApi>,
        store: Arc<dyn ContentStore>,
        statuses: StatusBoard,
        config: SchedulerConfig,
        token: CancellationToken,
    ) -> Self {
        let (queue, receiver) = mpsc::channel(config.queue_capacity.max(1));
        Self {
            shared: Arc::new(Shared {
                api,
                store,
                in_flight: InFlightSet::new(),
                statuses,
                config,
                queue,
            }),
            receiver: Mutex::new(Some(receiver)),
            token,
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn statuses(&self) -> &StatusBoard {
        &self.shared.statuses
    }

    pub fn in_flight(&self) -> &InFlightSet {
        &self.shared.in_flight
    }

    /// Filter `records` to eligible bookmarks and try to enqueue each one.
    pub fn offer(&self, records: &[BookmarkRecord], now: DateTime<Utc>) -> EnqueueReport {
        self.shared.offer(records, now)
    }

    /// Spawn the subscriber and consumer loops. Only the first call has any
    /// effect.
    pub fn start(&self, bookmarks: watch::Receiver<Vec<BookmarkRecord>>) {
        let receiver = match self.receiver.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(receiver) = receiver else {
            tracing::warn!("Download scheduler already started");
            return;
        };

        let subscriber = tokio::spawn(subscribe_loop(
            self.shared.clone(),
            bookmarks,
            self.token.clone(),
        ));
        let consumer = tokio::spawn(consume_loop(
            self.shared.clone(),
            receiver,
            self.token.clone(),
        ));

        let mut handles = match self.handles.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        handles.push(subscriber);
        handles.push(consumer);
        tracing::debug!(
            concurrency = self.shared.config.max_concurrency,
            capacity = self.shared.config.queue_capacity,
            "Download scheduler started"
        );
    }

    /// Cancel both loops and wait for running tasks to finish. Queued tasks
    /// are discarded and their markers released.
    pub async fn shutdown(&self) {
        self.token.cancel();
        let handles: Vec<_> = match self.handles.lock() {
            Ok(mut guard) => guard.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        };
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Download scheduler loop ended abnormally");
            }
        }
        // Never started: drop the receiver so queued markers are released too.
        if let Ok(mut guard) = self.receiver.lock() {
            guard.take();
        }
    }

    /// Content for a bookmark the user opened directly. Served from the
    /// cache when present; otherwise fetched, stored and returned without
    /// going through the queue.
    ///
    /// Claims the in-flight marker when it is free so background scheduling
    /// of the same bookmark waits for this request. If a background task
    /// already holds it, the request still proceeds.
    pub async fn get_content(&self, bookmark_id: &str) -> Result<Vec<u8>, DownloadError> {
        if let Some(bytes) = self
            .shared
            .store
            .read(&paths::content_path(bookmark_id))
            .await?
        {
            tracing::debug!(bookmark_id, "Serving cached content");
            return Ok(bytes);
        }

        let claim = self.shared.in_flight.try_claim(bookmark_id);
        if claim.is_none() {
            tracing::debug!(bookmark_id, "Background download in flight, fetching directly");
        }

        let result = self.shared.fetch_and_store(bookmark_id).await;
        if let Err(e) = &result {
            self.shared
                .statuses
                .publish(bookmark_id, DownloadStatus::Failed);
            tracing::error!(bookmark_id, "On-demand download failed: {}", e);
        }
        drop(claim);
        result
    }

    /// Run one eviction sweep over the content store.
    pub async fn evict(
        &self,
        policy: &EvictionPolicy,
        now: DateTime<Utc>,
    ) -> Result<EvictionReport, crate::content::store::StoreError> {
        evict::evict(
            self.shared.store.as_ref(),
            &self.shared.in_flight,
            policy,
            now,
        )
        .await
    }
}

async fn subscribe_loop(
    shared: Arc<Shared>,
    mut bookmarks: watch::Receiver<Vec<BookmarkRecord>>,
    token: CancellationToken,
) {
    loop {
        let snapshot = bookmarks.borrow_and_update().clone();
        shared.offer(&snapshot, Utc::now());

        tokio::select! {
            _ = token.cancelled() => break,
            changed = bookmarks.changed() => {
                if changed.is_err() {
                    tracing::info!("Bookmark watcher closed, no further downloads will be scheduled");
                    break;
                }
            }
        }
    }
}

async fn consume_loop(
    shared: Arc<Shared>,
    receiver: mpsc::Receiver<DownloadTask>,
    token: CancellationToken,
) {
    let tasks = stream::unfold(receiver, |mut rx| async move {
        rx.recv().await.map(|task| (task, rx))
    });
    let concurrency = shared.config.max_concurrency.max(1);

    tasks
        .take_until(token.clone().cancelled_owned())
        .for_each_concurrent(concurrency, |task| {
            let shared = shared.clone();
            let token = token.clone();
            async move { shared.run_task(task, &token).await }
        })
        .await;
    tracing::debug!("Download consumer stopped");
}
