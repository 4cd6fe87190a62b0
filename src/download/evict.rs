//! Cache size and retention enforcement.
//!
//! Entries older than the retention window go first; after that, while the
//! cache is over its size limit, the least recently downloaded entry is
//! removed. Bookmarks with a download in flight are never touched.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};

use super::inflight::InFlightSet;
use super::paths;
use crate::content::store::{CacheEntry, ContentStore, StoreError};

pub const DEFAULT_MAX_CACHE_BYTES: u64 = 5 * 1024 * 1024 * 1024;
pub const DEFAULT_RETENTION_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy)]
pub struct EvictionPolicy {
    pub max_bytes: u64,
    pub retention: Duration,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_CACHE_BYTES,
            retention: Duration::days(DEFAULT_RETENTION_DAYS),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionReport {
    pub removed: usize,
    pub freed_bytes: u64,
    pub remaining_bytes: u64,
}

pub async fn evict(
    store: &dyn ContentStore,
    in_flight: &InFlightSet,
    policy: &EvictionPolicy,
    now: DateTime<Utc>,
) -> Result<EvictionReport, StoreError> {
    let protected: HashSet<String> = in_flight
        .ids()
        .iter()
        .map(|id| paths::encode_id(id))
        .collect();
    let is_protected =
        |entry: &CacheEntry| paths::owner_of(&entry.path).is_some_and(|o| protected.contains(o));

    let mut entries = store.list().await?;
    entries.sort_by_key(|e| e.last_modified_at_millis);

    let cutoff = (now - policy.retention).timestamp_millis();
    let mut report = EvictionReport {
        remaining_bytes: entries.iter().map(|e| e.size).sum(),
        ..Default::default()
    };

    let mut kept = Vec::with_capacity(entries.len());
    for entry in entries {
        let expired = entry.last_modified_at_millis < cutoff && !is_protected(&entry);
        if expired && remove(store, &entry, &mut report).await {
            continue;
        }
        kept.push(entry);
    }

    for entry in &kept {
        if report.remaining_bytes <= policy.max_bytes {
            break;
        }
        if is_protected(entry) {
            continue;
        }
        remove(store, entry, &mut report).await;
    }

    if report.removed > 0 {
        tracing::info!(
            removed = report.removed,
            freed_bytes = report.freed_bytes,
            remaining_bytes = report.remaining_bytes,
            "Evicted cached content"
        );
    }
    Ok(report)
}

/// Returns whether the entry was removed. Failures are logged and the entry
/// is counted as still present.
async fn remove(store: &dyn ContentStore, entry: &CacheEntry, report: &mut EvictionReport) -> bool {
    match store.remove(&entry.path).await {
        Ok(()) => {
            tracing::debug!(path = %entry.path.display(), size = entry.size, "evicted");
            report.removed += 1;
            report.freed_bytes += entry.size;
            report.remaining_bytes = report.remaining_bytes.saturating_sub(entry.size);
            true
        }
        Err(e) => {
            tracing::warn!("Could not evict {}: {}", entry.path.display(), e);
            false
        }
    }
}
