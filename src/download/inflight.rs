//! Set of bookmark ids with a download scheduled or executing.

use std::sync::Arc;

use dashmap::DashSet;

#[derive(Debug, Clone, Default)]
pub struct InFlightSet {
    ids: Arc<DashSet<String>>,
}

impl InFlightSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically add `bookmark_id` if absent. Only the caller that wins gets
    /// a guard; dropping the guard removes the id again.
    pub fn try_claim(&self, bookmark_id: &str) -> Option<InFlightGuard> {
        if self.ids.insert(bookmark_id.to_string()) {
            Some(InFlightGuard {
                ids: self.ids.clone(),
                bookmark_id: bookmark_id.to_string(),
            })
        } else {
            None
        }
    }

    pub fn contains(&self, bookmark_id: &str) -> bool {
        self.ids.contains(bookmark_id)
    }

    /// Ids currently claimed; a point-in-time copy.
    pub fn ids(&self) -> Vec<String> {
        self.ids.iter().map(|id| id.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Proof of ownership of an in-flight marker. Released on drop, so every
/// exit path of a task (success, failure, cancellation, queue rejection)
/// clears the marker.
#[derive(Debug)]
pub struct InFlightGuard {
    ids: Arc<DashSet<String>>,
    bookmark_id: String,
}

impl InFlightGuard {
    pub fn bookmark_id(&self) -> &str {
        &self.bookmark_id
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.ids.remove(&self.bookmark_id);
    }
}
