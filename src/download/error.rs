use thiserror::Error;

use crate::content::store::StoreError;
use crate::content::ContentError;

/// Failure of one content download, caught at the task boundary.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error(transparent)]
    Fetch(#[from] ContentError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Download of {0} cancelled")]
    Cancelled(String),
}

impl DownloadError {
    /// Whether the failure came from the network rather than local storage.
    pub fn is_network(&self) -> bool {
        matches!(self, DownloadError::Fetch(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_errors_are_network() {
        let e = DownloadError::from(ContentError::Timeout {
            bookmark_id: "x".into(),
        });
        assert!(e.is_network());
        assert_eq!(e.to_string(), "Timed out fetching x");
    }

    #[test]
    fn test_store_errors_are_local() {
        let e = DownloadError::from(StoreError::InvalidPath("../x".into()));
        assert!(!e.is_network());
    }

    #[test]
    fn test_cancelled_message() {
        assert_eq!(
            DownloadError::Cancelled("bm_1".into()).to_string(),
            "Download of bm_1 cancelled"
        );
    }
}
