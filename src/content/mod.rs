//! Remote article content and its local cache.

pub mod store;

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;

use crate::retry::{self, RetryAction, RetryConfig};

/// Typed fetch errors enabling retry classification.
#[derive(Debug, Error)]
pub enum ContentError {
    #[error("Network error fetching {bookmark_id}: {message}")]
    Network {
        bookmark_id: String,
        message: String,
    },

    #[error("Timed out fetching {bookmark_id}")]
    Timeout { bookmark_id: String },

    #[error("HTTP error {status} fetching {bookmark_id}")]
    HttpStatus { status: u16, bookmark_id: String },

    #[error("Failed reading body for {bookmark_id}: {message}")]
    Body {
        bookmark_id: String,
        message: String,
    },
}

impl ContentError {
    /// Whether a transport-level retry is worthwhile.
    pub fn is_retryable(&self) -> bool {
        match self {
            ContentError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            ContentError::Network { .. } | ContentError::Timeout { .. } => true,
            ContentError::Body { .. } => true,
        }
    }

    fn from_reqwest(bookmark_id: &str, e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ContentError::Timeout {
                bookmark_id: bookmark_id.to_string(),
            }
        } else if let Some(status) = e.status() {
            ContentError::HttpStatus {
                status: status.as_u16(),
                bookmark_id: bookmark_id.to_string(),
            }
        } else {
            ContentError::Network {
                bookmark_id: bookmark_id.to_string(),
                message: e.to_string(),
            }
        }
    }
}

#[async_trait]
pub trait ContentApi: Send + Sync {
    /// Full article content for a bookmark.
    async fn fetch_content(&self, bookmark_id: &str) -> Result<Vec<u8>, ContentError>;
}

/// REST client: `GET {base_url}/bookmarks/{id}/article`.
pub struct HttpContentApi {
    client: Client,
    base_url: String,
    token: Option<String>,
    retry: RetryConfig,
}

impl std::fmt::Debug for HttpContentApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpContentApi")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

impl HttpContentApi {
    pub fn new(client: Client, base_url: &str, token: Option<String>, retry: RetryConfig) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            retry,
        }
    }

    pub fn article_url(&self, bookmark_id: &str) -> String {
        format!(
            "{}/bookmarks/{}/article",
            self.base_url,
            urlencoding::encode(bookmark_id)
        )
    }

    async fn attempt(&self, bookmark_id: &str) -> Result<Vec<u8>, ContentError> {
        let mut request = self.client.get(self.article_url(bookmark_id));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| ContentError::from_reqwest(bookmark_id, e))?;

        if !response.status().is_success() {
            return Err(ContentError::HttpStatus {
                status: response.status().as_u16(),
                bookmark_id: bookmark_id.to_string(),
            });
        }

        let body = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                ContentError::Timeout {
                    bookmark_id: bookmark_id.to_string(),
                }
            } else {
                ContentError::Body {
                    bookmark_id: bookmark_id.to_string(),
                    message: e.to_string(),
                }
            }
        })?;
        Ok(body.to_vec())
    }
}

#[async_trait]
impl ContentApi for HttpContentApi {
    async fn fetch_content(&self, bookmark_id: &str) -> Result<Vec<u8>, ContentError> {
        retry::retry_with_backoff(
            &self.retry,
            |e: &ContentError| {
                if e.is_retryable() {
                    RetryAction::Retry
                } else {
                    RetryAction::Abort
                }
            },
            || self.attempt(bookmark_id),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_http_404_not_retryable() {
        let e = ContentError::HttpStatus {
            status: 404,
            bookmark_id: "x".into(),
        };
        assert!(!e.is_retryable());
    }

    #[test]
    fn test_http_401_not_retryable() {
        let e = ContentError::HttpStatus {
            status: 401,
            bookmark_id: "x".into(),
        };
        assert!(!e.is_retryable());
    }

    #[test]
    fn test_http_429_and_5xx_retryable() {
        for status in [429, 500, 502, 503] {
            let e = ContentError::HttpStatus {
                status,
                bookmark_id: "x".into(),
            };
            assert!(e.is_retryable(), "status {} should be retryable", status);
        }
    }

    #[test]
    fn test_timeout_retryable() {
        let e = ContentError::Timeout {
            bookmark_id: "x".into(),
        };
        assert!(e.is_retryable());
        assert_eq!(e.to_string(), "Timed out fetching x");
    }

    #[test]
    fn test_article_url_trims_trailing_slash() {
        let api = HttpContentApi::new(
            Client::new(),
            "https://api.example.com/v1/",
            None,
            RetryConfig::default(),
        );
        assert_eq!(
            api.article_url("bm_1"),
            "https://api.example.com/v1/bookmarks/bm_1/article"
        );
    }

    #[test]
    fn test_article_url_encodes_id() {
        let api = HttpContentApi::new(
            Client::new(),
            "https://api.example.com",
            None,
            RetryConfig::default(),
        );
        assert_eq!(
            api.article_url("a/b?c"),
            "https://api.example.com/bookmarks/a%2Fb%3Fc/article"
        );
    }

    #[test]
    fn test_debug_redacts_token() {
        let api = HttpContentApi::new(
            Client::new(),
            "https://api.example.com",
            Some("secret".into()),
            RetryConfig::default(),
        );
        assert!(!format!("{:?}", api).contains("secret"));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_error() {
        let api = HttpContentApi::new(
            Client::new(),
            "http://127.0.0.1:1",
            None,
            RetryConfig {
                max_retries: 1,
                base_delay: Duration::ZERO,
                max_delay: Duration::ZERO,
            },
        );
        let err = api.fetch_content("bm_1").await.unwrap_err();
        assert!(matches!(err, ContentError::Network { .. }));
    }
}
