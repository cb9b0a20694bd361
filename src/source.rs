//! The remote side of the cache
//!
//! A [`RemoteSource`] is whatever holds the authoritative data. The engine only
//! ever hands it a cache key and expects an opaque JSON payload back.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Reasons a remote fetch can fail
#[derive(Debug, Error)]
pub enum SourceError {
    /// Transport-level failure (DNS, connect, TLS, body read)
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server answered with a non-success status
    #[error("Server returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The API reported an error inside an otherwise valid response
    #[error("API error {code}: {message}")]
    Api { code: String, message: String },

    /// The response body could not be understood
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// The key could not be turned into a request
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// No answer within the allotted time
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Any other reason the source could not be reached
    #[error("Source unavailable: {0}")]
    Unavailable(String),
}

/// Authoritative data behind the cache
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Fetches the current payload for `key`
    async fn fetch(&self, key: &str) -> Result<Value, SourceError>;
}

#[async_trait]
impl<S: RemoteSource + ?Sized> RemoteSource for Arc<S> {
    async fn fetch(&self, key: &str) -> Result<Value, SourceError> {
        (**self).fetch(key).await
    }
}

#[async_trait]
impl<S: RemoteSource + ?Sized> RemoteSource for Box<S> {
    async fn fetch(&self, key: &str) -> Result<Value, SourceError> {
        (**self).fetch(key).await
    }
}
