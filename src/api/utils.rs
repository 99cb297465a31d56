//! API utility functions
//!
//! Pure, stateless helpers for request processing, kept apart from the
//! handlers so they can be unit tested.

use std::path::Path;

use serde::de::DeserializeOwned;

use crate::api::error::ApiError;

/// Deserialize a JSON request body
///
/// An empty body is reported as such instead of as an EOF parse error.
pub fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(ApiError::InvalidPayload("request body is empty".to_string()));
    }
    Ok(serde_json::from_slice(body)?)
}

/// Whether `path` lies inside `root`, component-wise
///
/// Both paths are expected to be canonical already; `..` segments are
/// treated as escaping.
pub fn is_within(root: &Path, path: &Path) -> bool {
    path.starts_with(root)
        && !path
            .components()
            .any(|component| matches!(component, std::path::Component::ParentDir))
}

/// Only http(s) urls may be proxied
pub fn validate_stream_url(url: &str) -> Result<&str, ApiError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(ApiError::InvalidInput("url is required".to_string()));
    }
    let lower = url.to_ascii_lowercase();
    if !(lower.starts_with("http://") || lower.starts_with("https://")) {
        return Err(ApiError::InvalidInput(format!(
            "unsupported stream url scheme: {url}"
        )));
    }
    Ok(url)
}
