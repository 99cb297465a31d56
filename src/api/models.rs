//! API models for the vidqueue HTTP surface.
//!
//! Request bodies are plain JSON objects:
//!
//! ```json
//! { "url": "https://www.youtube.com/watch?v=..." }
//! { "urls": ["https://a.example/v/1", "https://b.example/v/2"] }
//! ```
//!
//! Queue endpoints answer with [`JobView`] projections; errors always come
//! back as [`ErrorResponse`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::observability::MetricsSnapshot;
use crate::queue::{JobId, JobView, QueueStats};

/// Body of the single-url endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct UrlRequest {
    pub url: String,
}

/// Body of `POST /api/queue/add`; `urls` is checked by hand so that a bad
/// shape yields the queue's own error message
#[derive(Debug, Clone, Deserialize)]
pub struct UrlsRequest {
    #[serde(default)]
    pub urls: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamQuery {
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThumbnailResponse {
    pub thumbnail: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewResponse {
    pub stream_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueResponse {
    pub queued: usize,
    pub job_ids: Vec<JobId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueResponse {
    pub queue: Vec<JobView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelResponse {
    pub id: JobId,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub components: HashMap<String, String>,
    pub version: String,
    pub queue: QueueStats,
    pub metrics: MetricsSnapshot,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}
