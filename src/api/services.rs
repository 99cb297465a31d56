use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    Json,
    body::{Body, Bytes},
    extract::{Path, Query, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::Value;
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::{debug, info};

use super::{
    models::{
        CancelResponse, EnqueueResponse, HealthResponse, PreviewResponse, QueueResponse,
        StreamQuery, ThumbnailResponse, UrlRequest, UrlsRequest,
    },
    proxy,
    state::AppState,
    utils::{is_within, parse_json, validate_stream_url},
};
use crate::api::error::ApiError;
use crate::fetch::media;
use crate::queue::{JobStatus, parse_url_list};

/// Thumbnail lookup (POST /api/thumbnail)
///
/// Probes the url without downloading and returns the largest thumbnail
/// by pixel area, falling back to the extractor's `thumbnail` field.
/// Responds 400 when the probe fails or no thumbnail exists.
pub async fn thumbnail(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<ThumbnailResponse>, ApiError> {
    let request: UrlRequest = parse_json(&body)?;
    let info = probe(&state, request.url).await?;

    let thumbnail = media::best_thumbnail(&info)
        .ok_or_else(|| ApiError::ProbeFailed("No thumbnail found".to_string()))?;

    Ok(Json(ThumbnailResponse { thumbnail }))
}

/// Preview lookup (POST /api/preview)
///
/// Returns a direct media url the browser can play. For playlists the
/// first entry is used. Responds 400 when nothing playable is found.
pub async fn preview(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<PreviewResponse>, ApiError> {
    let request: UrlRequest = parse_json(&body)?;
    let info = probe(&state, request.url).await?;

    let stream_url = media::stream_url(&info)
        .ok_or_else(|| ApiError::ProbeFailed("No preview URL found".to_string()))?;

    Ok(Json(PreviewResponse { stream_url }))
}

/// Preview relay (GET /api/preview/stream?url=...)
///
/// Some CDNs refuse cross-origin playback; this endpoint streams the media
/// through the server instead. The caller's `Range` header is forwarded so
/// seeking works, and the upstream status (e.g. 206) is passed through.
pub async fn preview_stream(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let url = validate_stream_url(query.url.as_deref().unwrap_or_default())?;

    let upstream = state
        .proxy
        .open(url, headers.get(header::RANGE))
        .await
        .map_err(|e| ApiError::Upstream(e.to_string()))?;

    debug!(url, status = %upstream.status(), "Relaying preview stream");
    Ok(proxy::relay(upstream))
}

/// Single download (POST /api/download)
///
/// Queues one url. A blank url queues nothing and reports `queued: 0`.
pub async fn download(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<EnqueueResponse>, ApiError> {
    let request: UrlRequest = parse_json(&body)?;
    let job_ids = state.broker.enqueue([request.url]).await;

    Ok(Json(EnqueueResponse {
        queued: job_ids.len(),
        job_ids,
    }))
}

/// Batch enqueue (POST /api/queue/add)
///
/// `urls` must be a JSON array of strings; anything else is rejected with
/// 400 INVALID_INPUT before any job is created. Blank entries are skipped.
/// The whole batch lands in the queue contiguously, in request order.
pub async fn queue_add(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<EnqueueResponse>, ApiError> {
    let request: UrlsRequest = parse_json(&body)?;
    let urls = parse_url_list(&request.urls)?;
    let job_ids = state.broker.enqueue(urls).await;

    info!(queued = job_ids.len(), "Batch enqueued");
    Ok(Json(EnqueueResponse {
        queued: job_ids.len(),
        job_ids,
    }))
}

/// Queue listing (GET /api/queue)
///
/// Every job ever enqueued, in insertion order, as a consistent snapshot.
pub async fn queue(State(state): State<AppState>) -> Json<QueueResponse> {
    Json(QueueResponse {
        queue: state.broker.snapshot().await,
    })
}

/// Job status endpoint (GET /api/jobs/{id})
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let view = state
        .broker
        .view(&id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Job not found: {id}")))?;

    Ok((StatusCode::OK, Json(view)))
}

/// Cancel endpoint (DELETE /api/jobs/{id})
///
/// A queued job is cancelled immediately. A running job is only flagged:
/// its download keeps going until the fetcher returns, then the job ends
/// as `cancelled` and its files are removed. Cancelling does not make the
/// download finish sooner.
///
/// Unknown and already finished jobs yield 404.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CancelResponse>, ApiError> {
    if !state.broker.request_cancel(&id).await {
        return Err(ApiError::NotFound(
            "Job not found or cannot be cancelled".to_string(),
        ));
    }

    Ok(Json(CancelResponse {
        id,
        cancelled: true,
    }))
}

/// Artifact download (GET /api/jobs/{id}/file)
///
/// Serves the file of a `done` job, with range support. The stored path is
/// canonicalized and must stay inside the configured output directory;
/// anything else is refused with 403.
pub async fn job_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    request: Request,
) -> Result<Response, ApiError> {
    let job = state
        .broker
        .lookup(&id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Job not found: {id}")))?;

    let result = match (job.status, job.result) {
        (JobStatus::Done, Some(result)) => result,
        (status, _) => {
            return Err(ApiError::NotFound(format!(
                "Job {id} has no file (status: {status})"
            )));
        }
    };

    let root = tokio::fs::canonicalize(&state.config.downloads.output_dir)
        .await
        .map_err(|_| ApiError::NotFound("Download directory is unavailable".to_string()))?;
    let path = tokio::fs::canonicalize(&result.filepath)
        .await
        .map_err(|_| ApiError::NotFound(format!("File for job {id} is missing")))?;

    if !is_within(&root, &path) {
        return Err(ApiError::Forbidden(
            "File is outside the download directory".to_string(),
        ));
    }

    let response = ServeFile::new(&path)
        .oneshot(request)
        .await
        .unwrap_or_else(|never| match never {});

    let mut response = response.map(Body::new).into_response();
    if let Some(value) = path
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.contains('"'))
        .and_then(|name| HeaderValue::from_str(&format!("attachment; filename=\"{name}\"")).ok())
    {
        response.headers_mut().insert(header::CONTENT_DISPOSITION, value);
    }

    Ok(response)
}

/// Health check endpoint (GET /health)
///
/// Reports component status, per-status job counts and lifecycle counters.
/// The dispatcher shows as `idle` until the first job is queued.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let mut components = HashMap::new();
    components.insert("api".to_string(), "healthy".to_string());
    components.insert("job_store".to_string(), "healthy".to_string());
    components.insert(
        "dispatcher".to_string(),
        if state.broker.is_runner_active() {
            "running"
        } else {
            "idle"
        }
        .to_string(),
    );

    let response = HealthResponse {
        status: "healthy".to_string(),
        components,
        version: env!("CARGO_PKG_VERSION").to_string(),
        queue: state.broker.stats().await,
        metrics: state.metrics.snapshot(),
    };

    (StatusCode::OK, Json(response))
}

/// Run a metadata probe on the blocking pool
async fn probe(state: &AppState, url: String) -> Result<Value, ApiError> {
    let fetcher = Arc::clone(&state.fetcher);
    tokio::task::spawn_blocking(move || fetcher.probe(&url))
        .await
        .map_err(|e| ApiError::Internal(format!("probe task failed: {e}")))?
        .map_err(ApiError::from)
}
