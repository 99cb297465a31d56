use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tower::ServiceExt; // for `oneshot`

use vidqueue::api::models::EnqueueResponse;
use vidqueue::api::state::AppState;
use vidqueue::config::Config;
use vidqueue::fetch::{FetchError, FetchRequest, Fetcher, ProbeError};
use vidqueue::queue::{JobResult, JobStatus, ProgressSink};
use vidqueue::worker::cleanup::NoopCleanup;

/// Fetcher that never touches the network.
///
/// Downloads write a small file named after the last url segment into the
/// output directory; probes answer with canned metadata.
struct FakeFetcher {
    output_dir: std::path::PathBuf,
}

impl Fetcher for FakeFetcher {
    fn fetch(
        &self,
        request: &FetchRequest,
        _progress: &ProgressSink,
    ) -> Result<JobResult, FetchError> {
        let media_id = request.url.rsplit('/').next().unwrap_or("x").to_string();
        if media_id == "outside" {
            // report a file the server must refuse to serve
            return Ok(JobResult {
                title: "outside".to_string(),
                id: media_id,
                filepath: std::env::temp_dir(),
            });
        }

        let filepath = self.output_dir.join(format!("{media_id}.mp4"));
        std::fs::write(&filepath, b"0123456789").map_err(FetchError::Io)?;
        Ok(JobResult {
            title: format!("video {media_id}"),
            id: media_id,
            filepath,
        })
    }

    fn probe(&self, url: &str) -> Result<Value, ProbeError> {
        match url {
            "https://video.test/watch" => Ok(json!({
                "id": "watch",
                "thumbnail": "https://img.test/fallback.jpg",
                "thumbnails": [
                    {"url": "https://img.test/small.jpg", "width": 120, "height": 90},
                    {"url": "https://img.test/large.jpg", "width": 1280, "height": 720}
                ],
                "formats": [
                    {"url": "https://cdn.test/360.mp4", "height": 360},
                    {"url": "https://cdn.test/720.mp4", "height": 720}
                ]
            })),
            "https://video.test/bare" => Ok(json!({"id": "bare"})),
            _ => Err(ProbeError::Process {
                message: "Unsupported URL".to_string(),
                stderr: "ERROR: Unsupported URL".to_string(),
            }),
        }
    }
}

/// Builds a test app with an isolated download directory
fn build_test_app() -> (Router, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");

    let config_toml = format!(
        r#"
[downloads]
output_dir = "{}"

[runner]
poll_interval_ms = 10
progress_drain_ms = 200
"#,
        temp_dir.path().display()
    );
    let config: Config = toml::from_str(&config_toml).expect("Failed to parse test config");

    let fetcher = Arc::new(FakeFetcher {
        output_dir: temp_dir.path().to_path_buf(),
    });
    let state = AppState::new(config, fetcher, Arc::new(NoopCleanup))
        .expect("Failed to build app state");

    (vidqueue::api::router(state), temp_dir)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method("POST")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method("GET")
        .body(Body::empty())
        .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = ServiceExt::<Request<Body>>::oneshot(app.clone(), request)
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or(Value::Null)
    };
    (status, value)
}

async fn enqueue(app: &Router, urls: Value) -> EnqueueResponse {
    let (status, body) = send(app, post_json("/api/queue/add", json!({ "urls": urls }))).await;
    assert_eq!(status, StatusCode::OK);
    serde_json::from_value(body).unwrap()
}

async fn wait_for_status(app: &Router, id: &str, expected: &str) -> Value {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let (status, job) = send(app, get(&format!("/api/jobs/{id}"))).await;
        assert_eq!(status, StatusCode::OK);
        if job["status"] == expected {
            return job;
        }
        assert!(Instant::now() < deadline, "job {id} never reached {expected}: {job}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _temp_dir) = build_test_app();

    let (status, health) = send(&app, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "healthy");
    assert!(health["version"].is_string());

    let components = health["components"].as_object().unwrap();
    assert!(components.contains_key("api"));
    assert!(components.contains_key("job_store"));
    assert_eq!(components["dispatcher"], "idle");
    assert_eq!(health["metrics"]["jobs_enqueued"], 0);
}

#[tokio::test]
async fn test_download_single_url() {
    let (app, _temp_dir) = build_test_app();

    let (status, body) = send(
        &app,
        post_json("/api/download", json!({"url": "https://video.test/one"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["queued"], 1);
    let id = body["job_ids"][0].as_str().unwrap().to_string();

    let job = wait_for_status(&app, &id, "done").await;
    assert_eq!(job["url"], "https://video.test/one");
    assert_eq!(job["title"], "video one");
    assert!(job["finished_at"].is_number());
}

#[tokio::test]
async fn test_download_blank_url_queues_nothing() {
    let (app, _temp_dir) = build_test_app();

    let (status, body) = send(&app, post_json("/api/download", json!({"url": "   "}))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["queued"], 0);
    assert!(body["job_ids"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_queue_add_skips_blank_entries() {
    let (app, _temp_dir) = build_test_app();

    let response = enqueue(
        &app,
        json!(["https://video.test/a", "", "  ", "https://video.test/b"]),
    )
    .await;

    assert_eq!(response.queued, 2);
    assert_eq!(response.job_ids.len(), 2);
    assert_ne!(response.job_ids[0], response.job_ids[1]);

    let (status, body) = send(&app, get("/api/queue")).await;
    assert_eq!(status, StatusCode::OK);
    let queue = body["queue"].as_array().unwrap();
    assert_eq!(queue.len(), 2);
    assert_eq!(queue[0]["url"], "https://video.test/a");
    assert_eq!(queue[1]["url"], "https://video.test/b");
}

#[tokio::test]
async fn test_queue_add_rejects_non_list() {
    let (app, _temp_dir) = build_test_app();

    for urls in [json!("https://video.test/a"), json!({"a": 1}), json!(null)] {
        let (status, body) =
            send(&app, post_json("/api/queue/add", json!({ "urls": urls }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_INPUT");
    }

    let (status, body) = send(
        &app,
        post_json("/api/queue/add", json!({"urls": ["https://video.test/a", 5]})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_INPUT");

    // nothing was created by the rejected requests
    let (_, body) = send(&app, get("/api/queue")).await;
    assert!(body["queue"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_malformed_json_rejected() {
    let (app, _temp_dir) = build_test_app();

    let request = Request::builder()
        .uri("/api/download")
        .method("POST")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = send(&app, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_PAYLOAD");
}

#[tokio::test]
async fn test_get_job_not_found() {
    let (app, _temp_dir) = build_test_app();

    let (status, body) = send(&app, get("/api/jobs/nonexistent-job-id")).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_cancel_unknown_and_finished_jobs() {
    let (app, _temp_dir) = build_test_app();

    let request = Request::builder()
        .uri("/api/jobs/nonexistent-job-id")
        .method("DELETE")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "Job not found or cannot be cancelled");

    let response = enqueue(&app, json!(["https://video.test/fin"])).await;
    let id = &response.job_ids[0];
    wait_for_status(&app, id, "done").await;

    let request = Request::builder()
        .uri(format!("/api/jobs/{id}"))
        .method("DELETE")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let job = wait_for_status(&app, id, "done").await;
    assert_eq!(job["status"], JobStatus::Done.as_str());
}

#[tokio::test]
async fn test_thumbnail_picks_largest() {
    let (app, _temp_dir) = build_test_app();

    let (status, body) = send(
        &app,
        post_json("/api/thumbnail", json!({"url": "https://video.test/watch"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["thumbnail"], "https://img.test/large.jpg");
}

#[tokio::test]
async fn test_thumbnail_missing() {
    let (app, _temp_dir) = build_test_app();

    let (status, body) = send(
        &app,
        post_json("/api/thumbnail", json!({"url": "https://video.test/bare"})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "No thumbnail found");
}

#[tokio::test]
async fn test_preview_and_probe_failure() {
    let (app, _temp_dir) = build_test_app();

    let (status, body) = send(
        &app,
        post_json("/api/preview", json!({"url": "https://video.test/watch"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stream_url"], "https://cdn.test/720.mp4");

    let (status, body) = send(
        &app,
        post_json("/api/preview", json!({"url": "https://video.test/bare"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "No preview URL found");

    let (status, body) = send(
        &app,
        post_json("/api/preview", json!({"url": "https://elsewhere.test/x"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "PROBE_FAILED");
}

#[tokio::test]
async fn test_preview_stream_rejects_non_http() {
    let (app, _temp_dir) = build_test_app();

    let (status, _) = send(&app, get("/api/preview/stream?url=file%3A%2F%2F%2Fetc%2Fpasswd")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, get("/api/preview/stream")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_job_file_served_for_done_job() {
    let (app, _temp_dir) = build_test_app();

    let response = enqueue(&app, json!(["https://video.test/clip"])).await;
    let id = &response.job_ids[0];
    wait_for_status(&app, id, "done").await;

    let request = get(&format!("/api/jobs/{id}/file"));
    let response = ServiceExt::<Request<Body>>::oneshot(app.clone(), request)
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let disposition = response
        .headers()
        .get(header::CONTENT_DISPOSITION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert_eq!(disposition, "attachment; filename=\"clip.mp4\"");

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..], b"0123456789");
}

#[tokio::test]
async fn test_job_file_outside_output_dir_forbidden() {
    let (app, _temp_dir) = build_test_app();

    let response = enqueue(&app, json!(["https://video.test/outside"])).await;
    let id = &response.job_ids[0];
    wait_for_status(&app, id, "done").await;

    let (status, body) = send(&app, get(&format!("/api/jobs/{id}/file"))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "FORBIDDEN");

    let (status, _) = send(&app, get("/api/jobs/nonexistent-job-id/file")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
