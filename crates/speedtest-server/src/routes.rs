use std::convert::Infallible;
use std::io;
use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::{Query, State},
    http::{HeaderMap, HeaderName, HeaderValue, header},
    response::IntoResponse,
};
use futures_util::{Stream, StreamExt, TryStreamExt};
use serde::Deserialize;
use speedtest_engine::{
    ByteSink, CHUNK_SIZE, ChunkGenerator, ChunkPlan, DEFAULT_DOWNLOAD_MB, DEFAULT_DURATION_SECS,
    Direction, MAX_DOWNLOAD_MB, MB, SessionConfig, SessionLogger, WriteOutcome,
    clamp_duration_secs, run_session,
};
use speedtest_types::{PingResponse, ProgressEvent, ServiceStatus, TestResult, UploadResponse, sse_frame};
use tokio_util::io::{ReaderStream, StreamReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::backend::{Engine, Selector};
use crate::error::ApiError;

const X_CONTENT_SIZE_MB: HeaderName = HeaderName::from_static("x-content-size-mb");
const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

/// Shared application state for all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub server_id: String,
    pub selector: Arc<Selector>,
    pub engine: Arc<Engine>,
    /// Cancelled on shutdown; every streaming session listens on a child.
    pub shutdown: CancellationToken,
    pub logger: Arc<dyn SessionLogger>,
}

// ── Query parameters ────────────────────────────────────────────────────

/// Values that are not integers fall back to the default.
fn parse_int(value: Option<&str>, default: i64) -> i64 {
    value
        .and_then(|v| v.trim().parse::<i64>().ok())
        .unwrap_or(default)
}

#[derive(Debug, Deserialize)]
pub struct SizeQuery {
    pub size: Option<String>,
}

impl SizeQuery {
    fn size_mb(&self) -> i64 {
        parse_int(self.size.as_deref(), DEFAULT_DOWNLOAD_MB)
    }
}

#[derive(Debug, Deserialize)]
pub struct DurationQuery {
    pub duration: Option<String>,
}

impl DurationQuery {
    fn duration_secs(&self) -> i64 {
        parse_int(self.duration.as_deref(), DEFAULT_DURATION_SECS)
    }
}

// ── Handlers ────────────────────────────────────────────────────────────

/// GET /: service status.
pub async fn status() -> Json<ServiceStatus> {
    Json(ServiceStatus {
        service: "speedtest-server".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        status: "running".into(),
    })
}

/// GET /health: liveness check.
pub async fn health() -> &'static str {
    "ok"
}

/// GET /ping: latency check with a server timestamp.
pub async fn ping(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CACHE_CONTROL, "no-cache, no-store, must-revalidate")],
        Json(PingResponse {
            status: "pong".into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            server_id: state.server_id.clone(),
        }),
    )
}

/// GET /download?size=MB: stream random bytes, flushed chunk by chunk.
///
/// The generator writes into a pipe whose read half is the response body, so
/// a client disconnect surfaces as a failed write and stops generation.
pub async fn download(Query(query): Query<SizeQuery>) -> impl IntoResponse {
    let plan = ChunkPlan::from_size_mb(query.size_mb(), MAX_DOWNLOAD_MB);
    let (mut tx, rx) = tokio::io::duplex(CHUNK_SIZE);

    tokio::spawn(async move {
        let mut generator = ChunkGenerator::new(plan);
        match generator.write_to(&mut tx, |_| {}).await {
            WriteOutcome::Complete { bytes } => {
                info!(
                    "Download complete: {} bytes ({:.2} MB)",
                    bytes,
                    bytes as f64 / MB as f64
                );
            }
            WriteOutcome::Interrupted { bytes, error } => {
                info!(
                    "Download interrupted: {} (sent {}/{} bytes)",
                    error, bytes, plan.total_bytes
                );
            }
        }
    });

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(plan.total_bytes));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache, no-store"));
    headers.insert(X_CONTENT_SIZE_MB, HeaderValue::from(plan.size_mb()));

    (headers, Body::from_stream(ReaderStream::with_capacity(rx, CHUNK_SIZE)))
}

/// POST /upload: drain the body and report the measured rate.
pub async fn upload(body: Body) -> Result<impl IntoResponse, ApiError> {
    let mut reader = StreamReader::new(body.into_data_stream().map_err(io::Error::other));
    let report = ByteSink::new()
        .consume(&mut reader, |_| {})
        .await
        .map_err(ApiError::Read)?;

    let response = UploadResponse {
        bytes: report.bytes,
        duration_ms: report.duration_ms(),
        speed_mbps: report.speed_mbps(),
    };
    info!(
        "Upload complete: {} bytes, {:.2} Mbps",
        response.bytes, response.speed_mbps
    );

    Ok(([(header::CACHE_CONTROL, "no-cache, no-store")], Json(response)))
}

/// GET /stream/download?duration=s: realtime delegated download test.
pub async fn stream_download(
    State(state): State<AppState>,
    Query(query): Query<DurationQuery>,
) -> impl IntoResponse {
    event_stream(state, Direction::Download, query.duration_secs())
}

/// GET /stream/upload?duration=s: realtime delegated upload test.
pub async fn stream_upload(
    State(state): State<AppState>,
    Query(query): Query<DurationQuery>,
) -> impl IntoResponse {
    event_stream(state, Direction::Upload, query.duration_secs())
}

/// GET /test/download?duration=s: delegated download test, single result.
pub async fn test_download(
    State(state): State<AppState>,
    Query(query): Query<DurationQuery>,
) -> Result<Json<TestResult>, ApiError> {
    run_test(&state, Direction::Download, query.duration_secs()).await
}

/// GET /test/upload?duration=s: delegated upload test, single result.
pub async fn test_upload(
    State(state): State<AppState>,
    Query(query): Query<DurationQuery>,
) -> Result<Json<TestResult>, ApiError> {
    run_test(&state, Direction::Upload, query.duration_secs()).await
}

// ── Helpers ─────────────────────────────────────────────────────────────

fn start_session(
    state: &AppState,
    direction: Direction,
    duration_secs: i64,
) -> impl Stream<Item = ProgressEvent> + Send + 'static {
    info!(
        "Starting {} test ({}s)",
        direction,
        clamp_duration_secs(duration_secs)
    );
    run_session(
        state.selector.clone(),
        state.engine.clone(),
        SessionConfig::new(direction, duration_secs),
        state.shutdown.child_token(),
        state.logger.clone(),
    )
}

/// Frame each event as `data: <json>\n\n`. Failures after this point can
/// only be reported in-band.
fn event_stream(state: AppState, direction: Direction, duration_secs: i64) -> impl IntoResponse {
    let frames = start_session(&state, direction, duration_secs).filter_map(|event| async move {
        match sse_frame(&event) {
            Ok(frame) => Some(Ok::<_, Infallible>(frame)),
            Err(e) => {
                warn!("Failed to encode progress event: {}", e);
                None
            }
        }
    });

    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (X_ACCEL_BUFFERING, "no"),
        ],
        Body::from_stream(frames),
    )
}

/// Run a session to its terminal event and fold it into one result.
async fn run_test(
    state: &AppState,
    direction: Direction,
    duration_secs: i64,
) -> Result<Json<TestResult>, ApiError> {
    let events = start_session(state, direction, duration_secs);
    tokio::pin!(events);

    let mut identity: Option<(String, String, f64)> = None;
    while let Some(event) = events.next().await {
        match event {
            ProgressEvent::Start {
                server_id,
                server_name,
                latency_ms,
            } => identity = Some((server_id, server_name, latency_ms)),
            ProgressEvent::Progress { .. } => {}
            ProgressEvent::Complete {
                speed_mbps,
                elapsed_sec,
            } => {
                let (server_id, server_name, latency_ms) = identity.unwrap_or_default();
                return Ok(Json(TestResult {
                    speed_mbps,
                    elapsed_ms: (elapsed_sec * 1000.0).round() as u64,
                    server_id,
                    server_name,
                    latency_ms,
                }));
            }
            ProgressEvent::Error { kind, message } => {
                return Err(ApiError::Session { kind, message });
            }
        }
    }
    Err(ApiError::Cancelled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build_router;
    use axum::Router;
    use axum::http::{Method, Request, StatusCode};
    use http_body_util::BodyExt;
    use speedtest_engine::{LocalEndpoint, LoopbackEngine, NullLogger, PeerDirectory};
    use speedtest_types::ErrorBody;
    use std::time::Duration;
    use tower::ServiceExt;

    fn app(selector: Selector) -> Router {
        build_router(AppState {
            server_id: "box-1".into(),
            selector: Arc::new(selector),
            engine: Arc::new(Engine::Loopback(LoopbackEngine)),
            shutdown: CancellationToken::new(),
            logger: Arc::new(NullLogger),
        })
    }

    fn loopback_app() -> Router {
        app(Selector::Local(LocalEndpoint::new("box-1")))
    }

    /// No peers configured: discovery always fails.
    fn peerless_app() -> Router {
        app(Selector::Peers(PeerDirectory::new(
            reqwest::Client::new(),
            vec![],
            Duration::from_millis(100),
        )))
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_bytes(response: axum::response::Response) -> bytes::Bytes {
        response.into_body().collect().await.unwrap().to_bytes()
    }

    fn frames(body: &[u8]) -> Vec<serde_json::Value> {
        let text = std::str::from_utf8(body).unwrap();
        assert!(text.ends_with("\n\n"));
        text.split_terminator("\n\n")
            .map(|frame| {
                let json = frame.strip_prefix("data: ").expect("data: prefix");
                serde_json::from_str(json).unwrap()
            })
            .collect()
    }

    #[tokio::test]
    async fn status_and_health() {
        let response = loopback_app().oneshot(get("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let status: ServiceStatus = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(status.status, "running");

        let response = loopback_app().oneshot(get("/health")).await.unwrap();
        assert_eq!(&body_bytes(response).await[..], b"ok");
    }

    #[tokio::test]
    async fn ping_answers_pong() {
        let response = loopback_app().oneshot(get("/ping")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CACHE_CONTROL],
            "no-cache, no-store, must-revalidate"
        );
        let ping: PingResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(ping.status, "pong");
        assert_eq!(ping.server_id, "box-1");
        assert!(ping.timestamp > 0);
    }

    #[tokio::test]
    async fn download_sends_exact_size() {
        let response = loopback_app().oneshot(get("/download?size=1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "1048576");
        assert_eq!(response.headers()[X_CONTENT_SIZE_MB], "1");
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/octet-stream");
        assert_eq!(body_bytes(response).await.len(), 1_048_576);
    }

    #[tokio::test]
    async fn download_size_is_clamped_or_defaulted() {
        for (uri, expected_mb) in [
            ("/download?size=0", "1"),
            ("/download?size=-3", "1"),
            ("/download?size=5000", "100"),
            ("/download?size=abc", "25"),
            ("/download", "25"),
        ] {
            let response = loopback_app().oneshot(get(uri)).await.unwrap();
            assert_eq!(response.headers()[X_CONTENT_SIZE_MB], expected_mb, "{}", uri);
        }
    }

    #[tokio::test]
    async fn download_rejects_post() {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/download")
            .body(Body::empty())
            .unwrap();
        let response = loopback_app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn upload_counts_every_byte() {
        for len in [0usize, 1, 3 * CHUNK_SIZE + 5] {
            let request = Request::builder()
                .method(Method::POST)
                .uri("/upload")
                .body(Body::from(vec![0x5Au8; len]))
                .unwrap();
            let response = loopback_app().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let result: UploadResponse =
                serde_json::from_slice(&body_bytes(response).await).unwrap();
            assert_eq!(result.bytes, len as u64);
            assert!(result.duration_ms >= 1);
        }
    }

    #[tokio::test]
    async fn preflight_gets_cors_headers() {
        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/upload")
            .header(header::ORIGIN, "https://example.com")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .body(Body::empty())
            .unwrap();
        let response = loopback_app().oneshot(request).await.unwrap();
        assert!(response.status().is_success());
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }

    #[tokio::test]
    async fn stream_reports_discovery_failure_in_band() {
        let response = peerless_app()
            .oneshot(get("/stream/download?duration=5"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");

        let events = frames(&body_bytes(response).await);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["type"], "error");
        assert!(events[0]["message"].as_str().unwrap().contains("discovery"));
    }

    #[tokio::test]
    async fn test_endpoint_maps_discovery_failure_to_bad_gateway() {
        let response = peerless_app().oneshot(get("/test/upload")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body: ErrorBody = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(body.error_kind, "discovery");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn streamed_loopback_test_is_ordered() {
        let response = loopback_app()
            .oneshot(get("/stream/download?duration=0"))
            .await
            .unwrap();
        let events = frames(&body_bytes(response).await);

        assert_eq!(events[0]["type"], "start");
        assert_eq!(events[0]["server_id"], "box-1");
        let last = events.last().unwrap();
        assert_eq!(last["type"], "complete");
        assert!(last["elapsed_sec"].as_f64().unwrap() >= 1.0);
        assert!(
            events[1..events.len() - 1]
                .iter()
                .all(|e| e["type"] == "progress")
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn streamed_upload_serves_event_stream() {
        let response = loopback_app()
            .oneshot(get("/stream/upload?duration=1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");
        assert_eq!(response.headers()[X_ACCEL_BUFFERING], "no");

        let events = frames(&body_bytes(response).await);
        assert_eq!(events[0]["type"], "start");
        assert_eq!(events.iter().filter(|e| e["type"] == "complete").count(), 1);
        assert_eq!(events.last().unwrap()["type"], "complete");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn loopback_test_returns_single_result() {
        let response = loopback_app()
            .oneshot(get("/test/upload?duration=1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let result: TestResult = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(result.server_id, "box-1");
        assert!(result.speed_mbps > 0.0);
        assert!(result.elapsed_ms >= 1000);
    }

    #[test]
    fn query_parsing_falls_back() {
        assert_eq!(parse_int(Some("42"), 7), 42);
        assert_eq!(parse_int(Some(" -5 "), 7), -5);
        assert_eq!(parse_int(Some("4.5"), 7), 7);
        assert_eq!(parse_int(None, 7), 7);
    }
}
