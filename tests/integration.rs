use axum::body::Body;
use axum::http::{Request, StatusCode};
use bytes::Bytes;
use loadkit::config::LoadKitConfig;
use loadkit::fetch::{Relayed, Upstream};
use loadkit::{app, router, AppState, LoadKitError};
use reqwest::Url;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tower::util::ServiceExt; // for `oneshot`

/// Upstream double that never touches the network.
struct StubUpstream {
    calls: AtomicUsize,
    outcome: std::result::Result<Relayed, String>,
}

impl StubUpstream {
    fn replying(status: u16, body: &'static str) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            outcome: Ok(Relayed {
                status,
                content_type: Some(mime::TEXT_PLAIN),
                body: Bytes::from_static(body.as_bytes()),
            }),
        })
    }

    fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            outcome: Err(message.to_string()),
        })
    }
}

#[async_trait::async_trait]
impl Upstream for StubUpstream {
    async fn get(&self, _url: &Url) -> Result<Relayed, LoadKitError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.outcome {
            Ok(r) => Ok(r.clone()),
            Err(m) => Err(LoadKitError::NetworkError(m.clone())),
        }
    }
}

fn test_router() -> axum::Router {
    router(LoadKitConfig::default()).unwrap()
}

fn router_with(upstream: Arc<StubUpstream>) -> axum::Router {
    let state = AppState::new(LoadKitConfig::default())
        .unwrap()
        .with_upstream(upstream);
    app(state)
}

async fn get(app: axum::Router, uri: &str) -> (StatusCode, String) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

fn reported_operations(body: &str) -> u64 {
    // "consumed CPU ... for {ops} operations in {elapsed}\n"
    let before = body.split(" operations in ").next().unwrap();
    before.rsplit(' ').next().unwrap().parse().unwrap()
}

#[tokio::test]
async fn test_root() {
    let (status, body) = get(test_router(), "/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "move along, nothing to see here");
}

#[tokio::test]
async fn test_cpu_defaults_to_100ms() {
    let start = Instant::now();
    let (status, body) = get(test_router(), "/cpu").await;
    assert_eq!(status, StatusCode::OK);
    assert!(start.elapsed() >= Duration::from_millis(100));
    assert!(body.starts_with("consumed CPU for "), "{body:?}");
    assert!(body.ends_with('\n'));
    assert!(reported_operations(&body) > 0);
}

#[tokio::test]
async fn test_cpu_operation_bound() {
    let (status, body) = get(test_router(), "/cpu?duration=10s&operations=1000").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reported_operations(&body), 1000);
}

#[tokio::test]
async fn test_cpu_zero_duration_returns_immediately() {
    let start = Instant::now();
    let (status, body) = get(test_router(), "/cpu?duration=0&operations=1000").await;
    assert_eq!(status, StatusCode::OK);
    assert!(reported_operations(&body) <= 1000);
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_cpu_parallel_reports_workers() {
    let (status, body) = get(test_router(), "/cpu?duration=20ms&parallel=true").await;
    assert_eq!(status, StatusCode::OK);
    let expected = format!(
        "consumed CPU on {} workers for ",
        loadkit::workload::cpu::available_workers()
    );
    assert!(body.starts_with(&expected), "{body:?}");
}

#[tokio::test]
async fn test_cpu_rejects_malformed_input() {
    for uri in [
        "/cpu?duration=abc",
        "/cpu?duration=-1s",
        "/cpu?duration=10",
        "/cpu?operations=-5",
        "/cpu?operations=lots",
        "/cpu?parallel=maybe",
    ] {
        let (status, _) = get(test_router(), uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
    }
}

#[tokio::test]
async fn test_memory_default_size() {
    let (status, body) = get(test_router(), "/memory").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "allocated 10.00MB (10485760 bytes) of memory\n");
}

#[tokio::test]
async fn test_memory_bare_byte_count() {
    let (status, body) = get(test_router(), "/memory?byteSize=10485760").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "allocated 10.00MB (10485760 bytes) of memory\n");
}

#[tokio::test]
async fn test_memory_zero_and_small_sizes() {
    let (_, body) = get(test_router(), "/memory?size=0").await;
    assert_eq!(body, "allocated 0.00B (0 bytes) of memory\n");

    let (_, body) = get(test_router(), "/memory?size=1KB").await;
    assert_eq!(body, "allocated 1.00KB (1024 bytes) of memory\n");
}

#[tokio::test]
async fn test_memory_hold_keeps_block_alive() {
    let start = Instant::now();
    let (status, _) = get(test_router(), "/memory?size=1MB&hold=50ms").await;
    assert_eq!(status, StatusCode::OK);
    assert!(start.elapsed() >= Duration::from_millis(50));
}

#[tokio::test]
async fn test_memory_rejects_malformed_size() {
    for uri in [
        "/memory?size=lots",
        "/memory?size=10XB",
        "/memory?size=-1MB",
        "/memory?size=20EB",
        "/memory?size=9EB",
        "/memory?hold=soon",
    ] {
        let (status, _) = get(test_router(), uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
    }
}

#[tokio::test]
async fn test_time_default() {
    let start = Instant::now();
    let (status, body) = get(test_router(), "/time").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "slept for 100ms\n");
    assert!(start.elapsed() >= Duration::from_millis(100));
}

#[tokio::test]
async fn test_time_formats_duration() {
    let (_, body) = get(test_router(), "/time?duration=1.5ms").await;
    assert_eq!(body, "slept for 1.5ms\n");
}

#[tokio::test]
async fn test_time_rejects_malformed_duration() {
    let (status, _) = get(test_router(), "/time?duration=soon").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_time_interrupted_by_shutdown() {
    let shutdown = CancellationToken::new();
    shutdown.cancel();
    let state = AppState::new(LoadKitConfig::default())
        .unwrap()
        .with_shutdown(shutdown);

    let start = Instant::now();
    let (status, _) = get(app(state), "/time?duration=10s").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_request_without_url_makes_no_call() {
    let upstream = StubUpstream::replying(200, "unused");
    for uri in ["/request", "/request?url="] {
        let (status, body) = get(router_with(upstream.clone()), uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("missing required query parameter \"url\""));
    }
    assert_eq!(upstream.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_request_with_unparseable_url() {
    let upstream = StubUpstream::replying(200, "unused");
    let (status, _) = get(router_with(upstream.clone()), "/request?url=not-a-url").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(upstream.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_request_mirrors_upstream() {
    let upstream = StubUpstream::replying(418, "short and stout");
    let response = router_with(upstream.clone())
        .oneshot(
            Request::builder()
                .uri("/request?url=http://upstream.test/teapot")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "text/plain"
    );
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..], b"short and stout");
    assert_eq!(upstream.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_request_network_failure_is_bad_gateway() {
    let upstream = StubUpstream::failing("connection refused");
    let (status, body) = get(router_with(upstream), "/request?url=http://upstream.test/").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body.contains("connection refused"));
}

#[tokio::test]
async fn test_health() {
    let (status, body) = get(test_router(), "/health").await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["service"], "loadkit");
    assert!(json["started_at"].is_i64());
}

#[tokio::test]
async fn test_metrics_reflect_workloads() {
    let app = test_router();
    let (status, _) = get(app.clone(), "/cpu?duration=5ms").await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = get(app.clone(), "/memory?size=4KB").await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = get(app, "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("loadkit_cpu_operations_total"));
    assert!(body.contains("loadkit_memory_allocated_bytes_total 4096"));
    assert!(body.contains("loadkit_http_requests_total{method=\"GET\",route=\"/cpu\",status=\"200\"} 1"));
    assert!(body.contains("loadkit_cpu_burns_active 0"));
    assert!(body.contains("loadkit_memory_held_bytes 0"));
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let (status, body) = get(test_router(), "/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body.is_empty());
}

#[tokio::test]
async fn test_request_id_is_propagated() {
    let response = test_router()
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert!(response.headers().contains_key("x-request-id"));

    let response = test_router()
        .oneshot(
            Request::builder()
                .uri("/")
                .header("x-request-id", "abc-123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.headers()["x-request-id"], "abc-123");
}

#[tokio::test]
async fn test_concurrent_cpu_requests_are_independent() {
    let app = test_router();
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let app = app.clone();
            tokio::spawn(async move {
                let start = Instant::now();
                let (status, body) = get(app, "/cpu?duration=30ms").await;
                (status, body, start.elapsed())
            })
        })
        .collect();

    for handle in handles {
        let (status, body, elapsed) = handle.await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert!(reported_operations(&body) > 0);
        assert!(elapsed >= Duration::from_millis(30));
    }
}
