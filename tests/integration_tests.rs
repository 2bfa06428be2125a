use ai_gateway::cache::CacheAside;
use ai_gateway::error::{GatewayError, StoreError, UpstreamError};
use ai_gateway::handlers::AppState;
use ai_gateway::policy::{CachePolicy, RateLimitPolicy, WindowMode};
use ai_gateway::rate_limiter::RateLimiter;
use ai_gateway::store::{Expiry, MemoryStore, TtlStore};
use ai_gateway::upstream::Upstream;
use ai_gateway::create_app;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const WINDOW: Duration = Duration::from_secs(60);

/// Upstream stand-in that counts calls and echoes prompts
struct FakeUpstream {
    configured: bool,
    failing: bool,
    completions: AtomicUsize,
    images: AtomicUsize,
}

impl FakeUpstream {
    fn new() -> Self {
        Self {
            configured: true,
            failing: false,
            completions: AtomicUsize::new(0),
            images: AtomicUsize::new(0),
        }
    }

    fn unconfigured() -> Self {
        Self {
            configured: false,
            ..Self::new()
        }
    }

    fn failing() -> Self {
        Self {
            failing: true,
            ..Self::new()
        }
    }

    fn calls(&self) -> usize {
        self.completions.load(Ordering::SeqCst) + self.images.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Upstream for FakeUpstream {
    fn is_configured(&self) -> bool {
        self.configured
    }

    async fn complete(&self, prompt: &str) -> Result<Value, GatewayError> {
        self.completions.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(UpstreamError::Status { status: 500, body: "boom".into() }.into());
        }
        let text = if prompt == "hello" { "hi".to_string() } else { format!("re: {}", prompt) };
        Ok(json!({ "choices": [{ "text": text }] }))
    }

    async fn generate_images(&self, prompt: &str) -> Result<Value, GatewayError> {
        self.images.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(UpstreamError::Timeout.into());
        }
        Ok(json!({
            "created": 1,
            "data": [{ "url": format!("https://img/{}/1", prompt) }, { "url": format!("https://img/{}/2", prompt) }]
        }))
    }
}

/// Store that can be told to fail individual operations
struct FailingStore {
    inner: MemoryStore,
    fail_increment: bool,
    fail_get: bool,
    fail_set: bool,
}

impl FailingStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            fail_increment: false,
            fail_get: false,
            fail_set: false,
        }
    }

    fn check(failing: bool, op: &str) -> Result<(), StoreError> {
        if failing {
            return Err(StoreError::Backend(format!("{} refused: connection reset", op)));
        }
        Ok(())
    }
}

#[async_trait]
impl TtlStore for FailingStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Self::check(self.fail_get, "GET")?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        Self::check(self.fail_set, "SET")?;
        self.inner.set(key, value, ttl).await
    }

    async fn increment(
        &self,
        key: &str,
        delta: i64,
        ttl: Duration,
        expiry: Expiry,
    ) -> Result<i64, StoreError> {
        Self::check(self.fail_increment, "INCRBY")?;
        self.inner.increment(key, delta, ttl, expiry).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.inner.ping().await
    }

    fn backend(&self) -> &'static str {
        "failing"
    }
}

fn app_with_store(store: Arc<dyn TtlStore>, upstream: Arc<FakeUpstream>) -> Router {
    let state = Arc::new(AppState::new(
        store.clone(),
        upstream,
        RateLimiter::new(store.clone(), RateLimitPolicy::new(10, WINDOW, WindowMode::Fixed)),
        CacheAside::new(store, CachePolicy { ttl: WINDOW }),
        "x-real-ip",
    ));
    create_app(state)
}

struct Harness {
    app: Router,
    store: Arc<MemoryStore>,
    upstream: Arc<FakeUpstream>,
}

fn harness(upstream: FakeUpstream, mode: WindowMode) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let upstream = Arc::new(upstream);
    let state = Arc::new(AppState::new(
        store.clone(),
        upstream.clone(),
        RateLimiter::new(store.clone(), RateLimitPolicy::new(10, WINDOW, mode)),
        CacheAside::new(store.clone(), CachePolicy { ttl: WINDOW }),
        "x-real-ip",
    ));
    Harness {
        app: create_app(state),
        store,
        upstream,
    }
}

async fn post(app: &Router, path: &str, ip: Option<&str>, body: Value) -> (StatusCode, String) {
    let mut builder = Request::builder()
        .method("POST")
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(ip) = ip {
        builder = builder.header("x-real-ip", ip);
    }
    let request = builder.body(Body::from(body.to_string())).unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

#[tokio::test]
async fn test_repeated_ask_is_served_from_cache() {
    let h = harness(FakeUpstream::new(), WindowMode::Fixed);

    let (status, body) = post(&h.app, "/chat", Some("1.1.1.1"), json!({ "ask": "hello" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "hi");
    assert_eq!(h.upstream.calls(), 1);

    let (status, body) = post(&h.app, "/chat", Some("1.1.1.1"), json!({ "ask": "hello" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "hi");
    assert_eq!(h.upstream.calls(), 1);

    assert_eq!(h.store.get("chatapi_cache_hello").await.unwrap().as_deref(), Some("hi"));
}

#[tokio::test]
async fn test_images_cache_whole_response() {
    let h = harness(FakeUpstream::new(), WindowMode::Fixed);

    let (status, first) = post(&h.app, "/images", Some("1.1.1.1"), json!({ "prompt": "fox" })).await;
    assert_eq!(status, StatusCode::OK);
    let parsed: Value = serde_json::from_str(&first).unwrap();
    assert_eq!(parsed["created"], 1);
    assert_eq!(parsed["data"].as_array().map(Vec::len), Some(2));
    assert_eq!(parsed["data"][0]["url"], "https://img/fox/1");

    let (_, second) = post(&h.app, "/images", Some("1.1.1.1"), json!({ "prompt": "fox" })).await;
    assert_eq!(first, second);
    assert_eq!(h.upstream.images.load(Ordering::SeqCst), 1);
    assert_eq!(
        h.store.get("dall_e_api_cache_fox").await.unwrap().as_deref(),
        Some(first.as_str())
    );
}

#[tokio::test]
async fn test_near_duplicate_prompts_are_distinct() {
    let h = harness(FakeUpstream::new(), WindowMode::Fixed);

    post(&h.app, "/chat", Some("1.1.1.1"), json!({ "ask": "hello" })).await;
    post(&h.app, "/chat", Some("1.1.1.1"), json!({ "ask": "hello " })).await;
    post(&h.app, "/chat", Some("1.1.1.1"), json!({ "ask": "Hello" })).await;
    assert_eq!(h.upstream.calls(), 3);
}

#[tokio::test]
async fn test_eleventh_request_is_rejected_before_handler() {
    let h = harness(FakeUpstream::new(), WindowMode::Fixed);

    for i in 0..10 {
        let (status, _) = post(&h.app, "/chat", Some("10.0.0.1"), json!({ "ask": format!("q{}", i) })).await;
        assert_eq!(status, StatusCode::OK, "request {} should pass", i + 1);
    }
    assert_eq!(h.upstream.calls(), 10);

    let (status, body) = post(&h.app, "/images", Some("10.0.0.1"), json!({ "prompt": "late" })).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body, "Sorry, too many requests for this IP");
    assert_eq!(h.upstream.calls(), 10);
    assert_eq!(h.store.get("dall_e_api_cache_late").await.unwrap(), None);

    // distinct cache entries for each accepted ask
    for i in 0..10 {
        let key = format!("chatapi_cache_q{}", i);
        assert!(h.store.get(&key).await.unwrap().is_some());
    }

    let (status, _) = post(&h.app, "/chat", Some("10.0.0.2"), json!({ "ask": "q0" })).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_rate_limit_headers() {
    let h = harness(FakeUpstream::new(), WindowMode::Fixed);

    let request = Request::builder()
        .method("POST")
        .uri("/chat")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-real-ip", "7.7.7.7")
        .body(Body::from(r#"{"ask":"hello"}"#))
        .unwrap();
    let response = h.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.headers()["x-ratelimit-limit"], "10");
    assert_eq!(response.headers()["x-ratelimit-remaining"], "9");
    assert!(response.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn test_rejected_requests_still_count() {
    let h = harness(FakeUpstream::new(), WindowMode::Fixed);

    for _ in 0..13 {
        post(&h.app, "/chat", Some("9.9.9.9"), json!({ "ask": "hello" })).await;
    }
    let count = h
        .store
        .increment("IP_count_9.9.9.9", 0, WINDOW, Expiry::OnCreate)
        .await
        .unwrap();
    assert_eq!(count, 13);
}

#[tokio::test]
async fn test_missing_forwarded_header_shares_one_bucket() {
    let h = harness(FakeUpstream::new(), WindowMode::Fixed);

    for _ in 0..10 {
        post(&h.app, "/chat", None, json!({ "ask": "hello" })).await;
    }
    let (status, _) = post(&h.app, "/chat", None, json!({ "ask": "hello" })).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert!(h.store.get("IP_count_unknown").await.unwrap().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_blocked_client_recovers_after_window() {
    let h = harness(FakeUpstream::new(), WindowMode::Fixed);

    for _ in 0..11 {
        post(&h.app, "/chat", Some("5.5.5.5"), json!({ "ask": "hello" })).await;
    }
    let (status, _) = post(&h.app, "/chat", Some("5.5.5.5"), json!({ "ask": "hello" })).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    tokio::time::advance(WINDOW).await;
    let (status, body) = post(&h.app, "/chat", Some("5.5.5.5"), json!({ "ask": "hello" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "hi");
}

#[tokio::test(start_paused = true)]
async fn test_cache_expiry_triggers_fresh_upstream_call() {
    let h = harness(FakeUpstream::new(), WindowMode::Fixed);

    post(&h.app, "/chat", Some("1.1.1.1"), json!({ "ask": "hello" })).await;
    assert_eq!(h.upstream.calls(), 1);

    tokio::time::advance(WINDOW).await;
    let (status, body) = post(&h.app, "/chat", Some("1.1.1.1"), json!({ "ask": "hello" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "hi");
    assert_eq!(h.upstream.calls(), 2);
}

#[tokio::test]
async fn test_missing_credential_touches_nothing() {
    let h = harness(FakeUpstream::unconfigured(), WindowMode::Fixed);

    for (path, body) in [("/chat", json!({ "ask": "hello" })), ("/images", json!({ "prompt": "fox" }))] {
        let (status, text) = post(&h.app, path, Some("1.1.1.1"), body).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(text, "Please add your OPENAI_API_KEY");
    }

    assert_eq!(h.upstream.calls(), 0);
    assert_eq!(h.store.get("chatapi_cache_hello").await.unwrap(), None);
    assert_eq!(h.store.get("dall_e_api_cache_fox").await.unwrap(), None);
    // only the rate counter was written
    assert_eq!(h.store.len().await, 1);
}

#[tokio::test]
async fn test_upstream_failures_map_to_gateway_errors_and_are_not_cached() {
    let h = harness(FakeUpstream::failing(), WindowMode::Fixed);

    let (status, body) = post(&h.app, "/chat", Some("1.1.1.1"), json!({ "ask": "hello" })).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body, "Upstream service error");

    let (status, _) = post(&h.app, "/images", Some("1.1.1.1"), json!({ "prompt": "fox" })).await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);

    assert_eq!(h.store.get("chatapi_cache_hello").await.unwrap(), None);
    assert_eq!(h.store.get("dall_e_api_cache_fox").await.unwrap(), None);
}

#[tokio::test]
async fn test_unparsable_body_is_treated_as_empty_text() {
    let h = harness(FakeUpstream::new(), WindowMode::Fixed);

    let request = Request::builder()
        .method("POST")
        .uri("/chat")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-real-ip", "1.1.1.1")
        .body(Body::from("{not json"))
        .unwrap();
    let response = h.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"re: ");
    assert_eq!(h.upstream.calls(), 1);
    assert!(h.store.get("chatapi_cache_").await.unwrap().is_some());
}

#[tokio::test]
async fn test_body_without_content_type_is_accepted() {
    let h = harness(FakeUpstream::new(), WindowMode::Fixed);

    for content_type in [None, Some("text/plain")] {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/chat")
            .header("x-real-ip", "1.1.1.1");
        if let Some(content_type) = content_type {
            builder = builder.header(header::CONTENT_TYPE, content_type);
        }
        let request = builder.body(Body::from(r#"{"ask":"hello"}"#)).unwrap();

        let response = h.app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"hi");
    }
    // the second request was a cache hit
    assert_eq!(h.upstream.calls(), 1);
}

#[tokio::test]
async fn test_missing_field_is_passed_through_as_empty() {
    let h = harness(FakeUpstream::new(), WindowMode::Fixed);

    let (status, body) = post(&h.app, "/chat", Some("1.1.1.1"), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "re: ");
    assert!(h.store.get("chatapi_cache_").await.unwrap().is_some());
}

#[tokio::test]
async fn test_health_is_not_rate_limited() {
    let h = harness(FakeUpstream::new(), WindowMode::Sliding);

    for _ in 0..15 {
        let request = Request::builder()
            .uri("/health")
            .header("x-real-ip", "2.2.2.2")
            .body(Body::empty())
            .unwrap();
        let response = h.app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let response = h.app.clone().oneshot(request).await.unwrap();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let health: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["store"]["backend"], "memory");
    assert_eq!(health["rate_limit"]["window"], "1m");
    assert_eq!(health["rate_limit"]["mode"], "sliding");
    assert_eq!(health["cache"]["ttl"], "1m");
    assert_eq!(health["upstream_configured"], true);
    assert!(h.store.is_empty().await);
}

#[tokio::test]
async fn test_counter_failure_rejects_before_upstream() {
    let store = FailingStore {
        fail_increment: true,
        ..FailingStore::new()
    };
    let upstream = Arc::new(FakeUpstream::new());
    let app = app_with_store(Arc::new(store), upstream.clone());

    let (status, body) = post(&app, "/chat", Some("1.1.1.1"), json!({ "ask": "hello" })).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, "Internal server error");
    assert_eq!(upstream.calls(), 0);
}

#[tokio::test]
async fn test_cache_read_failure_skips_upstream() {
    let store = FailingStore {
        fail_get: true,
        ..FailingStore::new()
    };
    let upstream = Arc::new(FakeUpstream::new());
    let app = app_with_store(Arc::new(store), upstream.clone());

    let (status, body) = post(&app, "/images", Some("1.1.1.1"), json!({ "prompt": "fox" })).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, "Internal server error");
    assert_eq!(upstream.calls(), 0);
}

#[tokio::test]
async fn test_cache_write_failure_stores_nothing() {
    let store = Arc::new(FailingStore {
        fail_set: true,
        ..FailingStore::new()
    });
    let upstream = Arc::new(FakeUpstream::new());
    let app = app_with_store(store.clone(), upstream.clone());

    let (status, body) = post(&app, "/chat", Some("1.1.1.1"), json!({ "ask": "hello" })).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, "Internal server error");
    assert_eq!(upstream.calls(), 1);

    assert_eq!(store.inner.get("chatapi_cache_hello").await.unwrap(), None);
    // only the rate counter was written
    assert_eq!(store.inner.len().await, 1);
}
