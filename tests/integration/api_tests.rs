//! API integration tests for the HTTP layer.
//!
//! Tests verify:
//! - Tile retrieval from cache, save queue and render
//! - Pre-rendering, reload, stats and perf log endpoints
//! - HTTP response codes and headers for every error kind

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use metatile_server::cache::MemoryCache;
use metatile_server::render::{DebugRenderer, RenderPoolsConfig};
use metatile_server::telemetry::{PerfLog, ServerMetrics};
use metatile_server::tile::{Metatiler, TileCoord, TileServer};
use metatile_server::{create_router, AppState, RouterConfig};

use super::test_utils::{is_valid_jpeg, RecordingCache, StubMode, StubRenderPool};

struct TestApp {
    router: Router,
    pool: Arc<StubRenderPool>,
    cache: Arc<RecordingCache>,
}

fn test_app(pool: StubRenderPool, cache: RecordingCache) -> TestApp {
    test_app_with_timeout(pool, cache, None)
}

fn test_app_with_timeout(
    pool: StubRenderPool,
    cache: RecordingCache,
    timeout: Option<Duration>,
) -> TestApp {
    let pool = Arc::new(pool);
    let cache = Arc::new(cache);
    let metrics = Arc::new(ServerMetrics::new());
    let perf_log = Arc::new(PerfLog::with_capacity(100));

    let server = TileServer::with_pool(
        pool.clone(),
        cache.clone(),
        Metatiler::new(8),
        Duration::from_secs(60),
    )
    .with_metrics(metrics.clone())
    .with_perf_log(perf_log.clone())
    .with_render_timeout(timeout);

    let state = AppState::new(Arc::new(server), cache.clone(), metrics, perf_log);
    let router = create_router(
        state,
        RouterConfig::new()
            .with_cache_max_age(600)
            .with_tracing(false),
    );

    TestApp {
        router,
        pool,
        cache,
    }
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

// =============================================================================
// Tile Retrieval
// =============================================================================

#[tokio::test]
async fn test_tile_rendered_on_miss() {
    let app = test_app(StubRenderPool::rendering(), RecordingCache::new());

    let response = app
        .router
        .oneshot(get("/tiles/4/10/18.jpg?wait_storage=true"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "image/jpeg"
    );
    assert_eq!(
        response.headers().get("cache-control").unwrap(),
        "public, max-age=600"
    );
    assert_eq!(response.headers().get("x-tile-source").unwrap(), "render");

    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"4/10/18#1");
    assert_eq!(app.cache.writes(), vec![TileCoord::new(4, 8, 16, 8)]);
}

#[tokio::test]
async fn test_tile_served_from_cache() {
    let app = test_app(StubRenderPool::rendering(), RecordingCache::new());

    let first = app
        .router
        .clone()
        .oneshot(get("/tiles/4/10/18.jpg?wait_storage=true"))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    // Neighbour in the same metatile, already persisted
    let second = app.router.oneshot(get("/tiles/4/11/19")).await.unwrap();

    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(second.headers().get("x-tile-source").unwrap(), "cache");
    let body = second.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"4/11/19#1");
    assert_eq!(app.pool.calls(), 1);
}

#[tokio::test]
async fn test_tile_served_from_buffer_when_cache_write_failed() {
    let app = test_app(StubRenderPool::rendering(), RecordingCache::failing());

    let first = app
        .router
        .clone()
        .oneshot(get("/tiles/4/10/18.jpg"))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app.router.oneshot(get("/tiles/4/12/20.jpg")).await.unwrap();

    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(second.headers().get("x-tile-source").unwrap(), "buffer");
    assert_eq!(app.pool.calls(), 1);
}

#[tokio::test]
async fn test_tile_priority_query() {
    let app = test_app(StubRenderPool::rendering(), RecordingCache::new());

    let response = app
        .router
        .oneshot(get("/tiles/4/10/18.jpg?priority=high"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        app.pool.priorities(),
        vec![metatile_server::Priority::High]
    );
}

#[tokio::test]
async fn test_tile_with_debug_renderer() {
    let cache = Arc::new(MemoryCache::new());
    let metrics = Arc::new(ServerMetrics::new());
    let perf_log = Arc::new(PerfLog::new());

    let server = TileServer::new(
        &RenderPoolsConfig::default(),
        Arc::new(DebugRenderer::new(32, 80)),
        cache.clone(),
        Metatiler::new(4),
        Duration::from_secs(10),
    )
    .unwrap()
    .with_metrics(metrics.clone())
    .with_perf_log(perf_log.clone());

    let state = AppState::new(Arc::new(server), cache.clone(), metrics, perf_log);
    let router = create_router(state, RouterConfig::new().with_tracing(false));

    let response = router
        .oneshot(get("/tiles/3/5/6.jpg?wait_storage=true"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert!(is_valid_jpeg(&body), "Response should be a valid JPEG");
    assert_eq!(cache.len().await, 16);
}

// =============================================================================
// Error Handling
// =============================================================================

#[tokio::test]
async fn test_coordinates_outside_grid() {
    let app = test_app(StubRenderPool::rendering(), RecordingCache::new());

    for uri in ["/tiles/2/4/0.jpg", "/tiles/2/0/4.jpg", "/tiles/31/0/0.jpg"] {
        let response = app.router.clone().oneshot(get(uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", uri);

        let json = body_json(response).await;
        assert_eq!(json["error"], "invalid_coordinate");
    }

    assert_eq!(app.pool.calls(), 0);
}

#[tokio::test]
async fn test_invalid_y() {
    let app = test_app(StubRenderPool::rendering(), RecordingCache::new());

    let response = app.router.oneshot(get("/tiles/4/1/abc.jpg")).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_queue_limit_exceeded() {
    let app = test_app(StubRenderPool::new(StubMode::Reject), RecordingCache::new());

    let response = app.router.oneshot(get("/tiles/4/10/18.jpg")).await.unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.headers().get("retry-after").unwrap(), "1");

    let json = body_json(response).await;
    assert_eq!(json["error"], "queue_limit_exceeded");
    assert_eq!(json["status"], 503);
}

#[tokio::test]
async fn test_render_failure() {
    let app = test_app(
        StubRenderPool::new(StubMode::Fail("no style loaded".to_string())),
        RecordingCache::new(),
    );

    let response = app.router.oneshot(get("/tiles/4/10/18.jpg")).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = body_json(response).await;
    assert_eq!(json["error"], "render_error");
    assert!(json["message"]
        .as_str()
        .unwrap()
        .contains("no style loaded"));
    assert!(app.cache.writes().is_empty());
}

#[tokio::test]
async fn test_sync_cache_failure_is_server_error() {
    let app = test_app(StubRenderPool::rendering(), RecordingCache::failing());

    let response = app
        .router
        .oneshot(get("/tiles/4/10/18.jpg?wait_storage=true"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test(start_paused = true)]
async fn test_render_timeout() {
    let app = test_app_with_timeout(
        StubRenderPool::new(StubMode::Hang),
        RecordingCache::new(),
        Some(Duration::from_secs(5)),
    );

    let response = app.router.oneshot(get("/tiles/4/10/18.jpg")).await.unwrap();

    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    let json = body_json(response).await;
    assert_eq!(json["error"], "render_timeout");
}

// =============================================================================
// Render, Reload, Stats, Perf Log
// =============================================================================

#[tokio::test]
async fn test_render_endpoint_primes_cache() {
    let app = test_app(StubRenderPool::rendering(), RecordingCache::new());

    let response = app
        .router
        .oneshot(post("/render/4/10/18?wait_storage=true&priority=low"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["tile"], "4/10/18");
    assert_eq!(json["metatile"], "4/8/16");
    assert_eq!(json["coalesced"], false);

    assert_eq!(
        app.cache.stored(&TileCoord::tile(4, 15, 23)).unwrap(),
        "4/15/23#1"
    );
}

#[tokio::test]
async fn test_render_endpoint_rejects_get() {
    let app = test_app(StubRenderPool::rendering(), RecordingCache::new());

    let response = app.router.oneshot(get("/render/4/10/18")).await.unwrap();

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(app.pool.calls(), 0);
}

#[tokio::test]
async fn test_reload_endpoint() {
    let app = test_app(StubRenderPool::rendering(), RecordingCache::new());

    let response = app.router.oneshot(post("/reload")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "reloaded");
    assert_eq!(app.pool.reloads(), 1);
}

#[tokio::test]
async fn test_stats_endpoint() {
    let app = test_app(StubRenderPool::rendering(), RecordingCache::new());

    app.router
        .clone()
        .oneshot(get("/tiles/4/10/18.jpg?wait_storage=true"))
        .await
        .unwrap();
    app.router
        .clone()
        .oneshot(get("/tiles/4/10/17.jpg?wait_storage=true"))
        .await
        .unwrap();

    let response = app.router.oneshot(get("/stats")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    // The second tile was a cache hit and never reached the tile server
    assert_eq!(json["requests_ok"], 1);
    assert_eq!(json["requests_failed"], 0);
    assert_eq!(json["buffered_metatiles"], 1);
    assert_eq!(json["pending_writes"], 0);
    assert_eq!(json["queued_renders"], 0);
    assert!(json["bucket_counts"].is_array());
}

#[tokio::test]
async fn test_perflog_endpoint() {
    let app = test_app(StubRenderPool::rendering(), RecordingCache::new());

    for uri in ["/tiles/4/0/0.jpg", "/tiles/4/8/0.jpg", "/tiles/4/0/8.jpg"] {
        let response = app.router.clone().oneshot(get(uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app.router.clone().oneshot(get("/perflog?limit=2")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    let entries = json["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["coord"]["x"], 8);
    assert_eq!(entries[1]["coord"]["y"], 8);
    assert!(entries[1]["timestamp_ms"].as_u64().unwrap() > 0);

    let response = app
        .router
        .oneshot(get("/perflog?since_ms=0&limit=10"))
        .await
        .unwrap();
    let json = body_json(response).await;
    assert_eq!(json["entries"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = test_app(StubRenderPool::rendering(), RecordingCache::new());

    let response = app.router.oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "healthy");
    assert!(json["version"].is_string());
}
