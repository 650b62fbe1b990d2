//! HTTP request handlers for the tile server API.
//!
//! # Endpoints
//!
//! - `GET /tiles/{z}/{x}/{y}.jpg` - Serve a tile (cache, then save queue, then render)
//! - `POST /render/{z}/{x}/{y}` - Render and cache a metatile without returning it
//! - `GET /stats` - Request metrics
//! - `GET /perflog` - Recent per-request timings
//! - `POST /reload` - Reload the render style
//! - `GET /health` - Health check endpoint

use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::cache::CachePlugin;
use crate::error::TileServerError;
use crate::render::RenderPool;
use crate::telemetry::{MetricsSnapshot, PerfLog, PerfLogEntry, ServerMetrics};
use crate::tile::{Priority, Tile, TileCoord, TileServer, MAX_ZOOM};

/// Header telling clients where a tile came from.
pub const TILE_SOURCE_HEADER: HeaderName = HeaderName::from_static("x-tile-source");

/// Seconds clients should wait before retrying a rejected request.
const RETRY_AFTER_SECS: &str = "1";

/// Default number of perf log entries returned.
const DEFAULT_PERFLOG_LIMIT: usize = 100;

/// Maximum number of perf log entries returned.
const MAX_PERFLOG_LIMIT: usize = 10_000;

// =============================================================================
// Application State
// =============================================================================

/// Shared application state.
///
/// This is passed to all handlers via Axum's State extractor.
pub struct AppState<P: RenderPool> {
    /// The tile server for processing tile requests
    pub tile_server: Arc<TileServer<P>>,

    /// Cache consulted before asking the tile server
    pub cache: Arc<dyn CachePlugin>,

    /// Request metrics, shared with the tile server
    pub metrics: Arc<ServerMetrics>,

    /// Perf log, shared with the tile server
    pub perf_log: Arc<PerfLog>,

    /// Cache-Control max-age in seconds for tile responses
    pub cache_max_age: u32,
}

impl<P: RenderPool> AppState<P> {
    /// Create application state with a 1 hour Cache-Control max-age.
    pub fn new(
        tile_server: Arc<TileServer<P>>,
        cache: Arc<dyn CachePlugin>,
        metrics: Arc<ServerMetrics>,
        perf_log: Arc<PerfLog>,
    ) -> Self {
        Self {
            tile_server,
            cache,
            metrics,
            perf_log,
            cache_max_age: 3600,
        }
    }

    /// Set the Cache-Control max-age in seconds.
    pub fn with_cache_max_age(mut self, seconds: u32) -> Self {
        self.cache_max_age = seconds;
        self
    }
}

impl<P: RenderPool> Clone for AppState<P> {
    fn clone(&self) -> Self {
        Self {
            tile_server: Arc::clone(&self.tile_server),
            cache: Arc::clone(&self.cache),
            metrics: Arc::clone(&self.metrics),
            perf_log: Arc::clone(&self.perf_log),
            cache_max_age: self.cache_max_age,
        }
    }
}

// =============================================================================
// Request Parameters
// =============================================================================

/// Path parameters for tile requests.
///
/// Extracted from: `/tiles/{z}/{x}/{filename}`
/// where filename is `{y}` or `{y}.jpg`
#[derive(Debug, Deserialize)]
pub struct TilePathParams {
    /// Zoom level
    pub z: u32,

    /// Tile X coordinate
    pub x: u64,

    /// Tile Y coordinate with optional .jpg extension (e.g., "0" or "0.jpg")
    pub filename: String,
}

impl TilePathParams {
    /// Parse the Y coordinate from the filename, stripping any .jpg extension.
    pub fn y(&self) -> Result<u64, std::num::ParseIntError> {
        let y_str = self.filename.strip_suffix(".jpg").unwrap_or(&self.filename);
        y_str.parse()
    }

    /// Build a coordinate with the given response size, rejecting anything
    /// outside the tile grid.
    fn coord(&self, size: u64) -> Result<TileCoord, HandlerError> {
        let y = self.y().map_err(|_| {
            HandlerError::InvalidCoordinate(format!("Invalid y coordinate: {}", self.filename))
        })?;

        let coord = TileCoord::new(self.z, self.x, y, size);
        if !coord.is_within_bounds() {
            return Err(HandlerError::InvalidCoordinate(format!(
                "Tile {} is outside the tile grid (max zoom {})",
                coord, MAX_ZOOM
            )));
        }
        Ok(coord)
    }
}

/// Query parameters for tile and render requests.
#[derive(Debug, Default, Deserialize)]
pub struct TileQueryParams {
    /// Render priority (low, normal, high)
    #[serde(default)]
    pub priority: Priority,

    /// Wait for the cache write before responding
    #[serde(default)]
    pub wait_storage: bool,
}

/// Query parameters for the perf log endpoint.
#[derive(Debug, Deserialize)]
pub struct PerfLogQueryParams {
    /// Maximum number of entries to return (default: 100, max: 10000)
    #[serde(default = "default_perflog_limit")]
    pub limit: usize,

    /// Only return entries recorded at or after this Unix time in milliseconds
    #[serde(default)]
    pub since_ms: Option<u64>,
}

fn default_perflog_limit() -> usize {
    DEFAULT_PERFLOG_LIMIT
}

// =============================================================================
// Response Types
// =============================================================================

/// JSON error response returned for all error conditions.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error type identifier (e.g., "invalid_size", "render_error")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// HTTP status code (included for convenience)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ErrorResponse {
    /// Create a new error response.
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: None,
        }
    }

    /// Create a new error response with status code.
    pub fn with_status(
        error: impl Into<String>,
        message: impl Into<String>,
        status: StatusCode,
    ) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: Some(status.as_u16()),
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,

    /// Service version
    pub version: String,
}

/// Response from the render endpoint.
#[derive(Debug, Serialize)]
pub struct RenderResponse {
    /// Requested tile as `z/x/y`
    pub tile: String,

    /// Metatile that was rendered or found in the save queue
    pub metatile: String,

    pub render_ms: f64,
    pub save_ms: f64,

    /// Whether the metatile was already in the save queue
    pub coalesced: bool,
}

/// Response from the stats endpoint.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub metrics: MetricsSnapshot,

    /// Metatiles currently held in the save queue
    pub buffered_metatiles: usize,

    /// Background cache writes still running
    pub pending_writes: usize,

    /// Render jobs waiting for a worker
    pub queued_renders: usize,
}

/// Response from the perf log endpoint.
#[derive(Debug, Serialize)]
pub struct PerfLogResponse {
    pub entries: Vec<PerfLogEntry>,
}

/// Response from the reload endpoint.
#[derive(Debug, Serialize)]
pub struct ReloadResponse {
    pub status: String,
}

// =============================================================================
// Error Mapping
// =============================================================================

/// Convert TileServerError to HTTP response.
///
/// This implementation logs errors appropriately based on their severity:
/// - 4xx errors are logged at WARN level (client errors)
/// - 503 is logged at WARN level (expected under load)
/// - other 5xx errors are logged at ERROR level (server errors)
impl IntoResponse for TileServerError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            TileServerError::InvalidSize { .. } => (StatusCode::BAD_REQUEST, "invalid_size"),
            TileServerError::QueueLimitExceeded => {
                (StatusCode::SERVICE_UNAVAILABLE, "queue_limit_exceeded")
            }
            TileServerError::Render { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "render_error"),
            TileServerError::RenderTimeout(_) => (StatusCode::GATEWAY_TIMEOUT, "render_timeout"),
        };
        let message = self.to_string();

        if status == StatusCode::SERVICE_UNAVAILABLE || status.is_client_error() {
            warn!(
                error_type = error_type,
                status = status.as_u16(),
                "Request rejected: {}",
                message
            );
        } else {
            error!(
                error_type = error_type,
                status = status.as_u16(),
                "Server error: {}",
                message
            );
        }

        let error_response = ErrorResponse::with_status(error_type, message, status);
        let mut response = (status, Json(error_response)).into_response();

        if matches!(self, TileServerError::QueueLimitExceeded) {
            response.headers_mut().insert(
                header::RETRY_AFTER,
                HeaderValue::from_static(RETRY_AFTER_SECS),
            );
        }

        response
    }
}

/// Error type for handlers.
#[derive(Debug)]
pub enum HandlerError {
    /// Failure reported by the tile server
    Tile(TileServerError),

    /// Path did not name a tile inside the grid
    InvalidCoordinate(String),
}

impl IntoResponse for HandlerError {
    fn into_response(self) -> Response {
        match self {
            HandlerError::Tile(err) => err.into_response(),
            HandlerError::InvalidCoordinate(message) => {
                let status = StatusCode::BAD_REQUEST;
                warn!(
                    error_type = "invalid_coordinate",
                    status = status.as_u16(),
                    "Client error: {}",
                    message
                );
                let body = ErrorResponse::with_status("invalid_coordinate", message, status);
                (status, Json(body)).into_response()
            }
        }
    }
}

impl From<TileServerError> for HandlerError {
    fn from(err: TileServerError) -> Self {
        HandlerError::Tile(err)
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Serve a single tile.
///
/// The cache is read first. On a miss the tile server answers from the save
/// queue or renders the covering metatile.
///
/// # Response Headers
///
/// - `Content-Type: image/jpeg`
/// - `Cache-Control: public, max-age={cache_max_age}`
/// - `X-Tile-Source: cache | buffer | render`
pub async fn tile_handler<P: RenderPool>(
    State(state): State<AppState<P>>,
    Path(params): Path<TilePathParams>,
    Query(query): Query<TileQueryParams>,
) -> Result<Response, HandlerError> {
    let coord = params.coord(1)?;

    match state.cache.get(&coord).await {
        Ok(Some(tile)) => {
            debug!(coord = %coord, "Cache hit");
            return Ok(tile_response(tile, "cache", state.cache_max_age));
        }
        Ok(None) => {}
        Err(e) => {
            // A broken cache read should not stop us from rendering
            warn!(coord = %coord, error = %e, "Cache read failed");
        }
    }

    let response = state
        .tile_server
        .serve_tile_request(&coord, query.priority, query.wait_storage)
        .await?;

    let source = if response.coalesced { "buffer" } else { "render" };
    let tile = response
        .tiles
        .into_iter()
        .next()
        .ok_or_else(|| TileServerError::render(format!("No tile returned for {}", coord)))?;

    Ok(tile_response(tile, source, state.cache_max_age))
}

fn tile_response(tile: Tile, source: &'static str, cache_max_age: u32) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("image/jpeg")),
            (TILE_SOURCE_HEADER, HeaderValue::from_static(source)),
        ],
        [(
            header::CACHE_CONTROL,
            format!("public, max-age={}", cache_max_age),
        )],
        tile,
    )
        .into_response()
}

/// Render and cache the metatile covering a tile without returning data.
pub async fn render_handler<P: RenderPool>(
    State(state): State<AppState<P>>,
    Path(params): Path<TilePathParams>,
    Query(query): Query<TileQueryParams>,
) -> Result<Json<RenderResponse>, HandlerError> {
    let coord = params.coord(0)?;
    let metatile = state.tile_server.metatiler().tile_to_metatile(&coord);

    let response = state
        .tile_server
        .serve_tile_request(&coord, query.priority, query.wait_storage)
        .await?;

    Ok(Json(RenderResponse {
        tile: coord.to_string(),
        metatile: metatile.to_string(),
        render_ms: as_millis(response.render_time),
        save_ms: as_millis(response.save_time),
        coalesced: response.coalesced,
    }))
}

fn as_millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Health check endpoint.
///
/// Returns a simple JSON response indicating the service is running.
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Request metrics and buffer occupancy.
pub async fn stats_handler<P: RenderPool>(State(state): State<AppState<P>>) -> Json<StatsResponse> {
    Json(StatsResponse {
        metrics: state.metrics.snapshot(),
        buffered_metatiles: state.tile_server.buffered_metatiles().await,
        pending_writes: state.tile_server.pending_writes(),
        queued_renders: state.tile_server.render_pool().queued(),
    })
}

/// Recent per-request timings, oldest first.
pub async fn perflog_handler<P: RenderPool>(
    State(state): State<AppState<P>>,
    Query(query): Query<PerfLogQueryParams>,
) -> Json<PerfLogResponse> {
    let limit = query.limit.min(MAX_PERFLOG_LIMIT);

    let entries = match query.since_ms {
        Some(since_ms) => {
            let since = UNIX_EPOCH + Duration::from_millis(since_ms);
            let mut entries = state.perf_log.since(since);
            let skip = entries.len().saturating_sub(limit);
            entries.drain(..skip);
            entries
        }
        None => state.perf_log.recent(limit),
    };

    Json(PerfLogResponse { entries })
}

/// Reload the render style.
pub async fn reload_handler<P: RenderPool>(
    State(state): State<AppState<P>>,
) -> Result<Json<ReloadResponse>, HandlerError> {
    state.tile_server.reload_style().await?;
    Ok(Json(ReloadResponse {
        status: "reloaded".to_string(),
    }))
}
