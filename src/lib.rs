//! # Metatile Server
//!
//! A map tile server that renders tiles in square blocks ("metatiles") and
//! persists them to a pluggable cache.
//!
//! A request for a single tile is mapped to the metatile covering it. The
//! whole metatile is rendered by a bounded, prioritised render pool, written
//! to the cache (synchronously or in the background) and kept for a short
//! window in a save queue, so requests for neighbouring tiles arriving right
//! after are answered without rendering again.
//!
//! ## Architecture
//!
//! - [`tile`] - Tile coordinates, metatile math, save queue and the [`TileServer`]
//! - [`render`] - Render pool contract, zoom-routed pools and renderers
//! - [`cache`] - Cache plugins (memory LRU, S3)
//! - [`telemetry`] - Request metrics and the per-request perf log
//! - [`server`] - Axum-based HTTP server and routes
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use metatile_server::{
//!     DebugRenderer, MemoryCache, Metatiler, Priority, RenderPoolsConfig, TileCoord, TileServer,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let server = TileServer::new(
//!         &RenderPoolsConfig::default(),
//!         Arc::new(DebugRenderer::default()),
//!         Arc::new(MemoryCache::new()),
//!         Metatiler::new(8),
//!         Duration::from_secs(10),
//!     )
//!     .unwrap();
//!
//!     let response = server
//!         .serve_tile_request(&TileCoord::tile(4, 10, 6), Priority::Normal, false)
//!         .await
//!         .unwrap();
//!     assert_eq!(response.tiles.len(), 1);
//! }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod render;
pub mod server;
pub mod telemetry;
pub mod tile;

// Re-export commonly used types
pub use cache::{create_s3_client, CachePlugin, MemoryCache, S3Cache};
pub use config::{CacheBackend, Config};
pub use error::{CacheError, RenderPoolError, TileServerError};
pub use render::{
    DebugRenderer, MetatileRenderer, MultiRenderPool, RenderPool, RenderPoolConfig,
    RenderPoolsConfig, RenderResult,
};
pub use server::{create_router, AppState, ErrorResponse, HealthResponse, RouterConfig};
pub use telemetry::{
    MetricsSnapshot, PerfLog, PerfLogEntry, PerfLogSink, RequestMetrics, ServerMetrics,
};
pub use tile::{
    CacheWriter, Metatiler, Priority, RenderDispatcher, SaveQueue, Tile, TileCoord, TileKey,
    TileResponse, TileServer,
};
