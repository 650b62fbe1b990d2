//! HTTP server layer.
//!
//! Exposes the tile server over HTTP: tile reads with a cache in front,
//! metatile pre-rendering, style reloads and request statistics.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         HTTP Layer                              │
//! │                 GET /tiles/{z}/{x}/{y}.jpg                      │
//! │                                                                 │
//! │  ┌──────────────────────────┐  ┌─────────────────────────────┐  │
//! │  │        handlers          │  │           routes            │  │
//! │  │ (requests, error mapping)│  │ (router, CORS, tracing)     │  │
//! │  └──────────────────────────┘  └─────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod handlers;
pub mod routes;

pub use handlers::{
    health_handler, perflog_handler, reload_handler, render_handler, stats_handler, tile_handler,
    AppState, ErrorResponse, HandlerError, HealthResponse, PerfLogQueryParams, PerfLogResponse,
    ReloadResponse, RenderResponse, StatsResponse, TilePathParams, TileQueryParams,
    TILE_SOURCE_HEADER,
};
pub use routes::{create_router, RouterConfig};
