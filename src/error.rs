use std::time::Duration;

use thiserror::Error;

/// Errors returned to callers of the tile server.
#[derive(Debug, Clone, Error)]
pub enum TileServerError {
    /// Requested size is neither 0, 1 nor the metatile side length
    #[error("Invalid tile size: {size} (expected 0, 1 or {metatile_size})")]
    InvalidSize { size: u64, metatile_size: u64 },

    /// The render pool refused to accept more work
    #[error("Render queue limit exceeded")]
    QueueLimitExceeded,

    /// Rendering failed, or a synchronous cache write failed
    #[error("Render error: {message}")]
    Render { message: String },

    /// The render pool accepted the job but did not answer in time
    #[error("Render timed out after {0:?}")]
    RenderTimeout(Duration),
}

impl TileServerError {
    /// Create a render error from anything displayable.
    pub fn render(message: impl ToString) -> Self {
        TileServerError::Render {
            message: message.to_string(),
        }
    }
}

/// Errors raised by render pools and renderers.
#[derive(Debug, Clone, Error)]
pub enum RenderPoolError {
    /// The pool serving this zoom level has no room left in its queue
    #[error("Render queue is full: {queued} jobs queued for zoom {zoom} (limit {limit})")]
    QueueFull { zoom: u32, queued: usize, limit: usize },

    /// No configured pool covers the requested zoom level
    #[error("No render pool configured for zoom {0}")]
    NoPoolForZoom(u32),

    /// The pool configuration cannot be used to build a pool
    #[error("Invalid render pool configuration: {0}")]
    InvalidConfig(String),

    /// Workers cannot be started outside a tokio runtime
    #[error("Render pools need a running tokio runtime")]
    NoRuntime,

    /// The pool has been shut down
    #[error("Render pool is shut down")]
    Closed,

    /// The renderer failed to produce the metatile
    #[error("{0}")]
    Render(String),

    /// Reloading the style failed
    #[error("Style reload failed: {0}")]
    Reload(String),
}

/// Errors raised by cache plugins.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// Error from S3 or S3-compatible storage
    #[error("S3 error: {0}")]
    S3(String),

    /// Network or connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Tile count does not match the metatile being stored
    #[error("Metatile {coord} expects {expected} tiles, got {actual}")]
    TileCountMismatch {
        coord: String,
        expected: usize,
        actual: usize,
    },

    /// Any other backend failure
    #[error("Cache backend error: {0}")]
    Backend(String),
}
