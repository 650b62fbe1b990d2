//! Render backends.
//!
//! - [`RenderPool`]: contract the tile server uses to submit metatile renders
//! - [`MultiRenderPool`]: zoom-routed pools with bounded priority queues
//! - [`MetatileRenderer`]: the actual drawing backend run by pool workers
//! - [`DebugRenderer`]: flat-colour JPEG renderer for testing the pipeline

mod pool;
mod renderer;

pub use pool::{
    MultiRenderPool, RenderPool, RenderPoolConfig, RenderPoolsConfig, RenderResult,
    DEFAULT_QUEUE_SIZE, DEFAULT_RENDER_WORKERS,
};
pub use renderer::{
    DebugRenderer, MetatileRenderer, DEFAULT_JPEG_QUALITY, DEFAULT_TILE_PIXELS, MAX_JPEG_QUALITY,
    MIN_JPEG_QUALITY,
};
