//! Tile server orchestrating metatile renders.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                           TileServer                            │
//! │  ┌───────────────────────────────────────────────────────────┐  │
//! │  │                  serve_tile_request()                     │  │
//! │  │  1. Validate size      4. Render on miss                  │  │
//! │  │  2. Decompose          5. Buffer + write (sync | async)   │  │
//! │  │  3. Check buffer       6. Shape response, record timings  │  │
//! │  └───────────────────────────────────────────────────────────┘  │
//! │         │                     │                      │          │
//! │         ▼                     ▼                      ▼          │
//! │  ┌─────────────┐     ┌──────────────────┐    ┌─────────────┐    │
//! │  │  SaveQueue  │     │ RenderDispatcher │    │ CacheWriter │    │
//! │  └─────────────┘     └──────────────────┘    └─────────────┘    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::time::Instant;
use tracing::debug;

use crate::cache::CachePlugin;
use crate::error::{RenderPoolError, TileServerError};
use crate::render::{MetatileRenderer, MultiRenderPool, RenderPool, RenderPoolsConfig};
use crate::telemetry::{NoopMetrics, NoopPerfLog, PerfLogEntry, PerfLogSink, RequestMetrics};

use super::coord::{Priority, Tile, TileCoord};
use super::dispatch::RenderDispatcher;
use super::metatile::Metatiler;
use super::save_queue::SaveQueue;
use super::writer::CacheWriter;

// =============================================================================
// Tile Response
// =============================================================================

/// Result of a tile request.
#[derive(Debug, Clone)]
pub struct TileResponse {
    /// Empty for size 0, one tile for size 1, the full metatile otherwise
    pub tiles: Vec<Tile>,

    /// Time from render submission to result; zero when served from the buffer
    pub render_time: Duration,

    /// Time spent in a synchronous cache write; zero otherwise
    pub save_time: Duration,

    /// Whether the tiles came from the save queue instead of a fresh render
    pub coalesced: bool,
}

#[derive(Debug, Default, Clone, Copy)]
struct Timings {
    render: Duration,
    save: Duration,
}

// =============================================================================
// Tile Server
// =============================================================================

/// Orchestrates renders, the save queue and cache writes for tile requests.
///
/// # Type Parameters
///
/// * `P` - The render pool (defaults to [`MultiRenderPool`])
///
/// # Example
///
/// ```ignore
/// use metatile_server::tile::{Metatiler, Priority, TileCoord, TileServer};
///
/// let server = TileServer::new(&pools, renderer, cache, Metatiler::new(8), delay)?;
///
/// let response = server
///     .serve_tile_request(&TileCoord::tile(4, 10, 18), Priority::Normal, false)
///     .await?;
/// assert_eq!(response.tiles.len(), 1);
/// ```
pub struct TileServer<P: RenderPool = MultiRenderPool> {
    dispatcher: RenderDispatcher<P>,
    writer: CacheWriter,
    save_queue: Arc<SaveQueue>,
    metatiler: Metatiler,
    metrics: Arc<dyn RequestMetrics>,
    perf_log: Arc<dyn PerfLogSink>,
}

impl TileServer<MultiRenderPool> {
    /// Build a tile server with render pools created from `pools`.
    ///
    /// # Errors
    ///
    /// Returns [`RenderPoolError::InvalidConfig`] if the render pools cannot
    /// be built from the configuration, and [`RenderPoolError::NoRuntime`]
    /// when called outside a tokio runtime.
    pub fn new(
        pools: &RenderPoolsConfig,
        renderer: Arc<dyn MetatileRenderer>,
        cache: Arc<dyn CachePlugin>,
        metatiler: Metatiler,
        remove_delay: Duration,
    ) -> Result<Self, RenderPoolError> {
        let pool = MultiRenderPool::new(pools, renderer)?;
        Ok(Self::with_pool(Arc::new(pool), cache, metatiler, remove_delay))
    }
}

impl<P: RenderPool> TileServer<P> {
    /// Build a tile server around an existing render pool.
    pub fn with_pool(
        pool: Arc<P>,
        cache: Arc<dyn CachePlugin>,
        metatiler: Metatiler,
        remove_delay: Duration,
    ) -> Self {
        let save_queue = Arc::new(SaveQueue::new());
        Self {
            dispatcher: RenderDispatcher::new(pool),
            writer: CacheWriter::new(cache, save_queue.clone(), remove_delay),
            save_queue,
            metatiler,
            metrics: Arc::new(NoopMetrics),
            perf_log: Arc::new(NoopPerfLog),
        }
    }

    /// Report request outcomes to `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<dyn RequestMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Record per-request timings to `perf_log`.
    pub fn with_perf_log(mut self, perf_log: Arc<dyn PerfLogSink>) -> Self {
        self.perf_log = perf_log;
        self
    }

    /// Give up on renders that take longer than `timeout`.
    ///
    /// Without a timeout a request waits for as long as the pool takes.
    pub fn with_render_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.dispatcher = self.dispatcher.with_timeout(timeout);
        self
    }

    pub fn metatiler(&self) -> Metatiler {
        self.metatiler
    }

    pub fn render_pool(&self) -> &Arc<P> {
        self.dispatcher.pool()
    }

    /// Serve a tile request.
    ///
    /// `coord.size` selects the response shape: 0 renders and caches
    /// without returning tiles, 1 returns the single tile at `coord`, and
    /// the metatile side returns the whole metatile. With `wait_storage`
    /// the cache write completes (or fails) before this returns.
    ///
    /// Every call, successful or not, is reported to the metrics and perf
    /// log sinks.
    pub async fn serve_tile_request(
        &self,
        coord: &TileCoord,
        priority: Priority,
        wait_storage: bool,
    ) -> Result<TileResponse, TileServerError> {
        let start = Instant::now();
        let mut timings = Timings::default();

        let result = self
            .process(coord, priority, wait_storage, &mut timings)
            .await;

        self.metrics.record_request(start.elapsed(), result.is_ok());
        self.perf_log.save(PerfLogEntry {
            timestamp: SystemTime::now(),
            coord: *coord,
            render_time: timings.render,
            save_time: timings.save,
        });

        result.map(|(tiles, coalesced)| TileResponse {
            tiles,
            render_time: timings.render,
            save_time: timings.save,
            coalesced,
        })
    }

    async fn process(
        &self,
        coord: &TileCoord,
        priority: Priority,
        wait_storage: bool,
        timings: &mut Timings,
    ) -> Result<(Vec<Tile>, bool), TileServerError> {
        let side = self.metatiler.size();
        if coord.size != 0 && coord.size != 1 && coord.size != side {
            return Err(TileServerError::InvalidSize {
                size: coord.size,
                metatile_size: side,
            });
        }

        let meta = self.metatiler.tile_to_metatile(coord);

        let (tiles, coalesced) = match self.save_queue.get(&meta).await {
            Some(tiles) => {
                debug!(coord = %coord, meta = %meta, "Serving metatile from save queue");
                (tiles, true)
            }
            None => {
                let render_start = Instant::now();
                let rendered = self.dispatcher.submit(meta, priority).await;
                timings.render = render_start.elapsed();

                let tiles: Arc<[Tile]> = rendered?.into();
                self.writer.buffer(meta, tiles.clone()).await;

                if wait_storage {
                    let save_start = Instant::now();
                    let written = self.writer.write(meta, tiles.clone()).await;
                    timings.save = save_start.elapsed();
                    written.map_err(TileServerError::render)?;
                } else {
                    self.writer.write_in_background(meta, tiles.clone());
                }

                (tiles, false)
            }
        };

        let shaped = match coord.size {
            0 => Vec::new(),
            1 => {
                let tile = Metatiler::sub_index(coord, &meta)
                    .and_then(|index| tiles.get(index))
                    .ok_or_else(|| {
                        TileServerError::render(format!("tile {} missing from metatile {}", coord, meta))
                    })?;
                vec![tile.clone()]
            }
            _ => tiles.to_vec(),
        };

        Ok((shaped, coalesced))
    }

    /// Reload the rendering style in every render pool.
    pub async fn reload_style(&self) -> Result<(), TileServerError> {
        self.dispatcher
            .pool()
            .reload()
            .await
            .map_err(TileServerError::render)
    }

    /// Number of metatiles currently held in the save queue.
    pub async fn buffered_metatiles(&self) -> usize {
        self.save_queue.len().await
    }

    /// Number of background cache writes still running.
    pub fn pending_writes(&self) -> usize {
        self.writer.pending_writes()
    }

    /// Wait for all background cache writes to finish.
    pub async fn wait_idle(&self) {
        self.writer.wait_idle().await;
    }
}
