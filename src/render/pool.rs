//! Render pools.
//!
//! The tile server talks to renderers through the [`RenderPool`] trait:
//! it enqueues a metatile together with a one-shot reply channel and later
//! receives exactly one [`RenderResult`] on that channel.
//!
//! [`MultiRenderPool`] is the bundled implementation. It is made of one or
//! more zoom-range pools, each with its own bounded priority queue and a
//! fixed number of worker tasks:
//!
//! ```text
//!                 ┌──────────── MultiRenderPool ────────────┐
//!  enqueue ──────►│ zoom 0-12  [queue ≤ 64]  ──► 2 workers  │──► MetatileRenderer
//!  (by zoom)      │ zoom 13-18 [queue ≤ 256] ──► 8 workers  │
//!                 └─────────────────────────────────────────┘
//! ```
//!
//! Within a queue, higher priorities are served first and jobs of equal
//! priority are served in submission order.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::renderer::MetatileRenderer;
use crate::error::RenderPoolError;
use crate::tile::{Priority, Tile, TileCoord, MAX_ZOOM};

/// Default number of render workers per pool.
pub const DEFAULT_RENDER_WORKERS: usize = 4;

/// Default queue limit per pool.
pub const DEFAULT_QUEUE_SIZE: usize = 256;

/// Outcome of a single render job.
pub type RenderResult = Result<Vec<Tile>, RenderPoolError>;

// =============================================================================
// RenderPool Trait
// =============================================================================

/// A bounded pool of metatile render workers.
#[async_trait]
pub trait RenderPool: Send + Sync + 'static {
    /// Queue a render of `meta`.
    ///
    /// On success exactly one result is later sent on `reply`. On error the
    /// job was not queued and `reply` is dropped.
    fn enqueue_request(
        &self,
        meta: TileCoord,
        reply: oneshot::Sender<RenderResult>,
        priority: Priority,
    ) -> Result<(), RenderPoolError>;

    /// Reload the rendering style.
    async fn reload(&self) -> Result<(), RenderPoolError>;

    /// Number of accepted jobs not yet picked up by a worker.
    fn queued(&self) -> usize {
        0
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration of a single zoom-range pool.
///
/// Parses from `min-max:workers:queue`, e.g. `0-18:4:256`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderPoolConfig {
    /// Lowest zoom served by this pool
    pub min_zoom: u32,

    /// Highest zoom served by this pool (inclusive)
    pub max_zoom: u32,

    /// Number of concurrent render workers
    pub workers: usize,

    /// Maximum number of queued (not yet started) jobs
    pub queue_size: usize,
}

impl RenderPoolConfig {
    /// Create a pool configuration.
    pub fn new(min_zoom: u32, max_zoom: u32, workers: usize, queue_size: usize) -> Self {
        Self {
            min_zoom,
            max_zoom,
            workers,
            queue_size,
        }
    }

    /// Check whether this pool serves `zoom`.
    pub fn covers(&self, zoom: u32) -> bool {
        zoom >= self.min_zoom && zoom <= self.max_zoom
    }

    fn validate(&self) -> Result<(), RenderPoolError> {
        if self.min_zoom > self.max_zoom {
            return Err(RenderPoolError::InvalidConfig(format!(
                "pool {}: min zoom is above max zoom",
                self
            )));
        }
        if self.max_zoom > MAX_ZOOM {
            return Err(RenderPoolError::InvalidConfig(format!(
                "pool {}: max zoom is above {}",
                self, MAX_ZOOM
            )));
        }
        if self.workers == 0 {
            return Err(RenderPoolError::InvalidConfig(format!(
                "pool {}: needs at least one worker",
                self
            )));
        }
        if self.queue_size == 0 {
            return Err(RenderPoolError::InvalidConfig(format!(
                "pool {}: queue size must be greater than 0",
                self
            )));
        }
        Ok(())
    }
}

impl Default for RenderPoolConfig {
    fn default() -> Self {
        Self::new(0, MAX_ZOOM, DEFAULT_RENDER_WORKERS, DEFAULT_QUEUE_SIZE)
    }
}

impl fmt::Display for RenderPoolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}:{}:{}",
            self.min_zoom, self.max_zoom, self.workers, self.queue_size
        )
    }
}

impl FromStr for RenderPoolConfig {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split(':').collect();
        let [zooms, workers, queue] = parts.as_slice() else {
            return Err(format!(
                "invalid render pool '{}': expected min-max:workers:queue",
                s
            ));
        };
        let (min, max) = zooms
            .split_once('-')
            .ok_or_else(|| format!("invalid zoom range '{}': expected min-max", zooms))?;

        Ok(Self {
            min_zoom: parse_field(min, "min zoom")?,
            max_zoom: parse_field(max, "max zoom")?,
            workers: parse_field(workers, "worker count")?,
            queue_size: parse_field(queue, "queue size")?,
        })
    }
}

fn parse_field<T>(value: &str, what: &str) -> Result<T, String>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| format!("invalid {} '{}': {}", what, value, e))
}

/// Configuration of all render pools.
///
/// A request is routed to the first pool whose zoom range covers it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderPoolsConfig {
    pub pools: Vec<RenderPoolConfig>,
}

impl RenderPoolsConfig {
    /// Create a configuration from a list of pools.
    pub fn new(pools: Vec<RenderPoolConfig>) -> Self {
        Self { pools }
    }

    /// Check that a pool can be built from this configuration.
    pub fn validate(&self) -> Result<(), RenderPoolError> {
        if self.pools.is_empty() {
            return Err(RenderPoolError::InvalidConfig(
                "at least one render pool is required".to_string(),
            ));
        }
        self.pools.iter().try_for_each(RenderPoolConfig::validate)
    }
}

impl Default for RenderPoolsConfig {
    fn default() -> Self {
        Self::new(vec![RenderPoolConfig::default()])
    }
}

// =============================================================================
// Job Queue
// =============================================================================

/// A job waiting for a render worker.
struct QueuedJob {
    meta: TileCoord,
    reply: oneshot::Sender<RenderResult>,
    priority: Priority,
    sequence: u64,
}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

impl Eq for QueuedJob {}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedJob {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Higher priority first, then lower sequence (older) first
        match self.priority.cmp(&other.priority) {
            CmpOrdering::Equal => other.sequence.cmp(&self.sequence),
            ordering => ordering,
        }
    }
}

/// Bounded priority queue shared by the workers of one pool.
struct JobQueue {
    jobs: Mutex<BinaryHeap<QueuedJob>>,
    available: Notify,
    limit: usize,
    next_seq: AtomicU64,
    closed: AtomicBool,
}

impl JobQueue {
    fn new(limit: usize) -> Self {
        Self {
            jobs: Mutex::new(BinaryHeap::new()),
            available: Notify::new(),
            limit,
            next_seq: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BinaryHeap<QueuedJob>> {
        // Jobs are plain data; a panic elsewhere cannot leave them half-updated
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn push(
        &self,
        meta: TileCoord,
        reply: oneshot::Sender<RenderResult>,
        priority: Priority,
    ) -> Result<(), RenderPoolError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RenderPoolError::Closed);
        }

        {
            let mut jobs = self.lock();
            if jobs.len() >= self.limit {
                return Err(RenderPoolError::QueueFull {
                    zoom: meta.zoom,
                    queued: jobs.len(),
                    limit: self.limit,
                });
            }
            jobs.push(QueuedJob {
                meta,
                reply,
                priority,
                sequence: self.next_seq.fetch_add(1, Ordering::Relaxed),
            });
        }

        self.available.notify_one();
        Ok(())
    }

    async fn pop(&self) -> Option<QueuedJob> {
        loop {
            let job = self.lock().pop();
            if job.is_some() {
                return job;
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            self.available.notified().await;
        }
    }

    fn len(&self) -> usize {
        self.lock().len()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.available.notify_waiters();
    }
}

async fn run_worker(
    pool: String,
    worker: usize,
    queue: Arc<JobQueue>,
    renderer: Arc<dyn MetatileRenderer>,
) {
    debug!(pool = %pool, worker, "Render worker started");

    while let Some(job) = queue.pop().await {
        if job.reply.is_closed() {
            debug!(metatile = %job.meta, "Requester went away, skipping render");
            continue;
        }

        let result = renderer.render(job.meta).await;
        if let Err(ref e) = result {
            warn!(pool = %pool, worker, metatile = %job.meta, "Render failed: {}", e);
        }

        if job.reply.send(result).is_err() {
            debug!(metatile = %job.meta, "Requester went away before render finished");
        }
    }

    debug!(pool = %pool, worker, "Render worker stopped");
}

// =============================================================================
// MultiRenderPool
// =============================================================================

struct ZoomPool {
    config: RenderPoolConfig,
    queue: Arc<JobQueue>,
    workers: Vec<JoinHandle<()>>,
}

/// Render pool made of zoom-range sub-pools.
///
/// Workers are spawned on the current tokio runtime at construction and
/// stopped when the pool is dropped.
pub struct MultiRenderPool {
    pools: Vec<ZoomPool>,
    renderer: Arc<dyn MetatileRenderer>,
}

impl MultiRenderPool {
    /// Build the pools described by `config`, all sharing `renderer`.
    ///
    /// # Errors
    ///
    /// Returns [`RenderPoolError::InvalidConfig`] for an unusable
    /// configuration and [`RenderPoolError::NoRuntime`] when called outside
    /// a tokio runtime.
    pub fn new(
        config: &RenderPoolsConfig,
        renderer: Arc<dyn MetatileRenderer>,
    ) -> Result<Self, RenderPoolError> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| RenderPoolError::NoRuntime)?;

        let pools = config
            .pools
            .iter()
            .map(|pool_config| {
                let queue = Arc::new(JobQueue::new(pool_config.queue_size));
                let name = format!("{}-{}", pool_config.min_zoom, pool_config.max_zoom);
                let workers = (0..pool_config.workers)
                    .map(|worker| {
                        runtime.spawn(run_worker(
                            name.clone(),
                            worker,
                            Arc::clone(&queue),
                            Arc::clone(&renderer),
                        ))
                    })
                    .collect();

                info!(
                    zooms = %name,
                    workers = pool_config.workers,
                    queue_size = pool_config.queue_size,
                    "Render pool started"
                );

                ZoomPool {
                    config: pool_config.clone(),
                    queue,
                    workers,
                }
            })
            .collect();

        Ok(Self { pools, renderer })
    }

    fn pool_for(&self, zoom: u32) -> Option<&ZoomPool> {
        self.pools.iter().find(|pool| pool.config.covers(zoom))
    }

    /// Number of jobs waiting in the pool serving `zoom`.
    pub fn queue_len(&self, zoom: u32) -> Option<usize> {
        self.pool_for(zoom).map(|pool| pool.queue.len())
    }
}

#[async_trait]
impl RenderPool for MultiRenderPool {
    fn enqueue_request(
        &self,
        meta: TileCoord,
        reply: oneshot::Sender<RenderResult>,
        priority: Priority,
    ) -> Result<(), RenderPoolError> {
        let pool = self
            .pool_for(meta.zoom)
            .ok_or(RenderPoolError::NoPoolForZoom(meta.zoom))?;
        pool.queue.push(meta, reply, priority)
    }

    async fn reload(&self) -> Result<(), RenderPoolError> {
        self.renderer.reload().await?;
        info!("Render style reloaded");
        Ok(())
    }

    fn queued(&self) -> usize {
        self.pools.iter().map(|pool| pool.queue.len()).sum()
    }
}

impl Drop for MultiRenderPool {
    fn drop(&mut self) {
        for pool in &self.pools {
            pool.queue.close();
            for worker in &pool.workers {
                worker.abort();
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
