//! Cache writes with a coalescing buffer in front.
//!
//! Every freshly rendered metatile is first placed in the [`SaveQueue`] for
//! a fixed delay, then written to the cache plugin either inline or from a
//! detached task. Detached writes are counted so the process can wait for
//! them before exiting.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, error};

use crate::cache::CachePlugin;
use crate::error::CacheError;

use super::coord::{Tile, TileCoord};
use super::save_queue::SaveQueue;

#[derive(Default)]
struct BackgroundWrites {
    pending: AtomicUsize,
    idle: Notify,
}

/// Decrements the pending counter when a background write ends, however it ends.
struct PendingGuard(Arc<BackgroundWrites>);

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if self.0.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

/// Writes rendered metatiles to the cache plugin.
#[derive(Clone)]
pub struct CacheWriter {
    cache: Arc<dyn CachePlugin>,
    save_queue: Arc<SaveQueue>,
    remove_delay: Duration,
    background: Arc<BackgroundWrites>,
}

impl CacheWriter {
    pub fn new(cache: Arc<dyn CachePlugin>, save_queue: Arc<SaveQueue>, remove_delay: Duration) -> Self {
        Self {
            cache,
            save_queue,
            remove_delay,
            background: Arc::new(BackgroundWrites::default()),
        }
    }

    /// Hold `tiles` in the save queue for the remove delay.
    pub async fn buffer(&self, meta: TileCoord, tiles: Arc<[Tile]>) {
        self.save_queue.hold(meta, tiles, self.remove_delay).await;
    }

    /// Write a metatile to the cache and wait for the result.
    pub async fn write(&self, meta: TileCoord, tiles: Arc<[Tile]>) -> Result<(), CacheError> {
        store(self.cache.as_ref(), &meta, &tiles).await
    }

    /// Write a metatile from a detached task. Failures are only logged.
    pub fn write_in_background(&self, meta: TileCoord, tiles: Arc<[Tile]>) {
        self.background.pending.fetch_add(1, Ordering::AcqRel);
        let guard = PendingGuard(self.background.clone());
        let cache = self.cache.clone();

        tokio::spawn(async move {
            let _guard = guard;
            let _ = store(cache.as_ref(), &meta, &tiles).await;
        });
    }

    /// Number of background writes still running.
    pub fn pending_writes(&self) -> usize {
        self.background.pending.load(Ordering::Acquire)
    }

    /// Wait until no background writes are running.
    pub async fn wait_idle(&self) {
        loop {
            let idle = self.background.idle.notified();
            tokio::pin!(idle);
            // Register before checking so a concurrent final decrement is not missed
            idle.as_mut().enable();
            if self.pending_writes() == 0 {
                return;
            }
            idle.await;
        }
    }
}

async fn store(cache: &dyn CachePlugin, meta: &TileCoord, tiles: &[Tile]) -> Result<(), CacheError> {
    match cache.set(meta, tiles).await {
        Ok(()) => {
            debug!(meta = %meta, tiles = tiles.len(), "Metatile written to cache");
            Ok(())
        }
        Err(e) => {
            error!(meta = %meta, error = %e, "Cache write failed");
            Err(e)
        }
    }
}
