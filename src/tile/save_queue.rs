//! Short-lived buffer of freshly rendered metatiles.
//!
//! When a metatile finishes rendering it is kept here for a fixed window so
//! that requests for neighbouring tiles arriving shortly afterwards can be
//! answered without another render or a cache round-trip (the cache write
//! may still be in flight).
//!
//! Entries are never updated in place. Two renders of the same metatile
//! produce two entries, each removed by its own timer; lookups return the
//! most recently inserted one.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::trace;

use super::coord::{Tile, TileCoord};

/// Opaque handle to a buffered entry.
///
/// Removing an entry consumes its handle, so an entry can be removed at
/// most once.
#[derive(Debug, PartialEq, Eq)]
pub struct SaveQueueHandle(u64);

struct SaveQueueElem {
    coord: TileCoord,
    tiles: Arc<[Tile]>,
}

#[derive(Default)]
struct SaveQueueInner {
    /// Entries keyed by insertion sequence, oldest first
    entries: BTreeMap<u64, SaveQueueElem>,
    next_seq: u64,
}

/// Thread-safe buffer mapping metatile coordinates to rendered tiles.
///
/// Lookups take a shared lock; inserts and removals take an exclusive one.
#[derive(Default)]
pub struct SaveQueue {
    inner: RwLock<SaveQueueInner>,
}

impl SaveQueue {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a metatile and return the handle needed to remove it.
    pub async fn put(&self, coord: TileCoord, tiles: Arc<[Tile]>) -> SaveQueueHandle {
        let mut inner = self.inner.write().await;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.insert(seq, SaveQueueElem { coord, tiles });
        SaveQueueHandle(seq)
    }

    /// Remove the entry behind `handle`.
    ///
    /// Returns `false` if the entry was already gone.
    pub async fn remove(&self, handle: SaveQueueHandle) -> bool {
        let mut inner = self.inner.write().await;
        inner.entries.remove(&handle.0).is_some()
    }

    /// Find the most recently buffered tiles for the metatile at `coord`.
    ///
    /// Matching compares zoom, x and y only.
    pub async fn get(&self, coord: &TileCoord) -> Option<Arc<[Tile]>> {
        let key = coord.key();
        let inner = self.inner.read().await;
        inner
            .entries
            .values()
            .rev()
            .find(|elem| elem.coord.key() == key)
            .map(|elem| Arc::clone(&elem.tiles))
    }

    /// Insert a metatile and schedule its removal after `delay`.
    ///
    /// The removal runs as a detached task and is not affected by later
    /// insertions for the same coordinate.
    pub async fn hold(self: &Arc<Self>, coord: TileCoord, tiles: Arc<[Tile]>, delay: Duration) {
        let handle = self.put(coord, tiles).await;
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if queue.remove(handle).await {
                trace!(metatile = %coord, "Released buffered metatile");
            }
        });
    }

    /// Number of buffered entries (duplicates included).
    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    /// Check if the buffer is empty.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.entries.is_empty()
    }
}
