//! In-memory tile cache.
//!
//! An LRU cache keyed by tile identity (zoom, x, y). The cache tracks the
//! total size of stored tiles in bytes and evicts least-recently-used
//! entries when the capacity is exceeded.

use std::num::NonZeroUsize;

use async_trait::async_trait;
use lru::LruCache;
use tokio::sync::RwLock;

use super::{split_metatile, CachePlugin};
use crate::error::CacheError;
use crate::tile::{Tile, TileCoord, TileKey};

/// Default cache capacity: 256MB
pub const DEFAULT_MEMORY_CACHE_CAPACITY: usize = 256 * 1024 * 1024;

/// Default maximum number of entries (to bound LRU overhead)
const DEFAULT_MAX_ENTRIES: usize = 100_000;

struct MemoryCacheInner {
    tiles: LruCache<TileKey, Tile>,
    current_size: usize,
}

/// LRU tile cache with size-based capacity.
///
/// # Example
///
/// ```
/// use metatile_server::cache::{CachePlugin, MemoryCache};
/// use metatile_server::tile::TileCoord;
/// use bytes::Bytes;
///
/// #[tokio::main]
/// async fn main() {
///     let cache = MemoryCache::new();
///
///     let meta = TileCoord::new(1, 0, 0, 1);
///     cache.set(&meta, &[Bytes::from_static(b"tile")]).await.unwrap();
///
///     let tile = cache.get(&TileCoord::tile(1, 0, 0)).await.unwrap();
///     assert_eq!(tile, Some(Bytes::from_static(b"tile")));
/// }
/// ```
pub struct MemoryCache {
    inner: RwLock<MemoryCacheInner>,
    max_size: usize,
}

impl MemoryCache {
    /// Create a cache with default capacity (256MB).
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MEMORY_CACHE_CAPACITY)
    }

    /// Create a cache holding at most `max_size` bytes of tiles.
    pub fn with_capacity(max_size: usize) -> Self {
        Self::with_capacity_and_entries(max_size, DEFAULT_MAX_ENTRIES)
    }

    /// Create a cache with a byte capacity and a maximum entry count.
    pub fn with_capacity_and_entries(max_size: usize, max_entries: usize) -> Self {
        let max_entries = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: RwLock::new(MemoryCacheInner {
                tiles: LruCache::new(max_entries),
                current_size: 0,
            }),
            max_size,
        }
    }

    /// Number of cached tiles.
    pub async fn len(&self) -> usize {
        self.inner.read().await.tiles.len()
    }

    /// Check if the cache is empty.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.tiles.is_empty()
    }

    /// Total size of cached tiles in bytes.
    pub async fn size(&self) -> usize {
        self.inner.read().await.current_size
    }

    /// Maximum capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.max_size
    }

    /// Check if a tile is cached without updating LRU order.
    pub async fn contains(&self, coord: &TileCoord) -> bool {
        self.inner.read().await.tiles.contains(&coord.key())
    }

    /// Drop every cached tile.
    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.tiles.clear();
        inner.current_size = 0;
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CachePlugin for MemoryCache {
    async fn get(&self, coord: &TileCoord) -> Result<Option<Tile>, CacheError> {
        // LRU promotion mutates the list
        let mut inner = self.inner.write().await;
        Ok(inner.tiles.get(&coord.key()).cloned())
    }

    async fn set(&self, meta: &TileCoord, tiles: &[Tile]) -> Result<(), CacheError> {
        let pairs = split_metatile(meta, tiles)?;

        let mut inner = self.inner.write().await;
        for (coord, tile) in pairs {
            let tile_size = tile.len();
            // `push` also reports the entry evicted by the entry-count bound
            if let Some((_, old)) = inner.tiles.push(coord.key(), tile.clone()) {
                inner.current_size = inner.current_size.saturating_sub(old.len());
            }
            inner.current_size += tile_size;
        }

        // Evict entries until we're under capacity
        while inner.current_size > self.max_size {
            match inner.tiles.pop_lru() {
                Some((_, evicted)) => {
                    inner.current_size = inner.current_size.saturating_sub(evicted.len());
                }
                None => break,
            }
        }

        Ok(())
    }
}
