//! Persistent tile caches.
//!
//! The tile server writes every freshly rendered metatile through a
//! [`CachePlugin`]. Reads happen on the HTTP path, before the tile server is
//! asked to render anything.
//!
//! - [`MemoryCache`]: size-bounded in-process LRU
//! - [`S3Cache`]: one object per tile in an S3 (or S3-compatible) bucket

mod memory;
mod s3;

use async_trait::async_trait;

use crate::error::CacheError;
use crate::tile::{Metatiler, Tile, TileCoord};

pub use memory::{MemoryCache, DEFAULT_MEMORY_CACHE_CAPACITY};
pub use s3::{create_s3_client, S3Cache};

/// Storage backend for rendered tiles.
#[async_trait]
pub trait CachePlugin: Send + Sync + 'static {
    /// Read a single tile. Returns `Ok(None)` when the tile is not cached.
    async fn get(&self, coord: &TileCoord) -> Result<Option<Tile>, CacheError>;

    /// Store all tiles of the metatile `meta`, given in row-major order.
    async fn set(&self, meta: &TileCoord, tiles: &[Tile]) -> Result<(), CacheError>;
}

/// Pair each tile of `meta` with its coordinate.
///
/// Fails if the number of tiles does not match the metatile size.
pub(crate) fn split_metatile<'a>(
    meta: &TileCoord,
    tiles: &'a [Tile],
) -> Result<impl Iterator<Item = (TileCoord, &'a Tile)>, CacheError> {
    let coords = Metatiler::metatile_tiles(meta);
    if coords.len() != tiles.len() {
        return Err(CacheError::TileCountMismatch {
            coord: meta.to_string(),
            expected: coords.len(),
            actual: tiles.len(),
        });
    }
    Ok(coords.into_iter().zip(tiles.iter()))
}
