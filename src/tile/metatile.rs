//! Metatile decomposition.
//!
//! Renderers work on square blocks of `N x N` tiles ("metatiles") because
//! rendering a block at once is much cheaper than rendering each tile alone.
//! A metatile is addressed by its top-left tile, with x and y aligned down to
//! a multiple of `N`:
//!
//! ```text
//!   x: 8      9     10     11   ...  15
//! y:16 ┌──────┬──────┬──────┬─ ─ ─┬──────┐
//!      │  0   │  1   │  2   │     │  7   │
//!   17 ├──────┼──────┼──────┼─ ─ ─┼──────┤
//!      │  8   │  9   │  10  │     │  15  │
//!   18 ├──────┼──────┼──────┼─ ─ ─┼──────┤
//!      │  16  │  17  │  18  │     │  23  │
//!      └──────┴──────┴──────┴─ ─ ─┴──────┘
//! ```
//!
//! Tiles inside a rendered metatile are stored in row-major order, so the
//! tile `4/10/18` is at index 18 of metatile `4/8/16` when `N = 8`.

use super::coord::TileCoord;

/// Default metatile side length.
pub const DEFAULT_METATILE_SIZE: u64 = 8;

/// Maps tiles to the metatiles that contain them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metatiler {
    size: u64,
}

impl Metatiler {
    /// Create a metatiler for the given side length.
    ///
    /// A side length of zero is treated as one.
    pub fn new(size: u64) -> Self {
        Self { size: size.max(1) }
    }

    /// Metatile side length.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Number of tiles in a full metatile.
    pub fn tiles_per_metatile(&self) -> usize {
        (self.size * self.size) as usize
    }

    /// Get the coordinate of the metatile covering `coord`.
    ///
    /// The result's `size` is the metatile side length.
    pub fn tile_to_metatile(&self, coord: &TileCoord) -> TileCoord {
        TileCoord {
            zoom: coord.zoom,
            x: coord.x / self.size * self.size,
            y: coord.y / self.size * self.size,
            size: self.size,
        }
    }

    /// Row-major index of `coord` inside the metatile `meta`.
    ///
    /// Returns `None` if the tile lies outside the metatile.
    pub fn sub_index(coord: &TileCoord, meta: &TileCoord) -> Option<usize> {
        if coord.zoom != meta.zoom
            || coord.x < meta.x
            || coord.y < meta.y
            || coord.x - meta.x >= meta.size
            || coord.y - meta.y >= meta.size
        {
            return None;
        }
        Some(((coord.y - meta.y) * meta.size + (coord.x - meta.x)) as usize)
    }

    /// Coordinates of every tile in `meta`, in row-major order.
    pub fn metatile_tiles(meta: &TileCoord) -> Vec<TileCoord> {
        let mut tiles = Vec::with_capacity((meta.size * meta.size) as usize);
        for dy in 0..meta.size {
            for dx in 0..meta.size {
                tiles.push(TileCoord::tile(meta.zoom, meta.x + dx, meta.y + dy));
            }
        }
        tiles
    }
}

impl Default for Metatiler {
    fn default() -> Self {
        Self::new(DEFAULT_METATILE_SIZE)
    }
}
