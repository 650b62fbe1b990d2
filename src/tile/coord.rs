//! Tile coordinates and request priorities.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Highest zoom level accepted from clients.
pub const MAX_ZOOM: u32 = 30;

/// Opaque rendered payload for one tile cell.
pub type Tile = Bytes;

// =============================================================================
// Tile Coordinate
// =============================================================================

/// A tile (or metatile) coordinate together with the requested response shape.
///
/// `size` tells how many tiles per side the caller wants back:
/// `0` renders and caches without returning data, `1` returns a single tile,
/// and the metatile side length returns the whole block. For metatile
/// coordinates produced by [`Metatiler`](super::Metatiler), `size` is the
/// side length of the block.
///
/// `size` is not part of the coordinate's identity. Use [`TileCoord::key`]
/// when matching coordinates against each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileCoord {
    /// Zoom level
    pub zoom: u32,

    /// Column (0-indexed from the west)
    pub x: u64,

    /// Row (0-indexed from the north)
    pub y: u64,

    /// Tiles per side to return
    pub size: u64,
}

impl TileCoord {
    /// Create a coordinate with an explicit size.
    pub fn new(zoom: u32, x: u64, y: u64, size: u64) -> Self {
        Self { zoom, x, y, size }
    }

    /// Create a single-tile coordinate (`size == 1`).
    pub fn tile(zoom: u32, x: u64, y: u64) -> Self {
        Self::new(zoom, x, y, 1)
    }

    /// Identity of this coordinate, ignoring the requested size.
    pub fn key(&self) -> TileKey {
        TileKey {
            zoom: self.zoom,
            x: self.x,
            y: self.y,
        }
    }

    /// Check whether x and y fall inside the tile grid of this zoom level.
    pub fn is_within_bounds(&self) -> bool {
        if self.zoom > MAX_ZOOM {
            return false;
        }
        let tiles_per_side = 1u64 << self.zoom;
        self.x < tiles_per_side && self.y < tiles_per_side
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}

/// Zoom/x/y identity of a tile, used for buffer matching and cache keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey {
    pub zoom: u32,
    pub x: u64,
    pub y: u64,
}

// =============================================================================
// Priority
// =============================================================================

/// Render priority, forwarded as-is to the render pool.
///
/// Ordered so that `High > Normal > Low`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Background work such as pre-rendering
    Low,
    /// Regular client requests
    #[default]
    Normal,
    /// Interactive requests that should jump the queue
    High,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
        };
        f.write_str(name)
    }
}
