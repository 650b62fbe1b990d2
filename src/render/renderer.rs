//! Metatile renderers.
//!
//! A renderer turns a metatile coordinate into `N x N` encoded tiles. The
//! render pool calls it from its worker tasks; it never sees requests that
//! were not admitted by the pool.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};

use crate::error::RenderPoolError;
use crate::tile::{Metatiler, Tile, TileCoord};

/// Default tile edge in pixels.
pub const DEFAULT_TILE_PIXELS: u32 = 256;

/// Default JPEG quality (1-100).
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Minimum allowed JPEG quality.
pub const MIN_JPEG_QUALITY: u8 = 1;

/// Maximum allowed JPEG quality.
pub const MAX_JPEG_QUALITY: u8 = 100;

/// Backend that renders whole metatiles.
#[async_trait]
pub trait MetatileRenderer: Send + Sync + 'static {
    /// Render every tile of `meta` in row-major order.
    ///
    /// Implementations must return exactly `meta.size * meta.size` tiles.
    async fn render(&self, meta: TileCoord) -> Result<Vec<Tile>, RenderPoolError>;

    /// Reload the rendering style.
    async fn reload(&self) -> Result<(), RenderPoolError> {
        Ok(())
    }
}

// =============================================================================
// Debug Renderer
// =============================================================================

/// Renderer that paints each tile in a flat, coordinate-derived colour.
///
/// Useful for exercising the tile pipeline without a map style. Every
/// `reload()` bumps the style generation, which shifts the palette so that
/// reloaded tiles are visibly different.
#[derive(Debug)]
pub struct DebugRenderer {
    tile_pixels: u32,
    quality: u8,
    generation: AtomicU64,
}

impl DebugRenderer {
    /// Create a renderer producing `tile_pixels`-wide JPEG tiles.
    pub fn new(tile_pixels: u32, quality: u8) -> Self {
        Self {
            tile_pixels: tile_pixels.max(1),
            quality: quality.clamp(MIN_JPEG_QUALITY, MAX_JPEG_QUALITY),
            generation: AtomicU64::new(0),
        }
    }

    /// Current style generation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Relaxed)
    }

    /// Render and encode a single tile.
    fn render_tile(
        coord: &TileCoord,
        pixels: u32,
        quality: u8,
        generation: u64,
    ) -> Result<Tile, RenderPoolError> {
        let fill = tile_colour(coord, generation);
        let border = Rgb([fill[0] / 2, fill[1] / 2, fill[2] / 2]);
        let last = pixels - 1;

        let img = RgbImage::from_fn(pixels, pixels, |px, py| {
            if px == 0 || py == 0 || px == last || py == last {
                border
            } else {
                fill
            }
        });

        let mut output = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut output, quality);
        encoder
            .encode_image(&img)
            .map_err(|e| RenderPoolError::Render(format!("JPEG encoding failed: {}", e)))?;

        Ok(Bytes::from(output))
    }
}

impl Default for DebugRenderer {
    fn default() -> Self {
        Self::new(DEFAULT_TILE_PIXELS, DEFAULT_JPEG_QUALITY)
    }
}

#[async_trait]
impl MetatileRenderer for DebugRenderer {
    async fn render(&self, meta: TileCoord) -> Result<Vec<Tile>, RenderPoolError> {
        let pixels = self.tile_pixels;
        let quality = self.quality;
        let generation = self.generation();

        // Encoding is CPU bound; keep it off the async workers
        tokio::task::spawn_blocking(move || {
            Metatiler::metatile_tiles(&meta)
                .iter()
                .map(|coord| Self::render_tile(coord, pixels, quality, generation))
                .collect::<Result<Vec<_>, _>>()
        })
        .await
        .map_err(|e| RenderPoolError::Render(format!("Render task failed: {}", e)))?
    }

    async fn reload(&self) -> Result<(), RenderPoolError> {
        self.generation.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Pick a stable colour for a tile from its coordinate and style generation.
fn tile_colour(coord: &TileCoord, generation: u64) -> Rgb<u8> {
    // FNV-1a over the coordinate; only needs to spread neighbours apart
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for value in [coord.zoom as u64, coord.x, coord.y, generation] {
        hash ^= value;
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    let [r, g, b, ..] = hash.to_le_bytes();
    Rgb([r | 0x40, g | 0x40, b | 0x40])
}
