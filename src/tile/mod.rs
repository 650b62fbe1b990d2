//! Tile request orchestration.
//!
//! Tiles are never rendered alone. A request for one tile is mapped to the
//! metatile covering it, the whole metatile is rendered by the render pool,
//! written to the cache and kept for a short while in the save queue so that
//! requests for neighbouring tiles can be answered from memory.
//!
//! ```text
//!   request 4/10/18 (size 1)
//!           │
//!           ▼
//!   ┌───────────────┐   hit   ┌─────────────────────────────┐
//!   │   SaveQueue   │────────►│ pick tile 18 of metatile    │
//!   └───────┬───────┘         └─────────────────────────────┘
//!           │ miss                          ▲
//!           ▼                               │
//!   ┌────────────────┐  tiles   ┌───────────┴───┐
//!   │ RenderDispatch │─────────►│  CacheWriter  │──► CachePlugin
//!   └────────────────┘          └───────────────┘
//! ```
//!
//! # Components
//!
//! - [`TileServer`]: entry point, runs the request pipeline
//! - [`TileCoord`]: tile coordinate with a requested response size
//! - [`Metatiler`]: maps tiles to metatiles and back
//! - [`SaveQueue`]: short-lived buffer of freshly rendered metatiles
//! - [`RenderDispatcher`]: one-shot rendezvous with the render pool
//! - [`CacheWriter`]: synchronous or background cache writes
//!
//! # Example
//!
//! ```
//! use metatile_server::tile::{Metatiler, TileCoord};
//!
//! let metatiler = Metatiler::new(8);
//! let tile = TileCoord::tile(4, 10, 18);
//! let meta = metatiler.tile_to_metatile(&tile);
//!
//! assert_eq!(meta, TileCoord::new(4, 8, 16, 8));
//! assert_eq!(Metatiler::sub_index(&tile, &meta), Some(18));
//! ```

mod coord;
mod dispatch;
mod metatile;
mod save_queue;
mod service;
mod writer;

pub use coord::{Priority, Tile, TileCoord, TileKey, MAX_ZOOM};
pub use dispatch::RenderDispatcher;
pub use metatile::{Metatiler, DEFAULT_METATILE_SIZE};
pub use save_queue::{SaveQueue, SaveQueueHandle};
pub use service::{TileResponse, TileServer};
pub use writer::CacheWriter;
