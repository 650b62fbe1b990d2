//! Configuration management for the metatile server.
//!
//! This module provides a flexible configuration system that supports:
//! - Command-line arguments via clap
//! - Environment variables with `TILESERVER_` prefix
//! - Sensible defaults for all optional settings
//!
//! # Example
//!
//! ```ignore
//! use metatile_server::config::Config;
//!
//! let config = Config::parse();
//! println!("Listening on {}", config.bind_address());
//! ```
//!
//! # Environment Variables
//!
//! - `TILESERVER_HOST` - Server bind address (default: 0.0.0.0)
//! - `TILESERVER_PORT` - Server port (default: 3000)
//! - `TILESERVER_METATILE_SIZE` - Metatile side length in tiles (default: 8)
//! - `TILESERVER_REMOVE_DELAY_MS` - How long rendered metatiles stay in the save queue (default: 10000)
//! - `TILESERVER_RENDER_TIMEOUT_MS` - Give up waiting for a render after this long (default: wait forever)
//! - `TILESERVER_RENDER_POOLS` - Comma-separated `min-max:workers:queue` pool specs
//! - `TILESERVER_TILE_PIXELS` - Tile edge in pixels (default: 256)
//! - `TILESERVER_JPEG_QUALITY` - JPEG quality (default: 80)
//! - `TILESERVER_CACHE_BACKEND` - `memory` or `s3` (default: memory)
//! - `TILESERVER_CACHE_SIZE` - Memory cache capacity in bytes (default: 256MB)
//! - `TILESERVER_S3_BUCKET` - S3 bucket for the s3 backend
//! - `TILESERVER_S3_PREFIX` - Key prefix inside the bucket
//! - `TILESERVER_S3_ENDPOINT` - Custom S3 endpoint for S3-compatible services
//! - `TILESERVER_S3_REGION` - AWS region (default: us-east-1)
//! - `TILESERVER_PERFLOG_CAPACITY` - Perf log entries kept in memory (default: 10000)
//! - `TILESERVER_CACHE_MAX_AGE` - HTTP cache max-age seconds (default: 3600)
//! - `TILESERVER_CORS_ORIGINS` - Allowed CORS origins, comma-separated

use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::cache::DEFAULT_MEMORY_CACHE_CAPACITY;
use crate::render::{
    RenderPoolConfig, RenderPoolsConfig, DEFAULT_JPEG_QUALITY, DEFAULT_TILE_PIXELS,
    MAX_JPEG_QUALITY, MIN_JPEG_QUALITY,
};
use crate::telemetry::DEFAULT_PERFLOG_CAPACITY;
use crate::tile::DEFAULT_METATILE_SIZE;

// =============================================================================
// Default Values
// =============================================================================

/// Default server host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default server port.
pub const DEFAULT_PORT: u16 = 3000;

/// Default AWS region.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Default time a rendered metatile stays in the save queue.
pub const DEFAULT_REMOVE_DELAY_MS: u64 = 10_000;

/// Default HTTP cache max-age in seconds (1 hour).
pub const DEFAULT_CACHE_MAX_AGE: u32 = 3600;

/// Largest accepted metatile side length.
pub const MAX_METATILE_SIZE: u64 = 64;

/// Largest accepted tile edge in pixels.
pub const MAX_TILE_PIXELS: u32 = 4096;

/// Where rendered tiles are persisted.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    /// In-process LRU, lost on restart
    Memory,
    /// One object per tile in an S3 bucket
    S3,
}

// =============================================================================
// CLI Arguments
// =============================================================================

/// Metatile Server - renders map tiles in metatiles and caches the results.
#[derive(Parser, Debug, Clone)]
#[command(name = "metatile-server")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Host address to bind the server to.
    #[arg(long, default_value = DEFAULT_HOST, env = "TILESERVER_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "TILESERVER_PORT")]
    pub port: u16,

    // =========================================================================
    // Rendering Configuration
    // =========================================================================
    /// Metatile side length in tiles.
    #[arg(long, default_value_t = DEFAULT_METATILE_SIZE, env = "TILESERVER_METATILE_SIZE")]
    pub metatile_size: u64,

    /// How long a rendered metatile is kept in the save queue, in milliseconds.
    #[arg(long, default_value_t = DEFAULT_REMOVE_DELAY_MS, env = "TILESERVER_REMOVE_DELAY_MS")]
    pub remove_delay_ms: u64,

    /// Maximum time to wait for a render, in milliseconds.
    ///
    /// If not specified, requests wait until the render pool answers.
    #[arg(long, env = "TILESERVER_RENDER_TIMEOUT_MS")]
    pub render_timeout_ms: Option<u64>,

    /// Render pools as `min_zoom-max_zoom:workers:queue_size`, comma-separated.
    ///
    /// Requests go to the first pool covering their zoom level.
    #[arg(
        long,
        env = "TILESERVER_RENDER_POOLS",
        value_delimiter = ',',
        default_value = "0-30:4:256"
    )]
    pub render_pools: Vec<RenderPoolConfig>,

    /// Tile edge in pixels.
    #[arg(long, default_value_t = DEFAULT_TILE_PIXELS, env = "TILESERVER_TILE_PIXELS")]
    pub tile_pixels: u32,

    /// JPEG quality for rendered tiles (1-100).
    #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY, env = "TILESERVER_JPEG_QUALITY")]
    pub jpeg_quality: u8,

    // =========================================================================
    // Cache Configuration
    // =========================================================================
    /// Cache backend for rendered tiles.
    #[arg(long, value_enum, default_value_t = CacheBackend::Memory, env = "TILESERVER_CACHE_BACKEND")]
    pub cache_backend: CacheBackend,

    /// Memory cache capacity in bytes.
    #[arg(long, default_value_t = DEFAULT_MEMORY_CACHE_CAPACITY, env = "TILESERVER_CACHE_SIZE")]
    pub cache_size: usize,

    /// S3 bucket name for the s3 cache backend.
    #[arg(long, env = "TILESERVER_S3_BUCKET")]
    pub s3_bucket: Option<String>,

    /// Key prefix for tiles inside the bucket.
    #[arg(long, default_value = "", env = "TILESERVER_S3_PREFIX")]
    pub s3_prefix: String,

    /// Custom S3 endpoint URL for S3-compatible services (MinIO, etc.).
    ///
    /// If not specified, uses the default AWS S3 endpoint.
    #[arg(long, env = "TILESERVER_S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    /// AWS region for S3.
    #[arg(long, default_value = DEFAULT_REGION, env = "TILESERVER_S3_REGION")]
    pub s3_region: String,

    // =========================================================================
    // HTTP Configuration
    // =========================================================================
    /// Number of per-request timing records kept for /perflog.
    #[arg(long, default_value_t = DEFAULT_PERFLOG_CAPACITY, env = "TILESERVER_PERFLOG_CAPACITY")]
    pub perflog_capacity: usize,

    /// HTTP Cache-Control max-age in seconds.
    #[arg(long, default_value_t = DEFAULT_CACHE_MAX_AGE, env = "TILESERVER_CACHE_MAX_AGE")]
    pub cache_max_age: u32,

    /// Allowed CORS origins (comma-separated).
    ///
    /// If not specified, allows any origin.
    #[arg(long, env = "TILESERVER_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    // =========================================================================
    // Logging Configuration
    // =========================================================================
    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl Config {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.metatile_size == 0 || self.metatile_size > MAX_METATILE_SIZE {
            return Err(format!(
                "metatile_size must be between 1 and {}",
                MAX_METATILE_SIZE
            ));
        }

        self.render_pools_config()
            .validate()
            .map_err(|e| e.to_string())?;

        if self.tile_pixels == 0 || self.tile_pixels > MAX_TILE_PIXELS {
            return Err(format!(
                "tile_pixels must be between 1 and {}",
                MAX_TILE_PIXELS
            ));
        }

        if !(MIN_JPEG_QUALITY..=MAX_JPEG_QUALITY).contains(&self.jpeg_quality) {
            return Err("jpeg_quality must be between 1 and 100".to_string());
        }

        if self.render_timeout_ms == Some(0) {
            return Err("render_timeout_ms must be greater than 0".to_string());
        }

        match self.cache_backend {
            CacheBackend::Memory if self.cache_size == 0 => {
                return Err("cache_size must be greater than 0".to_string());
            }
            CacheBackend::S3 if self.s3_bucket.as_deref().unwrap_or("").is_empty() => {
                return Err(
                    "S3 bucket name is required for the s3 cache backend. \
                     Set --s3-bucket or TILESERVER_S3_BUCKET"
                        .to_string(),
                );
            }
            _ => {}
        }

        if self.perflog_capacity == 0 {
            return Err("perflog_capacity must be greater than 0".to_string());
        }

        Ok(())
    }

    /// Get the server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn remove_delay(&self) -> Duration {
        Duration::from_millis(self.remove_delay_ms)
    }

    pub fn render_timeout(&self) -> Option<Duration> {
        self.render_timeout_ms.map(Duration::from_millis)
    }

    pub fn render_pools_config(&self) -> RenderPoolsConfig {
        RenderPoolsConfig::new(self.render_pools.clone())
    }
}

// =============================================================================
// Tests
// =============================================================================
