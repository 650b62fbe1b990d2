//! Metatile Server - renders map tiles in metatiles and caches the results.
//!
//! This binary starts the HTTP server and configures all components.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use metatile_server::{
    cache::{create_s3_client, CachePlugin, MemoryCache, S3Cache},
    config::{CacheBackend, Config},
    render::DebugRenderer,
    server::{create_router, AppState, RouterConfig},
    telemetry::{PerfLog, ServerMetrics},
    tile::{Metatiler, TileServer},
};

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();

    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Metatile Server v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration:");
    info!(
        "  Metatiles: {}x{} tiles of {}px",
        config.metatile_size, config.metatile_size, config.tile_pixels
    );
    for pool in &config.render_pools {
        info!("  Render pool: {} (zoom-range:workers:queue)", pool);
    }
    info!("  Save queue delay: {}ms", config.remove_delay_ms);
    match config.render_timeout_ms {
        Some(ms) => info!("  Render timeout: {}ms", ms),
        None => info!("  Render timeout: none"),
    }

    let cache = build_cache(&config).await;

    let renderer = Arc::new(DebugRenderer::new(config.tile_pixels, config.jpeg_quality));
    let metrics = Arc::new(ServerMetrics::new());
    let perf_log = Arc::new(PerfLog::with_capacity(config.perflog_capacity));

    let tile_server = match TileServer::new(
        &config.render_pools_config(),
        renderer,
        cache.clone(),
        Metatiler::new(config.metatile_size),
        config.remove_delay(),
    ) {
        Ok(server) => server
            .with_metrics(metrics.clone())
            .with_perf_log(perf_log.clone())
            .with_render_timeout(config.render_timeout()),
        Err(e) => {
            error!("Failed to create render pools: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let tile_server = Arc::new(tile_server);

    let state = AppState::new(tile_server.clone(), cache, metrics, perf_log);
    let router = create_router(state, build_router_config(&config));

    let addr = config.bind_address();

    info!("");
    info!("────────────────────────────────────────────────────────────────");
    info!("  Server listening on: http://{}", addr);
    info!("");
    info!("  Try these endpoints:");
    info!("    curl http://{}/health", addr);
    info!("    curl -o tile.jpg http://{}/tiles/4/10/6.jpg", addr);
    info!("    curl http://{}/stats", addr);
    info!("────────────────────────────────────────────────────────────────");
    info!("");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    let pending = tile_server.pending_writes();
    if pending > 0 {
        info!("Waiting for {} background cache write(s)", pending);
    }
    tile_server.wait_idle().await;
    info!("Shutdown complete");

    ExitCode::SUCCESS
}

/// Build the configured cache backend.
async fn build_cache(config: &Config) -> Arc<dyn CachePlugin> {
    match config.cache_backend {
        CacheBackend::Memory => {
            info!("  Cache: memory, {}MB", config.cache_size / (1024 * 1024));
            Arc::new(MemoryCache::with_capacity(config.cache_size))
        }
        CacheBackend::S3 => {
            let bucket = config.s3_bucket.clone().unwrap_or_default();
            info!("  Cache: s3://{}/{}", bucket, config.s3_prefix);
            if let Some(ref endpoint) = config.s3_endpoint {
                info!("  S3 endpoint: {}", endpoint);
            }
            info!("  S3 region: {}", config.s3_region);

            let client = create_s3_client(config.s3_endpoint.as_deref(), &config.s3_region).await;
            Arc::new(S3Cache::new(client, bucket, config.s3_prefix.clone()))
        }
    }
}

/// Resolve once Ctrl-C is received.
async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => {
            warn!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "metatile_server=debug,tower_http=debug"
    } else {
        "metatile_server=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Build RouterConfig from the application Config.
fn build_router_config(config: &Config) -> RouterConfig {
    let mut router_config = RouterConfig::new().with_cache_max_age(config.cache_max_age);

    if let Some(ref origins) = config.cors_origins {
        router_config = router_config.with_cors_origins(origins.clone());
    }

    router_config.with_tracing(!config.no_tracing)
}
