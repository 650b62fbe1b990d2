//! Tile server orchestration tests.
//!
//! Tests verify:
//! - Size validation and response shaping
//! - Coalescing through the save queue and its expiry
//! - Synchronous and background cache writes
//! - Error propagation from the render pool and the cache
//! - Telemetry for every request

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use metatile_server::error::TileServerError;
use metatile_server::tile::{Priority, TileCoord};

use super::test_utils::{stub_tiles, Harness, RecordingCache, StubMode, StubRenderPool};

const WINDOW: Duration = Duration::from_secs(10);

// =============================================================================
// Validation and Shaping
// =============================================================================

#[tokio::test]
async fn test_invalid_size_has_no_side_effects() {
    let h = Harness::standard();

    for size in [2, 7, 9, 64] {
        let result = h
            .server
            .serve_tile_request(&TileCoord::new(4, 10, 18, size), Priority::Normal, true)
            .await;

        assert!(matches!(
            result,
            Err(TileServerError::InvalidSize { size: s, metatile_size: 8 }) if s == size
        ));
    }

    assert_eq!(h.pool.calls(), 0);
    assert!(h.cache.writes().is_empty());
    assert_eq!(h.server.buffered_metatiles().await, 0);
}

#[tokio::test]
async fn test_full_metatile_in_row_major_order() {
    let h = Harness::standard();

    let response = h
        .server
        .serve_tile_request(&TileCoord::new(4, 8, 16, 8), Priority::Normal, true)
        .await
        .unwrap();

    assert_eq!(response.tiles, stub_tiles(&TileCoord::new(4, 8, 16, 8), 1));
    assert_eq!(response.tiles[1], Bytes::from("4/9/16#1"));
    assert_eq!(response.tiles[8], Bytes::from("4/8/17#1"));
}

#[tokio::test]
async fn test_full_metatile_from_unaligned_coordinate() {
    let h = Harness::standard();

    let response = h
        .server
        .serve_tile_request(&TileCoord::new(4, 13, 21, 8), Priority::Normal, true)
        .await
        .unwrap();

    assert_eq!(response.tiles.len(), 64);
    assert_eq!(response.tiles[0], Bytes::from("4/8/16#1"));
}

#[tokio::test]
async fn test_single_tile_at_sub_index() {
    let h = Harness::standard();

    // metatile 4/8/16, sub-index (18-16)*8 + (10-8) = 18
    let response = h
        .server
        .serve_tile_request(&TileCoord::new(4, 10, 18, 1), Priority::Normal, true)
        .await
        .unwrap();

    let full = stub_tiles(&TileCoord::new(4, 8, 16, 8), 1);
    assert_eq!(response.tiles, vec![full[18].clone()]);
    assert_eq!(response.tiles[0], Bytes::from("4/10/18#1"));
    assert_eq!(h.cache.writes(), vec![TileCoord::new(4, 8, 16, 8)]);
}

#[tokio::test]
async fn test_size_zero_renders_without_payload() {
    let h = Harness::standard();

    let response = h
        .server
        .serve_tile_request(&TileCoord::new(4, 10, 18, 0), Priority::Low, true)
        .await
        .unwrap();

    assert!(response.tiles.is_empty());
    assert_eq!(h.pool.calls(), 1);
    assert_eq!(
        h.cache.stored(&TileCoord::tile(4, 15, 23)),
        Some(Bytes::from("4/15/23#1"))
    );
}

#[tokio::test]
async fn test_priority_is_forwarded() {
    let h = Harness::standard();

    for (x, priority) in [(0, Priority::High), (8, Priority::Low)] {
        h.server
            .serve_tile_request(&TileCoord::new(4, x, 0, 1), priority, true)
            .await
            .unwrap();
    }

    assert_eq!(h.pool.priorities(), vec![Priority::High, Priority::Low]);
}

// =============================================================================
// Coalescing
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_second_request_inside_window_is_coalesced() {
    let h = Harness::standard();

    let first = h
        .server
        .serve_tile_request(&TileCoord::new(4, 10, 18, 1), Priority::Normal, false)
        .await
        .unwrap();
    assert!(!first.coalesced);

    tokio::time::sleep(WINDOW / 2).await;

    // Neighbouring tile in the same metatile
    let second = h
        .server
        .serve_tile_request(&TileCoord::new(4, 11, 18, 1), Priority::Normal, false)
        .await
        .unwrap();

    assert!(second.coalesced);
    assert_eq!(second.render_time, Duration::ZERO);
    assert_eq!(second.tiles[0], Bytes::from("4/11/18#1"));
    assert_eq!(h.pool.calls(), 1);

    h.server.wait_idle().await;
    assert_eq!(h.cache.writes().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_request_after_window_renders_again() {
    let h = Harness::standard();
    let coord = TileCoord::new(4, 10, 18, 1);

    h.server
        .serve_tile_request(&coord, Priority::Normal, true)
        .await
        .unwrap();
    assert_eq!(h.server.buffered_metatiles().await, 1);

    tokio::time::sleep(WINDOW + Duration::from_millis(1)).await;
    assert_eq!(h.server.buffered_metatiles().await, 0);

    let again = h
        .server
        .serve_tile_request(&coord, Priority::Normal, true)
        .await
        .unwrap();

    assert!(!again.coalesced);
    assert_eq!(again.tiles[0], Bytes::from("4/10/18#2"));
    assert_eq!(h.pool.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_buffer_serves_while_sync_write_is_in_flight() {
    let h = Arc::new(Harness::new(
        StubRenderPool::rendering(),
        RecordingCache::new().with_delay(Duration::from_secs(2)),
        8,
        WINDOW,
    ));

    let writer = {
        let h = h.clone();
        tokio::spawn(async move {
            h.server
                .serve_tile_request(&TileCoord::new(4, 10, 18, 1), Priority::Normal, true)
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(h.cache.writes().is_empty());

    let coalesced = h
        .server
        .serve_tile_request(&TileCoord::new(4, 9, 17, 1), Priority::Normal, true)
        .await
        .unwrap();
    assert!(coalesced.coalesced);
    assert_eq!(coalesced.save_time, Duration::ZERO);

    let first = writer.await.unwrap().unwrap();
    assert!(first.save_time >= Duration::from_secs(2));
    assert_eq!(h.pool.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_misses_render_twice() {
    let h = Arc::new(Harness::new(
        StubRenderPool::rendering().with_delay(Duration::from_millis(200)),
        RecordingCache::new(),
        8,
        WINDOW,
    ));

    let a = {
        let h = h.clone();
        tokio::spawn(async move {
            h.server
                .serve_tile_request(&TileCoord::new(4, 10, 18, 1), Priority::Normal, false)
                .await
        })
    };
    let b = {
        let h = h.clone();
        tokio::spawn(async move {
            h.server
                .serve_tile_request(&TileCoord::new(4, 11, 18, 1), Priority::Normal, false)
                .await
        })
    };

    let a = a.await.unwrap().unwrap();
    let b = b.await.unwrap().unwrap();

    assert!(!a.coalesced && !b.coalesced);
    assert_eq!(h.pool.calls(), 2);
    assert_eq!(h.server.buffered_metatiles().await, 2);
    assert!(a.render_time >= Duration::from_millis(200));
}

#[tokio::test(start_paused = true)]
async fn test_rerender_replaces_buffered_tiles() {
    let h = Harness::standard();
    let coord = TileCoord::new(4, 10, 18, 1);

    h.server
        .serve_tile_request(&coord, Priority::Normal, true)
        .await
        .unwrap();

    // Same metatile rendered again through a full-size request after the window
    tokio::time::sleep(WINDOW + Duration::from_millis(1)).await;
    h.server
        .serve_tile_request(&TileCoord::new(4, 8, 16, 8), Priority::Normal, true)
        .await
        .unwrap();

    let response = h
        .server
        .serve_tile_request(&coord, Priority::Normal, true)
        .await
        .unwrap();
    assert!(response.coalesced);
    assert_eq!(response.tiles[0], Bytes::from("4/10/18#2"));
}

// =============================================================================
// Cache Writes
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_sync_write_failure_is_render_error_with_save_time() {
    let h = Harness::new(
        StubRenderPool::rendering(),
        RecordingCache::failing().with_delay(Duration::from_millis(50)),
        8,
        WINDOW,
    );

    let result = h
        .server
        .serve_tile_request(&TileCoord::new(4, 10, 18, 1), Priority::Normal, true)
        .await;

    match result {
        Err(TileServerError::Render { message }) => assert!(message.contains("disk full")),
        other => panic!("expected render error, got {:?}", other),
    }

    let entries = h.perf_log.entries();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].save_time >= Duration::from_millis(50));

    // The rendered tiles are still buffered
    assert_eq!(h.server.buffered_metatiles().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_async_write_failure_is_hidden() {
    let h = Harness::new(
        StubRenderPool::rendering(),
        RecordingCache::failing().with_delay(Duration::from_millis(50)),
        8,
        WINDOW,
    );

    let response = h
        .server
        .serve_tile_request(&TileCoord::new(4, 10, 18, 1), Priority::Normal, false)
        .await
        .unwrap();

    assert_eq!(response.save_time, Duration::ZERO);
    assert_eq!(h.server.pending_writes(), 1);

    h.server.wait_idle().await;
    assert_eq!(h.server.pending_writes(), 0);
    assert_eq!(h.cache.writes(), vec![TileCoord::new(4, 8, 16, 8)]);
    assert!(h.metrics.samples()[0].1);
}

// =============================================================================
// Render Errors
// =============================================================================

#[tokio::test]
async fn test_pool_rejection_is_queue_limit_exceeded() {
    let h = Harness::new(
        StubRenderPool::new(StubMode::Reject),
        RecordingCache::new(),
        8,
        WINDOW,
    );

    let result = h
        .server
        .serve_tile_request(&TileCoord::new(4, 10, 18, 1), Priority::High, true)
        .await;

    assert!(matches!(result, Err(TileServerError::QueueLimitExceeded)));
    assert_eq!(h.server.buffered_metatiles().await, 0);
    assert!(h.cache.writes().is_empty());
}

#[tokio::test]
async fn test_render_failure_skips_cache_and_buffer() {
    let h = Harness::new(
        StubRenderPool::new(StubMode::Fail("style missing".to_string())),
        RecordingCache::new(),
        8,
        WINDOW,
    );

    let result = h
        .server
        .serve_tile_request(&TileCoord::new(4, 10, 18, 1), Priority::Normal, false)
        .await;

    match result {
        Err(TileServerError::Render { message }) => assert_eq!(message, "style missing"),
        other => panic!("expected render error, got {:?}", other),
    }
    assert_eq!(h.server.buffered_metatiles().await, 0);
    assert_eq!(h.server.pending_writes(), 0);
    assert!(h.cache.writes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_render_timeout() {
    let h = Harness::new(
        StubRenderPool::new(StubMode::Hang),
        RecordingCache::new(),
        8,
        WINDOW,
    );
    let server = h.server.with_render_timeout(Some(Duration::from_secs(3)));

    let result = server
        .serve_tile_request(&TileCoord::new(4, 10, 18, 1), Priority::Normal, true)
        .await;

    assert!(matches!(
        result,
        Err(TileServerError::RenderTimeout(d)) if d == Duration::from_secs(3)
    ));
    assert!(h.cache.writes().is_empty());

    let entries = h.perf_log.entries();
    assert!(entries[0].render_time >= Duration::from_secs(3));
}

// =============================================================================
// Telemetry and Reload
// =============================================================================

#[tokio::test]
async fn test_every_request_is_reported() {
    let h = Harness::standard();

    h.server
        .serve_tile_request(&TileCoord::new(4, 10, 18, 1), Priority::Normal, true)
        .await
        .unwrap();
    h.server
        .serve_tile_request(&TileCoord::new(4, 10, 18, 3), Priority::Normal, true)
        .await
        .unwrap_err();
    h.server
        .serve_tile_request(&TileCoord::new(4, 11, 18, 1), Priority::Normal, true)
        .await
        .unwrap();

    let outcomes: Vec<bool> = h.metrics.samples().iter().map(|(_, ok)| *ok).collect();
    assert_eq!(outcomes, vec![true, false, true]);

    let coords: Vec<TileCoord> = h.perf_log.entries().iter().map(|e| e.coord).collect();
    assert_eq!(
        coords,
        vec![
            TileCoord::new(4, 10, 18, 1),
            TileCoord::new(4, 10, 18, 3),
            TileCoord::new(4, 11, 18, 1),
        ]
    );
}

#[tokio::test]
async fn test_reload_style_delegates_to_pool() {
    let h = Harness::standard();

    h.server.reload_style().await.unwrap();

    assert_eq!(h.pool.reloads(), 1);
    assert_eq!(h.pool.calls(), 0);
}
