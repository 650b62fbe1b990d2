//! Render dispatch.
//!
//! Submits a metatile to the render pool and waits for its single result on
//! a one-shot channel.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{RenderPoolError, TileServerError};
use crate::render::RenderPool;

use super::coord::{Priority, Tile, TileCoord};

/// Sends metatile renders to a [`RenderPool`] and awaits the outcome.
pub struct RenderDispatcher<P: RenderPool> {
    pool: Arc<P>,
    timeout: Option<Duration>,
}

impl<P: RenderPool> RenderDispatcher<P> {
    /// Create a dispatcher that waits for renders indefinitely.
    pub fn new(pool: Arc<P>) -> Self {
        Self {
            pool,
            timeout: None,
        }
    }

    /// Bound the wait for a render result.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn pool(&self) -> &Arc<P> {
        &self.pool
    }

    /// Render `meta` and return its tiles in row-major order.
    ///
    /// # Errors
    ///
    /// - [`TileServerError::QueueLimitExceeded`] if the pool refused the job
    /// - [`TileServerError::RenderTimeout`] if a timeout is set and elapsed
    /// - [`TileServerError::Render`] for any other failure, including a
    ///   renderer returning the wrong number of tiles
    pub async fn submit(
        &self,
        meta: TileCoord,
        priority: Priority,
    ) -> Result<Vec<Tile>, TileServerError> {
        let (reply, result) = oneshot::channel();

        self.pool
            .enqueue_request(meta, reply, priority)
            .map_err(|e| match e {
                RenderPoolError::QueueFull { .. } => {
                    warn!(meta = %meta, priority = %priority, error = %e, "Render request rejected");
                    TileServerError::QueueLimitExceeded
                }
                other => TileServerError::render(other),
            })?;

        debug!(meta = %meta, priority = %priority, "Render request queued");

        let received = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, result)
                .await
                .map_err(|_| TileServerError::RenderTimeout(limit))?,
            None => result.await,
        };

        let tiles = received
            .map_err(|_| TileServerError::render("render pool dropped the request without a response"))?
            .map_err(TileServerError::render)?;

        let expected = (meta.size * meta.size) as usize;
        if tiles.len() != expected {
            return Err(TileServerError::render(format!(
                "renderer returned {} tiles for {}, expected {}",
                tiles.len(),
                meta,
                expected
            )));
        }

        Ok(tiles)
    }
}
