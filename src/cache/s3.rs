use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tokio::task::JoinSet;
use tracing::debug;

use super::{split_metatile, CachePlugin};
use crate::error::CacheError;
use crate::tile::{Tile, TileCoord};

const TILE_CONTENT_TYPE: &str = "image/jpeg";

/// S3-backed tile cache.
///
/// Stores one object per tile under `{prefix}{z}/{x}/{y}.jpg` in S3 or an
/// S3-compatible service (MinIO, etc.). A metatile write uploads its tiles
/// concurrently and fails if any single upload fails.
#[derive(Clone)]
pub struct S3Cache {
    client: Client,
    bucket: String,
    prefix: String,
}

impl S3Cache {
    /// Create a cache writing into `bucket` under `prefix`.
    ///
    /// A non-empty prefix without a trailing `/` gets one appended.
    pub fn new(client: Client, bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        let mut prefix = prefix.into();
        if !prefix.is_empty() && !prefix.ends_with('/') {
            prefix.push('/');
        }
        Self {
            client,
            bucket: bucket.into(),
            prefix,
        }
    }

    /// Get the bucket name.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Object key of a single tile.
    pub fn object_key(&self, coord: &TileCoord) -> String {
        tile_object_key(&self.prefix, coord)
    }
}

fn tile_object_key(prefix: &str, coord: &TileCoord) -> String {
    format!("{}{}/{}/{}.jpg", prefix, coord.zoom, coord.x, coord.y)
}

#[async_trait]
impl CachePlugin for S3Cache {
    async fn get(&self, coord: &TileCoord) -> Result<Option<Tile>, CacheError> {
        let key = self.object_key(coord);

        let resp = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                let no_such_key = e
                    .as_service_error()
                    .map(|se| se.is_no_such_key())
                    .unwrap_or(false);

                // Some S3-compatible services answer a bare 404 instead
                let status_is_404 = e
                    .raw_response()
                    .map(|r| r.status().as_u16() == 404)
                    .unwrap_or(false);

                if no_such_key || status_is_404 {
                    return Ok(None);
                }
                return Err(CacheError::S3(e.to_string()));
            }
        };

        let data = resp
            .body
            .collect()
            .await
            .map_err(|e| CacheError::Connection(e.to_string()))?
            .into_bytes();

        Ok(Some(data))
    }

    async fn set(&self, meta: &TileCoord, tiles: &[Tile]) -> Result<(), CacheError> {
        let mut uploads = JoinSet::new();

        for (coord, tile) in split_metatile(meta, tiles)? {
            let client = self.client.clone();
            let bucket = self.bucket.clone();
            let key = self.object_key(&coord);
            let body = ByteStream::from(tile.clone());

            uploads.spawn(async move {
                client
                    .put_object()
                    .bucket(bucket)
                    .key(&key)
                    .content_type(TILE_CONTENT_TYPE)
                    .body(body)
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(|e| CacheError::S3(format!("{}: {}", key, e)))
            });
        }

        let mut first_error = None;
        while let Some(joined) = uploads.join_next().await {
            let result = joined
                .map_err(|e| CacheError::Backend(format!("Upload task failed: {}", e)))
                .and_then(|r| r);
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                debug!(bucket = %self.bucket, meta = %meta, tiles = tiles.len(), "Stored metatile");
                Ok(())
            }
        }
    }
}

/// Create an S3 client with optional custom endpoint and region.
///
/// Use a custom endpoint for S3-compatible services like MinIO:
/// ```ignore
/// let client = create_s3_client(Some("http://localhost:9000"), "us-east-1").await;
/// ```
pub async fn create_s3_client(endpoint_url: Option<&str>, region: &str) -> Client {
    let region = aws_config::Region::new(region.to_string());
    let mut config_loader =
        aws_config::defaults(aws_config::BehaviorVersion::latest()).region(region);

    if let Some(endpoint) = endpoint_url {
        config_loader = config_loader.endpoint_url(endpoint);
    }

    let sdk_config = config_loader.load().await;

    // Path-style addressing for S3-compatible services
    let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
        .force_path_style(endpoint_url.is_some())
        .build();

    Client::from_conf(s3_config)
}
