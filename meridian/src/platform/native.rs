use async_trait::async_trait;
use bytes::Bytes;
use log::{info, warn};
use reqwest::header::CACHE_CONTROL;

use super::TileFetcher;
use crate::error::TileError;
use crate::layer::FetchOptions;

/// [`TileFetcher`] that loads tiles with HTTP GET requests.
#[derive(Debug, Clone)]
pub struct HttpTileFetcher {
    http_client: reqwest::Client,
    prefer_cache: bool,
}

impl HttpTileFetcher {
    /// Creates a new fetcher with the HTTP settings of the given options.
    ///
    /// If `options.verify_tls` is off, certificates of the tile server are not checked.
    pub fn new(options: &FetchOptions) -> Result<Self, TileError> {
        if !options.verify_tls {
            warn!("TLS certificate verification is disabled for tile requests");
        }

        let http_client = reqwest::Client::builder()
            .user_agent(options.user_agent.as_str())
            .danger_accept_invalid_certs(!options.verify_tls)
            .build()
            .map_err(|err| {
                TileError::Configuration(format!("failed to create http client: {err}"))
            })?;

        Ok(Self {
            http_client,
            prefer_cache: options.prefer_cache,
        })
    }
}

#[async_trait]
impl TileFetcher for HttpTileFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes, TileError> {
        let mut request = self.http_client.get(url);
        if self.prefer_cache {
            // Intermediate caches may answer with a stale copy instead of revalidating.
            request = request.header(CACHE_CONTROL, "max-stale");
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            info!("Failed to load {url}: {}", response.status());
            return Err(TileError::HttpStatus(response.status().as_u16()));
        }

        Ok(response.bytes().await?)
    }
}
