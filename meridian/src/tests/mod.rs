use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use meridian_types::TileCoordinate;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::sync::Semaphore;

use crate::cache::{CacheKey, PersistentTileCache, TileCacheStore};
use crate::error::TileError;
use crate::layer::{Tile, TileConsumer};
use crate::platform::TileFetcher;

const WAIT_LIMIT: Duration = Duration::from_secs(2);
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// PNG image of the given size filled with a single color.
pub fn png_tile(width: u32, height: u32) -> Bytes {
    let image = image::RgbaImage::from_pixel(width, height, image::Rgba([10, 20, 30, 255]));
    let mut buffer = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(image)
        .write_to(&mut buffer, image::ImageOutputFormat::Png)
        .expect("failed to encode test image");

    Bytes::from(buffer.into_inner())
}

pub fn example_url(coordinate: &TileCoordinate) -> String {
    format!(
        "http://tile.example.com/{}/{}/{}.png",
        coordinate.zoom, coordinate.x, coordinate.y
    )
}

type Response = Box<dyn Fn(&str) -> Result<Bytes, TileError> + Send + Sync>;

/// Fetcher that records requested urls. A gated fetcher holds every request until it is
/// released.
pub struct TestFetcher {
    response: Response,
    requests: Mutex<VecDeque<String>>,
    gate: Option<Semaphore>,
}

impl TestFetcher {
    pub fn ok() -> Self {
        Self::with_response(|_| Ok(png_tile(2, 2)))
    }

    pub fn with_response(
        response: impl Fn(&str) -> Result<Bytes, TileError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            response: Box::new(response),
            requests: Mutex::new(VecDeque::new()),
            gate: None,
        }
    }

    pub fn gated(mut self) -> Self {
        self.gate = Some(Semaphore::new(0));
        self
    }

    pub fn release(&self, count: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(count);
        }
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().iter().cloned().collect()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait::async_trait]
impl TileFetcher for TestFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes, TileError> {
        self.requests.lock().push_back(url.to_owned());
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate is never closed").forget();
        }

        (self.response)(url)
    }
}

/// Cache that waits before every write.
pub struct SlowCache {
    store: Arc<TileCacheStore>,
    write_delay: Duration,
}

impl SlowCache {
    pub fn new(store: Arc<TileCacheStore>, write_delay: Duration) -> Self {
        Self { store, write_delay }
    }
}

#[async_trait::async_trait]
impl PersistentTileCache for SlowCache {
    async fn get(&self, key: &CacheKey) -> Option<Bytes> {
        self.store.lookup(key).await
    }

    async fn insert(&self, key: &CacheKey, data: &Bytes) -> Result<(), TileError> {
        tokio::time::sleep(self.write_delay).await;
        self.store.try_store(key, data).await
    }
}

/// Cache that is always empty and rejects every write.
pub struct FailingCache;

#[async_trait::async_trait]
impl PersistentTileCache for FailingCache {
    async fn get(&self, _key: &CacheKey) -> Option<Bytes> {
        None
    }

    async fn insert(&self, key: &CacheKey, _data: &Bytes) -> Result<(), TileError> {
        Err(TileError::StoreWrite(format!("tile {}: disk is full", key.coordinate)))
    }
}

pub fn channel_consumer() -> (
    impl TileConsumer,
    UnboundedReceiver<(TileCoordinate, Tile)>,
) {
    let (sender, receiver) = mpsc::unbounded_channel();
    let consumer = move |coordinate: TileCoordinate, tile: Tile| {
        let _ = sender.send((coordinate, tile));
    };

    (consumer, receiver)
}

pub async fn next_tile(
    receiver: &mut UnboundedReceiver<(TileCoordinate, Tile)>,
) -> (TileCoordinate, Tile) {
    tokio::time::timeout(WAIT_LIMIT, receiver.recv())
        .await
        .expect("no tile delivered in time")
        .expect("consumer dropped")
}

pub async fn wait_until(condition: impl Fn() -> bool) {
    let waiting = async {
        while !condition() {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    };

    tokio::time::timeout(WAIT_LIMIT, waiting)
        .await
        .expect("condition was not met in time");
}

pub async fn wait_for_entry(store: &TileCacheStore, key: &CacheKey) -> Bytes {
    let waiting = async {
        loop {
            if let Some(data) = store.lookup(key).await {
                return data;
            }

            tokio::time::sleep(POLL_INTERVAL).await;
        }
    };

    tokio::time::timeout(WAIT_LIMIT, waiting)
        .await
        .expect("tile was not written to the cache in time")
}
