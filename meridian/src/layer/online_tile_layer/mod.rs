//! Online tile layer: loads raster tiles from a tile server and keeps them in a persistent
//! cache.

use std::sync::Arc;

use bytes::Bytes;
use log::{debug, error, info, warn};
use meridian_types::error::TileTypesError;
use meridian_types::{GeoRect, TileCoordinate};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::oneshot;

use crate::cache::{CacheKey, PersistentTileCache};
use crate::decoded_image::{DecodedImage, TileDecoder};
use crate::error::TileError;
use crate::layer::UrlSource;
use crate::platform::TileFetcher;

mod builder;
pub use builder::OnlineTileLayerBuilder;

mod in_flight;
use in_flight::{Generation, InFlightTable};

mod options;
pub use options::FetchOptions;

/// Receives tiles loaded by an [`OnlineTileLayer`].
///
/// Any `Fn(TileCoordinate, Tile)` closure is a consumer.
pub trait TileConsumer: Send + Sync {
    /// Called exactly once for every successfully loaded tile. Never called for failed or
    /// cancelled requests.
    fn on_tile(&self, coordinate: TileCoordinate, tile: Tile);
}

impl<T> TileConsumer for T
where
    T: Fn(TileCoordinate, Tile) + Send + Sync,
{
    fn on_tile(&self, coordinate: TileCoordinate, tile: Tile) {
        self(coordinate, tile)
    }
}

/// Where the data of a tile came from.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TileSource {
    /// Persistent tile cache.
    Cache,
    /// Tile server.
    Network,
}

/// Decoded tile ready to be displayed.
#[derive(Debug, Clone)]
pub struct Tile {
    coordinate: TileCoordinate,
    geometry: GeoRect,
    image: DecodedImage,
    source: TileSource,
    url: String,
}

impl Tile {
    /// Position of the tile in the grid.
    pub fn coordinate(&self) -> TileCoordinate {
        self.coordinate
    }

    /// Geographic rectangle the image covers.
    pub fn geometry(&self) -> GeoRect {
        self.geometry
    }

    /// Tile image.
    pub fn image(&self) -> &DecodedImage {
        &self.image
    }

    /// Takes the image out of the tile.
    pub fn into_image(self) -> DecodedImage {
        self.image
    }

    /// Where the tile was loaded from.
    pub fn source(&self) -> TileSource {
        self.source
    }

    /// URL of the tile.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Text to draw over the tile when debugging the layer.
    pub fn debug_label(&self) -> String {
        let cached = match self.source {
            TileSource::Cache => " Cached Tile",
            TileSource::Network => "",
        };

        format!(
            "{}{cached}\ntile({},{},{})",
            self.url, self.coordinate.zoom, self.coordinate.x, self.coordinate.y
        )
    }
}

/// Result of one attempt to load a tile.
#[derive(Debug)]
pub enum FetchOutcome {
    /// The tile was loaded and decoded.
    Loaded(Tile),
    /// Loading failed. The request is not retried.
    Failed(TileError),
    /// The request was cancelled or timed out.
    Cancelled,
}

/// What [`OnlineTileLayer::request`] did with the request.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RequestStatus {
    /// Loading of the tile has started.
    Scheduled,
    /// The tile is already being loaded, the request is ignored.
    AlreadyInFlight,
    /// The coordinate is outside of the tile grid, the request is ignored.
    InvalidCoordinate,
}

/// Raster tile layer that loads tiles with the [`TileFetcher`] and keeps them in a
/// [`PersistentTileCache`].
///
/// Tiles are requested by coordinate and delivered to the [`TileConsumer`] of the layer. Each
/// coordinate has at most one request in flight: repeated requests for a tile that is being
/// loaded are ignored until the first one completes, fails or is cancelled. A loaded tile
/// stays in flight until it is written to the cache.
///
/// Every request first looks up the cache. Tiles loaded from the network are delivered to the
/// consumer first and then written to the cache. Failed requests are logged and not retried,
/// the consumer is not notified about them.
///
/// Dropping the layer cancels all requests in flight.
///
/// ```no_run
/// use meridian::layer::{OnlineTileLayerBuilder, Tile};
/// use meridian_types::TileCoordinate;
///
/// # tokio_test::block_on(async {
/// let layer = OnlineTileLayerBuilder::new_osm()
///     .with_default_cache_db()
///     .with_consumer(|coordinate: TileCoordinate, tile: Tile| {
///         println!("{coordinate} loaded from {:?}", tile.source());
///     })
///     .build()
///     .await?;
///
/// layer.request(TileCoordinate::new(3, 5, 3));
/// # Ok::<(), meridian::error::TileError>(())
/// # });
/// ```
pub struct OnlineTileLayer {
    inner: Arc<LayerInner>,
    runtime: Handle,
}

struct LayerInner {
    url_source: Box<dyn UrlSource<TileCoordinate>>,
    cache: Option<Arc<dyn PersistentTileCache>>,
    fetcher: Arc<dyn TileFetcher>,
    decoder: Arc<dyn TileDecoder>,
    consumer: Option<Arc<dyn TileConsumer>>,
    options: FetchOptions,
    in_flight: Mutex<InFlightTable>,
}

struct LoadedTile {
    tile: Tile,
    write_back: Option<(CacheKey, Bytes)>,
}

enum Delivery {
    Consumer(Option<Arc<dyn TileConsumer>>),
    Reply(oneshot::Sender<FetchOutcome>),
}

impl Delivery {
    fn complete(self, coordinate: TileCoordinate, outcome: FetchOutcome) {
        match self {
            Delivery::Consumer(Some(consumer)) => {
                if let FetchOutcome::Loaded(tile) = outcome {
                    consumer.on_tile(coordinate, tile);
                }
            }
            Delivery::Consumer(None) => {}
            Delivery::Reply(sender) => {
                // The caller may have stopped waiting.
                let _ = sender.send(outcome);
            }
        }
    }
}

impl std::fmt::Debug for OnlineTileLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnlineTileLayer")
            .field("options", &self.inner.options)
            .field("has_cache", &self.inner.cache.is_some())
            .field("in_flight", &self.in_flight_count())
            .finish()
    }
}

impl OnlineTileLayer {
    fn new(
        url_source: Box<dyn UrlSource<TileCoordinate>>,
        cache: Option<Arc<dyn PersistentTileCache>>,
        fetcher: Arc<dyn TileFetcher>,
        decoder: Arc<dyn TileDecoder>,
        consumer: Option<Arc<dyn TileConsumer>>,
        options: FetchOptions,
        runtime: Handle,
    ) -> Self {
        Self {
            inner: Arc::new(LayerInner {
                url_source,
                cache,
                fetcher,
                decoder,
                consumer,
                options,
                in_flight: Mutex::new(InFlightTable::default()),
            }),
            runtime,
        }
    }

    /// Starts loading the tile. The tile is passed to the consumer of the layer when loaded.
    pub fn request(&self, coordinate: TileCoordinate) -> RequestStatus {
        if !coordinate.is_in_grid() {
            warn!("Requested tile {coordinate} is outside of the tile grid");
            return RequestStatus::InvalidCoordinate;
        }

        let delivery = Delivery::Consumer(self.inner.consumer.clone());
        if self.start(coordinate, delivery) {
            debug!("Requested tile {coordinate}");
            RequestStatus::Scheduled
        } else {
            debug!("Tile {coordinate} is already being loaded");
            RequestStatus::AlreadyInFlight
        }
    }

    /// Requests all the tiles, returning the number of newly scheduled requests.
    pub fn request_many(&self, coordinates: impl IntoIterator<Item = TileCoordinate>) -> usize {
        coordinates
            .into_iter()
            .filter(|coordinate| self.request(*coordinate) == RequestStatus::Scheduled)
            .count()
    }

    /// Loads the tile and returns the result instead of passing it to the consumer.
    ///
    /// Fails with [`TileError::AlreadyInFlight`] if the tile is already being loaded. The
    /// result is returned before the tile is written to the cache. The
    /// request can be cancelled with [`OnlineTileLayer::cancel`] like any other one; dropping
    /// the returned future does not cancel it.
    pub async fn load(&self, coordinate: TileCoordinate) -> FetchOutcome {
        if !coordinate.is_in_grid() {
            return FetchOutcome::Failed(TileTypesError::OutOfGrid(coordinate.to_string()).into());
        }

        let (sender, receiver) = oneshot::channel();
        if !self.start(coordinate, Delivery::Reply(sender)) {
            return FetchOutcome::Failed(TileError::AlreadyInFlight);
        }

        // The sender is dropped without a value only if the task is aborted.
        receiver.await.unwrap_or(FetchOutcome::Cancelled)
    }

    /// Cancels loading of the tile. Returns false if the tile was not being loaded.
    pub fn cancel(&self, coordinate: TileCoordinate) -> bool {
        let cancelled = self.inner.in_flight.lock().cancel(coordinate);
        if cancelled {
            debug!("Cancelled loading of tile {coordinate}");
        }

        cancelled
    }

    /// Cancels all requests in flight, returning their number.
    pub fn cancel_all(&self) -> usize {
        self.inner.in_flight.lock().cancel_all()
    }

    /// Returns true if the tile is being loaded.
    pub fn is_in_flight(&self, coordinate: TileCoordinate) -> bool {
        self.inner.in_flight.lock().contains(&coordinate)
    }

    /// Number of tiles being loaded.
    pub fn in_flight_count(&self) -> usize {
        self.inner.in_flight.lock().len()
    }

    /// Sorted list of the tiles being loaded.
    pub fn in_flight(&self) -> Vec<TileCoordinate> {
        self.inner.in_flight.lock().coordinates()
    }

    /// Settings of the layer.
    pub fn options(&self) -> &FetchOptions {
        &self.inner.options
    }

    fn start(&self, coordinate: TileCoordinate, delivery: Delivery) -> bool {
        let mut in_flight = self.inner.in_flight.lock();
        in_flight
            .try_start(coordinate, |generation| {
                let inner = self.inner.clone();
                crate::async_runtime::spawn(
                    &self.runtime,
                    inner.run(coordinate, generation, delivery),
                )
            })
            .is_some()
    }
}

impl Drop for OnlineTileLayer {
    fn drop(&mut self) {
        let cancelled = self.cancel_all();
        if cancelled > 0 {
            debug!("Cancelled {cancelled} tile requests of a dropped layer");
        }
    }
}

impl LayerInner {
    async fn run(
        self: Arc<Self>,
        coordinate: TileCoordinate,
        generation: Generation,
        delivery: Delivery,
    ) {
        let result = match self.options.fetch_timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.load_tile(coordinate))
                .await
                .unwrap_or_else(|_| {
                    warn!("Loading of tile {coordinate} timed out after {timeout:?}");
                    Err(TileError::TimedOut)
                }),
            None => self.load_tile(coordinate).await,
        };

        let LoadedTile { tile, write_back } = match result {
            Ok(loaded) => loaded,
            Err(err) => {
                self.fail(coordinate, generation, err, delivery);
                return;
            }
        };

        if !self.in_flight.lock().is_current(coordinate, generation) {
            debug!("Discarding result of a cancelled request for tile {coordinate}");
            delivery.complete(coordinate, FetchOutcome::Cancelled);
            return;
        }

        delivery.complete(coordinate, FetchOutcome::Loaded(tile));
        if let Some((key, data)) = write_back {
            self.write_to_cache(&key, &data).await;
        }

        // The entry outlives the write, so a repeated request either waits for this one or
        // finds the tile in the cache.
        self.in_flight.lock().finish(coordinate, generation);
    }

    fn fail(
        &self,
        coordinate: TileCoordinate,
        generation: Generation,
        err: TileError,
        delivery: Delivery,
    ) {
        if !self.in_flight.lock().finish(coordinate, generation) {
            debug!("Discarding result of a cancelled request for tile {coordinate}");
            delivery.complete(coordinate, FetchOutcome::Cancelled);
            return;
        }

        match err {
            err if err.is_cancellation() => {
                delivery.complete(coordinate, FetchOutcome::Cancelled);
            }
            TileError::NotFound => {
                debug!("Tile {coordinate} is not in the cache and the layer is offline");
                delivery.complete(coordinate, FetchOutcome::Failed(TileError::NotFound));
            }
            err => {
                error!("Failed to load tile {coordinate}: {err}");
                delivery.complete(coordinate, FetchOutcome::Failed(err));
            }
        }
    }

    async fn load_tile(&self, coordinate: TileCoordinate) -> Result<LoadedTile, TileError> {
        // Resolved once: the same url names the tile in the cache, is requested and is written
        // back.
        let url = (self.url_source)(&coordinate);
        let key = self.options.provider_key.cache_key(coordinate, &url);

        if let Some(cache) = &self.cache {
            if let Some(data) = cache.get(&key).await {
                match self.make_tile(coordinate, &url, &data, TileSource::Cache) {
                    Ok(tile) => {
                        debug!("Tile {coordinate} loaded from cache");
                        return Ok(LoadedTile {
                            tile,
                            write_back: None,
                        })
                    }
                    Err(err) => {
                        warn!("Cached tile {coordinate} cannot be decoded, loading it again: {err}")
                    }
                }
            }
        }

        debug!("Tile {coordinate} is not in the cache");
        if self.options.offline_mode {
            return Err(TileError::NotFound);
        }

        info!("Loading {url}");
        let data = self.fetcher.fetch(&url).await?;
        let tile = self.make_tile(coordinate, &url, &data, TileSource::Network)?;

        Ok(LoadedTile {
            tile,
            write_back: Some((key, data)),
        })
    }

    fn make_tile(
        &self,
        coordinate: TileCoordinate,
        url: &str,
        data: &Bytes,
        source: TileSource,
    ) -> Result<Tile, TileError> {
        let geometry = coordinate
            .to_geo_rect()
            .ok_or_else(|| TileTypesError::OutOfGrid(coordinate.to_string()))?;
        let image = self.decoder.decode(data)?;

        Ok(Tile {
            coordinate,
            geometry,
            image,
            source,
            url: url.to_owned(),
        })
    }

    async fn write_to_cache(&self, key: &CacheKey, data: &Bytes) {
        if let Some(cache) = &self.cache {
            if let Err(error) = cache.insert(key, data).await {
                warn!("Failed to write persistent cache entry: {error}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;
    use tokio::sync::mpsc::UnboundedReceiver;

    use super::*;
    use crate::cache::TileCacheStore;
    use crate::tests::{
        channel_consumer, example_url, next_tile, png_tile, wait_for_entry, wait_until,
        FailingCache, SlowCache, TestFetcher,
    };

    const QUIET_PERIOD: Duration = Duration::from_millis(50);

    struct Fixture {
        layer: OnlineTileLayer,
        tiles: UnboundedReceiver<(TileCoordinate, Tile)>,
        fetcher: Arc<TestFetcher>,
        store: Arc<TileCacheStore>,
    }

    async fn fixture(fetcher: TestFetcher) -> Fixture {
        fixture_with(fetcher, |builder| builder).await
    }

    async fn fixture_with(
        fetcher: TestFetcher,
        configure: impl FnOnce(OnlineTileLayerBuilder) -> OnlineTileLayerBuilder,
    ) -> Fixture {
        let fetcher = Arc::new(fetcher);
        let store = Arc::new(TileCacheStore::initialize_in_memory().await);
        let (consumer, tiles) = channel_consumer();
        let builder = OnlineTileLayerBuilder::new_rest(example_url)
            .with_fetcher(fetcher.clone())
            .with_cache(store.clone())
            .with_consumer(consumer);
        let layer = configure(builder).build().await.unwrap();

        Fixture {
            layer,
            tiles,
            fetcher,
            store,
        }
    }

    async fn assert_no_more_tiles(tiles: &mut UnboundedReceiver<(TileCoordinate, Tile)>) {
        let next = tokio::time::timeout(QUIET_PERIOD, tiles.recv()).await;
        assert!(
            matches!(next, Err(_) | Ok(None)),
            "unexpected tile delivery: {next:?}"
        );
    }

    #[tokio::test]
    async fn cache_hit_does_not_use_network() {
        let mut f = fixture(TestFetcher::ok()).await;
        let coordinate = TileCoordinate::new(3, 1, 2);
        f.store
            .store(&CacheKey::new(coordinate, "tile.example.com"), &png_tile(2, 2))
            .await;

        assert_eq!(f.layer.request(coordinate), RequestStatus::Scheduled);

        let (delivered, tile) = next_tile(&mut f.tiles).await;
        assert_eq!(delivered, coordinate);
        assert_eq!(tile.source(), TileSource::Cache);
        assert_eq!(tile.url(), "http://tile.example.com/3/1/2.png");
        assert_eq!(
            tile.debug_label(),
            "http://tile.example.com/3/1/2.png Cached Tile\ntile(3,1,2)"
        );
        assert_eq!(f.fetcher.request_count(), 0);
        assert_no_more_tiles(&mut f.tiles).await;
    }

    #[tokio::test]
    async fn miss_delivers_once_then_caches() {
        let mut f = fixture(TestFetcher::ok()).await;
        let coordinate = TileCoordinate::new(4, 3, 5);

        f.layer.request(coordinate);

        let (delivered, tile) = next_tile(&mut f.tiles).await;
        assert_eq!(delivered, coordinate);
        assert_eq!(tile.source(), TileSource::Network);
        assert_eq!(tile.geometry(), coordinate.to_geo_rect().unwrap());
        assert_eq!(tile.image().width(), 2);
        assert_eq!(
            f.fetcher.requests(),
            vec!["http://tile.example.com/4/3/5.png"]
        );

        let cached = wait_for_entry(&f.store, &CacheKey::new(coordinate, "tile.example.com")).await;
        assert_eq!(cached, png_tile(2, 2));
        wait_until(|| f.layer.in_flight_count() == 0).await;
        assert_no_more_tiles(&mut f.tiles).await;
    }

    #[tokio::test]
    async fn second_request_uses_cache() {
        let mut f = fixture(TestFetcher::ok()).await;
        let coordinate = TileCoordinate::new(4, 3, 5);

        f.layer.request(coordinate);
        next_tile(&mut f.tiles).await;
        wait_until(|| f.layer.in_flight_count() == 0).await;

        assert_eq!(f.layer.request(coordinate), RequestStatus::Scheduled);
        let (_, tile) = next_tile(&mut f.tiles).await;
        assert_eq!(tile.source(), TileSource::Cache);
        assert_eq!(f.fetcher.request_count(), 1);
    }

    #[tokio::test]
    async fn duplicate_request_is_ignored_while_in_flight() {
        let mut f = fixture(TestFetcher::ok().gated()).await;
        let coordinate = TileCoordinate::new(5, 10, 12);

        assert_eq!(f.layer.request(coordinate), RequestStatus::Scheduled);
        assert_eq!(f.layer.request(coordinate), RequestStatus::AlreadyInFlight);
        assert!(f.layer.is_in_flight(coordinate));
        assert_eq!(f.layer.in_flight(), vec![coordinate]);

        f.fetcher.release(2);

        let (delivered, _) = next_tile(&mut f.tiles).await;
        assert_eq!(delivered, coordinate);
        assert_no_more_tiles(&mut f.tiles).await;
        assert_eq!(f.fetcher.request_count(), 1);
        wait_until(|| !f.layer.is_in_flight(coordinate)).await;
    }

    #[tokio::test]
    async fn cancel_prevents_delivery() {
        let mut f = fixture(TestFetcher::ok().gated()).await;
        let coordinate = TileCoordinate::new(5, 10, 12);

        f.layer.request(coordinate);
        wait_until(|| f.fetcher.request_count() == 1).await;

        assert!(f.layer.cancel(coordinate));
        assert!(!f.layer.is_in_flight(coordinate));
        assert!(!f.layer.cancel(coordinate));

        f.fetcher.release(1);
        assert_no_more_tiles(&mut f.tiles).await;
        assert_eq!(f.store.entry_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn cancel_without_request_is_noop() {
        let f = fixture(TestFetcher::ok()).await;
        assert!(!f.layer.cancel(TileCoordinate::new(1, 0, 0)));
    }

    #[tokio::test]
    async fn request_after_cancel_starts_new_fetch() {
        let mut f = fixture(TestFetcher::ok().gated()).await;
        let coordinate = TileCoordinate::new(5, 10, 12);

        f.layer.request(coordinate);
        wait_until(|| f.fetcher.request_count() == 1).await;
        f.layer.cancel(coordinate);

        assert_eq!(f.layer.request(coordinate), RequestStatus::Scheduled);
        wait_until(|| f.fetcher.request_count() == 2).await;
        f.fetcher.release(2);

        next_tile(&mut f.tiles).await;
        assert_no_more_tiles(&mut f.tiles).await;
    }

    #[tokio::test]
    async fn network_error_does_not_affect_other_tiles() {
        let failing = TileCoordinate::new(1, 0, 0);
        let working = TileCoordinate::new(1, 1, 0);
        let fetcher = TestFetcher::with_response(|url| {
            if url.ends_with("/1/0/0.png") {
                Err(TileError::HttpStatus(404))
            } else {
                Ok(png_tile(2, 2))
            }
        });
        let mut f = fixture(fetcher).await;

        assert_eq!(f.layer.request_many([failing, working]), 2);

        let (delivered, _) = next_tile(&mut f.tiles).await;
        assert_eq!(delivered, working);
        assert_no_more_tiles(&mut f.tiles).await;
        wait_until(|| f.layer.in_flight_count() == 0).await;

        // A failed tile can be requested again.
        assert_eq!(f.layer.request(failing), RequestStatus::Scheduled);
        wait_until(|| f.fetcher.request_count() == 3).await;
        wait_for_entry(&f.store, &CacheKey::new(working, "tile.example.com")).await;
        assert_eq!(f.store.entry_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn undecodable_response_is_not_delivered_or_cached() {
        let fetcher = TestFetcher::with_response(|_| Ok(Bytes::from_static(b"<html>")));
        let mut f = fixture(fetcher).await;

        f.layer.request(TileCoordinate::new(2, 1, 1));

        assert_no_more_tiles(&mut f.tiles).await;
        wait_until(|| f.layer.in_flight_count() == 0).await;
        assert_eq!(f.store.entry_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn corrupt_cache_entry_is_replaced() {
        let mut f = fixture(TestFetcher::ok()).await;
        let coordinate = TileCoordinate::new(2, 1, 1);
        let key = CacheKey::new(coordinate, "tile.example.com");
        f.store.store(&key, &Bytes::from_static(b"garbage")).await;

        f.layer.request(coordinate);

        let (_, tile) = next_tile(&mut f.tiles).await;
        assert_eq!(tile.source(), TileSource::Network);
        wait_until(|| f.layer.in_flight_count() == 0).await;
        for _ in 0..100 {
            if f.store.lookup(&key).await == Some(png_tile(2, 2)) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        panic!("corrupt cache entry was not replaced");
    }

    #[tokio::test]
    async fn offline_mode_only_uses_cache() {
        let mut f = fixture_with(TestFetcher::ok(), |builder| builder.with_offline_mode()).await;
        let cached = TileCoordinate::new(3, 1, 2);
        f.store
            .store(&CacheKey::new(cached, "tile.example.com"), &png_tile(2, 2))
            .await;

        assert_matches!(
            f.layer.load(TileCoordinate::new(3, 2, 2)).await,
            FetchOutcome::Failed(TileError::NotFound)
        );

        f.layer.request(cached);
        let (delivered, _) = next_tile(&mut f.tiles).await;
        assert_eq!(delivered, cached);
        assert_eq!(f.fetcher.request_count(), 0);
    }

    #[tokio::test]
    async fn timeout_cancels_request() {
        let mut f = fixture_with(TestFetcher::ok().gated(), |builder| {
            builder.with_fetch_timeout(Some(Duration::from_millis(20)))
        })
        .await;
        let coordinate = TileCoordinate::new(5, 10, 12);

        f.layer.request(coordinate);
        wait_until(|| f.layer.in_flight_count() == 0).await;

        f.fetcher.release(1);
        assert_no_more_tiles(&mut f.tiles).await;
        assert_eq!(f.store.entry_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn load_returns_tile_without_consumer_call() {
        let mut f = fixture(TestFetcher::ok()).await;
        let coordinate = TileCoordinate::new(6, 20, 30);

        let tile = assert_matches!(f.layer.load(coordinate).await, FetchOutcome::Loaded(tile) => tile);
        assert_eq!(tile.coordinate(), coordinate);
        assert_eq!(tile.geometry(), coordinate.to_geo_rect().unwrap());
        assert_no_more_tiles(&mut f.tiles).await;
    }

    #[tokio::test]
    async fn load_reports_failure() {
        let fetcher = TestFetcher::with_response(|_| Err(TileError::HttpStatus(500)));
        let f = fixture(fetcher).await;

        assert_matches!(
            f.layer.load(TileCoordinate::new(1, 1, 1)).await,
            FetchOutcome::Failed(TileError::HttpStatus(500))
        );
    }

    #[tokio::test]
    async fn load_of_tile_in_flight_fails() {
        let f = fixture(TestFetcher::ok().gated()).await;
        let coordinate = TileCoordinate::new(5, 10, 12);

        f.layer.request(coordinate);
        assert_matches!(
            f.layer.load(coordinate).await,
            FetchOutcome::Failed(TileError::AlreadyInFlight)
        );
    }

    #[tokio::test]
    async fn cancelled_load_reports_cancellation() {
        let f = fixture(TestFetcher::ok().gated()).await;
        let coordinate = TileCoordinate::new(5, 10, 12);

        let (outcome, _) = tokio::join!(f.layer.load(coordinate), async {
            wait_until(|| f.fetcher.request_count() == 1).await;
            f.layer.cancel(coordinate);
        });

        assert_matches!(outcome, FetchOutcome::Cancelled);
    }

    #[tokio::test]
    async fn invalid_coordinate_is_rejected() {
        let f = fixture(TestFetcher::ok()).await;

        assert_eq!(
            f.layer.request(TileCoordinate::new(2, 4, 0)),
            RequestStatus::InvalidCoordinate
        );
        assert_matches!(
            f.layer.load(TileCoordinate::new(2, 0, -1)).await,
            FetchOutcome::Failed(TileError::InvalidCoordinate(_))
        );
        assert_eq!(f.layer.in_flight_count(), 0);
        assert_eq!(f.fetcher.request_count(), 0);
    }

    #[tokio::test]
    async fn dropping_layer_cancels_requests() {
        let Fixture {
            layer,
            mut tiles,
            fetcher,
            store,
        } = fixture(TestFetcher::ok().gated()).await;

        layer.request_many([TileCoordinate::new(1, 0, 0), TileCoordinate::new(1, 1, 0)]);
        wait_until(|| fetcher.request_count() == 2).await;
        drop(layer);

        fetcher.release(2);
        assert_no_more_tiles(&mut tiles).await;
        assert_eq!(store.entry_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn explicit_provider_names_cache_entries() {
        let mut f = fixture_with(TestFetcher::ok(), |builder| {
            builder.with_provider_key(crate::cache::ProviderKey::Explicit("example".into()))
        })
        .await;
        let coordinate = TileCoordinate::new(3, 1, 2);

        f.layer.request(coordinate);
        next_tile(&mut f.tiles).await;

        wait_for_entry(&f.store, &CacheKey::new(coordinate, "example")).await;
        assert_eq!(
            f.store
                .lookup(&CacheKey::new(coordinate, "tile.example.com"))
                .await,
            None
        );
    }

    #[tokio::test]
    async fn layer_without_consumer_preloads_cache() {
        let fetcher = Arc::new(TestFetcher::ok());
        let store = Arc::new(TileCacheStore::initialize_in_memory().await);
        let layer = OnlineTileLayerBuilder::new_rest(example_url)
            .with_fetcher(fetcher.clone())
            .with_cache(store.clone())
            .build()
            .await
            .unwrap();
        let coordinate = TileCoordinate::new(2, 2, 2);

        layer.request(coordinate);

        wait_for_entry(&store, &CacheKey::new(coordinate, "tile.example.com")).await;
        assert_eq!(fetcher.request_count(), 1);
    }

    async fn layer_with_cache(
        fetcher: Arc<TestFetcher>,
        configure: impl FnOnce(OnlineTileLayerBuilder) -> OnlineTileLayerBuilder,
    ) -> (OnlineTileLayer, UnboundedReceiver<(TileCoordinate, Tile)>) {
        let (consumer, tiles) = channel_consumer();
        let builder = OnlineTileLayerBuilder::new_rest(example_url)
            .with_fetcher(fetcher)
            .with_consumer(consumer);
        let layer = configure(builder).build().await.unwrap();

        (layer, tiles)
    }

    #[tokio::test]
    async fn tile_stays_in_flight_until_cached() {
        let fetcher = Arc::new(TestFetcher::ok());
        let store = Arc::new(TileCacheStore::initialize_in_memory().await);
        let cache = Arc::new(SlowCache::new(store.clone(), Duration::from_millis(200)));
        let (layer, mut tiles) =
            layer_with_cache(fetcher.clone(), |builder| builder.with_cache(cache)).await;
        let coordinate = TileCoordinate::new(3, 1, 2);

        layer.request(coordinate);
        let (_, tile) = next_tile(&mut tiles).await;
        assert_eq!(tile.source(), TileSource::Network);

        assert!(layer.is_in_flight(coordinate));
        assert_eq!(layer.request(coordinate), RequestStatus::AlreadyInFlight);

        wait_until(|| layer.in_flight_count() == 0).await;
        assert_eq!(layer.request(coordinate), RequestStatus::Scheduled);
        let (_, tile) = next_tile(&mut tiles).await;
        assert_eq!(tile.source(), TileSource::Cache);
        assert_eq!(fetcher.request_count(), 1);
        assert_eq!(store.entry_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn cancel_during_cache_write() {
        let fetcher = Arc::new(TestFetcher::ok());
        let store = Arc::new(TileCacheStore::initialize_in_memory().await);
        let cache = Arc::new(SlowCache::new(store.clone(), Duration::from_millis(200)));
        let (layer, mut tiles) =
            layer_with_cache(fetcher.clone(), |builder| builder.with_cache(cache)).await;
        let coordinate = TileCoordinate::new(3, 1, 2);

        layer.request(coordinate);
        next_tile(&mut tiles).await;

        assert!(layer.cancel(coordinate));
        assert_eq!(layer.in_flight_count(), 0);
        assert_eq!(layer.request(coordinate), RequestStatus::Scheduled);
        next_tile(&mut tiles).await;
        assert_eq!(fetcher.request_count(), 2);

        assert_eq!(layer.cancel_all(), 1);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(store.entry_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn cache_write_failure_does_not_affect_delivery() {
        let fetcher = Arc::new(TestFetcher::ok());
        let cache = Arc::new(FailingCache);
        let (layer, mut tiles) =
            layer_with_cache(fetcher.clone(), |builder| builder.with_cache(cache)).await;
        let coordinate = TileCoordinate::new(4, 3, 5);

        assert_eq!(layer.request(coordinate), RequestStatus::Scheduled);

        let (delivered, tile) = next_tile(&mut tiles).await;
        assert_eq!(delivered, coordinate);
        assert_eq!(tile.source(), TileSource::Network);
        wait_until(|| layer.in_flight_count() == 0).await;
        assert_no_more_tiles(&mut tiles).await;
    }

    #[tokio::test]
    async fn unavailable_cache_db_loads_from_network() {
        let fetcher = Arc::new(TestFetcher::ok());
        let (layer, mut tiles) = layer_with_cache(fetcher.clone(), |builder| {
            builder.with_cache_db("Cargo.toml/tiles_cache.db")
        })
        .await;
        let coordinate = TileCoordinate::new(4, 3, 5);

        for attempt in 1..=2 {
            assert_eq!(layer.request(coordinate), RequestStatus::Scheduled);
            let (_, tile) = next_tile(&mut tiles).await;
            assert_eq!(tile.source(), TileSource::Network);
            wait_until(|| layer.in_flight_count() == 0).await;
            assert_eq!(fetcher.request_count(), attempt);
        }
    }
}
