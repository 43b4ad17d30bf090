use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use meridian_types::TileCoordinate;
use tokio::runtime::Handle;

use super::{FetchOptions, OnlineTileLayer, TileConsumer};
use crate::cache::{PersistentTileCache, ProviderKey, TileCacheStore, DEFAULT_CACHE_FILE};
use crate::decoded_image::{ImageDecoder, TileDecoder};
use crate::error::TileError;
use crate::layer::{UrlSource, UrlTemplate};
use crate::platform::{HttpTileFetcher, TileFetcher};

/// Constructor for an [`OnlineTileLayer`].
///
/// ```
/// use meridian::layer::OnlineTileLayerBuilder;
///
/// # tokio_test::block_on(async {
/// let layer = OnlineTileLayerBuilder::new_rest(
///     |index: &meridian_types::TileCoordinate| {
///         format!(
///             "https://tile.openstreetmap.org/{}/{}/{}.png",
///             index.zoom, index.x, index.y
///         )
///     })
///     .with_in_memory_cache()
///     .build()
///     .await?;
/// # Ok::<(), meridian::error::TileError>(())
/// # });
/// ```
pub struct OnlineTileLayerBuilder {
    url_source: Box<dyn UrlSource<TileCoordinate>>,
    cache: CacheType,
    fetcher: Option<Arc<dyn TileFetcher>>,
    decoder: Arc<dyn TileDecoder>,
    consumer: Option<Arc<dyn TileConsumer>>,
    options: FetchOptions,
}

enum CacheType {
    None,
    Database(PathBuf),
    InMemory,
    Custom(Arc<dyn PersistentTileCache>),
}

impl OnlineTileLayerBuilder {
    /// Initializes a builder for a layer that requests tiles from the given url source.
    pub fn new_rest(url_source: impl UrlSource<TileCoordinate> + 'static) -> Self {
        Self {
            url_source: Box::new(url_source),
            cache: CacheType::None,
            fetcher: None,
            decoder: Arc::new(ImageDecoder),
            consumer: None,
            options: FetchOptions::default(),
        }
    }

    /// Initializes a builder for a layer that requests tiles by the url template.
    pub fn new_template(template: UrlTemplate) -> Self {
        Self::new_rest(template.into_url_source())
    }

    #[allow(rustdoc::bare_urls)]
    /// Initializes a builder for a layer with the Open Street Map source.
    ///
    /// It uses the standard "https://tile.openstreetmap.org/z/x/y.png" URL pattern to retrieve the
    /// tiles. Make sure to follow the tile usage policy of the server.
    pub fn new_osm() -> Self {
        Self::new_template(UrlTemplate::osm())
    }

    /// Stores tiles in the SQLite database at `path`. The database and its table are created if
    /// they don't exist.
    ///
    /// If the database cannot be opened, the layer is still built and works without the cache.
    pub fn with_cache_db(mut self, path: impl AsRef<Path>) -> Self {
        self.cache = CacheType::Database(path.as_ref().into());
        self
    }

    /// Stores tiles in the [`DEFAULT_CACHE_FILE`] database in the working directory.
    pub fn with_default_cache_db(self) -> Self {
        self.with_cache_db(DEFAULT_CACHE_FILE)
    }

    /// Keeps tiles in an in-memory SQLite database that lives as long as the layer.
    pub fn with_in_memory_cache(mut self) -> Self {
        self.cache = CacheType::InMemory;
        self
    }

    /// Uses the given cache instead of a database opened by the layer.
    pub fn with_cache(mut self, cache: Arc<dyn PersistentTileCache>) -> Self {
        self.cache = CacheType::Custom(cache);
        self
    }

    /// Sets the fetcher that requests tiles from the tile server.
    ///
    /// A custom fetcher is responsible for its own HTTP settings, so it cannot be combined with
    /// [`with_user_agent`](Self::with_user_agent) or
    /// [`with_tls_verification`](Self::with_tls_verification).
    pub fn with_fetcher(mut self, fetcher: Arc<dyn TileFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Sets the decoder of tile images. Defaults to [`ImageDecoder`].
    pub fn with_decoder(mut self, decoder: impl TileDecoder + 'static) -> Self {
        self.decoder = Arc::new(decoder);
        self
    }

    /// Sets the consumer that receives loaded tiles.
    ///
    /// Without a consumer the layer only fills the cache.
    pub fn with_consumer(mut self, consumer: impl TileConsumer + 'static) -> Self {
        self.consumer = Some(Arc::new(consumer));
        self
    }

    /// Replaces all the settings of the layer.
    pub fn with_options(mut self, options: FetchOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets how tiles are named in the cache.
    pub fn with_provider_key(mut self, provider_key: ProviderKey) -> Self {
        self.options.provider_key = provider_key;
        self
    }

    /// Sets the `User-Agent` header of tile requests.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.options.user_agent = user_agent.into();
        self
    }

    /// Enables or disables checking of the tile server certificate. Enabled by default.
    pub fn with_tls_verification(mut self, verify: bool) -> Self {
        self.options.verify_tls = verify;
        self
    }

    /// Sets the time after which a request is cancelled. `None` disables the timeout.
    pub fn with_fetch_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.options.fetch_timeout = timeout;
        self
    }

    /// Sets the layer to only use cached tiles without requesting them from the tile server.
    ///
    /// The url source is still used to name the tiles in the cache. If no cache is configured,
    /// building the layer will return a configuration error.
    pub fn with_offline_mode(mut self) -> Self {
        self.options.offline_mode = true;
        self
    }

    /// Consumes the builder and constructs the layer.
    ///
    /// Must be awaited inside a tokio runtime: the layer loads tiles on that runtime. Returns
    /// an error if the layer is configured incorrectly or the HTTP client cannot be created.
    pub async fn build(self) -> Result<OnlineTileLayer, TileError> {
        let Self {
            url_source,
            cache,
            fetcher,
            decoder,
            consumer,
            options,
        } = self;

        let runtime = Handle::try_current().map_err(|_| {
            TileError::Configuration("tile layer must be built inside a tokio runtime".into())
        })?;

        let cache: Option<Arc<dyn PersistentTileCache>> = match cache {
            CacheType::None => None,
            CacheType::Database(path) => Some(Arc::new(TileCacheStore::initialize(&path).await)),
            CacheType::InMemory => Some(Arc::new(TileCacheStore::initialize_in_memory().await)),
            CacheType::Custom(cache) => Some(cache),
        };

        if cache.is_none() && options.offline_mode {
            return Err(TileError::Configuration(
                "offline mode cannot be used without cache".into(),
            ));
        }

        let fetcher = match fetcher {
            Some(fetcher) => {
                if !options.has_default_http_settings() {
                    return Err(TileError::Configuration(
                        "custom tile fetcher cannot be used together with http settings".into(),
                    ));
                }

                fetcher
            }
            None => Arc::new(HttpTileFetcher::new(&options)?),
        };

        Ok(OnlineTileLayer::new(
            url_source, cache, fetcher, decoder, consumer, options, runtime,
        ))
    }
}
