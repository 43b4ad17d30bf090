use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, error, warn};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use super::{CacheKey, PersistentTileCache};
use crate::error::TileError;

/// File name of the tile cache database used when no other path is given.
pub const DEFAULT_CACHE_FILE: &str = "tiles_cache.db";

const MAX_CONNECTIONS: u32 = 4;
const BUSY_TIMEOUT: Duration = Duration::from_millis(1500);

// Table layout is shared with existing cache files, do not change.
const CREATE_SCHEMA: &str = "CREATE TABLE IF NOT EXISTS Tiles (\
    id INTEGER PRIMARY KEY AUTOINCREMENT, \
    zoom_level INTEGER NOT NULL, \
    tile_x INTEGER NOT NULL, \
    tile_y INTEGER NOT NULL, \
    tile_provider TEXT(0) NOT NULL, \
    tile_data BLOB NOT NULL, \
    UNIQUE(zoom_level, tile_x, tile_y, tile_provider));";

const SELECT_TILE: &str = "SELECT tile_data FROM Tiles WHERE \
    zoom_level = ? AND tile_x = ? AND tile_y = ? AND tile_provider = ?;";

const UPSERT_TILE: &str = "INSERT OR REPLACE INTO Tiles \
    (zoom_level, tile_x, tile_y, tile_provider, tile_data) \
    VALUES (?, ?, ?, ?, ?);";

/// Lifecycle state of a [`TileCacheStore`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StoreState {
    /// The database is open and the schema exists.
    Ready,
    /// The database could not be opened. Every lookup misses and every write is dropped.
    Degraded,
}

/// Tile cache stored in a SQLite database.
///
/// Opening the store never fails: if the database cannot be opened or the schema cannot be
/// created, the error is logged and the store works in [`StoreState::Degraded`] state, so the
/// layer keeps loading tiles from the network without caching them.
///
/// ```no_run
/// use meridian::cache::{CacheKey, TileCacheStore};
/// use meridian_types::TileCoordinate;
///
/// # tokio_test::block_on(async {
/// let store = TileCacheStore::initialize("tiles_cache.db").await;
/// let key = CacheKey::new(TileCoordinate::new(3, 1, 2), "tile.openstreetmap.org");
/// let data = store.lookup(&key).await;
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct TileCacheStore {
    pool: Option<SqlitePool>,
    location: String,
}

impl TileCacheStore {
    /// Opens or creates the cache database at the given path.
    pub async fn initialize(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .busy_timeout(BUSY_TIMEOUT);

        Self::open(options, MAX_CONNECTIONS, path.display().to_string()).await
    }

    /// Creates a store backed by an in-memory database. The data is lost when the store is
    /// dropped.
    pub async fn initialize_in_memory() -> Self {
        let options = SqliteConnectOptions::new().filename(":memory:");
        // Every connection to `:memory:` is a separate database, so the pool must keep exactly
        // one connection alive for the lifetime of the store.
        Self::open(options, 1, ":memory:".to_owned()).await
    }

    async fn open(options: SqliteConnectOptions, max_connections: u32, location: String) -> Self {
        match Self::connect(options, max_connections).await {
            Ok(pool) => {
                debug!("Tile cache {location} is ready");
                Self {
                    pool: Some(pool),
                    location,
                }
            }
            Err(err) => {
                error!("Failed to open tile cache {location}, caching is disabled: {err}");
                Self {
                    pool: None,
                    location,
                }
            }
        }
    }

    async fn connect(
        options: SqliteConnectOptions,
        max_connections: u32,
    ) -> Result<SqlitePool, TileError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        sqlx::query(CREATE_SCHEMA).execute(&pool).await?;
        Ok(pool)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> StoreState {
        if self.pool.is_some() {
            StoreState::Ready
        } else {
            StoreState::Degraded
        }
    }

    /// Returns true if the store is in [`StoreState::Ready`] state.
    pub fn is_ready(&self) -> bool {
        self.state() == StoreState::Ready
    }

    /// Path of the database file, or `:memory:`.
    pub fn location(&self) -> &str {
        &self.location
    }

    fn pool(&self) -> Result<&SqlitePool, TileError> {
        self.pool
            .as_ref()
            .ok_or_else(|| TileError::StoreUnavailable(self.location.clone()))
    }

    /// Returns the data stored for the key.
    ///
    /// Query errors are logged and reported as a miss.
    pub async fn lookup(&self, key: &CacheKey) -> Option<Bytes> {
        let pool = self.pool.as_ref()?;
        let result = sqlx::query_scalar::<_, Vec<u8>>(SELECT_TILE)
            .bind(i64::from(key.coordinate.zoom))
            .bind(key.coordinate.x)
            .bind(key.coordinate.y)
            .bind(key.provider.as_str())
            .fetch_optional(pool)
            .await;

        match result {
            Ok(Some(data)) => {
                debug!("Tile {} of {} found in cache", key.coordinate, key.provider);
                Some(data.into())
            }
            Ok(None) => None,
            Err(err) => {
                error!("Failed to read tile {} from cache: {err}", key.coordinate);
                None
            }
        }
    }

    /// Inserts or replaces the entry for the key.
    ///
    /// Errors are logged and otherwise ignored. Does nothing if the store is degraded.
    pub async fn store(&self, key: &CacheKey, data: &Bytes) {
        if !self.is_ready() {
            return;
        }

        if let Err(err) = self.try_store(key, data).await {
            warn!("{err}");
        }
    }

    /// Inserts or replaces the entry for the key, returning the error if the write fails.
    pub async fn try_store(&self, key: &CacheKey, data: &Bytes) -> Result<(), TileError> {
        let pool = self.pool()?;
        sqlx::query(UPSERT_TILE)
            .bind(i64::from(key.coordinate.zoom))
            .bind(key.coordinate.x)
            .bind(key.coordinate.y)
            .bind(key.provider.as_str())
            .bind(data.as_ref())
            .execute(pool)
            .await
            .map_err(|err| {
                TileError::StoreWrite(format!(
                    "tile {} of {}: {err}",
                    key.coordinate, key.provider
                ))
            })?;

        debug!("Tile {} of {} saved to cache", key.coordinate, key.provider);
        Ok(())
    }

    /// Number of entries in the cache.
    pub async fn entry_count(&self) -> Result<u64, TileError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM Tiles;")
            .fetch_one(self.pool()?)
            .await?;
        Ok(count.max(0) as u64)
    }

    /// Removes all entries from the cache.
    pub async fn clear(&self) -> Result<(), TileError> {
        sqlx::query("DELETE FROM Tiles;")
            .execute(self.pool()?)
            .await?;
        Ok(())
    }

    /// Closes the database connections. Lookups after this call miss and writes fail.
    pub async fn close(&self) {
        if let Some(pool) = &self.pool {
            pool.close().await;
        }
    }
}

#[async_trait]
impl PersistentTileCache for TileCacheStore {
    async fn get(&self, key: &CacheKey) -> Option<Bytes> {
        self.lookup(key).await
    }

    async fn insert(&self, key: &CacheKey, data: &Bytes) -> Result<(), TileError> {
        if !self.is_ready() {
            return Ok(());
        }

        self.try_store(key, data).await
    }
}
