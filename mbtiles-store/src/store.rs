use std::path::Path;
use std::sync::Arc;

use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use tile_utils::{Format, Scheme, TileCoord};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::Mbtiles;
use crate::config::StoreConfig;
use crate::errors::{MbtError, MbtResult};
use crate::tile_info::TileInfo;
use crate::tiles::ContentStats;
use crate::validation::IntegrityCheckType;

/// Writable, deduplicating tile store backed by an `MBTiles` file.
///
/// `TileStore` wraps an [`Mbtiles`] with a `SQLite` connection pool and a cached copy of the
/// tile set description. Every operation acquires its own connection from the pool,
/// so a store can be cloned and used from many tasks at once.
/// Clones share the pool and the cached [`TileInfo`].
///
/// Coordinates are in the TMS convention: row 0 is the southern edge of the grid.
///
/// ```no_run
/// use mbtiles_store::{Format, TileInfo, TileStore};
/// use tilejson::Bounds;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = TileStore::open("world.mbtiles").await?;
/// store
///     .set_tile_info(&TileInfo::new(Format::Png, Bounds::MAX_TILED))
///     .await?;
/// store.put_tile(0, 0, 0, b"...").await?;
/// assert!(store.get_tile(0, 0, 0).await?.is_some());
/// store.close().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct TileStore {
    mbtiles: Mbtiles,
    pool: SqlitePool,
    info: Arc<RwLock<TileInfo>>,
}

impl TileStore {
    /// Open a store with the default [`StoreConfig`], creating the file if it does not exist
    pub async fn open<P: AsRef<Path>>(filepath: P) -> MbtResult<Self> {
        Self::open_with(filepath, &StoreConfig::default()).await
    }

    /// Open a store, making sure its schema exists and loading the tile set description.
    ///
    /// Fails if the file keeps its tiles in a flat table, if its metadata holds a value that
    /// cannot be parsed, or if its scheme is anything but `tms`.
    pub async fn open_with<P: AsRef<Path>>(filepath: P, config: &StoreConfig) -> MbtResult<Self> {
        let mbtiles = Mbtiles::new(filepath)?;
        debug!("Opening tile store {mbtiles} with {config:?}");
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .connect_with(config.connect_options(mbtiles.filepath()))
            .await?;

        let info = match Self::bootstrap(&mbtiles, &pool).await {
            Ok(info) => info,
            Err(err) => {
                pool.close().await;
                debug!("Closed {mbtiles} after a failed open: {err}");
                return Err(err);
            }
        };

        info!(
            "Opened tile store {mbtiles} ({}, zoom {}..={})",
            info.format.map_or_else(|| "no format".to_string(), |f| f.to_string()),
            info.min_zoom,
            info.max_zoom,
        );
        Ok(Self {
            mbtiles,
            pool,
            info: Arc::new(RwLock::new(info)),
        })
    }

    /// Create the schema if needed and load a TMS tile set description
    async fn bootstrap(mbtiles: &Mbtiles, pool: &SqlitePool) -> MbtResult<TileInfo> {
        let mut conn = pool.acquire().await?;
        mbtiles.init_schema(&mut conn).await?;
        let info = mbtiles.load_tile_info(&mut *conn).await?;
        if info.scheme != Scheme::Tms {
            return Err(MbtError::UnsupportedScheme(info.scheme));
        }
        Ok(info)
    }

    /// Close all connections. Clones of this store fail on any further storage access.
    pub async fn close(self) {
        self.pool.close().await;
        debug!("Closed tile store {}", self.mbtiles);
    }

    #[must_use]
    pub fn mbtiles(&self) -> &Mbtiles {
        &self.mbtiles
    }

    /// Get an independent copy of the tile set description
    pub async fn get_tile_info(&self) -> TileInfo {
        self.info.read().await.clone()
    }

    /// Replace the tile set description, both on disk and in the cache.
    ///
    /// The description must be valid and use the `tms` scheme.
    /// On any failure the cached description stays as it was.
    pub async fn set_tile_info(&self, info: &TileInfo) -> MbtResult<()> {
        // held across the write so the cache always matches the last commit
        let mut cached = self.info.write().await;
        let mut conn = self.pool.acquire().await?;
        self.mbtiles.save_tile_info(&mut conn, info).await?;
        *cached = info.clone();
        Ok(())
    }

    /// Get the tile payload at a TMS coordinate.
    ///
    /// Returns `None` if no tile was recorded there. An empty payload is returned as `Some`.
    pub async fn get_tile(&self, z: u8, x: u32, y: u32) -> MbtResult<Option<Vec<u8>>> {
        let mut conn = self.pool.acquire().await?;
        self.mbtiles
            .get_tile(&mut *conn, TileCoord::new(z, x, y))
            .await
    }

    /// Store a tile payload at a TMS coordinate, returning its content id
    pub async fn put_tile(&self, z: u8, x: u32, y: u32, data: &[u8]) -> MbtResult<String> {
        let coord = TileCoord::new(z, x, y);
        let expected = self.info.read().await.format;
        if let Some(expected) = expected
            && let Some(detected) = Format::detect(data)
            && detected != expected
        {
            warn!(
                "Tile {coord:#} looks like {detected} but {} holds {expected} tiles, storing as is",
                self.mbtiles
            );
        }
        let mut conn = self.pool.acquire().await?;
        self.mbtiles.put_tile(&mut conn, coord, data).await
    }

    /// Get the interaction (`UTFGrid`) payload at a TMS coordinate
    pub async fn get_grid(&self, z: u8, x: u32, y: u32) -> MbtResult<Option<Vec<u8>>> {
        let mut conn = self.pool.acquire().await?;
        self.mbtiles
            .get_grid(&mut *conn, TileCoord::new(z, x, y))
            .await
    }

    /// Store an interaction payload at a TMS coordinate without touching its tile
    pub async fn put_grid(&self, z: u8, x: u32, y: u32, data: &[u8]) -> MbtResult<String> {
        let mut conn = self.pool.acquire().await?;
        self.mbtiles
            .put_grid(&mut conn, TileCoord::new(z, x, y), data)
            .await
    }

    /// Check if a tile exists, without reading its payload
    pub async fn contains(&self, z: u8, x: u32, y: u32) -> MbtResult<bool> {
        let mut conn = self.pool.acquire().await?;
        self.mbtiles
            .contains(&mut *conn, TileCoord::new(z, x, y))
            .await
    }

    pub async fn stats(&self) -> MbtResult<ContentStats> {
        let mut conn = self.pool.acquire().await?;
        self.mbtiles.content_stats(&mut *conn).await
    }

    /// Run the `SQLite` integrity check, then verify every content hash and binding
    pub async fn validate(&self, check_type: IntegrityCheckType) -> MbtResult<()> {
        let mut conn = self.pool.acquire().await?;
        self.mbtiles.validate(&mut *conn, check_type).await
    }
}
