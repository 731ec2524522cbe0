use std::fmt::{Display, Formatter};

use serde::Serialize;
use size_format::SizeFormatterBinary;
use sqlx::{Connection as _, Row as _, SqliteConnection, SqliteExecutor, query, query_scalar};
use tile_utils::TileCoord;
use tracing::debug;

use crate::Mbtiles;
use crate::errors::{MbtError, MbtResult};

/// Content id of a payload: lower-case hex MD5 digest
#[must_use]
pub fn content_id(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

/// Id under which `data` is already stored, falling back to its [`content_id`].
///
/// Other tools key normalized files by upper-case digests, such rows are reused.
async fn resolve_content_id<T>(conn: &mut T, lookup: &str, data: &[u8]) -> MbtResult<String>
where
    for<'e> &'e mut T: SqliteExecutor<'e>,
{
    let id = content_id(data);
    let stored: Option<String> = query_scalar(lookup)
        .bind(&id)
        .bind(id.to_uppercase())
        .fetch_optional(&mut *conn)
        .await?;
    Ok(stored.unwrap_or(id))
}

/// Row counts of the binding and content tables
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ContentStats {
    /// Rows in `map`
    pub bindings: u64,
    /// Bindings that point at tile content
    pub tiles: u64,
    /// Unique tile payloads in `images`
    pub contents: u64,
    /// Total size of all unique tile payloads, in bytes
    pub content_size: u64,
    /// Unique interaction payloads in `grid_utfgrid`
    pub grids: u64,
}

impl ContentStats {
    /// Number of tile bindings that reuse an already stored payload
    #[must_use]
    pub fn deduplicated(&self) -> u64 {
        self.tiles.saturating_sub(self.contents)
    }
}

impl Display for ContentStats {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let size = SizeFormatterBinary::new(self.content_size);
        writeln!(f, "Tiles: {}", self.tiles)?;
        writeln!(f, "Unique payloads: {} ({size:.2}B)", self.contents)?;
        writeln!(f, "Deduplicated tiles: {}", self.deduplicated())?;
        writeln!(f, "Grids: {}", self.grids)
    }
}

fn check_coord(coord: TileCoord) -> MbtResult<()> {
    if coord.is_valid() {
        Ok(())
    } else {
        Err(MbtError::InvalidCoordinate(coord))
    }
}

fn to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or_default()
}

impl Mbtiles {
    /// Get the tile payload bound to a coordinate.
    ///
    /// Returns `None` if nothing is bound there, or if the bound content is NULL.
    /// An empty payload is returned as `Some` empty vector.
    pub async fn get_tile<T>(&self, conn: &mut T, coord: TileCoord) -> MbtResult<Option<Vec<u8>>>
    where
        for<'e> &'e mut T: SqliteExecutor<'e>,
    {
        check_coord(coord)?;
        let row = query(
            "SELECT images.tile_data
             FROM map
             JOIN images ON images.tile_id = map.tile_id
             WHERE map.zoom_level = ? AND map.tile_column = ? AND map.tile_row = ?",
        )
        .bind(coord.z)
        .bind(coord.x)
        .bind(coord.y)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(match row {
            Some(row) => row.try_get::<Option<Vec<u8>>, _>(0)?,
            None => None,
        })
    }

    /// Store a tile payload and bind it to a coordinate, returning its content id.
    ///
    /// The payload is stored once per content id. The binding keeps the coordinate's grid id.
    /// Both writes are committed together.
    pub async fn put_tile(
        &self,
        conn: &mut SqliteConnection,
        coord: TileCoord,
        data: &[u8],
    ) -> MbtResult<String> {
        check_coord(coord)?;
        let id = resolve_content_id(
            &mut *conn,
            "SELECT tile_id FROM images WHERE tile_id IN (?, ?) LIMIT 1",
            data,
        )
        .await?;

        let mut tx = conn.begin().await?;
        let inserted = query("INSERT OR IGNORE INTO images (tile_id, tile_data) VALUES (?, ?)")
            .bind(&id)
            .bind(data)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        query(
            "INSERT INTO map (zoom_level, tile_column, tile_row, tile_id)
             VALUES (?, ?, ?, ?)
             ON CONFLICT (zoom_level, tile_column, tile_row)
             DO UPDATE SET tile_id = excluded.tile_id",
        )
        .bind(coord.z)
        .bind(coord.x)
        .bind(coord.y)
        .bind(&id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        if inserted == 0 {
            debug!("Tile {coord:#} reuses stored content {id} in {self}");
        } else {
            debug!("Tile {coord:#} stored as new content {id} ({} bytes) in {self}", data.len());
        }
        Ok(id)
    }

    /// Get the interaction (`UTFGrid`) payload bound to a coordinate
    pub async fn get_grid<T>(&self, conn: &mut T, coord: TileCoord) -> MbtResult<Option<Vec<u8>>>
    where
        for<'e> &'e mut T: SqliteExecutor<'e>,
    {
        check_coord(coord)?;
        let row = query(
            "SELECT grid_utfgrid.grid_utfgrid
             FROM map
             JOIN grid_utfgrid ON grid_utfgrid.grid_id = map.grid_id
             WHERE map.zoom_level = ? AND map.tile_column = ? AND map.tile_row = ?",
        )
        .bind(coord.z)
        .bind(coord.x)
        .bind(coord.y)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(match row {
            Some(row) => row.try_get::<Option<Vec<u8>>, _>(0)?,
            None => None,
        })
    }

    /// Store an interaction payload and bind it to a coordinate, keeping the coordinate's tile id.
    ///
    /// A coordinate without a tile gets a binding with no tile content.
    pub async fn put_grid(
        &self,
        conn: &mut SqliteConnection,
        coord: TileCoord,
        data: &[u8],
    ) -> MbtResult<String> {
        check_coord(coord)?;
        let id = resolve_content_id(
            &mut *conn,
            "SELECT grid_id FROM grid_utfgrid WHERE grid_id IN (?, ?) LIMIT 1",
            data,
        )
        .await?;

        let mut tx = conn.begin().await?;
        query("INSERT OR IGNORE INTO grid_utfgrid (grid_id, grid_utfgrid) VALUES (?, ?)")
            .bind(&id)
            .bind(data)
            .execute(&mut *tx)
            .await?;
        query(
            "INSERT INTO map (zoom_level, tile_column, tile_row, grid_id)
             VALUES (?, ?, ?, ?)
             ON CONFLICT (zoom_level, tile_column, tile_row)
             DO UPDATE SET grid_id = excluded.grid_id",
        )
        .bind(coord.z)
        .bind(coord.x)
        .bind(coord.y)
        .bind(&id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        debug!("Grid {coord:#} bound to content {id} in {self}");
        Ok(id)
    }

    /// Check if a coordinate has tile content, without reading the payload
    pub async fn contains<T>(&self, conn: &mut T, coord: TileCoord) -> MbtResult<bool>
    where
        for<'e> &'e mut T: SqliteExecutor<'e>,
    {
        check_coord(coord)?;
        let row = query(
            "SELECT 1
             FROM map
             JOIN images ON images.tile_id = map.tile_id
             WHERE map.zoom_level = ? AND map.tile_column = ? AND map.tile_row = ?",
        )
        .bind(coord.z)
        .bind(coord.x)
        .bind(coord.y)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(row.is_some())
    }

    pub async fn content_stats<T>(&self, conn: &mut T) -> MbtResult<ContentStats>
    where
        for<'e> &'e mut T: SqliteExecutor<'e>,
    {
        let row = query(
            "SELECT
                 (SELECT COUNT(*) FROM map) AS bindings,
                 (SELECT COUNT(*) FROM map WHERE tile_id IS NOT NULL) AS tiles,
                 (SELECT COUNT(*) FROM images) AS contents,
                 (SELECT COALESCE(SUM(LENGTH(tile_data)), 0) FROM images) AS content_size,
                 (SELECT COUNT(*) FROM grid_utfgrid) AS grids",
        )
        .fetch_one(&mut *conn)
        .await?;

        Ok(ContentStats {
            bindings: to_u64(row.try_get("bindings")?),
            tiles: to_u64(row.try_get("tiles")?),
            contents: to_u64(row.try_get("contents")?),
            content_size: to_u64(row.try_get("content_size")?),
            grids: to_u64(row.try_get("grids")?),
        })
    }
}
