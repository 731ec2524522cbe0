use sqlx::{Connection as _, Executor as _, Row as _, SqliteConnection, SqliteExecutor, query};
use tracing::debug;

use crate::Mbtiles;
use crate::errors::{MbtError, MbtResult};

/// Returns true if the database is empty (no tables/indexes/...)
pub async fn is_empty_database<T>(conn: &mut T) -> MbtResult<bool>
where
    for<'e> &'e mut T: SqliteExecutor<'e>,
{
    Ok(query("SELECT 1 FROM sqlite_schema LIMIT 1")
        .fetch_optional(&mut *conn)
        .await?
        .is_none())
}

/// Check if the file keeps tile data in a plain `tiles` table instead of the `map` + `images` pair
pub async fn is_flat_tables_type<T>(conn: &mut T) -> MbtResult<bool>
where
    for<'e> &'e mut T: SqliteExecutor<'e>,
{
    let row = query(
        "SELECT COUNT(*) AS is_flat
         FROM sqlite_schema
         WHERE name = 'tiles'
             AND type = 'table';",
    )
    .fetch_one(&mut *conn)
    .await?;

    Ok(row.try_get::<i64, _>(0)? == 1)
}

pub async fn create_metadata_table<T>(conn: &mut T) -> MbtResult<()>
where
    for<'e> &'e mut T: SqliteExecutor<'e>,
{
    debug!("Creating metadata table if it doesn't already exist");
    conn.execute(
        "CREATE TABLE IF NOT EXISTS metadata (
             name text NOT NULL PRIMARY KEY,
             value text);",
    )
    .await?;

    Ok(())
}

/// Create the content-addressed payload tables: `images(id,data)` and `grid_utfgrid(id,data)`
pub async fn create_content_tables<T>(conn: &mut T) -> MbtResult<()>
where
    for<'e> &'e mut T: SqliteExecutor<'e>,
{
    debug!("Creating if needed content table: images(id,data)");
    conn.execute(
        "CREATE TABLE IF NOT EXISTS images (
             tile_id text NOT NULL PRIMARY KEY,
             tile_data blob);",
    )
    .await?;

    debug!("Creating if needed content table: grid_utfgrid(id,data)");
    conn.execute(
        "CREATE TABLE IF NOT EXISTS grid_utfgrid (
             grid_id text NOT NULL PRIMARY KEY,
             grid_utfgrid blob);",
    )
    .await?;

    Ok(())
}

/// Create the coordinate binding table `map(z,x,y,tile_id,grid_id)`
pub async fn create_map_table<T>(conn: &mut T) -> MbtResult<()>
where
    for<'e> &'e mut T: SqliteExecutor<'e>,
{
    debug!("Creating if needed binding table: map(z,x,y,tile_id,grid_id)");
    conn.execute(
        "CREATE TABLE IF NOT EXISTS map (
             zoom_level integer NOT NULL,
             tile_column integer NOT NULL,
             tile_row integer NOT NULL,
             tile_id text REFERENCES images(tile_id),
             grid_id text REFERENCES grid_utfgrid(grid_id),
             PRIMARY KEY(zoom_level, tile_column, tile_row));",
    )
    .await?;

    Ok(())
}

/// Create the standard `tiles` and `grids` views so regular `MBTiles` readers can use the file
pub async fn create_views<T>(conn: &mut T) -> MbtResult<()>
where
    for<'e> &'e mut T: SqliteExecutor<'e>,
{
    debug!("Creating if needed tiles view for map+images");
    conn.execute(
        "CREATE VIEW IF NOT EXISTS tiles AS
             SELECT map.zoom_level AS zoom_level,
                    map.tile_column AS tile_column,
                    map.tile_row AS tile_row,
                    images.tile_data AS tile_data
             FROM map
             JOIN images ON images.tile_id = map.tile_id;",
    )
    .await?;

    debug!("Creating if needed grids view for map+grid_utfgrid");
    conn.execute(
        "CREATE VIEW IF NOT EXISTS grids AS
             SELECT map.zoom_level AS zoom_level,
                    map.tile_column AS tile_column,
                    map.tile_row AS tile_row,
                    grid_utfgrid.grid_utfgrid AS grid
             FROM map
             JOIN grid_utfgrid ON grid_utfgrid.grid_id = map.grid_id;",
    )
    .await?;

    Ok(())
}

impl Mbtiles {
    /// Make sure all tables and views of a deduplicated store exist.
    ///
    /// Safe to run on every open: nothing is dropped or rewritten.
    pub async fn init_schema(&self, conn: &mut SqliteConnection) -> MbtResult<()> {
        if is_flat_tables_type(&mut *conn).await? {
            return Err(MbtError::UnsupportedSchema(self.filepath().to_string()));
        }
        if is_empty_database(&mut *conn).await? {
            debug!("Initializing a new tile store in {self}");
        }

        let mut tx = conn.begin().await?;
        create_metadata_table(&mut *tx).await?;
        create_content_tables(&mut *tx).await?;
        create_map_table(&mut *tx).await?;
        create_views(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use sqlx::{Executor as _, Row as _};

    use super::*;
    use crate::mbtiles::tests::temp_mbtiles;

    async fn object_names(conn: &mut SqliteConnection) -> Vec<(String, String)> {
        query("SELECT type, name FROM sqlite_schema WHERE name NOT LIKE 'sqlite_%' ORDER BY name")
            .fetch_all(conn)
            .await
            .unwrap()
            .into_iter()
            .map(|row| (row.get(0), row.get(1)))
            .collect()
    }

    #[tokio::test]
    async fn bootstrap_creates_schema() {
        let (_dir, _mbt, mut conn) = temp_mbtiles("bootstrap_creates_schema").await;
        let names = object_names(&mut conn).await;
        let expected = [
            ("table", "grid_utfgrid"),
            ("view", "grids"),
            ("table", "images"),
            ("table", "map"),
            ("table", "metadata"),
            ("view", "tiles"),
        ]
        .map(|(t, n)| (t.to_string(), n.to_string()));
        assert_eq!(names, expected.to_vec());
        assert!(!is_flat_tables_type(&mut conn).await.unwrap());
    }

    #[tokio::test]
    async fn bootstrap_is_idempotent() {
        let (_dir, mbt, mut conn) = temp_mbtiles("bootstrap_is_idempotent").await;
        conn.execute("INSERT INTO metadata (name, value) VALUES ('name', 'kept');")
            .await
            .unwrap();

        mbt.init_schema(&mut conn).await.unwrap();
        mbt.init_schema(&mut conn).await.unwrap();

        let value: String = query("SELECT value FROM metadata WHERE name = 'name'")
            .fetch_one(&mut conn)
            .await
            .unwrap()
            .get(0);
        assert_eq!(value, "kept");
    }

    #[tokio::test]
    async fn flat_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mbt = Mbtiles::new(dir.path().join("flat.mbtiles")).unwrap();
        let mut conn = mbt.open_or_new().await.unwrap();
        assert!(is_empty_database(&mut conn).await.unwrap());
        conn.execute(
            "CREATE TABLE tiles (
                 zoom_level integer NOT NULL,
                 tile_column integer NOT NULL,
                 tile_row integer NOT NULL,
                 tile_data blob,
                 PRIMARY KEY(zoom_level, tile_column, tile_row));",
        )
        .await
        .unwrap();

        let err = mbt.init_schema(&mut conn).await.unwrap_err();
        assert!(matches!(err, MbtError::UnsupportedSchema(_)));
        assert_eq!(object_names(&mut conn).await.len(), 1);
    }
}
