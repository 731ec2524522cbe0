use enum_display::EnumDisplay;
use futures::TryStreamExt as _;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row as _, SqliteExecutor, query};
use tile_utils::TileCoord;
use tracing::info;

use crate::Mbtiles;
use crate::errors::{MbtError, MbtResult};
use crate::tiles::content_id;

#[derive(PartialEq, Eq, Default, Debug, Clone, Copy, EnumDisplay, Serialize, Deserialize)]
#[enum_display(case = "Kebab")]
#[serde(rename_all = "lowercase")]
pub enum IntegrityCheckType {
    #[default]
    Quick,
    Full,
    Off,
}

impl Mbtiles {
    /// Perform `SQLite` internal integrity check
    pub async fn check_integrity<T>(
        &self,
        conn: &mut T,
        integrity_check: IntegrityCheckType,
    ) -> MbtResult<()>
    where
        for<'e> &'e mut T: SqliteExecutor<'e>,
    {
        if integrity_check == IntegrityCheckType::Off {
            info!("Skipping integrity check for {self}");
            return Ok(());
        }

        let sql = if integrity_check == IntegrityCheckType::Full {
            "PRAGMA integrity_check;"
        } else {
            "PRAGMA quick_check;"
        };

        let result: Vec<String> = query(sql)
            .map(|row: SqliteRow| row.get(0))
            .fetch_all(&mut *conn)
            .await?;

        if result.len() > 1
            || result.first().ok_or_else(|| {
                MbtError::FailedIntegrityCheck(
                    self.filepath().to_string(),
                    vec!["SQLite could not perform integrity check".to_string()],
                )
            })? != "ok"
        {
            return Err(MbtError::FailedIntegrityCheck(
                self.filepath().to_string(),
                result,
            ));
        }

        info!("{integrity_check} integrity check passed for {self}");
        Ok(())
    }

    /// Verify that every stored payload is keyed by the hash of its bytes
    pub async fn check_content_hashes<T>(&self, conn: &mut T) -> MbtResult<()>
    where
        for<'e> &'e mut T: SqliteExecutor<'e>,
    {
        for (table, sql) in [
            ("images", "SELECT tile_id, tile_data FROM images"),
            ("grid_utfgrid", "SELECT grid_id, grid_utfgrid FROM grid_utfgrid"),
        ] {
            let mut rows = query(sql).fetch(&mut *conn);
            while let Some(row) = rows.try_next().await? {
                let stored: String = row.try_get(0)?;
                // NULL payloads have nothing to hash
                let Some(data) = row.try_get::<Option<Vec<u8>>, _>(1)? else {
                    continue;
                };
                let computed = content_id(&data);
                if stored.to_lowercase() != computed {
                    return Err(MbtError::IncorrectContentHash {
                        file: self.filepath().to_string(),
                        table,
                        stored,
                        computed,
                    });
                }
            }
        }

        info!("All content hashes are valid for {self}");
        Ok(())
    }

    /// Verify that no binding points at content that does not exist
    pub async fn check_bindings<T>(&self, conn: &mut T) -> MbtResult<()>
    where
        for<'e> &'e mut T: SqliteExecutor<'e>,
    {
        let row = query(
            "SELECT map.zoom_level, map.tile_column, map.tile_row, map.tile_id
             FROM map
             LEFT JOIN images ON images.tile_id = map.tile_id
             WHERE map.tile_id IS NOT NULL AND images.tile_id IS NULL
             UNION ALL
             SELECT map.zoom_level, map.tile_column, map.tile_row, map.grid_id
             FROM map
             LEFT JOIN grid_utfgrid ON grid_utfgrid.grid_id = map.grid_id
             WHERE map.grid_id IS NOT NULL AND grid_utfgrid.grid_id IS NULL
             LIMIT 1",
        )
        .fetch_optional(&mut *conn)
        .await?;

        if let Some(row) = row {
            let z: i64 = row.try_get(0)?;
            let x: i64 = row.try_get(1)?;
            let y: i64 = row.try_get(2)?;
            return Err(MbtError::DanglingBinding {
                file: self.filepath().to_string(),
                coord: TileCoord::new(
                    u8::try_from(z).unwrap_or(u8::MAX),
                    u32::try_from(x).unwrap_or(u32::MAX),
                    u32::try_from(y).unwrap_or(u32::MAX),
                ),
                tile_id: row.try_get(3)?,
            });
        }

        info!("All bindings point at stored content in {self}");
        Ok(())
    }

    /// Run the integrity check, then verify content hashes and bindings
    pub async fn validate<T>(&self, conn: &mut T, check_type: IntegrityCheckType) -> MbtResult<()>
    where
        for<'e> &'e mut T: SqliteExecutor<'e>,
    {
        self.check_integrity(&mut *conn, check_type).await?;
        self.check_content_hashes(&mut *conn).await?;
        self.check_bindings(&mut *conn).await
    }
}
