use std::fmt::{Display, Formatter};
use std::str::FromStr;

use futures::TryStreamExt as _;
use sqlx::{Connection as _, Row as _, SqliteConnection, SqliteExecutor, query};
use tile_utils::{Format, Scheme};
use tilejson::Bounds;
use tracing::{debug, info};

use crate::Mbtiles;
use crate::errors::{MbtError, MbtResult};
use crate::tile_info::{Center, TileInfo};

/// Metadata keys understood by the store.
///
/// Each key owns the conversion between its `metadata` table value and the matching
/// [`TileInfo`] field. Any other key found in the table is ignored on read and never written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetadataKey {
    Name,
    Description,
    Version,
    Attribution,
    Format,
    Scheme,
    MinZoom,
    MaxZoom,
    Bounds,
    Center,
    Json,
}

impl MetadataKey {
    pub const ALL: [Self; 11] = [
        Self::Name,
        Self::Description,
        Self::Version,
        Self::Attribution,
        Self::Format,
        Self::Scheme,
        Self::MinZoom,
        Self::MaxZoom,
        Self::Bounds,
        Self::Center,
        Self::Json,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Description => "description",
            Self::Version => "version",
            Self::Attribution => "attribution",
            Self::Format => "format",
            Self::Scheme => "scheme",
            Self::MinZoom => "minzoom",
            Self::MaxZoom => "maxzoom",
            Self::Bounds => "bounds",
            Self::Center => "center",
            Self::Json => "json",
        }
    }

    /// Find the key matching a `metadata.name` value, ignoring case
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|key| key.as_str().eq_ignore_ascii_case(name))
    }

    fn invalid(self, value: String, reason: impl Display) -> MbtError {
        MbtError::InvalidMetadataValue {
            key: self,
            value,
            reason: reason.to_string(),
        }
    }

    /// Parse a stored value into the matching field of `info`
    fn apply(self, info: &mut TileInfo, value: String) -> MbtResult<()> {
        match self {
            Self::Name => info.name = Some(value),
            Self::Description => info.description = Some(value),
            Self::Version => info.version = Some(value),
            Self::Attribution => info.attribution = Some(value),
            Self::Format => match Format::parse(&value) {
                Some(format) => info.format = Some(format),
                None => return Err(self.invalid(value, "unknown tile format")),
            },
            Self::Scheme => match Scheme::parse(&value) {
                Some(scheme) => info.scheme = scheme,
                None => return Err(self.invalid(value, "unknown tile scheme")),
            },
            Self::MinZoom => match value.parse() {
                Ok(zoom) => info.min_zoom = zoom,
                Err(err) => return Err(self.invalid(value, err)),
            },
            Self::MaxZoom => match value.parse() {
                Ok(zoom) => info.max_zoom = zoom,
                Err(err) => return Err(self.invalid(value, err)),
            },
            Self::Bounds => match Bounds::from_str(&value) {
                Ok(bounds) => info.bounds = Some(bounds),
                Err(err) => return Err(self.invalid(value, err)),
            },
            Self::Center => match Center::from_str(&value) {
                Ok(center) => info.center = Some(center),
                Err(err) => return Err(self.invalid(value, err)),
            },
            Self::Json => match serde_json::from_str(&value) {
                Ok(json) => info.json = Some(json),
                Err(err) => return Err(self.invalid(value, err)),
            },
        }
        Ok(())
    }

    /// Value to store for this key, or `None` if the field is not set
    fn encode(self, info: &TileInfo) -> MbtResult<Option<String>> {
        let text = |v: &Option<String>| v.clone().filter(|v| !v.is_empty());
        Ok(match self {
            Self::Name => text(&info.name),
            Self::Description => text(&info.description),
            Self::Version => text(&info.version),
            Self::Attribution => text(&info.attribution),
            Self::Format => info.format.map(|v| v.to_string()),
            Self::Scheme => Some(info.scheme.to_string()),
            Self::MinZoom => Some(info.min_zoom.to_string()),
            Self::MaxZoom => Some(info.max_zoom.to_string()),
            Self::Bounds => info.bounds.map(|v| v.to_string()),
            Self::Center => info.center.map(|v| v.to_string()),
            Self::Json => info.json.as_ref().map(serde_json::to_string).transpose()?,
        })
    }
}

impl Display for MetadataKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Mbtiles {
    /// Get a single metadata value from the metadata table
    pub async fn get_metadata_value<T>(&self, conn: &mut T, key: &str) -> MbtResult<Option<String>>
    where
        for<'e> &'e mut T: SqliteExecutor<'e>,
    {
        let row = query("SELECT value FROM metadata WHERE name = ?")
            .bind(key)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(match row {
            Some(row) => row.try_get::<Option<String>, _>(0)?,
            None => None,
        })
    }

    pub async fn set_metadata_value<T, S>(&self, conn: &mut T, key: &str, value: S) -> MbtResult<()>
    where
        S: ToString,
        for<'e> &'e mut T: SqliteExecutor<'e>,
    {
        query("INSERT OR REPLACE INTO metadata(name, value) VALUES(?, ?)")
            .bind(key)
            .bind(value.to_string())
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    pub async fn delete_metadata_value<T>(&self, conn: &mut T, key: &str) -> MbtResult<()>
    where
        for<'e> &'e mut T: SqliteExecutor<'e>,
    {
        query("DELETE FROM metadata WHERE name = ?")
            .bind(key)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Read the tile set description from the metadata table.
    ///
    /// Missing keys keep their default value, empty values count as missing.
    pub async fn load_tile_info<T>(&self, conn: &mut T) -> MbtResult<TileInfo>
    where
        for<'e> &'e mut T: SqliteExecutor<'e>,
    {
        let mut info = TileInfo::default();
        let mut rows = query(
            "SELECT name, value FROM metadata WHERE value IS NOT NULL AND value != ''",
        )
        .fetch(&mut *conn);

        while let Some(row) = rows.try_next().await? {
            let name: String = row.try_get(0)?;
            let value: String = row.try_get(1)?;
            if let Some(key) = MetadataKey::parse(&name) {
                key.apply(&mut info, value)?;
            } else {
                debug!("Ignoring unrecognized metadata value {name}={value} in {self}");
            }
        }
        Ok(info)
    }

    /// Replace the stored tile set description in a single transaction.
    ///
    /// Keys whose field is not set are removed, unrecognized keys are left alone.
    pub async fn save_tile_info(&self, conn: &mut SqliteConnection, info: &TileInfo) -> MbtResult<()> {
        info.validate()?;
        if info.scheme != Scheme::Tms {
            return Err(MbtError::UnsupportedScheme(info.scheme));
        }
        let values = MetadataKey::ALL
            .into_iter()
            .map(|key| Ok((key, key.encode(info)?)))
            .collect::<MbtResult<Vec<_>>>()?;

        let mut tx = conn.begin().await?;
        for (key, value) in values {
            // also drops rows stored under a differently cased name
            query("DELETE FROM metadata WHERE lower(name) = ?")
                .bind(key.as_str())
                .execute(&mut *tx)
                .await?;
            if let Some(value) = value {
                self.set_metadata_value(&mut *tx, key.as_str(), value).await?;
            }
        }
        tx.commit().await?;

        info!("Saved tile set metadata of {self}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;
    use sqlx::{Executor as _, Row as _};

    use super::*;
    use crate::ErrorKind;
    use crate::mbtiles::tests::temp_mbtiles;
    use crate::tile_info::tests::world_info;

    async fn stored_names(conn: &mut SqliteConnection) -> Vec<String> {
        query("SELECT name FROM metadata ORDER BY name")
            .fetch_all(conn)
            .await
            .unwrap()
            .into_iter()
            .map(|row| row.get(0))
            .collect()
    }

    #[test]
    fn key_names() {
        for key in MetadataKey::ALL {
            assert_eq!(MetadataKey::parse(key.as_str()), Some(key));
            assert_eq!(MetadataKey::parse(&key.as_str().to_uppercase()), Some(key));
        }
        assert_eq!(MetadataKey::parse("MinZoom"), Some(MetadataKey::MinZoom));
        assert_eq!(MetadataKey::parse("agg_tiles_hash"), None);
    }

    #[tokio::test]
    async fn empty_table_gives_defaults() {
        let (_dir, mbt, mut conn) = temp_mbtiles("empty_table_gives_defaults").await;
        let info = mbt.load_tile_info(&mut conn).await.unwrap();
        assert_eq!(info, TileInfo::default());
    }

    #[tokio::test]
    async fn save_and_load() {
        let (_dir, mbt, mut conn) = temp_mbtiles("save_and_load").await;
        let mut info = world_info();
        info.version = Some("1.0.0".to_string());
        info.json = Some(json!({"vector_layers": [{"id": "water", "fields": {}}]}));

        mbt.save_tile_info(&mut conn, &info).await.unwrap();
        assert_eq!(mbt.load_tile_info(&mut conn).await.unwrap(), info);

        assert_eq!(
            stored_names(&mut conn).await,
            vec![
                "bounds",
                "center",
                "description",
                "format",
                "json",
                "maxzoom",
                "minzoom",
                "name",
                "scheme",
                "version"
            ]
        );
        let value = mbt.get_metadata_value(&mut conn, "bounds").await.unwrap();
        assert_eq!(value.as_deref(), Some("-180,-85,180,85"));
        let value = mbt.get_metadata_value(&mut conn, "format").await.unwrap();
        assert_eq!(value.as_deref(), Some("png"));
    }

    #[tokio::test]
    async fn save_replaces_wholesale() {
        let (_dir, mbt, mut conn) = temp_mbtiles("save_replaces_wholesale").await;
        mbt.set_metadata_value(&mut conn, "generator", "tippecanoe")
            .await
            .unwrap();
        mbt.save_tile_info(&mut conn, &world_info()).await.unwrap();

        let mut info = world_info();
        info.center = None;
        info.description = None;
        info.name = Some(String::new());
        mbt.save_tile_info(&mut conn, &info).await.unwrap();

        let loaded = mbt.load_tile_info(&mut conn).await.unwrap();
        assert_eq!(loaded.center, None);
        assert_eq!(loaded.description, None);
        assert_eq!(loaded.name, None);
        assert_eq!(
            mbt.get_metadata_value(&mut conn, "generator").await.unwrap(),
            Some("tippecanoe".to_string())
        );
    }

    #[tokio::test]
    async fn save_rejects_invalid() {
        let (_dir, mbt, mut conn) = temp_mbtiles("save_rejects_invalid").await;

        let mut info = world_info();
        info.scheme = Scheme::Xyz;
        let err = mbt.save_tile_info(&mut conn, &info).await.unwrap_err();
        assert!(matches!(err, MbtError::UnsupportedScheme(Scheme::Xyz)));
        assert_eq!(err.kind(), ErrorKind::Validation);

        let mut info = world_info();
        info.format = None;
        let err = mbt.save_tile_info(&mut conn, &info).await.unwrap_err();
        assert!(matches!(err, MbtError::InvalidTileInfo(_)));
        assert_eq!(err.kind(), ErrorKind::Validation);

        assert!(stored_names(&mut conn).await.is_empty());
    }

    #[tokio::test]
    async fn load_is_case_insensitive_and_skips_unknown() {
        let (_dir, mbt, mut conn) = temp_mbtiles("load_is_case_insensitive").await;
        conn.execute(
            "INSERT INTO metadata (name, value) VALUES
                 ('Name', 'Mixed'),
                 ('MINZOOM', '3'),
                 ('maxzoom', '7'),
                 ('Format', 'JPEG'),
                 ('scheme', 'TMS'),
                 ('bounds', '-10,-20,10,20'),
                 ('description', ''),
                 ('legend', 'ignored'),
                 ('center', NULL);",
        )
        .await
        .unwrap();

        let info = mbt.load_tile_info(&mut conn).await.unwrap();
        assert_eq!(
            info,
            TileInfo {
                name: Some("Mixed".to_string()),
                min_zoom: 3,
                max_zoom: 7,
                ..TileInfo::new(Format::Jpeg, Bounds::new(-10.0, -20.0, 10.0, 20.0))
            }
        );

        // saving normalizes the key names
        mbt.save_tile_info(&mut conn, &info).await.unwrap();
        let names = stored_names(&mut conn).await;
        assert!(names.contains(&"name".to_string()));
        assert!(!names.contains(&"Name".to_string()));
        assert!(!names.contains(&"MINZOOM".to_string()));
        assert!(names.contains(&"legend".to_string()));
    }

    #[rstest]
    #[case("minzoom", "abc", MetadataKey::MinZoom)]
    #[case("maxzoom", "-1", MetadataKey::MaxZoom)]
    #[case("maxzoom", "3.5", MetadataKey::MaxZoom)]
    #[case("format", "tiff", MetadataKey::Format)]
    #[case("scheme", "google", MetadataKey::Scheme)]
    #[case("bounds", "1,2,3", MetadataKey::Bounds)]
    #[case("bounds", "a,b,c,d", MetadataKey::Bounds)]
    #[case("center", "1,x", MetadataKey::Center)]
    #[case("json", "{not json", MetadataKey::Json)]
    #[tokio::test]
    async fn load_malformed_value(
        #[case] name: &str,
        #[case] value: &str,
        #[case] expected_key: MetadataKey,
    ) {
        let (_dir, mbt, mut conn) = temp_mbtiles(&format!("load_malformed_{name}")).await;
        mbt.set_metadata_value(&mut conn, name, value).await.unwrap();

        let err = mbt.load_tile_info(&mut conn).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
        let MbtError::InvalidMetadataValue { key, value: bad, .. } = &err else {
            panic!("unexpected error {err:?}");
        };
        assert_eq!(*key, expected_key);
        assert_eq!(bad, value);
    }

    #[tokio::test]
    async fn metadata_set_key() -> MbtResult<()> {
        let (_dir, mbt, mut conn) = temp_mbtiles("metadata_set_key").await;

        mbt.set_metadata_value(&mut conn, "bounds", "0.0, 0.0, 0.0, 0.0")
            .await?;
        assert_eq!(
            mbt.get_metadata_value(&mut conn, "bounds").await?.unwrap(),
            "0.0, 0.0, 0.0, 0.0"
        );

        mbt.set_metadata_value(&mut conn, "bounds", "-123.123590,-37.818085,174.763027,59.352706")
            .await?;
        assert_eq!(
            mbt.get_metadata_value(&mut conn, "bounds").await?.unwrap(),
            "-123.123590,-37.818085,174.763027,59.352706"
        );

        mbt.delete_metadata_value(&mut conn, "bounds").await?;
        assert_eq!(mbt.get_metadata_value(&mut conn, "bounds").await?, None);
        assert_eq!(mbt.get_metadata_value(&mut conn, "nonexistent_key").await?, None);

        Ok(())
    }
}
