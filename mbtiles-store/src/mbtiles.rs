use std::ffi::OsStr;
use std::fmt::{Display, Formatter};
use std::path::Path;

use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Connection as _, SqliteConnection};
use tracing::debug;

use crate::config::StoreConfig;
use crate::errors::{MbtError, MbtResult};

/// Location of an `MBTiles` file.
///
/// The low-level metadata, tile and validation operations are implemented on this type
/// and run on any connection or transaction passed to them.
/// [`TileStore`](crate::TileStore) wraps it with a connection pool.
#[derive(Clone, Debug)]
pub struct Mbtiles {
    filepath: String,
    filename: String,
}

impl Display for Mbtiles {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.filepath)
    }
}

impl Mbtiles {
    pub fn new<P: AsRef<Path>>(filepath: P) -> MbtResult<Self> {
        let path = filepath.as_ref();
        Ok(Self {
            filepath: path
                .to_str()
                .ok_or_else(|| MbtError::UnsupportedCharsInFilepath(path.to_path_buf()))?
                .to_string(),
            filename: path
                .file_stem()
                .unwrap_or_else(|| OsStr::new("unknown"))
                .to_string_lossy()
                .to_string(),
        })
    }

    /// Open a single connection, creating the file if needed
    pub async fn open_or_new(&self) -> MbtResult<SqliteConnection> {
        debug!("Opening or creating {self}");
        let opt = StoreConfig::default().connect_options(self.filepath());
        Self::open_int(&opt).await
    }

    /// Open a single connection to an existing file
    pub async fn open(&self) -> MbtResult<SqliteConnection> {
        debug!("Opening w/ defaults {self}");
        let opt = StoreConfig::default()
            .connect_options(self.filepath())
            .create_if_missing(false);
        Self::open_int(&opt).await
    }

    async fn open_int(opt: &SqliteConnectOptions) -> MbtResult<SqliteConnection> {
        Ok(SqliteConnection::connect_with(opt).await?)
    }

    #[must_use]
    pub fn filepath(&self) -> &str {
        &self.filepath
    }

    #[must_use]
    pub fn filename(&self) -> &str {
        &self.filename
    }
}
