use std::path::PathBuf;

use enum_display::EnumDisplay;
use tile_utils::{MAX_ZOOM, Scheme, TileCoord};
use tilejson::Bounds;

use crate::metadata::MetadataKey;
use crate::tile_info::Center;

/// Coarse classification of [`MbtError`] values
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumDisplay)]
#[enum_display(case = "Kebab")]
pub enum ErrorKind {
    /// The input was rejected before anything was written
    Validation,
    /// A persisted metadata value could not be parsed
    Format,
    /// The backing database failed or holds inconsistent data
    Storage,
}

/// The first rule a [`TileInfo`](crate::TileInfo) breaks
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum InfoViolation {
    #[error("tile format is not set")]
    MissingFormat,

    #[error("bounds are not set")]
    MissingBounds,

    #[error("bounds {0} must be finite, with west < east and south < north")]
    InvalidBounds(Bounds),

    #[error("center {0} must be finite")]
    InvalidCenter(Center),

    #[error("minzoom {min} is greater than maxzoom {max}")]
    ZoomOrder { min: u8, max: u8 },

    #[error("maxzoom {0} exceeds the highest supported zoom level {max}", max = MAX_ZOOM)]
    ZoomTooLarge(u8),
}

#[derive(thiserror::Error, Debug)]
pub enum MbtError {
    #[error("Invalid tile info: {0}")]
    InvalidTileInfo(#[from] InfoViolation),

    #[error("Unsupported tile scheme '{0}', only 'tms' can be stored")]
    UnsupportedScheme(Scheme),

    #[error("Tile {0:#} is outside of the tile grid")]
    InvalidCoordinate(TileCoord),

    #[error("Metadata value {key}='{value}' cannot be parsed: {reason}")]
    InvalidMetadataValue {
        key: MetadataKey,
        value: String,
        reason: String,
    },

    #[error(transparent)]
    SqlxError(#[from] sqlx::Error),

    #[error(transparent)]
    JsonSerdeError(#[from] serde_json::Error),

    #[error("MBTile filepath contains unsupported characters: {}", .0.display())]
    UnsupportedCharsInFilepath(PathBuf),

    #[error("MBTile file {0} stores tiles in a flat table and cannot hold deduplicated tiles")]
    UnsupportedSchema(String),

    #[error("Integrity check failed for MBTile file {0} for the following reasons:\n    {1:?}")]
    FailedIntegrityCheck(String, Vec<String>),

    #[error(
        "Content in table {table} has mismatching hash: stored id `{stored}` != computed `{computed}` in MBTile file {file}"
    )]
    IncorrectContentHash {
        file: String,
        table: &'static str,
        stored: String,
        computed: String,
    },

    #[error("Tile {coord:#} points at missing content `{tile_id}` in MBTile file {file}")]
    DanglingBinding {
        file: String,
        coord: TileCoord,
        tile_id: String,
    },
}

impl MbtError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidTileInfo(_)
            | Self::UnsupportedScheme(_)
            | Self::InvalidCoordinate(_)
            | Self::UnsupportedCharsInFilepath(_) => ErrorKind::Validation,
            Self::InvalidMetadataValue { .. } | Self::JsonSerdeError(_) => ErrorKind::Format,
            Self::SqlxError(_)
            | Self::UnsupportedSchema(_)
            | Self::FailedIntegrityCheck(..)
            | Self::IncorrectContentHash { .. }
            | Self::DanglingBinding { .. } => ErrorKind::Storage,
        }
    }
}

pub type MbtResult<T> = Result<T, MbtError>;
