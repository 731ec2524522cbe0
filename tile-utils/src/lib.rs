//! Tile format detection and quad-tree coordinate helpers.

// Format detection was partially adapted from https://github.com/maplibre/mbtileserver-rs
// project originally written by Kaveh Karimi and licensed under MIT/Apache-2.0

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Highest zoom level a quad-tree tile pyramid may use.
pub const MAX_ZOOM: u8 = 30;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Png,
    #[serde(rename = "jpg", alias = "jpeg")]
    Jpeg,
    Webp,
    Gif,
    /// Mapbox vector tile, stored under its `MBTiles` name `pbf`
    #[serde(rename = "pbf", alias = "mvt")]
    Mvt,
}

impl Format {
    /// Parse a format name, ignoring case. Both `MBTiles` names and common aliases are accepted.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value.to_ascii_lowercase().as_str() {
            "png" => Self::Png,
            "jpg" | "jpeg" => Self::Jpeg,
            "webp" => Self::Webp,
            "gif" => Self::Gif,
            "pbf" | "mvt" => Self::Mvt,
            _ => None?,
        })
    }

    /// Guess the format from the leading magic bytes of a tile payload.
    ///
    /// Compressed payloads are assumed to hold vector tiles.
    #[must_use]
    pub fn detect(data: &[u8]) -> Option<Self> {
        Some(match data {
            v if v.starts_with(b"\x1f\x8b") || v.starts_with(b"\x78\x9c") => Self::Mvt,
            v if v.starts_with(b"\x89\x50\x4E\x47\x0D\x0A\x1A\x0A") => Self::Png,
            v if v.starts_with(b"\x47\x49\x46\x38\x39\x61") => Self::Gif,
            v if v.starts_with(b"\xFF\xD8\xFF") => Self::Jpeg,
            v if v.len() >= 12 && v.starts_with(b"RIFF") && &v[8..12] == b"WEBP" => Self::Webp,
            _ => None?,
        })
    }

    /// Name used in the `format` metadata value
    #[must_use]
    pub fn metadata_format_value(&self) -> &'static str {
        match *self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Webp => "webp",
            Self::Gif => "gif",
            Self::Mvt => "pbf",
        }
    }

    #[must_use]
    pub fn content_type(&self) -> &'static str {
        match *self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Webp => "image/webp",
            Self::Gif => "image/gif",
            Self::Mvt => "application/x-protobuf",
        }
    }

    #[must_use]
    pub fn is_raster(&self) -> bool {
        !matches!(self, Self::Mvt)
    }
}

impl Display for Format {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.metadata_format_value())
    }
}

/// Row numbering convention of a tile pyramid.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    /// Rows grow northward from the southern edge, as stored in `MBTiles`
    #[default]
    Tms,
    /// Rows grow southward from the northern edge (slippy map tiles)
    Xyz,
}

impl Scheme {
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value.to_ascii_lowercase().as_str() {
            "tms" => Self::Tms,
            "xyz" => Self::Xyz,
            _ => None?,
        })
    }
}

impl Display for Scheme {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Tms => "tms",
            Self::Xyz => "xyz",
        })
    }
}

/// Tile address in the TMS convention (row 0 is the southernmost row)
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TileCoord {
    pub z: u8,
    pub x: u32,
    pub y: u32,
}

impl TileCoord {
    #[must_use]
    pub fn new(z: u8, x: u32, y: u32) -> Self {
        Self { z, x, y }
    }

    /// Build a TMS coordinate from a slippy-map (XYZ) address
    #[must_use]
    pub fn from_xyz(z: u8, x: u32, y: u32) -> Self {
        Self::new(z, x, invert_y_value(z, y))
    }

    /// Row of this tile in the XYZ convention
    #[must_use]
    pub fn xyz_row(&self) -> u32 {
        invert_y_value(self.z, self.y)
    }

    /// True if the coordinate lies inside the quad-tree grid of its zoom level
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.z <= MAX_ZOOM
            && u64::from(self.x) < (1_u64 << self.z)
            && u64::from(self.y) < (1_u64 << self.z)
    }
}

impl Display for TileCoord {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if f.alternate() {
            write!(f, "{}/{}/{}", self.z, self.x, self.y)
        } else {
            write!(f, "{},{},{}", self.z, self.x, self.y)
        }
    }
}

/// Convert a row between the TMS and XYZ conventions. The conversion is its own inverse.
#[must_use]
pub fn invert_y_value(zoom: u8, y: u32) -> u32 {
    let max = u32::try_from((1_u64 << zoom.min(MAX_ZOOM)) - 1).unwrap_or(u32::MAX);
    max.saturating_sub(y)
}
