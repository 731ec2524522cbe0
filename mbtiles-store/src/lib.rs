#![doc = "A writable `MBTiles` tile store that keeps every unique tile payload once."]
#![doc = ""]
#![doc = "Tiles are bound to TMS coordinates through the `map` table, payloads live in `images`"]
#![doc = "keyed by their MD5 digest, and the tile set description is kept in `metadata`."]

mod config;
pub use config::{JournalMode, StoreConfig};

mod errors;
pub use errors::{ErrorKind, InfoViolation, MbtError, MbtResult};

mod mbtiles;
pub use mbtiles::Mbtiles;

mod metadata;
pub use metadata::MetadataKey;

mod schema;
pub use schema::{
    create_content_tables, create_map_table, create_metadata_table, create_views,
    is_empty_database, is_flat_tables_type,
};

mod store;
pub use store::TileStore;

mod tile_info;
pub use tile_info::{Center, ParseCenterError, TileInfo};

mod tiles;
pub use tiles::{ContentStats, content_id};

mod validation;
pub use validation::IntegrityCheckType;

pub use tile_utils::{Format, MAX_ZOOM, Scheme, TileCoord, invert_y_value};
// re-export crates that appear in the public API
pub use sqlx;
pub use tilejson;
