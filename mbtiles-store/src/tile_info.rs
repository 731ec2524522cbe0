use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Serialize, Serializer};
use serde_json::Value as JSONValue;
use tile_utils::{Format, MAX_ZOOM, Scheme};
use tilejson::{Bounds, TileJSON, VectorLayer, tilejson};
use tracing::warn;

use crate::errors::InfoViolation;

/// Map center as a `lon,lat` pair
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Center {
    pub lon: f64,
    pub lat: f64,
}

impl Center {
    #[must_use]
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }
}

impl Display for Center {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},{}", self.lon, self.lat)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ParseCenterError {
    #[error("center must have exactly two comma-separated values, got {0}")]
    BadLen(usize),
    #[error("center value '{0}' is not a number")]
    NotNumber(String),
}

impl FromStr for Center {
    type Err = ParseCenterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let values = s
            .split(',')
            .map(|v| {
                let v = v.trim();
                v.parse::<f64>()
                    .map_err(|_| ParseCenterError::NotNumber(v.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        match values.as_slice() {
            [lon, lat] => Ok(Self::new(*lon, *lat)),
            _ => Err(ParseCenterError::BadLen(values.len())),
        }
    }
}

impl Serialize for Center {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        [self.lon, self.lat].serialize(serializer)
    }
}

/// Description of a tile set, persisted in the `metadata` table.
///
/// The value is owned and cloned on every hand-off, so no caller can
/// observe changes made through another copy.
#[serde_with::skip_serializing_none]
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TileInfo {
    pub name: Option<String>,
    pub description: Option<String>,
    pub version: Option<String>,
    pub attribution: Option<String>,
    pub format: Option<Format>,
    pub scheme: Scheme,
    pub min_zoom: u8,
    pub max_zoom: u8,
    pub bounds: Option<Bounds>,
    pub center: Option<Center>,
    /// Opaque document stored under the `json` key, usually holding `vector_layers`
    pub json: Option<JSONValue>,
}

impl TileInfo {
    /// A minimal valid tile set covering zoom 0 only
    #[must_use]
    pub fn new(format: Format, bounds: Bounds) -> Self {
        Self {
            format: Some(format),
            bounds: Some(bounds),
            ..Self::default()
        }
    }

    /// Check the rules a tile set must satisfy before it can be stored
    pub fn validate(&self) -> Result<(), InfoViolation> {
        if self.format.is_none() {
            return Err(InfoViolation::MissingFormat);
        }
        let Some(bounds) = self.bounds else {
            return Err(InfoViolation::MissingBounds);
        };
        let finite = [bounds.left, bounds.bottom, bounds.right, bounds.top]
            .iter()
            .all(|v| v.is_finite());
        if !finite || bounds.left >= bounds.right || bounds.bottom >= bounds.top {
            return Err(InfoViolation::InvalidBounds(bounds));
        }
        if self.min_zoom > self.max_zoom {
            return Err(InfoViolation::ZoomOrder {
                min: self.min_zoom,
                max: self.max_zoom,
            });
        }
        if self.max_zoom > MAX_ZOOM {
            return Err(InfoViolation::ZoomTooLarge(self.max_zoom));
        }
        if let Some(center) = self.center
            && (!center.lon.is_finite() || !center.lat.is_finite())
        {
            return Err(InfoViolation::InvalidCenter(center));
        }
        Ok(())
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Build a `TileJSON` document for this tile set.
    ///
    /// `vector_layers` is lifted out of the `json` document when it can be parsed,
    /// any other keys of that document are copied as-is.
    #[must_use]
    pub fn to_tilejson(&self, tiles: Vec<String>) -> TileJSON {
        let mut tj = tilejson! { tiles: tiles };
        tj.name.clone_from(&self.name);
        tj.description.clone_from(&self.description);
        tj.version.clone_from(&self.version);
        tj.attribution.clone_from(&self.attribution);
        tj.scheme = Some(self.scheme.to_string());
        tj.minzoom = Some(self.min_zoom);
        tj.maxzoom = Some(self.max_zoom);
        tj.bounds = self.bounds;
        tj.center = self.center.map(|c| tilejson::Center {
            longitude: c.lon,
            latitude: c.lat,
            zoom: self.min_zoom,
        });
        if let Some(format) = self.format {
            tj.other
                .insert("format".to_string(), JSONValue::String(format.to_string()));
        }

        if let Some(JSONValue::Object(obj)) = &self.json {
            for (key, value) in obj {
                if key == "vector_layers" {
                    match serde_json::from_value::<Vec<VectorLayer>>(value.clone()) {
                        Ok(layers) => tj.vector_layers = Some(layers),
                        Err(err) => {
                            warn!("Unable to parse vector_layers of tile set {:?}: {err}", self.name);
                        }
                    }
                } else {
                    tj.other.insert(key.clone(), value.clone());
                }
            }
        }
        tj
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use insta::assert_yaml_snapshot;
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    pub fn world_info() -> TileInfo {
        TileInfo {
            name: Some("World".to_string()),
            description: Some("Test tile set".to_string()),
            min_zoom: 0,
            max_zoom: 4,
            center: Some(Center::new(10.5, -3.25)),
            ..TileInfo::new(Format::Png, Bounds::new(-180.0, -85.0, 180.0, 85.0))
        }
    }

    #[test]
    fn valid_info() {
        assert_eq!(world_info().validate(), Ok(()));
        assert!(TileInfo::new(Format::Mvt, Bounds::new(0.0, 0.0, 1.0, 1.0)).is_valid());
    }

    #[test]
    fn default_is_invalid() {
        let info = TileInfo::default();
        assert_eq!(info.scheme, Scheme::Tms);
        assert_eq!(info.validate(), Err(InfoViolation::MissingFormat));

        let info = TileInfo {
            format: Some(Format::Png),
            ..TileInfo::default()
        };
        assert_eq!(info.validate(), Err(InfoViolation::MissingBounds));
    }

    #[rstest]
    #[case(Bounds::new(10.0, 0.0, 10.0, 1.0))]
    #[case(Bounds::new(11.0, 0.0, 10.0, 1.0))]
    #[case(Bounds::new(0.0, 1.0, 10.0, 1.0))]
    #[case(Bounds::new(0.0, 2.0, 10.0, 1.0))]
    #[case(Bounds::new(f64::NAN, 0.0, 10.0, 1.0))]
    #[case(Bounds::new(0.0, 0.0, f64::INFINITY, 1.0))]
    fn bad_bounds(#[case] bounds: Bounds) {
        let info = TileInfo::new(Format::Png, bounds);
        assert!(matches!(
            info.validate(),
            Err(InfoViolation::InvalidBounds(_))
        ));
    }

    #[test]
    fn bad_zooms() {
        let mut info = world_info();
        info.min_zoom = 5;
        info.max_zoom = 4;
        assert_eq!(
            info.validate(),
            Err(InfoViolation::ZoomOrder { min: 5, max: 4 })
        );

        info.max_zoom = 31;
        assert_eq!(info.validate(), Err(InfoViolation::ZoomTooLarge(31)));
    }

    #[test]
    fn bad_center() {
        let mut info = world_info();
        info.center = Some(Center::new(f64::NAN, 0.0));
        assert!(matches!(
            info.validate(),
            Err(InfoViolation::InvalidCenter(_))
        ));
    }

    #[rstest]
    #[case("1.5,-2", Ok(Center::new(1.5, -2.0)))]
    #[case(" 0 , 0 ", Ok(Center::new(0.0, 0.0)))]
    #[case("1,2,3", Err(ParseCenterError::BadLen(3)))]
    #[case("1", Err(ParseCenterError::BadLen(1)))]
    #[case("1,north", Err(ParseCenterError::NotNumber("north".to_string())))]
    fn parse_center(#[case] value: &str, #[case] expected: Result<Center, ParseCenterError>) {
        assert_eq!(value.parse::<Center>(), expected);
    }

    #[test]
    fn center_display_round_trip() {
        let center = Center::new(-75.9375, 38.788894);
        assert_eq!(center.to_string().parse::<Center>(), Ok(center));
    }

    #[test]
    fn tilejson_from_info() {
        let mut info = world_info();
        info.format = Some(Format::Mvt);
        info.json = Some(json!({
            "vector_layers": [{"id": "cities", "fields": {"name": "String"}}],
            "tilestats": {"layerCount": 1}
        }));
        let tj = info.to_tilejson(vec!["https://example.org/{z}/{x}/{y}".to_string()]);
        assert_eq!(tj.name.as_deref(), Some("World"));
        assert_eq!(tj.scheme.as_deref(), Some("tms"));
        assert_eq!(tj.maxzoom, Some(4));
        assert_eq!(tj.bounds, info.bounds);
        let center = tj.center.unwrap();
        assert_eq!((center.longitude, center.latitude, center.zoom), (10.5, -3.25, 0));
        let layers = tj.vector_layers.unwrap();
        assert_eq!(layers.len(), 1);
        assert_eq!(layers[0].id, "cities");
        assert_eq!(tj.other.get("format"), Some(&json!("pbf")));
        assert_eq!(tj.other.get("tilestats"), Some(&json!({"layerCount": 1})));
    }

    #[test]
    fn serialize_info() {
        assert_yaml_snapshot!(world_info(), @r"
        name: World
        description: Test tile set
        format: png
        scheme: tms
        min_zoom: 0
        max_zoom: 4
        bounds:
          - -180
          - -85
          - 180
          - 85
        center:
          - 10.5
          - -3.25
        ");
    }
}
