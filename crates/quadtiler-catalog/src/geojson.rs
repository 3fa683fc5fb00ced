//! Minimal GeoJSON FeatureCollection reader.
//!
//! Only what the catalog and grid files need: polygon and multipolygon
//! geometries, a property map, and the legacy `crs` member that older
//! GeoJSON writers emit for non-WGS84 data.

use std::path::Path;

use quadtiler_raster::Crs;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::geometry::{Footprint, GeometryError, Point, Polygon};
use crate::{CatalogError, Result};

#[derive(Debug, Deserialize)]
pub(crate) struct FeatureCollection {
    #[serde(default)]
    crs: Option<LegacyCrs>,
    pub(crate) features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct LegacyCrs {
    properties: LegacyCrsProperties,
}

#[derive(Debug, Deserialize)]
struct LegacyCrsProperties {
    name: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Feature {
    #[serde(default)]
    properties: Option<Map<String, Value>>,
    #[serde(default)]
    geometry: Option<Geometry>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum Geometry {
    Polygon { coordinates: Vec<Vec<Vec<f64>>> },
    MultiPolygon { coordinates: Vec<Vec<Vec<Vec<f64>>>> },
    #[serde(other)]
    Unsupported,
}

impl FeatureCollection {
    pub(crate) fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    pub(crate) fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// CRS declared by the collection; GeoJSON defaults to WGS84.
    pub(crate) fn crs(&self) -> Result<Crs> {
        match &self.crs {
            Some(crs) => Ok(Crs::parse(&crs.properties.name)?),
            None => Ok(Crs::WGS84),
        }
    }
}

impl Feature {
    /// A property rendered as a string. Numbers are rendered as written;
    /// null and missing properties are `None`.
    pub(crate) fn property(&self, key: &str) -> Option<String> {
        match self.properties.as_ref()?.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// A required string property.
    pub(crate) fn required(&self, index: usize, property: &'static str) -> Result<String> {
        self.property(property)
            .filter(|v| !v.trim().is_empty())
            .ok_or(CatalogError::MissingProperty { index, property })
    }

    /// An optional integer property.
    pub(crate) fn integer(&self, key: &str) -> Option<i64> {
        match self.properties.as_ref()?.get(key)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// The feature geometry as a footprint.
    pub(crate) fn footprint(&self, index: usize) -> Result<Footprint> {
        let invalid = |reason: String| CatalogError::InvalidGeometry { index, reason };

        let polygons = match &self.geometry {
            None => return Err(invalid("missing geometry".to_string())),
            Some(Geometry::Unsupported) => {
                return Err(invalid("geometry is not a Polygon or MultiPolygon".to_string()))
            }
            Some(Geometry::Polygon { coordinates }) => {
                vec![polygon(coordinates).map_err(|e| invalid(e.to_string()))?]
            }
            Some(Geometry::MultiPolygon { coordinates }) => coordinates
                .iter()
                .map(|rings| polygon(rings))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| invalid(e.to_string()))?,
        };

        if polygons.is_empty() {
            return Err(invalid("empty MultiPolygon".to_string()));
        }
        Ok(Footprint::new(polygons))
    }
}

fn polygon(rings: &[Vec<Vec<f64>>]) -> std::result::Result<Polygon, GeometryError> {
    let mut rings = rings.iter().map(|ring| ring_points(ring));
    let exterior = rings.next().unwrap_or(Ok(Vec::new()))?;
    let holes = rings.collect::<std::result::Result<Vec<_>, _>>()?;
    Polygon::new(exterior, holes)
}

fn ring_points(ring: &[Vec<f64>]) -> std::result::Result<Vec<Point>, GeometryError> {
    ring.iter()
        .map(|position| match position.as_slice() {
            [x, y, ..] => Ok([*x, *y]),
            short => Err(GeometryError::ShortPosition(short.len())),
        })
        .collect()
}
