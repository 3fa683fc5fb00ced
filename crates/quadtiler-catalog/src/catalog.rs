//! The quad catalog: one typed record per (quad, date).

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use quadtiler_raster::Crs;
use tracing::debug;

use crate::geojson::FeatureCollection;
use crate::geometry::Footprint;
use crate::{CatalogError, Result};

/// File name the basemap provider uses for a quad when the catalog has no
/// `file` property.
pub fn derive_quad_file(date: &str, quad_id: &str) -> String {
    format!("planet_medres_normalized_analytic_{date}_mosaic_{quad_id}.tif")
}

/// A source quad available for retiling.
#[derive(Debug, Clone, PartialEq)]
pub struct QuadRecord {
    /// Quad id, e.g. `1234-987`.
    pub id: String,
    /// Opaque date token, e.g. `2022-06` or `2022-06_2022-08`.
    pub date: String,
    /// Footprint in the catalog CRS.
    pub footprint: Footprint,
    /// File name relative to the quad directory.
    pub file: String,
}

impl QuadRecord {
    /// Location of the quad file inside `quad_dir`.
    pub fn path_in(&self, quad_dir: &Path) -> PathBuf {
        quad_dir.join(&self.file)
    }
}

/// All quads known to a run, in catalog order.
///
/// Records are validated once at load time: every feature needs `tile`
/// (the quad id), `date` and a polygon geometry, and `(id, date)` pairs are
/// unique.
#[derive(Debug, Clone)]
pub struct QuadCatalog {
    crs: Crs,
    records: Vec<QuadRecord>,
}

impl QuadCatalog {
    /// Create a catalog, rejecting duplicate `(id, date)` pairs.
    pub fn new(crs: Crs, records: Vec<QuadRecord>) -> Result<Self> {
        let mut seen = HashSet::new();
        for record in &records {
            if !seen.insert((record.id.as_str(), record.date.as_str())) {
                return Err(CatalogError::DuplicateQuad {
                    id: record.id.clone(),
                    date: record.date.clone(),
                });
            }
        }
        Ok(Self { crs, records })
    }

    /// Load a catalog from a GeoJSON file.
    pub fn from_geojson_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let catalog = Self::from_collection(FeatureCollection::from_file(path.as_ref())?)?;
        debug!(
            path = %path.as_ref().display(),
            quads = catalog.len(),
            dates = catalog.dates().len(),
            "Loaded quad catalog"
        );
        Ok(catalog)
    }

    /// Load a catalog from GeoJSON text.
    pub fn from_geojson_str(text: &str) -> Result<Self> {
        Self::from_collection(FeatureCollection::parse(text)?)
    }

    fn from_collection(collection: FeatureCollection) -> Result<Self> {
        let crs = collection.crs()?;
        let records = collection
            .features
            .iter()
            .enumerate()
            .map(|(index, feature)| {
                let id = feature.required(index, "tile")?;
                let date = feature.required(index, "date")?;
                let footprint = feature.footprint(index)?;
                let file = feature
                    .property("file")
                    .filter(|f| !f.trim().is_empty())
                    .unwrap_or_else(|| derive_quad_file(&date, &id));
                Ok(QuadRecord {
                    id,
                    date,
                    footprint,
                    file,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(crs, records)
    }

    /// CRS of every footprint in the catalog.
    pub fn crs(&self) -> Crs {
        self.crs
    }

    /// All records in catalog order.
    pub fn records(&self) -> &[QuadRecord] {
        &self.records
    }

    /// Distinct dates in order of first appearance.
    pub fn dates(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.records
            .iter()
            .map(|r| r.date.as_str())
            .filter(|d| seen.insert(*d))
            .collect()
    }

    /// Records for one date with their catalog positions.
    pub fn for_date<'a>(&'a self, date: &'a str) -> impl Iterator<Item = (usize, &'a QuadRecord)> + 'a {
        self.records
            .iter()
            .enumerate()
            .filter(move |(_, r)| r.date == date)
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feature(tile: &str, date: &str, file: Option<&str>) -> String {
        let file = file
            .map(|f| format!(r#", "file": "{f}""#))
            .unwrap_or_default();
        format!(
            r#"{{"type": "Feature", "properties": {{"tile": "{tile}", "date": "{date}"{file}}},
                "geometry": {{"type": "Polygon", "coordinates": [[[0, 0], [1, 0], [1, 1], [0, 1], [0, 0]]]}}}}"#
        )
    }

    fn collection(features: &[String]) -> String {
        format!(r#"{{"type": "FeatureCollection", "features": [{}]}}"#, features.join(","))
    }

    #[test]
    fn test_derive_quad_file() {
        assert_eq!(
            derive_quad_file("2022-06", "1234-987"),
            "planet_medres_normalized_analytic_2022-06_mosaic_1234-987.tif"
        );
    }

    #[test]
    fn test_load_and_dates_in_order() {
        let text = collection(&[
            feature("Q1", "2022-07", None),
            feature("Q2", "2022-06", Some("custom.tif")),
            feature("Q1", "2022-06", None),
        ]);
        let catalog = QuadCatalog::from_geojson_str(&text).unwrap();
        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.dates(), vec!["2022-07", "2022-06"]);
        assert_eq!(catalog.records()[1].file, "custom.tif");
        assert_eq!(
            catalog.records()[0].file,
            "planet_medres_normalized_analytic_2022-07_mosaic_Q1.tif"
        );

        let june: Vec<usize> = catalog.for_date("2022-06").map(|(i, _)| i).collect();
        assert_eq!(june, vec![1, 2]);
        assert_eq!(
            catalog.records()[1].path_in(Path::new("/quads")),
            PathBuf::from("/quads/custom.tif")
        );
    }

    #[test]
    fn test_duplicate_quad_rejected() {
        let text = collection(&[feature("Q1", "2022-06", None), feature("Q1", "2022-06", None)]);
        assert!(matches!(
            QuadCatalog::from_geojson_str(&text),
            Err(CatalogError::DuplicateQuad { id, date }) if id == "Q1" && date == "2022-06"
        ));
    }

    #[test]
    fn test_missing_date_is_structural() {
        let text = r#"{"features": [{"properties": {"tile": "Q1"},
            "geometry": {"type": "Polygon", "coordinates": [[[0, 0], [1, 0], [1, 1], [0, 0]]]}}]}"#;
        assert!(matches!(
            QuadCatalog::from_geojson_str(text),
            Err(CatalogError::MissingProperty { index: 0, property: "date" })
        ));
    }

    #[test]
    fn test_unreadable_file() {
        let result = QuadCatalog::from_geojson_file("/nonexistent/catalog.geojson");
        assert!(matches!(result, Err(CatalogError::Read { .. })));
    }
}
