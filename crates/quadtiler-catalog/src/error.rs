//! Error types for catalog and grid loading.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading or querying the quad catalog and tile grid.
///
/// All of these are structural: they are raised before any retiling work
/// starts, except [`CatalogError::Raster`] coming out of an overlap query.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// A catalog or grid file could not be read.
    #[error("Failed to read {path}: {source}")]
    Read {
        /// File that was being read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid GeoJSON.
    #[error("Invalid GeoJSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A feature is missing a required property.
    #[error("Feature {index} is missing required property '{property}'")]
    MissingProperty {
        /// Zero-based feature index.
        index: usize,
        /// Name of the property.
        property: &'static str,
    },

    /// A feature has no geometry or a geometry that is not a polygon.
    #[error("Feature {index} has invalid geometry: {reason}")]
    InvalidGeometry {
        /// Zero-based feature index.
        index: usize,
        /// What was wrong.
        reason: String,
    },

    /// Two catalog records share the same quad id and date.
    #[error("Duplicate quad '{id}' for date '{date}'")]
    DuplicateQuad {
        /// Quad id.
        id: String,
        /// Date token.
        date: String,
    },

    /// Two grid tiles share the same id.
    #[error("Duplicate tile id '{0}'")]
    DuplicateTile(String),

    /// CRS resolution or coordinate transformation failed.
    #[error(transparent)]
    Raster(#[from] quadtiler_raster::RasterError),
}
