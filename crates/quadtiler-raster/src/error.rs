//! Error types for the raster crate.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur when reading, writing or warping rasters.
#[derive(Debug, Error)]
pub enum RasterError {
    /// I/O error reading or writing a file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TIFF decoding or encoding error.
    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    /// Invalid GeoTIFF - missing or inconsistent georeferencing tags.
    #[error("Invalid GeoTIFF {path}: {reason}")]
    InvalidGeoTiff {
        /// File that was being read.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },

    /// Geometry without computable bounds, or an unusable resolution.
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    /// The CRS is not known to the projection database.
    #[error("Unknown CRS: {0}")]
    UnknownCrs(String),

    /// A coordinate could not be transformed between two CRSs.
    #[error("Projection from {from} to {to} failed: {reason}")]
    Projection {
        /// Source CRS.
        from: String,
        /// Target CRS.
        to: String,
        /// Reason reported by the projection library.
        reason: String,
    },

    /// Affine transform cannot be inverted.
    #[error("Affine transform is not invertible")]
    SingularTransform,

    /// Unsupported data type in the TIFF file.
    #[error("Unsupported TIFF data type: {0}")]
    UnsupportedDataType(String),

    /// Raster data does not match the declared shape.
    #[error("Invalid raster data: {0}")]
    InvalidData(String),

    /// A requested band does not exist in the source.
    #[error("Band {band} requested but raster has {available} bands")]
    BandOutOfRange {
        /// Requested band (1-based).
        band: usize,
        /// Number of bands in the raster.
        available: usize,
    },

    /// None of the mosaic inputs could be opened.
    #[error("None of the {count} mosaic sources could be opened")]
    NoReadableSources {
        /// Number of sources that were tried.
        count: usize,
    },
}
