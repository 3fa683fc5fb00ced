//! # quadtiler-raster
//!
//! Georeferenced raster primitives for retiling satellite basemap quads.
//!
//! This crate provides:
//! - EPSG-coded coordinate reference systems and point transformation
//!   (`proj4rs`, no native PROJ/GDAL needed)
//! - Six-coefficient affine pixel transforms and bounds
//! - GeoTIFF reading and writing (striped, or tiled with overviews)
//! - Mosaicking of overlapping sources, in memory or spooled to a temp file
//! - Cubic reprojection onto a destination grid with a fixed 16-bit output
//!
//! ## Example
//!
//! ```no_run
//! use quadtiler_raster::{AffineTransform, Bounds, Crs, GeoRaster, Reprojector, DEFAULT_RESOLUTION};
//!
//! let quad = GeoRaster::open("quads/planet_medres_normalized_analytic_2022-06_mosaic_1234-987.tif")?;
//!
//! // Destination grid anchored at the tile's north-west corner
//! let tile = Bounds::new(36.80, -1.30, 36.85, -1.25);
//! let transform = AffineTransform::for_bounds(Some(tile), DEFAULT_RESOLUTION)?;
//!
//! let warped = Reprojector::new(transform, 2000, 2000, 4, Crs::WGS84).reproject(&quad)?;
//! warped.write_geotiff("out/tile_2022-06.tif")?;
//! # Ok::<(), quadtiler_raster::RasterError>(())
//! ```

mod crs;
mod error;
mod layout;
mod mosaic;
mod raster;
mod reproject;
mod transform;
mod writer;

pub use crs::{CoordTransformer, Crs};
pub use error::RasterError;
pub use layout::TiffLayout;
pub use mosaic::{Mosaic, MosaicBuilder, MosaicMode, SkippedSource};
pub use raster::{GeoRaster, RasterHeader, SampleType};
pub use reproject::{round_to_i16, write_raw, Reprojector};
pub use transform::{AffineTransform, Bounds, DEFAULT_RESOLUTION};
pub use writer::{GeoTiffWriter, Layout, DEFAULT_ROWS_PER_STRIP};

/// Result type for raster operations.
pub type Result<T> = std::result::Result<T, RasterError>;
