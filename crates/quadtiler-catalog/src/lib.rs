//! # quadtiler-catalog
//!
//! Vector inputs of a retiling run and the spatial join between them.
//!
//! - [`QuadCatalog`]: typed, validated records of the source quads
//!   (id, date, footprint, file), loaded from a GeoJSON FeatureCollection
//! - [`TileGrid`]: the destination tiles, also from GeoJSON, in any CRS
//! - [`OverlapResolver`]: R-tree backed lookup of the quads of one date that
//!   intersect a tile
//!
//! ## Example
//!
//! ```no_run
//! use quadtiler_catalog::{Overlap, OverlapResolver, QuadCatalog, TileGrid};
//!
//! let catalog = QuadCatalog::from_geojson_file("quads/catalog.geojson")?;
//! let grid = TileGrid::from_geojson_file("grid/tiles.geojson")?;
//!
//! for date in catalog.dates() {
//!     let resolver = OverlapResolver::new(&catalog, date);
//!     for tile in grid.tiles() {
//!         match resolver.resolve(tile, grid.crs())? {
//!             Overlap::Empty => println!("{} {date}: no quads", tile.id),
//!             Overlap::Single(quad) => println!("{} {date}: {}", tile.id, quad.file),
//!             Overlap::Multiple(quads) => println!("{} {date}: {} quads", tile.id, quads.len()),
//!         }
//!     }
//! }
//! # Ok::<(), quadtiler_catalog::CatalogError>(())
//! ```

mod catalog;
mod error;
mod geojson;
mod geometry;
mod grid;
mod overlap;

pub use catalog::{derive_quad_file, QuadCatalog, QuadRecord};
pub use error::CatalogError;
pub use geometry::{Footprint, GeometryError, Point, Polygon};
pub use grid::{build_transform, Tile, TileGrid, TileId};
pub use overlap::{Overlap, OverlapResolver};

/// Result type for catalog operations.
pub type Result<T> = std::result::Result<T, CatalogError>;
