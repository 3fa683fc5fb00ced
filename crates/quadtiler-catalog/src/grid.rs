//! Destination tile grid.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use quadtiler_raster::{AffineTransform, Crs, RasterError};
use tracing::debug;

use crate::geojson::FeatureCollection;
use crate::geometry::Footprint;
use crate::{CatalogError, Result};

/// Identifier of a destination tile.
///
/// Numeric ids are normalized to their integer form, so `12`, `12.0` and
/// `"12.0"` all become `"12"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileId(String);

impl TileId {
    /// Normalize a raw id.
    pub fn new(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed.parse::<f64>() {
            Ok(value) if value.is_finite() => Self(format!("{}", value.trunc() as i64)),
            _ => Self(trimmed.to_string()),
        }
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TileId {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// A cell of the destination grid.
#[derive(Debug, Clone, PartialEq)]
pub struct Tile {
    /// Tile id.
    pub id: TileId,
    /// Grid row, if the grid file carries one.
    pub row: Option<i64>,
    /// Grid column, if the grid file carries one.
    pub col: Option<i64>,
    /// Tile footprint in the grid CRS.
    pub footprint: Footprint,
}

impl Tile {
    /// Destination transform for this tile at `resolution` grid units per pixel.
    pub fn transform(&self, resolution: f64) -> std::result::Result<AffineTransform, RasterError> {
        build_transform(&self.footprint, resolution)
    }
}

/// Affine transform anchored at the north-west corner of `footprint`.
pub fn build_transform(
    footprint: &Footprint,
    resolution: f64,
) -> std::result::Result<AffineTransform, RasterError> {
    AffineTransform::for_bounds(footprint.bounds(), resolution)
}

/// The destination tiling scheme: tiles in file order plus their CRS.
#[derive(Debug, Clone)]
pub struct TileGrid {
    crs: Crs,
    tiles: Vec<Tile>,
}

impl TileGrid {
    /// Create a grid, rejecting duplicate tile ids.
    pub fn new(crs: Crs, tiles: Vec<Tile>) -> Result<Self> {
        let mut seen = HashSet::new();
        for tile in &tiles {
            if !seen.insert(tile.id.clone()) {
                return Err(CatalogError::DuplicateTile(tile.id.to_string()));
            }
        }
        Ok(Self { crs, tiles })
    }

    /// Load a grid from a GeoJSON file with a `tile` property per feature.
    pub fn from_geojson_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let grid = Self::from_collection(FeatureCollection::from_file(path.as_ref())?)?;
        debug!(path = %path.as_ref().display(), tiles = grid.len(), crs = %grid.crs, "Loaded tile grid");
        Ok(grid)
    }

    /// Load a grid from GeoJSON text.
    pub fn from_geojson_str(text: &str) -> Result<Self> {
        Self::from_collection(FeatureCollection::parse(text)?)
    }

    fn from_collection(collection: FeatureCollection) -> Result<Self> {
        let crs = collection.crs()?;
        let tiles = collection
            .features
            .iter()
            .enumerate()
            .map(|(index, feature)| {
                Ok(Tile {
                    id: TileId::new(&feature.required(index, "tile")?),
                    row: feature.integer("row"),
                    col: feature.integer("col"),
                    footprint: feature.footprint(index)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(crs, tiles)
    }

    /// Grid CRS.
    pub fn crs(&self) -> Crs {
        self.crs
    }

    /// Tiles in file order.
    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    /// Look up a tile by id.
    pub fn get(&self, id: &TileId) -> Option<&Tile> {
        self.tiles.iter().find(|t| &t.id == id)
    }

    /// Number of tiles.
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    /// True when the grid has no tiles.
    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }
}
