//! Finding the quads that overlap a destination tile.

use quadtiler_raster::{Bounds, CoordTransformer, Crs};
use rstar::{RTree, RTreeObject, AABB};
use tracing::trace;

use crate::catalog::{QuadCatalog, QuadRecord};
use crate::grid::Tile;
use crate::Result;

/// Edge subdivisions applied to tile footprints before reprojection, so that
/// straight edges stay close to their curved image in the catalog CRS.
const DENSIFY_SEGMENTS: usize = 8;

/// Quads overlapping one tile, in catalog order.
#[derive(Debug, Clone, PartialEq)]
pub enum Overlap<'a> {
    /// No quad intersects the tile.
    Empty,
    /// Exactly one quad; no mosaic needed.
    Single(&'a QuadRecord),
    /// Several quads; they must be mosaicked first.
    Multiple(Vec<&'a QuadRecord>),
}

impl<'a> Overlap<'a> {
    fn from_records(mut records: Vec<&'a QuadRecord>) -> Self {
        match records.len() {
            0 => Overlap::Empty,
            1 => Overlap::Single(records.remove(0)),
            _ => Overlap::Multiple(records),
        }
    }

    /// The overlapping records.
    pub fn records(&self) -> Vec<&'a QuadRecord> {
        match self {
            Overlap::Empty => Vec::new(),
            Overlap::Single(record) => vec![*record],
            Overlap::Multiple(records) => records.clone(),
        }
    }

    /// Number of overlapping records.
    pub fn len(&self) -> usize {
        match self {
            Overlap::Empty => 0,
            Overlap::Single(_) => 1,
            Overlap::Multiple(records) => records.len(),
        }
    }

    /// True when no quad overlaps.
    pub fn is_empty(&self) -> bool {
        matches!(self, Overlap::Empty)
    }
}

/// Envelope of one catalog record, keyed by its catalog position.
struct QuadBox {
    index: usize,
    env: AABB<[f64; 2]>,
}

impl RTreeObject for QuadBox {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.env
    }
}

fn envelope(bounds: &Bounds) -> AABB<[f64; 2]> {
    AABB::from_corners([bounds.min_x, bounds.min_y], [bounds.max_x, bounds.max_y])
}

/// Spatial index over one date's quads.
pub struct OverlapResolver<'a> {
    catalog: &'a QuadCatalog,
    date: String,
    tree: RTree<QuadBox>,
}

impl<'a> OverlapResolver<'a> {
    /// Index the quads of `date`.
    pub fn new(catalog: &'a QuadCatalog, date: &str) -> Self {
        let boxes = catalog
            .for_date(date)
            .filter_map(|(index, record)| {
                record.footprint.bounds().map(|b| QuadBox {
                    index,
                    env: envelope(&b),
                })
            })
            .collect();
        Self {
            catalog,
            date: date.to_string(),
            tree: RTree::bulk_load(boxes),
        }
    }

    /// Date this resolver indexes.
    pub fn date(&self) -> &str {
        &self.date
    }

    /// Number of indexed quads.
    pub fn len(&self) -> usize {
        self.tree.size()
    }

    /// True when the date has no quads.
    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Quads whose footprint intersects the tile footprint (given in
    /// `tile_crs`), boundary contact included, in catalog order.
    ///
    /// Fails only when the tile cannot be transformed into the catalog CRS.
    pub fn resolve(&self, tile: &Tile, tile_crs: Crs) -> Result<Overlap<'a>> {
        let transformer = CoordTransformer::new(tile_crs, self.catalog.crs())?;
        let footprint = if transformer.is_identity() {
            tile.footprint.clone()
        } else {
            tile.footprint
                .densify(DENSIFY_SEGMENTS)
                .reproject(&transformer)?
        };

        let Some(bounds) = footprint.bounds() else {
            return Ok(Overlap::Empty);
        };

        let mut candidates: Vec<usize> = self
            .tree
            .locate_in_envelope_intersecting(&envelope(&bounds))
            .map(|b| b.index)
            .collect();
        candidates.sort_unstable();

        let records = self.catalog.records();
        let matches: Vec<&'a QuadRecord> = candidates
            .into_iter()
            .map(|index| &records[index])
            .filter(|record| record.footprint.intersects(&footprint))
            .collect();

        trace!(
            tile = %tile.id,
            date = %self.date,
            quads = matches.len(),
            "Resolved overlap"
        );
        Ok(Overlap::from_records(matches))
    }
}
