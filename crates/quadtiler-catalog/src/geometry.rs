//! Footprint polygons and exact intersection tests.
//!
//! Rings are stored open (the closing vertex of a GeoJSON ring is dropped).
//! Intersection is inclusive: polygons that only share a boundary point or
//! edge intersect. Holes are respected.

use quadtiler_raster::{Bounds, CoordTransformer, RasterError};
use thiserror::Error;

/// A 2D point `[x, y]` in CRS units.
pub type Point = [f64; 2];

/// Reasons a ring cannot form a polygon.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    /// Fewer than three distinct vertices.
    #[error("ring has {0} vertices, at least 3 are required")]
    TooFewVertices(usize),
    /// A coordinate is NaN or infinite.
    #[error("ring has a non-finite coordinate")]
    NonFinite,
    /// A coordinate position has fewer than two values.
    #[error("coordinate has {0} values, expected at least 2")]
    ShortPosition(usize),
}

/// A polygon with an exterior ring and optional holes.
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    exterior: Vec<Point>,
    holes: Vec<Vec<Point>>,
}

impl Polygon {
    /// Create a polygon, dropping a repeated closing vertex on each ring.
    pub fn new(exterior: Vec<Point>, holes: Vec<Vec<Point>>) -> Result<Self, GeometryError> {
        let exterior = open_ring(exterior)?;
        let holes = holes
            .into_iter()
            .map(open_ring)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { exterior, holes })
    }

    /// Axis-aligned rectangle polygon.
    pub fn rectangle(bounds: Bounds) -> Self {
        Self {
            exterior: vec![
                [bounds.min_x, bounds.min_y],
                [bounds.max_x, bounds.min_y],
                [bounds.max_x, bounds.max_y],
                [bounds.min_x, bounds.max_y],
            ],
            holes: Vec::new(),
        }
    }

    /// Exterior ring vertices (open).
    pub fn exterior(&self) -> &[Point] {
        &self.exterior
    }

    /// Hole rings (open).
    pub fn holes(&self) -> &[Vec<Point>] {
        &self.holes
    }

    /// Bounds of the exterior ring.
    pub fn bounds(&self) -> Bounds {
        let points = self.exterior.iter().map(|p| (p[0], p[1]));
        Bounds::from_points(points).unwrap_or(Bounds::new(0.0, 0.0, 0.0, 0.0))
    }

    fn rings(&self) -> impl Iterator<Item = &[Point]> {
        std::iter::once(self.exterior.as_slice()).chain(self.holes.iter().map(Vec::as_slice))
    }

    fn edges(&self) -> impl Iterator<Item = (Point, Point)> + '_ {
        self.rings().flat_map(ring_edges)
    }

    /// Whether `p` lies in the polygon interior or on its boundary.
    pub fn contains_point(&self, p: Point) -> bool {
        if self.edges().any(|(a, b)| on_segment(a, b, p)) {
            return true;
        }
        point_in_ring(&self.exterior, p) && !self.holes.iter().any(|h| point_in_ring(h, p))
    }

    /// Inclusive polygon intersection test.
    pub fn intersects(&self, other: &Polygon) -> bool {
        if !self.bounds().intersects(&other.bounds()) {
            return false;
        }

        // Any boundary crossing or contact
        for (a1, a2) in self.edges() {
            for (b1, b2) in other.edges() {
                if segments_intersect(a1, a2, b1, b2) {
                    return true;
                }
            }
        }

        // No boundary contact: one is inside the other, or they are disjoint
        other.contains_point(self.exterior[0]) || self.contains_point(other.exterior[0])
    }

    /// Insert `segments - 1` evenly spaced vertices on every edge.
    pub fn densify(&self, segments: usize) -> Polygon {
        let segments = segments.max(1);
        let densify_ring = |ring: &[Point]| -> Vec<Point> {
            let mut out = Vec::with_capacity(ring.len() * segments);
            for (a, b) in ring_edges(ring) {
                for k in 0..segments {
                    let t = k as f64 / segments as f64;
                    out.push([a[0] + (b[0] - a[0]) * t, a[1] + (b[1] - a[1]) * t]);
                }
            }
            out
        };
        Polygon {
            exterior: densify_ring(&self.exterior),
            holes: self.holes.iter().map(|h| densify_ring(h)).collect(),
        }
    }

    /// Transform every vertex.
    pub fn reproject(&self, transformer: &CoordTransformer) -> Result<Polygon, RasterError> {
        let map_ring = |ring: &[Point]| -> Result<Vec<Point>, RasterError> {
            ring.iter()
                .map(|p| transformer.transform(p[0], p[1]).map(|(x, y)| [x, y]))
                .collect()
        };
        Ok(Polygon {
            exterior: map_ring(&self.exterior)?,
            holes: self
                .holes
                .iter()
                .map(|h| map_ring(h))
                .collect::<Result<Vec<_>, _>>()?,
        })
    }
}

/// The footprint of a quad or tile: one or more polygons.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Footprint {
    polygons: Vec<Polygon>,
}

impl Footprint {
    /// Create a footprint from polygons.
    pub fn new(polygons: Vec<Polygon>) -> Self {
        Self { polygons }
    }

    /// Rectangular footprint covering `bounds`.
    pub fn from_bounds(bounds: Bounds) -> Self {
        Self::new(vec![Polygon::rectangle(bounds)])
    }

    /// The polygons.
    pub fn polygons(&self) -> &[Polygon] {
        &self.polygons
    }

    /// True when there are no polygons.
    pub fn is_empty(&self) -> bool {
        self.polygons.is_empty()
    }

    /// Bounds of all polygons, or `None` for an empty footprint.
    pub fn bounds(&self) -> Option<Bounds> {
        self.polygons
            .iter()
            .map(Polygon::bounds)
            .reduce(|a, b| a.union(&b))
    }

    /// True if any polygon of `self` intersects any polygon of `other`.
    pub fn intersects(&self, other: &Footprint) -> bool {
        self.polygons
            .iter()
            .any(|a| other.polygons.iter().any(|b| a.intersects(b)))
    }

    /// Densify every polygon edge into `segments` pieces.
    pub fn densify(&self, segments: usize) -> Footprint {
        Footprint::new(self.polygons.iter().map(|p| p.densify(segments)).collect())
    }

    /// Transform every vertex into another CRS.
    pub fn reproject(&self, transformer: &CoordTransformer) -> Result<Footprint, RasterError> {
        if transformer.is_identity() {
            return Ok(self.clone());
        }
        Ok(Footprint::new(
            self.polygons
                .iter()
                .map(|p| p.reproject(transformer))
                .collect::<Result<Vec<_>, _>>()?,
        ))
    }
}

fn open_ring(mut ring: Vec<Point>) -> Result<Vec<Point>, GeometryError> {
    if ring.iter().flatten().any(|v| !v.is_finite()) {
        return Err(GeometryError::NonFinite);
    }
    if ring.len() > 1 && ring.first() == ring.last() {
        ring.pop();
    }
    if ring.len() < 3 {
        return Err(GeometryError::TooFewVertices(ring.len()));
    }
    Ok(ring)
}

fn ring_edges(ring: &[Point]) -> impl Iterator<Item = (Point, Point)> + '_ {
    let n = ring.len();
    (0..n).map(move |i| (ring[i], ring[(i + 1) % n]))
}

/// Sign of the cross product (b - a) x (c - a).
fn orientation(a: Point, b: Point, c: Point) -> i8 {
    let cross = (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0]);
    if cross > 0.0 {
        1
    } else if cross < 0.0 {
        -1
    } else {
        0
    }
}

/// `p` is collinear with and lies within the box of segment `ab`.
fn on_segment(a: Point, b: Point, p: Point) -> bool {
    orientation(a, b, p) == 0
        && p[0] >= a[0].min(b[0])
        && p[0] <= a[0].max(b[0])
        && p[1] >= a[1].min(b[1])
        && p[1] <= a[1].max(b[1])
}

/// Closed segment intersection, including touching and collinear overlap.
fn segments_intersect(p1: Point, p2: Point, q1: Point, q2: Point) -> bool {
    let o1 = orientation(p1, p2, q1);
    let o2 = orientation(p1, p2, q2);
    let o3 = orientation(q1, q2, p1);
    let o4 = orientation(q1, q2, p2);

    if o1 != o2 && o3 != o4 && o1 * o2 <= 0 && o3 * o4 <= 0 {
        return true;
    }
    on_segment(p1, p2, q1) || on_segment(p1, p2, q2) || on_segment(q1, q2, p1) || on_segment(q1, q2, p2)
}

/// Even-odd ray casting; boundary points are handled by the caller.
fn point_in_ring(ring: &[Point], p: Point) -> bool {
    let mut inside = false;
    for (a, b) in ring_edges(ring) {
        if (a[1] > p[1]) != (b[1] > p[1]) {
            let x = a[0] + (p[1] - a[1]) * (b[0] - a[0]) / (b[1] - a[1]);
            if p[0] < x {
                inside = !inside;
            }
        }
    }
    inside
}
