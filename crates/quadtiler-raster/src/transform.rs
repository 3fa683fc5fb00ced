//! Bounding boxes and six-coefficient affine pixel transforms.

use crate::{RasterError, Result};

/// Default destination resolution in CRS units per pixel.
pub const DEFAULT_RESOLUTION: f64 = 0.005 / 200.0;

/// Axis-aligned bounds in CRS units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    /// West edge.
    pub min_x: f64,
    /// South edge.
    pub min_y: f64,
    /// East edge.
    pub max_x: f64,
    /// North edge.
    pub max_y: f64,
}

impl Bounds {
    /// Create bounds from edges.
    pub const fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Bounds of a set of points, or `None` if there are no finite points.
    pub fn from_points<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = (f64, f64)>,
    {
        let mut bounds: Option<Self> = None;
        for (x, y) in points {
            if !x.is_finite() || !y.is_finite() {
                continue;
            }
            bounds = Some(match bounds {
                None => Self::new(x, y, x, y),
                Some(b) => Self::new(b.min_x.min(x), b.min_y.min(y), b.max_x.max(x), b.max_y.max(y)),
            });
        }
        bounds
    }

    /// Width in CRS units.
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    /// Height in CRS units.
    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Check if a coordinate is within the bounds (edges inclusive).
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    /// Check if two bounds overlap or touch.
    pub fn intersects(&self, other: &Bounds) -> bool {
        self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_y <= other.max_y
            && other.min_y <= self.max_y
    }

    /// Smallest bounds covering both.
    pub fn union(&self, other: &Bounds) -> Bounds {
        Bounds::new(
            self.min_x.min(other.min_x),
            self.min_y.min(other.min_y),
            self.max_x.max(other.max_x),
            self.max_y.max(other.max_y),
        )
    }
}

/// Affine mapping from pixel (column, row) space to CRS coordinates.
///
/// ```text
/// x = a * col + b * row + c
/// y = d * col + e * row + f
/// ```
///
/// `a` is the pixel width, `e` the pixel height (negative for north-up rasters),
/// `b`/`d` are rotation terms and `(c, f)` is the outer corner of pixel (0, 0).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineTransform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl AffineTransform {
    /// Create a transform from its six coefficients.
    pub const fn new(a: f64, b: f64, c: f64, d: f64, e: f64, f: f64) -> Self {
        Self { a, b, c, d, e, f }
    }

    /// North-up transform anchored at the top-left corner.
    pub fn from_origin(west: f64, north: f64, x_res: f64, y_res: f64) -> Self {
        Self::new(x_res, 0.0, west, 0.0, -y_res, north)
    }

    /// Destination transform for a tile: anchored at the west/north bound with
    /// square pixels of `resolution` units and no rotation.
    ///
    /// Fails with [`RasterError::InvalidGeometry`] when there are no bounds
    /// (empty geometry) or the resolution is not a positive finite number.
    pub fn for_bounds(bounds: Option<Bounds>, resolution: f64) -> Result<Self> {
        let bounds = bounds
            .ok_or_else(|| RasterError::InvalidGeometry("footprint has no bounds".to_string()))?;
        if !resolution.is_finite() || resolution <= 0.0 {
            return Err(RasterError::InvalidGeometry(format!(
                "resolution must be positive, got {resolution}"
            )));
        }
        if !bounds.min_x.is_finite() || !bounds.max_y.is_finite() {
            return Err(RasterError::InvalidGeometry(
                "footprint bounds are not finite".to_string(),
            ));
        }
        Ok(Self::from_origin(bounds.min_x, bounds.max_y, resolution, resolution))
    }

    /// The six coefficients in `(a, b, c, d, e, f)` order.
    pub fn coefficients(&self) -> [f64; 6] {
        [self.a, self.b, self.c, self.d, self.e, self.f]
    }

    /// Map pixel-space `(col, row)` to CRS `(x, y)`.
    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.a * col + self.b * row + self.c,
            self.d * col + self.e * row + self.f,
        )
    }

    /// The inverse mapping, from CRS coordinates to pixel space.
    pub fn inverse(&self) -> Result<AffineTransform> {
        let det = self.a * self.e - self.b * self.d;
        if det == 0.0 || !det.is_finite() {
            return Err(RasterError::SingularTransform);
        }
        let ia = self.e / det;
        let ib = -self.b / det;
        let id = -self.d / det;
        let ie = self.a / det;
        Ok(Self::new(
            ia,
            ib,
            -(ia * self.c + ib * self.f),
            id,
            ie,
            -(id * self.c + ie * self.f),
        ))
    }

    /// True when the transform has no rotation terms.
    pub fn is_rectilinear(&self) -> bool {
        self.b == 0.0 && self.d == 0.0
    }

    /// Absolute pixel size `(x, y)`.
    pub fn pixel_size(&self) -> (f64, f64) {
        (
            (self.a * self.a + self.d * self.d).sqrt(),
            (self.b * self.b + self.e * self.e).sqrt(),
        )
    }

    /// Bounds of a `width` x `height` raster under this transform.
    pub fn bounds(&self, width: usize, height: usize) -> Bounds {
        let (w, h) = (width as f64, height as f64);
        let corners = [
            self.apply(0.0, 0.0),
            self.apply(w, 0.0),
            self.apply(0.0, h),
            self.apply(w, h),
        ];
        Bounds::from_points(corners).unwrap_or(Bounds::new(self.c, self.f, self.c, self.f))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_for_bounds_anchors_north_west() {
        let bounds = Bounds::new(36.0, -1.5, 36.05, -1.45);
        let t = AffineTransform::for_bounds(Some(bounds), DEFAULT_RESOLUTION).unwrap();
        assert_eq!(t.coefficients(), [DEFAULT_RESOLUTION, 0.0, 36.0, 0.0, -DEFAULT_RESOLUTION, -1.45]);
    }

    #[test]
    fn test_for_bounds_is_bit_identical() {
        let bounds = Bounds::new(-17.123456789, 14.987654321, -17.073456789, 15.037654321);
        let first = AffineTransform::for_bounds(Some(bounds), DEFAULT_RESOLUTION).unwrap();
        let second = AffineTransform::for_bounds(Some(bounds), DEFAULT_RESOLUTION).unwrap();
        for (x, y) in first.coefficients().iter().zip(second.coefficients().iter()) {
            assert_eq!(x.to_bits(), y.to_bits());
        }
    }

    #[test]
    fn test_for_bounds_rejects_empty_and_bad_resolution() {
        assert!(matches!(
            AffineTransform::for_bounds(None, DEFAULT_RESOLUTION),
            Err(RasterError::InvalidGeometry(_))
        ));
        let bounds = Bounds::new(0.0, 0.0, 1.0, 1.0);
        assert!(AffineTransform::for_bounds(Some(bounds), 0.0).is_err());
        assert!(AffineTransform::for_bounds(Some(bounds), f64::NAN).is_err());
    }

    #[test]
    fn test_inverse_roundtrip() {
        let t = AffineTransform::new(0.5, 0.1, 100.0, 0.05, -0.5, 200.0);
        let inv = t.inverse().unwrap();
        let (x, y) = t.apply(12.0, 7.0);
        let (col, row) = inv.apply(x, y);
        assert_relative_eq!(col, 12.0, epsilon = 1e-9);
        assert_relative_eq!(row, 7.0, epsilon = 1e-9);
    }

    #[test]
    fn test_singular_inverse() {
        let t = AffineTransform::new(0.0, 0.0, 1.0, 0.0, 0.0, 1.0);
        assert!(matches!(t.inverse(), Err(RasterError::SingularTransform)));
    }

    #[test]
    fn test_raster_bounds() {
        let t = AffineTransform::from_origin(10.0, 20.0, 0.5, 0.25);
        let b = t.bounds(4, 8);
        assert_eq!(b, Bounds::new(10.0, 18.0, 12.0, 20.0));
    }

    #[test]
    fn test_bounds_intersects_touching() {
        let a = Bounds::new(0.0, 0.0, 1.0, 1.0);
        let b = Bounds::new(1.0, 0.0, 2.0, 1.0);
        let c = Bounds::new(1.5, 1.5, 2.0, 2.0);
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
        assert_eq!(a.union(&c), Bounds::new(0.0, 0.0, 2.0, 2.0));
    }
}
