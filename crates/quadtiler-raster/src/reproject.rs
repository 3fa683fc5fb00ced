//! Warping a source raster onto a destination grid.
//!
//! Every destination pixel center is mapped into the destination CRS, then
//! into the source CRS and finally into source pixel space, where it is
//! sampled with a cubic convolution kernel. Exact coordinate transformation
//! is done on a coarse grid of nodes and interpolated bilinearly in between,
//! which keeps the projection library out of the parallel inner loop.

use std::path::Path;

use rayon::prelude::*;
use tracing::debug;

use crate::writer::Layout;
use crate::{AffineTransform, CoordTransformer, Crs, GeoRaster, RasterError, Result, SampleType};

/// Spacing in pixels between exactly transformed nodes.
const NODE_STEP: usize = 16;

/// Keys cubic convolution parameter.
const CUBIC_A: f64 = -0.5;

/// Rounds half to even and saturates into the `i16` range. NaN maps to 0.
///
/// This is the fixed conversion applied to every resampled value.
pub fn round_to_i16(value: f64) -> i16 {
    value.round_ties_even() as i16
}

/// Cubic convolution weight for distance `t` (Keys, a = -0.5).
fn cubic_weight(t: f64) -> f64 {
    let t = t.abs();
    if t <= 1.0 {
        ((CUBIC_A + 2.0) * t - (CUBIC_A + 3.0)) * t * t + 1.0
    } else if t < 2.0 {
        ((CUBIC_A * t - 5.0 * CUBIC_A) * t + 8.0 * CUBIC_A) * t - 4.0 * CUBIC_A
    } else {
        0.0
    }
}

/// Reprojects rasters onto a fixed destination grid.
#[derive(Debug, Clone)]
pub struct Reprojector {
    dst_transform: AffineTransform,
    width: usize,
    height: usize,
    bands: usize,
    dst_crs: Crs,
}

impl Reprojector {
    /// Create a reprojector writing `bands` bands into a `width` x `height`
    /// grid described by `dst_transform` in `dst_crs`.
    pub fn new(
        dst_transform: AffineTransform,
        width: usize,
        height: usize,
        bands: usize,
        dst_crs: Crs,
    ) -> Self {
        Self {
            dst_transform,
            width,
            height,
            bands,
            dst_crs,
        }
    }

    /// Destination transform.
    pub fn dst_transform(&self) -> AffineTransform {
        self.dst_transform
    }

    /// Destination CRS.
    pub fn dst_crs(&self) -> Crs {
        self.dst_crs
    }

    /// Warp the first `bands` bands of `source` onto the destination grid.
    ///
    /// The result is a 16-bit signed raster; destination pixels with no source
    /// coverage are 0.
    pub fn reproject(&self, source: &GeoRaster) -> Result<GeoRaster> {
        if self.width == 0 || self.height == 0 || self.bands == 0 {
            return Err(RasterError::InvalidData(format!(
                "destination grid {}x{}x{} is empty",
                self.width, self.height, self.bands
            )));
        }
        if source.bands() < self.bands {
            return Err(RasterError::BandOutOfRange {
                band: self.bands,
                available: source.bands(),
            });
        }

        let nodes = NodeGrid::build(self, source)?;
        debug!(
            src_crs = %source.crs(),
            dst_crs = %self.dst_crs,
            width = self.width,
            height = self.height,
            nodes = nodes.positions.len(),
            "Reprojecting"
        );

        let mut out = GeoRaster::new(
            self.width,
            self.height,
            self.bands,
            SampleType::I16,
            self.dst_transform,
            self.dst_crs,
        )
        .with_nodata(source.nodata());

        for band in 0..self.bands {
            let sampler = CubicSampler {
                raster: source,
                band: source.band(band),
            };
            out.band_mut(band)
                .par_chunks_mut(self.width)
                .enumerate()
                .for_each(|(row, pixels)| {
                    for (col, pixel) in pixels.iter_mut().enumerate() {
                        let (sc, sr) = nodes.source_position(col, row);
                        *pixel = match sampler.sample(sc, sr) {
                            Some(value) => round_to_i16(value) as f32,
                            None => 0.0,
                        };
                    }
                });
        }

        Ok(out)
    }

    /// Reproject `source` and write the result to `path` as a striped GeoTIFF.
    pub fn reproject_to_file(&self, source: &GeoRaster, path: &Path) -> Result<GeoRaster> {
        let out = self.reproject(source)?;
        write_raw(&out, path)?;
        Ok(out)
    }
}

/// Write an uncompressed, striped GeoTIFF.
pub fn write_raw(raster: &GeoRaster, path: &Path) -> Result<()> {
    raster.geotiff_writer().layout(Layout::default()).write(path)
}

/// Source pixel positions at node pixels, interpolated in between.
struct NodeGrid {
    cols: Vec<usize>,
    rows: Vec<usize>,
    /// Row-major `(col, row)` source pixel coordinates, NaN where untransformable.
    positions: Vec<(f64, f64)>,
}

impl NodeGrid {
    fn build(reprojector: &Reprojector, source: &GeoRaster) -> Result<Self> {
        let transformer = CoordTransformer::new(reprojector.dst_crs, source.crs())?;
        let to_source = source.transform().inverse()?;

        let cols = node_indices(reprojector.width);
        let rows = node_indices(reprojector.height);

        let mut positions = Vec::with_capacity(cols.len() * rows.len());
        for &row in &rows {
            for &col in &cols {
                let (x, y) = reprojector
                    .dst_transform
                    .apply(col as f64 + 0.5, row as f64 + 0.5);
                let position = match transformer.transform(x, y) {
                    Ok((sx, sy)) => to_source.apply(sx, sy),
                    Err(_) => (f64::NAN, f64::NAN),
                };
                positions.push(position);
            }
        }

        Ok(Self {
            cols,
            rows,
            positions,
        })
    }

    fn node(&self, i: usize, j: usize) -> (f64, f64) {
        self.positions[j * self.cols.len() + i]
    }

    /// Bilinear interpolation of the source position for destination pixel `(col, row)`.
    fn source_position(&self, col: usize, row: usize) -> (f64, f64) {
        let (i0, i1, tx) = bracket(&self.cols, col);
        let (j0, j1, ty) = bracket(&self.rows, row);

        let p00 = self.node(i0, j0);
        let p10 = self.node(i1, j0);
        let p01 = self.node(i0, j1);
        let p11 = self.node(i1, j1);

        let lerp = |a: f64, b: f64, t: f64| a + (b - a) * t;
        let top = (lerp(p00.0, p10.0, tx), lerp(p00.1, p10.1, tx));
        let bottom = (lerp(p01.0, p11.0, tx), lerp(p01.1, p11.1, tx));
        (lerp(top.0, bottom.0, ty), lerp(top.1, bottom.1, ty))
    }
}

/// Node pixel indices: every `NODE_STEP` pixels plus the last pixel.
fn node_indices(len: usize) -> Vec<usize> {
    let mut nodes: Vec<usize> = (0..len).step_by(NODE_STEP).collect();
    if nodes.last() != Some(&(len - 1)) {
        nodes.push(len - 1);
    }
    nodes
}

/// Surrounding node indices and interpolation weight for pixel `p`.
fn bracket(nodes: &[usize], p: usize) -> (usize, usize, f64) {
    if nodes.len() == 1 {
        return (0, 0, 0.0);
    }
    let i = (p / NODE_STEP).min(nodes.len() - 2);
    let (start, end) = (nodes[i], nodes[i + 1]);
    let t = (p - start) as f64 / (end - start) as f64;
    (i, i + 1, t)
}

struct CubicSampler<'a> {
    raster: &'a GeoRaster,
    band: &'a [f32],
}

impl CubicSampler<'_> {
    /// Cubic interpolation at continuous source pixel coordinates (pixel
    /// centers at `i + 0.5`).
    ///
    /// `None` when the nearest source pixel is outside the raster or no-data.
    /// Taps outside the raster or on no-data are dropped and the remaining
    /// weights renormalized.
    fn sample(&self, sc: f64, sr: f64) -> Option<f64> {
        if !sc.is_finite() || !sr.is_finite() || sc < 0.0 || sr < 0.0 {
            return None;
        }
        let (w, h) = (self.raster.width(), self.raster.height());
        let (nc, nr) = (sc.floor() as usize, sr.floor() as usize);
        if nc >= w || nr >= h {
            return None;
        }
        let nearest = self.band[nr * w + nc];
        if self.raster.is_nodata(nearest) {
            return None;
        }

        let x = sc - 0.5;
        let y = sr - 0.5;
        let (ix, iy) = (x.floor() as i64, y.floor() as i64);
        let (fx, fy) = (x - ix as f64, y - iy as f64);

        let mut sum = 0.0;
        let mut weight_sum = 0.0;
        for m in -1..=2i64 {
            let r = iy + m;
            if r < 0 || r >= h as i64 {
                continue;
            }
            let wy = cubic_weight(fy - m as f64);
            for n in -1..=2i64 {
                let c = ix + n;
                if c < 0 || c >= w as i64 {
                    continue;
                }
                let value = self.band[r as usize * w + c as usize];
                if self.raster.is_nodata(value) || !value.is_finite() {
                    continue;
                }
                let weight = wy * cubic_weight(fx - n as f64);
                sum += weight * value as f64;
                weight_sum += weight;
            }
        }

        if weight_sum.abs() < 1e-9 {
            return Some(nearest as f64);
        }
        Some(sum / weight_sum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_round_to_i16_half_to_even() {
        assert_eq!(round_to_i16(0.5), 0);
        assert_eq!(round_to_i16(1.5), 2);
        assert_eq!(round_to_i16(2.5), 2);
        assert_eq!(round_to_i16(-1.5), -2);
        assert_eq!(round_to_i16(1234.49), 1234);
    }

    #[test]
    fn test_round_to_i16_saturates() {
        assert_eq!(round_to_i16(40_000.0), i16::MAX);
        assert_eq!(round_to_i16(-40_000.0), i16::MIN);
        assert_eq!(round_to_i16(f64::NAN), 0);
    }

    #[test]
    fn test_cubic_weights() {
        assert_relative_eq!(cubic_weight(0.0), 1.0);
        assert_relative_eq!(cubic_weight(1.0), 0.0);
        assert_relative_eq!(cubic_weight(2.0), 0.0);
        // Weights of the four taps sum to one for any fractional offset
        for f in [0.0, 0.25, 0.5, 0.9] {
            let total: f64 = (-1..=2).map(|n| cubic_weight(f - n as f64)).sum();
            assert_relative_eq!(total, 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_node_indices_include_last() {
        assert_eq!(node_indices(1), vec![0]);
        assert_eq!(node_indices(16), vec![0, 15]);
        assert_eq!(node_indices(17), vec![0, 16]);
        assert_eq!(node_indices(40), vec![0, 16, 32, 39]);
    }

    #[test]
    fn test_bracket() {
        let nodes = node_indices(40);
        assert_eq!(bracket(&nodes, 0), (0, 1, 0.0));
        assert_eq!(bracket(&nodes, 8), (0, 1, 0.5));
        assert_eq!(bracket(&nodes, 39), (2, 3, 1.0));
        assert_eq!(bracket(&[0], 0), (0, 0, 0.0));
    }

    fn ramp(width: usize, height: usize) -> GeoRaster {
        let transform = AffineTransform::from_origin(10.0, 20.0, 0.01, 0.01);
        let data: Vec<f32> = (0..width * height).map(|i| (i % width) as f32 * 10.0).collect();
        GeoRaster::from_data(width, height, 1, SampleType::U16, transform, Crs::WGS84, data).unwrap()
    }

    #[test]
    fn test_identity_grid_preserves_values() {
        let source = ramp(8, 8);
        let reprojector = Reprojector::new(source.transform(), 8, 8, 1, Crs::WGS84);
        let out = reprojector.reproject(&source).unwrap();
        assert_eq!(out.sample_type(), SampleType::I16);
        assert_eq!(out.data(), source.data());
    }

    #[test]
    fn test_outside_source_is_zero() {
        let source = ramp(4, 4);
        // Destination grid shifted entirely east of the source
        let dst = AffineTransform::from_origin(11.0, 20.0, 0.01, 0.01);
        let out = Reprojector::new(dst, 4, 4, 1, Crs::WGS84)
            .reproject(&source)
            .unwrap();
        assert!(out.data().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_too_few_source_bands() {
        let source = ramp(4, 4);
        let result = Reprojector::new(source.transform(), 4, 4, 4, Crs::WGS84).reproject(&source);
        assert!(matches!(
            result,
            Err(RasterError::BandOutOfRange { band: 4, available: 1 })
        ));
    }
}
