//! Merging several overlapping source rasters into one.
//!
//! The mosaic grid covers the union of the source bounds at the first readable
//! source's resolution, band count, sample type, CRS and no-data value. Sources
//! are pasted in the order given and the first valid (non-no-data) value for a
//! pixel wins; later sources only fill pixels still empty.

use std::fs;
use std::path::{Path, PathBuf};

use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{debug, warn};

use crate::{AffineTransform, Bounds, GeoRaster, RasterError, RasterHeader, Result};

/// Length of the random token in spooled mosaic file names.
const SPOOL_TOKEN_LEN: usize = 16;

/// Where the merged raster lives while it is being consumed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MosaicMode {
    /// Keep the merged raster in memory only.
    #[default]
    InMemory,
    /// Write the merged raster to a uniquely named file in `temp_dir` and read
    /// it back from there.
    Spooled {
        /// Directory for the temporary file.
        temp_dir: PathBuf,
        /// Leave the file on disk when the mosaic is dropped.
        keep: bool,
    },
}

/// A source that was left out of the mosaic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedSource {
    /// Path of the source.
    pub path: PathBuf,
    /// Why it was skipped.
    pub reason: String,
}

/// Temporary mosaic file, removed on drop unless kept.
#[derive(Debug)]
struct SpoolFile {
    path: PathBuf,
    keep: bool,
}

impl Drop for SpoolFile {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "Failed to remove temporary mosaic");
            }
        }
    }
}

/// The result of merging sources.
#[derive(Debug)]
pub struct Mosaic {
    raster: GeoRaster,
    sources: Vec<PathBuf>,
    skipped: Vec<SkippedSource>,
    spool: Option<SpoolFile>,
}

impl Mosaic {
    /// The merged raster.
    pub fn raster(&self) -> &GeoRaster {
        &self.raster
    }

    /// Sources that contributed to the mosaic, in paste order.
    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    /// Sources that could not be used.
    pub fn skipped(&self) -> &[SkippedSource] {
        &self.skipped
    }

    /// Path of the spooled file, when the mosaic was spooled to disk.
    pub fn spool_path(&self) -> Option<&Path> {
        self.spool.as_ref().map(|s| s.path.as_path())
    }
}

/// Builds mosaics from lists of GeoTIFF paths.
#[derive(Debug, Clone, Default)]
pub struct MosaicBuilder {
    mode: MosaicMode,
}

impl MosaicBuilder {
    /// Create a builder with the given materialization mode.
    pub fn new(mode: MosaicMode) -> Self {
        Self { mode }
    }

    /// Materialization mode.
    pub fn mode(&self) -> &MosaicMode {
        &self.mode
    }

    /// Merge `paths` in order.
    ///
    /// Unreadable sources and sources whose band count or CRS differ from the
    /// first readable one are skipped and reported in [`Mosaic::skipped`].
    /// Fails with [`RasterError::NoReadableSources`] if nothing could be used.
    pub fn build(&self, paths: &[PathBuf]) -> Result<Mosaic> {
        let mut skipped = Vec::new();

        // Pass 1: headers only, to size the output grid
        let mut accepted: Vec<(PathBuf, RasterHeader)> = Vec::new();
        for path in paths {
            let header = match GeoRaster::read_header(path) {
                Ok(header) => header,
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "Skipping unreadable mosaic source");
                    skipped.push(SkippedSource {
                        path: path.clone(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            if let Some((_, first)) = accepted.first() {
                if let Some(reason) = incompatibility(first, &header) {
                    skipped.push(SkippedSource {
                        path: path.clone(),
                        reason,
                    });
                    continue;
                }
            }
            accepted.push((path.clone(), header));
        }

        let Some((_, reference)) = accepted.first() else {
            return Err(RasterError::NoReadableSources { count: paths.len() });
        };
        let reference = reference.clone();

        let union = accepted
            .iter()
            .map(|(_, h)| h.bounds())
            .reduce(|a, b| a.union(&b))
            .unwrap_or_else(|| reference.bounds());
        let (transform, width, height) = output_grid(&reference, &union);

        // Pass 2: paste each source in order
        let mut canvas: Option<Canvas> = None;
        let mut sources = Vec::new();
        for (path, _) in &accepted {
            let source = match GeoRaster::open(path) {
                Ok(source) if source.bands() == reference.bands => source,
                Ok(source) => {
                    skipped.push(SkippedSource {
                        path: path.clone(),
                        reason: format!(
                            "decoded {} bands, expected {}",
                            source.bands(),
                            reference.bands
                        ),
                    });
                    continue;
                }
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "Skipping undecodable mosaic source");
                    skipped.push(SkippedSource {
                        path: path.clone(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            let canvas = canvas.get_or_insert_with(|| {
                let raster = GeoRaster::new(
                    width,
                    height,
                    reference.bands,
                    source.sample_type(),
                    transform,
                    reference.crs,
                )
                .with_nodata(Some(reference.nodata.unwrap_or(0.0)));
                Canvas::new(raster)
            });
            canvas.paste(&source)?;
            sources.push(path.clone());
        }

        let Some(canvas) = canvas else {
            return Err(RasterError::NoReadableSources { count: paths.len() });
        };

        debug!(
            sources = sources.len(),
            skipped = skipped.len(),
            width,
            height,
            "Built mosaic"
        );

        match &self.mode {
            MosaicMode::InMemory => Ok(Mosaic {
                raster: canvas.raster,
                sources,
                skipped,
                spool: None,
            }),
            MosaicMode::Spooled { temp_dir, keep } => {
                fs::create_dir_all(temp_dir)?;
                let spool = SpoolFile {
                    path: temp_dir.join(spool_file_name()),
                    keep: *keep,
                };
                canvas.raster.write_geotiff(&spool.path)?;
                let raster = GeoRaster::open(&spool.path)?;
                Ok(Mosaic {
                    raster,
                    sources,
                    skipped,
                    spool: Some(spool),
                })
            }
        }
    }
}

/// Output raster initialised to its nodata value. A sample still holding
/// nodata is open for the next source.
struct Canvas {
    raster: GeoRaster,
}

impl Canvas {
    fn new(mut raster: GeoRaster) -> Self {
        let fill = raster.nodata().unwrap_or(0.0) as f32;
        for band in 0..raster.bands() {
            raster.band_mut(band).fill(fill);
        }
        Self { raster }
    }

    /// Nearest-neighbour paste of `source` onto the canvas, first valid value wins.
    fn paste(&mut self, source: &GeoRaster) -> Result<()> {
        let to_source = source.transform().inverse()?;
        let to_canvas = self.raster.transform().inverse()?;
        let (width, height) = (self.raster.width(), self.raster.height());

        // Canvas pixel window covered by the source
        let b = source.bounds();
        let corners = [
            to_canvas.apply(b.min_x, b.min_y),
            to_canvas.apply(b.max_x, b.max_y),
            to_canvas.apply(b.min_x, b.max_y),
            to_canvas.apply(b.max_x, b.min_y),
        ];
        let Some(window) = Bounds::from_points(corners) else {
            return Ok(());
        };
        let col_start = window.min_x.floor().max(0.0) as usize;
        let row_start = window.min_y.floor().max(0.0) as usize;
        let col_end = (window.max_x.ceil().max(0.0) as usize).min(width);
        let row_end = (window.max_y.ceil().max(0.0) as usize).min(height);

        let canvas_transform = self.raster.transform();
        for row in row_start..row_end {
            for col in col_start..col_end {
                let (x, y) = canvas_transform.apply(col as f64 + 0.5, row as f64 + 0.5);
                let (sc, sr) = to_source.apply(x, y);
                if sc < 0.0 || sr < 0.0 {
                    continue;
                }
                let (sc, sr) = (sc.floor() as usize, sr.floor() as usize);
                if sc >= source.width() || sr >= source.height() {
                    continue;
                }
                for band in 0..self.raster.bands() {
                    if !self.raster.is_nodata(self.raster.get(band, col, row)) {
                        continue;
                    }
                    let value = source.get(band, sc, sr);
                    if source.is_nodata(value) {
                        continue;
                    }
                    self.raster.set(band, col, row, value);
                }
            }
        }
        Ok(())
    }
}

fn incompatibility(first: &RasterHeader, other: &RasterHeader) -> Option<String> {
    if other.bands != first.bands {
        return Some(format!(
            "has {} bands, mosaic has {}",
            other.bands, first.bands
        ));
    }
    if other.crs != first.crs {
        return Some(format!("CRS {} differs from mosaic CRS {}", other.crs, first.crs));
    }
    None
}

/// North-up grid covering `union` at the reference resolution.
fn output_grid(reference: &RasterHeader, union: &Bounds) -> (AffineTransform, usize, usize) {
    let (x_res, y_res) = reference.transform.pixel_size();
    let width = ((union.width() / x_res).round() as usize).max(1);
    let height = ((union.height() / y_res).round() as usize).max(1);
    (
        AffineTransform::from_origin(union.min_x, union.max_y, x_res, y_res),
        width,
        height,
    )
}

fn spool_file_name() -> String {
    let token: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SPOOL_TOKEN_LEN)
        .map(char::from)
        .collect();
    format!("{token}_mosaic.tif")
}
