//! Producing and checking the cloud-optimized output of a unit.
//!
//! The retiler only needs two operations from a codec: turn a raw GeoTIFF
//! into a cloud-optimized one, and check the result. [`RioCogeo`] shells out
//! to `rio cogeo`; [`NativeCog`] writes tiled GeoTIFFs with overviews itself.

use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use quadtiler_raster::{GeoRaster, Layout, RasterError, TiffLayout};
use thiserror::Error;
use tracing::debug;

/// Errors raised by a codec.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The external tool could not be started.
    #[error("failed to run {program}: {source}")]
    Spawn {
        /// Program name.
        program: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The external tool exited unsuccessfully.
    #[error("{program} exited with {status}: {summary}")]
    Failed {
        /// Program name.
        program: String,
        /// Exit status description.
        status: String,
        /// Last diagnostic line.
        summary: String,
    },

    /// Raster error in the native backend.
    #[error(transparent)]
    Raster(#[from] RasterError),
}

/// Outcome of validating an optimized file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validation {
    /// Whether the file is a valid cloud-optimized GeoTIFF.
    pub valid: bool,
    /// One-line summary suitable for progress output.
    pub summary: String,
}

impl Validation {
    /// A passing validation.
    pub fn valid(summary: impl Into<String>) -> Self {
        Self {
            valid: true,
            summary: summary.into(),
        }
    }

    /// A failing validation.
    pub fn invalid(summary: impl Into<String>) -> Self {
        Self {
            valid: false,
            summary: summary.into(),
        }
    }
}

/// Converts raw rasters into cloud-optimized ones.
///
/// Implementations are shared across workers.
pub trait CogCodec: Send + Sync {
    /// Write an optimized copy of `raw` holding `bands` (1-based) to `cog`.
    /// Returns a one-line summary.
    fn create(&self, raw: &Path, cog: &Path, bands: &[usize]) -> Result<String, CodecError>;

    /// Check that `cog` is a valid cloud-optimized GeoTIFF.
    fn validate(&self, cog: &Path) -> Result<Validation, CodecError>;
}

impl<T: CogCodec + ?Sized> CogCodec for Box<T> {
    fn create(&self, raw: &Path, cog: &Path, bands: &[usize]) -> Result<String, CodecError> {
        (**self).create(raw, cog, bands)
    }

    fn validate(&self, cog: &Path) -> Result<Validation, CodecError> {
        (**self).validate(cog)
    }
}

/// Codec that runs the `rio cogeo` command line tool.
#[derive(Debug, Clone)]
pub struct RioCogeo {
    program: PathBuf,
}

impl RioCogeo {
    /// Use `rio` from `PATH`.
    pub fn new() -> Self {
        Self::with_program("rio")
    }

    /// Use a specific executable.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// The executable invoked.
    pub fn program(&self) -> &Path {
        &self.program
    }

    fn run(&self, args: &[&std::ffi::OsStr]) -> Result<Output, CodecError> {
        debug!(program = %self.program.display(), ?args, "Running codec");
        Command::new(&self.program)
            .args(args)
            .output()
            .map_err(|source| CodecError::Spawn {
                program: self.program.display().to_string(),
                source,
            })
    }
}

impl Default for RioCogeo {
    fn default() -> Self {
        Self::new()
    }
}

/// Comma-separated band list, e.g. `1,2,3,4`.
pub fn band_list(bands: &[usize]) -> String {
    bands
        .iter()
        .map(|b| b.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn last_line(text: &[u8]) -> String {
    String::from_utf8_lossy(text)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .unwrap_or_default()
        .to_string()
}

fn first_line(text: &[u8]) -> String {
    String::from_utf8_lossy(text)
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default()
        .to_string()
}

impl CogCodec for RioCogeo {
    fn create(&self, raw: &Path, cog: &Path, bands: &[usize]) -> Result<String, CodecError> {
        let list = band_list(bands);
        let output = self.run(&[
            "cogeo".as_ref(),
            "create".as_ref(),
            "-b".as_ref(),
            list.as_ref(),
            raw.as_os_str(),
            cog.as_os_str(),
        ])?;
        let summary = last_line(&output.stderr);
        if !output.status.success() {
            return Err(CodecError::Failed {
                program: self.program.display().to_string(),
                status: output.status.to_string(),
                summary,
            });
        }
        Ok(summary)
    }

    fn validate(&self, cog: &Path) -> Result<Validation, CodecError> {
        let output = self.run(&["cogeo".as_ref(), "validate".as_ref(), cog.as_os_str()])?;
        let mut summary = first_line(&output.stdout);
        if summary.is_empty() {
            summary = last_line(&output.stderr);
        }
        // rio reports an invalid file on stdout and still exits with status 1
        let valid = output.status.success() && !summary.contains("is NOT a valid");
        Ok(Validation { valid, summary })
    }
}

/// Default internal tile edge of [`NativeCog`].
pub const DEFAULT_COG_TILE_SIZE: u32 = 512;

/// In-process codec writing internally tiled GeoTIFFs with 2x overviews.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeCog {
    tile_size: u32,
}

impl NativeCog {
    /// Codec with the default tile size.
    pub fn new() -> Self {
        Self {
            tile_size: DEFAULT_COG_TILE_SIZE,
        }
    }

    /// Override the internal tile edge (a positive multiple of 16).
    pub fn with_tile_size(tile_size: u32) -> Self {
        Self { tile_size }
    }

    /// Internal tile edge.
    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }
}

impl Default for NativeCog {
    fn default() -> Self {
        Self::new()
    }
}

impl CogCodec for NativeCog {
    fn create(&self, raw: &Path, cog: &Path, bands: &[usize]) -> Result<String, CodecError> {
        let raster = GeoRaster::open(raw)?;
        let selected = raster.select_bands(bands)?;
        selected
            .geotiff_writer()
            .layout(Layout::Tiled {
                tile_size: self.tile_size,
                overviews: true,
            })
            .write(cog)?;
        Ok(format!(
            "Writing output to: {} ({}x{}, {} bands, {}px tiles)",
            cog.display(),
            selected.width(),
            selected.height(),
            selected.bands(),
            self.tile_size
        ))
    }

    fn validate(&self, cog: &Path) -> Result<Validation, CodecError> {
        let layout = match TiffLayout::inspect(cog) {
            Ok(layout) => layout,
            Err(e) => {
                return Ok(Validation::invalid(format!(
                    "{} is NOT a valid cloud optimized GeoTIFF: {e}",
                    cog.display()
                )))
            }
        };
        let problems = layout.cloud_optimized_problems();
        if problems.is_empty() {
            Ok(Validation::valid(format!(
                "{} is a valid cloud optimized GeoTIFF",
                cog.display()
            )))
        } else {
            Ok(Validation::invalid(format!(
                "{} is NOT a valid cloud optimized GeoTIFF: {}",
                cog.display(),
                problems.join("; ")
            )))
        }
    }
}
