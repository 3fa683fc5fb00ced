//! YAML configuration for a retiling run.
//!
//! ```yaml
//! retiler:
//!   quad_dir: /data/quads
//!   tile_dir: /data/tiles
//!   catalog: /data/quads/catalog.geojson
//!   grid: /data/grid.geojson
//!   dates: ["2022-06", "2022-06_2022-08"]
//!   dst_crs: "EPSG:4326"
//!   workers: 8
//!   mosaic: spooled
//!   codec:
//!     backend: rio
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use quadtiler_catalog::{CatalogError, QuadCatalog, TileGrid};
use quadtiler_raster::{Crs, MosaicMode, RasterError, DEFAULT_RESOLUTION};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::codec::{CogCodec, NativeCog, RioCogeo, DEFAULT_COG_TILE_SIZE};
use crate::naming::{OutputPattern, PatternError, DEFAULT_PATTERN};
use crate::orchestrator::{RetileSettings, DEFAULT_BANDS, DEFAULT_COG_BANDS, DEFAULT_DST_SIZE};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// Config path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The file is not valid YAML for this schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// The destination CRS is unknown.
    #[error("invalid dst_crs: {0}")]
    Crs(#[source] RasterError),

    /// The output pattern is unusable.
    #[error(transparent)]
    Pattern(#[from] PatternError),

    /// A value is out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// How multi-quad mosaics are held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MosaicSetting {
    /// In memory only.
    InMemory,
    /// Written to a temporary file and read back.
    #[default]
    Spooled,
}

/// Codec backend selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum CodecConfig {
    /// External `rio cogeo`.
    Rio {
        /// Executable to run.
        #[serde(default = "default_rio_program")]
        program: PathBuf,
    },
    /// In-process tiled GeoTIFF writer.
    Native {
        /// Internal tile edge in pixels.
        #[serde(default = "default_cog_tile_size")]
        tile_size: u32,
    },
}

impl Default for CodecConfig {
    fn default() -> Self {
        CodecConfig::Rio {
            program: default_rio_program(),
        }
    }
}

impl CodecConfig {
    /// Build the configured codec.
    pub fn build(&self) -> Box<dyn CogCodec> {
        match self {
            CodecConfig::Rio { program } => Box::new(RioCogeo::with_program(program.clone())),
            CodecConfig::Native { tile_size } => Box::new(NativeCog::with_tile_size(*tile_size)),
        }
    }
}

fn default_rio_program() -> PathBuf {
    PathBuf::from("rio")
}

fn default_cog_tile_size() -> u32 {
    DEFAULT_COG_TILE_SIZE
}

fn default_dst_size() -> usize {
    DEFAULT_DST_SIZE
}

fn default_bands() -> usize {
    DEFAULT_BANDS
}

fn default_dst_crs() -> String {
    Crs::WGS84.to_string()
}

fn default_pattern() -> String {
    DEFAULT_PATTERN.to_string()
}

fn default_workers() -> usize {
    1
}

fn default_resolution() -> f64 {
    DEFAULT_RESOLUTION
}

fn default_cog_bands() -> Vec<usize> {
    DEFAULT_COG_BANDS.to_vec()
}

/// The `retiler:` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetileConfig {
    /// Directory holding the quad files.
    pub quad_dir: PathBuf,
    /// Output directory.
    pub tile_dir: PathBuf,
    /// Directory for spooled mosaics (default: `<tile_dir>/tmp`).
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
    /// Quad catalog GeoJSON.
    pub catalog: PathBuf,
    /// Destination tile grid GeoJSON.
    pub grid: PathBuf,
    /// Dates to process; empty means every catalog date.
    #[serde(default)]
    pub dates: Vec<String>,
    /// Destination width in pixels.
    #[serde(default = "default_dst_size")]
    pub dst_width: usize,
    /// Destination height in pixels.
    #[serde(default = "default_dst_size")]
    pub dst_height: usize,
    /// Bands in the raw output.
    #[serde(default = "default_bands")]
    pub bands: usize,
    /// Destination CRS identifier.
    #[serde(default = "default_dst_crs")]
    pub dst_crs: String,
    /// Output naming pattern.
    #[serde(default = "default_pattern")]
    pub output_pattern: String,
    /// Worker count.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Destination pixel size.
    #[serde(default = "default_resolution")]
    pub resolution: f64,
    /// Mosaic materialization.
    #[serde(default)]
    pub mosaic: MosaicSetting,
    /// Keep spooled mosaic files after use.
    #[serde(default)]
    pub keep_temp: bool,
    /// Codec backend.
    #[serde(default)]
    pub codec: CodecConfig,
    /// Bands kept in the optimized output.
    #[serde(default = "default_cog_bands")]
    pub cog_bands: Vec<usize>,
}

/// Top-level layout of the configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Retiler section.
    pub retiler: RetileConfig,
}

impl RetileConfig {
    /// Load the `retiler:` section of a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    /// Parse the `retiler:` section from YAML text.
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = serde_yaml::from_str(text)?;
        Ok(file.retiler)
    }

    /// Effective temp directory.
    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir
            .clone()
            .unwrap_or_else(|| self.tile_dir.join("tmp"))
    }

    /// Check values and convert into run settings.
    pub fn settings(&self) -> Result<RetileSettings, ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".to_string()));
        }
        if let CodecConfig::Native { tile_size } = self.codec {
            if tile_size == 0 || tile_size % 16 != 0 {
                return Err(ConfigError::Invalid(format!(
                    "codec tile_size {tile_size} must be a positive multiple of 16"
                )));
            }
        }

        let dst_crs = Crs::parse(&self.dst_crs).map_err(ConfigError::Crs)?;
        let output_pattern = OutputPattern::new(self.output_pattern.clone())?;
        let mosaic_mode = match self.mosaic {
            MosaicSetting::InMemory => MosaicMode::InMemory,
            MosaicSetting::Spooled => MosaicMode::Spooled {
                temp_dir: self.temp_dir(),
                keep: self.keep_temp,
            },
        };

        let settings = RetileSettings {
            quad_dir: self.quad_dir.clone(),
            tile_dir: self.tile_dir.clone(),
            dates: self.dates.clone(),
            dst_width: self.dst_width,
            dst_height: self.dst_height,
            bands: self.bands,
            dst_crs,
            output_pattern,
            workers: self.workers,
            resolution: self.resolution,
            mosaic_mode,
            cog_bands: self.cog_bands.clone(),
        };
        settings
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(settings)
    }

    /// Load the quad catalog.
    pub fn load_catalog(&self) -> Result<QuadCatalog, CatalogError> {
        QuadCatalog::from_geojson_file(&self.catalog)
    }

    /// Load the tile grid.
    pub fn load_grid(&self) -> Result<TileGrid, CatalogError> {
        TileGrid::from_geojson_file(&self.grid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
retiler:
  quad_dir: /data/quads
  tile_dir: /data/tiles
  catalog: /data/catalog.geojson
  grid: /data/grid.geojson
"#;

    #[test]
    fn test_defaults() {
        let config = RetileConfig::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.workers, 1);
        assert_eq!(config.dst_width, DEFAULT_DST_SIZE);
        assert_eq!(config.mosaic, MosaicSetting::Spooled);
        assert_eq!(config.codec, CodecConfig::default());
        assert_eq!(config.temp_dir(), PathBuf::from("/data/tiles/tmp"));

        let settings = config.settings().unwrap();
        assert_eq!(settings.dst_crs, Crs::WGS84);
        assert_eq!(settings.cog_bands, vec![1, 2, 3, 4]);
        assert_eq!(
            settings.mosaic_mode,
            MosaicMode::Spooled {
                temp_dir: PathBuf::from("/data/tiles/tmp"),
                keep: false
            }
        );
    }

    #[test]
    fn test_full_section() {
        let yaml = r#"
retiler:
  quad_dir: q
  tile_dir: t
  temp_dir: scratch
  catalog: c.geojson
  grid: g.geojson
  dates: ["2022-07", "2022-06"]
  dst_width: 256
  dst_height: 128
  bands: 3
  dst_crs: "EPSG:3857"
  output_pattern: "<tile_dir>/<date>/<tile_id>.tif"
  workers: 4
  resolution: 10.0
  mosaic: in_memory
  codec:
    backend: native
    tile_size: 256
  cog_bands: [3, 2, 1]
"#;
        let config = RetileConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.codec, CodecConfig::Native { tile_size: 256 });
        let settings = config.settings().unwrap();
        assert_eq!(settings.dates, vec!["2022-07", "2022-06"]);
        assert_eq!(settings.dst_crs, Crs::WEB_MERCATOR);
        assert_eq!(settings.mosaic_mode, MosaicMode::InMemory);
        assert_eq!(settings.workers, 4);
        assert_eq!(settings.output_pattern.as_str(), "<tile_dir>/<date>/<tile_id>.tif");
    }

    #[test]
    fn test_rejections() {
        let with = |extra: &str| RetileConfig::from_yaml(&format!("{MINIMAL}  {extra}\n")).unwrap();

        assert!(matches!(with("workers: 0").settings(), Err(ConfigError::Invalid(_))));
        assert!(matches!(with("dst_crs: \"EPSG:0\"").settings(), Err(ConfigError::Crs(_))));
        assert!(matches!(
            with("output_pattern: \"<tile_dir>/x.tif\"").settings(),
            Err(ConfigError::Pattern(_))
        ));
        assert!(matches!(with("cog_bands: [5]").settings(), Err(ConfigError::Invalid(_))));
        assert!(matches!(
            with("codec: {backend: native, tile_size: 100}").settings(),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let yaml = format!("{MINIMAL}  colour: blue\n");
        assert!(matches!(RetileConfig::from_yaml(&yaml), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            RetileConfig::from_file("/nonexistent/quadtiler.yaml"),
            Err(ConfigError::Read { .. })
        ));
    }
}
