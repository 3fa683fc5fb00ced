//! Output file naming and on-disk state of a unit's outputs.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Placeholder for the output directory.
pub const TILE_DIR_PLACEHOLDER: &str = "<tile_dir>";
/// Placeholder for the tile id.
pub const TILE_ID_PLACEHOLDER: &str = "<tile_id>";
/// Placeholder for the date token.
pub const DATE_PLACEHOLDER: &str = "<date>";

/// Suffix distinguishing the optimized file from the raw one.
const COG_SUFFIX: &str = "_cog.tif";
const TIF_EXTENSION: &str = ".tif";

/// Default output pattern.
pub const DEFAULT_PATTERN: &str = "<tile_dir>/<tile_id>_<date>.tif";

/// Problems with an output pattern.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    /// A placeholder that keeps outputs distinct is missing.
    #[error("output pattern '{pattern}' must contain {placeholder}")]
    MissingPlaceholder {
        /// The pattern.
        pattern: String,
        /// The missing placeholder.
        placeholder: &'static str,
    },
    /// The pattern does not name a `.tif` file.
    #[error("output pattern '{0}' must end in .tif")]
    NotTif(String),
}

/// Template for raw output paths, e.g. `<tile_dir>/<tile_id>_<date>.tif`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPattern {
    template: String,
}

impl OutputPattern {
    /// Parse a pattern. It must contain `<tile_id>` and `<date>` and end in `.tif`.
    pub fn new(template: impl Into<String>) -> Result<Self, PatternError> {
        let template = template.into();
        for placeholder in [TILE_ID_PLACEHOLDER, DATE_PLACEHOLDER] {
            if !template.contains(placeholder) {
                return Err(PatternError::MissingPlaceholder {
                    pattern: template,
                    placeholder,
                });
            }
        }
        if !template.ends_with(TIF_EXTENSION) {
            return Err(PatternError::NotTif(template));
        }
        Ok(Self { template })
    }

    /// The template string.
    pub fn as_str(&self) -> &str {
        &self.template
    }

    /// Substitute the placeholders literally.
    pub fn render(&self, tile_dir: &Path, tile_id: &str, date: &str) -> OutputPaths {
        let raw = self
            .template
            .replace(TILE_DIR_PLACEHOLDER, &tile_dir.to_string_lossy())
            .replace(TILE_ID_PLACEHOLDER, tile_id)
            .replace(DATE_PLACEHOLDER, date);
        OutputPaths::from_raw(PathBuf::from(raw))
    }
}

impl Default for OutputPattern {
    fn default() -> Self {
        Self {
            template: DEFAULT_PATTERN.to_string(),
        }
    }
}

/// What exists on disk for a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputState {
    /// Neither file.
    Missing,
    /// Only the raw file: an interrupted or failed earlier attempt.
    RawOnly,
    /// Only the optimized file: the unit is done.
    Optimized,
    /// Both files: done, with a raw file left behind.
    Both,
}

impl OutputState {
    /// True when the optimized output exists.
    pub fn is_done(&self) -> bool {
        matches!(self, OutputState::Optimized | OutputState::Both)
    }
}

/// Raw and optimized output paths of one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    /// Reprojected, uncompressed output.
    pub raw: PathBuf,
    /// Cloud-optimized output.
    pub cog: PathBuf,
}

impl OutputPaths {
    /// Derive the optimized path by replacing the trailing `.tif` with `_cog.tif`.
    pub fn from_raw(raw: PathBuf) -> Self {
        let text = raw.to_string_lossy();
        let stem = text.strip_suffix(TIF_EXTENSION).unwrap_or(&text);
        let cog = PathBuf::from(format!("{stem}{COG_SUFFIX}"));
        Self { raw, cog }
    }

    /// Inspect the filesystem.
    pub fn state(&self) -> OutputState {
        match (self.raw.exists(), self.cog.exists()) {
            (false, false) => OutputState::Missing,
            (true, false) => OutputState::RawOnly,
            (false, true) => OutputState::Optimized,
            (true, true) => OutputState::Both,
        }
    }
}
