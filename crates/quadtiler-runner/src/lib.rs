//! Parallel, resumable retiling of basemap quads onto a destination tile grid.
//!
//! [`Retiler`] takes a [`QuadCatalog`](quadtiler_catalog::QuadCatalog) and a
//! [`TileGrid`](quadtiler_catalog::TileGrid) and produces one cloud-optimized
//! GeoTIFF per tile per date. Per-unit failures end up in the returned
//! [`RetileReport`]; rerunning the same configuration only redoes the units
//! without an optimized output.
//!
//! # Example
//!
//! ```no_run
//! use quadtiler_catalog::{QuadCatalog, TileGrid};
//! use quadtiler_runner::{NativeCog, RetileSettings, Retiler};
//!
//! let catalog = QuadCatalog::from_geojson_file("quads.geojson")?;
//! let grid = TileGrid::from_geojson_file("grid.geojson")?;
//! let settings = RetileSettings {
//!     workers: 4,
//!     ..RetileSettings::new("quads", "tiles")
//! };
//! let report = Retiler::new(settings, NativeCog::new()).run(&catalog, &grid)?;
//! for error in &report.errors {
//!     println!("{} {} {}", error.tile, error.date, error.kind);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod codec;
mod config;
mod finalize;
mod ledger;
mod naming;
mod orchestrator;
mod pool;
mod progress;

pub use codec::{band_list, CodecError, CogCodec, NativeCog, RioCogeo, Validation, DEFAULT_COG_TILE_SIZE};
pub use config::{CodecConfig, ConfigError, ConfigFile, MosaicSetting, RetileConfig};
pub use finalize::{FinalizeError, Finalized, Finalizer};
pub use ledger::{ErrorKind, ErrorLedger, ErrorRecord};
pub use naming::{
    OutputPaths, OutputPattern, OutputState, PatternError, DATE_PLACEHOLDER, DEFAULT_PATTERN,
    TILE_DIR_PLACEHOLDER, TILE_ID_PLACEHOLDER,
};
pub use orchestrator::{
    RetileError, RetileReport, RetileSettings, Retiler, SourceMode, UnitDescriptor, UnitOutcome,
    UnitReport, UnitState, DEFAULT_BANDS, DEFAULT_COG_BANDS, DEFAULT_DST_SIZE,
};
pub use pool::WorkerPool;
pub use progress::{Progress, ProgressCallback, ProgressCounts};
