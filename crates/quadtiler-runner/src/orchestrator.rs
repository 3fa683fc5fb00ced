//! Driving a full retiling run: every tile of the grid for every date.
//!
//! A run is split into units, one per (tile, date). Units of one date are
//! fanned out over a [`WorkerPool`]; each walks the same sequence:
//!
//! 1. Resume check: an existing optimized output means the unit is done,
//!    a lone raw output is stale and gets removed.
//! 2. Overlap: find the catalog quads intersecting the tile.
//! 3. Sources: open the single quad directly, or mosaic several.
//! 4. Reprojection onto the tile grid, written as the raw output.
//! 5. Finalization into the cloud-optimized output.
//!
//! Failures are recorded in the [`ErrorLedger`] and never stop other units.
//! Only the structural checks made before any work can fail the run.

use std::any::Any;
use std::cell::Cell;
use std::fmt;
use std::fs;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::time::Instant;

use quadtiler_catalog::{
    CatalogError, Overlap, OverlapResolver, QuadCatalog, Tile, TileGrid,
};
use quadtiler_metrics::{metric_defs, UnitLabels};
use quadtiler_raster::{
    CoordTransformer, Crs, GeoRaster, MosaicBuilder, MosaicMode, RasterError, Reprojector,
    DEFAULT_RESOLUTION,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, info_span, trace, warn};

use crate::codec::CogCodec;
use crate::finalize::{remove_if_exists, FinalizeError, Finalizer};
use crate::ledger::{ErrorKind, ErrorLedger, ErrorRecord};
use crate::naming::{OutputPaths, OutputPattern, OutputState};
use crate::pool::WorkerPool;
use crate::progress::Progress;

/// Default destination tile edge in pixels.
pub const DEFAULT_DST_SIZE: usize = 2000;
/// Default number of bands written to the raw output.
pub const DEFAULT_BANDS: usize = 4;
/// Default bands kept in the optimized output.
pub const DEFAULT_COG_BANDS: [usize; 4] = [1, 2, 3, 4];

/// Structural failures detected before any unit runs.
#[derive(Debug, Error)]
pub enum RetileError {
    /// Settings are unusable.
    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    /// The tile grid has no tiles.
    #[error("tile grid is empty")]
    EmptyGrid,

    /// Coordinates cannot be transformed between two CRSs used by the run.
    #[error("cannot transform {from} to {to}: {source}")]
    Crs {
        /// Source CRS.
        from: Crs,
        /// Target CRS.
        to: Crs,
        /// Underlying error.
        #[source]
        source: RasterError,
    },

    /// A working directory cannot be created.
    #[error("cannot create directory {path}: {source}")]
    Directory {
        /// Directory path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The catalog or grid could not be loaded.
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// Parameters of a retiling run.
#[derive(Debug, Clone, PartialEq)]
pub struct RetileSettings {
    /// Directory holding the quad files.
    pub quad_dir: PathBuf,
    /// Directory substituted for `<tile_dir>` in the output pattern.
    pub tile_dir: PathBuf,
    /// Dates to process, in order. Empty means every catalog date.
    pub dates: Vec<String>,
    /// Destination width in pixels.
    pub dst_width: usize,
    /// Destination height in pixels.
    pub dst_height: usize,
    /// Bands written to the raw output.
    pub bands: usize,
    /// Destination CRS.
    pub dst_crs: Crs,
    /// Output naming pattern.
    pub output_pattern: OutputPattern,
    /// Worker count (1 runs serially).
    pub workers: usize,
    /// Destination pixel size.
    pub resolution: f64,
    /// How mosaics are materialized.
    pub mosaic_mode: MosaicMode,
    /// Bands (1-based) kept in the optimized output.
    pub cog_bands: Vec<usize>,
}

impl RetileSettings {
    /// Settings with defaults for everything but the directories.
    pub fn new(quad_dir: impl Into<PathBuf>, tile_dir: impl Into<PathBuf>) -> Self {
        Self {
            quad_dir: quad_dir.into(),
            tile_dir: tile_dir.into(),
            dates: Vec::new(),
            dst_width: DEFAULT_DST_SIZE,
            dst_height: DEFAULT_DST_SIZE,
            bands: DEFAULT_BANDS,
            dst_crs: Crs::WGS84,
            output_pattern: OutputPattern::default(),
            workers: 1,
            resolution: DEFAULT_RESOLUTION,
            mosaic_mode: MosaicMode::InMemory,
            cog_bands: DEFAULT_COG_BANDS.to_vec(),
        }
    }

    /// Check values that do not depend on the inputs.
    pub fn validate(&self) -> Result<(), RetileError> {
        if self.dst_width == 0 || self.dst_height == 0 {
            return Err(RetileError::InvalidSettings(format!(
                "destination size {}x{} must be positive",
                self.dst_width, self.dst_height
            )));
        }
        if self.bands == 0 {
            return Err(RetileError::InvalidSettings(
                "band count must be positive".to_string(),
            ));
        }
        if self.workers == 0 {
            return Err(RetileError::InvalidSettings(
                "worker count must be at least 1".to_string(),
            ));
        }
        if !self.resolution.is_finite() || self.resolution <= 0.0 {
            return Err(RetileError::InvalidSettings(format!(
                "resolution {} must be positive",
                self.resolution
            )));
        }
        if self.cog_bands.is_empty() {
            return Err(RetileError::InvalidSettings(
                "no bands selected for the optimized output".to_string(),
            ));
        }
        if let Some(band) = self
            .cog_bands
            .iter()
            .find(|&&b| b == 0 || b > self.bands)
        {
            return Err(RetileError::InvalidSettings(format!(
                "optimized band {band} outside 1..={}",
                self.bands
            )));
        }
        Ok(())
    }
}

/// How a unit's source raster was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceMode {
    /// A single quad opened as is.
    Direct,
    /// Several quads merged first.
    Mosaic,
}

impl SourceMode {
    /// Label used in metrics and logs.
    pub const fn as_str(&self) -> &'static str {
        match self {
            SourceMode::Direct => "direct",
            SourceMode::Mosaic => "mosaic",
        }
    }
}

impl fmt::Display for SourceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage a unit is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    /// Not started.
    Pending,
    /// Optimized output already present.
    Skipped,
    /// Looking up overlapping quads.
    ResolvingOverlap,
    /// No quads overlap.
    Empty,
    /// Merging several quads.
    Mosaicking,
    /// Opening the single overlapping quad.
    Direct,
    /// Warping onto the tile grid.
    Reprojecting,
    /// Creating and validating the optimized output.
    Finalizing,
    /// Optimized output written and validated.
    Done,
}

/// Final outcome of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum UnitOutcome {
    /// Optimized output produced.
    Completed,
    /// Optimized output already existed.
    Skipped,
    /// No overlapping quads.
    Empty,
    /// The unit failed.
    Failed {
        /// Classification.
        kind: ErrorKind,
        /// Stage the failure happened in.
        stage: UnitState,
    },
}

/// One tile for one date, with its output paths.
#[derive(Debug, Clone)]
pub struct UnitDescriptor<'a> {
    /// Destination tile.
    pub tile: &'a Tile,
    /// Date token.
    pub date: &'a str,
    /// Output paths.
    pub paths: OutputPaths,
}

/// What happened to one unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitReport {
    /// Tile id.
    pub tile: String,
    /// Date token.
    pub date: String,
    /// Outcome.
    #[serde(flatten)]
    pub outcome: UnitOutcome,
    /// How sources were gathered, when the unit got that far.
    pub source_mode: Option<SourceMode>,
    /// Number of quads that overlapped the tile.
    pub quads: usize,
}

impl UnitReport {
    fn new(unit: &UnitDescriptor<'_>, outcome: UnitOutcome) -> Self {
        Self {
            tile: unit.tile.id.to_string(),
            date: unit.date.to_string(),
            outcome,
            source_mode: None,
            quads: 0,
        }
    }
}

/// Result of a run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RetileReport {
    /// Dates processed, in order.
    pub dates: Vec<String>,
    /// One report per unit, grouped by date in tile order.
    pub units: Vec<UnitReport>,
    /// Failures recorded during the run.
    pub errors: Vec<ErrorRecord>,
}

impl RetileReport {
    fn count(&self, pred: impl Fn(&UnitOutcome) -> bool) -> usize {
        self.units.iter().filter(|u| pred(&u.outcome)).count()
    }

    /// Units that produced an optimized output.
    pub fn completed(&self) -> usize {
        self.count(|o| matches!(o, UnitOutcome::Completed))
    }

    /// Units skipped as already done.
    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, UnitOutcome::Skipped))
    }

    /// Units without overlapping quads.
    pub fn empty(&self) -> usize {
        self.count(|o| matches!(o, UnitOutcome::Empty))
    }

    /// Units that failed.
    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, UnitOutcome::Failed { .. }))
    }

    /// Report for a tile and date.
    pub fn unit(&self, tile: &str, date: &str) -> Option<&UnitReport> {
        self.units.iter().find(|u| u.tile == tile && u.date == date)
    }
}

/// Shared per-date context handed to every unit.
struct DateContext<'r, 'c> {
    resolver: &'r OverlapResolver<'c>,
    grid_crs: Crs,
    ledger: &'r ErrorLedger,
}

/// Retiles a quad catalog onto a tile grid.
pub struct Retiler<C> {
    settings: RetileSettings,
    codec: C,
    progress: Progress,
}

impl<C: CogCodec> Retiler<C> {
    /// Retiler using `codec` for the optimized outputs.
    pub fn new(settings: RetileSettings, codec: C) -> Self {
        Self {
            settings,
            codec,
            progress: Progress::new(),
        }
    }

    /// Use a custom progress sink.
    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = progress;
        self
    }

    /// Run settings.
    pub fn settings(&self) -> &RetileSettings {
        &self.settings
    }

    /// Progress sink and counters.
    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    /// The codec.
    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// Process every tile of `grid` for every selected date.
    ///
    /// Fails only on structural problems found before any unit runs.
    pub fn run(&self, catalog: &QuadCatalog, grid: &TileGrid) -> Result<RetileReport, RetileError> {
        let dates = self.check(catalog, grid)?;
        let ledger = ErrorLedger::new();
        let pool = WorkerPool::new(self.settings.workers);
        metrics::gauge!(metric_defs::POOL_WORKERS.name).set(pool.size() as f64);

        let mut units = Vec::with_capacity(dates.len() * grid.len());
        for date in &dates {
            let _span = info_span!("date", date = %date).entered();
            self.progress.report(&format!("Processing for date: {date}"));

            let resolver = OverlapResolver::new(catalog, date);
            debug!(quads = resolver.len(), "Indexed quads");
            let context = DateContext {
                resolver: &resolver,
                grid_crs: grid.crs(),
                ledger: &ledger,
            };

            let descriptors: Vec<UnitDescriptor<'_>> = grid
                .tiles()
                .iter()
                .map(|tile| UnitDescriptor {
                    tile,
                    date,
                    paths: self.settings.output_pattern.render(
                        &self.settings.tile_dir,
                        tile.id.as_str(),
                        date,
                    ),
                })
                .collect();
            metrics::gauge!(metric_defs::DATE_UNITS.name, &UnitLabels::new(date.as_str()).to_labels())
                .set(descriptors.len() as f64);

            if pool.is_serial() {
                self.progress.report("Processing serial");
            } else {
                self.progress
                    .report(&format!("Processing job with {} cores", pool.size()));
            }

            let reports = pool.run(descriptors, |unit| self.run_unit_guarded(&unit, &context));
            units.extend(reports);

            self.progress
                .report(&format!("Completed processing tiles for {date}"));
        }
        self.progress.report("All processed");

        let report = RetileReport {
            dates,
            units,
            errors: ledger.into_records(),
        };
        info!(
            completed = report.completed(),
            skipped = report.skipped(),
            empty = report.empty(),
            failed = report.failed(),
            errors = report.errors.len(),
            "Retiling finished"
        );
        Ok(report)
    }

    /// Structural checks. Returns the dates to process.
    fn check(&self, catalog: &QuadCatalog, grid: &TileGrid) -> Result<Vec<String>, RetileError> {
        self.settings.validate()?;
        if grid.is_empty() {
            return Err(RetileError::EmptyGrid);
        }

        for (from, to) in [
            (grid.crs(), catalog.crs()),
            (self.settings.dst_crs, catalog.crs()),
        ] {
            CoordTransformer::new(from, to)
                .map_err(|source| RetileError::Crs { from, to, source })?;
        }
        if grid.crs() != self.settings.dst_crs {
            warn!(
                grid_crs = %grid.crs(),
                dst_crs = %self.settings.dst_crs,
                "Tile footprints are not in the destination CRS; transforms use grid coordinates"
            );
        }

        let mut dirs = vec![self.settings.tile_dir.clone()];
        if let MosaicMode::Spooled { temp_dir, .. } = &self.settings.mosaic_mode {
            dirs.push(temp_dir.clone());
        }
        for dir in dirs {
            fs::create_dir_all(&dir).map_err(|source| RetileError::Directory {
                path: dir.clone(),
                source,
            })?;
        }

        let dates = if self.settings.dates.is_empty() {
            catalog.dates().into_iter().map(str::to_string).collect()
        } else {
            self.settings.dates.clone()
        };
        Ok(dates)
    }

    /// Run one unit, turning a panic into a recorded failure.
    fn run_unit_guarded(&self, unit: &UnitDescriptor<'_>, ctx: &DateContext<'_, '_>) -> UnitReport {
        let stage = Cell::new(UnitState::Pending);
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.run_unit(unit, ctx, &stage)));
        match result {
            Ok(report) => report,
            Err(payload) => {
                let detail = panic_message(payload.as_ref());
                self.fail(unit, ctx, ErrorKind::Panic, stage.get(), detail)
            }
        }
    }

    fn run_unit(
        &self,
        unit: &UnitDescriptor<'_>,
        ctx: &DateContext<'_, '_>,
        stage: &Cell<UnitState>,
    ) -> UnitReport {
        let _span = info_span!("unit", tile = %unit.tile.id, date = unit.date).entered();
        let labels = UnitLabels::new(unit.date);
        let advance = |next: UnitState| {
            trace!(from = ?stage.get(), to = ?next, "Unit state");
            stage.set(next);
        };
        let tile_id = unit.tile.id.as_str();

        match unit.paths.state() {
            OutputState::Optimized | OutputState::Both => {
                if unit.paths.state() == OutputState::Both {
                    if let Err(e) = remove_if_exists(&unit.paths.raw) {
                        return self.fail(unit, ctx, ErrorKind::Io, stage.get(), e.to_string());
                    }
                    metrics::counter!(metric_defs::STALE_RAW_REMOVED.name, &labels.to_labels())
                        .increment(1);
                }
                advance(UnitState::Skipped);
                self.progress.report(&format!("...{tile_id} exists, skipped"));
                self.progress.unit_skipped();
                metrics::counter!(metric_defs::UNITS_SKIPPED.name, &labels.to_labels()).increment(1);
                return UnitReport::new(unit, UnitOutcome::Skipped);
            }
            OutputState::RawOnly => {
                debug!(raw = %unit.paths.raw.display(), "Removing stale raw output");
                if let Err(e) = remove_if_exists(&unit.paths.raw) {
                    return self.fail(unit, ctx, ErrorKind::Io, stage.get(), e.to_string());
                }
                metrics::counter!(metric_defs::STALE_RAW_REMOVED.name, &labels.to_labels())
                    .increment(1);
            }
            OutputState::Missing => {}
        }

        advance(UnitState::ResolvingOverlap);
        let overlap = match ctx.resolver.resolve(unit.tile, ctx.grid_crs) {
            Ok(overlap) => overlap,
            Err(e) => return self.fail(unit, ctx, ErrorKind::Overlap, stage.get(), e.to_string()),
        };
        let quads = overlap.len();
        if overlap.is_empty() {
            advance(UnitState::Empty);
            self.progress
                .report(&format!("...{tile_id} has no quads for {}", unit.date));
            ctx.ledger.record(ErrorRecord::new(
                tile_id,
                unit.date,
                ErrorKind::EmptyOverlap,
                format!("no catalog quad intersects tile {tile_id}"),
            ));
            self.progress.unit_empty();
            metrics::counter!(metric_defs::UNITS_EMPTY.name, &labels.to_labels()).increment(1);
            return UnitReport::new(unit, UnitOutcome::Empty);
        }

        let transform = match unit.tile.transform(self.settings.resolution) {
            Ok(transform) => transform,
            Err(e) => {
                return self.fail(unit, ctx, ErrorKind::InvalidGeometry, stage.get(), e.to_string())
            }
        };

        let source_paths: Vec<PathBuf> = overlap
            .records()
            .iter()
            .map(|record| record.path_in(&self.settings.quad_dir))
            .collect();

        self.progress
            .report(&format!("Processing tile {}", unit.paths.raw.display()));

        let (mode, raster, mosaic) = match overlap {
            Overlap::Single(_) => {
                advance(UnitState::Direct);
                let path = &source_paths[0];
                match GeoRaster::open(path) {
                    Ok(raster) => (SourceMode::Direct, Some(raster), None),
                    Err(e) => {
                        let kind = if path.exists() {
                            ErrorKind::UnreadableSource
                        } else {
                            self.progress
                                .report(&format!("..file not found: {}", path.display()));
                            ErrorKind::MissingSource
                        };
                        return self.fail_with_mode(
                            unit,
                            ctx,
                            kind,
                            stage.get(),
                            format!("{}: {e}", path.display()),
                            SourceMode::Direct,
                            quads,
                        );
                    }
                }
            }
            Overlap::Multiple(_) | Overlap::Empty => {
                advance(UnitState::Mosaicking);
                self.progress
                    .report(&format!("..mosaicking {} images", source_paths.len()));
                let builder = MosaicBuilder::new(self.settings.mosaic_mode.clone());
                match builder.build(&source_paths) {
                    Ok(mosaic) => {
                        for skipped in mosaic.skipped() {
                            self.progress
                                .report(&format!("..file not found: {}", skipped.path.display()));
                            ctx.ledger.record(ErrorRecord::new(
                                tile_id,
                                unit.date,
                                ErrorKind::MissingSource,
                                format!("{}: {}", skipped.path.display(), skipped.reason),
                            ));
                        }
                        metrics::counter!(metric_defs::MOSAICS_BUILT.name, &labels.to_labels())
                            .increment(1);
                        metrics::histogram!(metric_defs::MOSAIC_SOURCES.name, &labels.to_labels())
                            .record(mosaic.sources().len() as f64);
                        metrics::counter!(
                            metric_defs::MOSAIC_SKIPPED_SOURCES.name,
                            &labels.to_labels()
                        )
                        .increment(mosaic.skipped().len() as u64);
                        (SourceMode::Mosaic, None, Some(mosaic))
                    }
                    Err(e) => {
                        for path in source_paths.iter().filter(|p| !p.exists()) {
                            self.progress
                                .report(&format!("..file not found: {}", path.display()));
                            ctx.ledger.record(ErrorRecord::new(
                                tile_id,
                                unit.date,
                                ErrorKind::MissingSource,
                                path.display().to_string(),
                            ));
                        }
                        return self.fail_with_mode(
                            unit,
                            ctx,
                            ErrorKind::Mosaic,
                            stage.get(),
                            e.to_string(),
                            SourceMode::Mosaic,
                            quads,
                        );
                    }
                }
            }
        };
        let labels = labels.with_source_mode(mode.as_str());

        advance(UnitState::Reprojecting);
        let started = Instant::now();
        let reprojected = {
            let source = match (&raster, &mosaic) {
                (Some(raster), _) => raster,
                (None, Some(mosaic)) => mosaic.raster(),
                (None, None) => {
                    return self.fail_with_mode(
                        unit,
                        ctx,
                        ErrorKind::Reprojection,
                        stage.get(),
                        "no source raster".to_string(),
                        mode,
                        quads,
                    )
                }
            };
            self.reproject(source, &transform, &unit.paths.raw)
        };
        drop(mosaic);
        drop(raster);
        if let Err((kind, detail)) = reprojected {
            if let Err(e) = remove_if_exists(&unit.paths.raw) {
                warn!(raw = %unit.paths.raw.display(), "Failed to remove partial raw output: {e}");
            }
            return self.fail_with_mode(unit, ctx, kind, stage.get(), detail, mode, quads);
        }
        metrics::histogram!(metric_defs::REPROJECT_DURATION.name, &labels.to_labels())
            .record(started.elapsed().as_secs_f64());

        advance(UnitState::Finalizing);
        let started = Instant::now();
        let finalized = Finalizer::new(&self.codec, &self.settings.cog_bands).finalize(&unit.paths);
        metrics::histogram!(
            metric_defs::FINALIZE_DURATION.name,
            &UnitLabels::new(unit.date).to_labels()
        )
        .record(started.elapsed().as_secs_f64());

        match finalized {
            Ok(done) => {
                if !done.create_summary.is_empty() {
                    self.progress.report(&format!("...{}", done.create_summary));
                }
                self.progress.report(&format!("...{}", done.validate_summary));
            }
            Err(e) => {
                let kind = match &e {
                    FinalizeError::Create { .. } => ErrorKind::CogCreate,
                    FinalizeError::Validate { .. } | FinalizeError::Invalid { .. } => {
                        ErrorKind::CogInvalid
                    }
                    FinalizeError::Io { .. } => ErrorKind::Io,
                };
                return self.fail_with_mode(unit, ctx, kind, stage.get(), e.to_string(), mode, quads);
            }
        }

        advance(UnitState::Done);
        self.progress.unit_completed();
        metrics::counter!(metric_defs::UNITS_COMPLETED.name, &labels.to_labels()).increment(1);
        UnitReport {
            source_mode: Some(mode),
            quads,
            ..UnitReport::new(unit, UnitOutcome::Completed)
        }
    }

    /// Warp `source` onto the tile grid and write the raw output.
    fn reproject(
        &self,
        source: &GeoRaster,
        transform: &quadtiler_raster::AffineTransform,
        raw: &Path,
    ) -> Result<(), (ErrorKind, String)> {
        if let Some(parent) = raw.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| (ErrorKind::Io, format!("{}: {e}", parent.display())))?;
        }
        let reprojector = Reprojector::new(
            *transform,
            self.settings.dst_width,
            self.settings.dst_height,
            self.settings.bands,
            self.settings.dst_crs,
        );
        reprojector
            .reproject_to_file(source, raw)
            .map(|_| ())
            .map_err(|e| (ErrorKind::Reprojection, e.to_string()))
    }

    fn fail(
        &self,
        unit: &UnitDescriptor<'_>,
        ctx: &DateContext<'_, '_>,
        kind: ErrorKind,
        stage: UnitState,
        detail: String,
    ) -> UnitReport {
        let tile_id = unit.tile.id.as_str();
        warn!(tile = tile_id, date = unit.date, kind = %kind, ?stage, "{detail}");
        self.progress.report(&format!("...{tile_id} failed ({kind}): {detail}"));
        ctx.ledger
            .record(ErrorRecord::new(tile_id, unit.date, kind, detail));
        self.progress.unit_failed();
        metrics::counter!(
            metric_defs::UNITS_FAILED.name,
            &UnitLabels::new(unit.date).with(&[("kind", kind.as_str().to_string())])
        )
        .increment(1);
        UnitReport::new(unit, UnitOutcome::Failed { kind, stage })
    }

    #[allow(clippy::too_many_arguments)]
    fn fail_with_mode(
        &self,
        unit: &UnitDescriptor<'_>,
        ctx: &DateContext<'_, '_>,
        kind: ErrorKind,
        stage: UnitState,
        detail: String,
        mode: SourceMode,
        quads: usize,
    ) -> UnitReport {
        UnitReport {
            source_mode: Some(mode),
            quads,
            ..self.fail(unit, ctx, kind, stage, detail)
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unit panicked".to_string()
    }
}
