//! End-to-end retiling runs over small synthetic quads.
//!
//! Layout used throughout (all WGS84, 0.001 degree pixels):
//!
//! - `Q1` covers 36.0..36.1 E, 1.1..1.0 S; dated `2022-06` and `2022-07`.
//! - `Q2` covers 36.1..36.2 E, same latitudes; dated `2022-07` only.
//! - `T1` lies inside `Q1`, `T2` far away, `T3` straddles the 36.1 seam,
//!   `T4` lies inside `Q1`. Tiles are 32x32 pixels.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use quadtiler_catalog::{QuadCatalog, TileGrid};
use quadtiler_raster::{AffineTransform, Bounds, Crs, GeoRaster, SampleType, TiffLayout};
use quadtiler_runner::{
    CodecError, CogCodec, ErrorKind, NativeCog, OutputPattern, Progress, RetileError,
    RetileReport, RetileSettings, Retiler, SourceMode, UnitOutcome, UnitState, Validation,
};
use tempfile::TempDir;

const RES: f64 = 0.001;

const CATALOG: &str = r#"{
  "type": "FeatureCollection",
  "features": [
    {"type": "Feature", "properties": {"tile": "Q1", "date": "2022-06", "file": "q1_jun.tif"},
     "geometry": {"type": "Polygon", "coordinates": [[[36.0, -1.1], [36.1, -1.1], [36.1, -1.0], [36.0, -1.0], [36.0, -1.1]]]}},
    {"type": "Feature", "properties": {"tile": "Q1", "date": "2022-07", "file": "q1_jul.tif"},
     "geometry": {"type": "Polygon", "coordinates": [[[36.0, -1.1], [36.1, -1.1], [36.1, -1.0], [36.0, -1.0], [36.0, -1.1]]]}},
    {"type": "Feature", "properties": {"tile": "Q2", "date": "2022-07", "file": "q2_jul.tif"},
     "geometry": {"type": "Polygon", "coordinates": [[[36.1, -1.1], [36.2, -1.1], [36.2, -1.0], [36.1, -1.0], [36.1, -1.1]]]}}
  ]
}"#;

const GRID: &str = r#"{
  "type": "FeatureCollection",
  "features": [
    {"type": "Feature", "properties": {"tile": "T1"},
     "geometry": {"type": "Polygon", "coordinates": [[[36.02, -1.05], [36.052, -1.05], [36.052, -1.018], [36.02, -1.018], [36.02, -1.05]]]}},
    {"type": "Feature", "properties": {"tile": "T2"},
     "geometry": {"type": "Polygon", "coordinates": [[[10.0, 5.0], [10.032, 5.0], [10.032, 5.032], [10.0, 5.032], [10.0, 5.0]]]}},
    {"type": "Feature", "properties": {"tile": "T3"},
     "geometry": {"type": "Polygon", "coordinates": [[[36.084, -1.05], [36.116, -1.05], [36.116, -1.018], [36.084, -1.018], [36.084, -1.05]]]}},
    {"type": "Feature", "properties": {"tile": "T4"},
     "geometry": {"type": "Polygon", "coordinates": [[[36.05, -1.09], [36.082, -1.09], [36.082, -1.058], [36.05, -1.058], [36.05, -1.09]]]}}
  ]
}"#;

/// Write a constant-valued 4-band quad covering `bounds`.
fn write_quad(dir: &Path, name: &str, bounds: Bounds, sample_type: SampleType, values: [f32; 4]) {
    let width = (bounds.width() / RES).round() as usize;
    let height = (bounds.height() / RES).round() as usize;
    let mut data = Vec::with_capacity(width * height * 4);
    for value in values {
        data.extend(std::iter::repeat(value).take(width * height));
    }
    let transform = AffineTransform::from_origin(bounds.min_x, bounds.max_y, RES, RES);
    GeoRaster::from_data(width, height, 4, sample_type, transform, Crs::WGS84, data)
        .unwrap()
        .write_geotiff(dir.join(name))
        .unwrap();
}

struct Fixture {
    _root: TempDir,
    quad_dir: PathBuf,
    tile_dir: PathBuf,
    catalog: QuadCatalog,
    grid: TileGrid,
}

impl Fixture {
    fn new() -> Self {
        let root = TempDir::new().unwrap();
        let quad_dir = root.path().join("quads");
        let tile_dir = root.path().join("tiles");
        fs::create_dir_all(&quad_dir).unwrap();

        let west = Bounds::new(36.0, -1.1, 36.1, -1.0);
        let east = Bounds::new(36.1, -1.1, 36.2, -1.0);
        write_quad(&quad_dir, "q1_jun.tif", west, SampleType::I16, [100.0, 110.0, 120.0, 130.0]);
        write_quad(&quad_dir, "q1_jul.tif", west, SampleType::I16, [100.0, 110.0, 120.0, 130.0]);
        write_quad(&quad_dir, "q2_jul.tif", east, SampleType::I16, [200.0, 210.0, 220.0, 230.0]);

        Self {
            quad_dir,
            tile_dir,
            catalog: QuadCatalog::from_geojson_str(CATALOG).unwrap(),
            grid: TileGrid::from_geojson_str(GRID).unwrap(),
            _root: root,
        }
    }

    fn settings(&self) -> RetileSettings {
        RetileSettings {
            dst_width: 32,
            dst_height: 32,
            resolution: RES,
            ..RetileSettings::new(&self.quad_dir, &self.tile_dir)
        }
    }

    fn raw(&self, tile: &str, date: &str) -> PathBuf {
        self.tile_dir.join(format!("{tile}_{date}.tif"))
    }

    fn cog(&self, tile: &str, date: &str) -> PathBuf {
        self.tile_dir.join(format!("{tile}_{date}_cog.tif"))
    }

    fn run_with<C: CogCodec>(&self, settings: RetileSettings, codec: C) -> RetileReport {
        Retiler::new(settings, codec)
            .run(&self.catalog, &self.grid)
            .unwrap()
    }

    fn run(&self) -> RetileReport {
        self.run_with(self.settings(), NativeCog::with_tile_size(16))
    }
}

fn kinds_for(report: &RetileReport, tile: &str) -> Vec<ErrorKind> {
    report
        .errors
        .iter()
        .filter(|e| e.tile == tile)
        .map(|e| e.kind)
        .collect()
}

#[test]
fn test_single_quad_produces_validated_cog() {
    let fx = Fixture::new();
    let report = fx.run();

    let unit = report.unit("T1", "2022-06").unwrap();
    assert_eq!(unit.outcome, UnitOutcome::Completed);
    assert_eq!(unit.source_mode, Some(SourceMode::Direct));
    assert!(kinds_for(&report, "T1").is_empty());

    assert!(fx.cog("T1", "2022-06").exists());
    assert!(!fx.raw("T1", "2022-06").exists());

    let layout = TiffLayout::inspect(fx.cog("T1", "2022-06")).unwrap();
    assert!(layout.cloud_optimized_problems().is_empty());

    let cog = GeoRaster::open(fx.cog("T1", "2022-06")).unwrap();
    assert_eq!((cog.width(), cog.height(), cog.bands()), (32, 32, 4));
    assert_eq!(cog.sample_type(), SampleType::I16);
    assert_eq!(cog.crs(), Crs::WGS84);
    assert_eq!(cog.transform(), AffineTransform::from_origin(36.02, -1.018, RES, RES));
    for band in 0..4 {
        let expected = 100.0 + 10.0 * band as f32;
        assert!(cog.band(band).iter().all(|&v| v == expected), "band {band}");
    }
}

#[test]
fn test_empty_overlap_writes_nothing_and_is_recorded() {
    let fx = Fixture::new();
    let report = fx.run();

    assert_eq!(report.unit("T2", "2022-06").unwrap().outcome, UnitOutcome::Empty);
    assert!(!fx.raw("T2", "2022-06").exists());
    assert!(!fx.cog("T2", "2022-06").exists());

    let records: Vec<_> = report
        .errors
        .iter()
        .filter(|e| e.tile == "T2" && e.date == "2022-06")
        .collect();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].kind.as_str(), "empty overlap");
}

#[test]
fn test_seam_tile_is_mosaicked() {
    let fx = Fixture::new();
    let report = fx.run();

    let unit = report.unit("T3", "2022-07").unwrap();
    assert_eq!(unit.outcome, UnitOutcome::Completed);
    assert_eq!(unit.source_mode, Some(SourceMode::Mosaic));
    assert_eq!(unit.quads, 2);
    assert!(fx.cog("T3", "2022-07").exists());
    assert!(!fx.raw("T3", "2022-07").exists());

    let cog = GeoRaster::open(fx.cog("T3", "2022-07")).unwrap();
    // Column 2 samples the western quad only, column 29 the eastern one
    assert_eq!(cog.get(0, 2, 16), 100.0);
    assert_eq!(cog.get(0, 29, 16), 200.0);
    assert_eq!(cog.get(3, 29, 16), 230.0);

    // In June only Q1 exists: read directly, east half left at 0
    let june = report.unit("T3", "2022-06").unwrap();
    assert_eq!(june.source_mode, Some(SourceMode::Direct));
    let cog = GeoRaster::open(fx.cog("T3", "2022-06")).unwrap();
    assert_eq!(cog.get(0, 2, 16), 100.0);
    assert_eq!(cog.get(0, 29, 16), 0.0);
}

#[test]
fn test_existing_cog_is_skipped_without_io() {
    let fx = Fixture::new();
    fs::create_dir_all(&fx.tile_dir).unwrap();
    fs::write(fx.cog("T4", "2022-06"), b"already here").unwrap();

    let report = fx.run();
    let unit = report.unit("T4", "2022-06").unwrap();
    assert_eq!(unit.outcome, UnitOutcome::Skipped);
    assert_eq!(unit.source_mode, None);
    assert!(!report
        .errors
        .iter()
        .any(|e| e.tile == "T4" && e.date == "2022-06"));
    assert_eq!(fs::read(fx.cog("T4", "2022-06")).unwrap(), b"already here");
    assert!(!fx.raw("T4", "2022-06").exists());

    // The other date still runs
    assert_eq!(report.unit("T4", "2022-07").unwrap().outcome, UnitOutcome::Completed);
}

#[test]
fn test_rerun_is_idempotent() {
    let fx = Fixture::new();
    let first = fx.run();
    assert_eq!(first.dates, vec!["2022-06", "2022-07"]);
    assert_eq!(first.completed(), 6);
    assert_eq!(first.empty(), 2);
    assert_eq!(first.failed(), 0);

    let before = fs::read(fx.cog("T3", "2022-07")).unwrap();
    let second = fx.run();
    assert_eq!(second.completed(), 0);
    assert_eq!(second.skipped(), 6);
    assert_eq!(second.empty(), 2);
    assert_eq!(fs::read(fx.cog("T3", "2022-07")).unwrap(), before);

    let mut files: Vec<_> = fs::read_dir(&fx.tile_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".tif"))
        .collect();
    files.sort();
    assert_eq!(files.len(), 6);
    assert!(files.iter().all(|f| f.ends_with("_cog.tif")));
}

#[test]
fn test_stale_raw_is_redone_and_leftover_raw_removed() {
    let fx = Fixture::new();
    fs::create_dir_all(&fx.tile_dir).unwrap();
    // Interrupted attempt: raw only
    fs::write(fx.raw("T1", "2022-06"), b"partial").unwrap();
    // Finished attempt that left its raw behind
    fs::write(fx.raw("T4", "2022-06"), b"leftover").unwrap();
    fs::write(fx.cog("T4", "2022-06"), b"done").unwrap();

    let report = fx.run();
    assert_eq!(report.unit("T1", "2022-06").unwrap().outcome, UnitOutcome::Completed);
    assert!(GeoRaster::open(fx.cog("T1", "2022-06")).is_ok());
    assert!(!fx.raw("T1", "2022-06").exists());

    assert_eq!(report.unit("T4", "2022-06").unwrap().outcome, UnitOutcome::Skipped);
    assert!(!fx.raw("T4", "2022-06").exists());
    assert_eq!(fs::read(fx.cog("T4", "2022-06")).unwrap(), b"done");
}

#[test]
fn test_missing_quad_file() {
    let fx = Fixture::new();
    fs::remove_file(fx.quad_dir.join("q1_jun.tif")).unwrap();
    fs::remove_file(fx.quad_dir.join("q2_jul.tif")).unwrap();
    let report = fx.run();

    let unit = report.unit("T1", "2022-06").unwrap();
    assert!(matches!(
        unit.outcome,
        UnitOutcome::Failed { kind: ErrorKind::MissingSource, .. }
    ));

    // Mosaic of Q1+Q2 in July goes ahead with Q1 alone
    let seam = report.unit("T3", "2022-07").unwrap();
    assert_eq!(seam.outcome, UnitOutcome::Completed);
    assert!(report.errors.iter().any(|e| e.tile == "T3"
        && e.date == "2022-07"
        && e.kind == ErrorKind::MissingSource
        && e.detail.contains("q2_jul.tif")));
    let cog = GeoRaster::open(fx.cog("T3", "2022-07")).unwrap();
    assert_eq!(cog.get(0, 29, 16), 0.0);
}

/// Native codec whose validator always rejects.
struct RejectingCodec(NativeCog);

impl CogCodec for RejectingCodec {
    fn create(&self, raw: &Path, cog: &Path, bands: &[usize]) -> Result<String, CodecError> {
        self.0.create(raw, cog, bands)
    }

    fn validate(&self, cog: &Path) -> Result<Validation, CodecError> {
        Ok(Validation::invalid(format!("{} is NOT a valid cloud optimized GeoTIFF", cog.display())))
    }
}

#[test]
fn test_invalid_cog_keeps_raw_for_retry() {
    let fx = Fixture::new();
    let settings = RetileSettings {
        dates: vec!["2022-06".to_string()],
        ..fx.settings()
    };
    let report = fx.run_with(settings.clone(), RejectingCodec(NativeCog::with_tile_size(16)));

    let unit = report.unit("T1", "2022-06").unwrap();
    assert_eq!(
        unit.outcome,
        UnitOutcome::Failed { kind: ErrorKind::CogInvalid, stage: UnitState::Finalizing }
    );
    assert!(fx.raw("T1", "2022-06").exists());
    assert!(!fx.cog("T1", "2022-06").exists());
    assert!(kinds_for(&report, "T1").contains(&ErrorKind::CogInvalid));

    // A later run with a working codec repairs the unit
    let report = fx.run_with(settings, NativeCog::with_tile_size(16));
    assert_eq!(report.unit("T1", "2022-06").unwrap().outcome, UnitOutcome::Completed);
    assert!(fx.cog("T1", "2022-06").exists());
    assert!(!fx.raw("T1", "2022-06").exists());
}

/// Native codec whose validator cannot be started.
struct UnrunnableValidator(NativeCog);

impl CogCodec for UnrunnableValidator {
    fn create(&self, raw: &Path, cog: &Path, bands: &[usize]) -> Result<String, CodecError> {
        self.0.create(raw, cog, bands)
    }

    fn validate(&self, _cog: &Path) -> Result<Validation, CodecError> {
        Err(CodecError::Spawn {
            program: "rio".into(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "rio not installed"),
        })
    }
}

#[test]
fn test_validator_error_withholds_cog() {
    let fx = Fixture::new();
    let settings = RetileSettings {
        dates: vec!["2022-06".to_string()],
        ..fx.settings()
    };
    let report = fx.run_with(settings.clone(), UnrunnableValidator(NativeCog::with_tile_size(16)));

    assert_eq!(
        report.unit("T1", "2022-06").unwrap().outcome,
        UnitOutcome::Failed { kind: ErrorKind::CogInvalid, stage: UnitState::Finalizing }
    );
    assert!(fx.raw("T1", "2022-06").exists());
    assert!(!fx.cog("T1", "2022-06").exists());

    // The unit is not mistaken for done on the next run
    let report = fx.run_with(settings.clone(), UnrunnableValidator(NativeCog::with_tile_size(16)));
    assert!(matches!(
        report.unit("T1", "2022-06").unwrap().outcome,
        UnitOutcome::Failed { kind: ErrorKind::CogInvalid, .. }
    ));
    assert!(kinds_for(&report, "T1").contains(&ErrorKind::CogInvalid));

    let report = fx.run_with(settings, NativeCog::with_tile_size(16));
    assert_eq!(report.unit("T1", "2022-06").unwrap().outcome, UnitOutcome::Completed);
    assert!(fx.cog("T1", "2022-06").exists());
    assert!(!fx.raw("T1", "2022-06").exists());
}

#[test]
fn test_corrupt_single_quad_is_unreadable_source() {
    let fx = Fixture::new();
    fs::write(fx.quad_dir.join("q1_jun.tif"), b"not a tiff").unwrap();
    let settings = RetileSettings {
        dates: vec!["2022-06".to_string()],
        ..fx.settings()
    };
    let report = fx.run_with(settings, NativeCog::with_tile_size(16));

    let unit = report.unit("T1", "2022-06").unwrap();
    assert!(matches!(
        unit.outcome,
        UnitOutcome::Failed { kind: ErrorKind::UnreadableSource, stage: UnitState::Direct }
    ));
    assert_eq!(unit.source_mode, Some(SourceMode::Direct));
    assert!(!fx.raw("T1", "2022-06").exists());
    assert!(report.errors.iter().any(|e| e.tile == "T1"
        && e.kind == ErrorKind::UnreadableSource
        && e.detail.contains("q1_jun.tif")));
}

#[test]
fn test_reprojection_failure_leaves_no_raw() {
    let fx = Fixture::new();
    let settings = RetileSettings {
        dates: vec!["2022-06".to_string()],
        bands: 5,
        ..fx.settings()
    };
    let report = fx.run_with(settings, NativeCog::with_tile_size(16));

    for tile in ["T1", "T4"] {
        assert_eq!(
            report.unit(tile, "2022-06").unwrap().outcome,
            UnitOutcome::Failed { kind: ErrorKind::Reprojection, stage: UnitState::Reprojecting }
        );
        assert!(!fx.raw(tile, "2022-06").exists());
        assert!(!fx.cog(tile, "2022-06").exists());
    }
}

/// Codec that panics for one tile.
struct PanickingCodec;

impl CogCodec for PanickingCodec {
    fn create(&self, raw: &Path, cog: &Path, bands: &[usize]) -> Result<String, CodecError> {
        if raw.to_string_lossy().contains("T1_") {
            panic!("codec blew up");
        }
        NativeCog::with_tile_size(16).create(raw, cog, bands)
    }

    fn validate(&self, cog: &Path) -> Result<Validation, CodecError> {
        NativeCog::with_tile_size(16).validate(cog)
    }
}

#[test]
fn test_panic_is_isolated() {
    let fx = Fixture::new();
    let settings = RetileSettings {
        workers: 3,
        ..fx.settings()
    };
    let report = fx.run_with(settings, PanickingCodec);

    for date in ["2022-06", "2022-07"] {
        let unit = report.unit("T1", date).unwrap();
        assert_eq!(
            unit.outcome,
            UnitOutcome::Failed { kind: ErrorKind::Panic, stage: UnitState::Finalizing }
        );
    }
    let panics: Vec<_> = report.errors.iter().filter(|e| e.kind == ErrorKind::Panic).collect();
    assert_eq!(panics.len(), 2);
    assert_eq!(panics[0].detail, "codec blew up");
    assert_eq!(report.completed(), 4);
}

#[test]
fn test_parallel_matches_serial() {
    let serial = Fixture::new();
    let parallel = Fixture::new();
    let serial_report = serial.run();
    let parallel_report = parallel.run_with(
        RetileSettings {
            workers: 4,
            ..parallel.settings()
        },
        NativeCog::with_tile_size(16),
    );

    assert_eq!(serial_report.units, parallel_report.units);
    for (tile, date) in [("T1", "2022-06"), ("T3", "2022-07"), ("T4", "2022-07")] {
        let a = GeoRaster::open(serial.cog(tile, date)).unwrap();
        let b = GeoRaster::open(parallel.cog(tile, date)).unwrap();
        assert_eq!(a.data(), b.data(), "{tile} {date}");
    }
}

#[test]
fn test_values_saturate_to_i16() {
    let fx = Fixture::new();
    let west = Bounds::new(36.0, -1.1, 36.1, -1.0);
    write_quad(&fx.quad_dir, "q1_jun.tif", west, SampleType::F32, [40000.0, -40000.0, 12.0, -7.0]);

    let settings = RetileSettings {
        dates: vec!["2022-06".to_string()],
        ..fx.settings()
    };
    let report = fx.run_with(settings, NativeCog::with_tile_size(16));
    assert_eq!(report.unit("T1", "2022-06").unwrap().outcome, UnitOutcome::Completed);

    let cog = GeoRaster::open(fx.cog("T1", "2022-06")).unwrap();
    assert_eq!(cog.sample_type(), SampleType::I16);
    assert_eq!(cog.get(0, 5, 5), 32767.0);
    assert_eq!(cog.get(1, 5, 5), -32768.0);
    assert_eq!(cog.get(2, 5, 5), 12.0);
    assert_eq!(cog.get(3, 5, 5), -7.0);
}

#[test]
fn test_progress_messages() {
    let fx = Fixture::new();
    let lines = Arc::new(Mutex::new(Vec::<String>::new()));
    let sink = Arc::clone(&lines);
    let progress = Progress::with_callback(Box::new(move |msg: &str| sink.lock().push(msg.to_string())));

    let retiler = Retiler::new(fx.settings(), NativeCog::with_tile_size(16)).with_progress(progress);
    retiler.run(&fx.catalog, &fx.grid).unwrap();

    let lines = lines.lock();
    assert_eq!(lines.first().map(String::as_str), Some("Processing for date: 2022-06"));
    assert_eq!(lines.last().map(String::as_str), Some("All processed"));
    assert!(lines.iter().any(|l| l == "Processing serial"));
    assert!(lines.iter().any(|l| l == "Completed processing tiles for 2022-07"));
    assert!(lines.iter().any(|l| l == "..mosaicking 2 images"));

    let counts = retiler.progress().counts();
    assert_eq!(counts.completed, 6);
    assert_eq!(counts.empty, 2);
    assert_eq!(counts.total(), 8);
}

#[test]
fn test_custom_pattern_creates_directories() {
    let fx = Fixture::new();
    let settings = RetileSettings {
        dates: vec!["2022-07".to_string()],
        output_pattern: OutputPattern::new("<tile_dir>/<date>/tile_<tile_id>_<date>.tif").unwrap(),
        ..fx.settings()
    };
    let report = fx.run_with(settings, NativeCog::with_tile_size(16));
    assert_eq!(report.dates, vec!["2022-07"]);
    assert!(fx.tile_dir.join("2022-07/tile_T1_2022-07_cog.tif").exists());
    assert!(fx.tile_dir.join("2022-07/tile_T3_2022-07_cog.tif").exists());
}

#[test]
fn test_structural_errors_before_any_work() {
    let fx = Fixture::new();
    let empty_grid = TileGrid::new(Crs::WGS84, Vec::new()).unwrap();
    let result = Retiler::new(fx.settings(), NativeCog::new()).run(&fx.catalog, &empty_grid);
    assert!(matches!(result, Err(RetileError::EmptyGrid)));

    let bad = RetileSettings {
        cog_bands: vec![1, 2, 3, 4, 5],
        ..fx.settings()
    };
    let result = Retiler::new(bad, NativeCog::new()).run(&fx.catalog, &fx.grid);
    assert!(matches!(result, Err(RetileError::InvalidSettings(_))));
    assert!(!fx.tile_dir.exists());
}
