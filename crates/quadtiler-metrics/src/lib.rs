//! Metrics for the quadtiler retiling engine.
//!
//! Every metric the engine emits is declared once here as a [`Metric`]
//! constant, so names cannot drift between the emitting code, dashboards and
//! tests. The `metrics` facade is re-exported; install any recorder before
//! the run and call [`describe_metrics`] to register descriptions.
//!
//! # Example
//!
//! ```rust,ignore
//! use quadtiler_metrics::{describe_metrics, metric_defs, UnitLabels};
//!
//! describe_metrics();
//!
//! let labels = UnitLabels::new("2022-06").with_source_mode("mosaic");
//! metrics::counter!(metric_defs::UNITS_COMPLETED.name, &labels.to_labels()).increment(1);
//! ```

pub use metrics;

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};

/// Counter, gauge or histogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// Monotonically increasing count.
    Counter,
    /// Value that can go up and down.
    Gauge,
    /// Distribution of observations.
    Histogram,
}

impl MetricKind {
    /// Lowercase name of the kind.
    pub const fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A metric declaration: name, kind, description, unit and label keys.
///
/// ```rust
/// use quadtiler_metrics::{Metric, MetricKind};
/// use metrics::Unit;
///
/// const TILES_WRITTEN: Metric = Metric::counter("quadtiler.example.tiles")
///     .with_description("Tiles written")
///     .with_unit(Unit::Count)
///     .with_labels(&["date"]);
///
/// assert_eq!(TILES_WRITTEN.kind, MetricKind::Counter);
/// ```
#[derive(Debug, Clone)]
pub struct Metric {
    /// Metric name, dot separated.
    pub name: &'static str,
    /// Counter, gauge or histogram.
    pub kind: MetricKind,
    /// Human-readable description.
    pub description: &'static str,
    /// Unit of measurement.
    pub unit: Option<Unit>,
    /// Label keys the metric is recorded with.
    pub labels: &'static [&'static str],
}

impl Metric {
    const fn with_kind(name: &'static str, kind: MetricKind) -> Self {
        Self {
            name,
            kind,
            description: "",
            unit: None,
            labels: &[],
        }
    }

    /// Declare a counter.
    pub const fn counter(name: &'static str) -> Self {
        Self::with_kind(name, MetricKind::Counter)
    }

    /// Declare a gauge.
    pub const fn gauge(name: &'static str) -> Self {
        Self::with_kind(name, MetricKind::Gauge)
    }

    /// Declare a histogram.
    pub const fn histogram(name: &'static str) -> Self {
        Self::with_kind(name, MetricKind::Histogram)
    }

    /// Set the description.
    pub const fn with_description(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    /// Set the unit.
    pub const fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = Some(unit);
        self
    }

    /// Set the label keys.
    pub const fn with_labels(mut self, labels: &'static [&'static str]) -> Self {
        self.labels = labels;
        self
    }

    /// Register the description with the installed recorder.
    pub fn describe(&self) {
        match (self.kind, self.unit) {
            (MetricKind::Counter, Some(unit)) => describe_counter!(self.name, unit, self.description),
            (MetricKind::Counter, None) => describe_counter!(self.name, self.description),
            (MetricKind::Gauge, Some(unit)) => describe_gauge!(self.name, unit, self.description),
            (MetricKind::Gauge, None) => describe_gauge!(self.name, self.description),
            (MetricKind::Histogram, Some(unit)) => {
                describe_histogram!(self.name, unit, self.description)
            }
            (MetricKind::Histogram, None) => describe_histogram!(self.name, self.description),
        }
    }
}

/// Every metric emitted during a retiling run.
pub mod metric_defs {
    use super::{Metric, Unit};

    /// Labels on per-unit metrics.
    pub const UNIT_LABELS: &[&str] = &["date"];

    /// Labels on per-unit metrics that know how sources were gathered.
    pub const UNIT_MODE_LABELS: &[&str] = &["date", "source_mode"];

    // ------------------------------------------------------------------
    // Units of work (one tile for one date)
    // ------------------------------------------------------------------

    /// Units that produced a validated optimized output.
    pub const UNITS_COMPLETED: Metric = Metric::counter("quadtiler.units.completed")
        .with_description("Units that produced a validated optimized output")
        .with_unit(Unit::Count)
        .with_labels(UNIT_MODE_LABELS);

    /// Units skipped because their optimized output already existed.
    pub const UNITS_SKIPPED: Metric = Metric::counter("quadtiler.units.skipped")
        .with_description("Units skipped because the optimized output already existed")
        .with_unit(Unit::Count)
        .with_labels(UNIT_LABELS);

    /// Units with no overlapping quads.
    pub const UNITS_EMPTY: Metric = Metric::counter("quadtiler.units.empty")
        .with_description("Units with no overlapping quads")
        .with_unit(Unit::Count)
        .with_labels(UNIT_LABELS);

    /// Units that failed, by error kind.
    pub const UNITS_FAILED: Metric = Metric::counter("quadtiler.units.failed")
        .with_description("Units that failed, by error kind")
        .with_unit(Unit::Count)
        .with_labels(&["date", "kind"]);

    /// Stale raw outputs removed before redoing or skipping a unit.
    pub const STALE_RAW_REMOVED: Metric = Metric::counter("quadtiler.units.stale_raw_removed")
        .with_description("Stale raw outputs removed by the resume check")
        .with_unit(Unit::Count)
        .with_labels(UNIT_LABELS);

    // ------------------------------------------------------------------
    // Mosaicking
    // ------------------------------------------------------------------

    /// Mosaics built from several quads.
    pub const MOSAICS_BUILT: Metric = Metric::counter("quadtiler.mosaic.built")
        .with_description("Mosaics built from several quads")
        .with_unit(Unit::Count)
        .with_labels(UNIT_LABELS);

    /// Number of quads merged per mosaic.
    pub const MOSAIC_SOURCES: Metric = Metric::histogram("quadtiler.mosaic.sources")
        .with_description("Quads merged per mosaic")
        .with_unit(Unit::Count)
        .with_labels(UNIT_LABELS);

    /// Mosaic inputs that could not be used.
    pub const MOSAIC_SKIPPED_SOURCES: Metric = Metric::counter("quadtiler.mosaic.skipped_sources")
        .with_description("Mosaic inputs that could not be opened or did not match")
        .with_unit(Unit::Count)
        .with_labels(UNIT_LABELS);

    // ------------------------------------------------------------------
    // Timing
    // ------------------------------------------------------------------

    /// Wall time spent reprojecting one unit.
    pub const REPROJECT_DURATION: Metric = Metric::histogram("quadtiler.reproject.duration")
        .with_description("Wall time spent reprojecting one unit")
        .with_unit(Unit::Seconds)
        .with_labels(UNIT_MODE_LABELS);

    /// Wall time spent creating and validating one optimized output.
    pub const FINALIZE_DURATION: Metric = Metric::histogram("quadtiler.finalize.duration")
        .with_description("Wall time spent creating and validating one optimized output")
        .with_unit(Unit::Seconds)
        .with_labels(UNIT_LABELS);

    // ------------------------------------------------------------------
    // Run
    // ------------------------------------------------------------------

    /// Units scheduled for the date being processed.
    pub const DATE_UNITS: Metric = Metric::gauge("quadtiler.run.date_units")
        .with_description("Units scheduled for the date being processed")
        .with_unit(Unit::Count)
        .with_labels(UNIT_LABELS);

    /// Worker threads in the pool.
    pub const POOL_WORKERS: Metric = Metric::gauge("quadtiler.pool.workers")
        .with_description("Worker threads processing units")
        .with_unit(Unit::Count);

    /// All metric definitions.
    pub const ALL: &[&Metric] = &[
        &UNITS_COMPLETED,
        &UNITS_SKIPPED,
        &UNITS_EMPTY,
        &UNITS_FAILED,
        &STALE_RAW_REMOVED,
        &MOSAICS_BUILT,
        &MOSAIC_SOURCES,
        &MOSAIC_SKIPPED_SOURCES,
        &REPROJECT_DURATION,
        &FINALIZE_DURATION,
        &DATE_UNITS,
        &POOL_WORKERS,
    ];
}

/// Labels for metrics recorded about one unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitLabels {
    /// Date token of the unit.
    pub date: String,
    /// How the sources were gathered (`direct` or `mosaic`), once known.
    pub source_mode: Option<String>,
}

impl UnitLabels {
    /// Labels for a unit of `date`.
    pub fn new(date: impl Into<String>) -> Self {
        Self {
            date: date.into(),
            source_mode: None,
        }
    }

    /// Add the source mode.
    pub fn with_source_mode(mut self, mode: impl Into<String>) -> Self {
        self.source_mode = Some(mode.into());
        self
    }

    /// Labels as key/value pairs for the `metrics` macros.
    pub fn to_labels(&self) -> Vec<(&'static str, String)> {
        let mut labels = vec![("date", self.date.clone())];
        if let Some(mode) = &self.source_mode {
            labels.push(("source_mode", mode.clone()));
        }
        labels
    }

    /// Labels plus extra pairs.
    pub fn with(&self, extra: &[(&'static str, String)]) -> Vec<(&'static str, String)> {
        let mut labels = self.to_labels();
        labels.extend_from_slice(extra);
        labels
    }
}

/// Register descriptions of every metric in [`metric_defs::ALL`].
///
/// Call once at startup, after installing a recorder.
pub fn describe_metrics() {
    for metric in metric_defs::ALL {
        metric.describe();
    }
}
