//! Append-only record of per-unit failures.

use std::fmt;

use parking_lot::Mutex;
use serde::{Serialize, Serializer};

/// Classification of a per-unit failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No catalog quad intersects the tile for the date.
    EmptyOverlap,
    /// A quad file could not be opened while mosaicking.
    MissingSource,
    /// A quad file exists but could not be decoded.
    UnreadableSource,
    /// The tile footprint could not be brought into the catalog CRS.
    Overlap,
    /// No destination transform could be built for the tile.
    InvalidGeometry,
    /// Mosaicking failed as a whole.
    Mosaic,
    /// Reprojection or writing the raw output failed.
    Reprojection,
    /// The codec could not create the optimized output.
    CogCreate,
    /// The optimized output failed validation.
    CogInvalid,
    /// Filesystem error outside the raster pipeline.
    Io,
    /// The unit panicked.
    Panic,
}

impl ErrorKind {
    /// Short classification string used in reports.
    pub const fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::EmptyOverlap => "empty overlap",
            ErrorKind::MissingSource => "missing source",
            ErrorKind::UnreadableSource => "unreadable source",
            ErrorKind::Overlap => "overlap failed",
            ErrorKind::InvalidGeometry => "invalid geometry",
            ErrorKind::Mosaic => "mosaic failed",
            ErrorKind::Reprojection => "reprojection failed",
            ErrorKind::CogCreate => "cog create failed",
            ErrorKind::CogInvalid => "cog invalid",
            ErrorKind::Io => "io error",
            ErrorKind::Panic => "panic",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ErrorKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// One failure of one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorRecord {
    /// Tile id.
    pub tile: String,
    /// Date token.
    pub date: String,
    /// Classification.
    pub kind: ErrorKind,
    /// Free-form detail, usually the underlying error message.
    pub detail: String,
}

impl ErrorRecord {
    /// Create a record.
    pub fn new(
        tile: impl Into<String>,
        date: impl Into<String>,
        kind: ErrorKind,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            tile: tile.into(),
            date: date.into(),
            kind,
            detail: detail.into(),
        }
    }
}

/// Shared, append-only error list. Safe to append from any worker.
#[derive(Debug, Default)]
pub struct ErrorLedger {
    records: Mutex<Vec<ErrorRecord>>,
}

impl ErrorLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record.
    pub fn record(&self, record: ErrorRecord) {
        self.records.lock().push(record);
    }

    /// Number of records so far.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// True when nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Copy of the records so far, in append order.
    pub fn snapshot(&self) -> Vec<ErrorRecord> {
        self.records.lock().clone()
    }

    /// Consume the ledger and return its records.
    pub fn into_records(self) -> Vec<ErrorRecord> {
        self.records.into_inner()
    }
}
