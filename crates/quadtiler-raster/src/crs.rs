//! Coordinate reference systems and point transformation.
//!
//! CRSs are identified by EPSG code and resolved through the `crs-definitions`
//! database; transformations run through `proj4rs`, so no native PROJ/GDAL
//! installation is needed.

use crate::{RasterError, Result};
use proj4rs::proj::Proj;
use std::fmt;
use std::str::FromStr;

/// A coordinate reference system identified by its EPSG code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Crs {
    epsg: u16,
}

impl Crs {
    /// WGS84 longitude/latitude.
    pub const WGS84: Crs = Crs { epsg: 4326 };
    /// Spherical Web Mercator.
    pub const WEB_MERCATOR: Crs = Crs { epsg: 3857 };

    /// Create a CRS from an EPSG code, checking that it is in the database.
    pub fn from_epsg(epsg: u16) -> Result<Self> {
        if crs_definitions::from_code(epsg).is_none() {
            return Err(RasterError::UnknownCrs(format!("EPSG:{epsg}")));
        }
        Ok(Self { epsg })
    }

    /// Parse a CRS identifier.
    ///
    /// Accepts `EPSG:4326`, a bare `4326`, OGC URNs such as
    /// `urn:ogc:def:crs:EPSG::3857`, and `CRS84` style names (mapped to 4326).
    pub fn parse(value: &str) -> Result<Self> {
        let trimmed = value.trim();
        let upper = trimmed.to_ascii_uppercase();

        if upper.ends_with("CRS84") {
            return Ok(Self::WGS84);
        }

        let code = upper
            .rsplit(':')
            .find(|part| !part.is_empty())
            .unwrap_or(&upper);

        let epsg: u16 = code
            .parse()
            .map_err(|_| RasterError::UnknownCrs(trimmed.to_string()))?;
        Self::from_epsg(epsg)
    }

    /// The EPSG code.
    pub fn epsg(&self) -> u16 {
        self.epsg
    }

    /// PROJ4 definition string.
    pub fn proj_string(&self) -> Result<&'static str> {
        crs_definitions::from_code(self.epsg)
            .map(|def| def.proj4)
            .ok_or_else(|| RasterError::UnknownCrs(self.to_string()))
    }

    /// Whether coordinates are longitude/latitude degrees.
    pub fn is_geographic(&self) -> bool {
        match crs_definitions::from_code(self.epsg) {
            Some(def) => def.proj4.contains("+proj=longlat"),
            None => self.epsg == 4326 || (4000..5000).contains(&self.epsg),
        }
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg)
    }
}

impl FromStr for Crs {
    type Err = RasterError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Transforms points from one CRS into another.
///
/// Construction parses both PROJ definitions once; identical CRSs short-circuit
/// to an identity transform.
pub struct CoordTransformer {
    source: Crs,
    target: Crs,
    projections: Option<(Proj, Proj)>,
}

impl fmt::Debug for CoordTransformer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoordTransformer")
            .field("source", &self.source)
            .field("target", &self.target)
            .finish()
    }
}

impl CoordTransformer {
    /// Create a transformer from `source` to `target`.
    pub fn new(source: Crs, target: Crs) -> Result<Self> {
        if source == target {
            return Ok(Self {
                source,
                target,
                projections: None,
            });
        }

        let source_proj = Proj::from_proj_string(source.proj_string()?)
            .map_err(|e| RasterError::UnknownCrs(format!("{source}: {e:?}")))?;
        let target_proj = Proj::from_proj_string(target.proj_string()?)
            .map_err(|e| RasterError::UnknownCrs(format!("{target}: {e:?}")))?;

        Ok(Self {
            source,
            target,
            projections: Some((source_proj, target_proj)),
        })
    }

    /// Source CRS.
    pub fn source(&self) -> Crs {
        self.source
    }

    /// Target CRS.
    pub fn target(&self) -> Crs {
        self.target
    }

    /// True when source and target are the same CRS.
    pub fn is_identity(&self) -> bool {
        self.projections.is_none()
    }

    /// Transform a single point.
    pub fn transform(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        let Some((source_proj, target_proj)) = &self.projections else {
            return Ok((x, y));
        };

        // proj4rs works in radians for geographic systems
        let mut point = if self.source.is_geographic() {
            (x.to_radians(), y.to_radians(), 0.0)
        } else {
            (x, y, 0.0)
        };

        proj4rs::transform::transform(source_proj, target_proj, &mut point).map_err(|e| {
            RasterError::Projection {
                from: self.source.to_string(),
                to: self.target.to_string(),
                reason: format!("{e:?}"),
            }
        })?;

        let (out_x, out_y) = if self.target.is_geographic() {
            (point.0.to_degrees(), point.1.to_degrees())
        } else {
            (point.0, point.1)
        };

        if !out_x.is_finite() || !out_y.is_finite() {
            return Err(RasterError::Projection {
                from: self.source.to_string(),
                to: self.target.to_string(),
                reason: format!("({x}, {y}) has no finite image"),
            });
        }

        Ok((out_x, out_y))
    }
}
