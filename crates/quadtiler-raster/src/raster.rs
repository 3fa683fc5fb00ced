//! In-memory georeferenced raster and GeoTIFF decoding.

use crate::transform::{AffineTransform, Bounds};
use crate::{Crs, RasterError, Result};
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::tags::Tag;
use tiff::ColorType;

// GeoTIFF tag IDs (not in the tiff crate's Tag enum)
pub(crate) const MODEL_PIXEL_SCALE_TAG: u16 = 33550;
pub(crate) const MODEL_TIEPOINT_TAG: u16 = 33922;
pub(crate) const MODEL_TRANSFORMATION_TAG: u16 = 34264;
pub(crate) const GEO_KEY_DIRECTORY_TAG: u16 = 34735;
pub(crate) const GDAL_NODATA_TAG: u16 = 42113;

// GeoKey IDs
pub(crate) const GEOGRAPHIC_TYPE_GEO_KEY: u16 = 2048;
pub(crate) const PROJECTED_CS_TYPE_GEO_KEY: u16 = 3072;
const USER_DEFINED_GEO_KEY_VALUE: u16 = 32767;

/// Per-sample storage type of a raster band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    F32,
    F64,
}

impl SampleType {
    /// Bits per sample.
    pub fn bits(&self) -> u16 {
        match self {
            SampleType::U8 | SampleType::I8 => 8,
            SampleType::U16 | SampleType::I16 => 16,
            SampleType::U32 | SampleType::I32 | SampleType::F32 => 32,
            SampleType::F64 => 64,
        }
    }

    /// TIFF SampleFormat value (1 = unsigned, 2 = signed, 3 = float).
    pub fn sample_format(&self) -> u16 {
        match self {
            SampleType::U8 | SampleType::U16 | SampleType::U32 => 1,
            SampleType::I8 | SampleType::I16 | SampleType::I32 => 2,
            SampleType::F32 | SampleType::F64 => 3,
        }
    }

    /// Short lowercase name (`uint16`, `int16`, ...).
    pub fn name(&self) -> &'static str {
        match self {
            SampleType::U8 => "uint8",
            SampleType::I8 => "int8",
            SampleType::U16 => "uint16",
            SampleType::I16 => "int16",
            SampleType::U32 => "uint32",
            SampleType::I32 => "int32",
            SampleType::F32 => "float32",
            SampleType::F64 => "float64",
        }
    }
}

/// Georeferencing and layout of a raster, without pixel data.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterHeader {
    /// Width in pixels.
    pub width: usize,
    /// Height in pixels.
    pub height: usize,
    /// Number of bands (samples per pixel).
    pub bands: usize,
    /// Pixel-to-CRS transform.
    pub transform: AffineTransform,
    /// Coordinate reference system.
    pub crs: Crs,
    /// No-data value, if declared.
    pub nodata: Option<f64>,
}

impl RasterHeader {
    /// Geographic bounds covered by the raster.
    pub fn bounds(&self) -> Bounds {
        self.transform.bounds(self.width, self.height)
    }
}

/// A georeferenced multi-band raster held in memory.
///
/// Pixel values are stored band-sequentially as `f32` (band 0 rows north to
/// south, then band 1, ...), alongside the sample type the data came from or
/// will be written as.
#[derive(Debug, Clone)]
pub struct GeoRaster {
    width: usize,
    height: usize,
    bands: usize,
    sample_type: SampleType,
    transform: AffineTransform,
    crs: Crs,
    nodata: Option<f64>,
    data: Vec<f32>,
}

impl GeoRaster {
    /// Create a zero-filled raster.
    pub fn new(
        width: usize,
        height: usize,
        bands: usize,
        sample_type: SampleType,
        transform: AffineTransform,
        crs: Crs,
    ) -> Self {
        Self {
            width,
            height,
            bands,
            sample_type,
            transform,
            crs,
            nodata: None,
            data: vec![0.0; width * height * bands],
        }
    }

    /// Create a raster from band-sequential data.
    pub fn from_data(
        width: usize,
        height: usize,
        bands: usize,
        sample_type: SampleType,
        transform: AffineTransform,
        crs: Crs,
        data: Vec<f32>,
    ) -> Result<Self> {
        if data.len() != width * height * bands {
            return Err(RasterError::InvalidData(format!(
                "expected {} samples for {}x{}x{}, got {}",
                width * height * bands,
                width,
                height,
                bands,
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            bands,
            sample_type,
            transform,
            crs,
            nodata: None,
            data,
        })
    }

    /// Set the no-data value.
    pub fn with_nodata(mut self, nodata: Option<f64>) -> Self {
        self.nodata = nodata;
        self
    }

    /// Read only the header (dimensions, georeferencing, nodata) of a GeoTIFF.
    pub fn read_header<P: AsRef<Path>>(path: P) -> Result<RasterHeader> {
        let path = path.as_ref();
        let mut decoder = open_decoder(path)?;
        read_header_from(&mut decoder, path)
    }

    /// Load a raster from a GeoTIFF file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut decoder = open_decoder(path)?;
        let header = read_header_from(&mut decoder, path)?;

        let (sample_type, interleaved) = decode_samples(&mut decoder)?;

        let pixels = header.width * header.height;
        if interleaved.len() < pixels * header.bands {
            return Err(RasterError::InvalidGeoTiff {
                path: path.to_path_buf(),
                reason: format!(
                    "decoded {} samples, expected {}",
                    interleaved.len(),
                    pixels * header.bands
                ),
            });
        }

        // Chunky (pixel-interleaved) to band-sequential
        let bands = header.bands;
        let mut data = vec![0.0f32; pixels * bands];
        for (pixel, chunk) in interleaved.chunks_exact(bands).take(pixels).enumerate() {
            for (band, value) in chunk.iter().enumerate() {
                data[band * pixels + pixel] = *value;
            }
        }

        Ok(Self {
            width: header.width,
            height: header.height,
            bands,
            sample_type,
            transform: header.transform,
            crs: header.crs,
            nodata: header.nodata,
            data,
        })
    }

    /// Width in pixels.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Number of bands.
    pub fn bands(&self) -> usize {
        self.bands
    }

    /// Storage type of the samples.
    pub fn sample_type(&self) -> SampleType {
        self.sample_type
    }

    /// Pixel-to-CRS transform.
    pub fn transform(&self) -> AffineTransform {
        self.transform
    }

    /// Coordinate reference system.
    pub fn crs(&self) -> Crs {
        self.crs
    }

    /// No-data value, if any.
    pub fn nodata(&self) -> Option<f64> {
        self.nodata
    }

    /// Header describing this raster.
    pub fn header(&self) -> RasterHeader {
        RasterHeader {
            width: self.width,
            height: self.height,
            bands: self.bands,
            transform: self.transform,
            crs: self.crs,
            nodata: self.nodata,
        }
    }

    /// Bounds in CRS units.
    pub fn bounds(&self) -> Bounds {
        self.transform.bounds(self.width, self.height)
    }

    /// All samples, band-sequential.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Samples of one band (0-based), row-major.
    pub fn band(&self, band: usize) -> &[f32] {
        let len = self.width * self.height;
        &self.data[band * len..(band + 1) * len]
    }

    /// Mutable samples of one band (0-based).
    pub fn band_mut(&mut self, band: usize) -> &mut [f32] {
        let len = self.width * self.height;
        &mut self.data[band * len..(band + 1) * len]
    }

    /// Value at a pixel (band is 0-based).
    pub fn get(&self, band: usize, col: usize, row: usize) -> f32 {
        self.data[band * self.width * self.height + row * self.width + col]
    }

    /// Set the value at a pixel (band is 0-based).
    pub fn set(&mut self, band: usize, col: usize, row: usize, value: f32) {
        let idx = band * self.width * self.height + row * self.width + col;
        self.data[idx] = value;
    }

    /// Whether a sample equals the no-data value.
    pub fn is_nodata(&self, value: f32) -> bool {
        match self.nodata {
            Some(nodata) if nodata.is_nan() => value.is_nan(),
            Some(nodata) => (value as f64 - nodata).abs() < 1e-6,
            None => false,
        }
    }

    /// A new raster holding only the given 1-based bands, in that order.
    pub fn select_bands(&self, bands: &[usize]) -> Result<GeoRaster> {
        let len = self.width * self.height;
        let mut data = Vec::with_capacity(len * bands.len());
        for &band in bands {
            if band == 0 || band > self.bands {
                return Err(RasterError::BandOutOfRange {
                    band,
                    available: self.bands,
                });
            }
            data.extend_from_slice(self.band(band - 1));
        }
        Ok(Self {
            bands: bands.len(),
            data,
            ..self.clone_header()
        })
    }

    /// Half-resolution copy, averaging each 2x2 block and ignoring no-data.
    ///
    /// Used to build overview levels.
    pub fn downsample_2x(&self) -> GeoRaster {
        let width = self.width.div_ceil(2).max(1);
        let height = self.height.div_ceil(2).max(1);
        let t = self.transform;
        let transform = AffineTransform::new(t.a * 2.0, t.b * 2.0, t.c, t.d * 2.0, t.e * 2.0, t.f);
        let fill = self.nodata.unwrap_or(0.0) as f32;

        let mut out = GeoRaster::new(width, height, self.bands, self.sample_type, transform, self.crs)
            .with_nodata(self.nodata);

        for band in 0..self.bands {
            let src = self.band(band);
            let dst = out.band_mut(band);
            for row in 0..height {
                for col in 0..width {
                    let mut sum = 0.0f64;
                    let mut count = 0u32;
                    for dy in 0..2 {
                        for dx in 0..2 {
                            let (c, r) = (col * 2 + dx, row * 2 + dy);
                            if c >= self.width || r >= self.height {
                                continue;
                            }
                            let v = src[r * self.width + c];
                            if !self.is_nodata(v) {
                                sum += v as f64;
                                count += 1;
                            }
                        }
                    }
                    dst[row * width + col] = if count > 0 {
                        (sum / count as f64) as f32
                    } else {
                        fill
                    };
                }
            }
        }
        out
    }

    fn clone_header(&self) -> GeoRaster {
        GeoRaster {
            width: self.width,
            height: self.height,
            bands: self.bands,
            sample_type: self.sample_type,
            transform: self.transform,
            crs: self.crs,
            nodata: self.nodata,
            data: Vec::new(),
        }
    }
}

pub(crate) fn open_decoder(path: &Path) -> Result<Decoder<BufReader<File>>> {
    let file = File::open(path)?;
    let mut decoder = Decoder::new(BufReader::new(file))?;

    // Basemap quads are 4096 x 4096 x 4 bands; leave room for larger mosaics
    let mut limits = Limits::default();
    limits.decoding_buffer_size = 2 * 1024 * 1024 * 1024; // 2 GB
    limits.intermediate_buffer_size = 1024 * 1024 * 1024; // 1 GB
    limits.ifd_value_size = 1024 * 1024 * 1024;
    decoder = decoder.with_limits(limits);
    Ok(decoder)
}

pub(crate) fn read_header_from<R: Read + Seek>(
    decoder: &mut Decoder<R>,
    path: &Path,
) -> Result<RasterHeader> {
    let (width, height) = decoder.dimensions()?;
    let bands = match decoder.colortype()? {
        ColorType::Gray(_) => 1,
        ColorType::GrayA(_) => 2,
        ColorType::RGB(_) => 3,
        ColorType::RGBA(_) | ColorType::CMYK(_) => 4,
        ColorType::Multiband { num_samples, .. } => num_samples as usize,
        other => {
            return Err(RasterError::UnsupportedDataType(format!("{other:?}")));
        }
    };

    let transform = read_geotransform(decoder, path)?;
    let crs = read_crs(decoder, path)?;
    let nodata = read_nodata_value(decoder);

    Ok(RasterHeader {
        width: width as usize,
        height: height as usize,
        bands,
        transform,
        crs,
        nodata,
    })
}

/// Read the pixel-to-CRS transform from ModelTransformation or tiepoint/scale tags.
fn read_geotransform<R: Read + Seek>(
    decoder: &mut Decoder<R>,
    path: &Path,
) -> Result<AffineTransform> {
    if let Ok(m) = decoder.get_tag_f64_vec(Tag::Unknown(MODEL_TRANSFORMATION_TAG)) {
        if m.len() >= 8 {
            return Ok(AffineTransform::new(m[0], m[1], m[3], m[4], m[5], m[7]));
        }
    }

    let tiepoint = decoder.get_tag_f64_vec(Tag::Unknown(MODEL_TIEPOINT_TAG));
    let pixel_scale = decoder.get_tag_f64_vec(Tag::Unknown(MODEL_PIXEL_SCALE_TAG));

    if let (Ok(tiepoint), Ok(scale)) = (tiepoint, pixel_scale) {
        if tiepoint.len() >= 6 && scale.len() >= 2 {
            // Tiepoint format: [i, j, k, x, y, z] ties pixel (i, j) to (x, y)
            let (i, j) = (tiepoint[0], tiepoint[1]);
            let (x, y) = (tiepoint[3], tiepoint[4]);
            let (sx, sy) = (scale[0], scale[1]);
            return Ok(AffineTransform::new(sx, 0.0, x - i * sx, 0.0, -sy, y + j * sy));
        }
    }

    Err(RasterError::InvalidGeoTiff {
        path: path.to_path_buf(),
        reason: "no ModelTransformation or ModelTiepoint/ModelPixelScale tags".to_string(),
    })
}

/// Read the EPSG code from the GeoKeyDirectory.
fn read_crs<R: Read + Seek>(decoder: &mut Decoder<R>, path: &Path) -> Result<Crs> {
    let invalid = |reason: &str| RasterError::InvalidGeoTiff {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    let keys = decoder
        .get_tag_u16_vec(Tag::Unknown(GEO_KEY_DIRECTORY_TAG))
        .map_err(|_| invalid("missing GeoKeyDirectory"))?;

    if keys.len() < 4 {
        return Err(invalid("truncated GeoKeyDirectory"));
    }

    // Header: [version, revision, minor, count] then count x [id, location, count, value]
    let count = keys[3] as usize;
    let mut geographic = None;
    let mut projected = None;
    for entry in keys[4..].chunks_exact(4).take(count) {
        let (id, location, value) = (entry[0], entry[1], entry[3]);
        if location != 0 {
            continue;
        }
        match id {
            PROJECTED_CS_TYPE_GEO_KEY => projected = Some(value),
            GEOGRAPHIC_TYPE_GEO_KEY => geographic = Some(value),
            _ => {}
        }
    }

    let code = projected
        .or(geographic)
        .filter(|code| *code != USER_DEFINED_GEO_KEY_VALUE)
        .ok_or_else(|| invalid("no EPSG code in GeoKeyDirectory"))?;
    Crs::from_epsg(code)
}

/// Try to read the no-data value from the GDAL_NODATA tag.
fn read_nodata_value<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<f64> {
    decoder
        .get_tag_ascii_string(Tag::Unknown(GDAL_NODATA_TAG))
        .ok()
        .and_then(|s| s.trim_matches(char::from(0)).trim().parse().ok())
}

/// Decode the pixel data and report its sample type.
fn decode_samples<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<(SampleType, Vec<f32>)> {
    let result = decoder.read_image()?;

    #[allow(unreachable_patterns)]
    let decoded = match result {
        DecodingResult::U8(data) => Ok((SampleType::U8, data.into_iter().map(|v| v as f32).collect())),
        DecodingResult::I8(data) => Ok((SampleType::I8, data.into_iter().map(|v| v as f32).collect())),
        DecodingResult::U16(data) => Ok((SampleType::U16, data.into_iter().map(|v| v as f32).collect())),
        DecodingResult::I16(data) => Ok((SampleType::I16, data.into_iter().map(|v| v as f32).collect())),
        DecodingResult::U32(data) => Ok((SampleType::U32, data.into_iter().map(|v| v as f32).collect())),
        DecodingResult::I32(data) => Ok((SampleType::I32, data.into_iter().map(|v| v as f32).collect())),
        DecodingResult::F32(data) => Ok((SampleType::F32, data)),
        DecodingResult::F64(data) => Ok((SampleType::F64, data.into_iter().map(|v| v as f32).collect())),
        DecodingResult::U64(_) => Err(RasterError::UnsupportedDataType("uint64".to_string())),
        DecodingResult::I64(_) => Err(RasterError::UnsupportedDataType("int64".to_string())),
        _ => Err(RasterError::UnsupportedDataType("unknown sample format".to_string())),
    };
    decoded
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_raster() -> GeoRaster {
        let transform = AffineTransform::from_origin(0.0, 4.0, 1.0, 1.0);
        let data: Vec<f32> = (0..32).map(|v| v as f32).collect();
        GeoRaster::from_data(4, 4, 2, SampleType::U16, transform, Crs::WGS84, data).unwrap()
    }

    #[test]
    fn test_from_data_checks_length() {
        let transform = AffineTransform::from_origin(0.0, 1.0, 1.0, 1.0);
        let err = GeoRaster::from_data(2, 2, 1, SampleType::U8, transform, Crs::WGS84, vec![0.0; 3]);
        assert!(matches!(err, Err(RasterError::InvalidData(_))));
    }

    #[test]
    fn test_band_access() {
        let r = sample_raster();
        assert_eq!(r.band(1)[0], 16.0);
        assert_eq!(r.get(0, 3, 1), 7.0);
        assert_eq!(r.get(1, 0, 0), 16.0);
    }

    #[test]
    fn test_select_bands_reorders() {
        let r = sample_raster();
        let s = r.select_bands(&[2, 1]).unwrap();
        assert_eq!(s.bands(), 2);
        assert_eq!(s.band(0), r.band(1));
        assert_eq!(s.band(1), r.band(0));
        assert!(matches!(
            r.select_bands(&[3]),
            Err(RasterError::BandOutOfRange { band: 3, available: 2 })
        ));
    }

    #[test]
    fn test_downsample_skips_nodata() {
        let transform = AffineTransform::from_origin(0.0, 2.0, 1.0, 1.0);
        let r = GeoRaster::from_data(
            2,
            2,
            1,
            SampleType::U16,
            transform,
            Crs::WGS84,
            vec![10.0, 0.0, 20.0, 30.0],
        )
        .unwrap()
        .with_nodata(Some(0.0));
        let d = r.downsample_2x();
        assert_eq!((d.width(), d.height()), (1, 1));
        assert_eq!(d.get(0, 0, 0), 20.0);
        assert_eq!(d.transform().a, 2.0);
        assert_eq!(d.transform().e, -2.0);
    }

    #[test]
    fn test_nodata_nan() {
        let r = sample_raster().with_nodata(Some(f64::NAN));
        assert!(r.is_nodata(f32::NAN));
        assert!(!r.is_nodata(0.0));
    }
}
