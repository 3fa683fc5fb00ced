//! GeoTIFF writer for in-memory rasters.
//!
//! Pure Rust (no GDAL): pixel data goes through the `tiff` crate's low-level
//! directory encoder so that any band count and sample type can be written,
//! together with the GeoTIFF georeferencing tags and GDAL's no-data tag.
//!
//! Two layouts are supported: plain strips (used for raw retiled output and
//! spooled mosaics) and internal tiles with optional 2x overview levels (used
//! by the in-process cloud-optimized codec).

use std::fs::File;
use std::io::{BufWriter, Seek, Write};
use std::path::Path;

use tiff::encoder::{DirectoryEncoder, TiffEncoder, TiffKind};
use tiff::tags::Tag;

use crate::raster::{
    GDAL_NODATA_TAG, GEOGRAPHIC_TYPE_GEO_KEY, GEO_KEY_DIRECTORY_TAG, MODEL_PIXEL_SCALE_TAG,
    MODEL_TIEPOINT_TAG, MODEL_TRANSFORMATION_TAG, PROJECTED_CS_TYPE_GEO_KEY,
};
use crate::{GeoRaster, RasterError, Result, SampleType};

// Baseline TIFF tags not named by the tiff crate
const NEW_SUBFILE_TYPE_TAG: u16 = 254;
const SUBFILE_REDUCED_IMAGE: u32 = 1;

// GeoKey IDs and values
const GT_MODEL_TYPE_GEO_KEY: u16 = 1024;
const GT_RASTER_TYPE_GEO_KEY: u16 = 1025;
const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_AREA: u16 = 1;

/// Default rows per strip for striped output.
pub const DEFAULT_ROWS_PER_STRIP: u32 = 64;

/// On-disk organisation of the pixel data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// Horizontal strips of `rows_per_strip` rows.
    Striped {
        /// Rows per strip.
        rows_per_strip: u32,
    },
    /// Square internal tiles, optionally followed by reduced-resolution overviews.
    Tiled {
        /// Tile edge in pixels (a multiple of 16).
        tile_size: u32,
        /// Append 2x overview levels until the image fits in one tile.
        overviews: bool,
    },
}

impl Default for Layout {
    fn default() -> Self {
        Layout::Striped {
            rows_per_strip: DEFAULT_ROWS_PER_STRIP,
        }
    }
}

/// Builder for configuring GeoTIFF output.
pub struct GeoTiffWriter<'a> {
    raster: &'a GeoRaster,
    layout: Layout,
}

impl<'a> GeoTiffWriter<'a> {
    /// Create a new GeoTIFF writer for a raster.
    #[must_use]
    pub fn new(raster: &'a GeoRaster) -> Self {
        Self {
            raster,
            layout: Layout::default(),
        }
    }

    /// Set the layout.
    #[must_use]
    pub fn layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }

    /// Write to a file path.
    pub fn write<P: AsRef<Path>>(self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        self.write_to(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Write to any writer that implements Write + Seek.
    pub fn write_to<W: Write + Seek>(self, writer: W) -> Result<()> {
        let raster = self.raster;
        if raster.width() == 0 || raster.height() == 0 || raster.bands() == 0 {
            return Err(RasterError::InvalidData(
                "raster has zero dimensions".to_string(),
            ));
        }

        let mut encoder = TiffEncoder::new(writer)?;

        match self.layout {
            Layout::Striped { rows_per_strip } => {
                let mut dir = encoder.new_directory()?;
                write_common_tags(&mut dir, raster)?;
                write_geotiff_tags(&mut dir, raster)?;
                write_strips(&mut dir, raster, rows_per_strip.max(1))?;
                dir.finish()?;
            }
            Layout::Tiled {
                tile_size,
                overviews,
            } => {
                if tile_size == 0 || tile_size % 16 != 0 {
                    return Err(RasterError::InvalidData(format!(
                        "tile size {tile_size} is not a positive multiple of 16"
                    )));
                }

                let mut dir = encoder.new_directory()?;
                write_common_tags(&mut dir, raster)?;
                write_geotiff_tags(&mut dir, raster)?;
                write_tiles(&mut dir, raster, tile_size)?;
                dir.finish()?;

                if overviews {
                    let mut level = raster.downsample_2x();
                    loop {
                        let mut dir = encoder.new_directory()?;
                        dir.write_tag(Tag::Unknown(NEW_SUBFILE_TYPE_TAG), SUBFILE_REDUCED_IMAGE)?;
                        write_common_tags(&mut dir, &level)?;
                        write_tiles(&mut dir, &level, tile_size)?;
                        dir.finish()?;

                        let fits = level.width() <= tile_size as usize
                            && level.height() <= tile_size as usize;
                        if fits {
                            break;
                        }
                        level = level.downsample_2x();
                    }
                }
            }
        }
        Ok(())
    }
}

impl GeoRaster {
    /// Write this raster to a striped GeoTIFF.
    pub fn write_geotiff<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        GeoTiffWriter::new(self).write(path)
    }

    /// Get a GeoTIFF writer builder for more control over layout.
    #[must_use]
    pub fn geotiff_writer(&self) -> GeoTiffWriter<'_> {
        GeoTiffWriter::new(self)
    }
}

fn write_common_tags<W: Write + Seek, K: TiffKind>(
    dir: &mut DirectoryEncoder<W, K>,
    raster: &GeoRaster,
) -> Result<()> {
    let bands = raster.bands();
    let sample_type = raster.sample_type();

    dir.write_tag(Tag::ImageWidth, raster.width() as u32)?;
    dir.write_tag(Tag::ImageLength, raster.height() as u32)?;

    let bits_per_sample: Vec<u16> = vec![sample_type.bits(); bands];
    dir.write_tag(Tag::BitsPerSample, bits_per_sample.as_slice())?;

    // No compression; the cloud-optimized step decides on compression
    dir.write_tag(Tag::Compression, 1u16)?;

    // BlackIsZero works for any band count
    dir.write_tag(Tag::PhotometricInterpretation, 1u16)?;
    dir.write_tag(Tag::SamplesPerPixel, bands as u16)?;

    let sample_format: Vec<u16> = vec![sample_type.sample_format(); bands];
    dir.write_tag(Tag::SampleFormat, sample_format.as_slice())?;

    // Chunky (interleaved)
    dir.write_tag(Tag::PlanarConfiguration, 1u16)?;

    if bands > 1 {
        let extra_samples: Vec<u16> = vec![0; bands - 1];
        dir.write_tag(Tag::ExtraSamples, extra_samples.as_slice())?;
    }

    if let Some(nodata) = raster.nodata() {
        let text = format_nodata(nodata);
        dir.write_tag(Tag::Unknown(GDAL_NODATA_TAG), text.as_str())?;
    }

    Ok(())
}

fn write_geotiff_tags<W: Write + Seek, K: TiffKind>(
    dir: &mut DirectoryEncoder<W, K>,
    raster: &GeoRaster,
) -> Result<()> {
    let t = raster.transform();

    if t.is_rectilinear() && t.a > 0.0 && t.e < 0.0 {
        // ModelPixelScale: [ScaleX, ScaleY, ScaleZ]
        let pixel_scale = [t.a, -t.e, 0.0];
        dir.write_tag(Tag::Unknown(MODEL_PIXEL_SCALE_TAG), pixel_scale.as_slice())?;

        // ModelTiepoint: ties pixel (0, 0) to (c, f)
        let tiepoint = [0.0, 0.0, 0.0, t.c, t.f, 0.0];
        dir.write_tag(Tag::Unknown(MODEL_TIEPOINT_TAG), tiepoint.as_slice())?;
    } else {
        let matrix = [
            t.a, t.b, 0.0, t.c, //
            t.d, t.e, 0.0, t.f, //
            0.0, 0.0, 0.0, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        ];
        dir.write_tag(Tag::Unknown(MODEL_TRANSFORMATION_TAG), matrix.as_slice())?;
    }

    let geokeys = build_geokey_directory(raster);
    dir.write_tag(Tag::Unknown(GEO_KEY_DIRECTORY_TAG), geokeys.as_slice())?;
    Ok(())
}

fn build_geokey_directory(raster: &GeoRaster) -> Vec<u16> {
    // [KeyDirectoryVersion, KeyRevision, MinorRevision, NumberOfKeys,
    //  KeyID1, TIFFTagLocation1, Count1, Value_Offset1, ...]
    let crs = raster.crs();
    let geographic = crs.is_geographic();

    let mut keys = vec![1, 1, 0, 3];
    keys.extend_from_slice(&[
        GT_MODEL_TYPE_GEO_KEY,
        0,
        1,
        if geographic {
            MODEL_TYPE_GEOGRAPHIC
        } else {
            MODEL_TYPE_PROJECTED
        },
    ]);
    keys.extend_from_slice(&[GT_RASTER_TYPE_GEO_KEY, 0, 1, RASTER_PIXEL_IS_AREA]);
    if geographic {
        keys.extend_from_slice(&[GEOGRAPHIC_TYPE_GEO_KEY, 0, 1, crs.epsg()]);
    } else {
        keys.extend_from_slice(&[PROJECTED_CS_TYPE_GEO_KEY, 0, 1, crs.epsg()]);
    }
    keys
}

fn write_strips<W: Write + Seek, K: TiffKind>(
    dir: &mut DirectoryEncoder<W, K>,
    raster: &GeoRaster,
    rows_per_strip: u32,
) -> Result<()> {
    let (width, height, bands) = (raster.width(), raster.height(), raster.bands());
    let plane = width * height;
    let data = raster.data();

    let mut offsets: Vec<u32> = Vec::new();
    let mut byte_counts: Vec<u32> = Vec::new();

    let mut row = 0usize;
    while row < height {
        let end = (row + rows_per_strip as usize).min(height);
        let mut samples = Vec::with_capacity((end - row) * width * bands);
        for r in row..end {
            for c in 0..width {
                let pixel = r * width + c;
                for band in 0..bands {
                    samples.push(data[band * plane + pixel]);
                }
            }
        }
        let bytes = encode_samples(raster.sample_type(), &samples);
        offsets.push(classic_offset(dir.write_data(bytes.as_slice())?)?);
        byte_counts.push(bytes.len() as u32);
        row = end;
    }

    dir.write_tag(Tag::RowsPerStrip, rows_per_strip)?;
    dir.write_tag(Tag::StripOffsets, offsets.as_slice())?;
    dir.write_tag(Tag::StripByteCounts, byte_counts.as_slice())?;
    Ok(())
}

fn write_tiles<W: Write + Seek, K: TiffKind>(
    dir: &mut DirectoryEncoder<W, K>,
    raster: &GeoRaster,
    tile_size: u32,
) -> Result<()> {
    let (width, height, bands) = (raster.width(), raster.height(), raster.bands());
    let plane = width * height;
    let data = raster.data();
    let size = tile_size as usize;
    let fill = raster.nodata().unwrap_or(0.0) as f32;

    let tiles_across = width.div_ceil(size);
    let tiles_down = height.div_ceil(size);

    let mut offsets: Vec<u32> = Vec::with_capacity(tiles_across * tiles_down);
    let mut byte_counts: Vec<u32> = Vec::with_capacity(tiles_across * tiles_down);

    for tile_row in 0..tiles_down {
        for tile_col in 0..tiles_across {
            // Edge tiles are padded to full size
            let mut samples = vec![fill; size * size * bands];
            for y in 0..size {
                let r = tile_row * size + y;
                if r >= height {
                    break;
                }
                for x in 0..size {
                    let c = tile_col * size + x;
                    if c >= width {
                        break;
                    }
                    let pixel = r * width + c;
                    let base = (y * size + x) * bands;
                    for band in 0..bands {
                        samples[base + band] = data[band * plane + pixel];
                    }
                }
            }
            let bytes = encode_samples(raster.sample_type(), &samples);
            offsets.push(classic_offset(dir.write_data(bytes.as_slice())?)?);
            byte_counts.push(bytes.len() as u32);
        }
    }

    dir.write_tag(Tag::TileWidth, tile_size)?;
    dir.write_tag(Tag::TileLength, tile_size)?;
    dir.write_tag(Tag::TileOffsets, offsets.as_slice())?;
    dir.write_tag(Tag::TileByteCounts, byte_counts.as_slice())?;
    Ok(())
}

/// Offsets must fit in 32 bits in a classic (non-Big) TIFF.
fn classic_offset(offset: u64) -> Result<u32> {
    u32::try_from(offset).map_err(|_| {
        RasterError::InvalidData(format!("offset {offset} exceeds the 4 GiB classic TIFF limit"))
    })
}

/// Convert samples to the on-disk representation in native byte order,
/// matching the byte order the encoder declares in the file header.
fn encode_samples(sample_type: SampleType, samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * sample_type.bits() as usize / 8);
    match sample_type {
        SampleType::U8 => bytes.extend(samples.iter().map(|&v| v as u8)),
        SampleType::I8 => bytes.extend(samples.iter().flat_map(|&v| (v as i8).to_ne_bytes())),
        SampleType::U16 => bytes.extend(samples.iter().flat_map(|&v| (v as u16).to_ne_bytes())),
        SampleType::I16 => bytes.extend(samples.iter().flat_map(|&v| (v as i16).to_ne_bytes())),
        SampleType::U32 => bytes.extend(samples.iter().flat_map(|&v| (v as u32).to_ne_bytes())),
        SampleType::I32 => bytes.extend(samples.iter().flat_map(|&v| (v as i32).to_ne_bytes())),
        SampleType::F32 => bytes.extend(samples.iter().flat_map(|&v| v.to_ne_bytes())),
        SampleType::F64 => bytes.extend(samples.iter().flat_map(|&v| (v as f64).to_ne_bytes())),
    }
    bytes
}

fn format_nodata(nodata: f64) -> String {
    if nodata.is_nan() {
        "nan".to_string()
    } else if nodata.fract() == 0.0 && nodata.abs() < 1e15 {
        format!("{}", nodata as i64)
    } else {
        format!("{nodata}")
    }
}
