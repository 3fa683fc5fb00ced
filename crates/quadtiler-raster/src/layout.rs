//! Structural inspection of GeoTIFF files.

use std::path::Path;

use tiff::tags::Tag;

use crate::raster::{open_decoder, read_header_from};
use crate::{RasterError, RasterHeader, Result};

/// Internal organisation of a GeoTIFF: full-resolution header, tiling and
/// overview levels.
#[derive(Debug, Clone, PartialEq)]
pub struct TiffLayout {
    /// Header of the full-resolution image.
    pub header: RasterHeader,
    /// Internal tile size `(width, height)`, or `None` for striped files.
    pub tile_size: Option<(u32, u32)>,
    /// Dimensions of each reduced-resolution image, in file order.
    pub overviews: Vec<(u32, u32)>,
}

impl TiffLayout {
    /// Read the layout of a GeoTIFF.
    pub fn inspect<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut decoder = open_decoder(path)?;
        let header = read_header_from(&mut decoder, path)?;
        let tile_size = read_tile_size(&mut decoder)?;

        let mut overviews = Vec::new();
        while decoder.more_images() {
            decoder.next_image()?;
            overviews.push(decoder.dimensions()?);
        }

        Ok(Self {
            header,
            tile_size,
            overviews,
        })
    }

    /// Whether the file is internally tiled.
    pub fn is_tiled(&self) -> bool {
        self.tile_size.is_some()
    }

    /// Check the properties a cloud-optimized GeoTIFF must have: internal
    /// tiles and strictly shrinking overviews down to at most one tile.
    ///
    /// Returns the list of problems found; empty means valid.
    pub fn cloud_optimized_problems(&self) -> Vec<String> {
        let mut problems = Vec::new();

        let Some((tile_width, tile_height)) = self.tile_size else {
            problems.push("image is not internally tiled".to_string());
            return problems;
        };

        let full = (self.header.width as u32, self.header.height as u32);
        let needs_overviews = full.0 > tile_width || full.1 > tile_height;
        if needs_overviews && self.overviews.is_empty() {
            problems.push(format!(
                "{}x{} image larger than one {}x{} tile has no overviews",
                full.0, full.1, tile_width, tile_height
            ));
        }

        let mut previous = full;
        for &(w, h) in &self.overviews {
            if w >= previous.0 && h >= previous.1 {
                problems.push(format!(
                    "overview {w}x{h} is not smaller than {}x{}",
                    previous.0, previous.1
                ));
            }
            previous = (w, h);
        }

        if let Some(&(w, h)) = self.overviews.last() {
            if w > tile_width || h > tile_height {
                problems.push(format!("smallest overview {w}x{h} exceeds one tile"));
            }
        }

        problems
    }
}

fn read_tile_size<R: std::io::Read + std::io::Seek>(
    decoder: &mut tiff::decoder::Decoder<R>,
) -> Result<Option<(u32, u32)>> {
    let width = decoder.find_tag(Tag::TileWidth)?;
    let length = decoder.find_tag(Tag::TileLength)?;
    match (width, length) {
        (Some(w), Some(l)) => Ok(Some((w.into_u32()?, l.into_u32()?))),
        (None, None) => Ok(None),
        _ => Err(RasterError::InvalidData(
            "TileWidth and TileLength must appear together".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AffineTransform, Crs};

    fn layout(tile_size: Option<(u32, u32)>, overviews: Vec<(u32, u32)>) -> TiffLayout {
        TiffLayout {
            header: RasterHeader {
                width: 64,
                height: 64,
                bands: 4,
                transform: AffineTransform::from_origin(0.0, 0.0, 1.0, 1.0),
                crs: Crs::WGS84,
                nodata: None,
            },
            tile_size,
            overviews,
        }
    }

    #[test]
    fn test_valid_pyramid() {
        let l = layout(Some((16, 16)), vec![(32, 32), (16, 16)]);
        assert!(l.is_tiled());
        assert!(l.cloud_optimized_problems().is_empty());
    }

    #[test]
    fn test_striped_is_not_optimized() {
        let problems = layout(None, Vec::new()).cloud_optimized_problems();
        assert_eq!(problems, vec!["image is not internally tiled".to_string()]);
    }

    #[test]
    fn test_missing_and_stalled_overviews() {
        assert_eq!(layout(Some((16, 16)), Vec::new()).cloud_optimized_problems().len(), 1);
        let stalled = layout(Some((16, 16)), vec![(32, 32), (32, 32)]);
        assert_eq!(stalled.cloud_optimized_problems().len(), 2);
    }
}
