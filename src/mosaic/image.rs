use crate::error::{MosaicError, Result};
use crate::mosaic::{CHANNELS, TILE_H, TILE_W};
use image::{DynamicImage, RgbImage};
use std::ops::Range;
use std::path::Path;

/// Bits per pixel of the only accepted colour format (interleaved RGB24).
pub const DEPTH_BITS: u32 = 24;

/// An RGB24 image whose sides are multiples of the tile size, stored row-major
/// with interleaved channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    width: usize,
    height: usize,
    pixels: Vec<u8>,
}

impl Image {
    /// Validate dimensions, depth and buffer size. Every violation here is a
    /// configuration error raised before any matching starts.
    pub fn new(width: usize, height: usize, depth_bits: u32, pixels: Vec<u8>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(MosaicError::InvalidImage(format!("empty image {}x{}", width, height)));
        }
        if width % TILE_W != 0 || height % TILE_H != 0 {
            return Err(MosaicError::InvalidImage(format!(
                "width and height should be multiple of {}, got {}x{}",
                TILE_W, width, height
            )));
        }
        if depth_bits != DEPTH_BITS {
            return Err(MosaicError::InvalidImage(format!(
                "depth should be {}, got {}",
                DEPTH_BITS, depth_bits
            )));
        }
        let expected = width * height * CHANNELS;
        if pixels.len() != expected {
            return Err(MosaicError::InvalidImage(format!(
                "pixel buffer holds {} bytes, expected {}",
                pixels.len(),
                expected
            )));
        }
        Ok(Self { width, height, pixels })
    }

    /// Load an image file and convert it to interleaved RGB24.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let img = image::open(path)?;
        Self::from_dynamic_image(img)
    }

    pub fn from_dynamic_image(img: DynamicImage) -> Result<Self> {
        match img {
            DynamicImage::ImageRgb8(rgb) => Self::from_rgb_image(&rgb),
            other => Self::from_rgb_image(&other.to_rgb8()),
        }
    }

    pub fn from_rgb_image(img: &RgbImage) -> Result<Self> {
        Self::new(
            img.width() as usize,
            img.height() as usize,
            DEPTH_BITS,
            img.as_raw().clone(),
        )
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn tiles_per_row(&self) -> usize {
        self.width / TILE_W
    }

    pub fn tile_rows(&self) -> usize {
        self.height / TILE_H
    }

    pub fn tile_count(&self) -> usize {
        self.tiles_per_row() * self.tile_rows()
    }

    /// Bytes in one row of tiles (`width * 32 * 3`).
    pub fn tile_row_bytes(&self) -> usize {
        self.width * TILE_H * CHANNELS
    }

    /// Bytes of the interleaved buffer covering tile rows `rows`.
    pub fn tile_rows_bytes(&self, rows: Range<usize>) -> &[u8] {
        let row_bytes = self.tile_row_bytes();
        &self.pixels[rows.start * row_bytes..rows.end * row_bytes]
    }

    /// Interleaved view starting at the top-left pixel of tile `index`. Rows of
    /// the tile are `width * 3` bytes apart.
    pub fn tile_origin(&self, index: usize) -> &[u8] {
        let tile_h = index / self.tiles_per_row();
        let tile_w = index % self.tiles_per_row();
        let offset = (tile_h * TILE_H * self.width + tile_w * TILE_W) * CHANNELS;
        &self.pixels[offset..]
    }

    /// Tile rows that contain any of the tiles in `tiles`.
    pub fn covering_rows(&self, tiles: &Range<usize>) -> Range<usize> {
        if tiles.is_empty() {
            return 0..0;
        }
        let per_row = self.tiles_per_row();
        tiles.start / per_row..tiles.end.div_ceil(per_row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unaligned_dimensions() {
        let err = Image::new(48, 32, 24, vec![0; 48 * 32 * 3]).unwrap_err();
        assert!(matches!(err, MosaicError::InvalidImage(_)));
    }

    #[test]
    fn rejects_wrong_depth_and_length() {
        assert!(Image::new(32, 32, 32, vec![0; 32 * 32 * 3]).is_err());
        assert!(Image::new(32, 32, 24, vec![0; 10]).is_err());
        assert!(Image::new(0, 32, 24, Vec::new()).is_err());
    }

    #[test]
    fn tile_geometry() {
        let img = Image::new(96, 64, 24, vec![0; 96 * 64 * 3]).unwrap();
        assert_eq!(img.tiles_per_row(), 3);
        assert_eq!(img.tile_rows(), 2);
        assert_eq!(img.tile_count(), 6);
        assert_eq!(img.tile_row_bytes(), 96 * 32 * 3);
        assert_eq!(img.covering_rows(&(2..4)), 0..2);
        assert_eq!(img.covering_rows(&(3..6)), 1..2);
        assert_eq!(img.covering_rows(&(0..3)), 0..1);
    }

    #[test]
    fn tile_origin_points_at_top_left_pixel() {
        let mut pixels = vec![0u8; 64 * 64 * 3];
        // top-left pixel of tile 3 (row 1, column 1), red channel
        pixels[(32 * 64 + 32) * 3] = 200;
        let img = Image::new(64, 64, 24, pixels).unwrap();
        assert_eq!(img.tile_origin(3)[0], 200);
    }

    #[test]
    fn converts_from_rgb_image() {
        let rgb = RgbImage::from_pixel(32, 64, image::Rgb([1, 2, 3]));
        let img = Image::from_rgb_image(&rgb).unwrap();
        assert_eq!(img.tile_count(), 2);
        assert_eq!(&img.pixels()[..3], &[1, 2, 3]);
    }
}
