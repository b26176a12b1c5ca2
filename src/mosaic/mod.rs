pub mod dataset;
pub mod image;
pub mod layout;
pub mod partition;

use crate::error::{MosaicError, Result};
use ::image::RgbImage;

/// Tile width in pixels
pub const TILE_W: usize = 32;
/// Tile height in pixels
pub const TILE_H: usize = 32;
/// Colour channels per pixel
pub const CHANNELS: usize = 3;
/// Bytes in one tile, in either layout
pub const TILE_LEN: usize = TILE_W * TILE_H * CHANNELS;
/// Largest possible squared distance between two tiles
pub const MAX_DIST: u32 = (TILE_LEN * 255 * 255) as u32;

/// Chosen corpus entry for every global tile index, in row-major grid order.
pub type IndexArray = Vec<u32>;

pub use self::dataset::{CIFAR10_SIZE, Dataset};
pub use self::image::Image;

/// Build the output mosaic: every tile of a `width` x `height` image is
/// replaced by the corpus entry `indices` selects for it.
pub fn assemble_mosaic(
    indices: &[u32],
    dataset: &Dataset,
    width: usize,
    height: usize,
) -> Result<RgbImage> {
    let tiles_per_row = width / TILE_W;
    let tile_count = tiles_per_row * (height / TILE_H);
    if width % TILE_W != 0 || height % TILE_H != 0 {
        return Err(MosaicError::InvalidImage(format!(
            "cannot tile a {}x{} mosaic",
            width, height
        )));
    }
    if indices.len() != tile_count {
        return Err(MosaicError::InvalidImage(format!(
            "{} indices for {} tiles",
            indices.len(),
            tile_count
        )));
    }

    let mut pixels = vec![0u8; width * height * CHANNELS];
    for (tile, &index) in indices.iter().enumerate() {
        let index = index as usize;
        if index >= dataset.len() {
            return Err(MosaicError::InvalidDataset(format!(
                "tile {} refers to entry {} of a {}-entry corpus",
                tile,
                index,
                dataset.len()
            )));
        }
        let sh = tile / tiles_per_row;
        let sw = tile % tiles_per_row;
        let offset = (sh * TILE_H * width + sw * TILE_W) * CHANNELS;
        layout::channel_major_to_interleaved(&mut pixels[offset..], dataset.entry(index), width);
    }

    RgbImage::from_raw(width as u32, height as u32, pixels)
        .ok_or_else(|| MosaicError::InvalidImage("mosaic buffer size mismatch".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_distance_fits_in_i32() {
        assert!(MAX_DIST < i32::MAX as u32);
    }

    #[test]
    fn assembles_selected_tiles() {
        let dataset = Dataset::from_tiles([vec![0u8; TILE_LEN], vec![255u8; TILE_LEN]]).unwrap();
        let mosaic = assemble_mosaic(&[0, 1], &dataset, 64, 32).unwrap();
        assert_eq!(mosaic.get_pixel(0, 0).0, [0, 0, 0]);
        assert_eq!(mosaic.get_pixel(40, 10).0, [255, 255, 255]);
    }

    #[test]
    fn rejects_out_of_range_index() {
        let dataset = Dataset::from_tiles([vec![0u8; TILE_LEN]]).unwrap();
        assert!(assemble_mosaic(&[3], &dataset, 32, 32).is_err());
    }
}
