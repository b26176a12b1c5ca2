//! Host-side layout conversion between interleaved (HWC) pixels and
//! channel-major (CHW) tiles.
//!
//! The device transform in `vulkan::transform` performs the same mapping as
//! [`convert_tile_row`]; the functions here are its reference and the thread
//! backend's per-tile fetch.

use crate::mosaic::{CHANNELS, TILE_H, TILE_LEN, TILE_W};
use crate::mosaic::image::Image;

/// Fetch one 32x32 tile from an interleaved buffer into channel-major `dest`.
///
/// `src` starts at the tile's top-left pixel; `width` is the source image width
/// in pixels (rows are `width * 3` bytes apart).
pub fn tile_to_channel_major(dest: &mut [u8], src: &[u8], width: usize) {
    debug_assert!(dest.len() >= TILE_LEN);
    for h in 0..TILE_H {
        for w in 0..TILE_W {
            for c in 0..CHANNELS {
                dest[(c * TILE_H + h) * TILE_W + w] = src[(h * width + w) * CHANNELS + c];
            }
        }
    }
}

/// Inverse of [`tile_to_channel_major`]: scatter a channel-major tile back into
/// an interleaved buffer whose rows are `width` pixels wide.
pub fn channel_major_to_interleaved(dest: &mut [u8], tile: &[u8], width: usize) {
    debug_assert!(tile.len() >= TILE_LEN);
    for h in 0..TILE_H {
        for w in 0..TILE_W {
            for c in 0..CHANNELS {
                dest[(h * width + w) * CHANNELS + c] = tile[(c * TILE_H + h) * TILE_W + w];
            }
        }
    }
}

/// Convert one row of tiles (`width * 32 * 3` interleaved bytes) into
/// `width / 32` consecutive channel-major tiles.
pub fn convert_tile_row(dest: &mut [u8], row: &[u8], width: usize) {
    let tiles = width / TILE_W;
    for (t, tile) in dest.chunks_exact_mut(TILE_LEN).take(tiles).enumerate() {
        tile_to_channel_major(tile, &row[t * TILE_W * CHANNELS..], width);
    }
}

/// Convert the whole image into channel-major tiles in global tile order.
pub fn to_channel_major_tiles(image: &Image) -> Vec<u8> {
    let row_bytes = image.tile_row_bytes();
    let mut out = vec![0u8; image.tile_count() * TILE_LEN];
    for (row, dest) in out.chunks_exact_mut(row_bytes).enumerate() {
        convert_tile_row(dest, image.tile_rows_bytes(row..row + 1), image.width());
    }
    out
}
