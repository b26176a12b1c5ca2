use crate::config::MosaicConfig;
use crate::error::{MosaicError, Result};
use crate::matcher::{TileMatcher, nearest_entry};
use crate::mosaic::layout::tile_to_channel_major;
use crate::mosaic::{Dataset, Image, TILE_LEN};
use crate::timer::PhaseTimer;
use log::{debug, info};
use rayon::prelude::*;
use std::ops::Range;

/// Host thread-pool matcher.
///
/// Each worker fetches its tile into a private channel-major scratch buffer
/// right before matching; no whole-image transform happens on this path.
#[derive(Debug, Clone)]
pub struct ThreadMatcher {
    threads: usize,
    early_exit: bool,
}

impl ThreadMatcher {
    pub fn new(config: &MosaicConfig) -> Self {
        Self {
            threads: config.thread_count(),
            early_exit: config.early_exit,
        }
    }

    pub fn threads(&self) -> usize {
        self.threads
    }
}

impl TileMatcher for ThreadMatcher {
    fn name(&self) -> &'static str {
        "threads"
    }

    fn parallel_units(&self) -> usize {
        1
    }

    fn compute_indices(
        &self,
        image: &Image,
        dataset: &Dataset,
        tiles: Range<usize>,
        out: &mut [u32],
    ) -> Result<()> {
        if out.len() != tiles.len() || tiles.end > image.tile_count() {
            return Err(MosaicError::InvalidConfig(format!(
                "tile range {:?} does not fit a {}-tile image with a {}-entry output",
                tiles,
                image.tile_count(),
                out.len()
            )));
        }

        // pool lives for this image only
        let timer = PhaseTimer::begin("[init] thread pool");
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .thread_name(|i| format!("photomosaic-{}", i))
            .build()?;
        timer.end();
        info!("Photomosaic thread-parallel path uses {} threads", pool.current_num_threads());

        let timer = PhaseTimer::begin("[photomosaic] compute time");
        let width = image.width();
        let early_exit = self.early_exit;
        let base = tiles.start;
        pool.install(|| {
            // The flattened range is the collapsed (tile_h, tile_w) grid; rayon's
            // adaptive splitting hands big chunks out first and steals the tail.
            out.par_iter_mut().enumerate().for_each_init(
                || vec![0u8; TILE_LEN],
                |scratch, (i, slot)| {
                    tile_to_channel_major(scratch, image.tile_origin(base + i), width);
                    *slot = nearest_entry(scratch, dataset, early_exit);
                },
            );
        });
        timer.end();
        debug!("Matched {} tiles against {} entries", tiles.len(), dataset.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient_image(width: usize, height: usize) -> Image {
        let pixels = (0..width * height * 3).map(|i| (i * 31 % 256) as u8).collect();
        Image::new(width, height, 24, pixels).unwrap()
    }

    #[test]
    fn rejects_mismatched_output() {
        let matcher = ThreadMatcher::new(&MosaicConfig::threads_only());
        let image = gradient_image(64, 32);
        let dataset = Dataset::new(vec![0u8; TILE_LEN]).unwrap();
        let mut out = vec![0u32; 1];
        assert!(matcher.compute_indices(&image, &dataset, 0..2, &mut out).is_err());
    }

    #[test]
    fn sub_range_writes_only_its_tiles() {
        let image = gradient_image(96, 32);
        let mut tile = vec![0u8; TILE_LEN];
        tile_to_channel_major(&mut tile, image.tile_origin(2), image.width());
        let dataset = Dataset::from_tiles([vec![0u8; TILE_LEN], tile]).unwrap();

        let config = MosaicConfig {
            threads: Some(2),
            ..MosaicConfig::threads_only()
        };
        let matcher = ThreadMatcher::new(&config);
        let mut out = vec![u32::MAX; 2];
        matcher.compute_indices(&image, &dataset, 1..3, &mut out).unwrap();
        assert_eq!(out[1], 1);
        assert!(out[0] <= 1);
    }
}
