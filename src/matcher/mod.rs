//! Exhaustive nearest-neighbour search of image tiles against the corpus.
//!
//! Distances are plain sums of squared byte differences over the 3072
//! channel-major bytes of a tile. The winner is the first corpus index with
//! the smallest distance (strict less-than), so ties resolve to the lowest
//! index on every backend.

pub mod cpu;

use crate::config::{Backend, MosaicConfig};
use crate::error::Result;
use crate::mosaic::{Dataset, Image};
use crate::vulkan::VulkanHost;
use log::{info, warn};
use std::ops::Range;

pub use cpu::ThreadMatcher;

/// The shared "compute indices for a tile range" capability every execution
/// strategy provides.
pub trait TileMatcher: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Independent execution units (devices) inside this process. Drives the
    /// degenerate-load policy at the process level.
    fn parallel_units(&self) -> usize;

    /// Match every tile in the global index range `tiles` and write the chosen
    /// corpus index of tile `tiles.start + i` to `out[i]`.
    fn compute_indices(
        &self,
        image: &Image,
        dataset: &Dataset,
        tiles: Range<usize>,
        out: &mut [u32],
    ) -> Result<()>;
}

/// Squared distance between two channel-major tiles.
pub fn squared_distance(a: &[u8], b: &[u8]) -> u32 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| {
            let diff = x as i32 - y as i32;
            (diff * diff) as u32
        })
        .sum()
}

/// Squared distance, abandoned once the partial sum reaches `bound`.
///
/// Returns `None` when the full distance is certainly `>= bound`, which can
/// never beat a current best of `bound` under strict less-than.
pub fn squared_distance_bounded(a: &[u8], b: &[u8], bound: u32) -> Option<u32> {
    const CHECK_EVERY: usize = 96;
    let mut sum = 0u32;
    for (ca, cb) in a.chunks(CHECK_EVERY).zip(b.chunks(CHECK_EVERY)) {
        sum += squared_distance(ca, cb);
        if sum >= bound {
            return None;
        }
    }
    Some(sum)
}

/// Index of the corpus entry closest to the channel-major `tile`.
pub fn nearest_entry(tile: &[u8], dataset: &Dataset, early_exit: bool) -> u32 {
    let mut min_dist = u32::MAX;
    let mut min_i = 0u32;
    for (i, entry) in dataset.entries().enumerate() {
        let d = if early_exit {
            match squared_distance_bounded(tile, entry, min_dist) {
                Some(d) => d,
                None => continue,
            }
        } else {
            squared_distance(tile, entry)
        };
        if d < min_dist {
            min_dist = d;
            min_i = i as u32;
        }
    }
    min_i
}

/// Select the matcher implementation for this run.
pub fn build_matcher(config: &MosaicConfig) -> Result<Box<dyn TileMatcher>> {
    config.validate()?;
    let matcher: Result<Box<dyn TileMatcher>> = match config.backend {
        Backend::Threads => Ok(Box::new(ThreadMatcher::new(config))),
        Backend::Vulkan => match VulkanHost::new(config) {
            Ok(host) => Ok(Box::new(host)),
            Err(e) if config.fallback_to_threads && e.is_device_unavailable() => {
                warn!("Vulkan unavailable ({}), falling back to {} host threads", e, config.thread_count());
                Ok(Box::new(ThreadMatcher::new(config)))
            }
            Err(e) => Err(e),
        },
    };
    matcher.inspect(|matcher| info!("Photomosaic matcher: {} ({} units)", matcher.name(), matcher.parallel_units()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mosaic::{MAX_DIST, TILE_LEN};

    #[test]
    fn distance_of_extremes_is_max() {
        let a = vec![0u8; TILE_LEN];
        let b = vec![255u8; TILE_LEN];
        assert_eq!(squared_distance(&a, &b), MAX_DIST);
        assert_eq!(squared_distance(&a, &a), 0);
    }

    #[test]
    fn bounded_distance_gives_up_at_bound() {
        let a = vec![0u8; TILE_LEN];
        let b = vec![1u8; TILE_LEN];
        assert_eq!(squared_distance_bounded(&a, &b, u32::MAX), Some(TILE_LEN as u32));
        assert_eq!(squared_distance_bounded(&a, &b, TILE_LEN as u32), None);
        assert_eq!(squared_distance_bounded(&a, &b, 50), None);
    }

    #[test]
    fn ties_resolve_to_lowest_index() {
        let tile = vec![10u8; TILE_LEN];
        let dataset = Dataset::from_tiles([
            vec![12u8; TILE_LEN],
            vec![8u8; TILE_LEN],
            vec![12u8; TILE_LEN],
        ])
        .unwrap();
        assert_eq!(nearest_entry(&tile, &dataset, false), 0);
        assert_eq!(nearest_entry(&tile, &dataset, true), 0);
    }

    #[test]
    fn picks_exact_match() {
        let tile: Vec<u8> = (0..TILE_LEN).map(|i| (i % 256) as u8).collect();
        let dataset = Dataset::from_tiles([vec![0u8; TILE_LEN], vec![128u8; TILE_LEN], tile.clone()]).unwrap();
        assert_eq!(nearest_entry(&tile, &dataset, false), 2);
        assert_eq!(nearest_entry(&tile, &dataset, true), 2);
    }

    #[test]
    fn thread_backend_is_selected_without_touching_vulkan() {
        let matcher = build_matcher(&MosaicConfig::threads_only()).unwrap();
        assert_eq!(matcher.name(), "threads");
        assert_eq!(matcher.parallel_units(), 1);
    }

    #[test]
    fn vulkan_backend_with_fallback_always_yields_a_matcher() {
        let config = MosaicConfig {
            threads: Some(2),
            ..MosaicConfig::default()
        };
        let matcher = build_matcher(&config).unwrap();
        assert!(matches!(matcher.name(), "vulkan" | "threads"));
        assert!(matcher.parallel_units() >= 1);
    }
}
