// Shared helpers for the integration tests
#![allow(dead_code)]

use vulkan_photomosaic::mosaic::TILE_LEN;
use vulkan_photomosaic::{Dataset, Image, MosaicConfig, VulkanHost};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Deterministic pseudo-random bytes (64-bit LCG, high byte).
pub fn noise(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (state >> 56) as u8
        })
        .collect()
}

pub fn noise_image(width: usize, height: usize, seed: u64) -> Image {
    Image::new(width, height, 24, noise(width * height * 3, seed)).unwrap()
}

pub fn noise_dataset(entries: usize, seed: u64) -> Dataset {
    Dataset::new(noise(entries * TILE_LEN, seed)).unwrap()
}

/// Host matcher settings with a small, fixed pool.
pub fn thread_config() -> MosaicConfig {
    MosaicConfig {
        threads: Some(2),
        ..MosaicConfig::threads_only()
    }
}

/// A Vulkan host, or `None` with a note when this machine has no usable device.
pub fn vulkan_host_or_skip(test: &str) -> Option<VulkanHost> {
    let config = MosaicConfig {
        fallback_to_threads: false,
        ..MosaicConfig::default()
    };
    match VulkanHost::new(&config) {
        Ok(host) => Some(host),
        Err(e) => {
            println!("Vulkan not available ({}), skipping {}", e, test);
            None
        }
    }
}
