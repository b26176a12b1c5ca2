mod common;

use common::{init_logger, noise_dataset, noise_image, thread_config, vulkan_host_or_skip};
use vulkan_photomosaic::mosaic::layout::to_channel_major_tiles;
use vulkan_photomosaic::mosaic::TILE_LEN;
use vulkan_photomosaic::{
    MosaicConfig, PhotomosaicEngine, SoloCommunicator, ThreadMatcher, TileMatcher, VulkanHost,
};

#[test]
fn test_device_transform_matches_host_reference() {
    init_logger();
    let Some(host) = vulkan_host_or_skip("device transform comparison") else {
        return;
    };
    assert!(host.device_count() >= 1);
    // five tile rows push several chunks through every slot
    let image = noise_image(96, 160, 13);
    let expected = to_channel_major_tiles(&image);

    let transformed = host.transform_rows(&image, 0..image.tile_rows()).unwrap();
    assert_eq!(transformed, expected);

    let row_bytes = image.tile_row_bytes();
    let partial = host.transform_rows(&image, 2..4).unwrap();
    assert_eq!(partial, expected[2 * row_bytes..4 * row_bytes]);
}

#[test]
fn test_device_and_threads_agree() {
    init_logger();
    let Some(host) = vulkan_host_or_skip("device/thread comparison") else {
        return;
    };
    let image = noise_image(256, 128, 17);
    let dataset = noise_dataset(64, 19);
    let tiles = 0..image.tile_count();

    let mut on_device = vec![0u32; tiles.len()];
    host.compute_indices(&image, &dataset, tiles.clone(), &mut on_device).unwrap();

    let mut on_threads = vec![0u32; tiles.len()];
    ThreadMatcher::new(&thread_config())
        .compute_indices(&image, &dataset, tiles, &mut on_threads)
        .unwrap();
    assert_eq!(on_device, on_threads);

    // an unaligned sub-range starts and ends mid tile row
    let mut sub = vec![0u32; 11];
    host.compute_indices(&image, &dataset, 5..16, &mut sub).unwrap();
    assert_eq!(sub, on_threads[5..16]);
}

#[test]
fn test_device_ties_resolve_to_lowest_index() {
    let Some(host) = vulkan_host_or_skip("device tie-break") else {
        return;
    };
    let image = noise_image(64, 32, 29);
    let tiles = to_channel_major_tiles(&image);
    let dataset = vulkan_photomosaic::Dataset::from_tiles([
        vec![0u8; TILE_LEN],
        tiles[TILE_LEN..].to_vec(),
        tiles[TILE_LEN..].to_vec(),
    ])
    .unwrap();

    let mut out = vec![0u32; 2];
    host.compute_indices(&image, &dataset, 0..2, &mut out).unwrap();
    assert_eq!(out[1], 1);
}

#[test]
fn test_engine_on_vulkan_matches_thread_engine() {
    init_logger();
    let config = MosaicConfig {
        fallback_to_threads: false,
        ..MosaicConfig::default()
    };
    let vulkan = match VulkanHost::new(&config) {
        Ok(host) => PhotomosaicEngine::new(Box::new(host), config),
        Err(e) => {
            println!("Vulkan not available ({}), skipping engine comparison", e);
            return;
        }
    };
    let threads = PhotomosaicEngine::new(Box::new(ThreadMatcher::new(&thread_config())), thread_config());

    let image = noise_image(192, 96, 43);
    let dataset = noise_dataset(32, 47);
    assert_eq!(
        vulkan.run(&image, &dataset, &SoloCommunicator).unwrap(),
        threads.run(&image, &dataset, &SoloCommunicator).unwrap()
    );
}
