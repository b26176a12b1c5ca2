//! Thread-pool photomosaic matching on a synthetic image and corpus

use criterion::{criterion_group, criterion_main, Criterion};
use vulkan_photomosaic::mosaic::TILE_LEN;
use vulkan_photomosaic::{Dataset, Image, MosaicConfig, ThreadMatcher, TileMatcher};

fn synthetic(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed;
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (state >> 56) as u8
        })
        .collect()
}

fn benchmark_cpu_photomosaic(c: &mut Criterion) {
    let mut group = c.benchmark_group("cpu_photomosaic");
    group.sample_size(10);

    let (width, height) = (512, 256);
    let image = Image::new(width, height, 24, synthetic(width * height * 3, 1)).expect("Failed to build image");
    let dataset = Dataset::new(synthetic(2048 * TILE_LEN, 2)).expect("Failed to build corpus");

    for early_exit in [false, true] {
        let config = MosaicConfig {
            early_exit,
            ..MosaicConfig::threads_only()
        };
        let matcher = ThreadMatcher::new(&config);
        let mut out = vec![0u32; image.tile_count()];
        let name = if early_exit { "threads_early_exit_512x256" } else { "threads_full_sum_512x256" };
        group.bench_function(name, |b| {
            b.iter(|| {
                matcher
                    .compute_indices(&image, &dataset, 0..image.tile_count(), &mut out)
                    .expect("Thread matching failed");
            })
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_cpu_photomosaic);
criterion_main!(benches);
