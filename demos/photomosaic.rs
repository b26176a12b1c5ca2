//! Build a photomosaic from an image and the CIFAR-10 corpus.
//!
//! Usage: photomosaic <input> <output> [corpus] [--threads] [--ranks N]
//!
//! `--threads` skips Vulkan, `--ranks N` runs N in-process participants that
//! split the image and gather at rank 0.

use clap::{ArgAction, Parser, ValueHint};
use log::info;
use std::num::NonZeroUsize;
use std::time::Instant;
use vulkan_photomosaic::{
    assemble_mosaic, ChannelCommunicator, Dataset, Image, MosaicConfig, PhotomosaicEngine,
};

#[derive(Parser, Debug)]
#[command(name = "photomosaic", about = "Replace every 32x32 tile of an image by its closest corpus tile")]
struct Params {
    /// Input image, sides a multiple of 32
    #[arg(value_hint = ValueHint::FilePath)]
    input: String,
    /// Output image path
    #[arg(value_hint = ValueHint::FilePath)]
    output: String,
    /// Corpus file of 60,000 channel-major tiles
    #[arg(value_hint = ValueHint::FilePath, default_value = "data/cifar-10.bin")]
    corpus: String,
    /// Match on host threads only, without touching Vulkan
    #[arg(long = "threads", action = ArgAction::SetTrue)]
    threads_only: bool,
    /// Worker threads for the host matcher
    #[arg(long = "thread-count")]
    thread_count: Option<NonZeroUsize>,
    /// In-process participants sharing the image
    #[arg(long = "ranks", default_value = "1")]
    ranks: NonZeroUsize,
    /// Enable the Khronos validation layer when installed
    #[arg(long = "validation", action = ArgAction::SetTrue)]
    validation: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let params = Params::parse();

    let image = Image::from_file(&params.input)?;
    info!("Input {}: {}x{}, {} tiles", params.input, image.width(), image.height(), image.tile_count());
    let dataset = Dataset::from_file(&params.corpus)?;

    let base = if params.threads_only {
        MosaicConfig::threads_only()
    } else {
        MosaicConfig::default()
    };
    let config = MosaicConfig {
        threads: params.thread_count.map(NonZeroUsize::get),
        enable_validation: params.validation,
        ..base
    };
    let engine = PhotomosaicEngine::from_config(config)?;
    info!("Matching on {} across {} participant(s)", engine.matcher().name(), params.ranks);

    let start_time = Instant::now();
    let group = ChannelCommunicator::group(params.ranks.get())?;
    let (engine, image_ref, dataset_ref) = (&engine, &image, &dataset);
    // each participant owns its communicator, so a failed rank disconnects
    let results = std::thread::scope(|scope| {
        let handles: Vec<_> = group
            .into_iter()
            .map(|comm| scope.spawn(move || engine.run(image_ref, dataset_ref, &comm)))
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().map_err(|_| "participant thread panicked"))
            .collect::<Result<Vec<_>, _>>()
    })?;

    let mut indices = None;
    for result in results {
        if let Some(full) = result? {
            indices = Some(full);
        }
    }
    let indices = indices.ok_or("root produced no index array")?;
    println!("Matched {} tiles in {:?}", indices.len(), start_time.elapsed());

    let mosaic = assemble_mosaic(&indices, &dataset, image.width(), image.height())?;
    mosaic.save(&params.output)?;
    println!("Mosaic written to {}", params.output);
    Ok(())
}
