use crate::error::{MosaicError, Result};
use crate::mosaic::{Dataset, TILE_LEN};
use crate::timer::PhaseTimer;
use crate::vulkan::host::DeviceContext;
use crate::vulkan::kernel::PHOTOMOSAIC_LOCAL_SIZE;
use crate::vulkan::memory::PhaseBuffers;
use crate::vulkan::pipeline::{
    allocate_command_buffers, record_copies, submit_timeline, CopyDirection, TimelineSemaphore,
};
use ash::vk;
use log::debug;
use std::ops::Range;

/// Most corpus batches one dispatch round may bind, one descriptor set each.
pub const MAX_CORPUS_BATCHES: u32 = 64;

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct PushConstants {
    num_tiles: u32,
    num_entries: u32,
    entry_offset: u32,
    first_batch: u32,
}

// progress semaphore values
const UPLOADED: u64 = 1;
const COMPUTED: u64 = 2;
const READ_BACK: u64 = 3;

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// Split `entries` corpus entries into consecutive batches that can each be
/// bound as one storage range: at most `max_range` bytes, starting at a
/// multiple of `alignment` bytes.
///
/// Batches are dispatched in order with a running minimum, so the result is
/// the same as a single pass over the whole corpus.
pub fn corpus_batches(entries: usize, max_range: u64, alignment: u64) -> Result<Vec<Range<usize>>> {
    let tile = TILE_LEN as u64;
    let alignment = alignment.max(1);
    // entry count whose byte size is a multiple of the alignment
    let step = alignment / gcd(tile, alignment);
    let per_batch = (max_range / tile) / step * step;
    if per_batch == 0 {
        return Err(MosaicError::DeviceLimitError(format!(
            "a storage range of {} bytes cannot hold one {}-byte corpus entry at {}-byte alignment",
            max_range, tile, alignment
        )));
    }

    let per_batch = usize::try_from(per_batch).unwrap_or(usize::MAX);
    let batches: Vec<Range<usize>> = (0..entries)
        .step_by(per_batch)
        .map(|start| start..start.saturating_add(per_batch).min(entries))
        .collect();
    if batches.len() > MAX_CORPUS_BATCHES as usize {
        return Err(MosaicError::DeviceLimitError(format!(
            "corpus of {} entries needs {} batches of {}, at most {} are supported",
            entries,
            batches.len(),
            per_batch,
            MAX_CORPUS_BATCHES
        )));
    }
    Ok(batches)
}

/// Most tiles one dispatch round can take: their bytes must fit one storage
/// range and their invocations one dispatch.
pub fn tiles_per_dispatch(max_range: u64, max_workgroups: u32) -> Result<usize> {
    let by_range = max_range / TILE_LEN as u64;
    let by_dispatch = max_workgroups as u64 * PHOTOMOSAIC_LOCAL_SIZE as u64;
    let tiles = by_range.min(by_dispatch);
    if tiles == 0 {
        return Err(MosaicError::DeviceLimitError(format!(
            "no tile fits a {}-byte storage range and {} workgroups",
            max_range, max_workgroups
        )));
    }
    Ok(usize::try_from(tiles).unwrap_or(usize::MAX))
}

impl DeviceContext {
    /// Match the channel-major `tiles` against every corpus entry and write
    /// the winning entry of tile `i` to `out[i]`.
    ///
    /// Tiles and corpus are cut into pieces the device can bind, so no device
    /// limit turns into a failure for a realistic corpus.
    pub fn match_tiles(&self, tiles: &[u8], dataset: &Dataset, out: &mut [u32]) -> Result<()> {
        if out.is_empty() {
            return Ok(());
        }
        debug_assert_eq!(tiles.len(), out.len() * TILE_LEN);
        let batches = corpus_batches(
            dataset.len(),
            self.device.max_storage_buffer_range(),
            self.device.min_storage_buffer_offset_alignment(),
        )?;
        let per_dispatch = tiles_per_dispatch(self.device.max_storage_buffer_range(), self.device.max_workgroups_x())?;
        if batches.len() > 1 || per_dispatch < out.len() {
            debug!(
                "GPU {}: corpus in {} batches, tiles in rounds of {}",
                self.device.ordinal,
                batches.len(),
                per_dispatch
            );
        }

        for (tiles, out) in tiles.chunks(per_dispatch * TILE_LEN).zip(out.chunks_mut(per_dispatch)) {
            self.match_round(tiles, dataset, &batches, out)?;
        }
        Ok(())
    }

    fn match_round(&self, tiles: &[u8], dataset: &Dataset, batches: &[Range<usize>], out: &mut [u32]) -> Result<()> {
        let device = &self.device.device;
        self.photomosaic.reset()?;
        let commands = allocate_command_buffers(device, self.command_pool, 3)?;
        let progress = match TimelineSemaphore::new(device) {
            Ok(progress) => progress,
            Err(e) => {
                unsafe { device.free_command_buffers(self.command_pool, &commands) };
                return Err(e);
            }
        };
        let mut buffers = PhaseBuffers::new(&self.memory);

        let outcome = self.run_match(tiles, dataset, batches, out, &commands, &progress, &mut buffers);

        let joined = self.device.join();
        unsafe { device.free_command_buffers(self.command_pool, &commands) };
        drop(buffers);
        drop(progress);
        outcome.and(joined)
    }

    #[allow(clippy::too_many_arguments)]
    fn run_match(
        &self,
        tiles: &[u8],
        dataset: &Dataset,
        batches: &[Range<usize>],
        out: &mut [u32],
        commands: &[vk::CommandBuffer],
        progress: &TimelineSemaphore,
        buffers: &mut PhaseBuffers<'_>,
    ) -> Result<()> {
        let device = &self.device.device;
        let queues = self.device.queues;
        let ordinal = self.device.ordinal;

        let tile_bytes = tiles.len() as u64;
        let corpus_bytes = dataset.as_bytes().len() as u64;
        let index_bytes = std::mem::size_of_val(out) as u64;
        let num_tiles = out.len() as u32;
        let workgroups = num_tiles.div_ceil(PHOTOMOSAIC_LOCAL_SIZE);
        self.device.check_workgroups("tile matching", workgroups)?;

        let tile_buffer = buffers.storage(tile_bytes, "Tile Buffer")?;
        let corpus_buffer = buffers.storage(corpus_bytes, "Corpus Buffer")?;
        let index_buffer = buffers.storage(index_bytes, "Index Buffer")?;
        let distance_buffer = buffers.storage(index_bytes, "Distance Buffer")?;
        let tile_staging = buffers.upload(tile_bytes, "Tile Staging")?;
        let corpus_staging = buffers.upload(corpus_bytes, "Corpus Staging")?;
        let index_staging = buffers.readback(index_bytes, "Index Staging")?;

        let mut dispatches = Vec::with_capacity(batches.len());
        for (b, batch) in batches.iter().enumerate() {
            let offset = (batch.start * TILE_LEN) as u64;
            let len = (batch.len() * TILE_LEN) as u64;
            let descriptor_set = self.photomosaic.bind(&[
                buffers.get(tile_buffer).descriptor(),
                buffers.get(corpus_buffer).sub_range(offset, len)?,
                buffers.get(index_buffer).descriptor(),
                buffers.get(distance_buffer).descriptor(),
            ])?;
            let pc = PushConstants {
                num_tiles,
                num_entries: batch.len() as u32,
                entry_offset: batch.start as u32,
                first_batch: (b == 0) as u32,
            };
            dispatches.push((descriptor_set, pc));
        }

        record_copies(
            device,
            commands[0],
            vk::CommandBufferUsageFlags::empty(),
            CopyDirection::Upload,
            &[
                (buffers.get(tile_staging).buffer, buffers.get(tile_buffer).buffer, tile_bytes),
                (buffers.get(corpus_staging).buffer, buffers.get(corpus_buffer).buffer, corpus_bytes),
            ],
        )?;
        unsafe {
            device.begin_command_buffer(commands[1], &vk::CommandBufferBeginInfo::default())?;
            for (b, (descriptor_set, pc)) in dispatches.iter().enumerate() {
                if b > 0 {
                    // the next batch folds into the running minimum of this one
                    let barrier = vk::MemoryBarrier::default()
                        .src_access_mask(vk::AccessFlags::SHADER_WRITE)
                        .dst_access_mask(vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE);
                    device.cmd_pipeline_barrier(
                        commands[1],
                        vk::PipelineStageFlags::COMPUTE_SHADER,
                        vk::PipelineStageFlags::COMPUTE_SHADER,
                        vk::DependencyFlags::empty(),
                        &[barrier],
                        &[],
                        &[],
                    );
                }
                self.photomosaic
                    .record_dispatch(commands[1], *descriptor_set, bytemuck::bytes_of(pc), workgroups);
            }
            device.end_command_buffer(commands[1])?;
        }
        record_copies(
            device,
            commands[2],
            vk::CommandBufferUsageFlags::empty(),
            CopyDirection::Readback,
            &[(buffers.get(index_buffer).buffer, buffers.get(index_staging).buffer, index_bytes)],
        )?;

        let timer = PhaseTimer::begin(format!("[photomosaic] GPU {} write time", ordinal));
        buffers.write(tile_staging, tiles)?;
        buffers.write(corpus_staging, dataset.as_bytes())?;
        submit_timeline(device, queues.inbound, commands[0], &[], (progress, UPLOADED))?;
        progress.wait(UPLOADED)?;
        timer.end();

        let timer = PhaseTimer::begin(format!("[photomosaic] GPU {} compute time", ordinal));
        submit_timeline(device, queues.compute, commands[1], &[(progress, UPLOADED)], (progress, COMPUTED))?;
        progress.wait(COMPUTED)?;
        timer.end();

        let timer = PhaseTimer::begin(format!("[photomosaic] GPU {} read time", ordinal));
        submit_timeline(device, queues.outbound, commands[2], &[(progress, COMPUTED)], (progress, READ_BACK))?;
        progress.wait(READ_BACK)?;
        buffers.read(index_staging, out)?;
        timer.end();

        debug!(
            "GPU {}: matched {} tiles against {} entries in {} batch(es)",
            ordinal,
            num_tiles,
            dataset.len(),
            batches.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mosaic::dataset::CIFAR10_SIZE;

    #[test]
    fn full_corpus_fits_a_small_storage_range() {
        // 2^27 bytes, the smallest common maxStorageBufferRange on desktop drivers
        let max_range = 1u64 << 27;
        let batches = corpus_batches(CIFAR10_SIZE, max_range, 64).unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches.first().map(|b| b.start), Some(0));
        assert_eq!(batches.last().map(|b| b.end), Some(CIFAR10_SIZE));
        for pair in batches.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        for batch in &batches {
            assert!((batch.len() * TILE_LEN) as u64 <= max_range);
            assert_eq!((batch.start * TILE_LEN) % 64, 0);
        }
    }

    #[test]
    fn large_range_is_a_single_batch() {
        assert_eq!(corpus_batches(CIFAR10_SIZE, u32::MAX as u64, 256).unwrap(), vec![0..CIFAR10_SIZE]);
        assert_eq!(corpus_batches(3, 1 << 20, 16).unwrap(), vec![0..3]);
    }

    #[test]
    fn batch_offsets_respect_odd_alignment() {
        // 3072 = 2^10 * 3, so a 4096-byte alignment needs batches of 4 entries
        let batches = corpus_batches(10, 5 * TILE_LEN as u64, 4096).unwrap();
        assert_eq!(batches, vec![0..4, 4..8, 8..10]);
    }

    #[test]
    fn hopeless_limits_are_device_errors() {
        assert!(matches!(corpus_batches(10, 100, 4), Err(MosaicError::DeviceLimitError(_))));
        // more batches than descriptor sets
        let too_many = corpus_batches(CIFAR10_SIZE, TILE_LEN as u64 * 10, 4);
        assert!(matches!(too_many, Err(MosaicError::DeviceLimitError(_))));
        assert!(matches!(tiles_per_dispatch(1 << 27, 0), Err(MosaicError::DeviceLimitError(_))));
    }

    #[test]
    fn tile_rounds_follow_the_tighter_limit() {
        assert_eq!(tiles_per_dispatch(1 << 27, 65535).unwrap(), (1 << 27) / TILE_LEN);
        assert_eq!(tiles_per_dispatch(u32::MAX as u64, 16).unwrap(), 16 * PHOTOMOSAIC_LOCAL_SIZE as usize);
    }
}
