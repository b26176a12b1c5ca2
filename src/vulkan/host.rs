use crate::config::MosaicConfig;
use crate::error::{MosaicError, Result};
use crate::matcher::TileMatcher;
use crate::mosaic::partition::{effective_workers, split_mut, split_range};
use crate::mosaic::{Dataset, Image, TILE_LEN};
use crate::timer::PhaseTimer;
use crate::vulkan::device::{DeviceCandidate, VulkanDevice};
use crate::vulkan::instance::VulkanInstance;
use crate::vulkan::kernel::{CompiledKernel, ComputeKernel, PHOTOMOSAIC_KERNEL, TILING_KERNEL};
use crate::vulkan::matching::MAX_CORPUS_BATCHES;
use crate::vulkan::memory::VulkanMemoryManager;
use ash::vk;
use log::{debug, info};
use std::ops::Range;
use std::sync::Mutex;

/// Everything one device needs to run both phases. Fields drop in
/// declaration order, so the device goes last.
pub struct DeviceContext {
    pub(crate) tiling: ComputeKernel,
    pub(crate) photomosaic: ComputeKernel,
    pub(crate) command_pool: vk::CommandPool,
    pub(crate) memory: VulkanMemoryManager,
    pub(crate) device: VulkanDevice,
}

impl DeviceContext {
    fn new(
        instance: &VulkanInstance,
        candidate: DeviceCandidate,
        ordinal: usize,
        kernels: &[CompiledKernel; 2],
        pipeline_slots: usize,
    ) -> Result<Self> {
        let device = VulkanDevice::new(&instance.instance, candidate, ordinal)?;
        let memory = VulkanMemoryManager::new(&instance.instance, device.device.clone(), device.physical_device)?;
        let tiling = ComputeKernel::new(&device.device, &kernels[0], pipeline_slots as u32)?;
        let photomosaic = ComputeKernel::new(&device.device, &kernels[1], MAX_CORPUS_BATCHES)?;

        let pool_info = vk::CommandPoolCreateInfo::default().queue_family_index(device.queue_family_index);
        let command_pool = unsafe { device.device.create_command_pool(&pool_info, None)? };

        Ok(Self {
            tiling,
            photomosaic,
            command_pool,
            memory,
            device,
        })
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device.device_wait_idle();
            self.device.device.destroy_command_pool(self.command_pool, None);
        }
    }
}

/// Vulkan matcher driving every discovered device concurrently, one host
/// thread per device.
///
/// The tile rows covering a range are first converted to channel-major
/// layout by the pipelined transform, split across devices by rows. The tile
/// range is then split across devices again for matching.
pub struct VulkanHost {
    contexts: Vec<Mutex<DeviceContext>>,
    pipeline_slots: usize,
    min_device_quota: usize,
    // dropped after every device
    instance: VulkanInstance,
}

impl std::fmt::Debug for VulkanHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanHost")
            .field("devices", &self.contexts.len())
            .field("pipeline_slots", &self.pipeline_slots)
            .field("min_device_quota", &self.min_device_quota)
            .field("instance", &self.instance)
            .finish()
    }
}

impl VulkanHost {
    pub fn new(config: &MosaicConfig) -> Result<Self> {
        config.validate()?;
        let timer = PhaseTimer::begin("[init] time");

        let instance = VulkanInstance::new(config.enable_validation)?;
        let mut candidates = VulkanDevice::discover(&instance.instance)?;
        if let Some(max_devices) = config.max_devices {
            candidates.truncate(max_devices);
        }

        let kernels = [
            CompiledKernel::compile(TILING_KERNEL)?,
            CompiledKernel::compile(PHOTOMOSAIC_KERNEL)?,
        ];

        let contexts = candidates
            .into_iter()
            .enumerate()
            .map(|(ordinal, candidate)| {
                DeviceContext::new(&instance, candidate, ordinal, &kernels, config.pipeline_slots).map(Mutex::new)
            })
            .collect::<Result<Vec<_>>>()?;

        timer.end();
        info!("Vulkan host ready with {} device(s)", contexts.len());

        Ok(Self {
            contexts,
            pipeline_slots: config.pipeline_slots,
            min_device_quota: config.min_device_quota,
            instance,
        })
    }

    pub fn device_count(&self) -> usize {
        self.contexts.len()
    }

    /// Convert the tile rows `rows` of `image` into channel-major tiles,
    /// splitting the rows across every device.
    pub fn transform_rows(&self, image: &Image, rows: Range<usize>) -> Result<Vec<u8>> {
        if rows.end > image.tile_rows() {
            return Err(MosaicError::InvalidConfig(format!(
                "tile rows {:?} out of range for a {}-row image",
                rows,
                image.tile_rows()
            )));
        }
        let row_bytes = image.tile_row_bytes();
        let mut transformed = vec![0u8; rows.len() * row_bytes];

        let device_rows = split_range(rows.clone(), self.contexts.len());
        let byte_ranges: Vec<Range<usize>> = device_rows
            .iter()
            .map(|r| (r.start - rows.start) * row_bytes..(r.end - rows.start) * row_bytes)
            .collect();
        let parts = split_mut(&mut transformed, &byte_ranges);

        let slots = self.pipeline_slots;
        self.run_on_devices(device_rows.into_iter().zip(parts).collect(), |context, (rows, part)| {
            context.transform_rows(image, rows, slots, part)
        })?;
        Ok(transformed)
    }

    /// Run `work[d]` on device `d` for every item, concurrently. Devices past
    /// the end of `work` stay idle.
    fn run_on_devices<W, F>(&self, work: Vec<W>, f: F) -> Result<()>
    where
        W: Send,
        F: Fn(&DeviceContext, W) -> Result<()> + Sync,
    {
        let f = &f;
        std::thread::scope(|scope| {
            let handles: Vec<_> = self
                .contexts
                .iter()
                .zip(work)
                .map(|(context, item)| {
                    scope.spawn(move || {
                        let context = context
                            .lock()
                            .map_err(|_| MosaicError::WorkerPanicked("device context poisoned".to_string()))?;
                        f(&context, item)
                    })
                })
                .collect();

            let mut outcome = Ok(());
            for (ordinal, handle) in handles.into_iter().enumerate() {
                let result = handle
                    .join()
                    .unwrap_or_else(|_| Err(MosaicError::WorkerPanicked(format!("GPU {} worker", ordinal))));
                if outcome.is_ok() {
                    outcome = result;
                }
            }
            outcome
        })
    }
}

impl TileMatcher for VulkanHost {
    fn name(&self) -> &'static str {
        "vulkan"
    }

    fn parallel_units(&self) -> usize {
        self.contexts.len()
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
        if tiles.is_empty() {
            return Ok(());
        }

        let rows = image.covering_rows(&tiles);
        let timer = PhaseTimer::begin("[preprocess] time");
        let transformed = self.transform_rows(image, rows.clone())?;
        timer.end();

        // the first transformed tile is the first tile of the first covering row
        let first_tile = rows.start * image.tiles_per_row();
        let workers = effective_workers(tiles.len(), self.contexts.len(), self.min_device_quota);
        let device_tiles = split_range(tiles.clone(), workers);
        let out_ranges: Vec<Range<usize>> = device_tiles
            .iter()
            .map(|r| r.start - tiles.start..r.end - tiles.start)
            .collect();
        let parts = split_mut(out, &out_ranges);
        debug!("Matching {} tiles on {} of {} devices", tiles.len(), workers, self.contexts.len());

        let timer = PhaseTimer::begin("[photomosaic] time");
        let transformed = &transformed;
        self.run_on_devices(device_tiles.into_iter().zip(parts).collect(), |context, (range, part)| {
            let bytes = (range.start - first_tile) * TILE_LEN..(range.end - first_tile) * TILE_LEN;
            context.match_tiles(&transformed[bytes], dataset, part)
        })?;
        timer.end();
        Ok(())
    }
}
