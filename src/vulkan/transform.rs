use crate::error::Result;
use crate::mosaic::Image;
use crate::vulkan::host::DeviceContext;
use crate::vulkan::kernel::TILING_LOCAL_SIZE;
use crate::vulkan::memory::{BufferId, PhaseBuffers};
use crate::vulkan::pipeline::{
    allocate_command_buffers, record_copies, submit_timeline, CopyDirection, HostStep, SlotRing, TimelineSemaphore,
};
use ash::vk;
use log::debug;
use std::ops::Range;

/// Stage-completion semaphores of one slot.
struct SlotSemaphores {
    inbound_done: TimelineSemaphore,
    compute_done: TimelineSemaphore,
    outbound_done: TimelineSemaphore,
}

impl SlotSemaphores {
    fn new(device: &ash::Device) -> Result<Self> {
        Ok(Self {
            inbound_done: TimelineSemaphore::new(device)?,
            compute_done: TimelineSemaphore::new(device)?,
            outbound_done: TimelineSemaphore::new(device)?,
        })
    }
}

/// Buffers and prerecorded commands of one slot.
struct TransformSlot {
    staging_in: BufferId,
    staging_out: BufferId,
    inbound: vk::CommandBuffer,
    compute: vk::CommandBuffer,
    outbound: vk::CommandBuffer,
}

impl DeviceContext {
    /// Convert tile rows `rows` of `image` to channel-major tiles, writing
    /// `rows.len() * image.tile_row_bytes()` bytes into `out`.
    ///
    /// One tile row is one chunk. Chunks rotate through `slots` buffer slots
    /// so the upload of chunk `i + 1`, the kernel of chunk `i` and the
    /// read-back of chunk `i - 1` can overlap on the three queues. The host
    /// follows [`SlotRing::schedule`].
    pub fn transform_rows(&self, image: &Image, rows: Range<usize>, slots: usize, out: &mut [u8]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let device = &self.device.device;
        let ring = SlotRing::new(slots.min(rows.len()));

        self.tiling.reset()?;
        let commands = allocate_command_buffers(device, self.command_pool, 3 * ring.slots() as u32)?;
        let semaphores = (0..ring.slots())
            .map(|_| SlotSemaphores::new(device))
            .collect::<Result<Vec<_>>>();
        let semaphores = match semaphores {
            Ok(semaphores) => semaphores,
            Err(e) => {
                unsafe { device.free_command_buffers(self.command_pool, &commands) };
                return Err(e);
            }
        };
        let mut buffers = PhaseBuffers::new(&self.memory);

        let outcome = self.run_transform(image, rows, ring, &commands, &semaphores, &mut buffers, out);

        // nothing may be released while the queues still reference it
        let joined = self.device.join();
        unsafe { device.free_command_buffers(self.command_pool, &commands) };
        drop(buffers);
        drop(semaphores);
        outcome.and(joined)
    }

    #[allow(clippy::too_many_arguments)]
    fn run_transform(
        &self,
        image: &Image,
        rows: Range<usize>,
        ring: SlotRing,
        commands: &[vk::CommandBuffer],
        semaphores: &[SlotSemaphores],
        buffers: &mut PhaseBuffers<'_>,
        out: &mut [u8],
    ) -> Result<()> {
        let device = &self.device.device;
        let queues = self.device.queues;
        let row_bytes = image.tile_row_bytes();
        let size = row_bytes as u64;

        let words = (row_bytes / 4) as u32;
        let workgroups = words.div_ceil(TILING_LOCAL_SIZE);
        self.device.check_storage_range("tile row", row_bytes)?;
        self.device.check_workgroups("tile row transform", workgroups)?;
        let width = image.width() as u32;

        let mut slots = Vec::with_capacity(ring.slots());
        for (k, cmd) in commands.chunks_exact(3).enumerate() {
            let staging_in = buffers.upload(size, &format!("Row Staging In {}", k))?;
            let src = buffers.storage(size, &format!("Row Source {}", k))?;
            let dst = buffers.storage(size, &format!("Row Tiles {}", k))?;
            let staging_out = buffers.readback(size, &format!("Row Staging Out {}", k))?;
            let descriptor_set = self
                .tiling
                .bind(&[buffers.get(src).descriptor(), buffers.get(dst).descriptor()])?;

            record_copies(
                device,
                cmd[0],
                vk::CommandBufferUsageFlags::empty(),
                CopyDirection::Upload,
                &[(buffers.get(staging_in).buffer, buffers.get(src).buffer, size)],
            )?;
            // a slot's kernel may be queued again before its last run finished
            unsafe {
                device.begin_command_buffer(
                    cmd[1],
                    &vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::SIMULTANEOUS_USE),
                )?;
                self.tiling
                    .record_dispatch(cmd[1], descriptor_set, bytemuck::bytes_of(&width), workgroups);
                device.end_command_buffer(cmd[1])?;
            }
            record_copies(
                device,
                cmd[2],
                vk::CommandBufferUsageFlags::empty(),
                CopyDirection::Readback,
                &[(buffers.get(dst).buffer, buffers.get(staging_out).buffer, size)],
            )?;

            slots.push(TransformSlot {
                staging_in,
                staging_out,
                inbound: cmd[0],
                compute: cmd[1],
                outbound: cmd[2],
            });
        }

        for step in ring.schedule(rows.len()) {
            match step {
                HostStep::AwaitInbound(earlier) => {
                    semaphores[earlier.slot].inbound_done.wait(earlier.generation)?;
                }
                HostStep::Upload(ticket) => {
                    let row = rows.start + ticket.chunk;
                    buffers.write(slots[ticket.slot].staging_in, image.tile_rows_bytes(row..row + 1))?;
                }
                HostStep::SubmitInbound(ticket) => {
                    let sem = &semaphores[ticket.slot];
                    submit_timeline(
                        device,
                        queues.inbound,
                        slots[ticket.slot].inbound,
                        &[(&sem.compute_done, ticket.previous_generation())],
                        (&sem.inbound_done, ticket.generation),
                    )?;
                }
                HostStep::SubmitCompute(ticket) => {
                    let sem = &semaphores[ticket.slot];
                    submit_timeline(
                        device,
                        queues.compute,
                        slots[ticket.slot].compute,
                        &[
                            (&sem.inbound_done, ticket.generation),
                            (&sem.outbound_done, ticket.previous_generation()),
                        ],
                        (&sem.compute_done, ticket.generation),
                    )?;
                }
                HostStep::Drain(ticket) => {
                    semaphores[ticket.slot].outbound_done.wait(ticket.generation)?;
                    let chunk = ticket.chunk;
                    buffers.read(
                        slots[ticket.slot].staging_out,
                        &mut out[chunk * row_bytes..(chunk + 1) * row_bytes],
                    )?;
                }
                HostStep::SubmitOutbound(ticket) => {
                    let sem = &semaphores[ticket.slot];
                    submit_timeline(
                        device,
                        queues.outbound,
                        slots[ticket.slot].outbound,
                        &[(&sem.compute_done, ticket.generation)],
                        (&sem.outbound_done, ticket.generation),
                    )?;
                }
            }
        }

        debug!(
            "GPU {}: transformed tile rows {:?} through {} slots",
            self.device.ordinal,
            rows,
            ring.slots()
        );
        Ok(())
    }
}
