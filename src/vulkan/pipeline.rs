//! Rotating buffer slots and timeline-semaphore plumbing for the pipelined
//! transform.
//!
//! Chunk `i` runs on slot `i % N` as that slot's generation `i / N + 1`. A
//! timeline semaphore per slot and stage is signalled with the generation
//! when the stage finishes, so "wait for the previous user of this slot" is
//! simply "wait for generation - 1", and generation 0 is the initial value.
//!
//! The host only waits where it touches slot memory itself: before rewriting
//! a slot's staging input it waits for the previous inbound copy, and it
//! drains a chunk's staging output right before the slot's next outbound copy
//! is submitted. Every other ordering is left to the semaphores.

use ash::{vk, Device};
use crate::error::Result;

/// Where and when a chunk runs in the slot ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkTicket {
    pub chunk: usize,
    pub slot: usize,
    pub generation: u64,
}

impl ChunkTicket {
    /// Generation of the chunk that used this slot before, 0 if none.
    pub fn previous_generation(&self) -> u64 {
        self.generation - 1
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SlotRing {
    slots: usize,
}

impl SlotRing {
    pub fn new(slots: usize) -> Self {
        assert!(slots > 0, "slot ring needs at least one slot");
        Self { slots }
    }

    pub fn slots(&self) -> usize {
        self.slots
    }

    pub fn ticket(&self, chunk: usize) -> ChunkTicket {
        ChunkTicket {
            chunk,
            slot: chunk % self.slots,
            generation: (chunk / self.slots) as u64 + 1,
        }
    }

    /// Chunk that last used the slot `chunk` is about to take.
    pub fn previous_user(&self, chunk: usize) -> Option<usize> {
        chunk.checked_sub(self.slots)
    }

    /// Chunks still in flight once `chunks` have been issued, oldest first.
    pub fn in_flight(&self, chunks: usize) -> std::ops::Range<usize> {
        chunks.saturating_sub(self.slots)..chunks
    }

    /// Host-side steps to push `chunks` chunks through the ring, in order.
    pub fn schedule(&self, chunks: usize) -> Vec<HostStep> {
        let mut steps = Vec::with_capacity(6 * chunks);
        for chunk in 0..chunks {
            let ticket = self.ticket(chunk);
            let previous = self.previous_user(chunk).map(|prev| self.ticket(prev));
            if let Some(previous) = previous {
                steps.push(HostStep::AwaitInbound(previous));
            }
            steps.push(HostStep::Upload(ticket));
            steps.push(HostStep::SubmitInbound(ticket));
            steps.push(HostStep::SubmitCompute(ticket));
            if let Some(previous) = previous {
                steps.push(HostStep::Drain(previous));
            }
            steps.push(HostStep::SubmitOutbound(ticket));
        }
        steps.extend(self.in_flight(chunks).map(|chunk| HostStep::Drain(self.ticket(chunk))));
        steps
    }
}

/// One thing the host does while driving the slot ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostStep {
    /// Wait until the inbound copy of this earlier chunk has consumed the
    /// slot's staging input
    AwaitInbound(ChunkTicket),
    /// Write the chunk's input into the slot's staging input
    Upload(ChunkTicket),
    SubmitInbound(ChunkTicket),
    SubmitCompute(ChunkTicket),
    /// Wait for the chunk's outbound copy and move its staging output to the host
    Drain(ChunkTicket),
    SubmitOutbound(ChunkTicket),
}

/// A timeline semaphore owned by one device.
pub struct TimelineSemaphore {
    device: Device,
    pub semaphore: vk::Semaphore,
}

impl TimelineSemaphore {
    pub fn new(device: &Device) -> Result<Self> {
        let mut type_info = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(0);
        let create_info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);
        let semaphore = unsafe { device.create_semaphore(&create_info, None)? };
        Ok(Self {
            device: device.clone(),
            semaphore,
        })
    }

    /// Block the host until the counter reaches `value`.
    pub fn wait(&self, value: u64) -> Result<()> {
        if value == 0 {
            return Ok(());
        }
        let semaphores = [self.semaphore];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::default()
            .semaphores(&semaphores)
            .values(&values);
        unsafe { self.device.wait_semaphores(&wait_info, u64::MAX)? };
        Ok(())
    }
}

impl Drop for TimelineSemaphore {
    fn drop(&mut self) {
        unsafe { self.device.destroy_semaphore(self.semaphore, None) };
    }
}

/// Submit one command buffer that waits for `(semaphore, value)` pairs and
/// signals `signal` with its value on completion.
pub fn submit_timeline(
    device: &Device,
    queue: vk::Queue,
    cmd_buffer: vk::CommandBuffer,
    waits: &[(&TimelineSemaphore, u64)],
    signal: (&TimelineSemaphore, u64),
) -> Result<()> {
    let wait_semaphores: Vec<vk::Semaphore> = waits.iter().map(|(s, _)| s.semaphore).collect();
    let wait_values: Vec<u64> = waits.iter().map(|(_, v)| *v).collect();
    let wait_stages = vec![vk::PipelineStageFlags::ALL_COMMANDS; waits.len()];
    let signal_semaphores = [signal.0.semaphore];
    let signal_values = [signal.1];

    let mut timeline_info = vk::TimelineSemaphoreSubmitInfo::default()
        .wait_semaphore_values(&wait_values)
        .signal_semaphore_values(&signal_values);
    let command_buffers = [cmd_buffer];
    let submit_info = vk::SubmitInfo::default()
        .wait_semaphores(&wait_semaphores)
        .wait_dst_stage_mask(&wait_stages)
        .command_buffers(&command_buffers)
        .signal_semaphores(&signal_semaphores)
        .push_next(&mut timeline_info);

    unsafe { device.queue_submit(queue, &[submit_info], vk::Fence::null())? };
    Ok(())
}

/// Allocate `count` primary command buffers from `pool`.
pub fn allocate_command_buffers(device: &Device, pool: vk::CommandPool, count: u32) -> Result<Vec<vk::CommandBuffer>> {
    let allocate_info = vk::CommandBufferAllocateInfo::default()
        .command_pool(pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(count);
    Ok(unsafe { device.allocate_command_buffers(&allocate_info)? })
}

/// Which side reads the destination of a staging copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyDirection {
    /// Host staging into device memory
    Upload,
    /// Device memory into host-visible staging
    Readback,
}

/// Barrier recorded after copies in `direction`, with its source and
/// destination stages. A semaphore wait on the host does not make transfer
/// writes host-visible, so read-backs need one.
pub fn copy_barrier(
    direction: CopyDirection,
) -> Option<(vk::MemoryBarrier<'static>, vk::PipelineStageFlags, vk::PipelineStageFlags)> {
    match direction {
        CopyDirection::Upload => None,
        CopyDirection::Readback => Some((
            vk::MemoryBarrier::default()
                .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .dst_access_mask(vk::AccessFlags::HOST_READ),
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::HOST,
        )),
    }
}

/// Record `(src, dst, size)` copies, each from offset 0 to offset 0, followed
/// by the barrier `direction` needs.
pub fn record_copies(
    device: &Device,
    cmd_buffer: vk::CommandBuffer,
    usage: vk::CommandBufferUsageFlags,
    direction: CopyDirection,
    copies: &[(vk::Buffer, vk::Buffer, u64)],
) -> Result<()> {
    unsafe {
        device.begin_command_buffer(cmd_buffer, &vk::CommandBufferBeginInfo::default().flags(usage))?;
        for &(src, dst, size) in copies {
            let region = vk::BufferCopy::default().size(size);
            device.cmd_copy_buffer(cmd_buffer, src, dst, &[region]);
        }
        if let Some((barrier, src_stage, dst_stage)) = copy_barrier(direction) {
            device.cmd_pipeline_barrier(
                cmd_buffer,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[barrier],
                &[],
                &[],
            );
        }
        device.end_command_buffer(cmd_buffer)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tickets_rotate_through_slots() {
        let ring = SlotRing::new(2);
        let tickets: Vec<_> = (0..5).map(|i| ring.ticket(i)).collect();
        assert_eq!(tickets.iter().map(|t| t.slot).collect::<Vec<_>>(), vec![0, 1, 0, 1, 0]);
        assert_eq!(tickets.iter().map(|t| t.generation).collect::<Vec<_>>(), vec![1, 1, 2, 2, 3]);
    }

    #[test]
    fn dependencies_point_at_chunk_n_back() {
        for slots in 1..5 {
            let ring = SlotRing::new(slots);
            for chunk in 0..20 {
                let ticket = ring.ticket(chunk);
                match ring.previous_user(chunk) {
                    None => assert_eq!(ticket.previous_generation(), 0),
                    Some(prev) => {
                        assert_eq!(prev, chunk - slots);
                        let before = ring.ticket(prev);
                        assert_eq!(before.slot, ticket.slot);
                        assert_eq!(before.generation, ticket.previous_generation());
                    }
                }
            }
        }
    }

    #[test]
    fn in_flight_tail() {
        let ring = SlotRing::new(2);
        assert_eq!(ring.in_flight(5), 3..5);
        assert_eq!(ring.in_flight(1), 0..1);
        assert_eq!(ring.in_flight(0), 0..0);
    }

    fn position(steps: &[HostStep], step: HostStep) -> usize {
        steps
            .iter()
            .position(|s| *s == step)
            .unwrap_or_else(|| panic!("{:?} missing from schedule", step))
    }

    #[test]
    fn schedule_drains_every_chunk_once() {
        for slots in 1..4 {
            let ring = SlotRing::new(slots);
            let steps = ring.schedule(7);
            let mut drained: Vec<usize> = steps
                .iter()
                .filter_map(|s| match s {
                    HostStep::Drain(t) => Some(t.chunk),
                    _ => None,
                })
                .collect();
            drained.sort_unstable();
            assert_eq!(drained, (0..7).collect::<Vec<_>>());
        }
    }

    #[test]
    fn inbound_never_waits_for_earlier_outbound() {
        let ring = SlotRing::new(2);
        let steps = ring.schedule(6);
        for chunk in 2..6 {
            let ticket = ring.ticket(chunk);
            let previous = ring.ticket(chunk - 2);
            // the staging input is rewritten once the previous inbound copy is done
            assert!(position(&steps, HostStep::AwaitInbound(previous)) < position(&steps, HostStep::Upload(ticket)));
            // the previous chunk's output is drained only after this chunk's
            // inbound and compute are already queued
            let drain = position(&steps, HostStep::Drain(previous));
            assert!(drain > position(&steps, HostStep::SubmitCompute(ticket)));
            assert!(drain < position(&steps, HostStep::SubmitOutbound(ticket)));
        }
    }

    #[test]
    fn schedule_issues_stages_in_order() {
        let ring = SlotRing::new(3);
        let steps = ring.schedule(5);
        for chunk in 0..5 {
            let t = ring.ticket(chunk);
            let order = [
                position(&steps, HostStep::Upload(t)),
                position(&steps, HostStep::SubmitInbound(t)),
                position(&steps, HostStep::SubmitCompute(t)),
                position(&steps, HostStep::SubmitOutbound(t)),
                position(&steps, HostStep::Drain(t)),
            ];
            assert!(order.windows(2).all(|w| w[0] < w[1]), "chunk {}: {:?}", chunk, order);
        }
        // only chunks whose slot is reused are ever awaited
        assert!(!steps.iter().any(|s| matches!(s, HostStep::AwaitInbound(t) if t.chunk >= 2)));
    }

    #[test]
    fn readback_makes_transfer_writes_host_visible() {
        assert!(copy_barrier(CopyDirection::Upload).is_none());
        let (barrier, src, dst) = copy_barrier(CopyDirection::Readback).unwrap();
        assert_eq!(barrier.src_access_mask, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(barrier.dst_access_mask, vk::AccessFlags::HOST_READ);
        assert_eq!(src, vk::PipelineStageFlags::TRANSFER);
        assert_eq!(dst, vk::PipelineStageFlags::HOST);
    }
}
