use ash::{vk, Device};
use log::warn;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc, Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::{AllocationSizes, MemoryLocation};
use crate::error::{MosaicError, Result};
use std::sync::{Arc, Mutex};

pub struct VulkanBuffer {
    pub buffer: vk::Buffer,
    pub allocation: Option<Allocation>,
    /// Requested size in bytes; the allocation may be larger
    pub size: u64,
}

impl VulkanBuffer {
    /// Descriptor covering the whole buffer.
    pub fn descriptor(&self) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo::default()
            .buffer(self.buffer)
            .offset(0)
            .range(vk::WHOLE_SIZE)
    }

    /// Descriptor covering `len` bytes from `offset`.
    pub fn sub_range(&self, offset: u64, len: u64) -> Result<vk::DescriptorBufferInfo> {
        check_bounds(offset + len, self.size)?;
        Ok(vk::DescriptorBufferInfo::default()
            .buffer(self.buffer)
            .offset(offset)
            .range(len))
    }
}

/// A transfer of `len` bytes must fit the buffer's requested `size`.
fn check_bounds(len: u64, size: u64) -> Result<()> {
    if len > size {
        return Err(MosaicError::InvalidConfig(format!(
            "{} bytes do not fit a {}-byte buffer",
            len, size
        )));
    }
    Ok(())
}

#[derive(Clone)]
pub struct VulkanMemoryManager {
    device: Device,
    allocator: Arc<Mutex<Allocator>>,
}

impl std::fmt::Debug for VulkanMemoryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanMemoryManager")
            .field("device", &"Device")
            .field("allocator", &self.allocator)
            .finish()
    }
}

impl VulkanMemoryManager {
    pub fn new(
        instance: &ash::Instance,
        device: Device,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self> {
        let mut debug_settings = gpu_allocator::AllocatorDebugSettings::default();
        debug_settings.log_leaks_on_shutdown = true;

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings,
            buffer_device_address: false,
            allocation_sizes: AllocationSizes::default(),
        }).map_err(MosaicError::GpuAllocatorError)?;

        Ok(Self {
            device,
            allocator: Arc::new(Mutex::new(allocator)),
        })
    }

    pub fn create_buffer(
        &self,
        size: u64,
        usage: vk::BufferUsageFlags,
        memory_location: MemoryLocation,
        name: &str,
    ) -> Result<VulkanBuffer> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { self.device.create_buffer(&buffer_info, None) }?;
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };

        let allocation = self.lock_allocator()?.allocate(&AllocationCreateDesc {
            name,
            requirements,
            location: memory_location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(e.into());
            }
        };

        unsafe {
            self.device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset())?;
        }

        Ok(VulkanBuffer {
            buffer,
            allocation: Some(allocation),
            size,
        })
    }

    /// Device-local storage buffer that transfers can fill and drain.
    pub fn create_storage_buffer(&self, size: u64, name: &str) -> Result<VulkanBuffer> {
        self.create_buffer(
            size,
            vk::BufferUsageFlags::STORAGE_BUFFER
                | vk::BufferUsageFlags::TRANSFER_DST
                | vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::GpuOnly,
            name,
        )
    }

    /// Host-visible source for host → device copies.
    pub fn create_upload_buffer(&self, size: u64, name: &str) -> Result<VulkanBuffer> {
        self.create_buffer(size, vk::BufferUsageFlags::TRANSFER_SRC, MemoryLocation::CpuToGpu, name)
    }

    /// Host-visible destination for device → host copies.
    pub fn create_readback_buffer(&self, size: u64, name: &str) -> Result<VulkanBuffer> {
        self.create_buffer(size, vk::BufferUsageFlags::TRANSFER_DST, MemoryLocation::GpuToCpu, name)
    }

    /// Copy `data` into the start of a host-visible buffer.
    pub fn upload_data<T: bytemuck::Pod>(&self, buffer: &mut VulkanBuffer, data: &[T]) -> Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        check_bounds(bytes.len() as u64, buffer.size)?;
        let mapped = buffer
            .allocation
            .as_mut()
            .and_then(|allocation| allocation.mapped_slice_mut())
            .ok_or(MosaicError::VulkanError(vk::Result::ERROR_MEMORY_MAP_FAILED))?;
        mapped
            .get_mut(..bytes.len())
            .ok_or(MosaicError::VulkanError(vk::Result::ERROR_MEMORY_MAP_FAILED))?
            .copy_from_slice(bytes);
        Ok(())
    }

    /// Copy the start of a host-visible buffer into `data`.
    pub fn device_to_host<T: bytemuck::Pod>(&self, buffer: &VulkanBuffer, data: &mut [T]) -> Result<()> {
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(data);
        check_bounds(bytes.len() as u64, buffer.size)?;
        let mapped = buffer
            .allocation
            .as_ref()
            .and_then(|allocation| allocation.mapped_slice())
            .ok_or(MosaicError::VulkanError(vk::Result::ERROR_MEMORY_MAP_FAILED))?;
        let mapped = mapped
            .get(..bytes.len())
            .ok_or(MosaicError::VulkanError(vk::Result::ERROR_MEMORY_MAP_FAILED))?;
        bytes.copy_from_slice(mapped);
        Ok(())
    }

    pub fn destroy_buffer(&self, buffer: VulkanBuffer) -> Result<()> {
        unsafe {
            self.device.destroy_buffer(buffer.buffer, None);
        }
        if let Some(allocation) = buffer.allocation {
            self.lock_allocator()?.free(allocation)?;
        }
        Ok(())
    }

    /// Release a set of buffers, reporting the first failure after trying all.
    pub fn destroy_buffers(&self, buffers: impl IntoIterator<Item = VulkanBuffer>) -> Result<()> {
        let mut first_error = None;
        for buffer in buffers {
            if let Err(e) = self.destroy_buffer(buffer) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn lock_allocator(&self) -> Result<std::sync::MutexGuard<'_, Allocator>> {
        self.allocator
            .lock()
            .map_err(|_| MosaicError::GpuAllocatorError(gpu_allocator::AllocationError::Internal(
                "allocator mutex poisoned".to_string(),
            )))
    }
}

/// Handle to a buffer owned by a [`PhaseBuffers`] set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferId(usize);

/// Every transient buffer of one phase. All of them are released together
/// when the set is dropped, so callers must join the device's queues first.
pub struct PhaseBuffers<'a> {
    memory: &'a VulkanMemoryManager,
    buffers: Vec<VulkanBuffer>,
}

impl<'a> PhaseBuffers<'a> {
    pub fn new(memory: &'a VulkanMemoryManager) -> Self {
        Self {
            memory,
            buffers: Vec::new(),
        }
    }

    pub fn storage(&mut self, size: u64, name: &str) -> Result<BufferId> {
        let buffer = self.memory.create_storage_buffer(size, name)?;
        Ok(self.push(buffer))
    }

    pub fn upload(&mut self, size: u64, name: &str) -> Result<BufferId> {
        let buffer = self.memory.create_upload_buffer(size, name)?;
        Ok(self.push(buffer))
    }

    pub fn readback(&mut self, size: u64, name: &str) -> Result<BufferId> {
        let buffer = self.memory.create_readback_buffer(size, name)?;
        Ok(self.push(buffer))
    }

    pub fn get(&self, id: BufferId) -> &VulkanBuffer {
        &self.buffers[id.0]
    }

    /// Copy `data` into the host-visible buffer `id`.
    pub fn write<T: bytemuck::Pod>(&mut self, id: BufferId, data: &[T]) -> Result<()> {
        self.memory.upload_data(&mut self.buffers[id.0], data)
    }

    /// Copy the host-visible buffer `id` into `data`.
    pub fn read<T: bytemuck::Pod>(&self, id: BufferId, data: &mut [T]) -> Result<()> {
        self.memory.device_to_host(&self.buffers[id.0], data)
    }

    fn push(&mut self, buffer: VulkanBuffer) -> BufferId {
        self.buffers.push(buffer);
        BufferId(self.buffers.len() - 1)
    }
}

impl Drop for PhaseBuffers<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.memory.destroy_buffers(self.buffers.drain(..)) {
            warn!("Failed to release phase buffers: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfers_are_bounded_by_requested_size() {
        assert!(check_bounds(0, 0).is_ok());
        assert!(check_bounds(4096, 4096).is_ok());
        assert!(matches!(check_bounds(4097, 4096), Err(MosaicError::InvalidConfig(_))));
    }

    #[test]
    fn sub_range_stays_inside_buffer() {
        let buffer = VulkanBuffer {
            buffer: vk::Buffer::null(),
            allocation: None,
            size: 1024,
        };
        let info = buffer.sub_range(256, 768).unwrap();
        assert_eq!((info.offset, info.range), (256, 768));
        assert!(buffer.sub_range(512, 768).is_err());
        assert_eq!(buffer.descriptor().range, vk::WHOLE_SIZE);
    }
}
