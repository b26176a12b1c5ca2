use ash::{vk, Device, Instance};
use log::{debug, info};
use crate::error::{MosaicError, Result};
use crate::vulkan::instance::REQUIRED_API_VERSION;
use std::ffi::CStr;

/// The three per-device queues. When the compute family exposes fewer than
/// three queues, roles share a queue; semaphore ordering is unaffected.
#[derive(Debug, Clone, Copy)]
pub struct DeviceQueues {
    /// host → device copies
    pub inbound: vk::Queue,
    /// kernel dispatches
    pub compute: vk::Queue,
    /// device → host copies
    pub outbound: vk::Queue,
}

impl DeviceQueues {
    /// Distinct queues, for joins.
    pub fn distinct(&self) -> Vec<vk::Queue> {
        let mut queues = vec![self.inbound];
        for q in [self.compute, self.outbound] {
            if !queues.contains(&q) {
                queues.push(q);
            }
        }
        queues
    }
}

/// A physical device that passed discovery, before a logical device is opened.
#[derive(Debug, Clone, Copy)]
pub struct DeviceCandidate {
    pub physical_device: vk::PhysicalDevice,
    pub queue_family_index: u32,
    pub queue_count: u32,
}

pub struct VulkanDevice {
    pub ordinal: usize,
    pub name: String,
    pub physical_device: vk::PhysicalDevice,
    pub device: Device,
    pub queues: DeviceQueues,
    pub queue_family_index: u32,
    pub device_properties: vk::PhysicalDeviceProperties,
}

impl std::fmt::Debug for VulkanDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanDevice")
            .field("ordinal", &self.ordinal)
            .field("name", &self.name)
            .field("physical_device", &self.physical_device)
            .field("device", &"Device")
            .field("queues", &self.queues)
            .field("queue_family_index", &self.queue_family_index)
            .finish()
    }
}

impl VulkanDevice {
    /// Every non-CPU device with a compute queue family, Vulkan 1.2 and
    /// timeline semaphores, in enumeration order.
    pub fn discover(instance: &Instance) -> Result<Vec<DeviceCandidate>> {
        let physical_devices = unsafe { instance.enumerate_physical_devices() }
            .map_err(MosaicError::VulkanError)?;

        let candidates: Vec<DeviceCandidate> = physical_devices
            .iter()
            .filter(|&&device| Self::is_suitable(instance, device))
            .filter_map(|&device| {
                Self::find_compute_queue_family(instance, device).map(|(index, count)| DeviceCandidate {
                    physical_device: device,
                    queue_family_index: index,
                    queue_count: count,
                })
            })
            .collect();

        if candidates.is_empty() {
            return Err(MosaicError::NoGpuFound);
        }
        Ok(candidates)
    }

    /// Open a logical device with up to three queues from the compute family.
    pub fn new(instance: &Instance, candidate: DeviceCandidate, ordinal: usize) -> Result<Self> {
        let physical_device = candidate.physical_device;
        let name = Self::get_device_name(instance, physical_device);
        info!("GPU {}: {}", ordinal, name);

        let device_properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let limits = &device_properties.limits;
        debug!("   Max compute workgroup invocations: {}", limits.max_compute_work_group_invocations);
        debug!("   Max storage buffer range: {} MB", limits.max_storage_buffer_range / (1024 * 1024));

        let queue_count = candidate.queue_count.min(3);
        let queue_priorities = vec![1.0f32; queue_count as usize];
        let queue_create_info = vk::DeviceQueueCreateInfo::default()
            .queue_family_index(candidate.queue_family_index)
            .queue_priorities(&queue_priorities);

        let mut vulkan12_features = vk::PhysicalDeviceVulkan12Features::default().timeline_semaphore(true);
        let device_create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(std::slice::from_ref(&queue_create_info))
            .push_next(&mut vulkan12_features);

        let device = unsafe { instance.create_device(physical_device, &device_create_info, None) }
            .map_err(MosaicError::VulkanError)?;

        let queue = |i: u32| unsafe { device.get_device_queue(candidate.queue_family_index, i % queue_count) };
        let queues = DeviceQueues {
            inbound: queue(0),
            compute: queue(1),
            outbound: queue(2),
        };
        debug!("   {} distinct queues in family {}", queue_count, candidate.queue_family_index);

        Ok(Self {
            ordinal,
            name,
            physical_device,
            device,
            queues,
            queue_family_index: candidate.queue_family_index,
            device_properties,
        })
    }

    /// Block until every queue of this device is idle.
    pub fn join(&self) -> Result<()> {
        for queue in self.queues.distinct() {
            unsafe { self.device.queue_wait_idle(queue) }?;
        }
        Ok(())
    }

    pub fn max_storage_buffer_range(&self) -> u64 {
        self.device_properties.limits.max_storage_buffer_range as u64
    }

    pub fn min_storage_buffer_offset_alignment(&self) -> u64 {
        self.device_properties.limits.min_storage_buffer_offset_alignment
    }

    pub fn max_workgroups_x(&self) -> u32 {
        self.device_properties.limits.max_compute_work_group_count[0]
    }

    /// Fail with [`MosaicError::DeviceLimitError`] if a storage buffer of
    /// `bytes` cannot be bound on this device.
    pub fn check_storage_range(&self, what: &str, bytes: usize) -> Result<()> {
        let limit = self.max_storage_buffer_range();
        if bytes as u64 > limit {
            return Err(MosaicError::DeviceLimitError(format!(
                "{} of {} bytes exceeds maxStorageBufferRange ({} bytes) on {}",
                what, bytes, limit, self.name
            )));
        }
        Ok(())
    }

    /// Fail with [`MosaicError::DeviceLimitError`] if `workgroups` cannot be
    /// dispatched in one call.
    pub fn check_workgroups(&self, what: &str, workgroups: u32) -> Result<()> {
        if workgroups > self.max_workgroups_x() {
            return Err(MosaicError::DeviceLimitError(format!(
                "{} needs {} workgroups, {} allows {}",
                what, workgroups, self.name, self.max_workgroups_x()
            )));
        }
        Ok(())
    }

    fn is_suitable(instance: &Instance, device: vk::PhysicalDevice) -> bool {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        if properties.device_type == vk::PhysicalDeviceType::CPU || properties.api_version < REQUIRED_API_VERSION {
            return false;
        }

        let mut vulkan12_features = vk::PhysicalDeviceVulkan12Features::default();
        let mut features = vk::PhysicalDeviceFeatures2::default().push_next(&mut vulkan12_features);
        unsafe { instance.get_physical_device_features2(device, &mut features) };
        vulkan12_features.timeline_semaphore == vk::TRUE
    }

    fn find_compute_queue_family(instance: &Instance, device: vk::PhysicalDevice) -> Option<(u32, u32)> {
        let queue_family_properties = unsafe {
            instance.get_physical_device_queue_family_properties(device)
        };

        queue_family_properties
            .iter()
            .enumerate()
            .filter(|(_, properties)| properties.queue_flags.contains(vk::QueueFlags::COMPUTE))
            .max_by_key(|(index, properties)| (properties.queue_count.min(3), std::cmp::Reverse(*index)))
            .map(|(index, properties)| (index as u32, properties.queue_count))
    }

    fn get_device_name(instance: &Instance, device: vk::PhysicalDevice) -> String {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let device_name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) };
        device_name.to_string_lossy().into_owned()
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
        }
    }
}
