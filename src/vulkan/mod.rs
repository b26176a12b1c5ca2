pub mod instance;
pub mod device;
pub mod memory;
pub mod kernel;
pub mod pipeline;
pub mod transform;
pub mod matching;
pub mod host;

pub use instance::VulkanInstance;
pub use device::VulkanDevice;
pub use memory::{VulkanMemoryManager, VulkanBuffer};
pub use kernel::{CompiledKernel, ComputeKernel};
pub use pipeline::{ChunkTicket, SlotRing};
pub use host::{DeviceContext, VulkanHost};
