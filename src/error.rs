use thiserror::Error;
use ash::vk;

#[derive(Error, Debug)]
pub enum MosaicError {
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] ash::vk::Result),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Image error: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("GPU allocator error: {0}")]
    GpuAllocatorError(#[from] gpu_allocator::AllocationError),

    #[error("Thread pool error: {0}")]
    ThreadPoolError(#[from] rayon::ThreadPoolBuildError),

    #[error("No suitable GPU found")]
    NoGpuFound,

    #[error("Vulkan entry load error: {0}")]
    VulkanEntryLoadError(String),

    #[error("Unsupported Vulkan version")]
    UnsupportedVulkanVersion,

    #[error("Shader compilation error: {0}")]
    ShaderCompilationError(String),

    #[error("Pipeline creation error: {0:?}")]
    PipelineCreationError((Vec<vk::Pipeline>, vk::Result)),

    #[error("Device limit exceeded: {0}")]
    DeviceLimitError(String),

    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Invalid dataset: {0}")]
    InvalidDataset(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Distributed error: {0}")]
    DistributedError(String),

    #[error("Worker thread panicked: {0}")]
    WorkerPanicked(String),
}

impl MosaicError {
    /// True when the failure only means no usable accelerator is present,
    /// as opposed to a device that exists but misbehaves.
    pub fn is_device_unavailable(&self) -> bool {
        matches!(
            self,
            MosaicError::NoGpuFound
                | MosaicError::VulkanEntryLoadError(_)
                | MosaicError::UnsupportedVulkanVersion
                | MosaicError::VulkanError(vk::Result::ERROR_INCOMPATIBLE_DRIVER)
                | MosaicError::VulkanError(vk::Result::ERROR_INITIALIZATION_FAILED)
        )
    }
}

pub type Result<T> = std::result::Result<T, MosaicError>;
