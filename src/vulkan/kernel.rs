use ash::{vk, Device};
use log::debug;
use crate::error::{MosaicError, Result};

/// GLSL source of a compute kernel plus the shape of its interface.
#[derive(Debug, Clone, Copy)]
pub struct KernelSource {
    pub name: &'static str,
    pub glsl: &'static str,
    /// Storage buffers bound at set 0, bindings `0..storage_buffers`
    pub storage_buffers: u32,
    /// Push-constant block size in bytes
    pub push_constant_size: u32,
}

/// Rearranges one row of interleaved tiles into channel-major tiles.
pub const TILING_KERNEL: KernelSource = KernelSource {
    name: "tiling.comp",
    glsl: include_str!("../shader/tiling.comp"),
    storage_buffers: 2,
    push_constant_size: 4,
};

/// Exhaustive nearest-neighbour search over one corpus batch, one invocation
/// per tile, folding into a running minimum.
pub const PHOTOMOSAIC_KERNEL: KernelSource = KernelSource {
    name: "photomosaic.comp",
    glsl: include_str!("../shader/photomosaic.comp"),
    storage_buffers: 4,
    push_constant_size: 16,
};

/// Workgroup width of `tiling.comp`.
pub const TILING_LOCAL_SIZE: u32 = 256;
/// Workgroup width of `photomosaic.comp`.
pub const PHOTOMOSAIC_LOCAL_SIZE: u32 = 64;

/// A kernel compiled to SPIR-V, ready to be turned into pipelines on any device.
#[derive(Debug, Clone)]
pub struct CompiledKernel {
    pub source: KernelSource,
    pub spirv: Vec<u32>,
}

impl CompiledKernel {
    /// Compile GLSL to SPIR-V. Compiler diagnostics are returned verbatim.
    pub fn compile(source: KernelSource) -> Result<Self> {
        let compiler = shaderc::Compiler::new()
            .map_err(|e| MosaicError::ShaderCompilationError(e.to_string()))?;
        let mut options = shaderc::CompileOptions::new()
            .map_err(|e| MosaicError::ShaderCompilationError(e.to_string()))?;
        options.set_optimization_level(shaderc::OptimizationLevel::Performance);

        let artifact = compiler
            .compile_into_spirv(
                source.glsl,
                shaderc::ShaderKind::Compute,
                source.name,
                "main",
                Some(&options),
            )
            .map_err(|e| MosaicError::ShaderCompilationError(e.to_string()))?;
        if artifact.get_num_warnings() > 0 {
            debug!("{}: {}", source.name, artifact.get_warning_messages());
        }

        Ok(Self {
            source,
            spirv: artifact.as_binary().to_vec(),
        })
    }
}

/// Pipeline, layouts and descriptor pool for one kernel on one device.
pub struct ComputeKernel {
    device: Device,
    pub name: &'static str,
    descriptor_set_layout: vk::DescriptorSetLayout,
    descriptor_pool: vk::DescriptorPool,
    pub pipeline_layout: vk::PipelineLayout,
    pub pipeline: vk::Pipeline,
}

impl ComputeKernel {
    /// Build the pipeline on `device`, with room for `max_sets` descriptor sets.
    pub fn new(device: &Device, kernel: &CompiledKernel, max_sets: u32) -> Result<Self> {
        let mut this = Self {
            device: device.clone(),
            name: kernel.source.name,
            descriptor_set_layout: vk::DescriptorSetLayout::null(),
            descriptor_pool: vk::DescriptorPool::null(),
            pipeline_layout: vk::PipelineLayout::null(),
            pipeline: vk::Pipeline::null(),
        };
        // anything created before a failure is released by Drop
        this.descriptor_set_layout = Self::create_descriptor_set_layout(device, kernel.source.storage_buffers)?;
        this.descriptor_pool = Self::create_descriptor_pool(device, kernel.source.storage_buffers, max_sets)?;
        this.pipeline_layout = Self::create_pipeline_layout(
            device,
            &[this.descriptor_set_layout],
            kernel.source.push_constant_size,
        )?;
        this.pipeline = Self::create_compute_pipeline(device, &kernel.spirv, this.pipeline_layout)?;
        Ok(this)
    }

    /// Return every descriptor set to the pool. Sets from the previous phase
    /// must no longer be in use.
    pub fn reset(&self) -> Result<()> {
        unsafe {
            self.device
                .reset_descriptor_pool(self.descriptor_pool, vk::DescriptorPoolResetFlags::empty())?;
        }
        Ok(())
    }

    /// Allocate a descriptor set binding `buffers` to bindings `0..buffers.len()`.
    pub fn bind(&self, buffers: &[vk::DescriptorBufferInfo]) -> Result<vk::DescriptorSet> {
        let set_layouts = [self.descriptor_set_layout];
        let allocate_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.descriptor_pool)
            .set_layouts(&set_layouts);
        let descriptor_set = unsafe { self.device.allocate_descriptor_sets(&allocate_info)? }[0];

        let buffer_infos: Vec<[vk::DescriptorBufferInfo; 1]> = buffers.iter().map(|info| [*info]).collect();
        let writes: Vec<vk::WriteDescriptorSet> = buffer_infos
            .iter()
            .enumerate()
            .map(|(binding, info)| {
                vk::WriteDescriptorSet::default()
                    .dst_set(descriptor_set)
                    .dst_binding(binding as u32)
                    .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                    .buffer_info(info)
            })
            .collect();
        unsafe { self.device.update_descriptor_sets(&writes, &[]) };
        Ok(descriptor_set)
    }

    /// Record pipeline bind, descriptor bind, push constants and dispatch.
    pub fn record_dispatch(
        &self,
        cmd_buffer: vk::CommandBuffer,
        descriptor_set: vk::DescriptorSet,
        push_constants: &[u8],
        workgroups: u32,
    ) {
        unsafe {
            self.device.cmd_bind_pipeline(cmd_buffer, vk::PipelineBindPoint::COMPUTE, self.pipeline);
            self.device.cmd_bind_descriptor_sets(
                cmd_buffer,
                vk::PipelineBindPoint::COMPUTE,
                self.pipeline_layout,
                0,
                &[descriptor_set],
                &[],
            );
            self.device.cmd_push_constants(
                cmd_buffer,
                self.pipeline_layout,
                vk::ShaderStageFlags::COMPUTE,
                0,
                push_constants,
            );
            self.device.cmd_dispatch(cmd_buffer, workgroups, 1, 1);
        }
    }

    fn create_descriptor_set_layout(device: &Device, storage_buffers: u32) -> Result<vk::DescriptorSetLayout> {
        let bindings: Vec<vk::DescriptorSetLayoutBinding> = (0..storage_buffers)
            .map(|binding| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(binding)
                    .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                    .descriptor_count(1)
                    .stage_flags(vk::ShaderStageFlags::COMPUTE)
            })
            .collect();

        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        unsafe {
            device
                .create_descriptor_set_layout(&create_info, None)
                .map_err(MosaicError::VulkanError)
        }
    }

    fn create_descriptor_pool(device: &Device, storage_buffers: u32, max_sets: u32) -> Result<vk::DescriptorPool> {
        let pool_sizes = [vk::DescriptorPoolSize {
            ty: vk::DescriptorType::STORAGE_BUFFER,
            descriptor_count: storage_buffers * max_sets,
        }];
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(&pool_sizes);
        unsafe {
            device
                .create_descriptor_pool(&create_info, None)
                .map_err(MosaicError::VulkanError)
        }
    }

    fn create_pipeline_layout(
        device: &Device,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_size: u32,
    ) -> Result<vk::PipelineLayout> {
        let push_constant_ranges = [vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::COMPUTE,
            offset: 0,
            size: push_constant_size,
        }];
        let pipeline_layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(set_layouts)
            .push_constant_ranges(&push_constant_ranges);
        unsafe {
            device
                .create_pipeline_layout(&pipeline_layout_info, None)
                .map_err(MosaicError::VulkanError)
        }
    }

    fn create_compute_pipeline(
        device: &Device,
        spirv: &[u32],
        pipeline_layout: vk::PipelineLayout,
    ) -> Result<vk::Pipeline> {
        let shader_module_info = vk::ShaderModuleCreateInfo::default().code(spirv);
        let shader_module = unsafe {
            device
                .create_shader_module(&shader_module_info, None)
                .map_err(MosaicError::VulkanError)?
        };

        let shader_stage_info = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(shader_module)
            .name(c"main");

        let pipeline_info = vk::ComputePipelineCreateInfo::default()
            .stage(shader_stage_info)
            .layout(pipeline_layout);

        let pipelines = unsafe {
            device.create_compute_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        };

        // Release the temporary shader module
        unsafe {
            device.destroy_shader_module(shader_module, None);
        }

        let pipelines = pipelines.map_err(MosaicError::PipelineCreationError)?;
        Ok(pipelines[0])
    }
}

impl Drop for ComputeKernel {
    fn drop(&mut self) {
        unsafe {
            if self.pipeline != vk::Pipeline::null() {
                self.device.destroy_pipeline(self.pipeline, None);
            }
            if self.pipeline_layout != vk::PipelineLayout::null() {
                self.device.destroy_pipeline_layout(self.pipeline_layout, None);
            }
            if self.descriptor_pool != vk::DescriptorPool::null() {
                self.device.destroy_descriptor_pool(self.descriptor_pool, None);
            }
            if self.descriptor_set_layout != vk::DescriptorSetLayout::null() {
                self.device.destroy_descriptor_set_layout(self.descriptor_set_layout, None);
            }
        }
    }
}
