//! Pipeline layout and compute pipeline wrappers.
//!
//! [`ComputePipeline`] bundles everything one kernel needs to execute:
//! the pipeline itself, its layout chain, the descriptor pool/set wired
//! to three storage buffers, and a resettable command pool with one
//! primary command buffer. The bundle is built in a single fallible
//! pass and is never partially valid — any step failing releases every
//! object the earlier steps created, in reverse order, before the error
//! returns.

use std::sync::Arc;

use ash::vk;
use thiserror::Error;

use crate::buffer::MappedBuffer;
use crate::command::{
    AllocateCommandBufferError, CreateCommandPoolError,
    ResettableCommandBuffer, ResettableCommandPool,
};
use crate::descriptor::{
    DescriptorBindingDesc, DescriptorPool, DescriptorSet, DescriptorSetLayout,
};
use crate::device::Device;
use crate::shader::{CreateShaderModuleError, ShaderModule};

/// Number of storage-buffer bindings a kernel's descriptor set exposes.
///
/// Binding *i* of the set is wired to the *i*-th buffer passed to
/// [`ComputePipeline::new`]. The descriptor set layout, the pool sizing,
/// and the descriptor writes all derive from this constant, so it cannot
/// drift out of sync with itself — only with the shader, which the
/// driver checks at bind time.
pub const STORAGE_BUFFER_BINDINGS: usize = 3;

// ---------------------------------------------------------------------------
// PipelineLayout
// ---------------------------------------------------------------------------

/// An owned wrapper around a `VkPipelineLayout`.
pub struct PipelineLayout {
    parent: Arc<Device>,
    handle: vk::PipelineLayout,
}

impl std::fmt::Debug for PipelineLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineLayout")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl PipelineLayout {
    /// Create a pipeline layout referencing the given descriptor set
    /// layouts, with no push constant ranges.
    pub fn new(
        device: &Arc<Device>,
        set_layouts: &[&DescriptorSetLayout],
    ) -> Result<Self, vk::Result> {
        let raw_layouts: Vec<vk::DescriptorSetLayout> = set_layouts
            .iter()
            .map(|l| l.raw_descriptor_set_layout())
            .collect();
        let create_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&raw_layouts);
        // SAFETY: create_info references valid set layouts created from
        // device, alive for the duration of this call.
        let handle =
            unsafe { device.create_raw_pipeline_layout(&create_info) }?;
        Ok(Self {
            parent: Arc::clone(device),
            handle,
        })
    }

    pub fn raw_handle(&self) -> vk::PipelineLayout {
        self.handle
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        tracing::debug!("Dropping pipeline layout {:?}", self.handle);
        // SAFETY: handle was created from parent and is being destroyed during
        // teardown. All pipelines using this layout must be dropped first.
        unsafe { self.parent.destroy_raw_pipeline_layout(self.handle) };
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum CreateComputePipelineError {
    #[error("Vulkan error creating descriptor set layout: {0}")]
    DescriptorSetLayoutCreation(vk::Result),

    #[error("Vulkan error creating pipeline layout: {0}")]
    PipelineLayoutCreation(vk::Result),

    #[error(transparent)]
    ShaderModule(#[from] CreateShaderModuleError),

    #[error("Vulkan error creating compute pipeline: {0}")]
    PipelineCreation(vk::Result),

    #[error("Vulkan error creating descriptor pool: {0}")]
    DescriptorPoolCreation(vk::Result),

    #[error("Vulkan error allocating descriptor set: {0}")]
    DescriptorSetAllocation(vk::Result),

    #[error(transparent)]
    CommandPool(#[from] CreateCommandPoolError),

    #[error(transparent)]
    CommandBufferAllocation(#[from] AllocateCommandBufferError),
}

// ---------------------------------------------------------------------------
// OwnedPipeline — private RAII holder for the raw pipeline handle
// ---------------------------------------------------------------------------

struct OwnedPipeline {
    parent: Arc<Device>,
    handle: vk::Pipeline,
}

impl Drop for OwnedPipeline {
    fn drop(&mut self) {
        tracing::debug!("Dropping pipeline {:?}", self.handle);
        // SAFETY: handle was created from parent and is being destroyed during
        // teardown. All in-flight GPU work referencing this pipeline must be
        // completed before drop.
        unsafe { self.parent.destroy_raw_pipeline(self.handle) };
    }
}

// ---------------------------------------------------------------------------
// ComputePipeline
// ---------------------------------------------------------------------------

/// A compute pipeline wired to [`STORAGE_BUFFER_BINDINGS`] storage
/// buffers, bundled with its descriptor objects and a command buffer
/// ready for dispatch recording.
///
/// The pipeline references the buffers it was built against for
/// descriptor reads/writes but does not own them; destroying a bound
/// buffer while this pipeline can still be dispatched is forbidden by
/// the construction contract.
///
/// Field order encodes teardown order: pipeline, then pipeline layout,
/// then descriptor pool, then descriptor set layout, then command
/// objects — the reverse of construction.
pub struct ComputePipeline {
    pipeline: OwnedPipeline,
    pipeline_layout: PipelineLayout,
    descriptor_set: DescriptorSet,
    descriptor_pool: DescriptorPool,
    set_layout: DescriptorSetLayout,
    command_buffer: ResettableCommandBuffer,
    command_pool: ResettableCommandPool,
}

impl std::fmt::Debug for ComputePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputePipeline")
            .field("handle", &self.pipeline.handle)
            .field("layout", &self.pipeline_layout)
            .finish_non_exhaustive()
    }
}

impl ComputePipeline {
    /// Build a compute pipeline for a precompiled SPIR-V kernel with
    /// entry point `main`, binding the three storage buffers to
    /// descriptor bindings 0, 1, and 2 over their whole ranges.
    ///
    /// Construction order: descriptor set layout → pipeline layout →
    /// shader module + pipeline (the module is dropped as soon as this
    /// step finishes, whether it succeeded or not) → descriptor pool →
    /// descriptor set → descriptor writes → command pool on the compute
    /// queue family → one primary command buffer. Each step must succeed
    /// before the next begins; on failure every object already created
    /// is released before the error returns.
    ///
    /// `name` is an optional debug label applied via `VK_EXT_debug_utils`
    /// to the pipeline and its sub-objects when the extension is
    /// available.
    ///
    /// # Safety
    /// Every buffer in `buffers` must remain alive and undestroyed for as
    /// long as this pipeline can still be dispatched. The pipeline holds
    /// the buffers' raw handles in its descriptor set without keeping
    /// them alive.
    pub unsafe fn new(
        device: &Arc<Device>,
        spirv_bytes: &[u8],
        buffers: [&MappedBuffer; STORAGE_BUFFER_BINDINGS],
        name: Option<&str>,
    ) -> Result<Self, CreateComputePipelineError> {
        use CreateComputePipelineError as Error;

        let bindings: Vec<DescriptorBindingDesc> = (0..STORAGE_BUFFER_BINDINGS
            as u32)
            .map(DescriptorBindingDesc::compute_storage_buffer)
            .collect();
        let set_layout = DescriptorSetLayout::new(device, &bindings)
            .map_err(Error::DescriptorSetLayoutCreation)?;

        let pipeline_layout = PipelineLayout::new(device, &[&set_layout])
            .map_err(Error::PipelineLayoutCreation)?;

        // The shader module lives only for this block: it is destroyed as
        // soon as the pipeline exists, or as soon as creation fails.
        let pipeline = {
            let module = ShaderModule::new(device, spirv_bytes, name)?;
            let entry = module
                .compute_entry_point("main")
                .expect("\"main\" contains no NUL byte");
            let create_info = vk::ComputePipelineCreateInfo::default()
                .stage(entry.as_pipeline_stage_create_info())
                .layout(pipeline_layout.raw_handle());
            // SAFETY: create_info references a valid compute entry point and
            // a valid pipeline layout, both derived from device and alive for
            // the duration of this call.
            let handle =
                unsafe { device.create_raw_compute_pipeline(&create_info) }
                    .map_err(Error::PipelineCreation)?;
            OwnedPipeline {
                parent: Arc::clone(device),
                handle,
            }
        };

        // SAFETY: pipeline.handle is a valid pipeline created from device.
        let name_result =
            unsafe { device.set_object_name_str(pipeline.handle, name) };
        if let Err(e) = name_result {
            tracing::warn!(
                "Failed to name pipeline {:?}: {e}",
                pipeline.handle
            );
        }

        let pool_sizes = [vk::DescriptorPoolSize::default()
            .ty(vk::DescriptorType::STORAGE_BUFFER)
            .descriptor_count(STORAGE_BUFFER_BINDINGS as u32)];
        let descriptor_pool = DescriptorPool::new(device, 1, &pool_sizes)
            .map_err(Error::DescriptorPoolCreation)?;

        let mut sets = descriptor_pool
            .allocate_sets(&[&set_layout])
            .map_err(Error::DescriptorSetAllocation)?;
        debug_assert_eq!(sets.len(), 1);
        let descriptor_set = sets.remove(0);

        for (binding, buffer) in buffers.iter().enumerate() {
            // SAFETY: buffer is a live storage buffer created from device;
            // the caller guarantees it outlives every dispatch of this
            // pipeline.
            unsafe {
                descriptor_set.write_storage_buffer(
                    device,
                    binding as u32,
                    buffer,
                )
            };
        }

        let command_pool = ResettableCommandPool::new(
            device,
            device.compute_queue_family(),
            name,
        )?;
        let command_buffer = command_pool.allocate_command_buffer()?;

        Ok(Self {
            pipeline,
            pipeline_layout,
            descriptor_set,
            descriptor_pool,
            set_layout,
            command_buffer,
            command_pool,
        })
    }

    pub fn raw_pipeline(&self) -> vk::Pipeline {
        self.pipeline.handle
    }

    pub fn raw_pipeline_layout(&self) -> vk::PipelineLayout {
        self.pipeline_layout.raw_handle()
    }

    pub fn raw_descriptor_set(&self) -> vk::DescriptorSet {
        self.descriptor_set.raw_descriptor_set()
    }

    pub fn raw_command_pool(&self) -> vk::CommandPool {
        self.command_pool.raw_command_pool()
    }

    pub fn set_layout(&self) -> &DescriptorSetLayout {
        &self.set_layout
    }

    pub fn parent(&self) -> &Arc<Device> {
        &self.pipeline.parent
    }

    pub(crate) fn command_buffer_mut(&mut self) -> &mut ResettableCommandBuffer {
        &mut self.command_buffer
    }
}
