//! Logical device wrapper ([`Device`]).
//!
//! `Device` wraps a `VkDevice` and centralises all per-device state:
//! a `gpu-allocator` allocator (behind a `Mutex`), an optional debug
//! utils loader for object naming, plus the compute queue and its
//! family index.
//!
//! Physical device selection uses a priority-based fold: discrete GPUs
//! outrank integrated GPUs, and only devices that report API version
//! 1.1+, a dedicated transfer queue family, and a compute-capable queue
//! family are considered. [`Device::create_compute`] wraps this
//! selection and returns the highest-priority match.
//!
//! All raw Vulkan operations on the device handle are surfaced as
//! `unsafe fn` methods prefixed with `raw_` (e.g. `create_raw_buffer`).
//! Higher-level wrappers in sibling modules call these rather than
//! accessing `ash::Device` directly.

use std::ffi::{CStr, CString};
use std::sync::{Arc, Mutex};

use ash::vk;
use gpu_allocator::{
    AllocationError, MemoryLocation,
    vulkan::{
        Allocation, AllocationCreateDesc, AllocationScheme, Allocator,
        AllocatorCreateDesc,
    },
};
use thiserror::Error;

use crate::instance::{FetchPhysicalDeviceError, Instance, VkVersion};

/// Describes how a host-mapped allocation will be accessed.
///
/// Passed to [`Device::allocate_memory`] to select the best-matching
/// Vulkan memory type and determine whether atom-size padding is
/// required for non-coherent flush alignment. Both variants are
/// host-visible; device-local-only memory is out of scope for this
/// crate, which only deals in persistently mapped buffers.
#[derive(Copy, Clone, Debug)]
pub enum MemoryUsage {
    /// CPU-writable, GPU-readable. For kernel inputs.
    CpuToGpu,
    /// GPU-writable, CPU-readable. For kernel-output readback.
    GpuToCpu,
}

/// A logical Vulkan device and its associated per-device state.
///
/// Wraps an `ash::Device`, a `gpu-allocator` allocator (behind a
/// `Mutex`), an optional debug utils loader, and the compute queue.
///
/// Constructed via [`Device::create_compute`], which selects the best
/// physical device by priority (discrete > integrated) among those
/// satisfying the compute-dispatch requirements. Raw Vulkan operations
/// are exposed as `unsafe fn` methods prefixed with `raw_`.
pub struct Device {
    parent: Arc<Instance>,
    allocator: Option<Mutex<Allocator>>,
    handle: ash::Device,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    properties: vk::PhysicalDeviceProperties,
    debug_utils_device: Option<ash::ext::debug_utils::Device>,
    physical_device: vk::PhysicalDevice,
    compute_queue: (Mutex<vk::Queue>, u32),
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("handle", &self.handle.handle())
            .finish_non_exhaustive()
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        tracing::debug!("Dropping device {:?}", self.handle.handle());
        // Ensure allocator is dropped before vkDestroyDevice.
        self.allocator = None;
        //SAFETY: All objects derived from this device should be dropped
        //before this device is dropped.
        unsafe { self.handle.destroy_device(None) };
    }
}

#[derive(Debug, Error)]
pub enum CreateComputeDeviceError {
    #[error("Host memory exhaustion while creating a compute device")]
    MemoryExhaustion,

    #[error("Unknown Vulkan error while creating a compute device: {0}")]
    UnknownVulkan(vk::Result),

    #[error(
        "No suitable physical device found (requires API 1.1+, a \
         dedicated transfer queue family, and a compute queue family)"
    )]
    NoSuitableDevice,

    #[error("Failed to create logical device: {0}")]
    DeviceCreationFailed(vk::Result),

    #[error("Failed to create GPU allocator: {0}")]
    AllocatorCreation(AllocationError),
}

#[derive(Debug, Error)]
pub enum NameObjectError {
    #[error("Invalid Vulkan object name (contains interior NUL): {0}")]
    InvalidName(std::ffi::NulError),

    #[error("Vulkan error setting object name: {0}")]
    Vulkan(vk::Result),
}

impl Device {
    /// Create a logical device suitable for headless compute dispatch.
    ///
    /// Selects the highest-priority physical device that reports API
    /// version 1.1 or later, a dedicated transfer queue family (transfer
    /// capability without graphics or compute), and a compute-capable
    /// queue family. Devices failing any requirement are skipped. Among
    /// the survivors, devices with a dedicated compute family outrank
    /// those without, then discrete GPUs outrank integrated ones.
    ///
    /// The compute queue family index is validated here, during
    /// selection, and the queue is fetched for exactly that family
    /// immediately after device creation — queue retrieval therefore
    /// cannot fail after a successful build.
    pub fn create_compute(
        instance: &Arc<Instance>,
    ) -> Result<Self, CreateComputeDeviceError> {
        let physical_devices = instance.fetch_raw_physical_devices()?;
        let device_type_priority = |dt: vk::PhysicalDeviceType| -> u32 {
            match dt {
                vk::PhysicalDeviceType::DISCRETE_GPU => 3,
                vk::PhysicalDeviceType::INTEGRATED_GPU => 2,
                vk::PhysicalDeviceType::VIRTUAL_GPU => 1,
                _ => 0,
            }
        };

        struct DeviceCandidate {
            handle: vk::PhysicalDevice,
            props: vk::PhysicalDeviceProperties,
            compute_family: u32,
            transfer_family: u32,
            /// (has_dedicated_compute, device_type_priority) compared
            /// lexicographically.
            score: (u32, u32),
        }

        let mut candidates: Vec<DeviceCandidate> = Vec::new();

        for &dev in &physical_devices {
            // SAFETY: dev was derived from instance.
            let props =
                unsafe { instance.get_raw_physical_device_properties(dev) };
            // SAFETY: dev was derived from instance.
            let queue_families = unsafe {
                instance.get_raw_physical_device_queue_family_properties(dev)
            };

            let dev_api = VkVersion::from_raw(props.api_version);
            if dev_api.major() < 1
                || (dev_api.major() == 1 && dev_api.minor() < 1)
            {
                tracing::debug!(
                    "Skipping {:?}: API version {}.{} is below 1.1",
                    props.device_name_as_c_str().unwrap_or(c"unknown"),
                    dev_api.major(),
                    dev_api.minor(),
                );
                continue;
            }

            // A dedicated transfer family is transfer-capable but has
            // neither graphics nor compute bits — hard filter.
            let Some(transfer_family) =
                queue_families.iter().enumerate().find_map(|(idx, qf)| {
                    let f = qf.queue_flags;
                    (f.contains(vk::QueueFlags::TRANSFER)
                        && !f.contains(vk::QueueFlags::GRAPHICS)
                        && !f.contains(vk::QueueFlags::COMPUTE))
                    .then_some(idx as u32)
                })
            else {
                tracing::debug!(
                    "Skipping {:?}: no dedicated transfer queue family",
                    props.device_name_as_c_str().unwrap_or(c"unknown"),
                );
                continue;
            };

            // Prefer a dedicated compute family (no graphics); fall back
            // to any compute-capable family. No compute at all — hard
            // filter.
            let dedicated_compute =
                queue_families.iter().enumerate().find_map(|(idx, qf)| {
                    (qf.queue_flags.contains(vk::QueueFlags::COMPUTE)
                        && !qf.queue_flags.contains(vk::QueueFlags::GRAPHICS))
                    .then_some(idx as u32)
                });
            let any_compute =
                queue_families.iter().enumerate().find_map(|(idx, qf)| {
                    qf.queue_flags
                        .contains(vk::QueueFlags::COMPUTE)
                        .then_some(idx as u32)
                });
            let Some(compute_family) = dedicated_compute.or(any_compute)
            else {
                tracing::debug!(
                    "Skipping {:?}: no compute queue family",
                    props.device_name_as_c_str().unwrap_or(c"unknown"),
                );
                continue;
            };

            let score = (
                dedicated_compute.is_some() as u32,
                device_type_priority(props.device_type),
            );

            candidates.push(DeviceCandidate {
                handle: dev,
                props,
                compute_family,
                transfer_family,
                score,
            });
        }

        let best = candidates
            .iter()
            .max_by_key(|c| c.score)
            .ok_or(CreateComputeDeviceError::NoSuitableDevice)?;

        let physical_device = best.handle;
        // SAFETY: physical_device was selected from this instance.
        let memory_properties = unsafe {
            instance.get_raw_physical_device_memory_properties(physical_device)
        };
        tracing::info!(
            "Selected physical device: {:?} \
             (type: {:?}, compute family: {}, dedicated transfer family: {})",
            best.props.device_name_as_c_str().unwrap_or(c"unknown"),
            best.props.device_type,
            best.compute_family,
            best.transfer_family,
        );

        let queue_priorities = [1.0f32];
        let queue_create_info = vk::DeviceQueueCreateInfo::default()
            .queue_family_index(best.compute_family)
            .queue_priorities(&queue_priorities);

        let device_create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(std::slice::from_ref(&queue_create_info));

        // SAFETY: physical_device was derived from instance;
        // device_create_info is fully initialised above.
        let device = unsafe {
            instance.create_ash_device(physical_device, &device_create_info)
        }
        .map_err(CreateComputeDeviceError::DeviceCreationFailed)?;

        // SAFETY: device was just created with one queue on this family.
        let compute_queue_handle =
            unsafe { device.get_device_queue(best.compute_family, 0) };

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.ash_instance().clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .map_err(CreateComputeDeviceError::AllocatorCreation)?;

        Ok(Self {
            parent: instance.clone(),
            allocator: Some(Mutex::new(allocator)),
            memory_properties,
            properties: best.props,
            debug_utils_device: instance
                .create_debug_utils_device_loader(&device),
            handle: device,
            physical_device,
            compute_queue: (
                Mutex::new(compute_queue_handle),
                best.compute_family,
            ),
        })
    }

    pub fn parent(&self) -> &Arc<Instance> {
        &self.parent
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.properties
    }

    pub fn non_coherent_atom_size(&self) -> vk::DeviceSize {
        self.properties.limits.non_coherent_atom_size
    }

    pub fn compute_queue_family(&self) -> u32 {
        self.compute_queue.1
    }

    /// Score a memory type for a given usage; returns `None` if the
    /// type is incompatible.  Higher scores are more preferred.
    fn score_memory_type(
        flags: vk::MemoryPropertyFlags,
        usage: MemoryUsage,
    ) -> Option<u32> {
        use vk::MemoryPropertyFlags as F;
        let device_local = flags.contains(F::DEVICE_LOCAL);
        let host_visible = flags.contains(F::HOST_VISIBLE);
        let host_cached = flags.contains(F::HOST_CACHED);
        match usage {
            MemoryUsage::CpuToGpu => {
                // Prefer DEVICE_LOCAL (ReBAR / unified memory).
                host_visible.then_some(if device_local { 2 } else { 1 })
            }
            MemoryUsage::GpuToCpu => {
                // Prefer HOST_CACHED for efficient CPU reads.
                host_visible.then_some(if host_cached { 2 } else { 1 })
            }
        }
    }

    /// Select the best Vulkan memory type index for `requirements`
    /// and `usage`.  Among types with equal score the lowest index
    /// wins, matching Vulkan's convention that earlier types in the
    /// list are more preferred within the same heap.
    fn select_memory_type(
        &self,
        requirements: vk::MemoryRequirements,
        usage: MemoryUsage,
    ) -> Option<u32> {
        self.memory_properties.memory_types
            [..self.memory_properties.memory_type_count as usize]
            .iter()
            .enumerate()
            .filter(|(i, _)| requirements.memory_type_bits & (1 << i) != 0)
            .filter_map(|(i, ty)| {
                Self::score_memory_type(ty.property_flags, usage)
                    .map(|s| (i as u32, s))
            })
            .max_by(|(i1, s1), (i2, s2)| s1.cmp(s2).then(i2.cmp(i1)))
            .map(|(i, _)| i)
    }

    /// Allocate device memory for the given requirements.
    ///
    /// Selects the best-matching Vulkan memory type for `usage`,
    /// narrows `requirements.memory_type_bits` to that type, then
    /// rounds `size` and `alignment` up to
    /// `VkPhysicalDeviceLimits::nonCoherentAtomSize` only when the
    /// chosen type is HOST_VISIBLE but not HOST_COHERENT.
    pub fn allocate_memory(
        &self,
        name: &str,
        requirements: vk::MemoryRequirements,
        usage: MemoryUsage,
        linear: bool,
    ) -> Result<Allocation, AllocationError> {
        let atom = self.properties.limits.non_coherent_atom_size;
        let requirements =
            if let Some(idx) = self.select_memory_type(requirements, usage) {
                use vk::MemoryPropertyFlags as F;
                let flags = self.memory_properties.memory_types[idx as usize]
                    .property_flags;
                let non_coherent_visible = flags.contains(F::HOST_VISIBLE)
                    && !flags.contains(F::HOST_COHERENT);
                let (size, alignment) = if non_coherent_visible {
                    (
                        requirements.size.div_ceil(atom) * atom,
                        requirements.alignment.max(atom),
                    )
                } else {
                    (requirements.size, requirements.alignment)
                };
                vk::MemoryRequirements {
                    size,
                    alignment,
                    memory_type_bits: 1 << idx,
                }
            } else {
                requirements
            };
        let location = match usage {
            MemoryUsage::CpuToGpu => MemoryLocation::CpuToGpu,
            MemoryUsage::GpuToCpu => MemoryLocation::GpuToCpu,
        };
        let allocator = self
            .allocator
            .as_ref()
            .expect("allocator is dropped only during Device::drop")
            .lock()
            .expect("allocator lock poisoned");
        let mut allocator = allocator;
        allocator.allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })
    }

    pub fn free_memory(
        &self,
        allocation: Allocation,
    ) -> Result<(), AllocationError> {
        let allocator = self
            .allocator
            .as_ref()
            .expect("allocator is dropped only during Device::drop")
            .lock()
            .expect("allocator lock poisoned");
        let mut allocator = allocator;
        allocator.free(allocation)
    }

    pub fn ash_device(&self) -> &ash::Device {
        &self.handle
    }

    /// Wait until all submitted work on this device has completed.
    ///
    /// This may block the calling thread and should generally be used for
    /// coarse-grained transitions (shutdown in particular) rather than
    /// per-dispatch synchronisation, which goes through
    /// [`compute_queue_wait_idle`](Self::compute_queue_wait_idle).
    pub fn wait_idle(&self) -> Result<(), vk::Result> {
        let _span = tracing::debug_span!("device_wait_idle").entered();
        // SAFETY: `self.handle` is a valid logical device for the lifetime of
        // `self`, and this call has no additional pointer preconditions.
        unsafe { self.handle.device_wait_idle() }
    }

    pub fn raw_device(&self) -> vk::Device {
        self.handle.handle()
    }
}

// Queue submit functionality
impl Device {
    /// Submit work to the compute queue.
    ///
    /// # Safety
    /// All handles in `submits` must be valid and derived from this device.
    /// Command buffers must be in the executable state. `fence`, when not
    /// null, must be an unsignaled fence created from this device.
    pub unsafe fn compute_queue_submit(
        &self,
        submits: &[vk::SubmitInfo<'_>],
        fence: vk::Fence,
    ) -> Result<(), vk::Result> {
        let queue = self
            .compute_queue
            .0
            .lock()
            .expect("compute queue lock poisoned");
        // SAFETY: Caller guarantees all handle validity and
        // synchronization state.
        unsafe { self.handle.queue_submit(*queue, submits, fence) }
    }

    /// Block until the compute queue has drained all submitted work.
    ///
    /// There is no timeout; a hung driver blocks the calling thread
    /// indefinitely.
    pub fn compute_queue_wait_idle(&self) -> Result<(), vk::Result> {
        let _span = tracing::debug_span!("compute_queue_wait_idle").entered();
        let queue = self
            .compute_queue
            .0
            .lock()
            .expect("compute queue lock poisoned");
        // SAFETY: queue is a valid queue owned by this device; holding the
        // lock guarantees no concurrent submission from this wrapper.
        unsafe { self.handle.queue_wait_idle(*queue) }
    }
}

// Debug naming functionality
impl Device {
    /// Set a Vulkan debug name for an object owned by this device.
    ///
    /// Passing `None` as the name is treated as a no-op.
    ///
    /// # Safety
    /// `object` must be a valid Vulkan handle created from this device (or a
    /// child object associated with this device) and must remain valid for the
    /// duration of the call.
    pub unsafe fn set_object_name<H>(
        &self,
        object: H,
        name: Option<&CStr>,
    ) -> Result<(), NameObjectError>
    where
        H: vk::Handle,
    {
        let Some(debug_utils) = self.debug_utils_device.as_ref() else {
            return Ok(());
        };

        let Some(name) = name else {
            return Ok(());
        };

        let object_name_info = vk::DebugUtilsObjectNameInfoEXT::default()
            .object_handle(object)
            .object_name(name);

        // SAFETY: Caller guarantees object provenance and validity.
        unsafe { debug_utils.set_debug_utils_object_name(&object_name_info) }
            .map_err(NameObjectError::Vulkan)
    }

    /// Lazily set a Vulkan debug name for an object owned by this device.
    ///
    /// The closure is only called if `VK_EXT_debug_utils` is enabled.
    /// Returning `None` from the closure is treated as a no-op.
    ///
    /// # Safety
    /// `object` must be a valid Vulkan handle created from this device (or a
    /// child object associated with this device) and must remain valid for the
    /// duration of the call.
    pub unsafe fn set_object_name_with<H, F>(
        &self,
        object: H,
        name_provider: F,
    ) -> Result<(), NameObjectError>
    where
        H: vk::Handle,
        F: FnOnce() -> Option<CString>,
    {
        if self.debug_utils_device.is_none() {
            return Ok(());
        }

        let name = name_provider();
        // SAFETY: This method shares the same safety contract as
        // set_object_name.
        unsafe { self.set_object_name(object, name.as_deref()) }
    }

    /// Convenience helper to set a name from UTF-8 text.
    ///
    /// Passing `None` as the name is treated as a no-op.
    ///
    /// # Safety
    /// `object` must be a valid Vulkan handle created from this device (or a
    /// child object associated with this device) and must remain valid for the
    /// duration of the call.
    pub unsafe fn set_object_name_str<H>(
        &self,
        object: H,
        name: Option<&str>,
    ) -> Result<(), NameObjectError>
    where
        H: vk::Handle,
    {
        let name = match name {
            Some(name) => {
                Some(CString::new(name).map_err(NameObjectError::InvalidName)?)
            }
            None => None,
        };

        // SAFETY: This method shares the same safety contract as
        // set_object_name.
        unsafe { self.set_object_name(object, name.as_deref()) }
    }
}

// Shader module functionality
impl Device {
    /// # Safety
    /// `create_info` must contain valid SPIR-V code. All referenced pointers
    /// must remain valid for the duration of the call.
    pub unsafe fn create_raw_shader_module(
        &self,
        create_info: &vk::ShaderModuleCreateInfo<'_>,
    ) -> Result<vk::ShaderModule, vk::Result> {
        // SAFETY: Caller guarantees create_info validity.
        unsafe { self.handle.create_shader_module(create_info, None) }
    }

    /// # Safety
    /// `shader_module` must be a valid handle created from this device and
    /// not yet destroyed. All objects derived from it must be destroyed first.
    pub unsafe fn destroy_raw_shader_module(
        &self,
        shader_module: vk::ShaderModule,
    ) {
        // SAFETY: Caller guarantees shader_module provenance and drop ordering.
        unsafe { self.handle.destroy_shader_module(shader_module, None) };
    }
}

// Pipeline functionality
impl Device {
    /// # Safety
    /// `create_info` must be a valid pipeline layout create info. All
    /// referenced descriptor set layouts must be valid handles created from
    /// this device.
    pub unsafe fn create_raw_pipeline_layout(
        &self,
        create_info: &vk::PipelineLayoutCreateInfo<'_>,
    ) -> Result<vk::PipelineLayout, vk::Result> {
        // SAFETY: Caller guarantees create_info validity.
        unsafe { self.handle.create_pipeline_layout(create_info, None) }
    }

    /// # Safety
    /// `layout` must be a valid handle created from this device and not yet
    /// destroyed. No pipeline still using this layout may be in use.
    pub unsafe fn destroy_raw_pipeline_layout(
        &self,
        layout: vk::PipelineLayout,
    ) {
        // SAFETY: Caller guarantees layout provenance and drop ordering.
        unsafe { self.handle.destroy_pipeline_layout(layout, None) };
    }

    /// Create a single compute pipeline.
    ///
    /// On partial batch failure ash returns any successfully-created pipeline
    /// handles alongside the error; this wrapper destroys them so callers
    /// never receive a mix of valid and invalid handles.
    ///
    /// # Safety
    /// `create_info` must reference a valid compute shader stage, a valid
    /// pipeline layout, and any pNext structures, all derived from this
    /// device. All referenced pointers must remain valid for the duration of
    /// the call.
    pub unsafe fn create_raw_compute_pipeline(
        &self,
        create_info: &vk::ComputePipelineCreateInfo<'_>,
    ) -> Result<vk::Pipeline, vk::Result> {
        // SAFETY: Caller guarantees create_info validity.
        unsafe {
            self.handle.create_compute_pipelines(
                vk::PipelineCache::null(),
                std::slice::from_ref(create_info),
                None,
            )
        }
        .map_err(|(partial, result)| {
            // Destroy any handles that were successfully created before the
            // failure so the caller receives nothing on error.
            for p in partial {
                if p != vk::Pipeline::null() {
                    // SAFETY: p was just created by this device.
                    unsafe { self.handle.destroy_pipeline(p, None) };
                }
            }
            result
        })
        .map(|mut pipelines| {
            debug_assert_eq!(pipelines.len(), 1);
            pipelines.remove(0)
        })
    }

    /// # Safety
    /// `pipeline` must be a valid handle created from this device and not yet
    /// destroyed. No in-flight GPU work may still reference the pipeline.
    pub unsafe fn destroy_raw_pipeline(&self, pipeline: vk::Pipeline) {
        // SAFETY: Caller guarantees pipeline provenance and drop ordering.
        unsafe { self.handle.destroy_pipeline(pipeline, None) };
    }
}

// Recording commands
impl Device {
    /// Bind a compute pipeline for subsequent dispatch commands.
    ///
    /// # Safety
    /// `command_buffer` must be in the recording state. `pipeline` must be a
    /// valid compute pipeline created from this device.
    pub unsafe fn cmd_bind_compute_pipeline(
        &self,
        command_buffer: vk::CommandBuffer,
        pipeline: vk::Pipeline,
    ) {
        // SAFETY: Caller guarantees command_buffer state and pipeline validity.
        unsafe {
            self.handle.cmd_bind_pipeline(
                command_buffer,
                vk::PipelineBindPoint::COMPUTE,
                pipeline,
            )
        }
    }

    /// Bind descriptor sets for subsequent dispatch commands.
    ///
    /// # Safety
    /// - `command_buffer` must be in the recording state.
    /// - `layout` must be compatible with the pipeline to be used.
    /// - All handles in `descriptor_sets` must be valid and derived
    ///   from this device.
    /// - `dynamic_offsets` must match the number of dynamic
    ///   descriptors in the bound sets.
    pub unsafe fn cmd_bind_compute_descriptor_sets(
        &self,
        command_buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        first_set: u32,
        descriptor_sets: &[vk::DescriptorSet],
        dynamic_offsets: &[u32],
    ) {
        // SAFETY: Caller guarantees command buffer state, layout
        // compatibility, and descriptor set validity.
        unsafe {
            self.handle.cmd_bind_descriptor_sets(
                command_buffer,
                vk::PipelineBindPoint::COMPUTE,
                layout,
                first_set,
                descriptor_sets,
                dynamic_offsets,
            )
        }
    }

    /// Record a compute dispatch over a grid of work groups.
    ///
    /// A group count of zero in any dimension records a dispatch with no
    /// invocations, which is legal and a no-op on the GPU.
    ///
    /// # Safety
    /// `command_buffer` must be in the recording state with a compute
    /// pipeline bound and all descriptor sets that the pipeline's shader
    /// accesses bound and valid. Group counts must not exceed the device's
    /// `maxComputeWorkGroupCount` limits.
    pub unsafe fn cmd_dispatch(
        &self,
        command_buffer: vk::CommandBuffer,
        group_count_x: u32,
        group_count_y: u32,
        group_count_z: u32,
    ) {
        // SAFETY: Caller guarantees command buffer, pipeline, and
        // descriptor state validity.
        unsafe {
            self.handle.cmd_dispatch(
                command_buffer,
                group_count_x,
                group_count_y,
                group_count_z,
            )
        }
    }
}

// Buffer and memory functionality
impl Device {
    /// # Safety
    /// `create_info` must be valid and reference only objects derived from
    /// this device. All referenced pointers must remain valid for the
    /// duration of the call.
    pub unsafe fn create_raw_buffer(
        &self,
        create_info: &vk::BufferCreateInfo<'_>,
    ) -> Result<vk::Buffer, vk::Result> {
        // SAFETY: Caller guarantees create_info validity.
        unsafe { self.handle.create_buffer(create_info, None) }
    }

    /// # Safety
    /// `buffer` must be a valid handle created from this device and not yet
    /// destroyed. No in-flight GPU work may still reference `buffer`.
    pub unsafe fn destroy_raw_buffer(&self, buffer: vk::Buffer) {
        // SAFETY: Caller guarantees buffer provenance and drop ordering.
        unsafe { self.handle.destroy_buffer(buffer, None) };
    }

    /// Query memory requirements for a buffer.
    ///
    /// # Safety
    /// `buffer` must be a valid handle created from this device.
    pub unsafe fn get_raw_buffer_memory_requirements(
        &self,
        buffer: vk::Buffer,
    ) -> vk::MemoryRequirements {
        // SAFETY: Caller guarantees buffer validity.
        unsafe { self.handle.get_buffer_memory_requirements(buffer) }
    }

    /// # Safety
    /// `buffer` and `memory` must both be valid handles created from this
    /// device. `offset` must satisfy alignment/size requirements from
    /// `vkGetBufferMemoryRequirements`.
    pub unsafe fn bind_raw_buffer_memory(
        &self,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> Result<(), vk::Result> {
        // SAFETY: Caller guarantees handle validity and offset constraints.
        unsafe { self.handle.bind_buffer_memory(buffer, memory, offset) }
    }

    /// # Safety
    /// Every range in `memory_ranges` must reference memory allocations from
    /// this device and satisfy Vulkan flush requirements.
    pub unsafe fn flush_raw_mapped_memory_ranges(
        &self,
        memory_ranges: &[vk::MappedMemoryRange<'_>],
    ) -> Result<(), vk::Result> {
        // SAFETY: Caller guarantees memory range validity.
        unsafe { self.handle.flush_mapped_memory_ranges(memory_ranges) }
    }

    /// # Safety
    /// Every range in `memory_ranges` must reference memory allocations from
    /// this device and satisfy Vulkan invalidate requirements.
    pub unsafe fn invalidate_raw_mapped_memory_ranges(
        &self,
        memory_ranges: &[vk::MappedMemoryRange<'_>],
    ) -> Result<(), vk::Result> {
        // SAFETY: Caller guarantees memory range validity.
        unsafe { self.handle.invalidate_mapped_memory_ranges(memory_ranges) }
    }
}

// Command pool functionality
impl Device {
    /// # Safety
    /// `create_info` must have a valid `queue_family_index` for this device.
    /// All referenced pointers must remain valid for the duration of the call.
    pub unsafe fn create_raw_command_pool(
        &self,
        create_info: &vk::CommandPoolCreateInfo<'_>,
    ) -> Result<vk::CommandPool, vk::Result> {
        // SAFETY: Caller guarantees create_info validity and queue
        // family provenance.
        unsafe { self.handle.create_command_pool(create_info, None) }
    }

    /// # Safety
    /// `pool` must be a valid handle created from this device and not yet
    /// destroyed. All command buffers allocated from it must have finished
    /// execution and must not be referenced by any pending GPU work.
    pub unsafe fn destroy_raw_command_pool(&self, pool: vk::CommandPool) {
        // SAFETY: Caller guarantees pool provenance and drop ordering.
        unsafe { self.handle.destroy_command_pool(pool, None) };
    }

    /// # Safety
    /// `allocate_info.command_pool` must be a valid pool created from this
    /// device. `command_buffer_count` must be non-zero.
    pub unsafe fn allocate_raw_command_buffers(
        &self,
        allocate_info: &vk::CommandBufferAllocateInfo<'_>,
    ) -> Result<Vec<vk::CommandBuffer>, vk::Result> {
        // SAFETY: Caller guarantees allocate_info validity and pool provenance.
        unsafe { self.handle.allocate_command_buffers(allocate_info) }
    }

    /// # Safety
    /// `command_buffer` must be in the initial or executable state and must
    /// not be pending execution. All pointers in `begin_info` must remain
    /// valid for the duration of the call.
    pub unsafe fn begin_raw_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        begin_info: &vk::CommandBufferBeginInfo<'_>,
    ) -> Result<(), vk::Result> {
        // SAFETY: Caller guarantees command_buffer state and
        // begin_info validity.
        unsafe { self.handle.begin_command_buffer(command_buffer, begin_info) }
    }

    /// # Safety
    /// `command_buffer` must be in the recording state.
    pub unsafe fn end_raw_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
    ) -> Result<(), vk::Result> {
        // SAFETY: Caller guarantees command_buffer is in the recording state.
        unsafe { self.handle.end_command_buffer(command_buffer) }
    }

    /// # Safety
    /// `command_buffer` must not be pending execution on the GPU. The pool it
    /// was allocated from must have been created with
    /// `RESET_COMMAND_BUFFER`.
    pub unsafe fn reset_raw_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        flags: vk::CommandBufferResetFlags,
    ) -> Result<(), vk::Result> {
        // SAFETY: Caller guarantees command_buffer is not pending
        // and pool flag is set.
        unsafe { self.handle.reset_command_buffer(command_buffer, flags) }
    }

    /// Free command buffers back to their source pool, returning memory to the
    /// pool's internal allocator.
    ///
    /// A no-op when `command_buffers` is empty.
    ///
    /// # Safety
    /// - All handles in `command_buffers` must have been allocated from `pool`.
    /// - No buffer in `command_buffers` may be pending execution on the GPU.
    /// - The caller must externally synchronize access to `pool` (e.g. by
    ///   ensuring no other thread is allocating or resetting from it
    ///   concurrently).
    pub unsafe fn free_raw_command_buffers(
        &self,
        pool: vk::CommandPool,
        command_buffers: &[vk::CommandBuffer],
    ) {
        if command_buffers.is_empty() {
            return;
        }
        // SAFETY: Caller guarantees pool/buffer provenance, idle state, and
        // external synchronization on pool.
        unsafe { self.handle.free_command_buffers(pool, command_buffers) }
    }
}

// Descriptor set functionality
impl Device {
    /// # Safety
    /// `create_info` must be valid and reference only objects
    /// derived from this device.
    pub unsafe fn create_raw_descriptor_set_layout(
        &self,
        create_info: &vk::DescriptorSetLayoutCreateInfo<'_>,
    ) -> Result<vk::DescriptorSetLayout, vk::Result> {
        // SAFETY: Caller guarantees create_info validity.
        unsafe { self.handle.create_descriptor_set_layout(create_info, None) }
    }

    /// # Safety
    /// `layout` must be a valid handle created from this device
    /// and not yet destroyed. No descriptor pool that used this
    /// layout may still exist.
    pub unsafe fn destroy_raw_descriptor_set_layout(
        &self,
        layout: vk::DescriptorSetLayout,
    ) {
        // SAFETY: Caller guarantees layout provenance and ordering.
        unsafe { self.handle.destroy_descriptor_set_layout(layout, None) };
    }

    /// # Safety
    /// `create_info` must be valid and reference only objects
    /// derived from this device.
    pub unsafe fn create_raw_descriptor_pool(
        &self,
        create_info: &vk::DescriptorPoolCreateInfo<'_>,
    ) -> Result<vk::DescriptorPool, vk::Result> {
        // SAFETY: Caller guarantees create_info validity.
        unsafe { self.handle.create_descriptor_pool(create_info, None) }
    }

    /// # Safety
    /// `pool` must be a valid handle created from this device and
    /// not yet destroyed. All descriptor sets allocated from it
    /// must not be referenced by any pending GPU work.
    pub unsafe fn destroy_raw_descriptor_pool(&self, pool: vk::DescriptorPool) {
        // SAFETY: Caller guarantees pool provenance and ordering.
        unsafe { self.handle.destroy_descriptor_pool(pool, None) };
    }

    /// # Safety
    /// `alloc_info.descriptor_pool` must be a valid pool created
    /// from this device with sufficient capacity. All layouts in
    /// `alloc_info` must be valid handles derived from this device.
    pub unsafe fn allocate_raw_descriptor_sets(
        &self,
        alloc_info: &vk::DescriptorSetAllocateInfo<'_>,
    ) -> Result<Vec<vk::DescriptorSet>, vk::Result> {
        // SAFETY: Caller guarantees alloc_info validity.
        unsafe { self.handle.allocate_descriptor_sets(alloc_info) }
    }

    /// Write or copy descriptor set updates.
    ///
    /// # Safety
    /// All handles in `descriptor_writes` and `descriptor_copies`
    /// must be valid and derived from this device. Buffer and image
    /// references in `descriptor_writes` must remain valid for as
    /// long as the descriptor set is bound in a submitted command
    /// buffer.
    pub unsafe fn update_raw_descriptor_sets(
        &self,
        descriptor_writes: &[vk::WriteDescriptorSet<'_>],
        descriptor_copies: &[vk::CopyDescriptorSet<'_>],
    ) {
        // SAFETY: Caller guarantees write/copy validity.
        unsafe {
            self.handle
                .update_descriptor_sets(descriptor_writes, descriptor_copies)
        }
    }
}

impl From<FetchPhysicalDeviceError> for CreateComputeDeviceError {
    fn from(value: FetchPhysicalDeviceError) -> Self {
        match value {
            FetchPhysicalDeviceError::MemoryExhaustion => {
                Self::MemoryExhaustion
            }
            FetchPhysicalDeviceError::UnknownVulkan(e) => {
                Self::UnknownVulkan(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_type_scoring_prefers_device_local_for_uploads() {
        use vk::MemoryPropertyFlags as F;
        let plain = Device::score_memory_type(
            F::HOST_VISIBLE | F::HOST_COHERENT,
            MemoryUsage::CpuToGpu,
        );
        let rebar = Device::score_memory_type(
            F::HOST_VISIBLE | F::HOST_COHERENT | F::DEVICE_LOCAL,
            MemoryUsage::CpuToGpu,
        );
        assert!(rebar > plain);
        assert_eq!(
            Device::score_memory_type(F::DEVICE_LOCAL, MemoryUsage::CpuToGpu),
            None
        );
    }

    #[test]
    fn memory_type_scoring_prefers_host_cached_for_readback() {
        use vk::MemoryPropertyFlags as F;
        let uncached = Device::score_memory_type(
            F::HOST_VISIBLE | F::HOST_COHERENT,
            MemoryUsage::GpuToCpu,
        );
        let cached = Device::score_memory_type(
            F::HOST_VISIBLE | F::HOST_CACHED,
            MemoryUsage::GpuToCpu,
        );
        assert!(cached > uncached);
    }
}
