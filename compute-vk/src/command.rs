//! Command pool and command buffer wrappers for compute recording.

use std::{
    marker::PhantomData,
    sync::{Arc, mpsc},
};

use ash::vk;
use thiserror::Error;

use crate::device::Device;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum CreateCommandPoolError {
    #[error("Vulkan error creating command pool: {0}")]
    Vulkan(vk::Result),
}

#[derive(Debug, Error)]
pub enum AllocateCommandBufferError {
    #[error("Vulkan error allocating command buffer: {0}")]
    Vulkan(vk::Result),
}

// ---------------------------------------------------------------------------
// CommandPoolShared — private inner state co-owned by pool and its buffers
// ---------------------------------------------------------------------------

/// Shared ownership of the raw Vulkan pool handle.
///
/// Held via `Arc` by both [`ResettableCommandPool`] and every
/// [`ResettableCommandBuffer`] allocated from it. The Vulkan pool is not
/// destroyed until all of those `Arc` clones are dropped, which prevents a
/// command buffer from holding a handle into a destroyed pool.
struct CommandPoolShared {
    parent: Arc<Device>,
    pool: vk::CommandPool,
}

impl Drop for CommandPoolShared {
    fn drop(&mut self) {
        tracing::debug!("Dropping command pool {:?}", self.pool);
        // SAFETY: pool was created from parent and is being destroyed. This
        // runs only when both ResettableCommandPool and every
        // ResettableCommandBuffer allocated from it have been dropped.
        // vkDestroyCommandPool implicitly frees all allocated command buffers.
        unsafe { self.parent.destroy_raw_command_pool(self.pool) };
    }
}

// ---------------------------------------------------------------------------
// ResettableCommandPool
// ---------------------------------------------------------------------------

/// An owned command pool that allocates individually-resettable
/// command buffers.
///
/// The pool is created with `RESET_COMMAND_BUFFER`, allowing each allocated
/// command buffer to be reset individually via
/// [`ResettableCommandBuffer::reset`].
///
/// `ResettableCommandPool` is `!Sync`: it cannot be shared across threads.
/// The Vulkan spec requires external synchronization for pool-level operations
/// (`vkAllocateCommandBuffers`); by being `!Sync` this is guaranteed
/// structurally rather than with a mutex. If cross-thread sharing is needed,
/// synchronize at a higher level.
///
/// The underlying Vulkan pool is not destroyed until both this wrapper and
/// every [`ResettableCommandBuffer`] allocated from it are dropped.
pub struct ResettableCommandPool {
    shared: Arc<CommandPoolShared>,
    /// Cloned into each newly allocated [`ResettableCommandBuffer`] so that
    /// dropping a buffer sends its handle back for recycling.
    sender: mpsc::Sender<vk::CommandBuffer>,
    /// Receives handles returned by dropped [`ResettableCommandBuffer`]s.
    /// Only drained by `allocate_command_buffer` on the pool-owning thread.
    /// `Receiver` is `!Sync`, making `ResettableCommandPool` structurally
    /// `!Sync` regardless of the `PhantomData` below.
    receiver: mpsc::Receiver<vk::CommandBuffer>,
    /// Explicit `!Sync` marker documenting the design intent. Redundant with
    /// `Receiver` but kept for clarity.
    _not_sync: PhantomData<std::cell::Cell<()>>,
}

impl std::fmt::Debug for ResettableCommandPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResettableCommandPool")
            .field("pool", &self.shared.pool)
            .finish_non_exhaustive()
    }
}

impl ResettableCommandPool {
    /// Create a resettable command pool for the given queue family.
    ///
    /// `name` is an optional debug label applied via `VK_EXT_debug_utils` when
    /// the extension is available. Naming failures are logged as warnings and
    /// do not cause the call to fail.
    pub fn new(
        device: &Arc<Device>,
        queue_family: u32,
        name: Option<&str>,
    ) -> Result<Self, CreateCommandPoolError> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        // SAFETY: create_info uses a valid queue family index for this device.
        let pool = unsafe { device.create_raw_command_pool(&create_info) }
            .map_err(CreateCommandPoolError::Vulkan)?;

        // SAFETY: pool is a valid command pool created from device.
        let name_result = unsafe { device.set_object_name_str(pool, name) };
        if let Err(e) = name_result {
            tracing::warn!("Failed to name command pool {:?}: {e}", pool);
        }

        let (sender, receiver) = mpsc::channel();

        Ok(Self {
            shared: Arc::new(CommandPoolShared {
                parent: Arc::clone(device),
                pool,
            }),
            sender,
            receiver,
            _not_sync: PhantomData,
        })
    }

    /// Allocate a single primary command buffer from this pool.
    ///
    /// All handles that were returned to the pool's channel (by previously
    /// dropped [`ResettableCommandBuffer`]s) are drained. One is recycled for
    /// the caller; any surplus handles are freed via `vkFreeCommandBuffers` to
    /// return their memory to the pool's allocator and bound peak usage. If no
    /// returned handles are available a new buffer is allocated from Vulkan.
    ///
    /// In all cases the returned buffer may not be in the initial state and
    /// **must be reset before recording**.
    ///
    /// The returned buffer holds a clone of the pool's shared inner `Arc`,
    /// so the underlying Vulkan pool is kept alive until both this pool and
    /// all its buffers are dropped.
    pub fn allocate_command_buffer(
        &self,
    ) -> Result<ResettableCommandBuffer, AllocateCommandBufferError> {
        // Drain all returned handles. Recycle one; free the rest to return
        // their memory to the pool's allocator and prevent runaway growth.
        let mut returned: Vec<vk::CommandBuffer> =
            std::iter::from_fn(|| self.receiver.try_recv().ok()).collect();

        let handle = if let Some(recycled) = returned.pop() {
            if !returned.is_empty() {
                // SAFETY: All handles in `returned` were allocated from
                // self.shared.pool. The drop→send contract requires callers
                // not to drop a ResettableCommandBuffer while its GPU work is
                // still executing, so every handle here is idle. External
                // synchronization on the pool is guaranteed by
                // ResettableCommandPool being !Sync — only the owning thread
                // can reach this call site.
                unsafe {
                    self.shared
                        .parent
                        .free_raw_command_buffers(self.shared.pool, &returned)
                };
            }
            recycled
        } else {
            let allocate_info = vk::CommandBufferAllocateInfo::default()
                .command_pool(self.shared.pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(1);

            // SAFETY: allocate_info references a valid pool created from
            // parent. ResettableCommandPool is !Sync so no concurrent pool
            // access is possible.
            unsafe {
                self.shared
                    .parent
                    .allocate_raw_command_buffers(&allocate_info)
            }
            .map(|mut bufs| {
                debug_assert_eq!(bufs.len(), 1);
                bufs.remove(0)
            })
            .map_err(AllocateCommandBufferError::Vulkan)?
        };

        Ok(ResettableCommandBuffer {
            _pool: Arc::clone(&self.shared),
            parent: Arc::clone(&self.shared.parent),
            handle,
            return_sender: self.sender.clone(),
        })
    }

    pub fn raw_command_pool(&self) -> vk::CommandPool {
        self.shared.pool
    }

    pub fn parent(&self) -> &Arc<Device> {
        &self.shared.parent
    }
}

// ---------------------------------------------------------------------------
// ResettableCommandBuffer
// ---------------------------------------------------------------------------

/// A primary command buffer allocated from a [`ResettableCommandPool`].
///
/// All recording operations (`reset`, `begin_one_time_submit`, `end`) are
/// `unsafe` — the caller is responsible for correct Vulkan state sequencing.
///
/// On drop, the raw handle is sent back to the pool's return channel for
/// recycling. If the pool has already been dropped the send is silently
/// discarded; `vkDestroyCommandPool` handles cleanup via [`CommandPoolShared`].
pub struct ResettableCommandBuffer {
    /// Keeps the pool alive until this buffer is dropped.
    _pool: Arc<CommandPoolShared>,
    parent: Arc<Device>,
    handle: vk::CommandBuffer,
    /// Returns the handle to the pool's channel on drop.
    return_sender: mpsc::Sender<vk::CommandBuffer>,
}

impl Drop for ResettableCommandBuffer {
    fn drop(&mut self) {
        // Send the handle back for recycling. If the receiver (pool) has been
        // dropped the error is intentionally ignored — the handle will be freed
        // implicitly when CommandPoolShared (and its
        // vkDestroyCommandPool) runs.
        let _ = self.return_sender.send(self.handle);
    }
}

impl std::fmt::Debug for ResettableCommandBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResettableCommandBuffer")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl ResettableCommandBuffer {
    /// Reset this buffer to the initial state.
    ///
    /// # Safety
    /// The buffer must not be pending execution on the GPU.
    pub unsafe fn reset(&mut self) -> Result<(), vk::Result> {
        // SAFETY: Caller guarantees the buffer is not pending.
        unsafe {
            self.parent.reset_raw_command_buffer(
                self.handle,
                vk::CommandBufferResetFlags::empty(),
            )
        }
    }

    /// Begin recording for a single one-time submission.
    ///
    /// The buffer must be reset before it can be recorded again after the
    /// submission completes.
    ///
    /// # Safety
    /// The buffer must be in the initial state (freshly allocated or reset).
    pub unsafe fn begin_one_time_submit(&mut self) -> Result<(), vk::Result> {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        // SAFETY: Caller guarantees the buffer is in the initial state.
        unsafe {
            self.parent
                .begin_raw_command_buffer(self.handle, &begin_info)
        }
    }

    /// End recording.
    ///
    /// # Safety
    /// The buffer must be in the recording state.
    pub unsafe fn end(&mut self) -> Result<(), vk::Result> {
        // SAFETY: Caller guarantees the buffer is in the recording state.
        unsafe { self.parent.end_raw_command_buffer(self.handle) }
    }

    /// Bind a compute pipeline for subsequent dispatch commands.
    ///
    /// # Safety
    /// The buffer must be in the recording state. `pipeline` must be a valid
    /// compute pipeline created from the same device as this buffer.
    pub unsafe fn bind_compute_pipeline(&mut self, pipeline: vk::Pipeline) {
        // SAFETY: Caller guarantees recording state and pipeline validity.
        unsafe {
            self.parent
                .cmd_bind_compute_pipeline(self.handle, pipeline)
        }
    }

    /// Bind a single descriptor set at set index 0 for subsequent dispatch
    /// commands.
    ///
    /// # Safety
    /// The buffer must be in the recording state. `layout` must be compatible
    /// with the pipeline to be dispatched. `descriptor_set` must be a valid
    /// set created from the same device as this buffer, with no dynamic
    /// descriptors.
    pub unsafe fn bind_compute_descriptor_set(
        &mut self,
        layout: vk::PipelineLayout,
        descriptor_set: vk::DescriptorSet,
    ) {
        // SAFETY: Caller guarantees recording state, layout compatibility,
        // and descriptor set validity.
        unsafe {
            self.parent.cmd_bind_compute_descriptor_sets(
                self.handle,
                layout,
                0,
                std::slice::from_ref(&descriptor_set),
                &[],
            )
        }
    }

    /// Record a compute dispatch.
    ///
    /// # Safety
    /// The buffer must be in the recording state with a compute pipeline
    /// bound and all descriptor sets its shader accesses bound and valid.
    pub unsafe fn dispatch(
        &mut self,
        group_count_x: u32,
        group_count_y: u32,
        group_count_z: u32,
    ) {
        // SAFETY: Caller guarantees pipeline and descriptor state validity.
        unsafe {
            self.parent.cmd_dispatch(
                self.handle,
                group_count_x,
                group_count_y,
                group_count_z,
            )
        }
    }

    pub fn raw_command_buffer(&self) -> vk::CommandBuffer {
        self.handle
    }

    pub fn parent(&self) -> &Arc<Device> {
        &self.parent
    }
}

// ---------------------------------------------------------------------------
// Auto-trait assertions
// ---------------------------------------------------------------------------

// Verified at compile time: both types are Send.
// ResettableCommandPool: Send + !Sync (Receiver/Sender/PhantomData<Cell<()>>)
// ResettableCommandBuffer: Send + !Sync (Sender<T>: !Sync)
#[allow(dead_code)]
trait AssertSend: Send {}
impl AssertSend for ResettableCommandPool {}
impl AssertSend for ResettableCommandBuffer {}
