//! Persistently mapped GPU buffers and the [`BufferHandle`] trait.
//!
//! [`MappedBuffer`] is a storage buffer bound to host-visible memory
//! that stays mapped for the buffer's whole lifetime, so host code
//! reads and writes it directly with no staging copies. Write kernel
//! inputs with [`write_pod`](MappedBuffer::write_pod) and read kernel
//! outputs back with [`read_pod`](MappedBuffer::read_pod).
//!
//! The buffer owns its allocation. It is released either by the
//! explicit, idempotent [`destroy`](MappedBuffer::destroy) or on drop;
//! after destruction the handle holds the null sentinel and further
//! destroys are no-ops.
//!
//! [`BufferHandle`] is a thin trait for passing buffers (or raw
//! `vk::Buffer` references) to descriptor-write helpers.

use std::sync::Arc;

use ash::vk;
use bytemuck::Pod;
use gpu_allocator::{AllocationError, vulkan::Allocation};
use thiserror::Error;

use crate::device::{Device, MemoryUsage};

/// Trait for types that expose a raw `VkBuffer` handle.
///
/// Implemented by [`MappedBuffer`]. Blanket impls cover `&T`, so both
/// the owned wrapper and borrows of it satisfy the bound. Allows
/// descriptor-write helpers to be generic over concrete buffer types.
pub trait BufferHandle {
    fn raw_buffer(&self) -> vk::Buffer;
}

impl<T> BufferHandle for &T
where
    T: BufferHandle + ?Sized,
{
    fn raw_buffer(&self) -> vk::Buffer {
        (*self).raw_buffer()
    }
}

#[derive(Debug, Error)]
pub enum CreateBufferError {
    #[error("Vulkan error creating buffer: {0}")]
    CreateBuffer(vk::Result),

    #[error("GPU allocator error allocating memory: {0}")]
    AllocateMemory(AllocationError),

    #[error("Vulkan error binding buffer memory: {0}")]
    BindMemory(vk::Result),

    #[error("Selected memory type did not yield a persistent mapping")]
    NotMapped,
}

#[derive(Debug, Error)]
pub enum WriteBufferError {
    #[error(
        "Data size ({data_bytes} bytes) exceeds buffer size ({buffer_bytes} bytes)"
    )]
    DataTooLarge {
        data_bytes: usize,
        buffer_bytes: vk::DeviceSize,
    },

    #[error("Vulkan error flushing mapped memory: {0}")]
    FlushMemory(vk::Result),

    #[error("Buffer has already been destroyed")]
    Destroyed,
}

#[derive(Debug, Error)]
pub enum ReadBufferError {
    #[error(
        "Read size ({read_bytes} bytes) exceeds buffer size ({buffer_bytes} bytes)"
    )]
    ReadTooLarge {
        read_bytes: usize,
        buffer_bytes: vk::DeviceSize,
    },

    #[error("Vulkan error invalidating mapped memory: {0}")]
    InvalidateMemory(vk::Result),

    #[error("Buffer has already been destroyed")]
    Destroyed,
}

/// A storage buffer bound to persistently mapped host-visible memory.
///
/// Created against a [`Device`]'s allocator with a fixed byte size and
/// a [`MemoryUsage`] access intent (`CpuToGpu` for inputs, `GpuToCpu`
/// for readback). The mapping is established at creation time and stays
/// valid until destruction, so no map/unmap or staging-copy calls
/// appear anywhere on the I/O path.
///
/// The buffer must not outlive the device it was allocated from; the
/// `Arc<Device>` parent link enforces this structurally.
pub struct MappedBuffer {
    parent: Arc<Device>,
    handle: vk::Buffer,
    allocation: Option<Allocation>,
    size: vk::DeviceSize,
}

impl std::fmt::Debug for MappedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedBuffer")
            .field("handle", &self.handle)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

impl MappedBuffer {
    /// Create a buffer of `size` bytes bound to mapped host-visible
    /// memory.
    ///
    /// `usage` is the Vulkan buffer usage (typically
    /// `STORAGE_BUFFER`); `memory_usage` selects the memory-type
    /// preference. Fails with [`CreateBufferError::NotMapped`] if the
    /// allocator returns an unmapped allocation, which host-visible
    /// requests should never do.
    ///
    /// `name` is an optional debug label applied via `VK_EXT_debug_utils`
    /// when the extension is available. Naming failures are logged as
    /// warnings and do not cause the call to fail.
    pub fn new(
        device: &Arc<Device>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        memory_usage: MemoryUsage,
        name: Option<&str>,
    ) -> Result<Self, CreateBufferError> {
        let create_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        // SAFETY: create_info is fully initialised and has no borrowed data.
        let handle = unsafe { device.create_raw_buffer(&create_info) }
            .map_err(CreateBufferError::CreateBuffer)?;

        // SAFETY: handle is a valid buffer created from device.
        let name_result = unsafe { device.set_object_name_str(handle, name) };
        if let Err(e) = name_result {
            tracing::warn!("Failed to name buffer {:?}: {e}", handle);
        }

        // SAFETY: handle is a valid buffer created from this device.
        let reqs = unsafe { device.get_raw_buffer_memory_requirements(handle) };
        let allocation_name = name.unwrap_or("mapped buffer");
        let allocation = device
            .allocate_memory(allocation_name, reqs, memory_usage, true)
            .map_err(|e| {
                // SAFETY: handle was created from this device and is not bound
                // to memory yet.
                unsafe { device.destroy_raw_buffer(handle) };
                CreateBufferError::AllocateMemory(e)
            })?;

        // SAFETY: handle and allocation memory are valid and belong to this
        // device.
        let bind_result = unsafe {
            device.bind_raw_buffer_memory(
                handle,
                allocation.memory(),
                allocation.offset(),
            )
        };
        if let Err(e) = bind_result {
            let _ = device.free_memory(allocation);
            // SAFETY: handle is valid and owned by this scope.
            unsafe {
                device.destroy_raw_buffer(handle);
            }
            return Err(CreateBufferError::BindMemory(e));
        }

        if allocation.mapped_ptr().is_none() {
            let _ = device.free_memory(allocation);
            // SAFETY: handle is valid and owned by this scope; the memory it
            // was bound to has just been freed.
            unsafe {
                device.destroy_raw_buffer(handle);
            }
            return Err(CreateBufferError::NotMapped);
        }

        Ok(Self {
            parent: Arc::clone(device),
            handle,
            allocation: Some(allocation),
            size,
        })
    }

    /// Copy `data` into the mapped region, starting at offset 0.
    ///
    /// Flushes non-coherent memory ranges as needed so the GPU observes
    /// the write with no further host-side calls.
    pub fn write_pod<T: Pod>(
        &mut self,
        data: &[T],
    ) -> Result<(), WriteBufferError> {
        let bytes = bytemuck::cast_slice(data);
        if bytes.len() as vk::DeviceSize > self.size {
            return Err(WriteBufferError::DataTooLarge {
                data_bytes: bytes.len(),
                buffer_bytes: self.size,
            });
        }

        let allocation =
            self.allocation.as_ref().ok_or(WriteBufferError::Destroyed)?;
        let mapped_ptr = allocation
            .mapped_ptr()
            .expect("mapping was verified at creation");

        // SAFETY: mapped_ptr points to CPU-visible allocation memory and
        // bytes.len() has been bounds-checked against buffer size above.
        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                mapped_ptr.as_ptr().cast::<u8>(),
                bytes.len(),
            );
        }

        // HOST_COHERENT memory is always visible to the GPU after the
        // CPU write; no explicit flush is needed.
        let is_coherent = allocation
            .memory_properties()
            .contains(vk::MemoryPropertyFlags::HOST_COHERENT);
        if !is_coherent && !bytes.is_empty() {
            let flush_range = self.atom_aligned_range(allocation, bytes.len());
            // SAFETY: flush_range references a valid mapped memory
            // allocation from this device.
            unsafe {
                self.parent.flush_raw_mapped_memory_ranges(
                    std::slice::from_ref(&flush_range),
                )
            }
            .map_err(WriteBufferError::FlushMemory)?;
        }

        Ok(())
    }

    /// Copy bytes out of the mapped region into `out`, starting at
    /// offset 0.
    ///
    /// Invalidates non-coherent memory ranges first so the host
    /// observes GPU writes that completed before this call.
    pub fn read_pod<T: Pod>(
        &self,
        out: &mut [T],
    ) -> Result<(), ReadBufferError> {
        let byte_len = std::mem::size_of_val(out);
        if byte_len as vk::DeviceSize > self.size {
            return Err(ReadBufferError::ReadTooLarge {
                read_bytes: byte_len,
                buffer_bytes: self.size,
            });
        }

        let allocation =
            self.allocation.as_ref().ok_or(ReadBufferError::Destroyed)?;
        let mapped_ptr = allocation
            .mapped_ptr()
            .expect("mapping was verified at creation");

        let is_coherent = allocation
            .memory_properties()
            .contains(vk::MemoryPropertyFlags::HOST_COHERENT);
        if !is_coherent && byte_len != 0 {
            let invalidate_range = self.atom_aligned_range(allocation, byte_len);
            // SAFETY: invalidate_range references a valid mapped memory
            // allocation from this device.
            unsafe {
                self.parent.invalidate_raw_mapped_memory_ranges(
                    std::slice::from_ref(&invalidate_range),
                )
            }
            .map_err(ReadBufferError::InvalidateMemory)?;
        }

        let bytes: &mut [u8] = bytemuck::cast_slice_mut(out);
        // SAFETY: mapped_ptr points to CPU-visible allocation memory and
        // bytes.len() has been bounds-checked against buffer size above.
        unsafe {
            std::ptr::copy_nonoverlapping(
                mapped_ptr.as_ptr().cast::<u8>(),
                bytes.as_mut_ptr(),
                bytes.len(),
            );
        }

        Ok(())
    }

    /// Build a `VkMappedMemoryRange` covering `byte_len` bytes from the
    /// start of the allocation, rounded up to the non-coherent atom
    /// size. Both alignment invariants are guaranteed by
    /// `Device::allocate_memory`.
    fn atom_aligned_range<'a>(
        &self,
        allocation: &'a Allocation,
        byte_len: usize,
    ) -> vk::MappedMemoryRange<'a> {
        let atom = self.parent.non_coherent_atom_size();
        debug_assert_eq!(allocation.offset() % atom, 0);
        debug_assert_eq!(allocation.size() % atom, 0);
        // Rounded size fits within allocation.size() since byte_len <=
        // self.size <= allocation.size().
        let range_size = (byte_len as vk::DeviceSize).div_ceil(atom) * atom;
        vk::MappedMemoryRange::default()
            // SAFETY: allocation was returned by gpu-allocator for this
            // device and remains live while self is alive.
            .memory(unsafe { allocation.memory() })
            .offset(allocation.offset())
            .size(range_size)
    }

    /// Release the buffer and its allocation.
    ///
    /// Idempotent: after the first call the handle holds the null
    /// sentinel and subsequent calls (including the one from `Drop`)
    /// are no-ops. Safe to call on a buffer whose creation partner
    /// objects are still alive only once no submitted GPU work still
    /// references the buffer.
    pub fn destroy(&mut self) {
        if self.handle == vk::Buffer::null() {
            return;
        }
        tracing::debug!("Destroying buffer {:?}", self.handle);
        // SAFETY: handle was created from parent, is non-null, and is owned
        // by this wrapper.
        unsafe {
            self.parent.destroy_raw_buffer(self.handle);
        }
        self.handle = vk::Buffer::null();

        if let Some(allocation) = self.allocation.take()
            && let Err(e) = self.parent.free_memory(allocation)
        {
            tracing::error!("Failed to free GPU allocation: {e}");
        }
    }

    /// True once [`destroy`](Self::destroy) has run.
    pub fn is_destroyed(&self) -> bool {
        self.handle == vk::Buffer::null()
    }

    /// The raw buffer handle, or the null sentinel after destruction.
    pub fn raw_buffer(&self) -> vk::Buffer {
        self.handle
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    pub fn parent(&self) -> &Arc<Device> {
        &self.parent
    }
}

impl Drop for MappedBuffer {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl BufferHandle for MappedBuffer {
    fn raw_buffer(&self) -> vk::Buffer {
        self.handle
    }
}
