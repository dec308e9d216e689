//! Smoke tests against a real Vulkan device.
//!
//! These are `#[ignore]`d because they need a compute-capable GPU and a
//! working Vulkan loader. Run them locally with:
//!
//! ```text
//! cargo test -p compute-vk -- --ignored
//! ```

use std::sync::Arc;

use compute_vk::{
    ash::vk,
    buffer::{MappedBuffer, WriteBufferError},
    device::{Device, MemoryUsage},
    instance::Instance,
};

fn create_device() -> Arc<Device> {
    //SAFETY: Loads vulkan via libloading; nothing else is touching the
    //loader in this process.
    let instance = Arc::new(
        unsafe { Instance::new("compute-vk smoke tests", None) }
            .expect("failed to create instance"),
    );
    Arc::new(
        Device::create_compute(&instance)
            .expect("failed to create compute device"),
    )
}

fn storage_buffer(
    device: &Arc<Device>,
    bytes: vk::DeviceSize,
    usage: MemoryUsage,
) -> MappedBuffer {
    MappedBuffer::new(
        device,
        bytes,
        vk::BufferUsageFlags::STORAGE_BUFFER,
        usage,
        Some("smoke test buffer"),
    )
    .expect("failed to create mapped buffer")
}

#[test]
#[ignore = "requires a Vulkan-capable device"]
fn mapped_round_trip_identity() {
    let device = create_device();
    let mut buffer =
        storage_buffer(&device, 1024 * size_of::<f32>() as u64, MemoryUsage::CpuToGpu);

    let written: Vec<f32> = (0..1024).map(|i| i as f32 * 0.5).collect();
    buffer.write_pod(&written).expect("write failed");

    let mut read = vec![0f32; 1024];
    buffer.read_pod(&mut read).expect("read failed");

    for (i, (w, r)) in written.iter().zip(&read).enumerate() {
        assert_eq!(w.to_bits(), r.to_bits(), "mismatch at index {i}");
    }

    // Zero-length transfers are valid no-ops.
    buffer.write_pod::<f32>(&[]).expect("empty write failed");
    buffer.read_pod::<f32>(&mut []).expect("empty read failed");

    device.wait_idle().expect("wait_idle failed");
}

#[test]
#[ignore = "requires a Vulkan-capable device"]
fn readback_memory_round_trips_too() {
    let device = create_device();
    let mut buffer =
        storage_buffer(&device, 256 * size_of::<f32>() as u64, MemoryUsage::GpuToCpu);

    let written = vec![4.25f32; 256];
    buffer.write_pod(&written).expect("write failed");

    let mut read = vec![0f32; 256];
    buffer.read_pod(&mut read).expect("read failed");
    assert_eq!(written, read);
}

#[test]
#[ignore = "requires a Vulkan-capable device"]
fn destroy_is_idempotent() {
    let device = create_device();
    let mut buffer =
        storage_buffer(&device, 64, MemoryUsage::CpuToGpu);

    assert!(!buffer.is_destroyed());
    buffer.destroy();
    assert!(buffer.is_destroyed());
    assert_eq!(buffer.raw_buffer(), vk::Buffer::null());

    // Second destroy is a no-op, and the handle stays null.
    buffer.destroy();
    assert!(buffer.is_destroyed());
    assert_eq!(buffer.raw_buffer(), vk::Buffer::null());

    // Post-destroy I/O reports the destroyed state instead of faulting.
    let err = buffer.write_pod(&[0u8; 4]).unwrap_err();
    assert!(matches!(err, WriteBufferError::Destroyed));
}

#[test]
#[ignore = "requires a Vulkan-capable device"]
fn oversized_write_is_rejected() {
    let device = create_device();
    let mut buffer = storage_buffer(&device, 16, MemoryUsage::CpuToGpu);

    let err = buffer.write_pod(&[0f32; 8]).unwrap_err();
    assert!(matches!(
        err,
        WriteBufferError::DataTooLarge {
            data_bytes: 32,
            buffer_bytes: 16,
        }
    ));
}
