//! Headless vector-add driver.
//!
//! Loads a precompiled SPIR-V kernel, uploads two float arrays through
//! mapped storage buffers, dispatches once, and verifies the read-back
//! sum. Exits 0 when the round-trip and the computation both verify,
//! 1 on any initialization, resource, or verification failure.
//!
//! The kernel is expected to declare `local_size_x = 256` and three
//! whole-range storage buffers of floats at bindings 0, 1, and 2,
//! computing `c[i] = a[i] + b[i]` with an entry point named `main`.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::undocumented_unsafe_blocks)]

use std::{fs, path::PathBuf, sync::Arc};

use clap::Parser;
use compute_vk::{
    ash::vk,
    buffer::MappedBuffer,
    device::{Device, MemoryUsage},
    dispatch,
    instance::{Instance, VulkanLogLevel},
    pipeline::ComputePipeline,
};
use eyre::{WrapErr, bail};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(
    Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Default, clap::ValueEnum,
)]
enum TracingLogLevel {
    Off,
    Trace,
    Info,
    Debug,
    Warn,
    #[default]
    Error,
}

impl From<TracingLogLevel> for tracing::Level {
    fn from(value: TracingLogLevel) -> Self {
        match value {
            //We clamp this to the lowest possible level but this shouldn't happen
            TracingLogLevel::Off => tracing::Level::TRACE,
            TracingLogLevel::Trace => tracing::Level::TRACE,
            TracingLogLevel::Info => tracing::Level::INFO,
            TracingLogLevel::Debug => tracing::Level::DEBUG,
            TracingLogLevel::Warn => tracing::Level::WARN,
            TracingLogLevel::Error => tracing::Level::ERROR,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum CliVulkanLogLevel {
    Verbose,
    Info,
    Warning,
    Error,
}

impl From<CliVulkanLogLevel> for VulkanLogLevel {
    fn from(value: CliVulkanLogLevel) -> Self {
        match value {
            CliVulkanLogLevel::Verbose => VulkanLogLevel::Verbose,
            CliVulkanLogLevel::Info => VulkanLogLevel::Info,
            CliVulkanLogLevel::Warning => VulkanLogLevel::Warning,
            CliVulkanLogLevel::Error => VulkanLogLevel::Error,
        }
    }
}

#[derive(clap::Parser, Debug)]
struct CliArgs {
    /// Path to the precompiled vector-add kernel (SPIR-V).
    kernel: PathBuf,
    #[arg(short, long, default_value_t = 1024,
          value_parser = clap::value_parser!(u32).range(1..))]
    elements: u32,
    #[arg(short, long, default_value = "error")]
    tracing_log_level: TracingLogLevel,
    #[arg(short, long)]
    graphics_debug_level: Option<CliVulkanLogLevel>,
}

fn main() -> eyre::Result<()> {
    let cli_args = CliArgs::parse();

    if cli_args.tracing_log_level != TracingLogLevel::Off {
        let stdout_log = tracing_subscriber::fmt::layer().pretty();
        tracing_subscriber::registry()
            .with(stdout_log)
            .with(tracing_subscriber::filter::LevelFilter::from_level(
                cli_args.tracing_log_level.into(),
            ))
            .init();
    }

    // Validation diagnostics default on in debug builds; an explicit CLI
    // level wins either way.
    let vulkan_log_level = cli_args
        .graphics_debug_level
        .map(Into::into)
        .or(if cfg!(debug_assertions) {
            Some(VulkanLogLevel::Warning)
        } else {
            None
        });

    //SAFETY: Loads vulkan via libloading which is kinda unsafe but we're fine
    let instance = Arc::new(
        unsafe { Instance::new("vecadd-app", vulkan_log_level) }
            .wrap_err("creating Vulkan instance")?,
    );

    let device = Arc::new(
        Device::create_compute(&instance).wrap_err("creating compute device")?,
    );

    let element_count = cli_args.elements;
    let buffer_size =
        element_count as vk::DeviceSize * size_of::<f32>() as vk::DeviceSize;

    let mut a_buffer = MappedBuffer::new(
        &device,
        buffer_size,
        vk::BufferUsageFlags::STORAGE_BUFFER,
        MemoryUsage::CpuToGpu,
        Some("vecadd input a"),
    )
    .wrap_err("creating input buffer a")?;
    let mut b_buffer = MappedBuffer::new(
        &device,
        buffer_size,
        vk::BufferUsageFlags::STORAGE_BUFFER,
        MemoryUsage::CpuToGpu,
        Some("vecadd input b"),
    )
    .wrap_err("creating input buffer b")?;
    let result_buffer = MappedBuffer::new(
        &device,
        buffer_size,
        vk::BufferUsageFlags::STORAGE_BUFFER,
        MemoryUsage::GpuToCpu,
        Some("vecadd result"),
    )
    .wrap_err("creating result buffer")?;

    // Round-trip check: whatever the host writes through the mapping must
    // read back identically before any dispatch touches the buffer.
    let pattern: Vec<f32> = (0..element_count).map(|i| i as f32).collect();
    a_buffer
        .write_pod(&pattern)
        .wrap_err("writing round-trip pattern")?;
    let mut read_back = vec![0f32; element_count as usize];
    a_buffer
        .read_pod(&mut read_back)
        .wrap_err("reading round-trip pattern")?;
    if let Some(i) = (0..pattern.len()).find(|&i| {
        pattern[i].to_bits() != read_back[i].to_bits()
    }) {
        bail!(
            "round-trip mismatch at index {i}: wrote {}, read {}",
            pattern[i],
            read_back[i]
        );
    }
    tracing::info!("Mapped-buffer round trip verified");

    let a_data = vec![1.0f32; element_count as usize];
    let b_data = vec![2.0f32; element_count as usize];
    a_buffer.write_pod(&a_data).wrap_err("writing input a")?;
    b_buffer.write_pod(&b_data).wrap_err("writing input b")?;

    let spirv = fs::read(&cli_args.kernel).wrap_err_with(|| {
        format!("reading kernel binary {}", cli_args.kernel.display())
    })?;

    //SAFETY: All three buffers outlive the pipeline — it is declared after
    //them and therefore dropped first.
    let mut pipeline = unsafe {
        ComputePipeline::new(
            &device,
            &spirv,
            [&a_buffer, &b_buffer, &result_buffer],
            Some("vecadd"),
        )
    }
    .wrap_err("building compute pipeline")?;

    dispatch::dispatch(&mut pipeline, element_count)
        .wrap_err("dispatching kernel")?;

    let mut result = vec![0f32; element_count as usize];
    result_buffer
        .read_pod(&mut result)
        .wrap_err("reading result buffer")?;

    for i in 0..element_count as usize {
        let expected = a_data[i] + b_data[i];
        if (result[i] - expected).abs() > 1e-6 {
            bail!(
                "computation error at index {i}: expected {expected}, \
                 got {}",
                result[i]
            );
        }
    }

    println!(
        "Compute shader execution verified successfully ({element_count} \
         elements)"
    );

    Ok(())
}
