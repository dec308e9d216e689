//! Thin RAII wrappers around Vulkan objects for headless compute dispatch,
//! built on [`ash`].
//!
//! > **Personal project.** This crate is not intended for general use
//! > and makes no API stability guarantees.
//!
//! # Object hierarchy
//!
//! ```text
//! Instance
//! └── Device (compute queue + allocator)
//!     ├── MappedBuffer
//!     ├── DescriptorSetLayout → DescriptorPool → DescriptorSet
//!     ├── PipelineLayout (with DescriptorSetLayout refs)
//!     ├── ShaderModule → ComputeEntryPoint
//!     ├── ResettableCommandPool → ResettableCommandBuffer
//!     └── ComputePipeline (bundles the above for one kernel)
//! ```
//!
//! Each wrapper holds its parent via `Arc` so parents cannot be
//! destroyed while children are alive.
//!
//! # Naming conventions
//!
//! | prefix  | meaning                                   |
//! |---------|-------------------------------------------|
//! | `raw_*` | accepts or returns a raw `ash::vk` handle |
//! | `ash_*` | returns the `ash` wrapper object          |

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::undocumented_unsafe_blocks)]

pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod dispatch;
pub mod instance;
pub mod pipeline;
pub mod shader;

pub use ash;
