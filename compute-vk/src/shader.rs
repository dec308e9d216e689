//! Compute shader module wrapper.
//!
//! [`ShaderModule`] owns a `VkShaderModule` built from a precompiled
//! SPIR-V blob whose bytes are treated as opaque beyond word-alignment
//! validation. [`ComputeEntryPoint`] is a borrow-view pairing a module
//! with an entry point name, used to build the single stage of a
//! compute pipeline. Modules are short-lived: pipeline construction
//! drops them as soon as the pipeline exists.

use std::borrow::Cow;
use std::ffi::CString;
use std::sync::Arc;

use ash::vk;
use thiserror::Error;

use crate::device::Device;

#[derive(Debug, Error)]
pub enum CreateShaderModuleError {
    #[error("SPIR-V byte slice length ({0}) is not a multiple of 4")]
    InvalidLength(usize),

    #[error("Vulkan error creating shader module: {0}")]
    Vulkan(vk::Result),
}

/// Reinterpret SPIR-V bytes as u32 words. If the slice is already
/// u32-aligned we borrow it directly; otherwise we copy into a Vec.
///
/// SPIR-V is defined as little-endian, so the copy path uses
/// from_le_bytes rather than from_ne_bytes to be correct on all
/// platforms. The direct borrow path via align_to is only reached on
/// little-endian targets where native and SPIR-V byte order match.
fn spirv_words(bytes: &[u8]) -> Result<Cow<'_, [u32]>, CreateShaderModuleError> {
    if !bytes.len().is_multiple_of(4) {
        return Err(CreateShaderModuleError::InvalidLength(bytes.len()));
    }

    // SAFETY: u32 has no invalid bit patterns and the length was verified
    // to be a multiple of 4, so the reinterpretation is sound.
    let (prefix, aligned_words, _suffix) = unsafe { bytes.align_to::<u32>() };
    if prefix.is_empty() && cfg!(target_endian = "little") {
        Ok(Cow::Borrowed(aligned_words))
    } else {
        Ok(Cow::Owned(
            bytes
                .chunks_exact(4)
                .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
                .collect(),
        ))
    }
}

pub struct ShaderModule {
    parent: Arc<Device>,
    handle: vk::ShaderModule,
}

impl std::fmt::Debug for ShaderModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShaderModule")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl ShaderModule {
    /// Create a shader module from raw SPIR-V bytes.
    ///
    /// `spirv_bytes` must have a length that is a multiple of 4. If the
    /// bytes are not already aligned to `u32`, they are copied internally.
    /// Anything else wrong with the blob (truncation, corruption) is
    /// rejected by the driver and surfaced as
    /// [`CreateShaderModuleError::Vulkan`].
    ///
    /// `name` is an optional debug label applied via `VK_EXT_debug_utils` when
    /// the extension is available. Naming failures are logged as warnings and
    /// do not cause the call to fail.
    pub fn new(
        device: &Arc<Device>,
        spirv_bytes: &[u8],
        name: Option<&str>,
    ) -> Result<Self, CreateShaderModuleError> {
        let code = spirv_words(spirv_bytes)?;

        let create_info = vk::ShaderModuleCreateInfo::default().code(&code);

        // SAFETY: create_info contains valid SPIR-V code words.
        let handle = unsafe { device.create_raw_shader_module(&create_info) }
            .map_err(CreateShaderModuleError::Vulkan)?;

        // SAFETY: handle is a valid shader module created from device.
        let name_result = unsafe { device.set_object_name_str(handle, name) };
        if let Err(e) = name_result {
            tracing::warn!("Failed to name shader module {:?}: {e}", handle);
        }

        Ok(Self {
            parent: Arc::clone(device),
            handle,
        })
    }

    /// Create a [`ComputeEntryPoint`] view into this module for the given
    /// entry point name.
    ///
    /// Returns `Err` only if `name` contains an interior NUL byte.
    pub fn compute_entry_point(
        &self,
        name: &str,
    ) -> Result<ComputeEntryPoint<'_>, std::ffi::NulError> {
        Ok(ComputeEntryPoint {
            module: self,
            name: CString::new(name)?,
        })
    }

    pub fn raw_handle(&self) -> vk::ShaderModule {
        self.handle
    }

    pub fn get_parent(&self) -> &Arc<Device> {
        &self.parent
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        tracing::debug!("Dropping shader module {:?}", self.handle);
        // SAFETY: handle was created from parent and is being destroyed during
        // teardown. Pipelines built from this module stay valid; the module
        // itself is only needed during pipeline construction.
        unsafe { self.parent.destroy_raw_shader_module(self.handle) };
    }
}

/// A borrow-view pairing a [`ShaderModule`] with a compute entry point name.
///
/// Created via [`ShaderModule::compute_entry_point`]. The lifetime `'a` ties
/// this view to the module it was created from, ensuring the module stays
/// alive for as long as any pipeline stage create info derived from it is in
/// use.
#[derive(Debug)]
pub struct ComputeEntryPoint<'a> {
    module: &'a ShaderModule,
    name: CString,
}

impl<'a> ComputeEntryPoint<'a> {
    /// Build a `VkPipelineShaderStageCreateInfo` referencing this entry point
    /// at the compute stage.
    ///
    /// The returned struct borrows from `self`, so it must not outlive this
    /// `ComputeEntryPoint`.
    pub fn as_pipeline_stage_create_info(
        &self,
    ) -> vk::PipelineShaderStageCreateInfo<'_> {
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(self.module.raw_handle())
            .name(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unaligned_length() {
        let err = spirv_words(&[0x03, 0x02, 0x23]).unwrap_err();
        assert!(matches!(
            err,
            CreateShaderModuleError::InvalidLength(3)
        ));
    }

    #[test]
    fn decodes_little_endian_words() {
        // SPIR-V magic number, byte order as stored on disk.
        let bytes = [0x03, 0x02, 0x23, 0x07];
        let words = spirv_words(&bytes).unwrap();
        assert_eq!(&*words, &[0x0723_0203]);
    }

    #[test]
    fn empty_input_yields_no_words() {
        let words = spirv_words(&[]).unwrap();
        assert!(words.is_empty());
    }
}
