//! One-shot dispatch submission against a [`ComputePipeline`].
//!
//! [`dispatch`] records a single compute dispatch into the pipeline's
//! command buffer, submits it alone to the compute queue, and blocks
//! until the queue is idle. The wait is the crate's only
//! synchronization primitive: when `dispatch` returns `Ok`, the
//! host-visible buffers bound to the pipeline already reflect the
//! kernel's writes. There is no timeout on the wait; a hung driver
//! blocks the calling thread indefinitely.

use std::sync::Arc;

use ash::vk;
use thiserror::Error;

use crate::pipeline::ComputePipeline;

/// Invocations per work group along X, matching the
/// `local_size_x = 256` declared by the kernels this crate dispatches.
pub const WORKGROUP_SIZE: u32 = 256;

/// Number of work groups needed to cover `element_count` elements in a
/// 1-D decomposition.
///
/// Ceiling division: zero elements dispatch zero groups, a full group
/// dispatches one, one element past a full group dispatches one more.
pub fn group_count(element_count: u32) -> u32 {
    element_count.div_ceil(WORKGROUP_SIZE)
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Vulkan error resetting command buffer: {0}")]
    Reset(vk::Result),

    #[error("Vulkan error beginning command buffer: {0}")]
    Begin(vk::Result),

    #[error("Vulkan error ending command buffer: {0}")]
    End(vk::Result),

    #[error("Vulkan error submitting compute work: {0}")]
    Submit(vk::Result),

    #[error("Vulkan error waiting for the compute queue: {0}")]
    QueueWait(vk::Result),
}

/// Record, submit, and await one dispatch covering `element_count`
/// elements.
///
/// The command buffer is reset and re-recorded for a one-time
/// submission each call, so the same pipeline can be dispatched any
/// number of times. The work-group count is
/// `ceil(element_count / 256)` along X with Y = Z = 1.
///
/// On failure the pipeline and its buffers remain valid; the caller may
/// rewrite inputs and attempt another dispatch.
pub fn dispatch(
    pipeline: &mut ComputePipeline,
    element_count: u32,
) -> Result<(), DispatchError> {
    let device = Arc::clone(pipeline.parent());
    let raw_pipeline = pipeline.raw_pipeline();
    let raw_layout = pipeline.raw_pipeline_layout();
    let raw_set = pipeline.raw_descriptor_set();
    let groups = group_count(element_count);

    let _span = tracing::debug_span!(
        "compute_dispatch",
        element_count,
        group_count = groups
    )
    .entered();

    let command_buffer = pipeline.command_buffer_mut();

    // SAFETY: the queue-idle wait at the end of every previous dispatch
    // guarantees this buffer is no longer pending execution.
    unsafe { command_buffer.reset() }.map_err(DispatchError::Reset)?;
    // SAFETY: the buffer was just reset to the initial state.
    unsafe { command_buffer.begin_one_time_submit() }
        .map_err(DispatchError::Begin)?;
    // SAFETY: the buffer is recording; raw_pipeline is a valid compute
    // pipeline created from the same device.
    unsafe { command_buffer.bind_compute_pipeline(raw_pipeline) };
    // SAFETY: the buffer is recording; layout and set come from the same
    // pipeline bundle, so they are compatible by construction. The bound
    // buffers are alive per ComputePipeline::new's contract.
    unsafe { command_buffer.bind_compute_descriptor_set(raw_layout, raw_set) };
    // SAFETY: the buffer is recording with the pipeline and its
    // descriptor set bound.
    unsafe { command_buffer.dispatch(groups, 1, 1) };
    // SAFETY: the buffer is in the recording state.
    unsafe { command_buffer.end() }.map_err(DispatchError::End)?;

    let raw_command_buffer = command_buffer.raw_command_buffer();
    let submit_info = vk::SubmitInfo::default()
        .command_buffers(std::slice::from_ref(&raw_command_buffer));

    // SAFETY: the command buffer was just ended and is in the executable
    // state; no fence is passed. All handles derive from `device`.
    unsafe {
        device.compute_queue_submit(
            std::slice::from_ref(&submit_info),
            vk::Fence::null(),
        )
    }
    .map_err(DispatchError::Submit)?;

    // The only synchronization point: once the queue drains, the kernel's
    // writes are visible through the mapped buffers.
    device
        .compute_queue_wait_idle()
        .map_err(DispatchError::QueueWait)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_count_ceiling_boundaries() {
        assert_eq!(group_count(0), 0);
        assert_eq!(group_count(1), 1);
        assert_eq!(group_count(255), 1);
        assert_eq!(group_count(256), 1);
        assert_eq!(group_count(257), 2);
        assert_eq!(group_count(1024), 4);
    }

    #[test]
    fn group_count_does_not_overflow() {
        assert_eq!(group_count(u32::MAX), u32::MAX / WORKGROUP_SIZE + 1);
    }
}
