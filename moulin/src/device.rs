//! Interfaces to the external device bindings.
//!
//! Everything the driver needs from the Vulkan layer is expressed through the
//! object-safe traits in this module: command recording, timeline semaphores,
//! descriptor sets and queue submission. Barriers are plain-data records; the
//! binding translates them into `vkCmdPipelineBarrier2` calls (and observers,
//! such as the test backends, can reconstruct the emitted timeline from
//! them).

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use thiserror::Error;

use crate::alloc::{BufferHandle, ImageHandle, TextureHandle};

/// Subresource range covering a whole image.
pub fn all_levels_and_layers() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: vk::REMAINING_MIP_LEVELS,
        base_array_layer: 0,
        layer_count: vk::REMAINING_ARRAY_LAYERS,
    }
}

/// An image memory barrier with a layout transition.
#[derive(Clone, Debug)]
pub struct ImageBarrier {
    pub image: ImageHandle,
    pub src_stage_mask: vk::PipelineStageFlags2,
    pub src_access_mask: vk::AccessFlags2,
    pub dst_stage_mask: vk::PipelineStageFlags2,
    pub dst_access_mask: vk::AccessFlags2,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub subresource_range: vk::ImageSubresourceRange,
}

/// A buffer memory barrier.
#[derive(Clone, Debug)]
pub struct BufferBarrier {
    pub buffer: BufferHandle,
    pub src_stage_mask: vk::PipelineStageFlags2,
    pub src_access_mask: vk::AccessFlags2,
    pub dst_stage_mask: vk::PipelineStageFlags2,
    pub dst_access_mask: vk::AccessFlags2,
}

/// A command buffer being recorded.
///
/// The driver batches barriers per node and issues them through [`barrier`]
/// as one pipeline dependency. Node implementations downcast via
/// [`as_any_mut`] to reach the concrete backend buffer and record their own
/// work.
///
/// [`barrier`]: CommandBuffer::barrier
/// [`as_any_mut`]: CommandBuffer::as_any_mut
pub trait CommandBuffer {
    fn barrier(&mut self, image_barriers: &[ImageBarrier], buffer_barriers: &[BufferBarrier]);
    fn end(&mut self);
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// One command pool, reset and re-recorded once per ring slot reuse.
pub trait CommandPool: Send {
    fn reset(&mut self);
    fn begin(&mut self) -> Box<dyn CommandBuffer>;
}

/// A timeline semaphore. Binary semaphore backends may present themselves as
/// a timeline with values 0 and 1.
pub trait Semaphore: Send + Sync {
    /// Last signalled value.
    fn value(&self) -> u64;
    /// Signal from the host.
    fn signal(&self, value: u64);
    /// Block until `value` is reached. Returns false on timeout
    /// (`None` waits indefinitely).
    fn wait(&self, value: u64, timeout: Option<Duration>) -> bool;
}

pub type SemaphoreHandle = Arc<dyn Semaphore>;

/// A wait operation attached to a submission.
#[derive(Clone)]
pub struct SemaphoreWait {
    pub semaphore: SemaphoreHandle,
    /// Timeline value to wait for; 0 for binary semaphores.
    pub value: u64,
    /// Destination stages blocked by the wait.
    pub stage_mask: vk::PipelineStageFlags2,
}

/// A signal operation attached to a submission.
#[derive(Clone)]
pub struct SemaphoreSignal {
    pub semaphore: SemaphoreHandle,
    /// Timeline value to signal; 0 for binary semaphores.
    pub value: u64,
}

pub struct SubmitInfo<'a> {
    pub command_buffer: &'a mut dyn CommandBuffer,
    pub waits: &'a [SemaphoreWait],
    pub signals: &'a [SemaphoreSignal],
}

#[derive(Debug, Clone, Error)]
pub enum SubmitError {
    #[error("device lost")]
    DeviceLost,
    #[error("{0}")]
    Other(String),
}

/// The queue the graph's command buffers are submitted to.
///
/// The implementation must signal every semaphore in `signals` when execution
/// of the submission completes; the driver's ring pacing relies on it.
pub trait Queue: Send + Sync {
    fn submit(&self, submit: SubmitInfo<'_>) -> Result<(), SubmitError>;
}

/// A descriptor-set layout binding, as contributed by a connector.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DescriptorSetLayoutBinding {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub descriptor_count: u32,
    pub stage_flags: vk::ShaderStageFlags,
}

/// A descriptor set owned by one (node, ring slot) pair. The driver only
/// writes a set after the slot's prior iteration has completed, so a set is
/// never updated while the GPU may read from it.
pub trait DescriptorSet: Send {
    fn write_image(
        &mut self,
        binding: u32,
        array_element: u32,
        texture: &TextureHandle,
        layout: vk::ImageLayout,
    );
    fn write_buffer(&mut self, binding: u32, buffer: &BufferHandle);
}

/// Device-level services: object creation and host-side multi-waits.
pub trait Device: Send + Sync {
    fn create_command_pool(&self) -> Box<dyn CommandPool>;

    fn create_timeline_semaphore(&self, initial_value: u64) -> SemaphoreHandle;

    fn create_descriptor_set(&self, layout: &[DescriptorSetLayoutBinding])
        -> Box<dyn DescriptorSet>;

    /// Wait until any of the `(semaphore, value)` pairs is satisfied and
    /// return its index, or `None` on timeout.
    fn wait_semaphores_any(
        &self,
        waits: &[(SemaphoreHandle, u64)],
        timeout: Option<Duration>,
    ) -> Option<usize>;
}
