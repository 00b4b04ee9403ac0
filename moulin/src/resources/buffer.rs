//! Buffer resource state machine. Same shape as the image one, minus
//! layouts.

use ash::vk;

use crate::alloc::BufferHandle;
use crate::device::BufferBarrier;

#[derive(Debug)]
pub struct BufferResource {
    pub buffer: BufferHandle,

    pub(crate) current_stage_mask: vk::PipelineStageFlags2,
    pub(crate) current_access_mask: vk::AccessFlags2,

    pub(crate) last_used_as_output: bool,
    pub(crate) needs_descriptor_update: bool,

    pub(crate) input_stage_mask: vk::PipelineStageFlags2,
    pub(crate) input_access_mask: vk::AccessFlags2,
}

impl BufferResource {
    pub(crate) fn new(
        buffer: BufferHandle,
        input_stage_mask: vk::PipelineStageFlags2,
        input_access_mask: vk::AccessFlags2,
    ) -> Self {
        BufferResource {
            buffer,
            current_stage_mask: vk::PipelineStageFlags2::TOP_OF_PIPE,
            current_access_mask: vk::AccessFlags2::empty(),
            last_used_as_output: true,
            needs_descriptor_update: true,
            input_stage_mask,
            input_access_mask,
        }
    }

    /// Barrier making the last write visible to all readers of this
    /// iteration. `None` when the buffer was already acquired for reading.
    pub(crate) fn acquire_read(&mut self) -> Option<BufferBarrier> {
        if self.last_used_as_output {
            let barrier = BufferBarrier {
                buffer: self.buffer.clone(),
                src_stage_mask: self.current_stage_mask,
                src_access_mask: self.current_access_mask,
                dst_stage_mask: self.input_stage_mask,
                dst_access_mask: self.input_access_mask,
            };
            self.current_stage_mask = self.input_stage_mask;
            self.current_access_mask = self.input_access_mask;
            self.last_used_as_output = false;
            Some(barrier)
        } else {
            None
        }
    }

    pub(crate) fn acquire_write(
        &mut self,
        dst_stage_mask: vk::PipelineStageFlags2,
        dst_access_mask: vk::AccessFlags2,
    ) -> BufferBarrier {
        let barrier = BufferBarrier {
            buffer: self.buffer.clone(),
            src_stage_mask: self.current_stage_mask,
            src_access_mask: self.current_access_mask,
            dst_stage_mask,
            dst_access_mask,
        };
        self.current_stage_mask = dst_stage_mask;
        self.current_access_mask = dst_access_mask;
        barrier
    }
}
