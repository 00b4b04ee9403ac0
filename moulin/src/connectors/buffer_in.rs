//! Input connector for graph-managed buffers.

use ash::vk;

use crate::connectors::{ConnectorStatus, DescriptorInfo};
use crate::device::{BufferBarrier, DescriptorSet};
use crate::resources::{BufferResource, GraphResource};

#[derive(Debug)]
pub struct BufferIn {
    pub(crate) name: String,
    pub(crate) access_mask: vk::AccessFlags2,
    pub(crate) stage_mask: vk::PipelineStageFlags2,
    /// ORed into the producer's create info.
    pub(crate) usage: vk::BufferUsageFlags,
    pub(crate) shader_stages: vk::ShaderStageFlags,
    pub(crate) delay: u32,
    pub(crate) optional: bool,
}

impl BufferIn {
    pub fn new(
        name: impl Into<String>,
        access_mask: vk::AccessFlags2,
        stage_mask: vk::PipelineStageFlags2,
        usage: vk::BufferUsageFlags,
        shader_stages: vk::ShaderStageFlags,
    ) -> Self {
        BufferIn {
            name: name.into(),
            access_mask,
            stage_mask,
            usage,
            shader_stages,
            delay: 0,
            optional: false,
        }
    }

    pub fn compute_read(name: impl Into<String>) -> Self {
        BufferIn::new(
            name,
            vk::AccessFlags2::SHADER_READ,
            vk::PipelineStageFlags2::COMPUTE_SHADER,
            vk::BufferUsageFlags::STORAGE_BUFFER,
            vk::ShaderStageFlags::COMPUTE,
        )
    }

    pub fn transfer_src(name: impl Into<String>) -> Self {
        BufferIn::new(
            name,
            vk::AccessFlags2::TRANSFER_READ,
            vk::PipelineStageFlags2::ALL_TRANSFER,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::ShaderStageFlags::empty(),
        )
    }

    pub fn with_delay(mut self, delay: u32) -> Self {
        self.delay = delay;
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub(crate) fn descriptor_info(&self) -> Option<DescriptorInfo> {
        if self.shader_stages.is_empty() {
            return None;
        }
        Some(DescriptorInfo {
            descriptor_type: vk::DescriptorType::STORAGE_BUFFER,
            descriptor_count: 1,
            stage_flags: self.shader_stages,
        })
    }

    pub(crate) fn pre_process(
        &self,
        res: &mut BufferResource,
        buffer_barriers: &mut Vec<BufferBarrier>,
    ) -> ConnectorStatus {
        if let Some(barrier) = res.acquire_read() {
            buffer_barriers.push(barrier);
        }

        let mut flags = ConnectorStatus::empty();
        if res.needs_descriptor_update {
            flags |= ConnectorStatus::NEEDS_DESCRIPTOR_UPDATE;
            res.needs_descriptor_update = false;
        }
        flags
    }

    pub(crate) fn write_descriptor(
        &self,
        set: &mut dyn DescriptorSet,
        binding: u32,
        res: Option<&GraphResource>,
    ) {
        // Buffer inputs have no dummy fallback; optional unconnected buffers
        // simply leave the binding untouched.
        if let Some(res) = res {
            let res = res.as_buffer().expect("expected a buffer resource");
            set.write_buffer(binding, &res.buffer);
        }
    }
}
