//! Output connector for graph-managed buffers.

use ash::vk;

use crate::alloc::{BufferCreateInfo, ResourceAllocator};
use crate::connectors::{ConnectorStatus, DescriptorInfo, InputConnector};
use crate::device::{BufferBarrier, DescriptorSet};
use crate::error::GraphError;
use crate::resources::{BufferResource, GraphResource, ResourceKind};

#[derive(Debug)]
pub struct BufferOut {
    pub(crate) name: String,
    pub(crate) access_mask: vk::AccessFlags2,
    pub(crate) stage_mask: vk::PipelineStageFlags2,
    pub(crate) shader_stages: vk::ShaderStageFlags,
    pub(crate) create_info: BufferCreateInfo,
    pub(crate) persistent: bool,
}

impl BufferOut {
    pub fn new(
        name: impl Into<String>,
        access_mask: vk::AccessFlags2,
        stage_mask: vk::PipelineStageFlags2,
        shader_stages: vk::ShaderStageFlags,
        create_info: BufferCreateInfo,
    ) -> Self {
        BufferOut {
            name: name.into(),
            access_mask,
            stage_mask,
            shader_stages,
            create_info,
            persistent: false,
        }
    }

    /// Storage buffer written by a compute shader.
    pub fn compute_write(name: impl Into<String>, byte_size: u64) -> Self {
        BufferOut::new(
            name,
            vk::AccessFlags2::SHADER_WRITE,
            vk::PipelineStageFlags2::COMPUTE_SHADER,
            vk::ShaderStageFlags::COMPUTE,
            BufferCreateInfo {
                byte_size,
                usage: vk::BufferUsageFlags::STORAGE_BUFFER,
            },
        )
    }

    pub fn transfer_write(name: impl Into<String>, byte_size: u64) -> Self {
        BufferOut::new(
            name,
            vk::AccessFlags2::TRANSFER_WRITE,
            vk::PipelineStageFlags2::ALL_TRANSFER,
            vk::ShaderStageFlags::empty(),
            BufferCreateInfo {
                byte_size,
                usage: vk::BufferUsageFlags::TRANSFER_DST,
            },
        )
    }

    pub fn persistent(mut self) -> Self {
        self.persistent = true;
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

    pub(crate) fn create_resource(
        &self,
        consumers: &[(&str, &InputConnector)],
        allocator: &dyn ResourceAllocator,
        aliasing_allocator: &dyn ResourceAllocator,
        copy_index: u32,
    ) -> Result<ResourceKind, GraphError> {
        let mut create_info = self.create_info;
        let mut input_stage_mask = vk::PipelineStageFlags2::empty();
        let mut input_access_mask = vk::AccessFlags2::empty();

        for &(_, input) in consumers {
            let InputConnector::Buffer(buffer_in) = input else {
                return Err(GraphError::Connector(format!(
                    "output '{}' is consumed by non-buffer input '{}'",
                    self.name,
                    input.name()
                )));
            };
            create_info.usage |= buffer_in.usage;
            input_stage_mask |= buffer_in.stage_mask;
            input_access_mask |= buffer_in.access_mask;
        }

        let alloc = if self.persistent {
            allocator
        } else {
            aliasing_allocator
        };
        let name = format!("{} (copy {})", self.name, copy_index);
        let buffer = alloc.create_buffer(&create_info, &name)?;

        Ok(ResourceKind::Buffer(BufferResource::new(
            buffer,
            input_stage_mask,
            input_access_mask,
        )))
    }

    pub(crate) fn pre_process(
        &self,
        res: &mut BufferResource,
        buffer_barriers: &mut Vec<BufferBarrier>,
    ) -> ConnectorStatus {
        let mut flags = ConnectorStatus::empty();
        if res.needs_descriptor_update {
            flags |= ConnectorStatus::NEEDS_DESCRIPTOR_UPDATE;
            res.needs_descriptor_update = false;
        }

        let barrier = res.acquire_write(self.stage_mask, self.access_mask);
        buffer_barriers.push(barrier);
        flags
    }

    pub(crate) fn write_descriptor(
        &self,
        set: &mut dyn DescriptorSet,
        binding: u32,
        res: &GraphResource,
    ) {
        let res = res.as_buffer().expect("expected a buffer resource");
        set.write_buffer(binding, &res.buffer);
    }
}
