//! Input connector for graph-managed images.

use ash::vk;

use crate::alloc::ResourceAllocator;
use crate::connectors::{ConnectorStatus, DescriptorInfo};
use crate::device::{DescriptorSet, ImageBarrier};
use crate::resources::{GraphResource, ImageResource};

/// Reads an image that is allocated and managed by the graph.
///
/// Supplies a combined-image-sampler descriptor when `shader_stages` is
/// non-empty.
#[derive(Debug)]
pub struct ImageIn {
    pub(crate) name: String,
    pub(crate) access_mask: vk::AccessFlags2,
    pub(crate) stage_mask: vk::PipelineStageFlags2,
    pub(crate) required_layout: vk::ImageLayout,
    /// ORed into the producer's create info.
    pub(crate) usage: vk::ImageUsageFlags,
    pub(crate) shader_stages: vk::ShaderStageFlags,
    pub(crate) delay: u32,
    pub(crate) optional: bool,
}

impl ImageIn {
    pub fn new(
        name: impl Into<String>,
        access_mask: vk::AccessFlags2,
        stage_mask: vk::PipelineStageFlags2,
        required_layout: vk::ImageLayout,
        usage: vk::ImageUsageFlags,
        shader_stages: vk::ShaderStageFlags,
    ) -> Self {
        ImageIn {
            name: name.into(),
            access_mask,
            stage_mask,
            required_layout,
            usage,
            shader_stages,
            delay: 0,
            optional: false,
        }
    }

    /// Sampled read from a compute shader.
    pub fn compute_read(name: impl Into<String>) -> Self {
        ImageIn::new(
            name,
            vk::AccessFlags2::SHADER_READ,
            vk::PipelineStageFlags2::COMPUTE_SHADER,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::ImageUsageFlags::SAMPLED,
            vk::ShaderStageFlags::COMPUTE,
        )
    }

    /// Sampled read from a fragment shader.
    pub fn fragment_read(name: impl Into<String>) -> Self {
        ImageIn::new(
            name,
            vk::AccessFlags2::SHADER_READ,
            vk::PipelineStageFlags2::FRAGMENT_SHADER,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::ImageUsageFlags::SAMPLED,
            vk::ShaderStageFlags::FRAGMENT,
        )
    }

    /// Source of a transfer. No descriptor.
    pub fn transfer_src(name: impl Into<String>) -> Self {
        ImageIn::new(
            name,
            vk::AccessFlags2::TRANSFER_READ,
            vk::PipelineStageFlags2::ALL_TRANSFER,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::ImageUsageFlags::TRANSFER_SRC,
            vk::ShaderStageFlags::empty(),
        )
    }

    /// Reads the producer's output of `delay` iterations ago.
    pub fn with_delay(mut self, delay: u32) -> Self {
        self.delay = delay;
        self
    }

    /// Marks the input as satisfiable without a connection.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub(crate) fn descriptor_info(&self) -> Option<DescriptorInfo> {
        if self.shader_stages.is_empty() {
            return None;
        }
        Some(DescriptorInfo {
            descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: 1,
            stage_flags: self.shader_stages,
        })
    }

    pub(crate) fn pre_process(
        &self,
        res: &mut ImageResource,
        image_barriers: &mut Vec<ImageBarrier>,
    ) -> ConnectorStatus {
        if let Some(barrier) = res.acquire_read(self.required_layout) {
            image_barriers.push(barrier);
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
        allocator: &dyn ResourceAllocator,
    ) {
        match res {
            Some(res) => {
                let res = res.as_image().expect("expected an image resource");
                let texture = res
                    .texture
                    .as_ref()
                    .expect("image is not sampleable, missing usage flags?");
                set.write_image(binding, 0, texture, self.required_layout);
            }
            None => {
                // Unconnected optional input: keep the set valid.
                set.write_image(
                    binding,
                    0,
                    &allocator.dummy_texture(),
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                );
            }
        }
    }
}
