//! Input connector for texture arrays.

use ash::vk;

use crate::connectors::{ConnectorStatus, DescriptorInfo, OutputConnector};
use crate::device::{DescriptorSet, ImageBarrier};
use crate::resources::{GraphResource, TextureArrayResource};

/// Reads the texture table of a [`TextureArrayOut`](super::TextureArrayOut).
///
/// The binding is an array of combined image samplers sized by the producing
/// output; unbound slots are backed by the dummy texture. Pre-process emits
/// layout transitions for every currently bound texture.
#[derive(Debug)]
pub struct TextureArrayIn {
    pub(crate) name: String,
    pub(crate) access_mask: vk::AccessFlags2,
    pub(crate) stage_mask: vk::PipelineStageFlags2,
    pub(crate) required_layout: vk::ImageLayout,
    pub(crate) shader_stages: vk::ShaderStageFlags,
    pub(crate) optional: bool,
}

impl TextureArrayIn {
    pub fn new(
        name: impl Into<String>,
        access_mask: vk::AccessFlags2,
        stage_mask: vk::PipelineStageFlags2,
        required_layout: vk::ImageLayout,
        shader_stages: vk::ShaderStageFlags,
    ) -> Self {
        TextureArrayIn {
            name: name.into(),
            access_mask,
            stage_mask,
            required_layout,
            shader_stages,
            optional: false,
        }
    }

    pub fn compute_read(name: impl Into<String>) -> Self {
        TextureArrayIn::new(
            name,
            vk::AccessFlags2::SHADER_READ,
            vk::PipelineStageFlags2::COMPUTE_SHADER,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::ShaderStageFlags::COMPUTE,
        )
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub(crate) fn descriptor_info(&self, source: Option<&OutputConnector>) -> Option<DescriptorInfo> {
        if self.shader_stages.is_empty() {
            return None;
        }
        let OutputConnector::TextureArray(out) = source? else {
            return None;
        };
        Some(DescriptorInfo {
            descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: out.array_size,
            stage_flags: self.shader_stages,
        })
    }

    pub(crate) fn pre_process(
        &self,
        res: &mut TextureArrayResource,
        image_barriers: &mut Vec<ImageBarrier>,
    ) -> ConnectorStatus {
        res.acquire_read(image_barriers);
        ConnectorStatus::empty()
    }

    pub(crate) fn write_descriptor(
        &self,
        set: &mut dyn DescriptorSet,
        binding: u32,
        res: Option<&GraphResource>,
        since: Option<u64>,
    ) {
        let Some(res) = res else { return };
        let res = res
            .as_texture_array()
            .expect("expected a texture array resource");
        for slot in res.changed_slots(since.unwrap_or(0)) {
            let texture = res.get(slot).unwrap_or(&res.dummy);
            set.write_image(binding, slot as u32, texture, self.required_layout);
        }
    }
}
