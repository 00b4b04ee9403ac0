//! Output connector for graph-managed images.

use std::collections::BTreeMap;

use ash::vk;

use crate::alloc::{ImageCreateInfo, ResourceAllocator};
use crate::connectors::{ConnectorStatus, DescriptorInfo, InputConnector};
use crate::device::{DescriptorSet, ImageBarrier};
use crate::error::GraphError;
use crate::resources::{GraphResource, ImageResource, ResourceKind};

/// Produces an image that is allocated and managed by the graph.
///
/// The create info declared here is completed with the usage flags of every
/// consumer before allocation. Transient outputs go to the aliasing
/// allocator and are transitioned from `UNDEFINED` at the start of each
/// iteration; persistent outputs go to the exclusive allocator and keep
/// their contents.
#[derive(Debug)]
pub struct ImageOut {
    pub(crate) name: String,
    pub(crate) access_mask: vk::AccessFlags2,
    pub(crate) stage_mask: vk::PipelineStageFlags2,
    pub(crate) required_layout: vk::ImageLayout,
    pub(crate) shader_stages: vk::ShaderStageFlags,
    pub(crate) create_info: ImageCreateInfo,
    pub(crate) persistent: bool,
}

impl ImageOut {
    pub fn new(
        name: impl Into<String>,
        access_mask: vk::AccessFlags2,
        stage_mask: vk::PipelineStageFlags2,
        required_layout: vk::ImageLayout,
        shader_stages: vk::ShaderStageFlags,
        create_info: ImageCreateInfo,
    ) -> Self {
        ImageOut {
            name: name.into(),
            access_mask,
            stage_mask,
            required_layout,
            shader_stages,
            create_info,
            persistent: false,
        }
    }

    /// Storage image written by a compute shader.
    pub fn compute_write(
        name: impl Into<String>,
        format: vk::Format,
        width: u32,
        height: u32,
    ) -> Self {
        ImageOut::new(
            name,
            vk::AccessFlags2::SHADER_WRITE,
            vk::PipelineStageFlags2::COMPUTE_SHADER,
            vk::ImageLayout::GENERAL,
            vk::ShaderStageFlags::COMPUTE,
            ImageCreateInfo::color_2d(
                format,
                vk::Extent3D {
                    width,
                    height,
                    depth: 1,
                },
                vk::ImageUsageFlags::STORAGE,
            ),
        )
    }

    /// Storage image read and written by a compute shader.
    pub fn compute_read_write(
        name: impl Into<String>,
        format: vk::Format,
        width: u32,
        height: u32,
    ) -> Self {
        ImageOut::new(
            name,
            vk::AccessFlags2::SHADER_WRITE | vk::AccessFlags2::SHADER_READ,
            vk::PipelineStageFlags2::COMPUTE_SHADER,
            vk::ImageLayout::GENERAL,
            vk::ShaderStageFlags::COMPUTE,
            ImageCreateInfo::color_2d(
                format,
                vk::Extent3D {
                    width,
                    height,
                    depth: 1,
                },
                vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::SAMPLED,
            ),
        )
    }

    /// Transfer destination. No descriptor.
    pub fn transfer_write(
        name: impl Into<String>,
        format: vk::Format,
        width: u32,
        height: u32,
    ) -> Self {
        ImageOut::new(
            name,
            vk::AccessFlags2::TRANSFER_WRITE,
            vk::PipelineStageFlags2::ALL_TRANSFER,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ShaderStageFlags::empty(),
            ImageCreateInfo::color_2d(
                format,
                vk::Extent3D {
                    width,
                    height,
                    depth: 1,
                },
                vk::ImageUsageFlags::TRANSFER_DST,
            ),
        )
    }

    /// Keeps contents across iterations (and out of the aliasing allocator).
    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }

    pub(crate) fn descriptor_info(&self) -> Option<DescriptorInfo> {
        if self.shader_stages.is_empty() {
            return None;
        }
        Some(DescriptorInfo {
            descriptor_type: vk::DescriptorType::STORAGE_IMAGE,
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

        // All consumers reading the same copy (same delay) must agree on a
        // single layout, across nodes.
        let mut layout_per_delay: BTreeMap<u32, (vk::ImageLayout, String)> = BTreeMap::new();

        for &(consumer_node, input) in consumers {
            let InputConnector::Image(image_in) = input else {
                return Err(GraphError::Connector(format!(
                    "output '{}' is consumed by non-image input '{}'",
                    self.name,
                    input.name()
                )));
            };
            create_info.usage |= image_in.usage;
            input_stage_mask |= image_in.stage_mask;
            input_access_mask |= image_in.access_mask;

            let sink = format!("{}.{}", consumer_node, image_in.name);
            match layout_per_delay.get(&image_in.delay) {
                Some((layout, first_sink)) if *layout != image_in.required_layout => {
                    return Err(GraphError::Connector(format!(
                        "output '{}': sinks '{}' and '{}' request different image layouts \
                         ({:?} vs {:?}) for the same resource copy (delay {})",
                        self.name, first_sink, sink, layout, image_in.required_layout, image_in.delay
                    )));
                }
                Some(_) => {}
                None => {
                    layout_per_delay.insert(image_in.delay, (image_in.required_layout, sink));
                }
            }
        }

        let alloc = if self.persistent {
            allocator
        } else {
            aliasing_allocator
        };
        let name = format!("{} (copy {})", self.name, copy_index);
        let image = alloc.create_image(&create_info, &name)?;

        let texture = if create_info
            .usage
            .intersects(vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::STORAGE)
        {
            Some(alloc.create_texture(&image)?)
        } else {
            None
        };

        Ok(ResourceKind::Image(ImageResource::new(
            image,
            texture,
            input_stage_mask,
            input_access_mask,
        )))
    }

    pub(crate) fn pre_process(
        &self,
        res: &mut ImageResource,
        image_barriers: &mut Vec<ImageBarrier>,
    ) -> ConnectorStatus {
        let mut flags = ConnectorStatus::empty();
        if res.needs_descriptor_update {
            flags |= ConnectorStatus::NEEDS_DESCRIPTOR_UPDATE;
            res.needs_descriptor_update = false;
        }

        let barrier = res.acquire_write(
            self.required_layout,
            self.stage_mask,
            self.access_mask,
            !self.persistent,
        );
        image_barriers.push(barrier);
        flags
    }

    pub(crate) fn write_descriptor(
        &self,
        set: &mut dyn DescriptorSet,
        binding: u32,
        res: &GraphResource,
    ) {
        let res = res.as_image().expect("expected an image resource");
        let texture = res
            .texture
            .as_ref()
            .expect("image is not usable as storage, missing usage flags?");
        // Storage images are accessed in the GENERAL layout.
        set.write_image(binding, 0, texture, vk::ImageLayout::GENERAL);
    }
}
