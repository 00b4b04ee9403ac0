//! Output connector for texture arrays.

use ash::vk;

use crate::alloc::ResourceAllocator;
use crate::connectors::InputConnector;
use crate::error::GraphError;
use crate::resources::{ResourceKind, TextureArrayResource};

/// Owns a mutable table of `array_size` texture slots.
///
/// The producing node binds and unbinds textures through the resource during
/// its process call; readers see the table through an array descriptor. The
/// table itself survives iterations, so this output is never aliased.
#[derive(Debug)]
pub struct TextureArrayOut {
    pub(crate) name: String,
    pub(crate) array_size: u32,
}

impl TextureArrayOut {
    pub fn new(name: impl Into<String>, array_size: u32) -> Self {
        TextureArrayOut {
            name: name.into(),
            array_size,
        }
    }

    pub fn array_size(&self) -> u32 {
        self.array_size
    }

    pub(crate) fn create_resource(
        &self,
        consumers: &[(&str, &InputConnector)],
        allocator: &dyn ResourceAllocator,
        ring_size: u32,
    ) -> Result<ResourceKind, GraphError> {
        let mut input_stage_mask = vk::PipelineStageFlags2::empty();
        let mut input_access_mask = vk::AccessFlags2::empty();
        let mut first_input_layout = vk::ImageLayout::UNDEFINED;

        for &(_, input) in consumers {
            let InputConnector::TextureArray(array_in) = input else {
                return Err(GraphError::Connector(format!(
                    "output '{}' is consumed by non-array input '{}'",
                    self.name,
                    input.name()
                )));
            };
            input_stage_mask |= array_in.stage_mask;
            input_access_mask |= array_in.access_mask;
            if first_input_layout == vk::ImageLayout::UNDEFINED {
                first_input_layout = array_in.required_layout;
            }
        }

        Ok(ResourceKind::TextureArray(TextureArrayResource::new(
            self.array_size,
            ring_size,
            allocator.dummy_texture(),
            input_stage_mask,
            input_access_mask,
            first_input_layout,
        )))
    }
}
