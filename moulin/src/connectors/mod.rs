//! Input and output connectors.
//!
//! Connectors declare what a node consumes and produces, contribute
//! allocation constraints to the producing output, emit the barriers that
//! move a resource between the states its users require, and write
//! descriptor bindings. Each kind is a variant of the [`InputConnector`] /
//! [`OutputConnector`] sum types; capabilities a variant does not have (a
//! host pointer contributes no barriers, a texture array no allocation)
//! simply do nothing.

mod buffer_in;
mod buffer_out;
mod host_in;
mod host_out;
mod image_in;
mod image_out;
mod texture_array_in;
mod texture_array_out;

pub use buffer_in::BufferIn;
pub use buffer_out::BufferOut;
pub use host_in::HostIn;
pub use host_out::HostOut;
pub use image_in::ImageIn;
pub use image_out::ImageOut;
pub use texture_array_in::TextureArrayIn;
pub use texture_array_out::TextureArrayOut;

use ash::vk;
use bitflags::bitflags;

use crate::alloc::ResourceAllocator;
use crate::device::{BufferBarrier, DescriptorSet, ImageBarrier};
use crate::error::GraphError;
use crate::resources::{GraphResource, ResourceKind};

bitflags! {
    /// Status bits returned from connector hooks.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ConnectorStatus: u32 {
        /// The descriptor binding for this connector must be rewritten
        /// before the node runs in the current iteration.
        const NEEDS_DESCRIPTOR_UPDATE = 1 << 0;
    }
}

/// A descriptor-set layout binding requested by a connector.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DescriptorInfo {
    pub descriptor_type: vk::DescriptorType,
    pub descriptor_count: u32,
    pub stage_flags: vk::ShaderStageFlags,
}

/// A declared input port on a node.
#[derive(Debug)]
pub enum InputConnector {
    Image(ImageIn),
    Buffer(BufferIn),
    Host(HostIn),
    TextureArray(TextureArrayIn),
}

/// A declared output port on a node.
#[derive(Debug)]
pub enum OutputConnector {
    Image(ImageOut),
    Buffer(BufferOut),
    Host(HostOut),
    TextureArray(TextureArrayOut),
}

impl InputConnector {
    pub fn name(&self) -> &str {
        match self {
            InputConnector::Image(c) => &c.name,
            InputConnector::Buffer(c) => &c.name,
            InputConnector::Host(c) => &c.name,
            InputConnector::TextureArray(c) => &c.name,
        }
    }

    /// Number of iterations the read lags behind the producer's write.
    pub fn delay(&self) -> u32 {
        match self {
            InputConnector::Image(c) => c.delay,
            InputConnector::Buffer(c) => c.delay,
            InputConnector::Host(c) => c.delay,
            // Texture arrays always read the current table.
            InputConnector::TextureArray(_) => 0,
        }
    }

    pub fn is_optional(&self) -> bool {
        match self {
            InputConnector::Image(c) => c.optional,
            InputConnector::Buffer(c) => c.optional,
            InputConnector::Host(c) => c.optional,
            InputConnector::TextureArray(c) => c.optional,
        }
    }

    /// Descriptor layout binding, if the connector exposes its resource to
    /// shaders. `source` is the resolved producer output; array inputs need
    /// it to size their binding.
    pub fn descriptor_info(&self, source: Option<&OutputConnector>) -> Option<DescriptorInfo> {
        match self {
            InputConnector::Image(c) => c.descriptor_info(),
            InputConnector::Buffer(c) => c.descriptor_info(),
            InputConnector::Host(_) => None,
            InputConnector::TextureArray(c) => c.descriptor_info(source),
        }
    }

    /// Checks that this input can receive from `output` (V2).
    pub(crate) fn accepts(&self, output: &OutputConnector) -> Result<(), String> {
        match (self, output) {
            (InputConnector::Image(_), OutputConnector::Image(_)) => Ok(()),
            (InputConnector::Buffer(_), OutputConnector::Buffer(_)) => Ok(()),
            (InputConnector::Host(i), OutputConnector::Host(o)) => {
                if i.type_id == o.type_id {
                    Ok(())
                } else {
                    Err(format!(
                        "host input '{}' carries {} but output '{}' carries {}",
                        i.name, i.type_name, o.name, o.type_name
                    ))
                }
            }
            (InputConnector::TextureArray(_), OutputConnector::TextureArray(_)) => Ok(()),
            (i, o) => Err(format!(
                "input '{}' cannot receive from output '{}'",
                i.name(),
                o.name()
            )),
        }
    }

    pub(crate) fn on_pre_process(
        &self,
        res: &mut GraphResource,
        image_barriers: &mut Vec<ImageBarrier>,
        buffer_barriers: &mut Vec<BufferBarrier>,
    ) -> Result<ConnectorStatus, GraphError> {
        match self {
            InputConnector::Image(c) => Ok(c.pre_process(expect_image_mut(res), image_barriers)),
            InputConnector::Buffer(c) => Ok(c.pre_process(expect_buffer_mut(res), buffer_barriers)),
            InputConnector::Host(_) => Ok(ConnectorStatus::empty()),
            InputConnector::TextureArray(c) => {
                Ok(c.pre_process(expect_texture_array_mut(res), image_barriers))
            }
        }
    }

    pub(crate) fn on_post_process(
        &self,
        res: &mut GraphResource,
    ) -> Result<ConnectorStatus, GraphError> {
        match self {
            InputConnector::Host(c) => {
                c.post_process(expect_host_mut(res));
                Ok(ConnectorStatus::empty())
            }
            _ => Ok(ConnectorStatus::empty()),
        }
    }

    /// Writes the resource binding into `set`. `res` is `None` for an
    /// unconnected optional input; `since` is the generation already written
    /// to this set, enabling partial array updates.
    pub(crate) fn write_descriptor(
        &self,
        set: &mut dyn DescriptorSet,
        binding: u32,
        res: Option<&GraphResource>,
        allocator: &dyn ResourceAllocator,
        since: Option<u64>,
    ) {
        match self {
            InputConnector::Image(c) => c.write_descriptor(set, binding, res, allocator),
            InputConnector::Buffer(c) => c.write_descriptor(set, binding, res),
            InputConnector::Host(_) => {}
            InputConnector::TextureArray(c) => c.write_descriptor(set, binding, res, since),
        }
    }
}

impl OutputConnector {
    pub fn name(&self) -> &str {
        match self {
            OutputConnector::Image(c) => &c.name,
            OutputConnector::Buffer(c) => &c.name,
            OutputConnector::Host(c) => &c.name,
            OutputConnector::TextureArray(c) => &c.name,
        }
    }

    /// Whether contents survive across iterations. Persistent outputs are
    /// allocated from the exclusive allocator and never aliased.
    pub fn is_persistent(&self) -> bool {
        match self {
            OutputConnector::Image(c) => c.persistent,
            OutputConnector::Buffer(c) => c.persistent,
            OutputConnector::Host(c) => c.persistent,
            // The slot table itself always survives iterations.
            OutputConnector::TextureArray(_) => true,
        }
    }

    pub fn descriptor_info(&self) -> Option<DescriptorInfo> {
        match self {
            OutputConnector::Image(c) => c.descriptor_info(),
            OutputConnector::Buffer(c) => c.descriptor_info(),
            OutputConnector::Host(_) => None,
            OutputConnector::TextureArray(_) => None,
        }
    }

    /// Creates one resource copy, aggregating the consumers' constraints.
    pub(crate) fn create_resource(
        &self,
        consumers: &[(&str, &InputConnector)],
        allocator: &dyn ResourceAllocator,
        aliasing_allocator: &dyn ResourceAllocator,
        copy_index: u32,
        ring_size: u32,
    ) -> Result<ResourceKind, GraphError> {
        match self {
            OutputConnector::Image(c) => {
                c.create_resource(consumers, allocator, aliasing_allocator, copy_index)
            }
            OutputConnector::Buffer(c) => {
                c.create_resource(consumers, allocator, aliasing_allocator, copy_index)
            }
            OutputConnector::Host(c) => c.create_resource(consumers),
            OutputConnector::TextureArray(c) => c.create_resource(consumers, allocator, ring_size),
        }
    }

    pub(crate) fn on_pre_process(
        &self,
        res: &mut GraphResource,
        image_barriers: &mut Vec<ImageBarrier>,
        buffer_barriers: &mut Vec<BufferBarrier>,
    ) -> Result<ConnectorStatus, GraphError> {
        match self {
            OutputConnector::Image(c) => Ok(c.pre_process(expect_image_mut(res), image_barriers)),
            OutputConnector::Buffer(c) => {
                Ok(c.pre_process(expect_buffer_mut(res), buffer_barriers))
            }
            OutputConnector::Host(_) => Ok(ConnectorStatus::empty()),
            OutputConnector::TextureArray(_) => Ok(ConnectorStatus::empty()),
        }
    }

    pub(crate) fn on_post_process(
        &self,
        res: &mut GraphResource,
        node: &str,
        in_flight_index: usize,
    ) -> Result<ConnectorStatus, GraphError> {
        match self {
            OutputConnector::Image(_) => {
                expect_image_mut(res).last_used_as_output = true;
                Ok(ConnectorStatus::empty())
            }
            OutputConnector::Buffer(_) => {
                expect_buffer_mut(res).last_used_as_output = true;
                Ok(ConnectorStatus::empty())
            }
            OutputConnector::Host(c) => c.post_process(expect_host_mut(res), node),
            OutputConnector::TextureArray(_) => {
                expect_texture_array_mut(res).retain_for_slot(in_flight_index);
                Ok(ConnectorStatus::empty())
            }
        }
    }

    pub(crate) fn write_descriptor(
        &self,
        set: &mut dyn DescriptorSet,
        binding: u32,
        res: &GraphResource,
    ) {
        match self {
            OutputConnector::Image(c) => c.write_descriptor(set, binding, res),
            OutputConnector::Buffer(c) => c.write_descriptor(set, binding, res),
            OutputConnector::Host(_) | OutputConnector::TextureArray(_) => {}
        }
    }
}

fn expect_image_mut(res: &mut GraphResource) -> &mut crate::resources::ImageResource {
    res.as_image_mut().expect("expected an image resource")
}

fn expect_buffer_mut(res: &mut GraphResource) -> &mut crate::resources::BufferResource {
    res.as_buffer_mut().expect("expected a buffer resource")
}

fn expect_host_mut(res: &mut GraphResource) -> &mut crate::resources::HostResource {
    res.as_host_mut().expect("expected a host resource")
}

fn expect_texture_array_mut(res: &mut GraphResource) -> &mut crate::resources::TextureArrayResource {
    res.as_texture_array_mut()
        .expect("expected a texture array resource")
}
