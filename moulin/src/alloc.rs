//! Resource allocation interfaces.
//!
//! The driver never talks to a live Vulkan allocator. It is handed two
//! implementations of [`ResourceAllocator`]: a *persistent* allocator whose
//! allocations are exclusive, and an *aliasing* allocator that may place
//! allocations at overlapping memory offsets provided their live ranges do
//! not overlap in time. The driver communicates liveness implicitly by
//! creating allocation records in graph order; honoring the overlap contract
//! is the aliasing allocator's responsibility.

use std::sync::Arc;

use ash::vk;

use crate::error::AllocationError;

/// Parameters of a newly created image resource.
#[derive(Copy, Clone, Debug)]
pub struct ImageCreateInfo {
    /// Image type.
    pub image_type: vk::ImageType,
    /// Format of the image.
    pub format: vk::Format,
    /// Size of the image.
    pub extent: vk::Extent3D,
    /// Number of mipmap levels.
    pub mip_levels: u32,
    /// Number of array layers.
    pub array_layers: u32,
    /// Number of samples.
    pub samples: vk::SampleCountFlags,
    /// Tiling.
    pub tiling: vk::ImageTiling,
    /// Usage flags. Consumers of the image OR their required usage into this
    /// before allocation.
    pub usage: vk::ImageUsageFlags,
}

impl Default for ImageCreateInfo {
    fn default() -> Self {
        ImageCreateInfo {
            image_type: vk::ImageType::TYPE_2D,
            format: vk::Format::UNDEFINED,
            extent: vk::Extent3D {
                width: 1,
                height: 1,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: vk::ImageUsageFlags::empty(),
        }
    }
}

impl ImageCreateInfo {
    /// A 2D (or 3D, if `depth > 1`) single-sampled optimal-tiled image.
    pub fn color_2d(format: vk::Format, extent: vk::Extent3D, usage: vk::ImageUsageFlags) -> Self {
        ImageCreateInfo {
            image_type: if extent.depth == 1 {
                vk::ImageType::TYPE_2D
            } else {
                vk::ImageType::TYPE_3D
            },
            format,
            extent,
            usage,
            ..Default::default()
        }
    }
}

/// Parameters of a newly created buffer resource.
#[derive(Copy, Clone, Debug)]
pub struct BufferCreateInfo {
    /// Size of the buffer in bytes.
    pub byte_size: u64,
    /// Usage flags.
    pub usage: vk::BufferUsageFlags,
}

/// An image produced by an allocator. The raw handle is owned by the
/// allocator implementation and stays valid for the lifetime of this object.
#[derive(Debug)]
pub struct Image {
    pub name: String,
    pub create_info: ImageCreateInfo,
    pub handle: vk::Image,
}

pub type ImageHandle = Arc<Image>;

#[derive(Debug)]
pub struct Buffer {
    pub name: String,
    pub create_info: BufferCreateInfo,
    pub handle: vk::Buffer,
}

pub type BufferHandle = Arc<Buffer>;

/// An image together with a view over all its levels and layers, suitable for
/// descriptor writes.
#[derive(Debug)]
pub struct Texture {
    pub image: ImageHandle,
    pub view: vk::ImageView,
}

pub type TextureHandle = Arc<Texture>;

/// Allocates GPU objects for the graph.
///
/// Two instances are injected into the driver: persistent outputs allocate
/// from the exclusive allocator, transient outputs from the aliasing one.
pub trait ResourceAllocator: Send + Sync {
    fn create_image(
        &self,
        create_info: &ImageCreateInfo,
        name: &str,
    ) -> Result<ImageHandle, AllocationError>;

    fn create_buffer(
        &self,
        create_info: &BufferCreateInfo,
        name: &str,
    ) -> Result<BufferHandle, AllocationError>;

    fn create_texture(&self, image: &ImageHandle) -> Result<TextureHandle, AllocationError>;

    /// A valid 1x1 texture used to fill unbound descriptor slots.
    fn dummy_texture(&self) -> TextureHandle;
}
