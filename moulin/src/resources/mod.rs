//! Concrete resources handed between connectors.
//!
//! A resource is created by an output connector during a build and carries
//! the synchronization state used to derive barriers: the last enqueued
//! layout, the access/stage masks forming the source side of the next
//! barrier, and whether the last use was a write by the producing node.

mod buffer;
mod host;
mod image;
mod texture_array;

pub use buffer::BufferResource;
pub use host::HostResource;
pub use image::ImageResource;
pub use texture_array::TextureArrayResource;

slotmap::new_key_type! {
    /// Index of a resource in the driver-owned resource arena.
    pub struct ResourceId;
}

/// One concrete resource instance (one copy of an output).
#[derive(Debug)]
pub struct GraphResource {
    /// Stamp unique across the lifetime of the driver; used to detect that a
    /// descriptor binding points at a stale resource.
    pub(crate) uid: u64,
    pub(crate) kind: ResourceKind,
}

#[derive(Debug)]
pub enum ResourceKind {
    Image(ImageResource),
    Buffer(BufferResource),
    Host(HostResource),
    TextureArray(TextureArrayResource),
}

impl GraphResource {
    pub(crate) fn new(uid: u64, kind: ResourceKind) -> Self {
        GraphResource { uid, kind }
    }

    pub fn uid(&self) -> u64 {
        self.uid
    }

    /// Content generation, bumped whenever the descriptor view of the
    /// resource changes (texture-array slot updates). Images and buffers
    /// never change their view after creation.
    pub fn generation(&self) -> u64 {
        match &self.kind {
            ResourceKind::TextureArray(a) => a.generation(),
            _ => 0,
        }
    }

    pub fn as_image(&self) -> Option<&ImageResource> {
        match &self.kind {
            ResourceKind::Image(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_image_mut(&mut self) -> Option<&mut ImageResource> {
        match &mut self.kind {
            ResourceKind::Image(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_buffer(&self) -> Option<&BufferResource> {
        match &self.kind {
            ResourceKind::Buffer(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_buffer_mut(&mut self) -> Option<&mut BufferResource> {
        match &mut self.kind {
            ResourceKind::Buffer(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_host(&self) -> Option<&HostResource> {
        match &self.kind {
            ResourceKind::Host(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_host_mut(&mut self) -> Option<&mut HostResource> {
        match &mut self.kind {
            ResourceKind::Host(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_texture_array(&self) -> Option<&TextureArrayResource> {
        match &self.kind {
            ResourceKind::TextureArray(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_texture_array_mut(&mut self) -> Option<&mut TextureArrayResource> {
        match &mut self.kind {
            ResourceKind::TextureArray(r) => Some(r),
            _ => None,
        }
    }
}
