//! Image resource state machine.

use ash::vk;

use crate::alloc::{ImageHandle, TextureHandle};
use crate::device::{all_levels_and_layers, ImageBarrier};

/// A graph-managed image together with its barrier-tracking state.
///
/// `current_*` always reflect the last barrier enqueued for the image, never
/// a pending transition. `last_used_as_output` disambiguates the source side
/// of the next barrier: true means the producing node just wrote the image,
/// false means the downstream readers of this iteration already own it.
#[derive(Debug)]
pub struct ImageResource {
    pub image: ImageHandle,
    /// View over the image, present when the usage flags allow sampling or
    /// storage access.
    pub texture: Option<TextureHandle>,

    pub(crate) current_layout: vk::ImageLayout,
    pub(crate) current_stage_mask: vk::PipelineStageFlags2,
    pub(crate) current_access_mask: vk::AccessFlags2,

    pub(crate) last_used_as_output: bool,
    pub(crate) needs_descriptor_update: bool,

    /// Combined stage mask of all inputs reading this image.
    pub(crate) input_stage_mask: vk::PipelineStageFlags2,
    /// Combined access mask of all inputs reading this image.
    pub(crate) input_access_mask: vk::AccessFlags2,
}

impl ImageResource {
    pub(crate) fn new(
        image: ImageHandle,
        texture: Option<TextureHandle>,
        input_stage_mask: vk::PipelineStageFlags2,
        input_access_mask: vk::AccessFlags2,
    ) -> Self {
        ImageResource {
            image,
            texture,
            current_layout: vk::ImageLayout::UNDEFINED,
            current_stage_mask: vk::PipelineStageFlags2::TOP_OF_PIPE,
            current_access_mask: vk::AccessFlags2::empty(),
            last_used_as_output: true,
            needs_descriptor_update: true,
            input_stage_mask,
            input_access_mask,
        }
    }

    pub fn current_layout(&self) -> vk::ImageLayout {
        self.current_layout
    }

    /// Barrier for a reader requiring `required_layout`.
    ///
    /// If the producing node wrote the image since the last read, a single
    /// barrier covers every reader of this iteration: producer stages/access
    /// on the source side, the combined input masks on the destination side.
    /// Otherwise only a layout mismatch needs fixing.
    pub(crate) fn acquire_read(&mut self, required_layout: vk::ImageLayout) -> Option<ImageBarrier> {
        if self.last_used_as_output {
            let barrier = ImageBarrier {
                image: self.image.clone(),
                src_stage_mask: self.current_stage_mask,
                src_access_mask: self.current_access_mask,
                dst_stage_mask: self.input_stage_mask,
                dst_access_mask: self.input_access_mask,
                old_layout: self.current_layout,
                new_layout: required_layout,
                subresource_range: all_levels_and_layers(),
            };
            self.current_stage_mask = self.input_stage_mask;
            self.current_access_mask = self.input_access_mask;
            self.current_layout = required_layout;
            self.last_used_as_output = false;
            Some(barrier)
        } else if self.current_layout != required_layout {
            let barrier = ImageBarrier {
                image: self.image.clone(),
                src_stage_mask: self.current_stage_mask,
                src_access_mask: self.current_access_mask,
                dst_stage_mask: self.current_stage_mask,
                dst_access_mask: self.current_access_mask,
                old_layout: self.current_layout,
                new_layout: required_layout,
                subresource_range: all_levels_and_layers(),
            };
            self.current_layout = required_layout;
            Some(barrier)
        } else {
            None
        }
    }

    /// Barrier for the producing node before it writes. Transient images pass
    /// `discard = true`: the previous contents transition from `UNDEFINED`,
    /// which is cheaper and legal since nothing may read them again.
    pub(crate) fn acquire_write(
        &mut self,
        required_layout: vk::ImageLayout,
        dst_stage_mask: vk::PipelineStageFlags2,
        dst_access_mask: vk::AccessFlags2,
        discard: bool,
    ) -> ImageBarrier {
        let old_layout = if discard {
            vk::ImageLayout::UNDEFINED
        } else {
            self.current_layout
        };
        let barrier = ImageBarrier {
            image: self.image.clone(),
            src_stage_mask: self.current_stage_mask,
            src_access_mask: self.current_access_mask,
            dst_stage_mask,
            dst_access_mask,
            old_layout,
            new_layout: required_layout,
            subresource_range: all_levels_and_layers(),
        };
        self.current_stage_mask = dst_stage_mask;
        self.current_access_mask = dst_access_mask;
        self.current_layout = required_layout;
        barrier
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::{Image, ImageCreateInfo};
    use std::sync::Arc;

    fn test_image() -> ImageHandle {
        Arc::new(Image {
            name: "test".into(),
            create_info: ImageCreateInfo::default(),
            handle: vk::Image::null(),
        })
    }

    fn fresh() -> ImageResource {
        ImageResource::new(
            test_image(),
            None,
            vk::PipelineStageFlags2::COMPUTE_SHADER,
            vk::AccessFlags2::SHADER_READ,
        )
    }

    #[test]
    fn write_then_read_single_barrier() {
        let mut res = fresh();
        let w = res.acquire_write(
            vk::ImageLayout::GENERAL,
            vk::PipelineStageFlags2::COMPUTE_SHADER,
            vk::AccessFlags2::SHADER_WRITE,
            true,
        );
        assert_eq!(w.old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(w.new_layout, vk::ImageLayout::GENERAL);
        res.last_used_as_output = true;

        let r = res
            .acquire_read(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .expect("first read after a write must emit a barrier");
        assert_eq!(r.src_access_mask, vk::AccessFlags2::SHADER_WRITE);
        assert_eq!(r.dst_access_mask, vk::AccessFlags2::SHADER_READ);
        assert_eq!(r.new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert!(!res.last_used_as_output);

        // A second reader wanting the same layout needs no barrier.
        assert!(res
            .acquire_read(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .is_none());
    }

    #[test]
    fn layout_only_transition_keeps_masks() {
        let mut res = fresh();
        res.acquire_write(
            vk::ImageLayout::GENERAL,
            vk::PipelineStageFlags2::COMPUTE_SHADER,
            vk::AccessFlags2::SHADER_WRITE,
            true,
        );
        res.last_used_as_output = true;
        res.acquire_read(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);

        let b = res
            .acquire_read(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
            .expect("layout mismatch must emit a barrier");
        assert_eq!(b.src_stage_mask, b.dst_stage_mask);
        assert_eq!(b.src_access_mask, b.dst_access_mask);
        assert_eq!(b.old_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(b.new_layout, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
    }

    #[test]
    fn persistent_write_preserves_contents() {
        let mut res = fresh();
        res.acquire_write(
            vk::ImageLayout::GENERAL,
            vk::PipelineStageFlags2::COMPUTE_SHADER,
            vk::AccessFlags2::SHADER_WRITE,
            false,
        );
        res.last_used_as_output = true;
        res.acquire_read(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);

        let b = res.acquire_write(
            vk::ImageLayout::GENERAL,
            vk::PipelineStageFlags2::COMPUTE_SHADER,
            vk::AccessFlags2::SHADER_WRITE,
            false,
        );
        // Not discarded: the transition starts from the tracked layout.
        assert_eq!(b.old_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    }
}
