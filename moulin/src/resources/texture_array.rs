//! A mutable table of textures exposed as one descriptor-array binding.

use ash::vk;

use crate::alloc::TextureHandle;
use crate::device::{all_levels_and_layers, ImageBarrier};

/// Resource behind a texture-array output.
///
/// The producing node may replace any slot at any time via [`set`]; the
/// change is recorded with a generation stamp so descriptor updates only
/// rewrite the slots that actually changed. Unbound slots are backed by the
/// dummy texture so descriptor sets stay valid.
///
/// [`set`]: TextureArrayResource::set
#[derive(Debug)]
pub struct TextureArrayResource {
    textures: Vec<Option<TextureHandle>>,
    /// Tracked layout per bound slot; the reading connector emits transitions
    /// to its required layout on pre-process.
    layouts: Vec<vk::ImageLayout>,
    /// Generation at which each slot last changed.
    slot_generations: Vec<u64>,
    generation: u64,

    /// Copies of the bound tables, one per ring slot, so textures stay alive
    /// while an in-flight iteration may still read them.
    in_flight: Vec<Vec<Option<TextureHandle>>>,

    pub(crate) dummy: TextureHandle,
    /// Combined stage mask of all reading connectors.
    pub(crate) input_stage_mask: vk::PipelineStageFlags2,
    /// Combined access mask of all reading connectors.
    pub(crate) input_access_mask: vk::AccessFlags2,
    /// Layout every reader requires.
    pub(crate) first_input_layout: vk::ImageLayout,
}

impl TextureArrayResource {
    pub(crate) fn new(
        array_size: u32,
        ring_size: u32,
        dummy: TextureHandle,
        input_stage_mask: vk::PipelineStageFlags2,
        input_access_mask: vk::AccessFlags2,
        first_input_layout: vk::ImageLayout,
    ) -> Self {
        let n = array_size as usize;
        TextureArrayResource {
            textures: vec![None; n],
            layouts: vec![vk::ImageLayout::UNDEFINED; n],
            // Every slot starts dirty so the first descriptor write fills the
            // whole array (with the dummy where nothing is bound).
            slot_generations: vec![1; n],
            generation: 1,
            in_flight: vec![vec![None; n]; ring_size as usize],
            dummy,
            input_stage_mask,
            input_access_mask,
            first_input_layout,
        }
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&TextureHandle> {
        self.textures[index].as_ref()
    }

    /// Binds `texture` (or clears the slot) and records the layout its image
    /// is currently in. The reading connector transitions it on the next
    /// pre-process; the descriptor update rewrites only changed slots.
    pub fn set(
        &mut self,
        index: usize,
        texture: Option<TextureHandle>,
        current_layout: vk::ImageLayout,
    ) {
        let changed = match (&self.textures[index], &texture) {
            (Some(a), Some(b)) => !std::ptr::eq(a.as_ref(), b.as_ref()),
            (None, None) => false,
            _ => true,
        };
        self.layouts[index] = current_layout;
        if changed {
            self.textures[index] = texture;
            self.generation += 1;
            self.slot_generations[index] = self.generation;
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Layout transitions for every bound texture not yet in the readers'
    /// required layout.
    pub(crate) fn acquire_read(&mut self, barriers: &mut Vec<ImageBarrier>) {
        for (i, texture) in self.textures.iter().enumerate() {
            let Some(texture) = texture else { continue };
            if self.layouts[i] != self.first_input_layout {
                barriers.push(ImageBarrier {
                    image: texture.image.clone(),
                    src_stage_mask: vk::PipelineStageFlags2::TOP_OF_PIPE,
                    src_access_mask: vk::AccessFlags2::empty(),
                    dst_stage_mask: self.input_stage_mask,
                    dst_access_mask: self.input_access_mask,
                    old_layout: self.layouts[i],
                    new_layout: self.first_input_layout,
                    subresource_range: all_levels_and_layers(),
                });
                self.layouts[i] = self.first_input_layout;
            }
        }
    }

    /// Keeps the bound table alive for ring slot `in_flight_index`.
    pub(crate) fn retain_for_slot(&mut self, in_flight_index: usize) {
        self.in_flight[in_flight_index] = self.textures.clone();
    }

    /// Slots changed after `since`, for partial descriptor writes.
    pub(crate) fn changed_slots(&self, since: u64) -> impl Iterator<Item = usize> + '_ {
        self.slot_generations
            .iter()
            .enumerate()
            .filter(move |(_, &g)| g > since)
            .map(|(i, _)| i)
    }
}
